use crate::model::RunRecord;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Default export file name for a run, without extension.
fn default_stem(r: &RunRecord) -> String {
    format!(
        "mapgraph-{}-{}-{}",
        r.algorithm.endpoint(),
        r.timestamp_utc.replace(':', "-").replace('T', "_"),
        &r.run_id[..8.min(r.run_id.len())]
    )
}

fn export_path(r: &RunRecord, ext: &str) -> Result<PathBuf> {
    let current_dir = std::env::current_dir().context("get current directory")?;
    Ok(current_dir.join(format!("{}.{ext}", default_stem(r))))
}

/// Export JSON into the current directory.
/// Returns the absolute path of the exported file.
pub fn export_record_json(r: &RunRecord) -> Result<PathBuf> {
    let path = export_path(r, "json")?;
    crate::storage::export_json(&path, r)?;
    Ok(path)
}

/// Export CSV into the current directory.
/// Returns the absolute path of the exported file.
pub fn export_record_csv(r: &RunRecord) -> Result<PathBuf> {
    let path = export_path(r, "csv")?;
    crate::storage::export_csv(&path, r)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlgorithmKind, AlgorithmOutcome};

    #[test]
    fn test_default_stem() {
        let r = RunRecord {
            timestamp_utc: "2026-03-01T08:30:00Z".into(),
            run_id: "1234567890123".into(),
            base_url: String::new(),
            algorithm: AlgorithmKind::ShortestPath,
            start: None,
            end: None,
            entity_count: 0,
            relation_count: 0,
            interval_ms: 500,
            total_steps: 0,
            malformed_steps: 0,
            steps: Vec::new(),
            outcome: AlgorithmOutcome::ShortestPath {
                path: Vec::new(),
                distance: 0.0,
            },
            step_gaps_ms: Vec::new(),
        };
        assert_eq!(
            default_stem(&r),
            "mapgraph-shortest-path-2026-03-01_08-30-00Z-12345678"
        );
    }
}
