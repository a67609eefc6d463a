//! Local run history and exports.

use crate::model::RunRecord;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

fn runs_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no data directory for this platform")?;
    Ok(base.join("mapgraph").join("runs"))
}

/// Directory holding the log file written in TUI mode.
pub fn log_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("no data directory for this platform")?;
    Ok(base.join("mapgraph"))
}

fn record_file_name(record: &RunRecord) -> String {
    format!(
        "run-{}-{}.json",
        record.timestamp_utc.replace(':', "-"),
        &record.run_id[..8.min(record.run_id.len())]
    )
}

/// Persist a run into the history directory.
pub fn save_run(record: &RunRecord) -> Result<PathBuf> {
    save_run_in(&runs_dir()?, record)
}

pub(crate) fn save_run_in(dir: &Path, record: &RunRecord) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(record_file_name(record));
    export_json(&path, record)?;
    log::info!("saved run {} to {}", record.run_id, path.display());
    Ok(path)
}

/// Load up to `limit` most recent runs, newest first.
pub fn load_recent(limit: usize) -> Result<Vec<RunRecord>> {
    load_recent_in(&runs_dir()?, limit)
}

pub(crate) fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<RunRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("read {}", dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|x| x.to_str()) == Some("json"))
        .collect();
    // File names start with the RFC3339 timestamp, so name order is time order.
    paths.sort();
    paths.reverse();

    let mut out = Vec::new();
    for p in paths.into_iter().take(limit) {
        let raw = match std::fs::read_to_string(&p) {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("skipping {}: {e}", p.display());
                continue;
            }
        };
        match serde_json::from_str::<RunRecord>(&raw) {
            Ok(r) => out.push(r),
            Err(e) => log::warn!("skipping unreadable run {}: {e}", p.display()),
        }
    }
    Ok(out)
}

pub fn export_json(path: &Path, record: &RunRecord) -> Result<()> {
    let data = serde_json::to_vec_pretty(record).context("serialize run")?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

fn csv_field(s: &str) -> String {
    if s.contains([',', '"', '\n']) {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Write one CSV row per delivered step.
pub fn export_csv(path: &Path, record: &RunRecord) -> Result<()> {
    let mut out = String::from(
        "run_id,timestamp_utc,algorithm,step,action,entity,relation_source,relation_target,description\n",
    );
    for step in &record.steps {
        let (src, dst) = step
            .relation
            .as_ref()
            .map(|r| (r.source.as_str(), r.target.as_str()))
            .unwrap_or(("", ""));
        let row = [
            csv_field(&record.run_id),
            csv_field(&record.timestamp_utc),
            csv_field(record.algorithm.endpoint()),
            step.index.to_string(),
            csv_field(step.action.as_deref().unwrap_or("")),
            csv_field(step.entity.as_deref().unwrap_or("")),
            csv_field(src),
            csv_field(dst),
            csv_field(&step.description),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlgorithmKind, AlgorithmOutcome, RelationRef, Step};

    fn record(ts: &str) -> RunRecord {
        RunRecord {
            timestamp_utc: ts.into(),
            run_id: "1234567890".into(),
            base_url: "http://localhost:8000/api".into(),
            algorithm: AlgorithmKind::Bfs,
            start: Some("a".into()),
            end: None,
            entity_count: 2,
            relation_count: 1,
            interval_ms: 500,
            total_steps: 1,
            malformed_steps: 0,
            steps: vec![Step {
                index: 1,
                description: "Visit a, then \"b\"".into(),
                action: Some("visit".into()),
                entity: Some("a".into()),
                relation: Some(RelationRef {
                    source: "a".into(),
                    target: "b".into(),
                }),
            }],
            outcome: AlgorithmOutcome::Traversal {
                order: vec!["a".into(), "b".into()],
                visited_count: 2,
            },
            step_gaps_ms: Vec::new(),
        }
    }

    #[test]
    fn test_history_newest_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        save_run_in(dir.path(), &record("2026-01-01T10:00:00Z")).expect("save");
        save_run_in(dir.path(), &record("2026-01-02T10:00:00Z")).expect("save");
        std::fs::write(dir.path().join("garbage.json"), "{").expect("write garbage");

        let runs = load_recent_in(dir.path(), 5).expect("load");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].timestamp_utc, "2026-01-02T10:00:00Z");

        assert!(load_recent_in(&dir.path().join("missing"), 5)
            .expect("missing dir is empty")
            .is_empty());
    }

    #[test]
    fn test_export_csv_quotes_descriptions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.csv");
        export_csv(&path, &record("2026-01-01T10:00:00Z")).expect("export");
        let text = std::fs::read_to_string(&path).expect("read csv");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1234567890,2026-01-01T10:00:00Z,bfs,1,visit,a,a,b,"));
        assert!(lines[1].ends_with("\"Visit a, then \"\"b\"\"\""));
    }
}
