//! Post-run processing utilities.
//!
//! Turns a finished playback into a `RunRecord`, then handles auto-save and exports.

use crate::cli::Cli;
use crate::model::{AlgorithmKind, PlaybackSummary, RunRecord, Step};
use crate::storage;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// What was requested for a run, captured when the request was sent.
#[derive(Debug, Clone)]
pub(crate) struct RunContext {
    pub run_id: String,
    pub kind: AlgorithmKind,
    pub start: Option<String>,
    pub end: Option<String>,
    pub entity_count: usize,
    pub relation_count: usize,
}

/// Result of post-run processing, ready for presentation layers.
pub(crate) struct ProcessedRun {
    pub record: RunRecord,
    pub export_messages: Vec<String>,
    pub auto_saved_path: Option<std::path::PathBuf>,
}

fn now_utc() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Assemble the stored form of a completed run.
pub(crate) fn build_record(
    base_url: &str,
    ctx: &RunContext,
    interval_ms: u64,
    summary: PlaybackSummary,
    steps: Vec<Step>,
) -> RunRecord {
    RunRecord {
        timestamp_utc: now_utc(),
        run_id: ctx.run_id.clone(),
        base_url: base_url.to_string(),
        algorithm: ctx.kind,
        start: ctx.start.clone(),
        end: ctx.end.clone(),
        entity_count: ctx.entity_count,
        relation_count: ctx.relation_count,
        interval_ms,
        total_steps: summary.total_steps,
        malformed_steps: summary.malformed_steps,
        steps,
        outcome: summary.outcome,
        step_gaps_ms: summary.step_gaps_ms,
    }
}

/// Process a completed run: auto-save and export.
pub(crate) fn process_run_completion(args: &Cli, record: RunRecord) -> ProcessedRun {
    let auto_saved_path = if args.auto_save {
        match storage::save_run(&record) {
            Ok(p) => Some(p),
            Err(e) => {
                log::warn!("auto-save failed: {e:#}");
                None
            }
        }
    } else {
        None
    };

    let mut export_messages = Vec::new();
    if let Some(export_path) = args.export_json.as_deref() {
        match storage::export_json(export_path, &record) {
            Ok(_) => export_messages.push(format!("Exported JSON: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export JSON failed: {e:#}")),
        }
    }
    if let Some(export_path) = args.export_csv.as_deref() {
        match storage::export_csv(export_path, &record) {
            Ok(_) => export_messages.push(format!("Exported CSV: {}", export_path.display())),
            Err(e) => export_messages.push(format!("Export CSV failed: {e:#}")),
        }
    }

    ProcessedRun {
        record,
        export_messages,
        auto_saved_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlgorithmOutcome;

    #[test]
    fn test_build_record_copies_context_and_summary() {
        let ctx = RunContext {
            run_id: "42".into(),
            kind: AlgorithmKind::Dfs,
            start: Some("a".into()),
            end: None,
            entity_count: 3,
            relation_count: 2,
        };
        let summary = PlaybackSummary {
            kind: AlgorithmKind::Dfs,
            total_steps: 3,
            steps_played: 2,
            malformed_steps: 1,
            outcome: AlgorithmOutcome::Traversal {
                order: vec!["a".into()],
                visited_count: 1,
            },
            step_gaps_ms: vec![500.0],
        };
        let record = build_record("http://svc", &ctx, 250, summary, Vec::new());
        assert_eq!(record.run_id, "42");
        assert_eq!(record.algorithm, AlgorithmKind::Dfs);
        assert_eq!(record.interval_ms, 250);
        assert_eq!(record.malformed_steps, 1);
        assert_eq!(record.step_gaps_ms, vec![500.0]);
        assert!(record.timestamp_utc.ends_with('Z'));
    }

    #[test]
    fn test_completion_exports_without_touching_history() {
        use clap::Parser;

        let dir = tempfile::tempdir().expect("tempdir");
        let json_path = dir.path().join("run.json");
        let args = Cli::try_parse_from([
            "mapgraph".to_string(),
            "--auto-save".to_string(),
            "false".to_string(),
            "--export-json".to_string(),
            json_path.display().to_string(),
        ])
        .expect("parse");
        let ctx = RunContext {
            run_id: "7".into(),
            kind: AlgorithmKind::Bipartite,
            start: None,
            end: None,
            entity_count: 0,
            relation_count: 0,
        };
        let summary = PlaybackSummary {
            kind: AlgorithmKind::Bipartite,
            total_steps: 0,
            steps_played: 0,
            malformed_steps: 0,
            outcome: AlgorithmOutcome::Bipartite {
                is_bipartite: true,
                set_a: Vec::new(),
                set_b: Vec::new(),
            },
            step_gaps_ms: Vec::new(),
        };
        let record = build_record("http://svc", &ctx, 500, summary, Vec::new());

        let processed = process_run_completion(&args, record);
        assert_eq!(processed.record.run_id, "7");
        assert!(processed.auto_saved_path.is_none());
        assert_eq!(
            processed.export_messages,
            vec![format!("Exported JSON: {}", json_path.display())]
        );
        assert!(json_path.exists());
    }
}
