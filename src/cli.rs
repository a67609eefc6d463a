use crate::model::{AlgorithmKind, AppEvent, PlaybackSummary, RepresentationFormat, RunConfig};
use crate::orchestrator::{load_dataset, run_controller, DatasetSource, RunContext, UiCommand};
use crate::render::SharedHighlights;
use crate::service::{AlgorithmService, Backend, ReplayService, ServiceClient};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use clap::Parser;
use rand::RngCore;
use std::io::Write;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "mapgraph",
    version,
    about = "Step-by-step graph algorithm explorer with optional TUI"
)]
pub struct Cli {
    /// Base URL of the algorithm service
    #[arg(long, default_value = "http://localhost:8000/api")]
    pub base_url: String,

    /// Load the dataset from a JSON file ({"nodes": [...], "edges": [...]})
    #[arg(long)]
    pub dataset: Option<std::path::PathBuf>,

    /// Load a graph previously saved on the service
    #[arg(long)]
    pub saved_graph: Option<String>,

    /// Fetch map data from the service
    #[arg(long)]
    pub map_data: bool,

    /// Only keep major roads when fetching map data
    #[arg(long)]
    pub major_roads_only: bool,

    /// Algorithm to run once the dataset is loaded (bfs, dfs, shortest-path, bipartite)
    #[arg(long)]
    pub algorithm: Option<AlgorithmKind>,

    /// Start entity id
    #[arg(long)]
    pub start: Option<String>,

    /// End entity id (shortest path)
    #[arg(long, requires = "start")]
    pub end: Option<String>,

    /// Delay between playback steps in milliseconds
    #[arg(long, default_value_t = 500)]
    pub interval_ms: u64,

    /// Timeout for each service request
    #[arg(long, default_value = "30s")]
    pub request_timeout: humantime::Duration,

    /// Replay an algorithm response from a JSON file instead of calling the service
    #[arg(long)]
    pub response_file: Option<std::path::PathBuf>,

    /// Print JSON result and exit (no TUI, no playback)
    #[arg(long)]
    pub json: bool,

    /// Play steps as text and exit (no TUI)
    #[arg(long)]
    pub text: bool,

    /// List graphs saved on the service and exit
    #[arg(long)]
    pub list_saved_graphs: bool,

    /// Convert the dataset to another representation, print it and exit
    /// (adjacency-matrix, adjacency-list, edge-list)
    #[arg(long, value_name = "FORMAT")]
    pub convert: Option<RepresentationFormat>,

    /// Export results as JSON
    #[arg(long)]
    pub export_json: Option<std::path::PathBuf>,

    /// Export results as CSV (one row per step)
    #[arg(long)]
    pub export_csv: Option<std::path::PathBuf>,

    /// Use --auto-save true or --auto-save false to override
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub auto_save: bool,

    /// Save the loaded dataset on the service under this name
    #[arg(long)]
    pub save_as: Option<String>,

    /// Log level filter (RUST_LOG takes precedence)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

impl Cli {
    /// True when the interactive TUI will own the terminal.
    pub fn is_tui(&self) -> bool {
        cfg!(feature = "tui")
            && !self.json
            && !self.text
            && !self.list_saved_graphs
            && self.convert.is_none()
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && args.text {
        return Err(anyhow::anyhow!("--json and --text are mutually exclusive"));
    }

    if args.list_saved_graphs {
        return run_list_saved(args).await;
    }

    if let Some(format) = args.convert {
        return run_convert(args, format).await;
    }

    if !args.json && !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(args).await;
        }
        #[cfg(not(feature = "tui"))]
        {
            // Fallback when built without TUI support.
            return run_text(args).await;
        }
    }

    if args.json {
        return run_json(args).await;
    }

    run_text(args).await
}

/// Generate a random id for one algorithm run.
pub(crate) fn gen_run_id() -> String {
    let mut b = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut b);
    u64::from_le_bytes(b).to_string()
}

/// Build a `RunConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> RunConfig {
    RunConfig {
        base_url: args.base_url.clone(),
        run_id: gen_run_id(),
        algorithm: args.algorithm,
        start: args.start.clone(),
        end: args.end.clone(),
        interval_ms: args.interval_ms,
        request_timeout: Duration::from(args.request_timeout),
        user_agent: format!("mapgraph/{}", env!("CARGO_PKG_VERSION")),
        major_roads_only: args.major_roads_only,
    }
}

/// The live service, or a replayed response file when `--response-file` is given.
pub(crate) fn build_backend(args: &Cli, cfg: &RunConfig) -> Result<Backend> {
    match &args.response_file {
        Some(path) => Ok(Backend::Replay(ReplayService::new(path.clone()))),
        None => Ok(Backend::Live(ServiceClient::new(cfg)?)),
    }
}

/// Non-interactive modes need an algorithm and a dataset.
fn require_run_args(args: &Cli) -> Result<(AlgorithmKind, DatasetSource)> {
    let kind = args
        .algorithm
        .context("--algorithm is required with --json and --text")?;
    let source = DatasetSource::from_args(args)
        .context("a dataset is required: use --dataset, --saved-graph or --map-data")?;
    Ok((kind, source))
}

async fn run_list_saved(args: Cli) -> Result<()> {
    let cfg = build_config(&args);
    let client = ServiceClient::new(&cfg)?;
    let graphs = client.list_saved_graphs().await?;
    let (out_tx, out_handle) = spawn_output_writer();
    if args.json {
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&graphs)?));
    } else if graphs.is_empty() {
        let _ = out_tx.send(OutputLine::Stderr("No saved graphs".into()));
    } else {
        for g in &graphs {
            let _ = out_tx.send(OutputLine::Stdout(format!(
                "{}  {} ({} nodes, {} edges) {}",
                g.filename,
                g.name,
                g.node_count,
                g.edge_count,
                g.saved_at.as_deref().unwrap_or("")
            )));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Convert the dataset on the service and print the result.
async fn run_convert(args: Cli, format: RepresentationFormat) -> Result<()> {
    let source = DatasetSource::from_args(&args)
        .context("a dataset is required: use --dataset, --saved-graph or --map-data")?;
    let cfg = build_config(&args);
    let backend = build_backend(&args, &cfg)?;
    let client = backend
        .client()
        .context("--convert needs the algorithm service, not --response-file")?;

    let dataset = load_dataset(&backend, &source).await?;
    let representation = client.convert_representation(&dataset, format).await?;

    let (out_tx, out_handle) = spawn_output_writer();
    if args.json {
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&representation)?));
    } else {
        for line in crate::text_summary::build_representation_lines(&representation) {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Run the algorithm once and print the run record as JSON, without playback.
async fn run_json(args: Cli) -> Result<()> {
    let (kind, source) = require_run_args(&args)?;
    let cfg = build_config(&args);
    let backend = build_backend(&args, &cfg)?;
    let (out_tx, out_handle) = spawn_output_writer();

    let dataset = load_dataset(&backend, &source).await?;
    if let (Some(name), Some(client)) = (args.save_as.as_deref(), backend.client()) {
        let filename = client.save_graph(name, &dataset).await?;
        let _ = out_tx.send(OutputLine::Stderr(format!("Graph saved as: {filename}")));
    }

    let mut workspace = Workspace::new();
    workspace.load(dataset);
    for id in [args.start.as_deref(), args.end.as_deref()].into_iter().flatten() {
        workspace.pick(id)?;
    }
    let request = workspace.build_request(kind)?;
    let ctx = RunContext {
        run_id: cfg.run_id.clone(),
        kind,
        start: request.start_node.clone(),
        end: request.end_node.clone(),
        entity_count: request.graph.entities.len(),
        relation_count: request.graph.relations.len(),
    };

    let run = backend
        .run_algorithm(request)
        .await
        .context("algorithm run failed")?;
    let total_steps = run.steps.len();
    let mut steps = Vec::with_capacity(total_steps);
    let mut malformed_steps = 0;
    for (i, raw) in run.steps.iter().enumerate() {
        match raw.validate(i + 1) {
            Ok(step) => steps.push(step),
            Err(e) => {
                log::warn!("{e}");
                malformed_steps += 1;
            }
        }
    }
    let summary = PlaybackSummary {
        kind,
        total_steps,
        steps_played: steps.len(),
        malformed_steps,
        outcome: run.outcome,
        step_gaps_ms: Vec::new(),
    };
    let record = crate::orchestrator::build_record(&cfg.base_url, &ctx, cfg.interval_ms, summary, steps);

    handle_exports(&args, &record)?;
    let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&record)?));

    if args.auto_save {
        if let Ok(p) = crate::storage::save_run(&record) {
            let _ = out_tx.send(OutputLine::Stderr(format!("Saved: {}", p.display())));
        }
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}

/// Play the run step by step on stdout, then print a summary.
async fn run_text(args: Cli) -> Result<()> {
    require_run_args(&args)?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (evt_tx, mut evt_rx) = mpsc::unbounded_channel::<AppEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let controller_args = args.clone();
    let controller = tokio::spawn(async move {
        run_controller(&controller_args, SharedHighlights::new(), evt_tx, cmd_rx).await
    });

    let mut failure: Option<String> = None;
    let mut completed = None;
    let mut interrupted = false;
    loop {
        let ev = tokio::select! {
            ev = evt_rx.recv() => ev,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                let _ = cmd_tx.send(UiCommand::Quit);
                continue;
            }
        };
        let Some(ev) = ev else { break };
        match ev {
            AppEvent::DatasetLoaded { dataset, source } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Loaded {source}: {} entities, {} relations",
                    dataset.entities.len(),
                    dataset.relations.len()
                )));
            }
            AppEvent::RunStarted { kind, total_steps } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "== {kind}: {total_steps} step(s) =="
                )));
            }
            AppEvent::Step { step } => {
                let _ = out_tx.send(OutputLine::Stdout(format!(
                    "Step {}: {}",
                    step.index, step.description
                )));
            }
            AppEvent::MalformedStep { position, reason } => {
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "Step {position} skipped: {reason}"
                )));
            }
            AppEvent::Info(info) => {
                let _ = out_tx.send(OutputLine::Stderr(info.to_message()));
                if info.is_error() {
                    failure = Some(info.to_message());
                    let _ = cmd_tx.send(UiCommand::Quit);
                }
            }
            AppEvent::RunCompleted { record } => {
                completed = Some(record);
                let _ = cmd_tx.send(UiCommand::Quit);
            }
            _ => {}
        }
    }

    controller.await.context("controller task failed")??;

    if let Some(record) = completed {
        let summary = crate::text_summary::build_text_summary(&record);
        for line in summary.lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;

    if let Some(msg) = failure {
        return Err(anyhow::anyhow!(msg));
    }
    if interrupted {
        return Err(anyhow::anyhow!("interrupted"));
    }
    Ok(())
}

/// Handle export operations (JSON and CSV) outside the controller.
fn handle_exports(args: &Cli, record: &crate::model::RunRecord) -> Result<()> {
    if let Some(p) = args.export_json.as_deref() {
        crate::storage::export_json(p, record)?;
    }
    if let Some(p) = args.export_csv.as_deref() {
        crate::storage::export_csv(p, record)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_config_defaults() {
        let args = Cli::try_parse_from(["mapgraph"]).expect("parse");
        let cfg = build_config(&args);
        assert_eq!(cfg.base_url, "http://localhost:8000/api");
        assert_eq!(cfg.interval_ms, 500);
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert!(cfg.algorithm.is_none());
        assert!(!cfg.run_id.is_empty());
    }

    #[test]
    fn test_algorithm_flag_parses_aliases() {
        let args = Cli::try_parse_from(["mapgraph", "--algorithm", "dijkstra", "--text"])
            .expect("parse");
        assert_eq!(args.algorithm, Some(AlgorithmKind::ShortestPath));
        assert!(!args.is_tui());
        assert!(Cli::try_parse_from(["mapgraph", "--algorithm", "prim"]).is_err());
    }

    #[test]
    fn test_non_interactive_modes_need_algorithm_and_dataset() {
        let args = Cli::try_parse_from(["mapgraph", "--json", "--map-data"]).expect("parse");
        assert!(require_run_args(&args).is_err());
        let args = Cli::try_parse_from(["mapgraph", "--json", "--algorithm", "bfs"]).expect("parse");
        assert!(require_run_args(&args).is_err());
        let args = Cli::try_parse_from(["mapgraph", "--json", "--algorithm", "bfs", "--map-data"])
            .expect("parse");
        let (kind, source) = require_run_args(&args).expect("valid");
        assert_eq!(kind, AlgorithmKind::Bfs);
        assert_eq!(
            source,
            DatasetSource::MapData {
                major_roads_only: false
            }
        );
    }

    #[test]
    fn test_end_requires_start() {
        assert!(Cli::try_parse_from(["mapgraph", "--text", "--end", "b"]).is_err());
        let args = Cli::try_parse_from(["mapgraph", "--start", "a", "--end", "b"]).expect("parse");
        assert_eq!(args.end.as_deref(), Some("b"));
    }

    #[test]
    fn test_convert_flag_leaves_tui() {
        let args = Cli::try_parse_from(["mapgraph", "--convert", "edge-list", "--map-data"])
            .expect("parse");
        assert_eq!(args.convert, Some(RepresentationFormat::EdgeList));
        assert!(!args.is_tui());
        assert!(Cli::try_parse_from(["mapgraph", "--convert", "incidence"]).is_err());
    }
}
