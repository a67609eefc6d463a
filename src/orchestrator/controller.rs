//! Explorer session controller.
//!
//! Owns the workspace, the step player, and in-flight service calls, and emits events for
//! presentation layers.

use super::post_process::{self, RunContext};
use crate::cli::{build_backend, build_config, gen_run_id, Cli};
use crate::model::{
    AlgorithmKind, AlgorithmRun, AppEvent, Dataset, InfoEvent, PlaybackState, Representation,
    RepresentationFormat, RunConfig, SavedGraph,
};
use crate::player::StepPlayer;
use crate::render::{self, FinishedPlayback, HighlightSink, Highlighter, SharedHighlights};
use crate::service::{AlgorithmService, Backend};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Duration, Instant};

const SLOW_REQUEST: Duration = Duration::from_secs(5);

/// Where a dataset comes from.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DatasetSource {
    File(PathBuf),
    MapData { major_roads_only: bool },
    Saved(String),
    Empty,
}

impl DatasetSource {
    /// The dataset requested on the command line, if any.
    pub(crate) fn from_args(args: &Cli) -> Option<Self> {
        if let Some(path) = &args.dataset {
            Some(DatasetSource::File(path.clone()))
        } else if let Some(name) = &args.saved_graph {
            Some(DatasetSource::Saved(name.clone()))
        } else if args.map_data {
            Some(DatasetSource::MapData {
                major_roads_only: args.major_roads_only,
            })
        } else {
            None
        }
    }

    pub(crate) fn describe(&self) -> String {
        match self {
            DatasetSource::File(p) => p.display().to_string(),
            DatasetSource::MapData {
                major_roads_only: true,
            } => "map data (major roads)".to_string(),
            DatasetSource::MapData { .. } => "map data".to_string(),
            DatasetSource::Saved(name) => format!("saved graph {name}"),
            DatasetSource::Empty => "Empty Canvas".to_string(),
        }
    }
}

/// Load a dataset from `source`. Remote sources need the live service.
pub(crate) async fn load_dataset(backend: &Backend, source: &DatasetSource) -> Result<Dataset> {
    match source {
        DatasetSource::File(path) => {
            let path = path.clone();
            tokio::task::spawn_blocking(move || Dataset::from_json_file(&path))
                .await
                .context("dataset loader task failed")?
        }
        DatasetSource::Empty => Ok(Dataset::empty()),
        DatasetSource::MapData { major_roads_only } => {
            let client = backend
                .client()
                .context("map data needs the algorithm service, not a response file")?;
            client.fetch_map_data(*major_roads_only).await
        }
        DatasetSource::Saved(name) => {
            let client = backend
                .client()
                .context("saved graphs need the algorithm service, not a response file")?;
            client.load_graph(name).await
        }
    }
}

/// Commands emitted by UI layers to drive the explorer.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    Pick(String),
    AddEntity { lat: f64, lon: f64 },
    Run(AlgorithmKind),
    TogglePause,
    SetInterval(u64),
    ClearSelection,
    ClearDataset,
    LoadDataset(DatasetSource),
    SaveGraph(String),
    ListSavedGraphs,
    ConvertRepresentation(RepresentationFormat),
    Quit,
}

/// An algorithm request waiting on the service.
struct PendingRun {
    ctx: RunContext,
    started: Instant,
    slow_reported: bool,
    handle: JoinHandle<Result<AlgorithmRun>>,
}

/// Results of background jobs other than algorithm runs.
enum JobResult {
    Dataset {
        epoch: u64,
        source: String,
        result: Result<Dataset>,
    },
    Saved(Result<String>),
    Listed(Result<Vec<SavedGraph>>),
    Converted(Result<Representation>),
}

struct Explorer<'a> {
    args: &'a Cli,
    cfg: RunConfig,
    backend: Backend,
    workspace: Workspace,
    player: StepPlayer,
    highlights: SharedHighlights,
    event_tx: UnboundedSender<AppEvent>,
    done_tx: UnboundedSender<FinishedPlayback>,
    job_tx: UnboundedSender<JobResult>,
    next_ticket: u64,
    /// Bumped on every dataset change; loads started under an older epoch are dropped.
    dataset_epoch: u64,
    playing: Option<(u64, RunContext)>,
    /// Apply `--start`/`--end`/`--algorithm` once the first dataset arrives.
    autorun: bool,
}

impl<'a> Explorer<'a> {
    fn info(&self, info: InfoEvent) {
        let _ = self.event_tx.send(AppEvent::Info(info));
    }

    fn error(&self, msg: impl Into<String>) {
        let msg = msg.into();
        log::warn!("{msg}");
        self.info(InfoEvent::Error(msg));
    }

    fn emit_playback(&self) {
        let _ = self.event_tx.send(AppEvent::Playback {
            state: self.player.state(),
            interval_ms: self.player.interval_ms(),
        });
    }

    fn emit_selection(&self) {
        let sel = self.workspace.selection();
        let _ = self.event_tx.send(AppEvent::SelectionChanged {
            start: sel.start().map(str::to_string),
            end: sel.end().map(str::to_string),
        });
    }

    /// Drop any in-flight request and stop playback.
    fn stop_activity(&mut self, pending: &mut Option<PendingRun>) {
        if let Some(p) = pending.take() {
            log::debug!("dropping pending {} request", p.ctx.kind);
            p.handle.abort();
        }
        if self.player.state().is_active() {
            self.player.cancel();
            self.playing = None;
            self.emit_playback();
        }
    }

    fn handle_command(&mut self, cmd: UiCommand, pending: &mut Option<PendingRun>) {
        match cmd {
            UiCommand::Pick(id) => self.pick(&id),
            UiCommand::AddEntity { lat, lon } => match self.workspace.add_entity(lat, lon) {
                Ok((entity, outcome)) => {
                    self.highlights
                        .highlight_entity(&entity.id, render::ColorToken::Custom);
                    render::apply_selection_changes(&mut self.highlights, &outcome.changes);
                    let _ = self.event_tx.send(AppEvent::EntityAdded { entity });
                    self.emit_selection();
                }
                Err(e) => self.error(e.to_string()),
            },
            UiCommand::Run(kind) => self.request_run(kind, pending),
            UiCommand::TogglePause => {
                match self.player.state() {
                    PlaybackState::Running => self.player.pause(),
                    PlaybackState::Paused => self.player.resume(),
                    _ => return,
                }
                self.emit_playback();
            }
            UiCommand::SetInterval(ms) => match self.player.set_interval_ms(ms) {
                Ok(()) => self.emit_playback(),
                Err(e) => self.error(e.to_string()),
            },
            UiCommand::ClearSelection => {
                let changes = self.workspace.clear_selection();
                render::apply_selection_changes(&mut self.highlights, &changes);
                self.emit_selection();
            }
            UiCommand::ClearDataset => {
                self.stop_activity(pending);
                self.dataset_epoch += 1;
                self.workspace.clear();
                self.highlights.reset_all_highlights();
                let _ = self.event_tx.send(AppEvent::DatasetCleared);
                self.emit_selection();
            }
            UiCommand::LoadDataset(source) => self.load(source),
            UiCommand::SaveGraph(name) => self.save_graph(name),
            UiCommand::ListSavedGraphs => self.list_saved_graphs(),
            UiCommand::ConvertRepresentation(format) => self.convert(format),
            UiCommand::Quit => self.stop_activity(pending),
        }
    }

    fn pick(&mut self, id: &str) {
        match self.workspace.pick(id) {
            Ok(outcome) => {
                render::apply_selection_changes(&mut self.highlights, &outcome.changes);
                self.emit_selection();
            }
            Err(e) => self.error(e.to_string()),
        }
    }

    fn load(&mut self, source: DatasetSource) {
        self.dataset_epoch += 1;
        let epoch = self.dataset_epoch;
        let backend = self.backend.clone();
        let job_tx = self.job_tx.clone();
        self.info(InfoEvent::Message(format!("Loading {}…", source.describe())));
        tokio::spawn(async move {
            let result = load_dataset(&backend, &source).await;
            let _ = job_tx.send(JobResult::Dataset {
                epoch,
                source: source.describe(),
                result,
            });
        });
    }

    fn save_graph(&mut self, name: String) {
        let Some(dataset) = self.workspace.dataset().cloned() else {
            self.error(crate::error::ExplorerError::NoDatasetLoaded.to_string());
            return;
        };
        let Some(client) = self.backend.client().cloned() else {
            self.error("saving graphs needs the algorithm service, not a response file");
            return;
        };
        let job_tx = self.job_tx.clone();
        tokio::spawn(async move {
            let result = client.save_graph(&name, &dataset).await;
            let _ = job_tx.send(JobResult::Saved(result));
        });
    }

    fn list_saved_graphs(&mut self) {
        let Some(client) = self.backend.client().cloned() else {
            self.error("saved graphs need the algorithm service, not a response file");
            return;
        };
        let job_tx = self.job_tx.clone();
        tokio::spawn(async move {
            let result = client.list_saved_graphs().await;
            let _ = job_tx.send(JobResult::Listed(result));
        });
    }

    fn convert(&mut self, format: RepresentationFormat) {
        let Some(dataset) = self.workspace.dataset().cloned() else {
            self.error(crate::error::ExplorerError::NoDatasetLoaded.to_string());
            return;
        };
        let Some(client) = self.backend.client().cloned() else {
            self.error("conversion needs the algorithm service, not a response file");
            return;
        };
        self.info(InfoEvent::Message(format!("Converting to {}…", format.label())));
        let job_tx = self.job_tx.clone();
        tokio::spawn(async move {
            let result = client.convert_representation(&dataset, format).await;
            let _ = job_tx.send(JobResult::Converted(result));
        });
    }

    fn on_job(&mut self, job: JobResult, pending: &mut Option<PendingRun>) {
        match job {
            JobResult::Dataset { epoch, .. } if epoch != self.dataset_epoch => {
                log::debug!("dropping stale dataset load (epoch {epoch})");
            }
            JobResult::Dataset {
                source,
                result: Ok(dataset),
                ..
            } => {
                self.stop_activity(pending);
                self.highlights.reset_all_highlights();
                self.workspace.load(dataset.clone());
                let _ = self.event_tx.send(AppEvent::DatasetLoaded {
                    dataset: Box::new(dataset),
                    source,
                });
                self.emit_selection();
                if std::mem::take(&mut self.autorun) {
                    self.autorun_from_args(pending);
                }
            }
            JobResult::Dataset {
                source,
                result: Err(e),
                ..
            } => {
                self.autorun = false;
                self.error(format!("Loading {source} failed: {e:#}"));
            }
            JobResult::Saved(Ok(filename)) => self.info(InfoEvent::GraphSaved { filename }),
            JobResult::Saved(Err(e)) => self.error(format!("Saving graph failed: {e:#}")),
            JobResult::Listed(Ok(graphs)) => {
                let _ = self.event_tx.send(AppEvent::SavedGraphs { graphs });
            }
            JobResult::Listed(Err(e)) => {
                self.error(format!("Listing saved graphs failed: {e:#}"))
            }
            JobResult::Converted(Ok(representation)) => {
                let _ = self.event_tx.send(AppEvent::Converted {
                    representation: Box::new(representation),
                });
            }
            JobResult::Converted(Err(e)) => self.error(format!("Conversion failed: {e:#}")),
        }
    }

    fn autorun_from_args(&mut self, pending: &mut Option<PendingRun>) {
        let args = self.args;
        if let Some(name) = &args.save_as {
            self.save_graph(name.clone());
        }
        for id in [args.start.as_deref(), args.end.as_deref()].into_iter().flatten() {
            self.pick(id);
        }
        if let Some(kind) = self.cfg.algorithm {
            self.request_run(kind, pending);
        }
    }

    fn request_run(&mut self, kind: AlgorithmKind, pending: &mut Option<PendingRun>) {
        let request = match self.workspace.build_request(kind) {
            Ok(r) => r,
            Err(e) => {
                self.error(e.to_string());
                return;
            }
        };
        // A newer request makes any in-flight response stale.
        self.stop_activity(pending);

        self.highlights.reset_all_highlights();
        let sel = self.workspace.selection();
        let mut selection_colors = Vec::new();
        if let Some(s) = sel.start() {
            selection_colors.push((s.to_string(), render::ColorToken::Start));
        }
        if let Some(e) = sel.end() {
            selection_colors.push((e.to_string(), render::ColorToken::End));
        }
        for (id, color) in selection_colors {
            self.highlights.highlight_entity(&id, color);
        }

        let ctx = RunContext {
            run_id: gen_run_id(),
            kind,
            start: request.start_node.clone(),
            end: request.end_node.clone(),
            entity_count: request.graph.entities.len(),
            relation_count: request.graph.relations.len(),
        };
        self.info(InfoEvent::RequestingService { kind });
        let backend = self.backend.clone();
        let handle = tokio::spawn(async move { backend.run_algorithm(request).await });
        *pending = Some(PendingRun {
            ctx,
            started: Instant::now(),
            slow_reported: false,
            handle,
        });
    }

    fn on_run_response(
        &mut self,
        pending: PendingRun,
        join_res: std::result::Result<Result<AlgorithmRun>, JoinError>,
    ) {
        let run = match join_res {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => {
                self.error(format!("{} failed: {e:#}", pending.ctx.kind.label()));
                return;
            }
            Err(e) if e.is_cancelled() => return,
            Err(e) => {
                self.error(format!("Service task failed: {e}"));
                return;
            }
        };

        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let _ = self.event_tx.send(AppEvent::RunStarted {
            kind: run.kind,
            total_steps: run.steps.len(),
        });
        self.playing = Some((ticket, pending.ctx));
        let sink = HighlightSink::new(
            ticket,
            self.highlights.clone(),
            self.event_tx.clone(),
            self.done_tx.clone(),
        );
        let interval_ms = self.player.interval_ms();
        match self.player.start(run, sink, interval_ms) {
            Ok(handle) => {
                tokio::spawn(async move {
                    let id = handle.id();
                    match handle.finished().await {
                        Ok(played) => log::debug!("session {id} delivered {played} step(s)"),
                        Err(e) if e.is_user_facing() => log::warn!("session {id}: {e}"),
                        Err(e) => log::debug!("session {id}: {e}"),
                    }
                });
            }
            Err(e) => {
                self.playing = None;
                self.error(e.to_string());
                return;
            }
        }
        self.emit_playback();
    }

    fn on_playback_finished(&mut self, done: FinishedPlayback) {
        let ctx = match self.playing.take() {
            Some((ticket, ctx)) if ticket == done.ticket => ctx,
            other => {
                log::debug!("ignoring completion of stale playback {}", done.ticket);
                self.playing = other;
                return;
            }
        };
        self.emit_playback();

        let record = post_process::build_record(
            &self.cfg.base_url,
            &ctx,
            self.player.interval_ms(),
            done.summary,
            done.steps,
        );
        let processed = post_process::process_run_completion(self.args, record);
        for msg in processed.export_messages {
            self.info(InfoEvent::Message(msg));
        }
        if let Some(p) = processed.auto_saved_path {
            self.info(InfoEvent::Message(format!("Saved: {}", p.display())));
        }
        let _ = self.event_tx.send(AppEvent::RunCompleted {
            record: Box::new(processed.record),
        });
    }
}

/// Drive the explorer from UI commands and emit events back to presentation layers.
pub(crate) async fn run_controller(
    args: &Cli,
    highlights: SharedHighlights,
    event_tx: UnboundedSender<AppEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let cfg = build_config(args);
    let backend = build_backend(args, &cfg)?;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<FinishedPlayback>();
    let (job_tx, mut job_rx) = mpsc::unbounded_channel::<JobResult>();

    let mut player = StepPlayer::new();
    player.set_interval_ms(cfg.interval_ms)?;

    let initial = DatasetSource::from_args(args);
    let mut explorer = Explorer {
        args,
        autorun: initial.is_some(),
        cfg,
        backend,
        workspace: Workspace::new(),
        player,
        highlights,
        event_tx,
        done_tx,
        job_tx,
        next_ticket: 0,
        dataset_epoch: 0,
        playing: None,
    };
    explorer.emit_playback();
    if let Some(source) = initial {
        explorer.load(source);
    }

    let mut pending: Option<PendingRun> = None;
    let mut watchdog = tokio::time::interval(Duration::from_millis(500));

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(UiCommand::Quit) | None => {
                        explorer.handle_command(UiCommand::Quit, &mut pending);
                        break;
                    }
                    Some(cmd) => explorer.handle_command(cmd, &mut pending),
                }
            }
            // Poll the handle in place; it must survive select rounds lost to other branches.
            maybe_done = async {
                if let Some(p) = pending.as_mut() {
                    return Some((&mut p.handle).await);
                }
                futures::future::pending().await
            } => {
                if let (Some(join_res), Some(p)) = (maybe_done, pending.take()) {
                    explorer.on_run_response(p, join_res);
                }
            }
            Some(done) = done_rx.recv() => explorer.on_playback_finished(done),
            Some(job) = job_rx.recv() => explorer.on_job(job, &mut pending),
            // A slow service gets one status message so the UI does not look frozen.
            _ = watchdog.tick() => {
                if let Some(p) = pending.as_mut() {
                    if !p.slow_reported && p.started.elapsed() >= SLOW_REQUEST {
                        p.slow_reported = true;
                        explorer.info(InfoEvent::Message(format!(
                            "Still waiting for {}…",
                            p.ctx.kind.label()
                        )));
                    }
                }
            }
        }
    }

    Ok(())
}
