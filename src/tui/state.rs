use crate::model::{
    AlgorithmKind, AppEvent, Dataset, InfoEvent, PlaybackState, RunRecord, SavedGraph,
};
use crate::render::SharedHighlights;

/// Step lines kept in the log pane.
const STEP_LOG_CAP: usize = 500;

/// Free-text prompt shown in the status bar.
#[derive(Debug, Clone, PartialEq)]
pub enum Prompt {
    SaveGraphName(String),
}

pub struct UiState {
    pub tab: usize,
    pub info: String,
    pub info_is_error: bool,
    pub prompt: Option<Prompt>,

    pub dataset: Option<Dataset>,
    pub dataset_source: String,
    pub highlights: SharedHighlights,
    /// Index into `dataset.entities` of the entity under the list cursor.
    pub cursor: usize,
    pub start: Option<String>,
    pub end: Option<String>,

    pub playback: PlaybackState,
    pub interval_ms: u64,
    pub running_kind: Option<AlgorithmKind>,
    pub total_steps: usize,
    pub current_step: usize,
    pub step_log: Vec<String>,
    pub malformed_steps: usize,

    pub last_record: Option<RunRecord>,
    pub history: Vec<RunRecord>,
    pub history_selected: usize,
    pub saved_graphs: Vec<SavedGraph>,
    pub saved_selected: usize,
    pub auto_save: bool,
    pub last_exported_path: Option<String>,
}

impl Default for UiState {
    fn default() -> Self {
        Self {
            tab: 0,
            info: String::new(),
            info_is_error: false,
            prompt: None,
            dataset: None,
            dataset_source: String::new(),
            highlights: SharedHighlights::new(),
            cursor: 0,
            start: None,
            end: None,
            playback: PlaybackState::Idle,
            interval_ms: 500,
            running_kind: None,
            total_steps: 0,
            current_step: 0,
            step_log: Vec::new(),
            malformed_steps: 0,
            last_record: None,
            history: Vec::new(),
            history_selected: 0,
            saved_graphs: Vec::new(),
            saved_selected: 0,
            auto_save: true,
            last_exported_path: None,
        }
    }
}

impl UiState {
    pub fn entity_count(&self) -> usize {
        self.dataset.as_ref().map_or(0, |d| d.entities.len())
    }

    /// Id of the entity under the list cursor.
    pub fn cursor_entity(&self) -> Option<&str> {
        self.dataset
            .as_ref()
            .and_then(|d| d.entities.get(self.cursor))
            .map(|e| e.id.as_str())
    }

    pub fn move_cursor(&mut self, delta: isize) {
        let n = self.entity_count();
        if n == 0 {
            self.cursor = 0;
            return;
        }
        let next = self.cursor as isize + delta;
        self.cursor = next.clamp(0, n as isize - 1) as usize;
    }

    fn set_info(&mut self, info: &InfoEvent) {
        self.info = info.to_message();
        self.info_is_error = info.is_error();
    }

    fn push_step_line(&mut self, line: String) {
        if self.step_log.len() >= STEP_LOG_CAP {
            self.step_log.remove(0);
        }
        self.step_log.push(line);
    }

    /// Fold a controller event into UI state.
    pub fn apply_event(&mut self, ev: AppEvent) {
        match ev {
            AppEvent::DatasetLoaded { dataset, source } => {
                self.info = format!(
                    "Loaded {source}: {} entities, {} relations",
                    dataset.entities.len(),
                    dataset.relations.len()
                );
                self.info_is_error = false;
                self.dataset = Some(*dataset);
                self.dataset_source = source;
                self.cursor = 0;
                self.step_log.clear();
                self.running_kind = None;
            }
            AppEvent::DatasetCleared => {
                self.dataset = None;
                self.dataset_source.clear();
                self.cursor = 0;
                self.step_log.clear();
                self.info = "Map cleared".into();
                self.info_is_error = false;
            }
            AppEvent::EntityAdded { entity } => {
                self.info = format!(
                    "Added {} at {:.6}, {:.6}",
                    entity.label.as_deref().unwrap_or(&entity.id),
                    entity.lat,
                    entity.lon
                );
                self.info_is_error = false;
                let dataset = self.dataset.get_or_insert_with(Dataset::empty);
                dataset.entities.push(entity);
                self.cursor = dataset.entities.len() - 1;
            }
            AppEvent::SelectionChanged { start, end } => {
                self.start = start;
                self.end = end;
            }
            AppEvent::RunStarted { kind, total_steps } => {
                self.running_kind = Some(kind);
                self.total_steps = total_steps;
                self.current_step = 0;
                self.malformed_steps = 0;
                self.step_log.clear();
                self.info = format!("{}: {total_steps} step(s)", kind.label());
                self.info_is_error = false;
            }
            AppEvent::Step { step } => {
                self.current_step = step.index;
                self.push_step_line(format!("Step {}: {}", step.index, step.description));
            }
            AppEvent::MalformedStep { position, reason } => {
                self.current_step = position;
                self.malformed_steps += 1;
                self.push_step_line(format!("Step {position} skipped: {reason}"));
            }
            AppEvent::Playback { state, interval_ms } => {
                self.playback = state;
                self.interval_ms = interval_ms;
            }
            AppEvent::RunCompleted { record } => {
                let summary = crate::text_summary::build_text_summary(&record);
                self.push_step_line(String::new());
                for line in summary.lines {
                    self.push_step_line(line);
                }
                self.info = format!("{} complete", record.algorithm.label());
                self.info_is_error = false;
                self.history.insert(0, (*record).clone());
                self.last_record = Some(*record);
            }
            AppEvent::SavedGraphs { graphs } => {
                self.info = format!("{} saved graph(s)", graphs.len());
                self.info_is_error = false;
                self.saved_graphs = graphs;
                self.saved_selected = 0;
            }
            AppEvent::Converted { representation } => {
                self.info = format!("Converted to {}", representation.format().label());
                self.info_is_error = false;
                self.step_log.clear();
                for line in crate::text_summary::build_representation_lines(&representation) {
                    self.push_step_line(line);
                }
            }
            AppEvent::Info(info) => self.set_info(&info),
        }
    }
}
