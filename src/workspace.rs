//! The working dataset together with the current start/end selection.

use crate::error::ExplorerError;
use crate::model::{AlgorithmKind, AlgorithmRequest, Dataset, Entity};
use crate::selection::{PickOutcome, SelectionChange, SelectionController};

#[derive(Debug, Default)]
pub struct Workspace {
    dataset: Option<Dataset>,
    selection: SelectionController,
}

impl Workspace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    pub fn selection(&self) -> &SelectionController {
        &self.selection
    }

    /// Replace the working dataset. Any previous selection is dropped.
    pub fn load(&mut self, dataset: Dataset) -> Vec<SelectionChange> {
        let changes = self.selection.clear();
        log::info!(
            "dataset loaded: {} entities, {} relations",
            dataset.entities.len(),
            dataset.relations.len()
        );
        self.dataset = Some(dataset);
        changes
    }

    /// Drop the dataset and the selection.
    pub fn clear(&mut self) -> Vec<SelectionChange> {
        self.dataset = None;
        self.selection.clear()
    }

    pub fn pick(&mut self, entity_id: &str) -> Result<PickOutcome, ExplorerError> {
        self.selection.pick(self.dataset.as_ref(), entity_id)
    }

    pub fn clear_selection(&mut self) -> Vec<SelectionChange> {
        self.selection.clear()
    }

    /// Create an entity at `lat`/`lon` and pick it, like clicking an empty map spot.
    pub fn add_entity(&mut self, lat: f64, lon: f64) -> Result<(Entity, PickOutcome), ExplorerError> {
        let dataset = self.dataset.as_mut().ok_or(ExplorerError::NoDatasetLoaded)?;
        let entity = dataset.add_custom_entity(lat, lon).clone();
        let outcome = self.selection.pick(self.dataset.as_ref(), &entity.id)?;
        Ok((entity, outcome))
    }

    /// Build the service request for `kind` from the current dataset and selection.
    pub fn build_request(&self, kind: AlgorithmKind) -> Result<AlgorithmRequest, ExplorerError> {
        let dataset = self.dataset.as_ref().ok_or(ExplorerError::NoDatasetLoaded)?;
        if kind.requires_start() && self.selection.start().is_none() {
            return Err(ExplorerError::InvalidSelection(format!(
                "{} needs a start entity",
                kind.label()
            )));
        }
        if kind.requires_end() && self.selection.end().is_none() {
            return Err(ExplorerError::InvalidSelection(format!(
                "{} needs both a start and an end entity",
                kind.label()
            )));
        }

        Ok(AlgorithmRequest {
            graph: dataset.clone(),
            algorithm: kind,
            start_node: kind
                .requires_start()
                .then(|| self.selection.start().map(str::to_string))
                .flatten(),
            end_node: kind
                .requires_end()
                .then(|| self.selection.end().map(str::to_string))
                .flatten(),
        })
    }
}
