//! Start/end entity selection.
//!
//! Turns raw pick events into start/end assignment with toggle and reset semantics. The
//! controller only mutates its own slots and reports what changed; translating changes
//! into highlight colors is left to the caller.

use crate::error::ExplorerError;
use crate::model::{Dataset, SelectionSlot};

/// What a pick did to the selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickSignal {
    StartCleared,
    EndCleared,
    StartAssigned,
    EndAssigned,
    /// Both slots were occupied: selection restarted with the picked entity as start.
    Reset,
}

/// A single slot transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionChange {
    pub slot: SelectionSlot,
    pub new: Option<String>,
    pub previous: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickOutcome {
    pub signal: PickSignal,
    pub changes: Vec<SelectionChange>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionController {
    start: Option<String>,
    end: Option<String>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) -> Option<&str> {
        self.start.as_deref()
    }

    pub fn end(&self) -> Option<&str> {
        self.end.as_deref()
    }

    /// Apply a pick of `entity_id` against the currently loaded dataset.
    pub fn pick(
        &mut self,
        dataset: Option<&Dataset>,
        entity_id: &str,
    ) -> Result<PickOutcome, ExplorerError> {
        let dataset = dataset.ok_or(ExplorerError::NoDatasetLoaded)?;
        if !dataset.contains(entity_id) {
            log::warn!("pick ignored, entity {entity_id} is not in the dataset");
            return Err(ExplorerError::UnknownEntity(entity_id.to_string()));
        }

        let outcome = if self.start.as_deref() == Some(entity_id) {
            PickOutcome {
                signal: PickSignal::StartCleared,
                changes: vec![self.set(SelectionSlot::Start, None)],
            }
        } else if self.end.as_deref() == Some(entity_id) {
            PickOutcome {
                signal: PickSignal::EndCleared,
                changes: vec![self.set(SelectionSlot::End, None)],
            }
        } else if self.start.is_none() {
            PickOutcome {
                signal: PickSignal::StartAssigned,
                changes: vec![self.set(SelectionSlot::Start, Some(entity_id))],
            }
        } else if self.end.is_none() {
            // start is set and differs from entity_id, otherwise the first branch matched.
            PickOutcome {
                signal: PickSignal::EndAssigned,
                changes: vec![self.set(SelectionSlot::End, Some(entity_id))],
            }
        } else {
            let mut changes = self.clear();
            changes.push(self.set(SelectionSlot::Start, Some(entity_id)));
            PickOutcome {
                signal: PickSignal::Reset,
                changes,
            }
        };

        log::debug!(
            "pick {entity_id}: {:?} (start={:?}, end={:?})",
            outcome.signal,
            self.start,
            self.end
        );
        Ok(outcome)
    }

    /// Empty both slots. Returns a change for every slot that was occupied.
    pub fn clear(&mut self) -> Vec<SelectionChange> {
        let mut changes = Vec::with_capacity(2);
        if self.start.is_some() {
            changes.push(self.set(SelectionSlot::Start, None));
        }
        if self.end.is_some() {
            changes.push(self.set(SelectionSlot::End, None));
        }
        changes
    }

    /// True iff `start` is set, and `end` too when `require_end`.
    pub fn is_runnable(&self, require_end: bool) -> bool {
        self.start.is_some() && (!require_end || self.end.is_some())
    }

    fn set(&mut self, slot: SelectionSlot, value: Option<&str>) -> SelectionChange {
        let target = match slot {
            SelectionSlot::Start => &mut self.start,
            SelectionSlot::End => &mut self.end,
        };
        let previous = std::mem::replace(target, value.map(str::to_string));
        SelectionChange {
            slot,
            new: value.map(str::to_string),
            previous,
        }
    }
}
