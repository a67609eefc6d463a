//! Highlighting collaborator.
//!
//! The core never draws. It calls a [`Highlighter`] with color tokens; the TUI canvas reads
//! the resulting [`HighlightMap`] when it renders.

use crate::model::{AlgorithmOutcome, AppEvent, PlaybackSummary, SelectionSlot, Step};
use crate::player::StepSink;
use crate::selection::SelectionChange;
use crate::error::ExplorerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorToken {
    Default,
    Start,
    End,
    Visited,
    Path,
    Custom,
    Edge,
}

impl ColorToken {
    pub fn hex(self) -> &'static str {
        match self {
            ColorToken::Default => "#06b6d4",
            ColorToken::Start => "#f97316",
            ColorToken::End => "#10b981",
            ColorToken::Visited => "#8b5cf6",
            ColorToken::Path => "#10b981",
            ColorToken::Custom => "#fbbf24",
            ColorToken::Edge => "#4b5563",
        }
    }

    pub fn rgb(self) -> (u8, u8, u8) {
        let hex = self.hex().trim_start_matches('#');
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
        (channel(0), channel(2), channel(4))
    }
}

pub trait Highlighter {
    fn highlight_entity(&mut self, id: &str, color: ColorToken);
    fn highlight_relation(&mut self, a: &str, b: &str, color: ColorToken);
    fn reset_all_highlights(&mut self);
}

/// Current highlight color per entity and per (undirected) relation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HighlightMap {
    entities: HashMap<String, ColorToken>,
    relations: HashMap<(String, String), ColorToken>,
}

fn relation_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

impl HighlightMap {
    pub fn entity_color(&self, id: &str) -> Option<ColorToken> {
        self.entities.get(id).copied()
    }

    pub fn relation_color(&self, a: &str, b: &str) -> Option<ColorToken> {
        self.relations.get(&relation_key(a, b)).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

impl Highlighter for HighlightMap {
    fn highlight_entity(&mut self, id: &str, color: ColorToken) {
        if color == ColorToken::Default {
            self.entities.remove(id);
        } else {
            self.entities.insert(id.to_string(), color);
        }
    }

    fn highlight_relation(&mut self, a: &str, b: &str, color: ColorToken) {
        if color == ColorToken::Edge {
            self.relations.remove(&relation_key(a, b));
        } else {
            self.relations.insert(relation_key(a, b), color);
        }
    }

    fn reset_all_highlights(&mut self) {
        self.entities.clear();
        self.relations.clear();
    }
}

/// A `HighlightMap` shared between the playback task and the renderer.
#[derive(Debug, Clone, Default)]
pub struct SharedHighlights(Arc<Mutex<HighlightMap>>);

impl SharedHighlights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HighlightMap {
        self.with(|m| m.clone())
    }

    fn with<R>(&self, f: impl FnOnce(&mut HighlightMap) -> R) -> R {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard)
    }
}

impl Highlighter for SharedHighlights {
    fn highlight_entity(&mut self, id: &str, color: ColorToken) {
        self.with(|m| m.highlight_entity(id, color));
    }

    fn highlight_relation(&mut self, a: &str, b: &str, color: ColorToken) {
        self.with(|m| m.highlight_relation(a, b, color));
    }

    fn reset_all_highlights(&mut self) {
        self.with(|m| m.reset_all_highlights());
    }
}

/// Translate selection changes into start/end colors.
pub fn apply_selection_changes(highlighter: &mut impl Highlighter, changes: &[SelectionChange]) {
    for change in changes {
        if let Some(prev) = change.previous.as_deref() {
            highlighter.highlight_entity(prev, ColorToken::Default);
        }
        if let Some(new) = change.new.as_deref() {
            let color = match change.slot {
                SelectionSlot::Start => ColorToken::Start,
                SelectionSlot::End => ColorToken::End,
            };
            highlighter.highlight_entity(new, color);
        }
    }
}

/// Paint a path's entities and the relations joining consecutive entities.
pub fn highlight_path(highlighter: &mut impl Highlighter, path: &[String]) {
    for id in path {
        highlighter.highlight_entity(id, ColorToken::Path);
    }
    for pair in path.windows(2) {
        highlighter.highlight_relation(&pair[0], &pair[1], ColorToken::Path);
    }
}

/// Playback result handed back to the controller once a session completes.
#[derive(Debug, Clone)]
pub struct FinishedPlayback {
    pub ticket: u64,
    pub summary: PlaybackSummary,
    pub steps: Vec<Step>,
}

/// The sink used by the application: highlights each step and forwards it as an event.
pub struct HighlightSink<H> {
    ticket: u64,
    highlighter: H,
    event_tx: UnboundedSender<AppEvent>,
    done_tx: UnboundedSender<FinishedPlayback>,
    delivered: Vec<Step>,
}

impl<H: Highlighter> HighlightSink<H> {
    pub fn new(
        ticket: u64,
        highlighter: H,
        event_tx: UnboundedSender<AppEvent>,
        done_tx: UnboundedSender<FinishedPlayback>,
    ) -> Self {
        Self {
            ticket,
            highlighter,
            event_tx,
            done_tx,
            delivered: Vec::new(),
        }
    }
}

impl<H: Highlighter + Send + 'static> StepSink for HighlightSink<H> {
    fn on_step(&mut self, step: &Step) {
        if let Some(id) = step.entity.as_deref() {
            self.highlighter.highlight_entity(id, ColorToken::Visited);
        }
        if let Some(rel) = &step.relation {
            self.highlighter
                .highlight_relation(&rel.source, &rel.target, ColorToken::Visited);
        }
        self.delivered.push(step.clone());
        let _ = self.event_tx.send(AppEvent::Step { step: step.clone() });
    }

    fn on_malformed_step(&mut self, error: &ExplorerError) {
        log::warn!("run {}: {error}", self.ticket);
        if let ExplorerError::MalformedStep { position, reason } = error {
            let _ = self.event_tx.send(AppEvent::MalformedStep {
                position: *position,
                reason: reason.clone(),
            });
        }
    }

    fn on_complete(&mut self, summary: PlaybackSummary) {
        if let AlgorithmOutcome::ShortestPath { path, .. } = &summary.outcome {
            highlight_path(&mut self.highlighter, path);
        }
        let _ = self.done_tx.send(FinishedPlayback {
            ticket: self.ticket,
            summary,
            steps: std::mem::take(&mut self.delivered),
        });
    }
}
