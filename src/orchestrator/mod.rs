//! Application-level orchestration utilities.
//!
//! This module owns the explorer lifecycle (dataset loads, selection, algorithm requests,
//! playback) and post-run processing such as auto-save and exports.
//! UI/CLI layers call into this module to keep responsibilities separated.

mod controller;
mod post_process;

pub(crate) use controller::{load_dataset, run_controller, DatasetSource, UiCommand};
pub(crate) use post_process::{build_record, RunContext};
