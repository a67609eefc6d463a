use super::{Control, SessionStatus, Shared, StepSink};
use crate::model::{AlgorithmRun, PlaybackSummary};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Drive one session to completion or cancellation.
///
/// Suspends only before a step (while paused) and between steps (the interval). Every
/// sink callback runs under the session gate after re-checking cancellation.
pub(super) async fn play<S: StepSink>(id: u64, shared: Arc<Shared>, run: AlgorithmRun, mut sink: S) {
    let mut control = shared.control.subscribe();
    let total_steps = run.steps.len();
    let mut steps_played = 0usize;
    let mut malformed_steps = 0usize;
    let mut step_gaps_ms = Vec::with_capacity(total_steps.saturating_sub(1));
    let mut last_delivery: Option<Instant> = None;

    for (i, raw) in run.steps.iter().enumerate() {
        let position = i + 1;

        let resumed = control
            .wait_for(|c| !c.paused || c.cancelled.is_some())
            .await
            .map(|c| c.cancelled.is_none());
        if !matches!(resumed, Ok(true)) {
            return;
        }

        let step = raw.validate(position);
        {
            let _gate = shared.lock_gate();
            if shared.is_cancelled() {
                return;
            }
            shared.position.store(position, Ordering::Release);
            match &step {
                Ok(step) => sink.on_step(step),
                Err(e) => sink.on_malformed_step(e),
            }
        }

        if step.is_err() {
            malformed_steps += 1;
            continue;
        }
        steps_played += 1;
        let now = Instant::now();
        if let Some(prev) = last_delivery.replace(now) {
            step_gaps_ms.push(now.duration_since(prev).as_secs_f64() * 1_000.0);
        }

        let interval = shared.control.borrow().interval;
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancellation(&mut control) => return,
        }
    }

    let _gate = shared.lock_gate();
    if shared.is_cancelled() {
        return;
    }
    log::info!(
        "session {id}: finished, {steps_played}/{total_steps} step(s) played, {malformed_steps} malformed"
    );
    sink.on_complete(PlaybackSummary {
        kind: run.kind,
        total_steps,
        steps_played,
        malformed_steps,
        outcome: run.outcome,
        step_gaps_ms,
    });
    // Only after the sink has seen the summary may handles observe `Finished`.
    shared
        .status
        .send_replace(SessionStatus::Finished { steps_played });
}

async fn cancellation(control: &mut watch::Receiver<Control>) {
    let _ = control.wait_for(|c| c.cancelled.is_some()).await;
}
