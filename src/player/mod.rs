//! Step playback.
//!
//! `StepPlayer` owns the single "current session" slot. A session walks a finite step
//! sequence on its own task, handing each step to a [`StepSink`] and sleeping the configured
//! interval in between. Pause, resume, interval changes, and cancellation travel over a
//! `watch` channel, so a paused session is parked on a change notification instead of a
//! timer.

mod session;

use crate::error::ExplorerError;
use crate::model::{AlgorithmRun, PlaybackState, PlaybackSummary, Step};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Receives the steps of a playback session, in order, one at a time.
///
/// Callbacks run synchronously on the session task; playback does not advance until they
/// return.
pub trait StepSink: Send + 'static {
    fn on_step(&mut self, step: &Step);

    /// A step that failed validation. Playback continues with the next step.
    fn on_malformed_step(&mut self, error: &ExplorerError) {
        log::warn!("skipping step: {error}");
    }

    /// Called exactly once, after the last step, unless the session was cancelled.
    fn on_complete(&mut self, summary: PlaybackSummary);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelReason {
    Requested,
    Superseded,
}

#[derive(Debug, Clone, Copy)]
struct Control {
    paused: bool,
    interval: Duration,
    cancelled: Option<CancelReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionStatus {
    Running,
    Finished { steps_played: usize },
    Cancelled(CancelReason),
}

/// State shared between the player and one session task.
struct Shared {
    control: watch::Sender<Control>,
    status: watch::Sender<SessionStatus>,
    /// Held while a sink callback runs. `cancel` takes it too, so no callback can start
    /// after cancellation has been recorded.
    gate: Mutex<()>,
    /// 1-based index of the last step handed to the sink; 0 before the first.
    position: AtomicUsize,
}

impl Shared {
    fn new(interval: Duration, status: SessionStatus) -> Self {
        let (control, _) = watch::channel(Control {
            paused: false,
            interval,
            cancelled: None,
        });
        let (status, _) = watch::channel(status);
        Self {
            control,
            status,
            gate: Mutex::new(()),
            position: AtomicUsize::new(0),
        }
    }

    fn lock_gate(&self) -> MutexGuard<'_, ()> {
        // A panicking sink poisons the gate; the guarded data is `()`, so recover.
        self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_cancelled(&self) -> bool {
        self.control.borrow().cancelled.is_some()
    }
}

struct ActiveSession {
    id: u64,
    shared: Arc<Shared>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Handle to one playback session, returned by [`StepPlayer::start`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait until the session ends. Resolves to the number of steps delivered to the sink, or
    /// to `SessionSuperseded` / `SessionCancelled` when it was stopped early.
    pub async fn finished(mut self) -> Result<usize, ExplorerError> {
        let status = self
            .status
            .wait_for(|s| *s != SessionStatus::Running)
            .await
            .map(|s| *s);
        match status {
            Ok(SessionStatus::Finished { steps_played }) => Ok(steps_played),
            Ok(SessionStatus::Cancelled(CancelReason::Superseded)) => {
                Err(ExplorerError::SessionSuperseded)
            }
            Ok(SessionStatus::Cancelled(CancelReason::Requested))
            | Ok(SessionStatus::Running)
            | Err(_) => Err(ExplorerError::SessionCancelled),
        }
    }
}

/// Plays step sequences back one session at a time.
pub struct StepPlayer {
    active: Option<ActiveSession>,
    next_id: u64,
    interval: Duration,
}

impl Default for StepPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl StepPlayer {
    pub fn new() -> Self {
        Self {
            active: None,
            next_id: 1,
            interval: Duration::from_millis(500),
        }
    }

    /// Start playing `run` into `sink`, one step every `interval_ms`.
    ///
    /// Any active session is cancelled first and its handle resolves as superseded. An empty
    /// run completes immediately. Must be called from within a Tokio runtime.
    pub fn start<S: StepSink>(
        &mut self,
        run: AlgorithmRun,
        mut sink: S,
        interval_ms: u64,
    ) -> Result<SessionHandle, ExplorerError> {
        let interval = interval_from_ms(interval_ms)?;

        if self.state().is_active() {
            log::debug!("superseding active playback session");
        }
        self.stop(CancelReason::Superseded);

        let id = self.next_id;
        self.next_id += 1;
        self.interval = interval;

        if run.steps.is_empty() {
            log::info!("session {id}: {} produced no steps", run.kind);
            let shared = Arc::new(Shared::new(interval, SessionStatus::Running));
            let handle = SessionHandle {
                id,
                status: shared.status.subscribe(),
            };
            sink.on_complete(PlaybackSummary {
                kind: run.kind,
                total_steps: 0,
                steps_played: 0,
                malformed_steps: 0,
                outcome: run.outcome,
                step_gaps_ms: Vec::new(),
            });
            shared
                .status
                .send_replace(SessionStatus::Finished { steps_played: 0 });
            self.active = Some(ActiveSession {
                id,
                shared,
                task: None,
            });
            return Ok(handle);
        }

        log::info!(
            "session {id}: playing {} step(s) of {} every {interval_ms} ms",
            run.steps.len(),
            run.kind
        );
        let shared = Arc::new(Shared::new(interval, SessionStatus::Running));
        let handle = SessionHandle {
            id,
            status: shared.status.subscribe(),
        };
        let task = tokio::spawn(session::play(id, shared.clone(), run, sink));
        self.active = Some(ActiveSession {
            id,
            shared,
            task: Some(task),
        });
        Ok(handle)
    }

    /// Pause a running session. No-op in any other state.
    pub fn pause(&mut self) {
        if self.state() != PlaybackState::Running {
            return;
        }
        if let Some(active) = &self.active {
            log::debug!("session {}: pause", active.id);
            active.shared.control.send_modify(|c| c.paused = true);
        }
    }

    /// Resume a paused session from its next unplayed step. No-op unless paused.
    pub fn resume(&mut self) {
        if self.state() != PlaybackState::Paused {
            return;
        }
        if let Some(active) = &self.active {
            log::debug!("session {}: resume", active.id);
            active.shared.control.send_modify(|c| c.paused = false);
        }
    }

    /// Change the delay between steps. Applies from the next wait of the current session on,
    /// and to sessions started later.
    pub fn set_interval_ms(&mut self, ms: u64) -> Result<(), ExplorerError> {
        let interval = interval_from_ms(ms)?;
        self.interval = interval;
        if let Some(active) = &self.active {
            active.shared.control.send_modify(|c| c.interval = interval);
        }
        Ok(())
    }

    /// Stop the active session and return to `Idle`. Safe in any state.
    pub fn cancel(&mut self) {
        self.stop(CancelReason::Requested);
    }

    pub fn state(&self) -> PlaybackState {
        let Some(active) = &self.active else {
            return PlaybackState::Idle;
        };
        let status = *active.shared.status.borrow();
        match status {
            SessionStatus::Finished { .. } => PlaybackState::Finished,
            SessionStatus::Cancelled(_) => PlaybackState::Idle,
            SessionStatus::Running if active.shared.control.borrow().paused => {
                PlaybackState::Paused
            }
            SessionStatus::Running => PlaybackState::Running,
        }
    }

    /// 1-based index of the last step handed to the sink in the current session, 0 if none.
    pub fn current_index(&self) -> usize {
        self.active
            .as_ref()
            .map(|a| a.shared.position.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval.as_millis() as u64
    }

    fn stop(&mut self, reason: CancelReason) {
        let Some(active) = self.active.take() else {
            return;
        };
        {
            // Waits for an in-flight callback to return; none may start afterwards.
            let _gate = active.shared.lock_gate();
            active.shared.control.send_modify(|c| {
                c.cancelled.get_or_insert(reason);
            });
            active.shared.status.send_if_modified(|s| {
                if *s == SessionStatus::Running {
                    *s = SessionStatus::Cancelled(reason);
                    true
                } else {
                    false
                }
            });
        }
        if let Some(task) = active.task {
            if !task.is_finished() {
                log::debug!("session {}: cancelled ({reason:?})", active.id);
            }
            task.abort();
        }
    }
}

impl Drop for StepPlayer {
    fn drop(&mut self) {
        self.stop(CancelReason::Requested);
    }
}

fn interval_from_ms(ms: u64) -> Result<Duration, ExplorerError> {
    if ms == 0 {
        return Err(ExplorerError::InvalidInterval);
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlgorithmKind, AlgorithmOutcome, RawStep};
    use tokio::time::Instant;

    #[derive(Debug, Clone, PartialEq)]
    enum Seen {
        Step(usize),
        Malformed(usize),
        Complete { played: usize, malformed: usize },
    }

    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Vec<Seen>>>,
    }

    impl Recorder {
        fn snapshot(&self) -> Vec<Seen> {
            self.seen.lock().expect("recorder lock").clone()
        }

        fn steps(&self) -> Vec<usize> {
            self.snapshot()
                .into_iter()
                .filter_map(|s| match s {
                    Seen::Step(i) => Some(i),
                    _ => None,
                })
                .collect()
        }

        fn completions(&self) -> usize {
            self.snapshot()
                .iter()
                .filter(|s| matches!(s, Seen::Complete { .. }))
                .count()
        }
    }

    impl StepSink for Recorder {
        fn on_step(&mut self, step: &Step) {
            self.seen.lock().expect("recorder lock").push(Seen::Step(step.index));
        }

        fn on_malformed_step(&mut self, error: &ExplorerError) {
            if let ExplorerError::MalformedStep { position, .. } = error {
                self.seen
                    .lock()
                    .expect("recorder lock")
                    .push(Seen::Malformed(*position));
            }
        }

        fn on_complete(&mut self, summary: PlaybackSummary) {
            self.seen.lock().expect("recorder lock").push(Seen::Complete {
                played: summary.steps_played,
                malformed: summary.malformed_steps,
            });
        }
    }

    fn run_of(n: usize) -> AlgorithmRun {
        AlgorithmRun {
            kind: AlgorithmKind::Bfs,
            steps: (1..=n)
                .map(|i| RawStep {
                    step: Some(i),
                    description: Some(format!("step {i}")),
                    node: Some(format!("n{i}")),
                    ..Default::default()
                })
                .collect(),
            outcome: AlgorithmOutcome::Traversal {
                order: (1..=n).map(|i| format!("n{i}")).collect(),
                visited_count: n,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_all_steps_in_order_then_completes() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let began = Instant::now();

        let handle = player.start(run_of(4), rec.clone(), 100).expect("start");
        assert_eq!(player.state(), PlaybackState::Running);
        assert_eq!(handle.finished().await, Ok(4));

        assert!(began.elapsed() >= Duration::from_millis(400));
        assert_eq!(
            rec.snapshot(),
            vec![
                Seen::Step(1),
                Seen::Step(2),
                Seen::Step(3),
                Seen::Step(4),
                Seen::Complete {
                    played: 4,
                    malformed: 0
                },
            ]
        );
        assert_eq!(player.state(), PlaybackState::Finished);
        assert_eq!(player.current_index(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_playback_until_resume() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let handle = player.start(run_of(5), rec.clone(), 100).expect("start");

        // Step 1 at t=0, step 2 at t=100.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rec.steps(), vec![1, 2]);
        player.pause();
        assert_eq!(player.state(), PlaybackState::Paused);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.steps(), vec![1, 2]);

        player.resume();
        assert_eq!(player.state(), PlaybackState::Running);
        assert_eq!(handle.finished().await, Ok(5));
        assert_eq!(rec.steps(), vec![1, 2, 3, 4, 5]);
        assert_eq!(rec.completions(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_are_noops_outside_their_states() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        player.pause();
        player.resume();
        assert_eq!(player.state(), PlaybackState::Idle);

        let handle = player.start(run_of(2), rec.clone(), 10).expect("start");
        player.resume();
        assert_eq!(player.state(), PlaybackState::Running);
        player.pause();
        player.pause();
        assert_eq!(player.state(), PlaybackState::Paused);
        player.resume();
        handle.finished().await.expect("finish");

        player.pause();
        assert_eq!(player.state(), PlaybackState::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_freezes_callbacks() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let handle = player.start(run_of(10), rec.clone(), 100).expect("start");

        tokio::time::sleep(Duration::from_millis(250)).await;
        player.cancel();
        let at_cancel = rec.snapshot();
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(handle.finished().await, Err(ExplorerError::SessionCancelled));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rec.snapshot(), at_cancel);
        assert_eq!(rec.completions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_paused_is_terminal() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let handle = player.start(run_of(3), rec.clone(), 100).expect("start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        player.pause();
        player.cancel();
        player.resume();

        assert_eq!(handle.finished().await, Err(ExplorerError::SessionCancelled));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(rec.steps(), vec![1]);
        assert_eq!(rec.completions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_supersedes_active_one() {
        let x = Recorder::default();
        let y = Recorder::default();
        let mut player = StepPlayer::new();

        let hx = player.start(run_of(5), x.clone(), 100).expect("start x");
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(x.steps(), vec![1, 2]);

        let hy = player.start(run_of(3), y.clone(), 100).expect("start y");
        assert_eq!(hx.finished().await, Err(ExplorerError::SessionSuperseded));
        assert_eq!(hy.finished().await, Ok(3));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(x.steps().iter().all(|&i| i < 3));
        assert_eq!(x.completions(), 0);
        assert_eq!(y.steps(), vec![1, 2, 3]);
        assert_eq!(y.completions(), 1);
    }

    #[tokio::test]
    async fn test_empty_run_completes_immediately() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let handle = player.start(run_of(0), rec.clone(), 100).expect("start");

        assert_eq!(
            rec.snapshot(),
            vec![Seen::Complete {
                played: 0,
                malformed: 0
            }]
        );
        assert_eq!(player.state(), PlaybackState::Finished);
        assert_eq!(handle.finished().await, Ok(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_steps_are_reported_and_skipped() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let mut run = run_of(4);
        run.steps[1].description = None;
        run.steps[2].step = Some(9);

        let handle = player.start(run, rec.clone(), 50).expect("start");
        assert_eq!(handle.finished().await, Ok(2));
        assert_eq!(
            rec.snapshot(),
            vec![
                Seen::Step(1),
                Seen::Malformed(2),
                Seen::Malformed(3),
                Seen::Step(4),
                Seen::Complete {
                    played: 2,
                    malformed: 2
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_change_applies_to_next_wait() {
        let rec = Recorder::default();
        let mut player = StepPlayer::new();
        let began = Instant::now();
        let handle = player.start(run_of(3), rec.clone(), 1_000).expect("start");

        // Step 1 was delivered at t=0 and its 1s wait is already pending.
        tokio::time::sleep(Duration::from_millis(10)).await;
        player.set_interval_ms(100).expect("set interval");
        assert_eq!(handle.finished().await, Ok(3));

        // 1000 (pending wait) + 100 + 100
        let elapsed = began.elapsed();
        assert!(elapsed >= Duration::from_millis(1_200));
        assert!(elapsed < Duration::from_millis(2_000));
        assert_eq!(player.interval_ms(), 100);
    }

    /// Sink whose callbacks block the session thread for `delay`.
    #[derive(Clone)]
    struct SlowSink {
        delay: std::time::Duration,
        block_steps: bool,
        inner: Recorder,
        entered: Arc<std::sync::atomic::AtomicBool>,
    }

    impl SlowSink {
        fn new(delay_ms: u64, block_steps: bool) -> Self {
            Self {
                delay: std::time::Duration::from_millis(delay_ms),
                block_steps,
                inner: Recorder::default(),
                entered: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            }
        }
    }

    impl StepSink for SlowSink {
        fn on_step(&mut self, step: &Step) {
            self.entered.store(true, Ordering::SeqCst);
            if self.block_steps {
                std::thread::sleep(self.delay);
            }
            self.inner.on_step(step);
        }

        fn on_complete(&mut self, summary: PlaybackSummary) {
            if !self.block_steps {
                std::thread::sleep(self.delay);
            }
            self.inner.on_complete(summary);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_finished_is_observed_only_after_on_complete() {
        let sink = SlowSink::new(300, false);
        let rec = sink.inner.clone();
        let mut player = StepPlayer::new();

        let handle = player.start(run_of(1), sink, 10).expect("start");
        assert_eq!(handle.finished().await, Ok(1));
        assert_eq!(rec.completions(), 1);
        assert_eq!(player.state(), PlaybackState::Finished);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_waits_for_in_flight_step_callback() {
        let sink = SlowSink::new(200, true);
        let rec = sink.inner.clone();
        let entered = sink.entered.clone();
        let mut player = StepPlayer::new();

        let handle = player.start(run_of(5), sink, 10).expect("start");
        while !entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        // Step 1 is still inside on_step; cancel blocks until it returns.
        player.cancel();
        let at_cancel = rec.steps();
        assert_eq!(at_cancel, vec![1]);
        assert_eq!(handle.finished().await, Err(ExplorerError::SessionCancelled));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(rec.steps(), at_cancel);
        assert_eq!(rec.completions(), 0);
        assert_eq!(player.state(), PlaybackState::Idle);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let mut player = StepPlayer::new();
        assert_eq!(
            player
                .start(run_of(2), Recorder::default(), 0)
                .map(|h| h.id()),
            Err(ExplorerError::InvalidInterval)
        );
        assert_eq!(player.state(), PlaybackState::Idle);
        assert_eq!(
            player.set_interval_ms(0),
            Err(ExplorerError::InvalidInterval)
        );
    }
}
