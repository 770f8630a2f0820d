//! Engine runtime: drives the cycle state machine from a 1-second ticker.
//!
//! Each mutation runs in the same order: transition the machine, queue the
//! snapshot write, broadcast a notice. Snapshot writes run on blocking
//! threads and land in the order they were queued. Sink submissions are
//! spawned only after the closing transition has been committed and queued
//! for persistence, so a slow or failing network call never holds up the
//! countdown.

use crate::{
    CycleConfig, CycleEvent, CycleMachine, EngineState, PhaseKind, Result, SessionCoordinator,
    SessionSummary, SetTotals, SubmissionOutcome,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time;

const NOTICE_CAPACITY: usize = 1024;

/// Default wall-clock length of one tick
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Observable engine activity, for the user-facing surface
#[derive(Clone, Debug)]
pub enum EngineNotice {
    /// One elapsed second was applied; `tick` counts ticks since boot
    Ticked { tick: u64, state: EngineState },
    /// A control action changed the state
    StateChanged(EngineState),
    PhaseChanged { from: PhaseKind, to: PhaseKind },
    SetComplete(SetTotals),
    SessionRecorded(SessionSummary),
    SessionSkipped,
    /// Transient, dismissible failure notice; the summary is gone
    SubmissionFailed(String),
}

#[derive(Clone)]
pub struct FocusEngine {
    machine: Arc<Mutex<CycleMachine>>,
    coordinator: SessionCoordinator,
    ticker: Arc<std::sync::Mutex<Option<JoinHandle<()>>>>,
    submissions: Arc<std::sync::Mutex<JoinSet<()>>>,
    slot: Arc<SlotWriter>,
    slot_writes: Arc<std::sync::Mutex<JoinSet<()>>>,
    notices: broadcast::Sender<EngineNotice>,
    ticks: Arc<AtomicU64>,
    tick_interval: Duration,
}

enum SlotOp {
    Save(EngineState),
    Clear,
}

/// Applies snapshot writes in issue order.
///
/// Ops are numbered under the machine lock. One that reaches the store
/// after a newer op has already landed is dropped.
struct SlotWriter {
    coordinator: SessionCoordinator,
    issued: AtomicU64,
    applied: std::sync::Mutex<u64>,
}

impl SlotWriter {
    fn apply(&self, seq: u64, op: SlotOp) {
        let mut applied = lock_std(&self.applied);
        if seq <= *applied {
            tracing::trace!("Dropping stale snapshot op {}", seq);
            return;
        }

        let result = match op {
            SlotOp::Save(state) => self.coordinator.persist(&state),
            SlotOp::Clear => self.coordinator.discard(),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to update snapshot: {}", e);
        }
        *applied = seq;
    }
}

fn lock_std<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl FocusEngine {
    /// Rehydrate from the coordinator's slot and resume ticking if the
    /// snapshot was running.
    pub async fn boot(
        coordinator: SessionCoordinator,
        defaults: CycleConfig,
        tick_interval: Duration,
    ) -> Self {
        let machine = coordinator.restore(defaults);
        let running = machine.state().running;
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let slot = Arc::new(SlotWriter {
            coordinator: coordinator.clone(),
            issued: AtomicU64::new(0),
            applied: std::sync::Mutex::new(0),
        });

        let engine = Self {
            machine: Arc::new(Mutex::new(machine)),
            coordinator,
            ticker: Arc::new(std::sync::Mutex::new(None)),
            submissions: Arc::new(std::sync::Mutex::new(JoinSet::new())),
            slot,
            slot_writes: Arc::new(std::sync::Mutex::new(JoinSet::new())),
            notices,
            ticks: Arc::new(AtomicU64::new(0)),
            tick_interval,
        };

        if running {
            engine.spawn_ticker();
        }
        engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineNotice> {
        self.notices.subscribe()
    }

    pub async fn state(&self) -> EngineState {
        self.machine.lock().await.state().clone()
    }

    /// Ticks applied since boot
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub async fn start(&self) -> EngineState {
        let mut machine = self.machine.lock().await;
        if machine.start() {
            self.persist(machine.state());
            self.spawn_ticker();
            self.notify(EngineNotice::StateChanged(machine.state().clone()));
        }
        machine.state().clone()
    }

    pub async fn pause(&self) -> EngineState {
        let mut machine = self.machine.lock().await;
        if machine.pause() {
            self.cancel_ticker();
            self.persist(machine.state());
            self.notify(EngineNotice::StateChanged(machine.state().clone()));
        }
        machine.state().clone()
    }

    pub async fn toggle(&self) -> EngineState {
        let running = self.machine.lock().await.state().running;
        if running {
            self.pause().await
        } else {
            self.start().await
        }
    }

    /// Discard progress and clear the durable slot; no session is recorded
    pub async fn reset(&self) -> EngineState {
        let mut machine = self.machine.lock().await;
        self.cancel_ticker();
        machine.reset();
        self.queue_slot(SlotOp::Clear);
        self.notify(EngineNotice::StateChanged(machine.state().clone()));
        machine.state().clone()
    }

    /// Rejected while running; the state is left untouched on error
    pub async fn reconfigure(&self, config: CycleConfig) -> Result<EngineState> {
        let mut machine = self.machine.lock().await;
        machine.reconfigure(config)?;
        self.persist(machine.state());
        self.notify(EngineNotice::StateChanged(machine.state().clone()));
        Ok(machine.state().clone())
    }

    /// Stop the ticker without touching the state, e.g. on process exit.
    ///
    /// The snapshot keeps `running`, so the next boot resumes the countdown.
    pub async fn detach(&self) {
        let _machine = self.machine.lock().await;
        self.cancel_ticker();
    }

    /// Wait until every queued snapshot write has reached the store
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *lock_std(&self.slot_writes));
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Snapshot write ended abnormally: {}", e);
            }
        }
    }

    /// Wait for in-flight sink submissions to settle
    pub async fn drain_submissions(&self) {
        let mut pending = std::mem::take(&mut *lock_std(&self.submissions));
        while let Some(result) = pending.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Submission task ended abnormally: {}", e);
            }
        }
    }

    fn spawn_ticker(&self) {
        let mut ticker = lock_std(&self.ticker);
        if let Some(handle) = ticker.take() {
            handle.abort();
        }

        let engine = self.clone();
        *ticker = Some(tokio::spawn(async move { engine.run_ticker().await }));
    }

    fn cancel_ticker(&self) {
        if let Some(handle) = lock_std(&self.ticker).take() {
            handle.abort();
        }
    }

    async fn run_ticker(self) {
        let mut interval = time::interval_at(
            time::Instant::now() + self.tick_interval,
            self.tick_interval,
        );

        loop {
            interval.tick().await;

            // No await below this point: an abort can't split a transition
            // from its snapshot write or its submission.
            let mut machine = self.machine.lock().await;
            if !machine.state().running {
                break;
            }

            let event = machine.tick();
            let state = machine.state().clone();
            self.persist(&state);
            drop(machine);

            let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            self.notify(EngineNotice::Ticked { tick, state });

            if let Some(event) = event {
                self.dispatch(event);
            }
        }
    }

    fn dispatch(&self, event: CycleEvent) {
        match event {
            CycleEvent::PhaseChanged { from, to } => {
                self.notify(EngineNotice::PhaseChanged { from, to });
            }
            CycleEvent::SetComplete(totals) => {
                self.notify(EngineNotice::SetComplete(totals));

                let coordinator = self.coordinator.clone();
                let notices = self.notices.clone();
                let mut submissions = lock_std(&self.submissions);
                while submissions.try_join_next().is_some() {}
                submissions.spawn(async move {
                    let notice = match coordinator.submit(totals).await {
                        SubmissionOutcome::Recorded(summary) => {
                            EngineNotice::SessionRecorded(summary)
                        }
                        SubmissionOutcome::SkippedGuest => EngineNotice::SessionSkipped,
                        SubmissionOutcome::Failed(message) => {
                            EngineNotice::SubmissionFailed(message)
                        }
                    };
                    let _ = notices.send(notice);
                });
            }
        }
    }

    fn persist(&self, state: &EngineState) {
        self.queue_slot(SlotOp::Save(state.clone()));
    }

    /// Must be called with the machine lock held so ops are numbered in
    /// transition order.
    fn queue_slot(&self, op: SlotOp) {
        let seq = self.slot.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.slot.clone();
        let mut writes = lock_std(&self.slot_writes);
        while writes.try_join_next().is_some() {}
        writes.spawn_blocking(move || slot.apply(seq, op));
    }

    fn notify(&self, notice: EngineNotice) {
        // No subscribers is fine
        let _ = self.notices.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::RecordingDouble;
    use crate::{
        Actor, EngineSnapshot, Error, IdentityProbe, MemorySnapshotStore, SnapshotStore,
        StaticIdentity,
    };

    fn quick_config(long_break_enabled: bool) -> CycleConfig {
        CycleConfig::new(1, 1, 5, 2, long_break_enabled).unwrap()
    }

    struct Harness {
        store: Arc<MemorySnapshotStore>,
        sink: Arc<RecordingDouble>,
        engine: FocusEngine,
    }

    async fn harness_with(
        store: MemorySnapshotStore,
        sink: RecordingDouble,
        identity: Arc<dyn IdentityProbe>,
        config: CycleConfig,
    ) -> Harness {
        crate::logging::init_test();
        let store = Arc::new(store);
        let sink = Arc::new(sink);
        let coordinator = SessionCoordinator::new(
            store.clone(),
            sink.clone(),
            identity,
            Duration::from_secs(3),
        );
        let engine = FocusEngine::boot(coordinator, config, TICK_INTERVAL).await;
        Harness {
            store,
            sink,
            engine,
        }
    }

    async fn harness(actor: Actor, config: CycleConfig) -> Harness {
        harness_with(
            MemorySnapshotStore::new(),
            RecordingDouble::default(),
            Arc::new(StaticIdentity(actor)),
            config,
        )
        .await
    }

    /// Let `secs` seconds of paused time elapse, landing between ticks
    async fn elapse(secs: u64) {
        time::sleep(Duration::from_secs(secs) + Duration::from_millis(500)).await;
    }

    fn slot_state(store: &MemorySnapshotStore) -> EngineState {
        store.read().unwrap().unwrap().into_state().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_identified_set_recorded_once() {
        let h = harness(Actor::identified("user-9"), quick_config(false)).await;
        h.engine.start().await;

        elapse(180).await;
        h.engine.drain_submissions().await;

        assert_eq!(h.engine.ticks(), 180);
        assert_eq!(
            h.sink.calls(),
            vec![SessionSummary {
                total_duration_seconds: 180,
                work_duration_seconds: 120,
                break_duration_seconds: 60,
                cycles_completed: 2,
                actor_id: "user-9".into(),
            }]
        );

        let state = h.engine.state().await;
        assert_eq!(state.phase, PhaseKind::Work);
        assert_eq!(state.remaining_seconds, 60);
        assert_eq!(state.completed_work_cycles_in_set, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_break_before_set_complete() {
        let h = harness(Actor::identified("user-9"), quick_config(true)).await;
        h.engine.start().await;

        elapse(180).await;
        let state = h.engine.state().await;
        assert_eq!(state.phase, PhaseKind::LongBreak);
        assert_eq!(state.remaining_seconds, 300);
        h.engine.drain_submissions().await;
        assert!(h.sink.calls().is_empty());

        elapse(300).await;
        h.engine.drain_submissions().await;
        let calls = h.sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].break_duration_seconds, 360);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guest_set_not_recorded_but_slot_reset() {
        let h = harness(Actor::guest(), quick_config(false)).await;
        let mut notices = h.engine.subscribe();
        h.engine.start().await;

        elapse(180).await;
        h.engine.drain_submissions().await;
        h.engine.flush().await;

        assert!(h.sink.calls().is_empty());
        let slot = slot_state(&h.store);
        assert_eq!(slot.completed_work_cycles_in_set, 0);
        assert_eq!(slot.accumulated_work_seconds, 0);
        assert_eq!(slot.phase, PhaseKind::Work);

        let mut skipped = false;
        while let Ok(notice) = notices.try_recv() {
            if matches!(notice, EngineNotice::SessionSkipped) {
                skipped = true;
            }
        }
        assert!(skipped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_tracks_every_tick() {
        let h = harness(Actor::guest(), quick_config(false)).await;
        h.engine.start().await;
        h.engine.flush().await;
        assert!(slot_state(&h.store).running);

        elapse(5).await;
        h.engine.flush().await;
        assert_eq!(slot_state(&h.store).remaining_seconds, 55);
    }

    #[test]
    fn test_stale_slot_op_is_dropped() {
        let store = Arc::new(MemorySnapshotStore::new());
        let slot = SlotWriter {
            coordinator: SessionCoordinator::new(
                store.clone(),
                Arc::new(RecordingDouble::default()),
                Arc::new(StaticIdentity(Actor::guest())),
                Duration::from_secs(3),
            ),
            issued: AtomicU64::new(2),
            applied: std::sync::Mutex::new(0),
        };
        let mut ticked = EngineState::initial(quick_config(false));
        ticked.running = true;

        // A reset's clear lands before the tick write queued ahead of it
        slot.apply(2, SlotOp::Clear);
        slot.apply(1, SlotOp::Save(ticked));
        assert!(store.raw().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_controls_leave_last_state_in_slot() {
        let h = harness(Actor::guest(), quick_config(false)).await;
        h.engine.start().await;
        h.engine.pause().await;
        h.engine.start().await;
        h.engine.reset().await;
        let last = h.engine.reconfigure(quick_config(true)).await.unwrap();

        h.engine.flush().await;
        assert_eq!(slot_state(&h.store), last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_resumes_running_countdown() {
        let mut saved = EngineState::initial(quick_config(false));
        saved.running = true;
        saved.remaining_seconds = 37;
        let store = MemorySnapshotStore::new();
        store.write(&EngineSnapshot::capture(&saved)).unwrap();

        let h = harness_with(
            store,
            RecordingDouble::default(),
            Arc::new(StaticIdentity(Actor::guest())),
            CycleConfig::default(),
        )
        .await;
        assert_eq!(h.engine.state().await, saved);

        elapse(1).await;
        let state = h.engine.state().await;
        assert_eq!(state.remaining_seconds, 36);
        assert_eq!(state.phase, PhaseKind::Work);
        assert!(state.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_stops_countdown() {
        let h = harness(Actor::guest(), CycleConfig::default()).await;
        h.engine.start().await;
        elapse(10).await;

        let paused = h.engine.pause().await;
        assert_eq!(paused.remaining_seconds, 1490);
        h.engine.flush().await;
        assert!(!slot_state(&h.store).running);

        elapse(10).await;
        assert_eq!(h.engine.state().await.remaining_seconds, 1490);

        h.engine.toggle().await;
        elapse(1).await;
        assert_eq!(h.engine.state().await.remaining_seconds, 1489);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_while_running_rejected() {
        let h = harness(Actor::guest(), CycleConfig::default()).await;
        h.engine.start().await;
        elapse(3).await;
        let before = h.engine.state().await;

        let result = h.engine.reconfigure(quick_config(true)).await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
        assert_eq!(h.engine.state().await, before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_while_paused_persists() {
        let h = harness(Actor::guest(), CycleConfig::default()).await;
        let state = h.engine.reconfigure(quick_config(true)).await.unwrap();
        h.engine.flush().await;

        assert_eq!(state.remaining_seconds, 60);
        assert_eq!(slot_state(&h.store), state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_slot_without_recording() {
        let h = harness(Actor::identified("user-9"), quick_config(false)).await;
        h.engine.start().await;
        elapse(150).await;

        let state = h.engine.reset().await;
        assert_eq!(state, EngineState::initial(quick_config(false)));
        h.engine.flush().await;
        assert!(h.store.raw().is_none());

        elapse(60).await;
        h.engine.drain_submissions().await;
        assert!(h.sink.calls().is_empty());
        assert_eq!(h.engine.state().await.remaining_seconds, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_failure_surfaces_notice() {
        let h = harness_with(
            MemorySnapshotStore::new(),
            RecordingDouble {
                fail_with: Some("connection refused".into()),
                ..Default::default()
            },
            Arc::new(StaticIdentity(Actor::identified("user-9"))),
            quick_config(false),
        )
        .await;
        let mut notices = h.engine.subscribe();
        h.engine.start().await;

        elapse(180).await;
        h.engine.drain_submissions().await;

        let mut failure = None;
        while let Ok(notice) = notices.try_recv() {
            if let EngineNotice::SubmissionFailed(message) = notice {
                failure = Some(message);
            }
        }
        assert!(failure.unwrap().contains("connection refused"));
        assert_eq!(h.sink.calls().len(), 1);

        // The engine has already moved on to the next set
        assert!(h.engine.state().await.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detach_keeps_running_flag() {
        let h = harness(Actor::guest(), quick_config(false)).await;
        h.engine.start().await;
        elapse(2).await;

        h.engine.detach().await;
        h.engine.flush().await;
        elapse(5).await;

        let state = h.engine.state().await;
        assert_eq!(state.remaining_seconds, 58);
        assert!(state.running);
        assert!(slot_state(&h.store).running);
    }
}
