//! Session persistence coordinator.
//!
//! Bridges the cycle state machine to the outside world:
//! - Rehydrates the machine from the durable slot at start-up
//! - Overwrites the slot after every mutation, clears it on reset
//! - Submits one summary per closed set, for identified actors only

use crate::{
    CycleConfig, CycleMachine, EngineSnapshot, EngineState, Error, IdentityProbe, RecordingSink,
    Result, SessionSummary, SetTotals, SnapshotStore,
};
use std::sync::Arc;
use std::time::Duration;

/// Result of the single submission attempt for a closed set
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Recorded(SessionSummary),
    /// Guest sessions are not recorded remotely
    SkippedGuest,
    /// Failed or timed out; the summary is dropped
    Failed(String),
}

#[derive(Clone)]
pub struct SessionCoordinator {
    store: Arc<dyn SnapshotStore>,
    sink: Arc<dyn RecordingSink>,
    identity: Arc<dyn IdentityProbe>,
    sink_timeout: Duration,
}

impl SessionCoordinator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        sink: Arc<dyn RecordingSink>,
        identity: Arc<dyn IdentityProbe>,
        sink_timeout: Duration,
    ) -> Self {
        Self {
            store,
            sink,
            identity,
            sink_timeout,
        }
    }

    /// Build the machine from the durable slot, or from `defaults`.
    ///
    /// A malformed slot is deleted and never reported as an error. A slot
    /// that merely could not be read right now is left in place.
    pub fn restore(&self, defaults: CycleConfig) -> CycleMachine {
        let restored = self
            .store
            .read()
            .and_then(|slot| slot.map(EngineSnapshot::into_state).transpose())
            .and_then(|state| {
                state
                    .map(|state| {
                        CycleMachine::from_state(state)
                            .map_err(|e| Error::StorageCorrupt(e.to_string()))
                    })
                    .transpose()
            });

        match restored {
            Ok(Some(machine)) => {
                tracing::info!(
                    "Resumed {:?} with {}s remaining (running: {})",
                    machine.state().phase,
                    machine.state().remaining_seconds,
                    machine.state().running
                );
                machine
            }
            Ok(None) => {
                tracing::debug!("No snapshot found, starting from defaults");
                CycleMachine::new(defaults)
            }
            Err(Error::StorageCorrupt(reason)) => {
                tracing::warn!("Discarding unusable snapshot: {}", reason);
                if let Err(clear_err) = self.store.clear() {
                    tracing::warn!("Failed to clear corrupt snapshot: {}", clear_err);
                }
                CycleMachine::new(defaults)
            }
            Err(e) => {
                tracing::warn!("Snapshot unavailable, starting from defaults: {}", e);
                CycleMachine::new(defaults)
            }
        }
    }

    /// Overwrite the slot with the current state
    pub fn persist(&self, state: &EngineState) -> Result<()> {
        self.store.write(&EngineSnapshot::capture(state))
    }

    /// Drop the slot after an explicit reset
    pub fn discard(&self) -> Result<()> {
        self.store.clear()
    }

    /// Submit a closed set, exactly one attempt.
    ///
    /// The actor is resolved now, not at engine start.
    pub async fn submit(&self, totals: SetTotals) -> SubmissionOutcome {
        let actor = self.identity.current_actor().await;
        if actor.is_guest() {
            tracing::debug!("Guest session, skipping remote recording");
            return SubmissionOutcome::SkippedGuest;
        }

        let summary = totals.into_summary(actor.id);
        let attempt = tokio::time::timeout(self.sink_timeout, self.sink.record_session(&summary));

        match attempt.await {
            Ok(Ok(())) => SubmissionOutcome::Recorded(summary),
            Ok(Err(e)) => {
                tracing::warn!("Session submission failed: {}", e);
                SubmissionOutcome::Failed(e.to_string())
            }
            Err(_) => {
                let e = Error::SinkSubmission(format!(
                    "no response within {}s",
                    self.sink_timeout.as_secs_f64()
                ));
                tracing::warn!("{}", e);
                SubmissionOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{Actor, MemorySnapshotStore, PhaseKind, SharedIdentity, StaticIdentity};
    use std::sync::Mutex;

    /// Sink double that records calls and answers with a canned result
    #[derive(Default)]
    pub(crate) struct RecordingDouble {
        pub calls: Mutex<Vec<SessionSummary>>,
        pub fail_with: Option<String>,
        pub delay: Option<Duration>,
    }

    impl RecordingDouble {
        pub fn calls(&self) -> Vec<SessionSummary> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RecordingSink for RecordingDouble {
        async fn record_session(&self, summary: &SessionSummary) -> Result<()> {
            self.calls.lock().unwrap().push(summary.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.fail_with {
                Some(msg) => Err(Error::SinkSubmission(msg.clone())),
                None => Ok(()),
            }
        }
    }

    fn totals() -> SetTotals {
        SetTotals {
            work_seconds: 120,
            break_seconds: 60,
            cycles_completed: 2,
        }
    }

    fn coordinator(
        store: Arc<MemorySnapshotStore>,
        sink: Arc<RecordingDouble>,
        identity: Arc<dyn IdentityProbe>,
    ) -> SessionCoordinator {
        SessionCoordinator::new(store, sink, identity, Duration::from_secs(3))
    }

    #[test]
    fn test_restore_empty_slot_uses_defaults() {
        let store = Arc::new(MemorySnapshotStore::new());
        let coord = coordinator(
            store,
            Arc::new(RecordingDouble::default()),
            Arc::new(StaticIdentity(Actor::guest())),
        );

        let machine = coord.restore(CycleConfig::default());
        assert_eq!(*machine.state(), EngineState::initial(CycleConfig::default()));
    }

    #[test]
    fn test_restore_corrupt_slot_self_heals() {
        crate::logging::init_test();
        let store = Arc::new(MemorySnapshotStore::with_raw("{\"phase\": 12"));
        let coord = coordinator(
            store.clone(),
            Arc::new(RecordingDouble::default()),
            Arc::new(StaticIdentity(Actor::guest())),
        );

        let machine = coord.restore(CycleConfig::default());
        assert_eq!(machine.state().remaining_seconds, 1500);
        assert!(store.raw().is_none());
    }

    /// Store whose slot exists but cannot be opened right now
    #[derive(Default)]
    struct UnreadableStore {
        cleared: Mutex<bool>,
    }

    impl SnapshotStore for UnreadableStore {
        fn read(&self) -> Result<Option<EngineSnapshot>> {
            // EMFILE
            Err(Error::Io(std::io::Error::from_raw_os_error(24)))
        }

        fn write(&self, _snapshot: &EngineSnapshot) -> Result<()> {
            Ok(())
        }

        fn clear(&self) -> Result<()> {
            *self.cleared.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn test_restore_io_error_keeps_slot() {
        crate::logging::init_test();
        let store = Arc::new(UnreadableStore::default());
        let coord = SessionCoordinator::new(
            store.clone(),
            Arc::new(RecordingDouble::default()),
            Arc::new(StaticIdentity(Actor::guest())),
            Duration::from_secs(3),
        );

        let machine = coord.restore(CycleConfig::default());
        assert_eq!(*machine.state(), EngineState::initial(CycleConfig::default()));
        assert!(!*store.cleared.lock().unwrap());
    }

    #[test]
    fn test_restore_resumes_running_countdown() {
        let store = Arc::new(MemorySnapshotStore::new());
        let coord = coordinator(
            store,
            Arc::new(RecordingDouble::default()),
            Arc::new(StaticIdentity(Actor::guest())),
        );

        let mut state = EngineState::initial(CycleConfig::new(1, 1, 5, 2, false).unwrap());
        state.running = true;
        state.remaining_seconds = 37;
        coord.persist(&state).unwrap();

        let mut machine = coord.restore(CycleConfig::default());
        assert_eq!(*machine.state(), state);

        machine.tick();
        assert_eq!(machine.state().remaining_seconds, 36);
        assert_eq!(machine.state().phase, PhaseKind::Work);
    }

    #[test]
    fn test_discard_clears_slot() {
        let store = Arc::new(MemorySnapshotStore::new());
        let coord = coordinator(
            store.clone(),
            Arc::new(RecordingDouble::default()),
            Arc::new(StaticIdentity(Actor::guest())),
        );
        coord
            .persist(&EngineState::initial(CycleConfig::default()))
            .unwrap();

        coord.discard().unwrap();
        assert!(store.raw().is_none());
    }

    #[tokio::test]
    async fn test_guest_is_never_submitted() {
        let sink = Arc::new(RecordingDouble::default());
        let coord = coordinator(
            Arc::new(MemorySnapshotStore::new()),
            sink.clone(),
            Arc::new(StaticIdentity(Actor::guest())),
        );

        assert_eq!(coord.submit(totals()).await, SubmissionOutcome::SkippedGuest);
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_identified_submitted_once_with_actor_id() {
        let sink = Arc::new(RecordingDouble::default());
        let coord = coordinator(
            Arc::new(MemorySnapshotStore::new()),
            sink.clone(),
            Arc::new(StaticIdentity(Actor::identified("user-7"))),
        );

        let outcome = coord.submit(totals()).await;
        let expected = totals().into_summary("user-7");
        assert_eq!(outcome, SubmissionOutcome::Recorded(expected.clone()));
        assert_eq!(sink.calls(), vec![expected]);
    }

    #[tokio::test]
    async fn test_identity_checked_at_submission_time() {
        let sink = Arc::new(RecordingDouble::default());
        let identity = SharedIdentity::guest();
        let coord = coordinator(
            Arc::new(MemorySnapshotStore::new()),
            sink.clone(),
            Arc::new(identity.clone()),
        );

        identity.sign_in("late-login");
        coord.submit(totals()).await;

        assert_eq!(sink.calls()[0].actor_id, "late-login");
    }

    #[tokio::test]
    async fn test_failure_is_not_retried() {
        let sink = Arc::new(RecordingDouble {
            fail_with: Some("500 Internal Server Error".into()),
            ..Default::default()
        });
        let coord = coordinator(
            Arc::new(MemorySnapshotStore::new()),
            sink.clone(),
            Arc::new(StaticIdentity(Actor::identified("user-7"))),
        );

        let outcome = coord.submit(totals()).await;
        assert!(matches!(outcome, SubmissionOutcome::Failed(msg) if msg.contains("500")));
        assert_eq!(sink.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_sink_times_out() {
        let sink = Arc::new(RecordingDouble {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let coord = coordinator(
            Arc::new(MemorySnapshotStore::new()),
            sink.clone(),
            Arc::new(StaticIdentity(Actor::identified("user-7"))),
        );

        let outcome = coord.submit(totals()).await;
        assert!(matches!(outcome, SubmissionOutcome::Failed(msg) if msg.contains("no response")));
        assert_eq!(sink.calls().len(), 1);
    }
}
