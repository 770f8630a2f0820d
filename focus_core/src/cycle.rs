//! Cycle state machine for the work/break interval cycle.
//!
//! Every operation is a synchronous transition of [`EngineState`]; the
//! machine performs no I/O. Phase transitions:
//! - Work ends: bank the work time, bump the cycle counter, then either
//!   short break, long break, or (long breaks disabled) close the set
//! - Short break ends: bank the break time, back to Work
//! - Long break ends: bank the break time and close the set

use crate::{CycleConfig, CycleEvent, EngineState, Error, PhaseKind, Result, SetTotals};

/// Deterministic owner of the engine state
#[derive(Clone, Debug)]
pub struct CycleMachine {
    state: EngineState,
}

impl CycleMachine {
    /// Start from a full, paused Work phase
    pub fn new(config: CycleConfig) -> Self {
        Self {
            state: EngineState::initial(config),
        }
    }

    /// Resume from a previously captured state
    pub fn from_state(state: EngineState) -> Result<Self> {
        state.validate()?;
        Ok(Self { state })
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// Advance one elapsed second.
    ///
    /// The phase ends on the tick that brings the countdown to zero, so a
    /// 60-second phase takes exactly 60 ticks. No-op while paused.
    pub fn tick(&mut self) -> Option<CycleEvent> {
        if !self.state.running {
            return None;
        }

        if self.state.remaining_seconds > 0 {
            self.state.remaining_seconds -= 1;
        }

        if self.state.remaining_seconds == 0 {
            Some(self.complete_phase())
        } else {
            None
        }
    }

    /// Returns true if the machine was paused before the call
    pub fn start(&mut self) -> bool {
        if self.state.running {
            return false;
        }
        self.state.running = true;
        true
    }

    /// Returns true if the machine was running before the call
    pub fn pause(&mut self) -> bool {
        if !self.state.running {
            return false;
        }
        self.state.running = false;
        true
    }

    /// Flip between running and paused, returning the new running flag
    pub fn toggle(&mut self) -> bool {
        if self.state.running {
            self.pause();
        } else {
            self.start();
        }
        self.state.running
    }

    /// Discard all progress; no set is reported
    pub fn reset(&mut self) {
        self.state = EngineState::initial(self.state.config);
    }

    /// Replace the configuration while paused.
    ///
    /// The current phase and counters are kept; the countdown restarts at the
    /// new full duration of the current phase.
    pub fn reconfigure(&mut self, config: CycleConfig) -> Result<()> {
        if self.state.running {
            return Err(Error::InvalidState(
                "cannot reconfigure while the timer is running".into(),
            ));
        }

        let ceiling = self.state.cycle_ceiling(&config);
        if self.state.completed_work_cycles_in_set > ceiling {
            return Err(Error::InvalidConfig(format!(
                "cycles_per_set {} is below the {} work cycles already completed in this set",
                config.cycles_per_set(),
                self.state.completed_work_cycles_in_set
            )));
        }

        self.state.config = config;
        self.state.remaining_seconds = config.phase_duration(self.state.phase);
        Ok(())
    }

    fn complete_phase(&mut self) -> CycleEvent {
        let config = self.state.config;
        let from = self.state.phase;

        match from {
            PhaseKind::Work => {
                self.state.accumulated_work_seconds += config.phase_duration(PhaseKind::Work);
                self.state.completed_work_cycles_in_set += 1;

                if self.state.completed_work_cycles_in_set >= config.cycles_per_set() {
                    if config.long_break_enabled() {
                        self.enter(PhaseKind::LongBreak)
                    } else {
                        self.close_set()
                    }
                } else {
                    self.enter(PhaseKind::ShortBreak)
                }
            }
            PhaseKind::ShortBreak => {
                self.state.accumulated_break_seconds +=
                    config.phase_duration(PhaseKind::ShortBreak);
                self.enter(PhaseKind::Work)
            }
            PhaseKind::LongBreak => {
                self.state.accumulated_break_seconds +=
                    config.phase_duration(PhaseKind::LongBreak);
                self.close_set()
            }
        }
    }

    fn enter(&mut self, to: PhaseKind) -> CycleEvent {
        let from = self.state.phase;
        self.state.phase = to;
        self.state.remaining_seconds = self.state.config.phase_duration(to);
        tracing::debug!("Phase {:?} -> {:?}", from, to);
        CycleEvent::PhaseChanged { from, to }
    }

    fn close_set(&mut self) -> CycleEvent {
        let totals = SetTotals {
            work_seconds: self.state.accumulated_work_seconds,
            break_seconds: self.state.accumulated_break_seconds,
            cycles_completed: self.state.completed_work_cycles_in_set,
        };

        self.state.accumulated_work_seconds = 0;
        self.state.accumulated_break_seconds = 0;
        self.state.completed_work_cycles_in_set = 0;
        self.state.phase = PhaseKind::Work;
        self.state.remaining_seconds = self.state.config.phase_duration(PhaseKind::Work);

        tracing::info!(
            "Set closed after {} cycles ({}s work, {}s break)",
            totals.cycles_completed,
            totals.work_seconds,
            totals.break_seconds
        );
        CycleEvent::SetComplete(totals)
    }
}
