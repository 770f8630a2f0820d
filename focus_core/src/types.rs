//! Core domain types for the focus-cycle timer.
//!
//! This module defines the values shared by the cycle state machine and
//! the persistence coordinator:
//! - Phase kinds and the validated cycle configuration
//! - The mutable engine state and its invariants
//! - Set totals and the session summary submitted per closed set

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

// ============================================================================
// Phase and Configuration Types
// ============================================================================

/// Kind of countdown interval
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Work,
    ShortBreak,
    LongBreak,
}

impl PhaseKind {
    pub fn label(&self) -> &'static str {
        match self {
            PhaseKind::Work => "Work",
            PhaseKind::ShortBreak => "Short break",
            PhaseKind::LongBreak => "Long break",
        }
    }

    pub fn is_break(&self) -> bool {
        !matches!(self, PhaseKind::Work)
    }
}

/// User-tunable cycle parameters.
///
/// Only constructible through [`CycleConfig::new`], so every value in
/// circulation has positive durations and a positive cycle count.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CycleConfig {
    work_minutes: u32,
    short_break_minutes: u32,
    long_break_minutes: u32,
    cycles_per_set: u32,
    long_break_enabled: bool,
}

impl CycleConfig {
    /// Validate and build a configuration.
    ///
    /// Any zero duration or cycle count is rejected with
    /// [`Error::InvalidConfig`]; values are never clamped.
    pub fn new(
        work_minutes: u32,
        short_break_minutes: u32,
        long_break_minutes: u32,
        cycles_per_set: u32,
        long_break_enabled: bool,
    ) -> Result<Self> {
        let checks = [
            ("work_minutes", work_minutes),
            ("short_break_minutes", short_break_minutes),
            ("long_break_minutes", long_break_minutes),
            ("cycles_per_set", cycles_per_set),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{field} must be at least 1")));
            }
        }

        Ok(Self {
            work_minutes,
            short_break_minutes,
            long_break_minutes,
            cycles_per_set,
            long_break_enabled,
        })
    }

    pub fn work_minutes(&self) -> u32 {
        self.work_minutes
    }

    pub fn short_break_minutes(&self) -> u32 {
        self.short_break_minutes
    }

    pub fn long_break_minutes(&self) -> u32 {
        self.long_break_minutes
    }

    pub fn cycles_per_set(&self) -> u32 {
        self.cycles_per_set
    }

    pub fn long_break_enabled(&self) -> bool {
        self.long_break_enabled
    }

    /// Full length of a phase under this configuration, in seconds
    pub fn phase_duration(&self, phase: PhaseKind) -> u64 {
        let minutes = match phase {
            PhaseKind::Work => self.work_minutes,
            PhaseKind::ShortBreak => self.short_break_minutes,
            PhaseKind::LongBreak => self.long_break_minutes,
        };
        u64::from(minutes) * 60
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            work_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            cycles_per_set: 4,
            long_break_enabled: true,
        }
    }
}

// ============================================================================
// Engine State
// ============================================================================

/// The mutable timer state, owned by the cycle state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineState {
    pub phase: PhaseKind,
    pub remaining_seconds: u64,
    pub running: bool,
    pub completed_work_cycles_in_set: u32,
    pub accumulated_work_seconds: u64,
    pub accumulated_break_seconds: u64,
    pub config: CycleConfig,
}

impl EngineState {
    /// Fresh state: a full, paused Work phase with zeroed counters
    pub fn initial(config: CycleConfig) -> Self {
        Self {
            phase: PhaseKind::Work,
            remaining_seconds: config.phase_duration(PhaseKind::Work),
            running: false,
            completed_work_cycles_in_set: 0,
            accumulated_work_seconds: 0,
            accumulated_break_seconds: 0,
            config,
        }
    }

    pub fn phase_duration(&self) -> u64 {
        self.config.phase_duration(self.phase)
    }

    /// Check the state invariants.
    ///
    /// `completed_work_cycles_in_set` may only equal `cycles_per_set` while a
    /// long break is pending; everywhere else the set would already have closed.
    pub fn validate(&self) -> Result<()> {
        let duration = self.phase_duration();
        if self.remaining_seconds > duration {
            return Err(Error::InvalidState(format!(
                "remaining_seconds {} exceeds {} phase duration {}",
                self.remaining_seconds,
                self.phase.label(),
                duration
            )));
        }

        let ceiling = self.cycle_ceiling(&self.config);
        if self.completed_work_cycles_in_set > ceiling {
            return Err(Error::InvalidState(format!(
                "completed_work_cycles_in_set {} exceeds {} for a {} phase",
                self.completed_work_cycles_in_set,
                ceiling,
                self.phase.label()
            )));
        }

        Ok(())
    }

    /// Highest completed-cycle count this phase can hold under `config`
    pub(crate) fn cycle_ceiling(&self, config: &CycleConfig) -> u32 {
        match self.phase {
            PhaseKind::LongBreak => config.cycles_per_set(),
            PhaseKind::Work | PhaseKind::ShortBreak => config.cycles_per_set() - 1,
        }
    }

    /// Remaining time as `MM:SS`
    pub fn format_remaining(&self) -> String {
        let mins = self.remaining_seconds / 60;
        let secs = self.remaining_seconds % 60;
        format!("{:02}:{:02}", mins, secs)
    }

    /// Elapsed share of the current phase, 0.0 to 100.0
    pub fn progress_percent(&self) -> f64 {
        let total = self.phase_duration();
        if total == 0 {
            return 0.0;
        }
        (total - self.remaining_seconds.min(total)) as f64 / total as f64 * 100.0
    }

    /// Position within the set, e.g. `2/4` during the second Work phase
    pub fn cycle_label(&self) -> String {
        let per_set = self.config.cycles_per_set();
        let current = match self.phase {
            PhaseKind::Work => self.completed_work_cycles_in_set + 1,
            PhaseKind::ShortBreak | PhaseKind::LongBreak => self.completed_work_cycles_in_set,
        };
        format!("{}/{}", current.min(per_set), per_set)
    }
}

// ============================================================================
// Set Completion Types
// ============================================================================

/// Accumulated counters at the moment a set closes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetTotals {
    pub work_seconds: u64,
    pub break_seconds: u64,
    pub cycles_completed: u32,
}

impl SetTotals {
    /// Attach the actor the set is recorded for
    pub fn into_summary(self, actor_id: impl Into<String>) -> SessionSummary {
        SessionSummary {
            total_duration_seconds: self.work_seconds + self.break_seconds,
            work_duration_seconds: self.work_seconds,
            break_duration_seconds: self.break_seconds,
            cycles_completed: self.cycles_completed,
            actor_id: actor_id.into(),
        }
    }
}

/// Immutable per-set record handed to the recording sink
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub total_duration_seconds: u64,
    pub work_duration_seconds: u64,
    pub break_duration_seconds: u64,
    pub cycles_completed: u32,
    pub actor_id: String,
}

/// Events emitted by the cycle state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CycleEvent {
    PhaseChanged { from: PhaseKind, to: PhaseKind },
    SetComplete(SetTotals),
}
