#![forbid(unsafe_code)]

//! Core engine of the pomo focus-cycle timer.
//!
//! This crate provides:
//! - Domain types (phases, cycle configuration, engine state, summaries)
//! - The cycle state machine
//! - Persistence (durable snapshot slot, session journal, remote sink)
//! - Identity probes and the session persistence coordinator
//! - The tokio-driven engine runtime

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod cycle;
pub mod snapshot;
pub mod sink;
pub mod identity;
pub mod coordinator;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use cycle::CycleMachine;
pub use snapshot::{EngineSnapshot, FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use sink::{read_journal, HttpRecordingSink, JsonlSink, RecordingSink, SessionRecord};
pub use identity::{Actor, ActorKind, FileIdentity, IdentityProbe, SharedIdentity, StaticIdentity};
pub use coordinator::{SessionCoordinator, SubmissionOutcome};
pub use engine::{EngineNotice, FocusEngine, TICK_INTERVAL};
