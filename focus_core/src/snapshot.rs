//! Durable single-slot snapshot storage with file locking.
//!
//! The engine state is flattened into an [`EngineSnapshot`] and written to
//! one fixed slot after every mutation. The slot is last-writer-wins and is
//! read back once at start-up.

use crate::{CycleConfig, EngineState, Error, PhaseKind, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;

/// Fixed key of the engine's durable slot
pub const ENGINE_SLOT_KEY: &str = "focus-engine";

/// Serializable flat copy of the engine state and its configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EngineSnapshot {
    pub phase: PhaseKind,
    pub remaining_seconds: u64,
    pub running: bool,
    pub completed_work_cycles_in_set: u32,
    pub accumulated_work_seconds: u64,
    pub accumulated_break_seconds: u64,
    pub work_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub cycles_per_set: u32,
    pub long_break_enabled: bool,
}

impl EngineSnapshot {
    pub fn capture(state: &EngineState) -> Self {
        Self {
            phase: state.phase,
            remaining_seconds: state.remaining_seconds,
            running: state.running,
            completed_work_cycles_in_set: state.completed_work_cycles_in_set,
            accumulated_work_seconds: state.accumulated_work_seconds,
            accumulated_break_seconds: state.accumulated_break_seconds,
            work_minutes: state.config.work_minutes(),
            short_break_minutes: state.config.short_break_minutes(),
            long_break_minutes: state.config.long_break_minutes(),
            cycles_per_set: state.config.cycles_per_set(),
            long_break_enabled: state.config.long_break_enabled(),
        }
    }

    /// Rebuild the engine state, rejecting anything that breaks an invariant
    pub fn into_state(self) -> Result<EngineState> {
        let config = CycleConfig::new(
            self.work_minutes,
            self.short_break_minutes,
            self.long_break_minutes,
            self.cycles_per_set,
            self.long_break_enabled,
        )
        .map_err(|e| Error::StorageCorrupt(e.to_string()))?;

        let state = EngineState {
            phase: self.phase,
            remaining_seconds: self.remaining_seconds,
            running: self.running,
            completed_work_cycles_in_set: self.completed_work_cycles_in_set,
            accumulated_work_seconds: self.accumulated_work_seconds,
            accumulated_break_seconds: self.accumulated_break_seconds,
            config,
        };
        state
            .validate()
            .map_err(|e| Error::StorageCorrupt(e.to_string()))?;
        Ok(state)
    }
}

/// Single-slot durable store for engine snapshots
pub trait SnapshotStore: Send + Sync {
    /// Read the slot. `Ok(None)` when empty, `Err(StorageCorrupt)` when malformed.
    fn read(&self) -> Result<Option<EngineSnapshot>>;

    /// Overwrite the slot
    fn write(&self, snapshot: &EngineSnapshot) -> Result<()>;

    /// Empty the slot; clearing an empty slot is not an error
    fn clear(&self) -> Result<()>;
}

fn parse_slot(contents: &str) -> Result<EngineSnapshot> {
    serde_json::from_str(contents).map_err(|e| Error::StorageCorrupt(e.to_string()))
}

/// JSON file slot with shared/exclusive locking and atomic replacement
pub struct FileSnapshotStore {
    path: PathBuf,
}

impl FileSnapshotStore {
    /// Slot file `<dir>/focus-engine.json`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(format!("{ENGINE_SLOT_KEY}.json")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn read(&self) -> Result<Option<EngineSnapshot>> {
        if !self.path.exists() {
            tracing::debug!("No snapshot at {:?}", self.path);
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let read_result = std::io::BufReader::new(&file).read_to_string(&mut contents);
        file.unlock()?;

        if let Err(e) = read_result {
            return Err(Error::StorageCorrupt(format!(
                "unreadable snapshot {:?}: {}",
                self.path, e
            )));
        }

        let snapshot = parse_slot(&contents)?;
        tracing::debug!("Loaded snapshot from {:?}", self.path);
        Ok(Some(snapshot))
    }

    fn write(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let parent = self.path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "snapshot path missing parent")
        })?;
        std::fs::create_dir_all(parent)?;

        // Temp file in the same directory so the rename stays atomic
        let temp = NamedTempFile::new_in(parent)?;
        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::trace!("Saved snapshot to {:?}", self.path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!("Cleared snapshot {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory slot holding the raw serialized text
#[derive(Default)]
pub struct MemorySnapshotStore {
    slot: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the slot with arbitrary contents, well-formed or not
    pub fn with_raw(contents: impl Into<String>) -> Self {
        Self {
            slot: Mutex::new(Some(contents.into())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn read(&self) -> Result<Option<EngineSnapshot>> {
        self.lock().as_deref().map(parse_slot).transpose()
    }

    fn write(&self, snapshot: &EngineSnapshot) -> Result<()> {
        let contents = serde_json::to_string(snapshot)?;
        *self.lock() = Some(contents);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = None;
        Ok(())
    }
}
