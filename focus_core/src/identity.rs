//! Actor identity probes.
//!
//! The coordinator asks for the current actor at set-completion time, never
//! caching it, so a login that finishes mid-session is honoured.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Whether the actor's sessions are recorded remotely
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Guest,
    Identified,
}

/// The entity operating the timer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
}

impl Actor {
    pub fn guest() -> Self {
        Self {
            kind: ActorKind::Guest,
            id: "guest".into(),
        }
    }

    pub fn identified(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::Identified,
            id: id.into(),
        }
    }

    pub fn is_guest(&self) -> bool {
        self.kind == ActorKind::Guest
    }
}

/// Resolves who is operating the timer right now
#[async_trait::async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn current_actor(&self) -> Actor;
}

/// Always reports the same actor
pub struct StaticIdentity(pub Actor);

#[async_trait::async_trait]
impl IdentityProbe for StaticIdentity {
    async fn current_actor(&self) -> Actor {
        self.0.clone()
    }
}

/// In-process identity that can sign in or out while the engine runs
#[derive(Clone)]
pub struct SharedIdentity {
    actor: Arc<RwLock<Actor>>,
}

impl SharedIdentity {
    pub fn guest() -> Self {
        Self {
            actor: Arc::new(RwLock::new(Actor::guest())),
        }
    }

    pub fn sign_in(&self, id: impl Into<String>) {
        self.set(Actor::identified(id));
    }

    pub fn sign_out(&self) {
        self.set(Actor::guest());
    }

    fn set(&self, actor: Actor) {
        let mut guard = match self.actor.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = actor;
    }
}

#[async_trait::async_trait]
impl IdentityProbe for SharedIdentity {
    async fn current_actor(&self) -> Actor {
        match self.actor.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Identity persisted by the login flow in `<data_dir>/identity.json`.
///
/// The file is re-read on every probe. Absent or malformed means guest.
pub struct FileIdentity {
    path: PathBuf,
}

impl FileIdentity {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join("identity.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a completed login
    pub fn login(&self, id: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(&Actor::identified(id))?;
        std::fs::write(&self.path, contents)?;
        tracing::info!("Signed in as {}", id);
        Ok(())
    }

    pub fn logout(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn load(&self) -> Actor {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(_) => return Actor::guest(),
        };

        match serde_json::from_str::<Actor>(&contents) {
            Ok(actor) if actor.kind == ActorKind::Identified && !actor.id.trim().is_empty() => {
                actor
            }
            Ok(_) => Actor::guest(),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse identity file {:?}: {}. Treating as guest.",
                    self.path,
                    e
                );
                Actor::guest()
            }
        }
    }
}

#[async_trait::async_trait]
impl IdentityProbe for FileIdentity {
    async fn current_actor(&self) -> Actor {
        self.load()
    }
}
