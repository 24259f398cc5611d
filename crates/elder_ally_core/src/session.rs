//! crates/elder_ally_core/src/session.rs
//!
//! The local cache of "who is currently signed in".
//!
//! The profile is persisted as JSON under a fixed key in [`LocalStorage`] so a
//! relaunch can skip authentication. Unreadable data is treated as no session.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::Profile;
use crate::ports::{LocalStorage, PortError};

/// Storage key holding the serialized profile.
pub const SESSION_KEY: &str = "user";

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to encode session: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Session storage error: {0}")]
    Storage(#[from] PortError),
}

pub struct SessionStore {
    storage: Arc<dyn LocalStorage>,
    current: RwLock<Option<Profile>>,
    // Serializes save/clear so storage and memory never disagree.
    writer: Mutex<()>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn LocalStorage>) -> Self {
        Self {
            storage,
            current: RwLock::new(None),
            writer: Mutex::new(()),
        }
    }

    /// Restores the persisted profile, if any, into the in-memory session.
    ///
    /// Missing, corrupt, or unreadable data all yield `None`.
    pub async fn load(&self) -> Option<Profile> {
        let _writer = self.writer.lock().await;

        let raw = match self.storage.get(SESSION_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No persisted session found");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read persisted session; treating as signed out");
                return None;
            }
        };

        match serde_json::from_str::<Profile>(&raw) {
            Ok(profile) => {
                info!(account_id = %profile.id, role = %profile.role(), "Restored session");
                *self.write_current() = Some(profile.clone());
                Some(profile)
            }
            Err(e) => {
                warn!(error = %e, "Discarding unreadable persisted session");
                None
            }
        }
    }

    /// Persists `profile` and makes it the current session.
    ///
    /// The in-memory session only changes once the profile is durably stored.
    pub async fn save(&self, profile: &Profile) -> Result<(), SessionError> {
        let encoded = serde_json::to_string(profile)?;

        let _writer = self.writer.lock().await;
        self.storage.put(SESSION_KEY, &encoded).await?;
        *self.write_current() = Some(profile.clone());

        info!(account_id = %profile.id, "Session saved");
        Ok(())
    }

    /// Forgets the current session, both persisted and in memory.
    pub async fn clear(&self) -> Result<(), SessionError> {
        let _writer = self.writer.lock().await;
        *self.write_current() = None;
        self.storage.remove(SESSION_KEY).await?;

        info!("Session cleared");
        Ok(())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read_current().is_some()
    }

    pub fn current(&self) -> Option<Profile> {
        self.read_current().clone()
    }

    fn read_current(&self) -> RwLockReadGuard<'_, Option<Profile>> {
        self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_current(&self) -> RwLockWriteGuard<'_, Option<Profile>> {
        self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
