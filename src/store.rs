//! Key-value store contract and session snapshot storage.
//!
//! The host supplies a [`KeyValueStore`] (app storage on mobile, SQLite via the
//! `persistence` feature, or [`MemoryStore`] in tests). [`SessionStore`] layers
//! the two tracking keys on top of it:
//!
//! - the active key holds the snapshot of the session being recorded (and the
//!   final snapshot of the last completed one)
//! - the history key holds completed sessions, newest first, capped

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::location::LocationSnapshot;
use crate::session::TrackingSession;
use crate::{Result, TrekError};

/// Byte-oriented persistent storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// In-process store backed by a `HashMap`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| TrekError::persistence("memory store poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| TrekError::persistence("memory store poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// Snapshot storage for tracking sessions.
///
/// Alongside the snapshot, delivered fixes are journaled under
/// `<active key>:pending` as they arrive, so a fix that has not been drained
/// into the session yet still survives the process being killed.
#[derive(Clone)]
pub struct SessionStore {
    store: Arc<dyn KeyValueStore>,
    active_key: String,
    pending_key: String,
    history_key: String,
    history_limit: usize,
    journal_lock: Arc<Mutex<()>>,
}

impl SessionStore {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        active_key: &str,
        history_key: &str,
        history_limit: usize,
    ) -> Self {
        Self {
            store,
            active_key: active_key.to_string(),
            pending_key: format!("{}:pending", active_key),
            history_key: history_key.to_string(),
            history_limit: history_limit.max(1),
            journal_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Overwrite the active-session snapshot.
    pub fn save_active(&self, session: &TrackingSession) -> Result<()> {
        let bytes = serde_json::to_vec(session)?;
        self.store.set(&self.active_key, &bytes)?;
        debug!(
            "[SessionStore] Saved session {} ({} waypoints)",
            session.id,
            session.waypoints.len()
        );
        Ok(())
    }

    /// Read back the last saved snapshot, Active or Completed.
    pub fn load_active(&self) -> Result<Option<TrackingSession>> {
        match self.store.get(&self.active_key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    // ========================================================================
    // Pending Journal
    // ========================================================================

    /// Record a delivered fix that has not been drained into the session yet.
    pub fn journal_position(&self, fix: &LocationSnapshot) -> Result<()> {
        let _guard = self.lock_journal()?;
        let mut pending = self.read_pending()?;
        pending.push(fix.clone());
        self.store.set(&self.pending_key, &serde_json::to_vec(&pending)?)
    }

    /// Journaled fixes, in delivery order.
    pub fn pending_positions(&self) -> Result<Vec<LocationSnapshot>> {
        let _guard = self.lock_journal()?;
        self.read_pending()
    }

    /// Remove fixes that are now part of the saved snapshot.
    ///
    /// Each drained fix removes one matching journal entry, so fixes delivered
    /// after the drain stay journaled.
    pub fn discard_pending(&self, drained: &[LocationSnapshot]) -> Result<()> {
        if drained.is_empty() {
            return Ok(());
        }
        let _guard = self.lock_journal()?;
        let mut pending = self.read_pending()?;
        for fix in drained {
            if let Some(pos) = pending.iter().position(|p| p == fix) {
                pending.remove(pos);
            }
        }
        self.store.set(&self.pending_key, &serde_json::to_vec(&pending)?)
    }

    /// Forget every journaled fix.
    pub fn clear_pending(&self) -> Result<()> {
        let _guard = self.lock_journal()?;
        self.store.set(&self.pending_key, b"[]")
    }

    fn lock_journal(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.journal_lock
            .lock()
            .map_err(|_| TrekError::persistence("pending journal poisoned"))
    }

    fn read_pending(&self) -> Result<Vec<LocationSnapshot>> {
        let Some(bytes) = self.store.get(&self.pending_key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(pending) => Ok(pending),
            Err(e) => {
                warn!("[SessionStore] Discarding unreadable pending journal: {}", e);
                Ok(Vec::new())
            }
        }
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Prepend a completed session, dropping the oldest past the cap.
    ///
    /// Fails without writing if the stored history cannot be read, leaving
    /// the existing bytes in place.
    pub fn append_history(&self, session: &TrackingSession) -> Result<()> {
        let mut history = self.read_history()?;
        history.insert(0, session.clone());
        if history.len() > self.history_limit {
            debug!(
                "[SessionStore] History over limit, dropping {} oldest",
                history.len() - self.history_limit
            );
            history.truncate(self.history_limit);
        }
        let bytes = serde_json::to_vec(&history)?;
        self.store.set(&self.history_key, &bytes)
    }

    /// Completed sessions, newest first.
    ///
    /// History that no longer parses is reported and read as empty. The
    /// stored bytes are left untouched.
    pub fn history(&self) -> Result<Vec<TrackingSession>> {
        let Some(bytes) = self.store.get(&self.history_key)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(history) => Ok(history),
            Err(e) => {
                warn!("[SessionStore] Unreadable history under {}: {}", self.history_key, e);
                Ok(Vec::new())
            }
        }
    }

    fn read_history(&self) -> Result<Vec<TrackingSession>> {
        let Some(bytes) = self.store.get(&self.history_key)? else {
            return Ok(Vec::new());
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            TrekError::persistence(format!("unreadable history under {}: {}", self.history_key, e))
        })
    }
}
