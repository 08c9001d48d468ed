//! SQLite-backed key-value store.
//!
//! A single `kv` table holding serialized snapshots. Use it as the
//! [`KeyValueStore`] for [`SessionStore`](crate::SessionStore) when the host
//! has no storage of its own.

use std::sync::Mutex;

use log::info;
use rusqlite::{params, Connection, OptionalExtension};

use crate::store::KeyValueStore;
use crate::{Result, TrekError};

/// Key-value store persisted in a SQLite database file.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        info!("[SqliteStore] Opened {}", db_path);
        Ok(Self { db: Mutex::new(db) })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
        "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| TrekError::persistence("database connection poisoned"))
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value, updated_at) VALUES (?, ?, strftime('%s', 'now'))",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::LocationSnapshot;
    use crate::store::SessionStore;
    use crate::{TrackingSession, TrekSubject};
    use chrono::Utc;
    use std::sync::Arc;

    #[test]
    fn test_get_set() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.get("@trek_tracking_data").unwrap(), None);

        store.set("@trek_tracking_data", b"first").unwrap();
        store.set("@trek_tracking_data", b"second").unwrap();
        assert_eq!(
            store.get("@trek_tracking_data").unwrap(),
            Some(b"second".to_vec())
        );
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trek.db");
        let path = path.to_str().unwrap();

        let now = Utc::now();
        let session = TrackingSession::begin(
            &TrekSubject::new("harishchandragad", "Harishchandragad"),
            &LocationSnapshot::real(19.3860, 73.7780).with_altitude(1424.0).at(now),
            false,
            now,
        );

        {
            let store = SessionStore::new(
                Arc::new(SqliteStore::new(path).unwrap()),
                "@trek_tracking_data",
                "@completed_treks",
                100,
            );
            store.save_active(&session).unwrap();
        }

        let reopened = SessionStore::new(
            Arc::new(SqliteStore::new(path).unwrap()),
            "@trek_tracking_data",
            "@completed_treks",
            100,
        );
        assert_eq!(reopened.load_active().unwrap(), Some(session));
    }
}
