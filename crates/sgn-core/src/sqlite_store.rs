//! SQLite-backed pending authorization store.
//!
//! Entries survive restarts. The session and request are stored as JSON
//! columns; ordering comes from a monotonically increasing `seq`.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::errors::CoreError;
use crate::pending::{cache_key, PendingAuthorization, PendingStore};
use crate::types::{Request, Session};

// ============================================================================
// Schema Version
// ============================================================================

const SCHEMA_VERSION: i32 = 1;

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> CoreError + '_ {
    move |e| CoreError::Storage(format!("{}: {}", context, e))
}

pub struct SqlitePendingStore {
    conn: Mutex<Connection>,
}

impl SqlitePendingStore {
    /// Open or create the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(storage_err("failed to open database"))?;
        // Other agent processes may hold the write lock briefly.
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(storage_err("failed to set busy timeout"))?;

        // WAL keeps readers off the writer's back.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(storage_err("failed to set pragmas"))?;

        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn new_in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("failed to open in-memory database"))?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<(), CoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )
        .map_err(storage_err("failed to create schema_version"))?;

        let current: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .map_err(storage_err("failed to read schema version"))?;

        if current > SCHEMA_VERSION {
            return Err(CoreError::Storage(format!(
                "database schema v{} is newer than supported v{}",
                current, SCHEMA_VERSION
            )));
        }
        if current < 1 {
            Self::migrate_v1(conn)?;
        }
        Ok(())
    }

    fn migrate_v1(conn: &Connection) -> Result<(), CoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending_authorizations (
                cache_key TEXT PRIMARY KEY,
                session_json TEXT NOT NULL,
                request_json TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                seq INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_expires ON pending_authorizations(expires_at);
            CREATE INDEX IF NOT EXISTS idx_pending_seq ON pending_authorizations(seq);

            INSERT INTO schema_version (version) VALUES (1);
            "#,
        )
        .map_err(storage_err("migration v1 failed"))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn decode_row(
        session_json: &str,
        request_json: &str,
        expires_at: i64,
    ) -> Result<PendingAuthorization, CoreError> {
        let session: Session = serde_json::from_str(session_json)
            .map_err(|e| CoreError::Storage(format!("corrupt session column: {}", e)))?;
        let request: Request = serde_json::from_str(request_json)
            .map_err(|e| CoreError::Storage(format!("corrupt request column: {}", e)))?;
        Ok(PendingAuthorization {
            session,
            request,
            expires_at: expires_at.max(0) as u64,
        })
    }
}

fn to_sql_time(t: u64) -> i64 {
    i64::try_from(t).unwrap_or(i64::MAX)
}

impl PendingStore for SqlitePendingStore {
    fn add(
        &self,
        session: &Session,
        request: &Request,
        now: u64,
        ttl: u64,
    ) -> Result<(), CoreError> {
        let session_json = serde_json::to_string(session)
            .map_err(|e| CoreError::StorageWriteFailed(e.to_string()))?;
        let request_json = serde_json::to_string(request)
            .map_err(|e| CoreError::StorageWriteFailed(e.to_string()))?;
        let expires_at = to_sql_time(now.saturating_add(ttl));

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO pending_authorizations (cache_key, session_json, request_json, expires_at, seq)
            VALUES (?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(seq), 0) + 1 FROM pending_authorizations))
            ON CONFLICT(cache_key) DO UPDATE SET
                session_json = excluded.session_json,
                request_json = excluded.request_json,
                expires_at = excluded.expires_at,
                seq = excluded.seq
            "#,
            params![
                cache_key(&session.id, &request.id),
                session_json,
                request_json,
                expires_at
            ],
        )
        .map_err(|e| CoreError::StorageWriteFailed(e.to_string()))?;
        debug!(session_id = %session.id, request_id = %request.id, "pending authorization stored");
        Ok(())
    }

    fn remove(&self, session_id: &str, request_id: &str) -> Result<bool, CoreError> {
        let conn = self.lock();
        let rows = conn
            .execute(
                "DELETE FROM pending_authorizations WHERE cache_key = ?1",
                params![cache_key(session_id, request_id)],
            )
            .map_err(storage_err("failed to remove pending authorization"))?;
        Ok(rows > 0)
    }

    fn take(&self, key: &str) -> Result<Option<PendingAuthorization>, CoreError> {
        let mut conn = self.lock();
        // Take the write lock up front so two processes cannot both read the row.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(storage_err("failed to begin transaction"))?;

        let row: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT session_json, request_json, expires_at FROM pending_authorizations WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(storage_err("failed to read pending authorization"))?;

        let Some((session_json, request_json, expires_at)) = row else {
            return Ok(None);
        };

        tx.execute(
            "DELETE FROM pending_authorizations WHERE cache_key = ?1",
            params![key],
        )
        .map_err(storage_err("failed to delete pending authorization"))?;
        tx.commit()
            .map_err(storage_err("failed to commit take"))?;

        Self::decode_row(&session_json, &request_json, expires_at).map(Some)
    }

    fn purge_expired(&self, now: u64) -> Result<usize, CoreError> {
        let conn = self.lock();
        let purged = conn
            .execute(
                "DELETE FROM pending_authorizations WHERE expires_at <= ?1",
                params![to_sql_time(now)],
            )
            .map_err(storage_err("failed to purge expired entries"))?;
        if purged > 0 {
            debug!(purged, "expired pending authorizations dropped");
        }
        Ok(purged)
    }

    fn live(&self, now: u64) -> Result<Vec<PendingAuthorization>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT session_json, request_json, expires_at FROM pending_authorizations
                 WHERE expires_at > ?1 ORDER BY seq ASC",
            )
            .map_err(storage_err("failed to prepare query"))?;

        let rows = stmt
            .query_map(params![to_sql_time(now)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(storage_err("failed to query pending authorizations"))?;

        let mut out = Vec::new();
        for row in rows {
            let (session_json, request_json, expires_at) =
                row.map_err(storage_err("failed to read row"))?;
            out.push(Self::decode_row(&session_json, &request_json, expires_at)?);
        }
        Ok(out)
    }
}
