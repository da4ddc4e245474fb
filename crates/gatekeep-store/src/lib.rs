//! gatekeep-store — SQLite persistence for enrolled identities and the access log.
//!
//! Embeddings are stored as JSON arrays so the database stays readable with
//! the stock `sqlite3` shell.

use gatekeep_core::{AccessAttempt, AttemptResult, Embedding, Identity, IdentityBackend, StoreError};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("embedding encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection lock poisoned")]
    Poisoned,
}

impl From<DbError> for StoreError {
    fn from(e: DbError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Database location shared by the daemon and the CLI.
///
/// `GATEKEEP_DB_PATH` wins; otherwise `$XDG_DATA_HOME/gatekeep/gatekeep.db`,
/// falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    resolve_db_path(
        std::env::var_os("GATEKEEP_DB_PATH").map(PathBuf::from),
        std::env::var_os("XDG_DATA_HOME").map(PathBuf::from),
        std::env::var_os("HOME").map(PathBuf::from),
    )
}

fn resolve_db_path(explicit: Option<PathBuf>, xdg_data: Option<PathBuf>, home: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    let data_dir = xdg_data.unwrap_or_else(|| {
        home.unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local/share")
    });
    data_dir.join("gatekeep").join("gatekeep.db")
}

/// Identity store and access log in one SQLite file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        tracing::debug!(path = %path.display(), "identity database opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.lock()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                embeddings TEXT NOT NULL,
                card_reference_text TEXT NOT NULL DEFAULT '',
                card_embeddings TEXT NOT NULL DEFAULT '[]',
                enrolled_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS access_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                identity_id TEXT,
                display_name TEXT,
                result TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_access_log_recorded_at ON access_log(recorded_at);",
        )?;
        Ok(())
    }

    pub fn identities(&self) -> Result<Vec<Identity>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, display_name, embeddings, card_reference_text, card_embeddings
             FROM identities ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, display_name, embeddings, card_reference_text, card_embeddings) = row?;
            out.push(Identity {
                embeddings: decode_embeddings(&embeddings)?,
                card_embeddings: decode_embeddings(&card_embeddings)?,
                id,
                display_name,
                card_reference_text,
            });
        }
        Ok(out)
    }

    pub fn get(&self, id: &str) -> Result<Option<Identity>, DbError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT display_name, embeddings, card_reference_text, card_embeddings
                 FROM identities WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(display_name, embeddings, card_reference_text, card_embeddings)| {
            Ok(Identity {
                id: id.to_string(),
                display_name,
                embeddings: decode_embeddings(&embeddings)?,
                card_reference_text,
                card_embeddings: decode_embeddings(&card_embeddings)?,
            })
        })
        .transpose()
    }

    /// Insert or replace an identity wholesale.
    pub fn put(&self, identity: &Identity) -> Result<(), DbError> {
        let embeddings = serde_json::to_string(&identity.embeddings)?;
        let card_embeddings = serde_json::to_string(&identity.card_embeddings)?;
        self.lock()?.execute(
            "INSERT OR REPLACE INTO identities
             (id, display_name, embeddings, card_reference_text, card_embeddings, enrolled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.id,
                identity.display_name,
                embeddings,
                identity.card_reference_text,
                card_embeddings,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        tracing::info!(id = %identity.id, embeddings = identity.embeddings.len(), "identity enrolled");
        Ok(())
    }

    /// Remove an identity. Returns whether it existed.
    pub fn remove(&self, id: &str) -> Result<bool, DbError> {
        let n = self
            .lock()?
            .execute("DELETE FROM identities WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    pub fn append_attempt(&self, attempt: &AccessAttempt) -> Result<(), DbError> {
        self.lock()?.execute(
            "INSERT INTO access_log (identity_id, display_name, result, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                attempt.identity_id,
                attempt.display_name,
                attempt.result.as_str(),
                attempt.timestamp,
            ],
        )?;
        Ok(())
    }

    /// Most recent attempts first.
    pub fn recent_attempts(&self, limit: usize) -> Result<Vec<AccessAttempt>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT identity_id, display_name, result, recorded_at
             FROM access_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (identity_id, display_name, result, timestamp) = row?;
            let result = result.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "unrecognised access log result");
                AttemptResult::Denied
            });
            out.push(AccessAttempt {
                identity_id,
                display_name,
                result,
                timestamp,
            });
        }
        Ok(out)
    }
}

fn decode_embeddings(json: &str) -> Result<Vec<Embedding>, DbError> {
    Ok(serde_json::from_str(json)?)
}

impl IdentityBackend for SqliteStore {
    fn list_all(&self) -> Result<Vec<Identity>, StoreError> {
        Ok(self.identities()?)
    }

    fn upsert(&self, identity: &Identity) -> Result<(), StoreError> {
        Ok(self.put(identity)?)
    }

    fn log_attempt(&self, attempt: &AccessAttempt) -> Result<(), StoreError> {
        Ok(self.append_attempt(attempt)?)
    }
}
