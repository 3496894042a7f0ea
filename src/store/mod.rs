//! Persistent store for sessions, messages, facts, and topic contexts
//!
//! A thin wrapper over a pooled `SQLite` connection. Opening the store
//! runs schema migrations; if the database engine itself cannot be opened
//! (host policy, unreadable path), the store degrades to an in-memory
//! engine backed by a flat JSON file so the assistant keeps working with
//! reduced durability. Migration failures are never downgraded — a store
//! whose schema cannot be interpreted refuses to open.

pub mod context;
pub mod fact;
pub mod schema;
pub mod session;

use std::path::{Path, PathBuf};

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde::Serialize;

use crate::{Error, Result};

pub use context::ContextRepo;
pub use fact::{Fact, FactCategory, FactRepo};
pub use schema::SCHEMA_VERSION;
pub use session::{Message, MetadataKey, Role, Session, SessionRepo};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// How the store is persisted
#[derive(Debug, Clone)]
pub enum StorageMode {
    /// File-backed `SQLite`, full durability
    Durable,
    /// In-memory engine with a best-effort flat JSON backup file
    Degraded {
        /// Where checkpoint snapshots are written
        backup_path: PathBuf,
    },
}

/// Handle to the persistent store
#[derive(Clone)]
pub struct Store {
    pool: DbPool,
    mode: StorageMode,
}

impl Store {
    /// Open (or create) the store at `path`
    ///
    /// Falls back to degraded in-memory mode if the database engine is
    /// unavailable; the fallback is logged once and visible through
    /// [`Store::degraded`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Migration`] if the schema cannot be migrated —
    /// that failure is fatal and never masked by the fallback.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            // Ignored on purpose: if this fails the open below fails too
            let _ = std::fs::create_dir_all(parent);
        }

        match open_durable(path) {
            Ok(pool) => {
                tracing::info!(version = SCHEMA_VERSION, path = %path.display(), "store opened");
                Ok(Self { pool, mode: StorageMode::Durable })
            }
            Err(e @ Error::Migration(_)) => Err(e),
            Err(e) => {
                let backup_path = path.with_extension("backup.json");
                tracing::warn!(
                    error = %e,
                    backup = %backup_path.display(),
                    "database engine unavailable, falling back to in-memory store"
                );
                let pool = open_memory_pool()?;
                Ok(Self {
                    pool,
                    mode: StorageMode::Degraded { backup_path },
                })
            }
        }
    }

    /// Open an in-memory store (for tests and ephemeral use)
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be initialized
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            pool: open_memory_pool()?,
            mode: StorageMode::Durable,
        })
    }

    /// Connection pool for repositories
    #[must_use]
    pub const fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Whether the store is running in degraded (in-memory) mode
    #[must_use]
    pub const fn degraded(&self) -> bool {
        matches!(self.mode, StorageMode::Degraded { .. })
    }

    /// Write a flat JSON snapshot of all collections in degraded mode
    ///
    /// No-op in durable mode. Failures are logged, never propagated — the
    /// backup is best-effort by design.
    pub fn checkpoint(&self) {
        let StorageMode::Degraded { backup_path } = &self.mode else {
            return;
        };
        if let Err(e) = self.write_backup(backup_path) {
            tracing::warn!(error = %e, path = %backup_path.display(), "backup snapshot failed");
        }
    }

    fn write_backup(&self, path: &Path) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let sessions = collect_rows(
            &conn,
            "SELECT id, title, created_at, last_message_at, message_count FROM sessions",
            |row| {
                Ok(SessionBackup {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    created_at: row.get(2)?,
                    last_message_at: row.get(3)?,
                    message_count: row.get(4)?,
                })
            },
        )?;

        let messages = collect_rows(
            &conn,
            "SELECT id, session_id, role, content, timestamp, metadata FROM messages ORDER BY timestamp, rowid",
            |row| {
                Ok(MessageBackup {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    role: row.get(2)?,
                    content: row.get(3)?,
                    timestamp: row.get(4)?,
                    metadata: row.get(5)?,
                })
            },
        )?;

        let facts = collect_rows(
            &conn,
            "SELECT id, content, category, confidence, created_at FROM facts",
            |row| {
                Ok(FactBackup {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    category: row.get(2)?,
                    confidence: row.get(3)?,
                    created_at: row.get(4)?,
                })
            },
        )?;

        let contexts = collect_rows(
            &conn,
            "SELECT session_id, data, updated_at FROM conversation_contexts",
            |row| {
                Ok(ContextBackup {
                    session_id: row.get(0)?,
                    data: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            },
        )?;

        let snapshot = BackupSnapshot {
            schema_version: SCHEMA_VERSION,
            sessions,
            messages,
            facts,
            contexts,
        };

        // Write-then-rename so a crash mid-write never truncates the last
        // good snapshot
        let tmp = path.with_extension("backup.json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

fn open_durable(path: &Path) -> Result<DbPool> {
    // Probe with a direct connection first: an unopenable path fails
    // immediately here, where the pool builder would retry until its
    // connection timeout
    rusqlite::Connection::open(path).map_err(|e| Error::Database(e.to_string()))?;

    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(4)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;
    Ok(pool)
}

fn open_memory_pool() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    // A single connection: separate in-memory connections would each see
    // their own empty database
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;
    Ok(pool)
}

fn collect_rows<T>(
    conn: &rusqlite::Connection,
    sql: &str,
    map: impl Fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], map)?
        .filter_map(std::result::Result::ok)
        .collect();
    Ok(rows)
}

#[derive(Serialize)]
struct BackupSnapshot {
    schema_version: i32,
    sessions: Vec<SessionBackup>,
    messages: Vec<MessageBackup>,
    facts: Vec<FactBackup>,
    contexts: Vec<ContextBackup>,
}

#[derive(Serialize)]
struct SessionBackup {
    id: String,
    title: String,
    created_at: String,
    last_message_at: String,
    message_count: i64,
}

#[derive(Serialize)]
struct MessageBackup {
    id: String,
    session_id: String,
    role: String,
    content: String,
    timestamp: String,
    metadata: String,
}

#[derive(Serialize)]
struct FactBackup {
    id: String,
    content: String,
    category: String,
    confidence: f64,
    created_at: String,
}

#[derive(Serialize)]
struct ContextBackup {
    session_id: String,
    data: String,
    updated_at: String,
}
