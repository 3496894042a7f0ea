//! Database schema and migrations
//!
//! Migrations are an ordered list of named, idempotent steps. The stored
//! `PRAGMA user_version` selects where to resume; each step is applied in
//! sequence and the version is bumped after it succeeds. A failing step
//! aborts with [`Error::Migration`] — the store refuses to operate on a
//! schema it cannot safely interpret.

use rusqlite::Connection;

use crate::{Error, Result};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 4;

/// A single forward-only migration step
pub struct Migration {
    /// Version this step migrates the store *to*
    pub version: i32,
    /// Short name used in logs and error messages
    pub name: &'static str,
    /// The step itself; must be idempotent
    pub apply: fn(&Connection) -> Result<()>,
}

/// All migrations, oldest first
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "core tables",
        apply: migrate_v1,
    },
    Migration {
        version: 2,
        name: "conversation contexts",
        apply: migrate_v2,
    },
    Migration {
        version: 3,
        name: "settings",
        apply: migrate_v3,
    },
    Migration {
        version: 4,
        name: "message metadata",
        apply: migrate_v4,
    },
];

/// Initialize the database schema
///
/// # Errors
///
/// Returns [`Error::Migration`] if a step fails or the on-disk version is
/// newer than this build supports
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version > SCHEMA_VERSION {
        return Err(Error::Migration(format!(
            "store schema v{version} is newer than supported v{SCHEMA_VERSION}"
        )));
    }

    for migration in MIGRATIONS {
        if version >= migration.version {
            continue;
        }
        (migration.apply)(conn).map_err(|e| {
            Error::Migration(format!("step '{}' (v{}): {e}", migration.name, migration.version))
        })?;
        conn.pragma_update(None, "user_version", migration.version)
            .map_err(|e| Error::Migration(format!("bumping user_version: {e}")))?;
        tracing::info!(version = migration.version, step = migration.name, "applied schema migration");
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Sessions table
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL DEFAULT 'New Conversation',
            created_at TEXT NOT NULL,
            last_message_at TEXT NOT NULL,
            message_count INTEGER NOT NULL DEFAULT 0
        );

        -- Messages table (append-only)
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES sessions(id),
            role TEXT NOT NULL CHECK(role IN ('user', 'assistant')),
            content TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

        -- Long-lived user facts, independent of any session
        CREATE TABLE IF NOT EXISTS facts (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            category TEXT NOT NULL CHECK(category IN ('personal', 'preference', 'context', 'other')),
            confidence REAL NOT NULL DEFAULT 1.0,
            created_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- One serialized topic-tracking snapshot per session
        CREATE TABLE IF NOT EXISTS conversation_contexts (
            session_id TEXT PRIMARY KEY REFERENCES sessions(id),
            data TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Key/value settings (current-session pointer and friends)
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn migrate_v4(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "messages", "metadata")? {
        conn.execute_batch("ALTER TABLE messages ADD COLUMN metadata TEXT NOT NULL DEFAULT '{}';")?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_session_time ON messages(session_id, timestamp);",
    )?;
    Ok(())
}

/// Check whether `table` has a column named `column`
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_init() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();

        let count: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='sessions'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_schema_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        init(&conn).unwrap(); // Should not fail
    }

    #[test]
    fn test_upgrade_from_v1_preserves_rows() {
        let conn = Connection::open_in_memory().unwrap();

        // Simulate an old install stopped at v1
        migrate_v1(&conn).unwrap();
        conn.pragma_update(None, "user_version", 1).unwrap();
        conn.execute(
            "INSERT INTO sessions (id, title, created_at, last_message_at) VALUES ('s1', 'Old chat', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO messages (id, session_id, role, content, timestamp) VALUES ('m1', 's1', 'user', 'hello', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        init(&conn).unwrap();

        let version: i32 = conn
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);

        // Old rows survive and pick up the new metadata column default
        let metadata: String = conn
            .query_row("SELECT metadata FROM messages WHERE id = 'm1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(metadata, "{}");

        let title: String = conn
            .query_row("SELECT title FROM sessions WHERE id = 's1'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(title, "Old chat");
    }

    #[test]
    fn test_refuses_future_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "user_version", SCHEMA_VERSION + 1).unwrap();

        let err = init(&conn).unwrap_err();
        assert!(matches!(err, Error::Migration(_)));
    }

    #[test]
    fn test_migrations_are_ordered() {
        let mut last = 0;
        for m in MIGRATIONS {
            assert!(m.version > last, "migrations must be strictly increasing");
            last = m.version;
        }
        assert_eq!(last, SCHEMA_VERSION);
    }

    #[test]
    fn test_individual_steps_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        for m in MIGRATIONS {
            (m.apply)(&conn).unwrap();
            (m.apply)(&conn).unwrap();
        }
    }
}
