//! Session and message repository
//!
//! Messages are append-only: once written they are never mutated, only
//! bulk-deleted together with their session. Loads are ordered by
//! `(timestamp, rowid)` so ordering stays total even for same-millisecond
//! appends.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Default title given to a freshly created session
pub const DEFAULT_SESSION_TITLE: &str = "New Conversation";

/// Logged once per process when message queries fall back to a full scan
static FULL_SCAN_WARNED: AtomicBool = AtomicBool::new(false);

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// Known message metadata keys, with an escape hatch for everything else
///
/// Kept as a closed set so producers and consumers agree on spelling;
/// unknown keys round-trip through [`MetadataKey::Other`] untouched.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum MetadataKey {
    /// Action the assistant executed while producing this message
    Action,
    /// Attachment reference that accompanied this message
    Attachment,
    /// Voice/speech capture marker
    Voice,
    /// LLM provider that produced this message
    Provider,
    /// Any other key
    Other(String),
}

impl MetadataKey {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Action => "action",
            Self::Attachment => "attachment",
            Self::Voice => "voice",
            Self::Provider => "provider",
            Self::Other(key) => key,
        }
    }

    #[must_use]
    pub fn from_key(s: &str) -> Self {
        match s {
            "action" => Self::Action,
            "attachment" => Self::Attachment,
            "voice" => Self::Voice,
            "provider" => Self::Provider,
            other => Self::Other(other.to_string()),
        }
    }
}

impl Serialize for MetadataKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MetadataKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from_key(&s))
    }
}

/// A message in a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Free-form key/value metadata (action, attachment, ...)
    #[serde(default)]
    pub metadata: BTreeMap<MetadataKey, String>,
}

/// A conversation session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u64,
}

/// Session and message repository
#[derive(Clone)]
pub struct SessionRepo {
    pool: DbPool,
}

impl SessionRepo {
    /// Create a new session repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Create a new session with the default placeholder title
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create(&self) -> Result<Session> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        conn.execute(
            "INSERT INTO sessions (id, title, created_at, last_message_at, message_count)
             VALUES (?1, ?2, ?3, ?3, 0)",
            rusqlite::params![&id, DEFAULT_SESSION_TITLE, &now_str],
        )?;

        Ok(Session {
            id,
            title: DEFAULT_SESSION_TITLE.to_string(),
            created_at: now,
            last_message_at: now,
            message_count: 0,
        })
    }

    /// Get a session by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Session>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT id, title, created_at, last_message_at, message_count
             FROM sessions WHERE id = ?1",
            [id],
            row_to_session,
        );

        match result {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List all sessions, most recently active first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_all(&self) -> Result<Vec<Session>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, title, created_at, last_message_at, message_count
             FROM sessions ORDER BY last_message_at DESC, rowid DESC",
        )?;

        let sessions = stmt
            .query_map([], row_to_session)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(sessions)
    }

    /// Update a session title
    ///
    /// # Errors
    ///
    /// Returns error if the session does not exist
    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let changed = conn.execute("UPDATE sessions SET title = ?1 WHERE id = ?2", [title, id])?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session {id}")));
        }
        Ok(())
    }

    /// Append a message to a session
    ///
    /// Also bumps the session's `last_message_at` and `message_count`,
    /// atomically with the insert.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the session does not exist
    pub fn append_message(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        metadata: BTreeMap<MetadataKey, String>,
    ) -> Result<Message> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let metadata_json = metadata_to_json(&metadata);

        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE sessions SET last_message_at = ?1, message_count = message_count + 1
             WHERE id = ?2",
            [&now_str, session_id],
        )?;
        if changed == 0 {
            return Err(Error::NotFound(format!("session {session_id}")));
        }

        tx.execute(
            "INSERT INTO messages (id, session_id, role, content, timestamp, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![&id, session_id, role.as_str(), content, &now_str, &metadata_json],
        )?;

        tx.commit()?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: now,
            metadata,
        })
    }

    /// Load a session's messages in chronological order
    ///
    /// `limit` keeps only the most recent N messages (still returned
    /// oldest-first). Uses the `(session_id, timestamp)` index when
    /// present; otherwise falls back to a full scan filtered in memory —
    /// functionally identical, just slower, and logged once per process.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn load_messages(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut messages = if session_time_index_exists(&conn) {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, timestamp, metadata
                 FROM messages WHERE session_id = ?1
                 ORDER BY timestamp, rowid",
            )?;
            stmt.query_map([session_id], row_to_message)?
                .filter_map(std::result::Result::ok)
                .collect::<Vec<_>>()
        } else {
            if !FULL_SCAN_WARNED.swap(true, Ordering::Relaxed) {
                tracing::warn!("message index missing, using full-scan fallback");
            }
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, timestamp, metadata
                 FROM messages ORDER BY timestamp, rowid",
            )?;
            stmt.query_map([], row_to_message)?
                .filter_map(std::result::Result::ok)
                .filter(|m| m.session_id == session_id)
                .collect::<Vec<_>>()
        };

        if let Some(n) = limit
            && messages.len() > n
        {
            messages.drain(..messages.len() - n);
        }

        Ok(messages)
    }

    /// Count messages in a session
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn message_count(&self, session_id: &str) -> Result<u64> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
            [session_id],
            |row| row.get(0),
        )?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Delete a session together with its messages and topic context
    ///
    /// Idempotent: deleting a session that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_cascade(&self, session_id: &str) -> Result<()> {
        let mut conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let tx = conn.transaction()?;
        tx.execute("DELETE FROM messages WHERE session_id = ?1", [session_id])?;
        tx.execute(
            "DELETE FROM conversation_contexts WHERE session_id = ?1",
            [session_id],
        )?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
        tx.commit()?;

        Ok(())
    }
}

fn session_time_index_exists(conn: &rusqlite::Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_messages_session_time'",
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
    .unwrap_or(false)
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: parse_datetime(&row.get::<_, String>(2)?),
        last_message_at: parse_datetime(&row.get::<_, String>(3)?),
        message_count: u64::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::from_str(&row.get::<_, String>(2)?).unwrap_or(Role::User),
        content: row.get(3)?,
        timestamp: parse_datetime(&row.get::<_, String>(4)?),
        metadata: metadata_from_json(&row.get::<_, String>(5)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn metadata_to_json(metadata: &BTreeMap<MetadataKey, String>) -> String {
    let map: serde_json::Map<String, serde_json::Value> = metadata
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), serde_json::Value::String(v.clone())))
        .collect();
    serde_json::Value::Object(map).to_string()
}

fn metadata_from_json(raw: &str) -> BTreeMap<MetadataKey, String> {
    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(raw)
        .map(|map| {
            map.into_iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (MetadataKey::from_key(&k), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}
