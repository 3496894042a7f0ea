//! Per-session conversation context persistence
//!
//! The topic tracker's state is serialized as one JSON row per session so
//! topic awareness survives process restarts. Rows are deleted together
//! with their session.

use chrono::Utc;

use super::DbPool;
use crate::topic::ConversationContext;
use crate::{Error, Result};

/// Conversation context repository
#[derive(Clone)]
pub struct ContextRepo {
    pool: DbPool,
}

impl ContextRepo {
    /// Create a new context repository
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert or replace the context snapshot for a session
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the database operation fails
    pub fn upsert(&self, session_id: &str, context: &ConversationContext) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let data = serde_json::to_string(context)?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO conversation_contexts (session_id, data, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id)
             DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
            rusqlite::params![session_id, &data, &now],
        )?;

        Ok(())
    }

    /// Load the context snapshot for a session, if any
    ///
    /// A snapshot that no longer deserializes (written by a future build)
    /// is treated as absent rather than an error.
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn load(&self, session_id: &str) -> Result<Option<ConversationContext>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT data FROM conversation_contexts WHERE session_id = ?1",
            [session_id],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(context) => Ok(Some(context)),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "discarding unreadable context snapshot");
                    Ok(None)
                }
            },
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the context snapshot for a session (no-op when absent)
    ///
    /// # Errors
    ///
    /// Returns error if the database operation fails
    pub fn delete(&self, session_id: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "DELETE FROM conversation_contexts WHERE session_id = ?1",
            [session_id],
        )?;
        Ok(())
    }
}
