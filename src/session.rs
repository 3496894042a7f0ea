//! Session manager: the current-session pointer and session lifecycle
//!
//! The "current session" is an explicit persisted pointer (a `settings`
//! row) owned by this manager — no ambient globals — so it survives
//! restarts and multiple managers can be tested side by side.

use crate::store::session::DEFAULT_SESSION_TITLE;
use crate::store::{DbPool, Session, SessionRepo};
use crate::{Error, Result};

const CURRENT_SESSION_KEY: &str = "current_session";

/// Resolves, creates and switches the current conversation session
#[derive(Clone)]
pub struct SessionManager {
    repo: SessionRepo,
    pool: DbPool,
    title_max_chars: usize,
}

impl SessionManager {
    /// Create a session manager over the store pool
    #[must_use]
    pub fn new(pool: DbPool, title_max_chars: usize) -> Self {
        Self {
            repo: SessionRepo::new(pool.clone()),
            pool,
            title_max_chars,
        }
    }

    /// The underlying session repository
    #[must_use]
    pub const fn repo(&self) -> &SessionRepo {
        &self.repo
    }

    /// Id of the current session, if one exists
    ///
    /// A pointer to a session that no longer exists (deleted elsewhere) is
    /// cleared and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn current_session_id(&self) -> Result<Option<String>> {
        let Some(id) = self.get_setting(CURRENT_SESSION_KEY)? else {
            return Ok(None);
        };

        if self.repo.get(&id)?.is_none() {
            tracing::debug!(session_id = %id, "clearing dangling current-session pointer");
            self.delete_setting(CURRENT_SESSION_KEY)?;
            return Ok(None);
        }

        Ok(Some(id))
    }

    /// Create a new session (does not change the current pointer)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn create_session(&self) -> Result<Session> {
        self.repo.create()
    }

    /// Make an existing session current
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the session does not exist
    pub fn set_current(&self, id: &str) -> Result<()> {
        if self.repo.get(id)?.is_none() {
            return Err(Error::NotFound(format!("session {id}")));
        }
        self.set_setting(CURRENT_SESSION_KEY, id)
    }

    /// Return the current session, creating one if none exists
    ///
    /// Idempotent: repeated calls without an intervening switch return the
    /// same session, also across restarts.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn continue_or_create(&self) -> Result<Session> {
        if let Some(id) = self.current_session_id()?
            && let Some(session) = self.repo.get(&id)?
        {
            return Ok(session);
        }

        let session = self.repo.create()?;
        self.set_setting(CURRENT_SESSION_KEY, &session.id)?;
        tracing::info!(session_id = %session.id, "started new session");
        Ok(session)
    }

    /// Create a fresh session and make it current, leaving the previous
    /// session untouched
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn switch_to_new(&self) -> Result<Session> {
        let session = self.repo.create()?;
        self.set_setting(CURRENT_SESSION_KEY, &session.id)?;
        tracing::info!(session_id = %session.id, "switched to new session");
        Ok(session)
    }

    /// Drop the current pointer if it targets `id` (used on delete)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear_current_if(&self, id: &str) -> Result<()> {
        if self.get_setting(CURRENT_SESSION_KEY)?.as_deref() == Some(id) {
            self.delete_setting(CURRENT_SESSION_KEY)?;
        }
        Ok(())
    }

    /// Title a session from its first user message
    ///
    /// Applies only while the title is still the default placeholder and
    /// exactly one message has been recorded; returns the assigned title.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn maybe_autotitle(&self, session_id: &str, content: &str) -> Result<Option<String>> {
        let Some(session) = self.repo.get(session_id)? else {
            return Ok(None);
        };

        if session.title != DEFAULT_SESSION_TITLE || session.message_count != 1 {
            return Ok(None);
        }

        let title = truncate_title(content, self.title_max_chars);
        if title.is_empty() {
            return Ok(None);
        }

        self.repo.set_title(session_id, &title)?;
        Ok(Some(title))
    }

    fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        let result = conn.query_row("SELECT value FROM settings WHERE key = ?1", [key], |row| {
            row.get::<_, String>(0)
        });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [key, value],
        )?;
        Ok(())
    }

    fn delete_setting(&self, key: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;
        conn.execute("DELETE FROM settings WHERE key = ?1", [key])?;
        Ok(())
    }
}

/// Truncate a message into a session title, on a char boundary
fn truncate_title(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        trimmed.chars().take(max_chars).collect::<String>().trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::store::{Role, Store};

    fn setup() -> (Store, SessionManager) {
        let store = Store::in_memory().unwrap();
        let manager = SessionManager::new(store.pool().clone(), 60);
        (store, manager)
    }

    #[test]
    fn test_continue_or_create_idempotent() {
        let (_store, manager) = setup();

        assert!(manager.current_session_id().unwrap().is_none());

        let first = manager.continue_or_create().unwrap();
        let second = manager.continue_or_create().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(manager.current_session_id().unwrap(), Some(first.id));
    }

    #[test]
    fn test_pointer_survives_new_manager() {
        let (store, manager) = setup();
        let session = manager.continue_or_create().unwrap();

        // A second manager over the same store sees the same pointer
        let other = SessionManager::new(store.pool().clone(), 60);
        assert_eq!(other.continue_or_create().unwrap().id, session.id);
    }

    #[test]
    fn test_switch_to_new_preserves_old() {
        let (_store, manager) = setup();
        let first = manager.continue_or_create().unwrap();
        let second = manager.switch_to_new().unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(manager.current_session_id().unwrap(), Some(second.id));
        assert!(manager.repo().get(&first.id).unwrap().is_some());
        assert_eq!(manager.repo().list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_set_current_requires_existing_session() {
        let (_store, manager) = setup();
        assert!(matches!(manager.set_current("ghost"), Err(Error::NotFound(_))));

        let session = manager.create_session().unwrap();
        manager.set_current(&session.id).unwrap();
        assert_eq!(manager.current_session_id().unwrap(), Some(session.id));
    }

    #[test]
    fn test_dangling_pointer_cleared() {
        let (_store, manager) = setup();
        let session = manager.continue_or_create().unwrap();

        manager.repo().delete_cascade(&session.id).unwrap();
        assert!(manager.current_session_id().unwrap().is_none());

        // A fresh session takes over
        let next = manager.continue_or_create().unwrap();
        assert_ne!(next.id, session.id);
    }

    #[test]
    fn test_autotitle_from_first_user_message() {
        let (_store, manager) = setup();
        let session = manager.continue_or_create().unwrap();

        manager
            .repo()
            .append_message(
                &session.id,
                Role::User,
                "Hey, can you help me with my resume?",
                BTreeMap::new(),
            )
            .unwrap();

        let title = manager
            .maybe_autotitle(&session.id, "Hey, can you help me with my resume?")
            .unwrap();
        assert_eq!(title.as_deref(), Some("Hey, can you help me with my resume?"));

        let updated = manager.repo().get(&session.id).unwrap().unwrap();
        assert_eq!(updated.title, "Hey, can you help me with my resume?");
        assert_eq!(updated.message_count, 1);
    }

    #[test]
    fn test_autotitle_truncates_long_message() {
        let (_store, manager) = setup();
        let session = manager.continue_or_create().unwrap();

        let long = "a".repeat(200);
        manager
            .repo()
            .append_message(&session.id, Role::User, &long, BTreeMap::new())
            .unwrap();

        let title = manager.maybe_autotitle(&session.id, &long).unwrap().unwrap();
        assert_eq!(title.chars().count(), 60);
    }

    #[test]
    fn test_autotitle_applies_only_once() {
        let (_store, manager) = setup();
        let session = manager.continue_or_create().unwrap();

        manager
            .repo()
            .append_message(&session.id, Role::User, "first", BTreeMap::new())
            .unwrap();
        manager.maybe_autotitle(&session.id, "first").unwrap();

        manager
            .repo()
            .append_message(&session.id, Role::User, "second", BTreeMap::new())
            .unwrap();
        assert!(manager.maybe_autotitle(&session.id, "second").unwrap().is_none());

        assert_eq!(manager.repo().get(&session.id).unwrap().unwrap().title, "first");
    }
}
