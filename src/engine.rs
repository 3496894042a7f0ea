//! The turn engine: exposed interface over store, sessions, topics and
//! context assembly
//!
//! One turn flows: resolve session, append the user message, update topic
//! state (or honor a reset phrase), persist the topic snapshot, assemble
//! the bounded context, call the LLM client, append the reply. Mutations
//! for a given session are expected to be serialized by the caller;
//! different sessions are independent.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::Config;
use crate::context::{ContextAssembler, ExternalFragments};
use crate::llm::LlmClient;
use crate::session::SessionManager;
use crate::store::{
    ContextRepo, Fact, FactCategory, FactRepo, Message, Role, Session, SessionRepo, Store,
};
use crate::topic::{TopicClassifier, TopicTracker};
use crate::{Error, Result};

/// Result of one conversation turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub session_id: String,
    pub assistant_text: String,
    /// Whether this turn started a different topic
    pub topic_changed: bool,
    /// Label currently being tracked, if any
    pub current_topic: Option<String>,
    /// One line per remembered recent topic
    pub recent_topics_summary: Vec<String>,
}

/// Conversation memory and context engine
pub struct Engine {
    store: Store,
    sessions: SessionRepo,
    facts: FactRepo,
    contexts: ContextRepo,
    manager: SessionManager,
    classifier: TopicClassifier,
    assembler: ContextAssembler,
    llm: Arc<dyn LlmClient>,
    default_personality: String,
    history_limit: usize,
    /// Rehydrated topic trackers, one per active session
    trackers: Mutex<HashMap<String, TopicTracker>>,
}

impl Engine {
    /// Wire an engine over an opened store
    #[must_use]
    pub fn new(
        store: Store,
        config: &Config,
        classifier: TopicClassifier,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        let pool = store.pool().clone();
        Self {
            sessions: SessionRepo::new(pool.clone()),
            facts: FactRepo::new(pool.clone()),
            contexts: ContextRepo::new(pool.clone()),
            manager: SessionManager::new(pool, config.title_max_chars),
            classifier,
            assembler: ContextAssembler::new(config.budgets.clone()),
            llm,
            default_personality: config.default_personality.clone(),
            history_limit: config.history_limit,
            trackers: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Whether the store runs in degraded (in-memory) mode
    #[must_use]
    pub const fn degraded(&self) -> bool {
        self.store.degraded()
    }

    /// Session manager, for callers that handle the current pointer
    #[must_use]
    pub const fn session_manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Run one conversation turn
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session, or the LLM
    /// client's error. Classification failures never surface here — the
    /// adapter degrades to the catch-all topic.
    pub async fn send_turn(
        &self,
        session_id: &str,
        text: &str,
        fragments: &ExternalFragments,
    ) -> Result<TurnOutcome> {
        if self.sessions.get(session_id)?.is_none() {
            return Err(Error::NotFound(format!("session {session_id}")));
        }

        // History is captured before the append so the current message
        // only appears once in the payload (as the final user block)
        let history = self.sessions.load_messages(session_id, Some(self.history_limit))?;

        self.sessions
            .append_message(session_id, Role::User, text, BTreeMap::new())?;
        if let Some(title) = self.manager.maybe_autotitle(session_id, text)? {
            tracing::debug!(session_id, title = %title, "session auto-titled");
        }

        let mut tracker = self.take_tracker(session_id)?;
        let topic_changed = if TopicTracker::is_reset_request(text) {
            let had_topic = tracker.reset();
            tracing::debug!(session_id, had_topic, "topic reset requested");
            false
        } else {
            let classification = self.classifier.classify(text).await;
            let keywords = TopicClassifier::extract_keywords(text);
            let observation = tracker.observe(text, &classification, keywords);
            tracing::debug!(
                session_id,
                label = %observation.label,
                changed = observation.topic_changed,
                "topic state updated"
            );
            observation.topic_changed
        };

        let summary = tracker.context_summary();
        let hint = tracker.transition_hint();
        let current_topic = tracker.context().current_topic.as_ref().map(|t| t.label.clone());
        let recent_topics_summary: Vec<String> = tracker
            .context()
            .recent_topics
            .iter()
            .map(crate::topic::ConversationTopic::summary)
            .collect();

        // Persist topic state before the (fallible) LLM call: an abandoned
        // turn leaves at worst a context that self-corrects next turn
        self.contexts.upsert(session_id, tracker.context())?;
        self.put_tracker(session_id, tracker);

        let facts_block = self.facts.format_for_prompt(self.assembler.budgets().facts)?;

        let mut fragments = fragments.clone();
        if fragments.personality.is_none() {
            fragments.personality = Some(self.default_personality.clone());
        }

        let payload = self.assembler.assemble(
            &summary,
            hint.as_deref(),
            &facts_block,
            &fragments,
            &history,
            text,
        );

        let assistant_text = self.llm.complete(&payload).await?;

        self.sessions
            .append_message(session_id, Role::Assistant, &assistant_text, BTreeMap::new())?;

        self.store.checkpoint();

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            assistant_text,
            topic_changed,
            current_topic,
            recent_topics_summary,
        })
    }

    /// Create a fresh session and make it current; facts and existing
    /// sessions are untouched
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn new_chat(&self) -> Result<Session> {
        let session = self.manager.switch_to_new()?;
        self.store.checkpoint();
        Ok(session)
    }

    /// Return the current session, creating one if needed
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn continue_or_create(&self) -> Result<Session> {
        self.manager.continue_or_create()
    }

    /// All sessions, most recently active first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        self.sessions.list_all()
    }

    /// Messages of a session in chronological order
    ///
    /// An unknown session id is an expected occurrence and reported as
    /// `None`, not an error.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn load_session(&self, session_id: &str, limit: Option<usize>) -> Result<Option<Vec<Message>>> {
        if self.sessions.get(session_id)?.is_none() {
            return Ok(None);
        }
        self.sessions.load_messages(session_id, limit).map(Some)
    }

    /// Delete a session, its messages and its topic context; idempotent
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.sessions.delete_cascade(session_id)?;
        self.manager.clear_current_if(session_id)?;
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        self.store.checkpoint();
        Ok(())
    }

    /// Clear the current topic of a session; programmatic counterpart of
    /// the spoken reset phrases
    ///
    /// Returns whether there was a topic to clear.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unknown session
    pub fn reset_topic(&self, session_id: &str) -> Result<bool> {
        if self.sessions.get(session_id)?.is_none() {
            return Err(Error::NotFound(format!("session {session_id}")));
        }

        let mut tracker = self.take_tracker(session_id)?;
        let had_topic = tracker.reset();
        self.contexts.upsert(session_id, tracker.context())?;
        self.put_tracker(session_id, tracker);
        self.store.checkpoint();
        Ok(had_topic)
    }

    /// Add a durable fact about the user
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn add_fact(&self, content: &str, category: FactCategory, confidence: f64) -> Result<Fact> {
        let fact = self.facts.add(content, category, confidence)?;
        self.store.checkpoint();
        Ok(fact)
    }

    /// All facts, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_facts(&self) -> Result<Vec<Fact>> {
        self.facts.list()
    }

    /// Delete a fact; returns whether it existed
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn delete_fact(&self, id: &str) -> Result<bool> {
        let removed = self.facts.delete(id)?;
        self.store.checkpoint();
        Ok(removed)
    }

    /// Delete all facts; returns how many were removed
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear_facts(&self) -> Result<usize> {
        let removed = self.facts.clear_all()?;
        self.store.checkpoint();
        Ok(removed)
    }

    fn take_tracker(&self, session_id: &str) -> Result<TopicTracker> {
        let cached = self
            .trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
        if let Some(tracker) = cached {
            return Ok(tracker);
        }

        let context = self.contexts.load(session_id)?.unwrap_or_default();
        Ok(TopicTracker::from_context(context, self.classifier.threshold()))
    }

    fn put_tracker(&self, session_id: &str, tracker: TopicTracker) {
        self.trackers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), tracker);
    }
}
