//! Per-session topic tracking
//!
//! Keeps the topic a conversation is currently about plus a short ring of
//! recently discussed topics, detects topic changes from classifier
//! results, and renders the summary/transition lines injected into the
//! prompt. The whole state serializes to one JSON snapshot per session.
//!
//! Change detection uses a plain confidence threshold with no hysteresis;
//! two topics scoring near the threshold can oscillate. Known limitation,
//! inherited from the classifier contract.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classifier::Classification;

/// How many past topics are remembered per session
pub const RECENT_TOPIC_CAPACITY: usize = 3;

/// How many sample messages a topic keeps
pub const MAX_EXAMPLE_MESSAGES: usize = 5;

/// How many keywords a topic accumulates
pub const MAX_TOPIC_KEYWORDS: usize = 8;

/// Phrases that clear the current topic when spoken by the user
const RESET_PHRASES: &[&str] = &[
    "new topic",
    "change topic",
    "different topic",
    "talk about something else",
    "let's talk about",
    "anyway",
    "by the way",
    "speaking of which",
    "on a different note",
];

/// A topic under discussion, with supporting evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTopic {
    pub label: String,
    /// Ordered, deduplicated keyword set (capped)
    pub keywords: Vec<String>,
    /// Sample of recent messages on this topic (capped, oldest dropped)
    pub example_messages: Vec<String>,
    pub confidence: f64,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub message_count: u64,
}

impl ConversationTopic {
    /// Start a topic from a single turn
    #[must_use]
    pub fn seed(label: &str, mut keywords: Vec<String>, message: &str, confidence: f64) -> Self {
        keywords.truncate(MAX_TOPIC_KEYWORDS);
        let now = Utc::now();
        Self {
            label: label.to_string(),
            keywords,
            example_messages: vec![message.to_string()],
            confidence,
            started_at: now,
            last_updated_at: now,
            message_count: 1,
        }
    }

    /// Fold another turn into this topic
    fn absorb(&mut self, message: &str, keywords: &[String], confidence: f64) {
        for keyword in keywords {
            if self.keywords.len() >= MAX_TOPIC_KEYWORDS {
                break;
            }
            if !self.keywords.contains(keyword) {
                self.keywords.push(keyword.clone());
            }
        }

        self.example_messages.push(message.to_string());
        if self.example_messages.len() > MAX_EXAMPLE_MESSAGES {
            self.example_messages.remove(0);
        }

        self.confidence = f64::midpoint(self.confidence, confidence);
        self.message_count += 1;
        self.last_updated_at = Utc::now();
    }

    /// One-line description for prompt injection
    #[must_use]
    pub fn summary(&self) -> String {
        format!("{} (discussed in {} messages)", self.label, self.message_count)
    }
}

/// Serialized topic state for one session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    /// What the conversation is currently about, if anything
    pub current_topic: Option<ConversationTopic>,
    /// Previously discussed topics, oldest first
    pub recent_topics: VecDeque<ConversationTopic>,
}

/// Result of observing one user turn
#[derive(Debug, Clone)]
pub struct TurnObservation {
    /// Whether this turn started a different topic
    pub topic_changed: bool,
    /// Label now being tracked
    pub label: String,
    /// Messages recorded on the current topic so far
    pub message_count: u64,
}

/// Topic state machine for a single session
#[derive(Debug, Clone)]
pub struct TopicTracker {
    context: ConversationContext,
    threshold: f64,
    /// Whether the most recent observation changed the topic; per-turn
    /// state, intentionally not persisted
    last_changed: bool,
}

impl TopicTracker {
    /// Fresh tracker with no topic
    #[must_use]
    pub fn new(threshold: f64) -> Self {
        Self::from_context(ConversationContext::default(), threshold)
    }

    /// Rehydrate a tracker from a persisted snapshot
    #[must_use]
    pub const fn from_context(context: ConversationContext, threshold: f64) -> Self {
        Self {
            context,
            threshold,
            last_changed: false,
        }
    }

    /// Current state, for persistence
    #[must_use]
    pub const fn context(&self) -> &ConversationContext {
        &self.context
    }

    /// Does this message ask to drop the current topic?
    #[must_use]
    pub fn is_reset_request(text: &str) -> bool {
        let lower = text.to_lowercase();
        RESET_PHRASES.iter().any(|phrase| lower.contains(phrase))
    }

    /// Clear the current topic, remembering it among the recent ones
    ///
    /// Returns whether there was a topic to clear. Recent-topic history
    /// and long-term facts are untouched beyond normal eviction.
    pub fn reset(&mut self) -> bool {
        self.last_changed = false;
        if let Some(current) = self.context.current_topic.take() {
            self.push_recent(current);
            true
        } else {
            false
        }
    }

    /// Fold one classified user turn into the state machine
    pub fn observe(
        &mut self,
        message: &str,
        classification: &Classification,
        keywords: Vec<String>,
    ) -> TurnObservation {
        let confident = classification.confidence >= self.threshold;

        let changed = match self.context.current_topic.take() {
            None => {
                self.context.current_topic = Some(ConversationTopic::seed(
                    &classification.label,
                    keywords,
                    message,
                    classification.confidence,
                ));
                true
            }
            Some(mut current) if current.label == classification.label || !confident => {
                // Same topic, or too uncertain to assert a change
                current.absorb(message, &keywords, classification.confidence);
                self.context.current_topic = Some(current);
                false
            }
            Some(previous) => {
                tracing::debug!(from = %previous.label, to = %classification.label, "topic changed");
                self.push_recent(previous);
                self.context.current_topic = Some(ConversationTopic::seed(
                    &classification.label,
                    keywords,
                    message,
                    classification.confidence,
                ));
                true
            }
        };

        self.last_changed = changed;

        let (label, message_count) = self.context.current_topic.as_ref().map_or_else(
            || (String::new(), 0),
            |t| (t.label.clone(), t.message_count),
        );

        TurnObservation {
            topic_changed: changed,
            label,
            message_count,
        }
    }

    /// Short descriptive line about recent and current topics
    ///
    /// Empty when nothing has been tracked yet.
    #[must_use]
    pub fn context_summary(&self) -> String {
        let mut parts = Vec::new();

        if !self.context.recent_topics.is_empty() {
            let recent: Vec<String> = self
                .context
                .recent_topics
                .iter()
                .map(ConversationTopic::summary)
                .collect();
            parts.push(format!("Recent topics: {}", recent.join(", ")));
        }

        if let Some(current) = &self.context.current_topic {
            let keywords: Vec<String> = current.keywords.iter().take(3).cloned().collect();
            if keywords.is_empty() {
                parts.push(format!(
                    "Current topic: {} ({} messages)",
                    current.label, current.message_count
                ));
            } else {
                parts.push(format!(
                    "Current topic: {} (keywords: {}; {} messages)",
                    current.label,
                    keywords.join(", "),
                    current.message_count
                ));
            }
        }

        parts.join(" | ")
    }

    /// Instruction describing the topic shift of the last observed turn
    ///
    /// Present only when the last turn changed the topic and there is a
    /// previous topic to shift from.
    #[must_use]
    pub fn transition_hint(&self) -> Option<String> {
        if !self.last_changed {
            return None;
        }
        let current = self.context.current_topic.as_ref()?;
        let previous = self.context.recent_topics.back()?;
        if previous.label == current.label {
            return None;
        }
        Some(format!(
            "The conversation has shifted from '{}' to '{}'. Acknowledge this transition naturally in your reply.",
            previous.label, current.label
        ))
    }

    fn push_recent(&mut self, topic: ConversationTopic) {
        self.context.recent_topics.push_back(topic);
        while self.context.recent_topics.len() > RECENT_TOPIC_CAPACITY {
            self.context.recent_topics.pop_front();
        }
    }
}
