//! Topic classification and per-session topic tracking

pub mod classifier;
pub mod tracker;

pub use classifier::{
    Classification, DEFAULT_TOPICS, GENERAL_TOPIC, LexiconModel, MAX_KEYWORDS, TopicClassifier,
    TopicModel, ZeroShotClient,
};
pub use tracker::{
    ConversationContext, ConversationTopic, MAX_EXAMPLE_MESSAGES, MAX_TOPIC_KEYWORDS,
    RECENT_TOPIC_CAPACITY, TopicTracker, TurnObservation,
};
