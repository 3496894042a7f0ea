//! Topic classification adapter
//!
//! Wraps a pluggable zero-shot text classification backend plus a small
//! keyword extractor. The adapter owns the closed label vocabulary and the
//! degradation path: when the backend is unavailable it answers with the
//! catch-all label at zero confidence instead of failing, so callers never
//! block on this dependency.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Catch-all label used for uncertain or failed classifications
pub const GENERAL_TOPIC: &str = "general";

/// Closed topic vocabulary (plus the catch-all)
pub const DEFAULT_TOPICS: &[&str] = &[
    "greeting",
    "weather",
    "technology",
    "programming",
    "personal_life",
    "work",
    "entertainment",
    "food",
    "travel",
    "health",
    "sports",
    "news",
    "education",
    "finance",
    "shopping",
    GENERAL_TOPIC,
];

/// Maximum keywords extracted per message
pub const MAX_KEYWORDS: usize = 8;

/// A single classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

impl Classification {
    /// The catch-all result used when classification is unavailable
    #[must_use]
    pub fn general() -> Self {
        Self {
            label: GENERAL_TOPIC.to_string(),
            confidence: 0.0,
        }
    }
}

/// A text classification backend scoring text against candidate labels
///
/// Injected so the concrete backend (remote zero-shot model, local rules,
/// a scripted stub in tests) is swappable.
#[async_trait]
pub trait TopicModel: Send + Sync {
    /// Score `text` against `labels`, returning the best label
    async fn classify(&self, text: &str, labels: &[String]) -> Result<Classification>;
}

/// Remote zero-shot classification backend
///
/// Speaks the Hugging Face inference contract for zero-shot pipelines:
/// `{"inputs": ..., "parameters": {"candidate_labels": [...]}}` returning
/// parallel `labels`/`scores` arrays, best first.
#[derive(Debug, Clone)]
pub struct ZeroShotClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ZeroShotClient {
    /// Create a new zero-shot client
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is empty
    pub fn new(endpoint: String, api_key: Option<String>) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(Error::Config("classifier endpoint required".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
        })
    }
}

#[async_trait]
impl TopicModel for ZeroShotClient {
    async fn classify(&self, text: &str, labels: &[String]) -> Result<Classification> {
        #[derive(Serialize)]
        struct Request<'a> {
            inputs: &'a str,
            parameters: Parameters<'a>,
        }

        #[derive(Serialize)]
        struct Parameters<'a> {
            candidate_labels: &'a [String],
        }

        #[derive(Deserialize)]
        struct Response {
            labels: Vec<String>,
            scores: Vec<f64>,
        }

        let mut request = self.client.post(&self.endpoint).json(&Request {
            inputs: text,
            parameters: Parameters {
                candidate_labels: labels,
            },
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Classifier(format!("inference API error {status}: {body}")));
        }

        let parsed: Response = response.json().await?;
        match (parsed.labels.first(), parsed.scores.first()) {
            (Some(label), Some(score)) => Ok(Classification {
                label: label.clone(),
                confidence: score.clamp(0.0, 1.0),
            }),
            _ => Err(Error::Classifier("empty classification response".to_string())),
        }
    }
}

/// Per-label keyword cues for the offline backend
const LEXICON: &[(&str, &[&str])] = &[
    ("greeting", &["hello", "morning", "evening", "howdy", "greetings"]),
    ("weather", &["weather", "rain", "rainy", "sunny", "snow", "forecast", "temperature", "cloudy", "storm", "umbrella"]),
    ("technology", &["computer", "phone", "laptop", "software", "hardware", "gadget", "device", "internet", "browser"]),
    ("programming", &["code", "coding", "programming", "rust", "python", "compiler", "debug", "function", "crash", "tests"]),
    ("personal_life", &["family", "friend", "friends", "feeling", "relationship", "home", "weekend"]),
    ("work", &["work", "job", "meeting", "project", "deadline", "office", "resume", "career", "boss", "interview"]),
    ("entertainment", &["movie", "music", "show", "concert", "series", "film", "album", "streaming"]),
    ("food", &["food", "cook", "cooking", "recipe", "dinner", "lunch", "breakfast", "restaurant", "pasta", "baking"]),
    ("travel", &["travel", "trip", "flight", "hotel", "vacation", "visit", "airport", "itinerary"]),
    ("health", &["health", "doctor", "exercise", "sleep", "diet", "sick", "medicine", "workout"]),
    ("sports", &["team", "score", "match", "football", "soccer", "basketball", "tennis", "league"]),
    ("news", &["news", "headline", "headlines", "election", "government", "report"]),
    ("education", &["school", "study", "learn", "learning", "course", "exam", "university", "homework"]),
    ("finance", &["money", "budget", "invest", "investing", "stock", "stocks", "savings", "bank", "price"]),
    ("shopping", &["shopping", "order", "store", "purchase", "deal", "cart", "delivery"]),
];

/// Offline rule-based backend scoring labels by keyword-cue overlap
///
/// The default backend: no model download, no network, deterministic.
/// Confidence grows with the number of cue hits and saturates below 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexiconModel;

#[async_trait]
impl TopicModel for LexiconModel {
    async fn classify(&self, text: &str, labels: &[String]) -> Result<Classification> {
        let tokens = tokenize(text);

        let mut best: Option<(&str, usize)> = None;
        for (label, cues) in LEXICON {
            if !labels.iter().any(|l| l == label) {
                continue;
            }
            let hits = tokens.iter().filter(|t| cues.contains(&t.as_str())).count();
            if hits > 0 && best.is_none_or(|(_, b)| hits > b) {
                best = Some((label, hits));
            }
        }

        Ok(best.map_or_else(Classification::general, |(label, hits)| {
            Classification {
                label: label.to_string(),
                // 1 hit -> 0.6, 2 -> 0.84, 3 -> 0.936, ...
                confidence: 1.0 - 0.4_f64.powi(i32::try_from(hits).unwrap_or(i32::MAX)),
            }
        }))
    }
}

/// Stop words excluded from keyword extraction
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "is", "are", "was", "were", "been", "be", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "can", "may", "might", "i", "you", "he", "she", "it",
    "we", "they", "this", "that", "these", "those", "what", "when", "where", "about", "like",
    "just", "your", "my", "me", "them", "there", "here",
];

/// The topic classification adapter
///
/// Owns the vocabulary and the confidence threshold; the backend is an
/// injected [`TopicModel`].
#[derive(Clone)]
pub struct TopicClassifier {
    model: Arc<dyn TopicModel>,
    vocabulary: Vec<String>,
    threshold: f64,
}

impl TopicClassifier {
    /// Create an adapter over `model` with the default vocabulary
    #[must_use]
    pub fn new(model: Arc<dyn TopicModel>, threshold: f64) -> Self {
        Self {
            model,
            vocabulary: DEFAULT_TOPICS.iter().map(ToString::to_string).collect(),
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Create an adapter with a custom vocabulary; the catch-all label is
    /// always appended when missing
    #[must_use]
    pub fn with_vocabulary(
        model: Arc<dyn TopicModel>,
        threshold: f64,
        mut vocabulary: Vec<String>,
    ) -> Self {
        if !vocabulary.iter().any(|l| l == GENERAL_TOPIC) {
            vocabulary.push(GENERAL_TOPIC.to_string());
        }
        Self {
            model,
            vocabulary,
            threshold: threshold.clamp(0.0, 1.0),
        }
    }

    /// Confidence threshold for asserting a topic change
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify `text` against the vocabulary
    ///
    /// Infallible by design: a backend failure or an out-of-vocabulary
    /// answer degrades to the catch-all label at zero confidence.
    pub async fn classify(&self, text: &str) -> Classification {
        match self.model.classify(text, &self.vocabulary).await {
            Ok(result) if self.vocabulary.iter().any(|l| *l == result.label) => result,
            Ok(result) => {
                tracing::debug!(label = %result.label, "classifier returned out-of-vocabulary label");
                Classification::general()
            }
            Err(e) => {
                tracing::debug!(error = %e, "classification unavailable, using catch-all");
                Classification::general()
            }
        }
    }

    /// Whether a classification clears the change threshold
    #[must_use]
    pub fn is_confident(&self, classification: &Classification) -> bool {
        classification.confidence >= self.threshold
    }

    /// Extract up to [`MAX_KEYWORDS`] keywords from `text`
    ///
    /// Lowercased, stop words and short tokens removed, ranked by
    /// frequency with first appearance breaking ties.
    #[must_use]
    pub fn extract_keywords(text: &str) -> Vec<String> {
        let tokens = tokenize(text);

        let mut order: Vec<String> = Vec::new();
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for token in tokens {
            if token.len() <= 3 || STOP_WORDS.contains(&token.as_str()) {
                continue;
            }
            if !counts.contains_key(&token) {
                order.push(token.clone());
            }
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, usize, usize)> = order
            .into_iter()
            .enumerate()
            .map(|(first_seen, token)| {
                let count = counts.get(&token).copied().unwrap_or(0);
                (token, count, first_seen)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        ranked.into_iter().take(MAX_KEYWORDS).map(|(t, ..)| t).collect()
    }
}

/// Split text into lowercase alphanumeric tokens
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
