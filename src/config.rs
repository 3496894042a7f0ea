//! Configuration for the engram engine
//!
//! Defaults work out of the box; `~/.config/engram/config.toml` is an
//! optional partial overlay on top of them. All file keys are optional.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::context::ContextBudgets;
use crate::{Error, Result};

/// Default confidence threshold below which a classification is treated
/// as uncertain
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Maximum characters kept when auto-titling a session from its first
/// user message
pub const DEFAULT_TITLE_MAX_CHARS: usize = 60;

/// Engram engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the data directory (database, degraded-mode backup)
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    pub db_filename: String,

    /// Topic classifier configuration
    pub classifier: ClassifierConfig,

    /// LLM client configuration (used by the bundled OpenAI-compatible client)
    pub llm: LlmConfig,

    /// Character budgets for context assembly
    pub budgets: ContextBudgets,

    /// Personality directive used when the caller supplies none
    pub default_personality: String,

    /// Session title length cap for auto-titling
    pub title_max_chars: usize,

    /// Number of recent messages handed to the LLM client per turn
    pub history_limit: usize,
}

/// Topic classifier configuration
#[derive(Debug, Clone, Default)]
pub struct ClassifierConfig {
    /// Zero-shot inference endpoint; `None` selects the offline lexicon backend
    pub endpoint: Option<String>,

    /// API key for the inference endpoint
    pub api_key: Option<String>,

    /// Confidence threshold for asserting a topic change
    pub confidence_threshold: f64,
}

/// LLM client configuration
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    /// Chat-completions endpoint (OpenAI-compatible)
    pub endpoint: Option<String>,

    /// API key
    pub api_key: Option<String>,

    /// Model identifier
    pub model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_filename: "engram.db".to_string(),
            classifier: ClassifierConfig {
                endpoint: None,
                api_key: None,
                confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            },
            llm: LlmConfig::default(),
            budgets: ContextBudgets::default(),
            default_personality: "You are a helpful, warm, and concise assistant."
                .to_string(),
            title_max_chars: DEFAULT_TITLE_MAX_CHARS,
            history_limit: 20,
        }
    }
}

impl Config {
    /// Load configuration: defaults, overlaid with the config file if present
    ///
    /// # Errors
    ///
    /// Returns error if the config file exists but cannot be parsed
    pub fn load() -> Result<Self> {
        let path = default_config_path();
        match path {
            Some(p) if p.exists() => Self::load_from(&p),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a specific TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let file: ConfigFile = toml::from_str(&raw)?;
        Ok(Self::default().overlay(file))
    }

    /// Apply a partial file overlay on top of this config
    fn overlay(mut self, file: ConfigFile) -> Self {
        if let Some(dir) = file.data_dir {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(c) = file.classifier {
            self.classifier.endpoint = c.endpoint.or(self.classifier.endpoint);
            self.classifier.api_key = c.api_key.or(self.classifier.api_key);
            if let Some(t) = c.confidence_threshold {
                self.classifier.confidence_threshold = t.clamp(0.0, 1.0);
            }
        }
        if let Some(l) = file.llm {
            self.llm.endpoint = l.endpoint.or(self.llm.endpoint);
            self.llm.api_key = l.api_key.or(self.llm.api_key);
            self.llm.model = l.model.or(self.llm.model);
        }
        if let Some(c) = file.context {
            let b = &mut self.budgets;
            b.personality = c.personality_budget.unwrap_or(b.personality);
            b.emotion = c.emotion_budget.unwrap_or(b.emotion);
            b.conversation = c.conversation_budget.unwrap_or(b.conversation);
            b.facts = c.facts_budget.unwrap_or(b.facts);
            b.knowledge = c.knowledge_budget.unwrap_or(b.knowledge);
            b.history = c.history_budget.unwrap_or(b.history);
            b.total = c.total_budget.unwrap_or(b.total);
        }
        if let Some(a) = file.assistant {
            if let Some(p) = a.personality {
                self.default_personality = p;
            }
            if let Some(n) = a.history_limit {
                self.history_limit = n;
            }
        }
        self
    }

    /// Full path of the database file
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.db_filename)
    }
}

/// Default data directory (`~/.local/share/engram` on Linux)
#[must_use]
pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "engram", "engram")
        .map_or_else(|| PathBuf::from("./data"), |d| d.data_dir().to_path_buf())
}

/// Default config file path (`~/.config/engram/config.toml` on Linux)
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "engram", "engram")
        .map(|d| d.config_dir().join("config.toml"))
}

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    data_dir: Option<String>,

    #[serde(default)]
    classifier: Option<ClassifierFileConfig>,

    #[serde(default)]
    llm: Option<LlmFileConfig>,

    #[serde(default)]
    context: Option<ContextFileConfig>,

    #[serde(default)]
    assistant: Option<AssistantFileConfig>,
}

/// Classifier section
#[derive(Debug, Default, Deserialize)]
struct ClassifierFileConfig {
    endpoint: Option<String>,
    api_key: Option<String>,
    confidence_threshold: Option<f64>,
}

/// LLM section
#[derive(Debug, Default, Deserialize)]
struct LlmFileConfig {
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
}

/// Context budget section (characters)
#[derive(Debug, Default, Deserialize)]
struct ContextFileConfig {
    personality_budget: Option<usize>,
    emotion_budget: Option<usize>,
    conversation_budget: Option<usize>,
    facts_budget: Option<usize>,
    knowledge_budget: Option<usize>,
    history_budget: Option<usize>,
    total_budget: Option<usize>,
}

/// Assistant behavior section
#[derive(Debug, Default, Deserialize)]
struct AssistantFileConfig {
    personality: Option<String>,
    history_limit: Option<usize>,
}
