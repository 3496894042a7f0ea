//! LLM client seam
//!
//! The engine hands an assembled [`ContextPayload`] to an injected
//! [`LlmClient`] and gets back the assistant's reply text. Provider
//! selection, retries and streaming live behind the trait, not here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextPayload;
use crate::{Error, Result};

/// Produces an assistant reply from an assembled context payload
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete one turn
    async fn complete(&self, payload: &ContextPayload) -> Result<String>;
}

/// Reference client for OpenAI-compatible chat-completions endpoints
///
/// Payload blocks map one-to-one onto chat messages, preserving order and
/// role tags.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiChatClient {
    /// Create a new chat client
    ///
    /// # Errors
    ///
    /// Returns error if endpoint or model is empty
    pub fn new(endpoint: String, api_key: Option<String>, model: String) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(Error::Config("llm endpoint required".to_string()));
        }
        if model.is_empty() {
            return Err(Error::Config("llm model required".to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn complete(&self, payload: &ContextPayload) -> Result<String> {
        #[derive(Serialize)]
        struct ChatMessage<'a> {
            role: &'a str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct ChatRequest<'a> {
            model: &'a str,
            messages: Vec<ChatMessage<'a>>,
        }

        #[derive(Deserialize)]
        struct ChatResponse {
            choices: Vec<Choice>,
        }

        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMessage,
        }

        #[derive(Deserialize)]
        struct ChoiceMessage {
            content: String,
        }

        let messages: Vec<ChatMessage<'_>> = payload
            .blocks
            .iter()
            .map(|b| ChatMessage {
                role: b.role.as_str(),
                content: &b.content,
            })
            .collect();

        let mut request = self.client.post(&self.endpoint).json(&ChatRequest {
            model: &self.model,
            messages,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::Llm("empty completion response".to_string()))
    }
}
