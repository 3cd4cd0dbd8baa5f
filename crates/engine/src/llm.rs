//! LLM seam shared by the AI agents and the country classifier: the
//! `LlmClient` trait, its error type, and the reference `AnthropicClient`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Error type for LLM client operations.
#[derive(Debug)]
pub enum LlmError {
    /// No credentials were configured for the backend.
    MissingApiKey(String),
    /// Network or HTTP error.
    NetworkError(String),
    /// LLM API returned an error response.
    ApiError { status: u16, message: String },
    /// The backend answered with something that is not a completion.
    ParseError(String),
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::MissingApiKey(var) => write!(f, "LLM backend not configured: {} is not set", var),
            LlmError::NetworkError(msg) => write!(f, "LLM network error: {}", msg),
            LlmError::ApiError { status, message } => {
                write!(f, "LLM API error ({}): {}", status, message)
            }
            LlmError::ParseError(msg) => write!(f, "LLM parse error: {}", msg),
        }
    }
}

impl std::error::Error for LlmError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a prompt conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A text-completion backend.
///
/// Implementations only move text. Prompt construction, response parsing
/// and correction retries belong to the agents.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String, LlmError>;
}

/// The body of a reply wrapped in a markdown fence (with or without a
/// language tag), or the trimmed reply when it is not fenced.
pub(crate) fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(body) = trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    else {
        return trimmed;
    };
    // Drop a language tag such as `json` on the opening fence line.
    match body.split_once('\n') {
        Some((tag, rest)) if !tag.trim().contains(['{', '[']) => rest.trim(),
        _ => body.trim(),
    }
}

// ──────────────────────────────────────────────
// Anthropic Messages API (feature `anthropic`)
// ──────────────────────────────────────────────

#[cfg(feature = "anthropic")]
pub(crate) const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

#[cfg(feature = "anthropic")]
const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

#[cfg(feature = "anthropic")]
pub(crate) fn api_key_from_env() -> Result<String, LlmError> {
    std::env::var(API_KEY_VAR).map_err(|_| LlmError::MissingApiKey(API_KEY_VAR.to_string()))
}

#[cfg(feature = "anthropic")]
#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[cfg(feature = "anthropic")]
#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// POST a Messages API body and return the first text block. Blocking; call
/// from `spawn_blocking`.
#[cfg(feature = "anthropic")]
pub(crate) fn post_messages(
    api_key: &str,
    base_url: &str,
    body: serde_json::Value,
) -> Result<String, LlmError> {
    let response = ureq::Agent::new_with_defaults()
        .post(&format!("{}/v1/messages", base_url))
        .header("x-api-key", api_key)
        .header("anthropic-version", "2023-06-01")
        .header("content-type", "application/json")
        .send_json(body);

    let parsed: MessagesResponse = match response {
        Ok(resp) => resp
            .into_body()
            .read_json()
            .map_err(|e| LlmError::ParseError(format!("unreadable Messages API reply: {}", e)))?,
        Err(ureq::Error::StatusCode(status)) => {
            return Err(LlmError::ApiError {
                status,
                message: format!("Messages API returned status {}", status),
            })
        }
        Err(e) => return Err(LlmError::NetworkError(e.to_string())),
    };

    parsed
        .content
        .into_iter()
        .find_map(|block| block.text)
        .ok_or_else(|| LlmError::ParseError("Messages API reply has no text block".to_string()))
}

#[cfg(feature = "anthropic")]
#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<&'a Message>,
}

/// [`LlmClient`] over the Anthropic Messages API, using `ureq` on the
/// blocking pool.
#[cfg(feature = "anthropic")]
pub struct AnthropicClient {
    api_key: String,
    pub base_url: String,
    pub max_tokens: u32,
}

#[cfg(feature = "anthropic")]
impl AnthropicClient {
    /// Client keyed from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, LlmError> {
        Ok(Self::new(api_key_from_env()?))
    }

    pub fn new(api_key: String) -> Self {
        AnthropicClient {
            api_key,
            base_url: ANTHROPIC_BASE_URL.to_string(),
            max_tokens: 1024,
        }
    }
}

#[cfg(feature = "anthropic")]
#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, messages: Vec<Message>, model: &str) -> Result<String, LlmError> {
        // The system prompt travels outside the turn list.
        let request = MessagesRequest {
            model,
            max_tokens: self.max_tokens,
            system: messages
                .iter()
                .find(|m| m.role == Role::System)
                .map(|m| m.content.as_str()),
            messages: messages.iter().filter(|m| m.role != Role::System).collect(),
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| LlmError::ParseError(format!("could not encode request: {}", e)))?;

        let api_key = self.api_key.clone();
        let base_url = self.base_url.clone();
        tokio::task::spawn_blocking(move || post_messages(&api_key, &base_url, body))
            .await
            .map_err(|e| LlmError::NetworkError(format!("blocking task failed: {}", e)))?
    }
}
