//! Extraction provider chain: an ordered list of vision/OCR backends behind
//! one capability interface, driven strictly in priority order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kyc_core::clamp_confidence;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::error::{EngineError, ProviderError};
use crate::rate_limit::RateLimiter;

// ──────────────────────────────────────────────
// Provider interface
// ──────────────────────────────────────────────

/// Text read from a document image by one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderReading {
    pub text: String,
    pub confidence: f64,
}

/// A vision/OCR backend.
///
/// Empty input or empty output is a valid, very low confidence reading, not
/// an error. Errors are reserved for calls that did not produce a reading.
#[async_trait]
pub trait VisionProvider: Send + Sync {
    /// Stable identifier, also the method tag and the rate-limit key.
    fn name(&self) -> &str;

    async fn extract(&self, image: &[u8]) -> Result<ProviderReading, ProviderError>;
}

/// When a chain accepts a provider's reading and stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    /// Confidence strictly greater than the value.
    Above(f64),
    /// Any successful result.
    Always,
}

impl Acceptance {
    pub fn accepts(self, confidence: f64) -> bool {
        match self {
            Acceptance::Above(threshold) => confidence > threshold,
            Acceptance::Always => true,
        }
    }
}

/// What the chain returns when no provider produced a reading at all.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Return an empty zero-confidence reading tagged with the last provider.
    #[default]
    AlwaysDegrade,
    /// Fail with [`EngineError::ExhaustedChain`].
    Fail,
}

// ──────────────────────────────────────────────
// Guarded calls
// ──────────────────────────────────────────────

/// Limits applied to every external call a workflow step makes.
#[derive(Clone)]
pub struct CallContext {
    pub timeout: Duration,
    /// Overall workflow deadline; caps `timeout` when closer.
    pub deadline: Option<tokio::time::Instant>,
    pub limiter: Option<Arc<RateLimiter>>,
    pub cancel: CancellationToken,
}

impl CallContext {
    pub fn new(timeout: Duration) -> Self {
        CallContext {
            timeout,
            deadline: None,
            limiter: None,
            cancel: CancellationToken::new(),
        }
    }

    fn budget(&self) -> Duration {
        match self.deadline {
            Some(deadline) => self
                .timeout
                .min(deadline.saturating_duration_since(tokio::time::Instant::now())),
            None => self.timeout,
        }
    }
}

/// Run one provider or agent call under the context's rate limit, timeout
/// and cancellation. Cancellation and timeout surface as provider errors.
pub(crate) async fn guarded<T, F>(name: &str, ctx: &CallContext, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    if ctx.cancel.is_cancelled() {
        return Err(ProviderError::Cancelled {
            provider: name.to_string(),
        });
    }
    if let Some(limiter) = &ctx.limiter {
        limiter
            .check(name)
            .await
            .map_err(|retry| ProviderError::RateLimited {
                provider: name.to_string(),
                retry_after_ms: retry.as_millis() as u64,
            })?;
    }

    let budget = ctx.budget();
    tokio::select! {
        _ = ctx.cancel.cancelled() => Err(ProviderError::Cancelled {
            provider: name.to_string(),
        }),
        result = tokio::time::timeout(budget, call) => match result {
            Ok(r) => r,
            Err(_) => Err(ProviderError::Timeout {
                provider: name.to_string(),
                after_ms: budget.as_millis() as u64,
            }),
        },
    }
}

// ──────────────────────────────────────────────
// Chain driver
// ──────────────────────────────────────────────

/// One chain attempt, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider: String,
    /// `"accepted"`, `"below_threshold"`, or the error message.
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Result of running a provider chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOutcome {
    pub text: String,
    pub confidence: f64,
    /// Name of the provider whose reading is returned.
    pub method: String,
    /// `false` when no provider met its acceptance threshold.
    pub accepted: bool,
    pub attempts: Vec<ProviderAttempt>,
}

struct ChainEntry {
    provider: Arc<dyn VisionProvider>,
    acceptance: Acceptance,
}

/// Ordered, prioritized provider list.
pub struct ProviderChain {
    entries: Vec<ChainEntry>,
    exhaustion: ExhaustionPolicy,
}

impl Default for ProviderChain {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderChain {
    pub fn new() -> Self {
        ProviderChain {
            entries: Vec::new(),
            exhaustion: ExhaustionPolicy::default(),
        }
    }

    /// Append a provider at the lowest priority so far.
    pub fn with_provider(mut self, provider: Arc<dyn VisionProvider>, acceptance: Acceptance) -> Self {
        self.entries.push(ChainEntry {
            provider,
            acceptance,
        });
        self
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.exhaustion = policy;
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Call providers in order and return the first accepted reading.
    ///
    /// When none is accepted, the most recent successful reading is returned
    /// unaccepted. When no provider succeeded, the exhaustion policy decides.
    /// An empty chain is always exhausted.
    pub async fn extract(
        &self,
        image: &[u8],
        ctx: &CallContext,
    ) -> Result<ChainOutcome, EngineError> {
        let mut attempts = Vec::with_capacity(self.entries.len());
        let mut fallback: Option<(String, ProviderReading)> = None;

        for entry in &self.entries {
            let name = entry.provider.name();
            match guarded(name, ctx, entry.provider.extract(image)).await {
                Ok(reading) => {
                    let reading = ProviderReading {
                        confidence: clamp_confidence(reading.confidence),
                        ..reading
                    };
                    if entry.acceptance.accepts(reading.confidence) {
                        attempts.push(ProviderAttempt {
                            provider: name.to_string(),
                            outcome: "accepted".to_string(),
                            confidence: Some(reading.confidence),
                        });
                        tracing::debug!(provider = name, confidence = reading.confidence, "reading accepted");
                        return Ok(ChainOutcome {
                            text: reading.text,
                            confidence: reading.confidence,
                            method: name.to_string(),
                            accepted: true,
                            attempts,
                        });
                    }
                    tracing::info!(
                        provider = name,
                        confidence = reading.confidence,
                        "reading below acceptance threshold; trying next provider"
                    );
                    attempts.push(ProviderAttempt {
                        provider: name.to_string(),
                        outcome: "below_threshold".to_string(),
                        confidence: Some(reading.confidence),
                    });
                    fallback = Some((name.to_string(), reading));
                }
                Err(e) => {
                    tracing::warn!(provider = name, error = %e, "provider failed; trying next provider");
                    attempts.push(ProviderAttempt {
                        provider: name.to_string(),
                        outcome: e.to_string(),
                        confidence: None,
                    });
                }
            }
        }

        if let Some((method, reading)) = fallback {
            return Ok(ChainOutcome {
                text: reading.text,
                confidence: reading.confidence,
                method,
                accepted: false,
                attempts,
            });
        }

        let last = self.entries.last().map(|e| e.provider.name().to_string());
        match (self.exhaustion, last) {
            (ExhaustionPolicy::AlwaysDegrade, Some(method)) => {
                tracing::warn!(method = %method, "every provider failed; degrading to an empty reading");
                Ok(ChainOutcome {
                    text: String::new(),
                    confidence: 0.0,
                    method,
                    accepted: false,
                    attempts,
                })
            }
            _ => Err(EngineError::ExhaustedChain {
                chain: "ocr".to_string(),
                attempts: attempts.len(),
            }),
        }
    }
}

// ──────────────────────────────────────────────
// Reference providers
// ──────────────────────────────────────────────

/// Treats the document bytes as already-extracted UTF-8 text.
///
/// Used for text uploads, the CLI, and tests. Empty text reads with zero
/// confidence.
pub struct PlainTextProvider {
    confidence: f64,
}

impl PlainTextProvider {
    pub const NAME: &'static str = "plain_text";

    pub fn new(confidence: f64) -> Self {
        PlainTextProvider {
            confidence: clamp_confidence(confidence),
        }
    }
}

impl Default for PlainTextProvider {
    fn default() -> Self {
        Self::new(0.9)
    }
}

#[async_trait]
impl VisionProvider for PlainTextProvider {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self, image: &[u8]) -> Result<ProviderReading, ProviderError> {
        let text = String::from_utf8_lossy(image).trim().to_string();
        let confidence = if text.is_empty() { 0.0 } else { self.confidence };
        Ok(ProviderReading { text, confidence })
    }
}

#[cfg(feature = "anthropic")]
pub use anthropic::AnthropicVisionProvider;

#[cfg(feature = "anthropic")]
mod anthropic {
    use async_trait::async_trait;
    use base64::Engine as _;

    use super::{ProviderReading, VisionProvider};
    use crate::error::ProviderError;
    use crate::llm::{api_key_from_env, post_messages, strip_code_fences, LlmError, ANTHROPIC_BASE_URL};

    const PROMPT: &str = r#"Transcribe every line of text printed on this identity document, top to bottom.
Respond with a JSON object in exactly this format and nothing else:
{"text": "<the transcription, lines separated by \n>", "confidence": <0.0-1.0 legibility estimate>}"#;

    /// Vision model reading over the Anthropic Messages API.
    pub struct AnthropicVisionProvider {
        name: String,
        api_key: String,
        base_url: String,
        model: String,
    }

    impl AnthropicVisionProvider {
        pub fn new(name: impl Into<String>, api_key: String, model: impl Into<String>) -> Self {
            AnthropicVisionProvider {
                name: name.into(),
                api_key,
                base_url: ANTHROPIC_BASE_URL.to_string(),
                model: model.into(),
            }
        }

        pub fn from_env(name: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
            Ok(Self::new(name, api_key_from_env()?, model))
        }
    }

    /// Media type from magic bytes; JPEG when unknown.
    fn media_type(image: &[u8]) -> &'static str {
        if image.starts_with(&[0x89, b'P', b'N', b'G']) {
            "image/png"
        } else if image.starts_with(b"GIF8") {
            "image/gif"
        } else if image.len() >= 12 && &image[0..4] == b"RIFF" && &image[8..12] == b"WEBP" {
            "image/webp"
        } else {
            "image/jpeg"
        }
    }

    #[async_trait]
    impl VisionProvider for AnthropicVisionProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn extract(&self, image: &[u8]) -> Result<ProviderReading, ProviderError> {
            if image.is_empty() {
                return Ok(ProviderReading {
                    text: String::new(),
                    confidence: 0.0,
                });
            }

            let body = serde_json::json!({
                "model": self.model,
                "max_tokens": 2048,
                "messages": [{
                    "role": "user",
                    "content": [
                        {
                            "type": "image",
                            "source": {
                                "type": "base64",
                                "media_type": media_type(image),
                                "data": base64::engine::general_purpose::STANDARD.encode(image),
                            }
                        },
                        { "type": "text", "text": PROMPT }
                    ]
                }]
            });

            let api_key = self.api_key.clone();
            let base_url = self.base_url.clone();
            let name = self.name.clone();
            let response = tokio::task::spawn_blocking(move || post_messages(&api_key, &base_url, body))
                .await
                .map_err(|e| ProviderError::Unavailable {
                    provider: name.clone(),
                    message: format!("Task join error: {}", e),
                })?
                .map_err(|e| match e {
                    LlmError::ParseError(message) => ProviderError::Malformed {
                        provider: name.clone(),
                        message,
                    },
                    other => ProviderError::Unavailable {
                        provider: name.clone(),
                        message: other.to_string(),
                    },
                })?;

            let value: serde_json::Value = serde_json::from_str(strip_code_fences(&response))
                .map_err(|e| ProviderError::Malformed {
                    provider: name.clone(),
                    message: format!("Failed to parse JSON: {}", e),
                })?;
            let text = value["text"].as_str().unwrap_or_default().to_string();
            let confidence = value["confidence"].as_f64().unwrap_or(0.0);
            Ok(ProviderReading { text, confidence })
        }
    }
}
