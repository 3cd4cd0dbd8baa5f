//! Field extraction tiers: AI agents in priority order, then regex.

use std::sync::Arc;

use kyc_core::{patterns, Country, FieldExtraction};
use serde::{Deserialize, Serialize};

use crate::agents::TextExtractionAgent;
use crate::provider::{guarded, Acceptance, CallContext};

/// Why a tier's result was not used, kept for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierAttempt {
    pub tier: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// The accepted extraction and the tiers tried before it.
#[derive(Debug, Clone, PartialEq)]
pub struct TieredExtraction {
    pub extraction: FieldExtraction,
    pub attempts: Vec<TierAttempt>,
}

struct Tier {
    agent: Arc<dyn TextExtractionAgent>,
    acceptance: Acceptance,
}

/// Drives the agent tiers one at a time; the regex extractor always
/// answers when every tier errored or fell short.
#[derive(Default)]
pub struct FieldExtractor {
    tiers: Vec<Tier>,
}

impl FieldExtractor {
    /// An extractor with only the regex tier.
    pub fn regex_only() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, agent: Arc<dyn TextExtractionAgent>, acceptance: Acceptance) -> Self {
        self.tiers.push(Tier { agent, acceptance });
        self
    }

    pub fn tier_count(&self) -> usize {
        self.tiers.len() + 1
    }

    /// Extract fields from `text` for `country`. Never fails.
    pub async fn extract_fields(
        &self,
        text: &str,
        country: Country,
        ctx: &CallContext,
    ) -> TieredExtraction {
        let mut attempts = Vec::new();

        for tier in &self.tiers {
            let name = tier.agent.name();
            match guarded(name, ctx, tier.agent.extract(text, country)).await {
                Ok(extraction) if tier.acceptance.accepts(extraction.confidence) => {
                    tracing::debug!(tier = name, confidence = extraction.confidence, "tier accepted");
                    return TieredExtraction {
                        extraction,
                        attempts,
                    };
                }
                Ok(extraction) => {
                    tracing::info!(
                        tier = name,
                        confidence = extraction.confidence,
                        "tier below acceptance threshold; trying next tier"
                    );
                    attempts.push(TierAttempt {
                        tier: name.to_string(),
                        outcome: "below_threshold".to_string(),
                        confidence: Some(extraction.confidence),
                    });
                }
                Err(e) => {
                    tracing::warn!(tier = name, error = %e, "tier failed; trying next tier");
                    attempts.push(TierAttempt {
                        tier: name.to_string(),
                        outcome: e.to_string(),
                        confidence: None,
                    });
                }
            }
        }

        TieredExtraction {
            extraction: patterns::extract_fields(text, country),
            attempts,
        }
    }
}
