//! Engine configuration, loaded from TOML.
//!
//! # Example
//!
//! ```toml
//! default_country = "NA"
//!
//! [policy]
//! auto_approve_threshold = 0.8
//! country_confidence_floor = 0.6
//! extraction_confidence_floor = 0.6
//! ocr_confidence_floor = 0.5
//!
//! [extraction]
//! exhaustion = "always_degrade"
//! structured_threshold = 0.6
//! json_schema_threshold = 0.5
//!
//! [detection]
//! keyword_threshold = 0.6
//!
//! [timeouts]
//! provider_ms = 30000
//! agent_ms = 30000
//! workflow_ms = 300000
//!
//! [rate_limit]
//! max_requests = 60
//! window_secs = 60
//!
//! [ledger]
//! merkle_batch_size = 16
//! retention_days = 3650
//!
//! [llm]
//! model = "claude-sonnet-4-20250514"
//! max_retries = 2
//! ```

use std::path::Path;
use std::time::Duration;

use kyc_core::{Country, DecisionPolicy};
use kyc_ledger::{RetentionPolicy, DEFAULT_MERKLE_BATCH_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::provider::ExhaustionPolicy;

/// Top-level engine configuration. Every section is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Country whose rules apply when detection and hints give nothing.
    pub default_country: String,
    pub policy: DecisionPolicy,
    pub extraction: ExtractionConfig,
    pub detection: DetectionConfig,
    pub timeouts: TimeoutConfig,
    pub rate_limit: RateLimitConfig,
    pub ledger: LedgerConfig,
    pub llm: LlmConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            default_country: kyc_core::DEFAULT_COUNTRY.code().to_string(),
            policy: DecisionPolicy::default(),
            extraction: ExtractionConfig::default(),
            detection: DetectionConfig::default(),
            timeouts: TimeoutConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ledger: LedgerConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

/// `[extraction]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// What the OCR chain does when every provider errors.
    pub exhaustion: ExhaustionPolicy,
    /// Tier 1 accepts confidence strictly above this.
    pub structured_threshold: f64,
    /// Tier 2 accepts confidence strictly above this.
    pub json_schema_threshold: f64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        ExtractionConfig {
            exhaustion: ExhaustionPolicy::AlwaysDegrade,
            structured_threshold: 0.6,
            json_schema_threshold: 0.5,
        }
    }
}

/// `[detection]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub keyword_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            keyword_threshold: crate::detector::DEFAULT_KEYWORD_THRESHOLD,
        }
    }
}

/// `[timeouts]` section, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per vision/OCR provider call.
    pub provider_ms: u64,
    /// Per AI agent or classifier call.
    pub agent_ms: u64,
    /// Whole workflow, from start to terminal state. 0 disables it.
    pub workflow_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            provider_ms: 30_000,
            agent_ms: 30_000,
            workflow_ms: 300_000,
        }
    }
}

impl TimeoutConfig {
    pub fn provider(&self) -> Duration {
        Duration::from_millis(self.provider_ms)
    }

    pub fn agent(&self) -> Duration {
        Duration::from_millis(self.agent_ms)
    }

    pub fn workflow(&self) -> Option<Duration> {
        (self.workflow_ms > 0).then(|| Duration::from_millis(self.workflow_ms))
    }
}

/// `[rate_limit]` section. Applies per provider, across all workflows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: u64,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 60,
            window_secs: 60,
        }
    }
}

/// `[ledger]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub merkle_batch_size: usize,
    /// Absent keeps chains forever.
    pub retention_days: Option<u32>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            merkle_batch_size: DEFAULT_MERKLE_BATCH_SIZE,
            retention_days: None,
        }
    }
}

impl LedgerConfig {
    pub fn retention(&self) -> RetentionPolicy {
        RetentionPolicy {
            days: self.retention_days,
        }
    }
}

/// `[llm]` section. The API key comes from `ANTHROPIC_API_KEY`, never from
/// the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub max_retries: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        LlmConfig {
            model: "claude-sonnet-4-20250514".to_string(),
            max_retries: 2,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config TOML file from `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn default_country(&self) -> Result<Country, ConfigError> {
        Country::from_code(&self.default_country).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "default_country '{}' is not a supported country code",
                self.default_country
            ))
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.default_country()?;

        let thresholds = [
            ("policy.auto_approve_threshold", self.policy.auto_approve_threshold),
            ("policy.country_confidence_floor", self.policy.country_confidence_floor),
            ("policy.extraction_confidence_floor", self.policy.extraction_confidence_floor),
            ("policy.ocr_confidence_floor", self.policy.ocr_confidence_floor),
            ("extraction.structured_threshold", self.extraction.structured_threshold),
            ("extraction.json_schema_threshold", self.extraction.json_schema_threshold),
            ("detection.keyword_threshold", self.detection.keyword_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
