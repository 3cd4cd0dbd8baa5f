//! kyc-engine: the KYC workflow engine.
//!
//! A [`WorkflowEngine`] takes a submitted identity document through
//! text extraction ([`ProviderChain`]), issuing-country detection
//! ([`CountryDetector`]), field extraction ([`FieldExtractor`]), per-country
//! validation and the approve/reject decision, recording every transition
//! in the workflow's audit chain.
//!
//! External backends plug in through [`VisionProvider`],
//! [`TextExtractionAgent`], [`CountryClassifier`] and [`LlmClient`]. The
//! Anthropic-backed implementations live behind the `anthropic` feature.

pub mod agents;
pub mod cancel;
pub mod config;
pub mod credential;
pub mod detector;
pub mod document;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod provider;
pub mod rate_limit;
pub mod workflow;

pub use agents::{GeneralAgent, JsonSchemaAgent, StructuredAgent, TextExtractionAgent};
pub use cancel::CancellationToken;
pub use config::EngineConfig;
pub use credential::generate_credential_id;
pub use detector::{CountryClassifier, CountryDetection, CountryDetector, LlmCountryClassifier};
pub use document::{DocumentSource, MemoryDocuments};
pub use error::{ConfigError, CredentialError, EngineError, ProviderError};
pub use extractor::{FieldExtractor, TieredExtraction};
pub use llm::{LlmClient, LlmError, Message};
pub use provider::{
    Acceptance, CallContext, ChainOutcome, ExhaustionPolicy, PlainTextProvider, ProviderChain,
    ProviderReading, VisionProvider,
};
pub use rate_limit::RateLimiter;
pub use workflow::{KycWorkflow, OcrReading, Submission, WorkflowEngine, WorkflowFailure};

#[cfg(feature = "anthropic")]
pub use llm::AnthropicClient;
#[cfg(feature = "anthropic")]
pub use provider::AnthropicVisionProvider;
