//! Issuing-country detection: keyword scoring, AI fallback, then the
//! default country.

use std::sync::Arc;

use async_trait::async_trait;
use kyc_core::{clamp_confidence, detect_by_keywords, Country, DEFAULT_COUNTRY};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::llm::{strip_code_fences, LlmClient, LlmError, Message};
use crate::provider::{guarded, CallContext};

pub const METHOD_KEYWORD: &str = "keyword";
pub const METHOD_AI: &str = "ai";
pub const METHOD_ERROR: &str = "error";

/// Keyword confidence below which the AI classifier is consulted.
pub const DEFAULT_KEYWORD_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryDetection {
    pub country: Country,
    pub confidence: f64,
    /// `"keyword"`, `"ai"` or `"error"`.
    pub method: String,
}

/// Classifies a document's issuing country among the supported countries.
#[async_trait]
pub trait CountryClassifier: Send + Sync {
    fn name(&self) -> &str;

    async fn classify(&self, text: &str) -> Result<(Country, f64), ProviderError>;
}

/// Classifier backed by an [`LlmClient`]; the answer must be one of the
/// fourteen codes.
pub struct LlmCountryClassifier {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl LlmCountryClassifier {
    pub const NAME: &'static str = "country_classifier";

    pub fn new(client: Arc<dyn LlmClient>, model: String) -> Self {
        Self { client, model }
    }

    fn system_prompt() -> String {
        let codes: Vec<String> = Country::ALL
            .iter()
            .map(|c| format!("{} ({})", c.code(), c.name()))
            .collect();
        format!(
            "Identify which country issued the identity document whose text follows. \
It is one of: {}.\n\
Respond only with JSON: {{\"country\": \"<two-letter code>\", \"confidence\": <0.0-1.0>}}",
            codes.join(", ")
        )
    }

    fn parse_response(response: &str) -> Result<(Country, f64), String> {
        let value: serde_json::Value = serde_json::from_str(strip_code_fences(response))
            .map_err(|e| format!("Failed to parse JSON: {}", e))?;
        let code = value
            .get("country")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "Response missing 'country' field".to_string())?;
        let country = Country::from_code(code)
            .ok_or_else(|| format!("'{}' is not a supported country code", code))?;
        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| "Response missing numeric 'confidence' field".to_string())?;
        Ok((country, clamp_confidence(confidence)))
    }
}

#[async_trait]
impl CountryClassifier for LlmCountryClassifier {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn classify(&self, text: &str) -> Result<(Country, f64), ProviderError> {
        let messages = vec![Message::system(Self::system_prompt()), Message::user(text)];
        let response = self
            .client
            .complete(messages, &self.model)
            .await
            .map_err(|e| match e {
                LlmError::ParseError(message) => ProviderError::Malformed {
                    provider: Self::NAME.to_string(),
                    message,
                },
                other => ProviderError::Unavailable {
                    provider: Self::NAME.to_string(),
                    message: other.to_string(),
                },
            })?;
        Self::parse_response(&response).map_err(|message| ProviderError::Malformed {
            provider: Self::NAME.to_string(),
            message,
        })
    }
}

/// Keyword stage first; below the threshold the classifier decides; when
/// that is missing or fails, the fallback country is returned with
/// confidence 0 and method `"error"`.
pub struct CountryDetector {
    classifier: Option<Arc<dyn CountryClassifier>>,
    keyword_threshold: f64,
    default_country: Country,
}

impl Default for CountryDetector {
    fn default() -> Self {
        CountryDetector {
            classifier: None,
            keyword_threshold: DEFAULT_KEYWORD_THRESHOLD,
            default_country: DEFAULT_COUNTRY,
        }
    }
}

impl CountryDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn CountryClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_keyword_threshold(mut self, threshold: f64) -> Self {
        self.keyword_threshold = threshold;
        self
    }

    pub fn with_default_country(mut self, country: Country) -> Self {
        self.default_country = country;
        self
    }

    /// Detect the issuing country. Never fails.
    ///
    /// `hint` replaces the configured default country when detection falls
    /// through to the default.
    pub async fn detect(
        &self,
        text: &str,
        hint: Option<Country>,
        ctx: &CallContext,
    ) -> CountryDetection {
        let keyword = detect_by_keywords(text);
        if keyword.confidence >= self.keyword_threshold {
            return CountryDetection {
                country: keyword.country,
                confidence: keyword.confidence,
                method: METHOD_KEYWORD.to_string(),
            };
        }
        tracing::debug!(
            best = %keyword.country,
            confidence = keyword.confidence,
            "keyword detection below threshold"
        );

        if let Some(classifier) = &self.classifier {
            match guarded(classifier.name(), ctx, classifier.classify(text)).await {
                Ok((country, confidence)) => {
                    return CountryDetection {
                        country,
                        confidence,
                        method: METHOD_AI.to_string(),
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "country classifier failed; using default country");
                }
            }
        }

        CountryDetection {
            country: hint.unwrap_or(self.default_country),
            confidence: 0.0,
            method: METHOD_ERROR.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::llm::tests::MockLlmClient;

    fn ctx() -> CallContext {
        CallContext::new(Duration::from_secs(5))
    }

    fn classifier(responses: Vec<Result<String, LlmError>>) -> Arc<dyn CountryClassifier> {
        Arc::new(LlmCountryClassifier::new(
            Arc::new(MockLlmClient::new(responses)),
            "m".into(),
        ))
    }

    #[tokio::test]
    async fn strong_keywords_skip_the_classifier() {
        let detector = CountryDetector::new().with_classifier(classifier(vec![]));
        let d = detector
            .detect("REPUBLIC OF NAMIBIA NATIONAL IDENTITY CARD", None, &ctx())
            .await;
        assert_eq!(d.country, Country::Namibia);
        assert_eq!(d.method, METHOD_KEYWORD);
    }

    #[tokio::test]
    async fn weak_keywords_consult_the_classifier() {
        let detector = CountryDetector::new().with_classifier(classifier(vec![Ok(
            r#"{"country": "zm", "confidence": 0.8}"#.to_string(),
        )]));
        let d = detector.detect("identity card 1234", None, &ctx()).await;
        assert_eq!(d.country, Country::Zambia);
        assert_eq!(d.confidence, 0.8);
        assert_eq!(d.method, METHOD_AI);
    }

    #[tokio::test]
    async fn unsupported_code_falls_back_to_default() {
        let detector = CountryDetector::new().with_classifier(classifier(vec![Ok(
            r#"{"country": "KE", "confidence": 0.9}"#.to_string(),
        )]));
        let d = detector.detect("jamhuri ya kenya", None, &ctx()).await;
        assert_eq!(d.country, DEFAULT_COUNTRY);
        assert_eq!(d.confidence, 0.0);
        assert_eq!(d.method, METHOD_ERROR);
    }

    #[tokio::test]
    async fn classifier_error_uses_hint() {
        let detector = CountryDetector::new().with_classifier(classifier(vec![Err(
            LlmError::NetworkError("down".into()),
        )]));
        let d = detector.detect("", Some(Country::Malawi), &ctx()).await;
        assert_eq!(d.country, Country::Malawi);
        assert_eq!(d.method, METHOD_ERROR);
    }

    #[tokio::test]
    async fn no_classifier_and_no_keywords_is_default() {
        let d = CountryDetector::new()
            .with_default_country(Country::Botswana)
            .detect("nothing useful", None, &ctx())
            .await;
        assert_eq!(d.country, Country::Botswana);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn prompt_lists_every_code() {
        let prompt = LlmCountryClassifier::system_prompt();
        for c in Country::ALL {
            assert!(prompt.contains(c.code()));
        }
    }
}
