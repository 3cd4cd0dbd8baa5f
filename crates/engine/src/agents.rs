//! AI field extraction agents over any [`LlmClient`].
//!
//! Three agents back the first three field extraction tiers:
//!
//! - [`StructuredAgent`] -- strict typed response, retried with a
//!   correction prompt when the answer does not parse
//! - [`JsonSchemaAgent`] -- one completion validated against a JSON Schema
//! - [`GeneralAgent`] -- one completion, lenient parsing

use std::sync::Arc;

use async_trait::async_trait;
use kyc_core::{clamp_confidence, Country, FieldExtraction, IdentityFields};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::llm::{strip_code_fences, LlmClient, LlmError, Message};

/// Structured field extraction from document text.
#[async_trait]
pub trait TextExtractionAgent: Send + Sync {
    /// Stable identifier, also the method tag and the rate-limit key.
    fn name(&self) -> &str;

    async fn extract(&self, text: &str, country: Country) -> Result<FieldExtraction, ProviderError>;
}

const FIELD_LIST: &str = "id_number, full_name, first_name, last_name, date_of_birth, gender, \
nationality, issue_date, expiry_date, place_of_birth, address";

fn user_message(text: &str, country: Country) -> String {
    format!(
        "Issuing country: {} ({})\n\nDocument text:\n{}",
        country.name(),
        country.code(),
        text
    )
}

fn llm_to_provider(name: &str, e: LlmError) -> ProviderError {
    match e {
        LlmError::ParseError(message) => ProviderError::Malformed {
            provider: name.to_string(),
            message,
        },
        other => ProviderError::Unavailable {
            provider: name.to_string(),
            message: other.to_string(),
        },
    }
}

fn malformed(name: &str, message: impl Into<String>) -> ProviderError {
    ProviderError::Malformed {
        provider: name.to_string(),
        message: message.into(),
    }
}

// ──────────────────────────────────────────────
// StructuredAgent
// ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StructuredResponse {
    fields: IdentityFields,
    confidence: f64,
}

/// Schema-constrained agent: the response must deserialize into the exact
/// identity field schema with a self-reported confidence.
pub struct StructuredAgent {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
    /// Maximum number of retries on invalid responses.
    pub max_retries: usize,
}

impl StructuredAgent {
    pub const NAME: &'static str = "structured_agent";

    pub fn new(client: Arc<dyn LlmClient>, model: String) -> Self {
        Self {
            client,
            model,
            max_retries: 2,
        }
    }

    fn system_prompt() -> String {
        format!(
            r#"You extract identity fields from the OCR text of a government identity document.

Respond with a JSON object in exactly this format:

{{
  "fields": {{ "<field>": "<value>" }},
  "confidence": <number between 0 and 1>
}}

Allowed field names: {FIELD_LIST}.
Omit any field that is not printed on the document. Do not guess.
Dates keep the layout printed on the document.
Respond only with valid JSON. Do not include markdown fences or other text."#
        )
    }

    fn parse_response(response: &str) -> Result<FieldExtraction, String> {
        let parsed: StructuredResponse = serde_json::from_str(strip_code_fences(response))
            .map_err(|e| format!("Failed to parse JSON: {}", e))?;
        if !parsed.confidence.is_finite() {
            return Err("confidence must be a finite number".to_string());
        }
        Ok(FieldExtraction {
            fields: parsed.fields.cleaned(),
            confidence: clamp_confidence(parsed.confidence),
            method: Self::NAME.to_string(),
        })
    }
}

#[async_trait]
impl TextExtractionAgent for StructuredAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self, text: &str, country: Country) -> Result<FieldExtraction, ProviderError> {
        let mut messages = vec![
            Message::system(Self::system_prompt()),
            Message::user(user_message(text, country)),
        ];

        let mut attempt = 0;
        loop {
            // Network/API errors are not retried here; the tier chain moves on
            let response = self
                .client
                .complete(messages.clone(), &self.model)
                .await
                .map_err(|e| llm_to_provider(Self::NAME, e))?;

            match Self::parse_response(&response) {
                Ok(extraction) => return Ok(extraction),
                Err(parse_error) => {
                    if attempt >= self.max_retries {
                        tracing::warn!(
                            agent = Self::NAME,
                            max_retries = self.max_retries,
                            error = %parse_error,
                            "retries exhausted"
                        );
                        return Err(malformed(Self::NAME, parse_error));
                    }
                    attempt += 1;

                    messages.push(Message::assistant(response));
                    messages.push(Message::user(format!(
                        "Your response was invalid: {}. Please try again, responding with valid JSON only.",
                        parse_error
                    )));
                }
            }
        }
    }
}

// ──────────────────────────────────────────────
// JsonSchemaAgent
// ──────────────────────────────────────────────

/// The JSON Schema a tier-2 response must satisfy.
pub fn identity_response_schema() -> Value {
    let string_field = json!({ "type": ["string", "null"] });
    let mut properties = serde_json::Map::new();
    for field in FIELD_LIST.split(", ") {
        properties.insert(field.to_string(), string_field.clone());
    }
    json!({
        "type": "object",
        "required": ["fields", "confidence"],
        "additionalProperties": false,
        "properties": {
            "fields": {
                "type": "object",
                "additionalProperties": false,
                "properties": properties,
            },
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
        }
    })
}

/// Raw completion constrained by a JSON Schema included in the prompt and
/// checked on the way back.
pub struct JsonSchemaAgent {
    client: Arc<dyn LlmClient>,
    model: String,
    schema: Value,
    validator: jsonschema::Validator,
}

impl JsonSchemaAgent {
    pub const NAME: &'static str = "json_schema";

    pub fn new(client: Arc<dyn LlmClient>, model: String) -> Result<Self, String> {
        let schema = identity_response_schema();
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| format!("failed to compile schema: {}", e))?;
        Ok(Self {
            client,
            model,
            schema,
            validator,
        })
    }

    fn system_prompt(&self) -> String {
        format!(
            "Extract identity fields from the document text. Respond with one JSON value \
that validates against this JSON Schema and nothing else:\n{}",
            self.schema
        )
    }
}

#[async_trait]
impl TextExtractionAgent for JsonSchemaAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self, text: &str, country: Country) -> Result<FieldExtraction, ProviderError> {
        let messages = vec![
            Message::system(self.system_prompt()),
            Message::user(user_message(text, country)),
        ];
        let response = self
            .client
            .complete(messages, &self.model)
            .await
            .map_err(|e| llm_to_provider(Self::NAME, e))?;

        let value: Value = serde_json::from_str(strip_code_fences(&response))
            .map_err(|e| malformed(Self::NAME, format!("Failed to parse JSON: {}", e)))?;

        let errors: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| format!("{}", e))
            .collect();
        if !errors.is_empty() {
            return Err(malformed(Self::NAME, errors.join("; ")));
        }

        let fields: IdentityFields = serde_json::from_value(value["fields"].clone())
            .map_err(|e| malformed(Self::NAME, e.to_string()))?;
        let confidence = value["confidence"].as_f64().unwrap_or(0.0);
        Ok(FieldExtraction {
            fields: fields.cleaned(),
            confidence: clamp_confidence(confidence),
            method: Self::NAME.to_string(),
        })
    }
}

// ──────────────────────────────────────────────
// GeneralAgent
// ──────────────────────────────────────────────

/// General-purpose extraction: accepts any JSON object, reading known field
/// names from the top level or a `fields` member and ignoring the rest.
pub struct GeneralAgent {
    client: Arc<dyn LlmClient>,
    model: String,
}

impl GeneralAgent {
    pub const NAME: &'static str = "general_ai";

    pub fn new(client: Arc<dyn LlmClient>, model: String) -> Self {
        Self { client, model }
    }

    fn parse_response(response: &str) -> Result<FieldExtraction, String> {
        let value: Value = serde_json::from_str(strip_code_fences(response))
            .map_err(|e| format!("Failed to parse JSON: {}", e))?;
        let obj = value
            .as_object()
            .ok_or_else(|| "response is not a JSON object".to_string())?;

        let confidence = obj
            .get("confidence")
            .and_then(|c| c.as_f64().or_else(|| c.as_str().and_then(|s| s.parse().ok())))
            .ok_or_else(|| "response carries no confidence".to_string())?;

        let source = obj.get("fields").and_then(Value::as_object).unwrap_or(obj);
        let get = |key: &str| -> Option<String> {
            match source.get(key)? {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            }
        };
        let fields = IdentityFields {
            id_number: get("id_number"),
            full_name: get("full_name"),
            first_name: get("first_name"),
            last_name: get("last_name"),
            date_of_birth: get("date_of_birth"),
            gender: get("gender"),
            nationality: get("nationality"),
            issue_date: get("issue_date"),
            expiry_date: get("expiry_date"),
            place_of_birth: get("place_of_birth"),
            address: get("address"),
        }
        .cleaned();

        Ok(FieldExtraction {
            fields,
            confidence: clamp_confidence(confidence),
            method: Self::NAME.to_string(),
        })
    }
}

#[async_trait]
impl TextExtractionAgent for GeneralAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self, text: &str, country: Country) -> Result<FieldExtraction, ProviderError> {
        let messages = vec![
            Message::system(format!(
                "Read the identity document text and return a JSON object with the fields \
you can find ({FIELD_LIST}) and a \"confidence\" between 0 and 1."
            )),
            Message::user(user_message(text, country)),
        ];
        let response = self
            .client
            .complete(messages, &self.model)
            .await
            .map_err(|e| llm_to_provider(Self::NAME, e))?;
        Self::parse_response(&response).map_err(|e| malformed(Self::NAME, e))
    }
}
