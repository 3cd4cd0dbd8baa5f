//! Weighted auto-approve / auto-reject policy.
//!
//! The overall confidence is the unweighted mean of country-detection
//! confidence, field-extraction confidence and the validation score.
//! Every rejection carries at least one human-readable reason.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::fields::clamp_confidence;
use crate::validate::{CHECK_DATE_OF_BIRTH, CHECK_FULL_NAME, CHECK_ID_NUMBER};

pub const REASON_LOW_COUNTRY: &str = "low country detection confidence";
pub const REASON_LOW_EXTRACTION: &str = "low field extraction confidence";
pub const REASON_POOR_IMAGE: &str = "poor document image quality";
pub const REASON_BELOW_THRESHOLD: &str = "overall confidence below threshold";

/// Final verdict of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Approved,
    Rejected,
}

/// Thresholds applied by [`DecisionEngine`]. All values are configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    /// Overall confidence at or above which a document is approved.
    pub auto_approve_threshold: f64,
    pub country_confidence_floor: f64,
    pub extraction_confidence_floor: f64,
    pub ocr_confidence_floor: f64,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        DecisionPolicy {
            auto_approve_threshold: 0.8,
            country_confidence_floor: 0.6,
            extraction_confidence_floor: 0.6,
            ocr_confidence_floor: 0.5,
        }
    }
}

/// Every input signal the decision looks at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecisionSignals {
    pub country_confidence: f64,
    pub extraction_confidence: f64,
    pub validation_score: f64,
    /// Confidence of the text reading, when known.
    pub ocr_confidence: Option<f64>,
    pub failed_checks: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    pub decision: Decision,
    /// Overall confidence in `[0, 1]`.
    pub confidence: f64,
    /// Empty when approved, never empty when rejected.
    pub rejection_reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    policy: DecisionPolicy,
}

impl DecisionEngine {
    pub fn new(policy: DecisionPolicy) -> Self {
        DecisionEngine { policy }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    /// Mean of the three confidence signals, each clamped to `[0, 1]`.
    pub fn overall_confidence(
        country_confidence: f64,
        extraction_confidence: f64,
        validation_score: f64,
    ) -> f64 {
        clamp_confidence(
            (clamp_confidence(country_confidence)
                + clamp_confidence(extraction_confidence)
                + clamp_confidence(validation_score))
                / 3.0,
        )
    }

    /// Decide from the three core signals only.
    pub fn decide(
        &self,
        country_confidence: f64,
        extraction_confidence: f64,
        validation_score: f64,
    ) -> DecisionOutcome {
        self.decide_with(&DecisionSignals {
            country_confidence,
            extraction_confidence,
            validation_score,
            ..Default::default()
        })
    }

    /// Decide with the full signal set, including failed checks and the
    /// OCR reading confidence for rejection reasons.
    pub fn decide_with(&self, signals: &DecisionSignals) -> DecisionOutcome {
        let confidence = Self::overall_confidence(
            signals.country_confidence,
            signals.extraction_confidence,
            signals.validation_score,
        );

        if confidence >= self.policy.auto_approve_threshold {
            return DecisionOutcome {
                decision: Decision::Approved,
                confidence,
                rejection_reasons: Vec::new(),
            };
        }

        let mut reasons = Vec::new();
        if clamp_confidence(signals.country_confidence) < self.policy.country_confidence_floor {
            reasons.push(REASON_LOW_COUNTRY.to_string());
        }
        if clamp_confidence(signals.extraction_confidence)
            < self.policy.extraction_confidence_floor
        {
            reasons.push(REASON_LOW_EXTRACTION.to_string());
        }
        for check in &signals.failed_checks {
            reasons.push(check_reason(check));
        }
        if let Some(ocr) = signals.ocr_confidence {
            if clamp_confidence(ocr) < self.policy.ocr_confidence_floor {
                reasons.push(REASON_POOR_IMAGE.to_string());
            }
        }
        if reasons.is_empty() {
            reasons.push(REASON_BELOW_THRESHOLD.to_string());
        }

        DecisionOutcome {
            decision: Decision::Rejected,
            confidence,
            rejection_reasons: reasons,
        }
    }
}

/// Human-readable reason for a failed validation check.
pub fn check_reason(check: &str) -> String {
    match check {
        CHECK_ID_NUMBER => "ID number missing or invalid for the issuing country".to_string(),
        CHECK_DATE_OF_BIRTH => "date of birth missing or unreadable".to_string(),
        CHECK_FULL_NAME => "full name missing or too short".to_string(),
        other => format!("validation check failed: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_signals_approve() {
        let out = DecisionEngine::default().decide(0.9, 0.85, 1.0);
        assert_eq!(out.decision, Decision::Approved);
        assert!((out.confidence - 0.9166666).abs() < 1e-6);
        assert!(out.rejection_reasons.is_empty());
    }

    #[test]
    fn threshold_is_inclusive() {
        let engine = DecisionEngine::new(DecisionPolicy {
            auto_approve_threshold: 0.5,
            ..Default::default()
        });
        let out = engine.decide(0.5, 0.5, 0.5);
        assert_eq!(out.confidence, 0.5);
        assert_eq!(out.decision, Decision::Approved);
    }

    #[test]
    fn low_country_confidence_reported() {
        let out = DecisionEngine::default().decide(0.3, 0.9, 1.0);
        assert_eq!(out.decision, Decision::Rejected);
        assert_eq!(out.rejection_reasons, vec![REASON_LOW_COUNTRY.to_string()]);
    }

    #[test]
    fn rejection_without_specific_cause_uses_default_reason() {
        let out = DecisionEngine::default().decide(0.7, 0.7, 0.7);
        assert_eq!(out.decision, Decision::Rejected);
        assert_eq!(out.rejection_reasons, vec![REASON_BELOW_THRESHOLD.to_string()]);
    }

    #[test]
    fn failed_checks_and_ocr_map_to_reasons() {
        let signals = DecisionSignals {
            country_confidence: 1.0,
            extraction_confidence: 0.4,
            validation_score: 1.0 / 3.0,
            ocr_confidence: Some(0.2),
            failed_checks: [CHECK_ID_NUMBER.to_string(), CHECK_DATE_OF_BIRTH.to_string()]
                .into_iter()
                .collect(),
        };
        let out = DecisionEngine::default().decide_with(&signals);
        assert_eq!(out.decision, Decision::Rejected);
        assert_eq!(
            out.rejection_reasons,
            vec![
                REASON_LOW_EXTRACTION.to_string(),
                check_reason(CHECK_DATE_OF_BIRTH),
                check_reason(CHECK_ID_NUMBER),
                REASON_POOR_IMAGE.to_string(),
            ]
        );
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let out = DecisionEngine::default().decide(5.0, f64::NAN, -1.0);
        assert!((0.0..=1.0).contains(&out.confidence));
        assert_eq!(out.decision, Decision::Rejected);
        assert!(!out.rejection_reasons.is_empty());
    }

    #[test]
    fn rejection_reasons_never_empty() {
        let engine = DecisionEngine::default();
        let steps = [0.0, 0.25, 0.5, 0.6, 0.75, 0.79, 1.0];
        for c in steps {
            for e in steps {
                for v in steps {
                    let out = engine.decide(c, e, v);
                    assert!((0.0..=1.0).contains(&out.confidence));
                    if out.decision == Decision::Rejected {
                        assert!(!out.rejection_reasons.is_empty(), "{} {} {}", c, e, v);
                    }
                }
            }
        }
    }

    #[test]
    fn custom_threshold_applies() {
        let engine = DecisionEngine::new(DecisionPolicy {
            auto_approve_threshold: 0.5,
            ..Default::default()
        });
        assert_eq!(engine.decide(0.6, 0.6, 0.6).decision, Decision::Approved);
    }
}
