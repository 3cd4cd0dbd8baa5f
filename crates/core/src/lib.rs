//! kyc-core: identity document rules for the SADC KYC workflow.
//!
//! Pure, synchronous building blocks shared by the workflow engine:
//!
//! - [`country`] -- the fourteen-country table and keyword detection
//! - [`fields`] -- the identity field schema
//! - [`patterns`] -- regex field extraction (the guaranteed last tier)
//! - [`validate`] -- per-country validation reports
//! - [`decision`] -- weighted approve/reject policy
//! - [`state`] -- the workflow transition table and audit event kinds
//!
//! Nothing in this crate performs I/O; identical inputs always produce
//! identical outputs.

pub mod country;
pub mod decision;
pub mod fields;
pub mod patterns;
pub mod state;
pub mod validate;

pub use country::{detect_by_keywords, Country, IdNumberRule, KeywordDetection, DEFAULT_COUNTRY};
pub use decision::{Decision, DecisionEngine, DecisionOutcome, DecisionPolicy, DecisionSignals};
pub use fields::{clamp_confidence, FieldExtraction, IdentityFields};
pub use state::{transition, EventType, InvalidTransition, Severity, StepEvent, WorkflowState};
pub use validate::{SadcValidator, ValidationReport};
