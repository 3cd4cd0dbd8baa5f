//! Workflow state machine as an explicit transition table.
//!
//! States advance strictly linearly; `Failed` is absorbing and reachable
//! from every non-terminal state. [`transition`] is pure: it maps the
//! current state and a step event to the next state and the audit event
//! type that must be recorded for the move.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a KYC workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Initialized,
    DocumentUploaded,
    OcrComplete,
    CountryDetected,
    FieldsExtracted,
    Validated,
    Decided,
    Completed,
    Failed,
}

impl WorkflowState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowState::Completed | WorkflowState::Failed)
    }

    /// The event that moves this state forward, if any.
    pub fn next_step(self) -> Option<StepEvent> {
        match self {
            WorkflowState::Initialized => Some(StepEvent::DocumentUploaded),
            WorkflowState::DocumentUploaded => Some(StepEvent::OcrCompleted),
            WorkflowState::OcrComplete => Some(StepEvent::CountryDetected),
            WorkflowState::CountryDetected => Some(StepEvent::FieldsExtracted),
            WorkflowState::FieldsExtracted => Some(StepEvent::Validated),
            WorkflowState::Validated => Some(StepEvent::Decided),
            WorkflowState::Decided => Some(StepEvent::Completed),
            WorkflowState::Completed | WorkflowState::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowState::Initialized => "initialized",
            WorkflowState::DocumentUploaded => "document_uploaded",
            WorkflowState::OcrComplete => "ocr_complete",
            WorkflowState::CountryDetected => "country_detected",
            WorkflowState::FieldsExtracted => "fields_extracted",
            WorkflowState::Validated => "validated",
            WorkflowState::Decided => "decided",
            WorkflowState::Completed => "completed",
            WorkflowState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<WorkflowState> {
        [
            WorkflowState::Initialized,
            WorkflowState::DocumentUploaded,
            WorkflowState::OcrComplete,
            WorkflowState::CountryDetected,
            WorkflowState::FieldsExtracted,
            WorkflowState::Validated,
            WorkflowState::Decided,
            WorkflowState::Completed,
            WorkflowState::Failed,
        ]
        .into_iter()
        .find(|state| state.as_str() == s)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that happened to a workflow and may move it to a new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEvent {
    DocumentUploaded,
    OcrCompleted,
    CountryDetected,
    FieldsExtracted,
    Validated,
    Decided,
    Completed,
    Failed,
}

/// Kind of an audit ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    WorkflowInitialized,
    DocumentUploaded,
    #[serde(rename = "OCRComplete")]
    OcrComplete,
    CountryDetected,
    FieldsExtracted,
    ValidationComplete,
    DecisionMade,
    WorkflowCompleted,
    WorkflowFailed,
    /// A BFR credential was minted. Not a state transition.
    CredentialIssued,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::WorkflowInitialized => "WorkflowInitialized",
            EventType::DocumentUploaded => "DocumentUploaded",
            EventType::OcrComplete => "OCRComplete",
            EventType::CountryDetected => "CountryDetected",
            EventType::FieldsExtracted => "FieldsExtracted",
            EventType::ValidationComplete => "ValidationComplete",
            EventType::DecisionMade => "DecisionMade",
            EventType::WorkflowCompleted => "WorkflowCompleted",
            EventType::WorkflowFailed => "WorkflowFailed",
            EventType::CredentialIssued => "CredentialIssued",
        }
    }

    pub fn parse(s: &str) -> Option<EventType> {
        [
            EventType::WorkflowInitialized,
            EventType::DocumentUploaded,
            EventType::OcrComplete,
            EventType::CountryDetected,
            EventType::FieldsExtracted,
            EventType::ValidationComplete,
            EventType::DecisionMade,
            EventType::WorkflowCompleted,
            EventType::WorkflowFailed,
            EventType::CredentialIssued,
        ]
        .into_iter()
        .find(|t| t.as_str() == s)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Warning => "Warning",
            Severity::Error => "Error",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "Info" => Some(Severity::Info),
            "Warning" => Some(Severity::Warning),
            "Error" => Some(Severity::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step event that is not legal in the current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {event:?} is not allowed from state '{from}'")]
pub struct InvalidTransition {
    pub from: WorkflowState,
    pub event: StepEvent,
}

/// The transition table.
///
/// Returns the next state and the audit event type recorded for the move,
/// or [`InvalidTransition`] when the event is not legal from `state`.
pub fn transition(
    state: WorkflowState,
    event: StepEvent,
) -> Result<(WorkflowState, EventType), InvalidTransition> {
    use StepEvent as E;
    use WorkflowState as S;

    let next = match (state, event) {
        (S::Initialized, E::DocumentUploaded) => (S::DocumentUploaded, EventType::DocumentUploaded),
        (S::DocumentUploaded, E::OcrCompleted) => (S::OcrComplete, EventType::OcrComplete),
        (S::OcrComplete, E::CountryDetected) => (S::CountryDetected, EventType::CountryDetected),
        (S::CountryDetected, E::FieldsExtracted) => {
            (S::FieldsExtracted, EventType::FieldsExtracted)
        }
        (S::FieldsExtracted, E::Validated) => (S::Validated, EventType::ValidationComplete),
        (S::Validated, E::Decided) => (S::Decided, EventType::DecisionMade),
        (S::Decided, E::Completed) => (S::Completed, EventType::WorkflowCompleted),
        (s, E::Failed) if !s.is_terminal() => (S::Failed, EventType::WorkflowFailed),
        (from, event) => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}
