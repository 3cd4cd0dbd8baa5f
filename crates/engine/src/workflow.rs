//! The KYC workflow aggregate and the engine that advances it.
//!
//! Every workflow owns one audit chain. Each step runs its component,
//! appends exactly one audit entry, and only then moves the workflow to the
//! next state. Any escalated error moves it to `Failed` through a
//! `WorkflowFailed` entry instead.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kyc_core::{
    transition, Country, Decision, DecisionEngine, DecisionPolicy, DecisionSignals, EventType,
    IdentityFields, Severity, SadcValidator, StepEvent, ValidationReport, WorkflowState,
};
use kyc_ledger::{AuditEntry, AuditLedger, ChainSubject, NewEntry};
use kyc_storage::{StorageError, WorkflowRecord, WorkflowStore};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::agents::{GeneralAgent, JsonSchemaAgent, StructuredAgent};
use crate::cancel::CancellationToken;
use crate::config::{EngineConfig, TimeoutConfig};
use crate::detector::{CountryDetector, LlmCountryClassifier, METHOD_ERROR};
use crate::document::DocumentSource;
use crate::error::{ConfigError, EngineError};
use crate::extractor::FieldExtractor;
use crate::llm::LlmClient;
use crate::provider::{Acceptance, CallContext, PlainTextProvider, ProviderChain};
use crate::rate_limit::RateLimiter;

// ──────────────────────────────────────────────
// Aggregate
// ──────────────────────────────────────────────

/// The text reading kept on a workflow after the OCR step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrReading {
    pub text: String,
    pub confidence: f64,
    pub method: String,
    /// `true` when no provider met its acceptance rule.
    pub degraded: bool,
}

/// Why a workflow ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowFailure {
    pub error_class: String,
    pub message: String,
    /// The last state the workflow completed before failing.
    pub last_state: WorkflowState,
}

/// One document verification, from submission to decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycWorkflow {
    pub workflow_id: String,
    pub user_id: String,
    pub document_id: String,
    pub country_hint: Option<Country>,
    pub chain_id: String,
    pub current_state: WorkflowState,
    pub document_sha256: Option<String>,
    pub ocr: Option<OcrReading>,
    pub detected_country: Option<Country>,
    pub country_confidence: f64,
    pub country_method: Option<String>,
    pub extracted_fields: Option<IdentityFields>,
    pub extraction_confidence: Option<f64>,
    pub extraction_method: Option<String>,
    pub validation_report: Option<ValidationReport>,
    pub final_decision: Option<Decision>,
    pub decision_confidence: Option<f64>,
    pub rejection_reasons: Vec<String>,
    pub failure: Option<WorkflowFailure>,
    pub credential_id: Option<String>,
    /// The credential-scoped audit chain opened when the credential was minted.
    #[serde(default)]
    pub credential_chain_id: Option<String>,
    pub audit_trail: Vec<AuditEntry>,
    pub created_at: String,
    pub updated_at: String,
}

impl KycWorkflow {
    pub(crate) fn new(submission: Submission, workflow_id: String, chain_id: String) -> Self {
        let now = now_rfc3339();
        KycWorkflow {
            workflow_id,
            user_id: submission.user_id,
            document_id: submission.document_id,
            country_hint: submission.country_hint,
            chain_id,
            current_state: WorkflowState::Initialized,
            document_sha256: None,
            ocr: None,
            detected_country: None,
            country_confidence: 0.0,
            country_method: None,
            extracted_fields: None,
            extraction_confidence: None,
            extraction_method: None,
            validation_report: None,
            final_decision: None,
            decision_confidence: None,
            rejection_reasons: Vec::new(),
            failure: None,
            credential_id: None,
            credential_chain_id: None,
            audit_trail: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Storage record for a [`WorkflowStore`].
    pub fn to_record(&self) -> Result<WorkflowRecord, StorageError> {
        let data = serde_json::to_value(self).map_err(|e| StorageError::Backend(e.to_string()))?;
        Ok(WorkflowRecord {
            workflow_id: self.workflow_id.clone(),
            user_id: self.user_id.clone(),
            document_id: self.document_id.clone(),
            state: self.current_state.as_str().to_string(),
            updated_at: self.updated_at.clone(),
            data,
        })
    }

    pub fn from_record(record: &WorkflowRecord) -> Result<KycWorkflow, StorageError> {
        serde_json::from_value(record.data.clone()).map_err(|e| {
            StorageError::Backend(format!(
                "workflow {} record is unreadable: {}",
                record.workflow_id, e
            ))
        })
    }

    fn subject(&self) -> ChainSubject {
        ChainSubject::Workflow(self.workflow_id.clone())
    }
}

/// What a caller submits to start a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub user_id: String,
    pub document_id: String,
    pub country_hint: Option<Country>,
}

impl Submission {
    pub fn new(user_id: impl Into<String>, document_id: impl Into<String>) -> Self {
        Submission {
            user_id: user_id.into(),
            document_id: document_id.into(),
            country_hint: None,
        }
    }

    pub fn with_country_hint(mut self, country: Country) -> Self {
        self.country_hint = Some(country);
        self
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

// ──────────────────────────────────────────────
// Engine
// ──────────────────────────────────────────────

struct WorkflowSlot {
    /// Held for the whole of a step so one workflow never runs two at once.
    step: Mutex<()>,
    snapshot: RwLock<KycWorkflow>,
    /// Set while the snapshot holds ledger-recorded changes the workflow
    /// store has not saved yet.
    unsaved: AtomicBool,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl WorkflowSlot {
    fn new(workflow: KycWorkflow, deadline: Option<Instant>) -> Self {
        WorkflowSlot {
            step: Mutex::new(()),
            snapshot: RwLock::new(workflow),
            unsaved: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            deadline,
        }
    }
}

/// A step's result before it is committed: the updated draft, the audit
/// severity and the audit payload.
struct StepOutput {
    draft: KycWorkflow,
    severity: Severity,
    data: Value,
}

/// Sequences every component over each workflow.
///
/// Workflows are independent: each has its own audit chain, step lock and
/// cancellation token, so many can be driven concurrently from separate
/// tasks. The ledger, the rate limiter and the optional workflow store are
/// the only shared state.
pub struct WorkflowEngine {
    providers: ProviderChain,
    detector: CountryDetector,
    extractor: FieldExtractor,
    validator: SadcValidator,
    decisions: DecisionEngine,
    ledger: Arc<AuditLedger>,
    documents: Arc<dyn DocumentSource>,
    store: Option<Arc<dyn WorkflowStore>>,
    limiter: Arc<RateLimiter>,
    timeouts: TimeoutConfig,
    workflows: RwLock<HashMap<String, Arc<WorkflowSlot>>>,
}

impl WorkflowEngine {
    /// An engine reading documents as plain text, with regex-only field
    /// extraction, keyword-only country detection and default policy.
    pub fn new(documents: Arc<dyn DocumentSource>, ledger: Arc<AuditLedger>) -> Self {
        let rate = crate::config::RateLimitConfig::default();
        WorkflowEngine {
            providers: ProviderChain::new()
                .with_provider(Arc::new(PlainTextProvider::default()), Acceptance::Always),
            detector: CountryDetector::new(),
            extractor: FieldExtractor::regex_only(),
            validator: SadcValidator::default(),
            decisions: DecisionEngine::default(),
            ledger,
            documents,
            store: None,
            limiter: Arc::new(RateLimiter::new(
                rate.max_requests,
                Duration::from_secs(rate.window_secs),
            )),
            timeouts: TimeoutConfig::default(),
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// An engine with policy, thresholds, timeouts and rate limits taken from
    /// `config`. Providers and AI tiers still need to be attached.
    pub fn from_config(
        config: &EngineConfig,
        documents: Arc<dyn DocumentSource>,
        ledger: Arc<AuditLedger>,
    ) -> Result<Self, ConfigError> {
        let default_country = config.default_country()?;
        let mut engine = Self::new(documents, ledger);
        engine.providers = ProviderChain::new()
            .with_provider(Arc::new(PlainTextProvider::default()), Acceptance::Always)
            .with_exhaustion_policy(config.extraction.exhaustion);
        engine.detector = CountryDetector::new()
            .with_keyword_threshold(config.detection.keyword_threshold)
            .with_default_country(default_country);
        engine.validator = SadcValidator::new(default_country);
        engine.decisions = DecisionEngine::new(config.policy.clone());
        engine.limiter = Arc::new(RateLimiter::new(
            config.rate_limit.max_requests,
            Duration::from_secs(config.rate_limit.window_secs),
        ));
        engine.timeouts = config.timeouts.clone();
        Ok(engine)
    }

    pub fn with_providers(mut self, providers: ProviderChain) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_detector(mut self, detector: CountryDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_extractor(mut self, extractor: FieldExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_validator(mut self, validator: SadcValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_decision_policy(mut self, policy: DecisionPolicy) -> Self {
        self.decisions = DecisionEngine::new(policy);
        self
    }

    pub fn with_workflow_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Attach the three AI extraction tiers and the AI country classifier,
    /// all backed by `client`, with thresholds from `config`.
    pub fn with_llm(
        mut self,
        client: Arc<dyn LlmClient>,
        config: &EngineConfig,
    ) -> Result<Self, ConfigError> {
        let model = config.llm.model.clone();
        let json_schema = JsonSchemaAgent::new(client.clone(), model.clone())
            .map_err(ConfigError::Invalid)?;
        self.extractor = FieldExtractor::regex_only()
            .with_tier(
                Arc::new(StructuredAgent {
                    max_retries: config.llm.max_retries,
                    ..StructuredAgent::new(client.clone(), model.clone())
                }),
                Acceptance::Above(config.extraction.structured_threshold),
            )
            .with_tier(
                Arc::new(json_schema),
                Acceptance::Above(config.extraction.json_schema_threshold),
            )
            .with_tier(
                Arc::new(GeneralAgent::new(client.clone(), model.clone())),
                Acceptance::Always,
            );
        self.detector = CountryDetector::new()
            .with_keyword_threshold(config.detection.keyword_threshold)
            .with_default_country(config.default_country()?)
            .with_classifier(Arc::new(LlmCountryClassifier::new(client, model)));
        Ok(self)
    }

    pub fn ledger(&self) -> &Arc<AuditLedger> {
        &self.ledger
    }

    // ── Submission and queries ──

    /// Create a workflow in `Initialized` and record `WorkflowInitialized`.
    /// Returns the new workflow id without running any step.
    pub async fn start_workflow(
        &self,
        user_id: &str,
        document_id: &str,
    ) -> Result<String, EngineError> {
        self.submit(Submission::new(user_id, document_id)).await
    }

    /// [`WorkflowEngine::start_workflow`] with an optional country hint.
    pub async fn submit(&self, submission: Submission) -> Result<String, EngineError> {
        let workflow_id = uuid::Uuid::new_v4().to_string();
        let chain_id = uuid::Uuid::new_v4().to_string();
        let mut workflow = KycWorkflow::new(submission, workflow_id.clone(), chain_id);

        let entry = self
            .ledger
            .append(NewEntry {
                chain_id: workflow.chain_id.clone(),
                subject: workflow.subject(),
                user_id: workflow.user_id.clone(),
                event_type: EventType::WorkflowInitialized,
                severity: Severity::Info,
                event_data: json!({
                    "document_id": workflow.document_id,
                    "country_hint": workflow.country_hint,
                }),
            })
            .await?;
        workflow.updated_at = entry.timestamp.clone();
        workflow.audit_trail.push(entry);
        self.persist(&workflow).await?;

        tracing::info!(
            workflow_id = %workflow_id,
            user_id = %workflow.user_id,
            document_id = %workflow.document_id,
            "workflow started"
        );

        let deadline = self.timeouts.workflow().map(|d| Instant::now() + d);
        let slot = Arc::new(WorkflowSlot::new(workflow, deadline));
        self.workflows.write().await.insert(workflow_id.clone(), slot);
        Ok(workflow_id)
    }

    /// Snapshot of a workflow. Falls back to the workflow store for
    /// workflows this engine is not holding.
    pub async fn get_status(&self, workflow_id: &str) -> Result<KycWorkflow, EngineError> {
        if let Some(slot) = self.workflows.read().await.get(workflow_id) {
            return Ok(slot.snapshot.read().await.clone());
        }
        self.load_stored(workflow_id).await
    }

    /// The workflow's audit chain as stored in the ledger.
    pub async fn get_audit_trail(&self, workflow_id: &str) -> Result<Vec<AuditEntry>, EngineError> {
        let workflow = self.get_status(workflow_id).await?;
        Ok(self.ledger.entries(&workflow.chain_id).await?)
    }

    /// Whether the workflow's audit chain still verifies.
    pub async fn verify_audit_trail(&self, workflow_id: &str) -> Result<bool, EngineError> {
        let workflow = self.get_status(workflow_id).await?;
        Ok(self.ledger.verify_integrity(&workflow.chain_id).await?)
    }

    /// The credential chain of a workflow, empty until a credential is minted.
    pub async fn get_credential_trail(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<AuditEntry>, EngineError> {
        let workflow = self.get_status(workflow_id).await?;
        match workflow.credential_chain_id {
            Some(chain_id) => Ok(self.ledger.entries(&chain_id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Mint the BFR credential id for a completed, approved workflow.
    /// Repeated calls return the same id.
    ///
    /// The first call records `CredentialIssued` on the workflow chain, then
    /// opens the credential chain with a `CredentialIssued` entry that
    /// carries the hash of the workflow-chain entry.
    pub async fn generate_credential_id(&self, workflow_id: &str) -> Result<String, EngineError> {
        let slot = self.slot_or_load(workflow_id).await?;
        let _step = slot.step.lock().await;
        self.flush(&slot).await?;
        let current = slot.snapshot.read().await.clone();

        let credential_id = match &current.credential_id {
            Some(id) => id.clone(),
            None => {
                let credential_id = crate::credential::generate_credential_id(&current)?;
                let entry = self
                    .ledger
                    .append(NewEntry {
                        chain_id: current.chain_id.clone(),
                        subject: current.subject(),
                        user_id: current.user_id.clone(),
                        event_type: EventType::CredentialIssued,
                        severity: Severity::Info,
                        event_data: json!({
                            "credential_id": credential_id,
                            "country": current.detected_country,
                        }),
                    })
                    .await?;
                let mut snapshot = slot.snapshot.write().await;
                snapshot.credential_id = Some(credential_id.clone());
                snapshot.updated_at = entry.timestamp.clone();
                snapshot.audit_trail.push(entry);
                slot.unsaved.store(true, Ordering::SeqCst);
                tracing::info!(workflow_id, credential_id = %credential_id, "credential minted");
                credential_id
            }
        };

        let issued = slot.snapshot.read().await.clone();
        if issued.credential_chain_id.is_none() {
            let issuance_hash = issued
                .audit_trail
                .iter()
                .rev()
                .find(|e| e.event_type == EventType::CredentialIssued)
                .map(|e| e.hash.clone());
            let chain_id = uuid::Uuid::new_v4().to_string();
            let entry = self
                .ledger
                .append(NewEntry {
                    chain_id: chain_id.clone(),
                    subject: ChainSubject::Credential(credential_id.clone()),
                    user_id: issued.user_id.clone(),
                    event_type: EventType::CredentialIssued,
                    severity: Severity::Info,
                    event_data: json!({
                        "workflow_id": issued.workflow_id,
                        "workflow_chain_id": issued.chain_id,
                        "issuance_entry_hash": issuance_hash,
                    }),
                })
                .await?;
            let mut snapshot = slot.snapshot.write().await;
            snapshot.credential_chain_id = Some(chain_id);
            snapshot.updated_at = entry.timestamp;
            slot.unsaved.store(true, Ordering::SeqCst);
        }

        self.flush(&slot).await?;
        Ok(credential_id)
    }

    /// Request cancellation. Takes effect before the next step, or aborts
    /// the external call in flight. Released workflows are already finished,
    /// so this only checks they exist.
    pub async fn cancel(&self, workflow_id: &str) -> Result<(), EngineError> {
        match self.slot(workflow_id).await {
            Ok(slot) => {
                slot.cancel.cancel();
                tracing::info!(workflow_id, "cancellation requested");
                Ok(())
            }
            Err(EngineError::NotFound { .. }) => self.get_status(workflow_id).await.map(|_| ()),
            Err(e) => Err(e),
        }
    }

    /// Drop a finished workflow from memory once the store holds it. Later
    /// queries read the stored copy.
    ///
    /// Returns `false` and keeps the workflow when it is still running or no
    /// workflow store is attached.
    pub async fn release(&self, workflow_id: &str) -> Result<bool, EngineError> {
        let slot = self.slot(workflow_id).await?;
        if self.store.is_none() {
            return Ok(false);
        }
        let _step = slot.step.lock().await;
        self.flush(&slot).await?;
        if !slot.snapshot.read().await.current_state.is_terminal() {
            return Ok(false);
        }
        self.workflows.write().await.remove(workflow_id);
        tracing::debug!(workflow_id, "finished workflow released");
        Ok(true)
    }

    /// Number of workflows held in memory.
    pub async fn active_workflows(&self) -> usize {
        self.workflows.read().await.len()
    }

    async fn slot(&self, workflow_id: &str) -> Result<Arc<WorkflowSlot>, EngineError> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    /// The in-memory slot, or one rebuilt from the store for a released
    /// workflow.
    async fn slot_or_load(&self, workflow_id: &str) -> Result<Arc<WorkflowSlot>, EngineError> {
        if let Ok(slot) = self.slot(workflow_id).await {
            return Ok(slot);
        }
        let workflow = self.load_stored(workflow_id).await?;
        let mut workflows = self.workflows.write().await;
        Ok(workflows
            .entry(workflow_id.to_string())
            .or_insert_with(|| Arc::new(WorkflowSlot::new(workflow, None)))
            .clone())
    }

    async fn load_stored(&self, workflow_id: &str) -> Result<KycWorkflow, EngineError> {
        let not_found = || EngineError::NotFound {
            workflow_id: workflow_id.to_string(),
        };
        let Some(store) = &self.store else {
            return Err(not_found());
        };
        match store.load_workflow(workflow_id).await {
            Ok(record) => Ok(KycWorkflow::from_record(&record)?),
            Err(StorageError::WorkflowNotFound { .. }) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Save the slot's snapshot if it has changes the store has not seen.
    async fn flush(&self, slot: &WorkflowSlot) -> Result<(), EngineError> {
        if !slot.unsaved.load(Ordering::SeqCst) {
            return Ok(());
        }
        let snapshot = slot.snapshot.read().await.clone();
        self.persist(&snapshot).await?;
        slot.unsaved.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn persist(&self, workflow: &KycWorkflow) -> Result<(), EngineError> {
        if let Some(store) = &self.store {
            store.save_workflow(workflow.to_record()?).await?;
        }
        Ok(())
    }

    // ── Driving ──

    /// Run exactly one step. On a terminal workflow this is a no-op that
    /// returns the current state.
    ///
    /// Component failures do not surface here: they move the workflow to
    /// `Failed` and the returned state says so. Only ledger and storage
    /// failures while recording the outcome are returned as errors.
    ///
    /// A step is recorded once its ledger entry is appended. If saving the
    /// workflow afterwards fails, the error is returned and the save is
    /// retried by the next call before any further step runs.
    pub async fn advance(&self, workflow_id: &str) -> Result<WorkflowState, EngineError> {
        let Ok(slot) = self.slot(workflow_id).await else {
            // Released workflows are terminal.
            return Ok(self.get_status(workflow_id).await?.current_state);
        };
        let _step = slot.step.lock().await;
        self.flush(&slot).await?;
        let current = slot.snapshot.read().await.clone();

        let Some(event) = current.current_state.next_step() else {
            tracing::debug!(workflow_id, state = %current.current_state, "advance on terminal workflow ignored");
            return Ok(current.current_state);
        };

        let result = match self.check_runnable(&slot, workflow_id) {
            Ok(()) => self.run_step(&slot, &current, event).await,
            Err(e) => Err(e),
        };
        let result = result.and_then(|output| {
            // A cancellation that landed mid-step discards the step.
            self.check_runnable(&slot, workflow_id).map(|()| output)
        });

        let committed = match result {
            Ok(output) => self.commit_step(&current, event, output).await?,
            Err(e) => self.commit_failure(&current, event, e).await?,
        };
        let state = committed.current_state;
        *slot.snapshot.write().await = committed;
        slot.unsaved.store(true, Ordering::SeqCst);
        self.flush(&slot).await?;
        Ok(state)
    }

    /// Advance until the workflow reaches `Completed` or `Failed`.
    pub async fn run_to_completion(&self, workflow_id: &str) -> Result<KycWorkflow, EngineError> {
        loop {
            let state = self.advance(workflow_id).await?;
            if state.is_terminal() {
                return self.get_status(workflow_id).await;
            }
        }
    }

    /// Drive a workflow to completion on its own tokio task.
    pub fn spawn(self: &Arc<Self>, workflow_id: String) -> JoinHandle<Result<KycWorkflow, EngineError>> {
        let engine = Arc::clone(self);
        tokio::spawn(async move { engine.run_to_completion(&workflow_id).await })
    }

    fn check_runnable(&self, slot: &WorkflowSlot, workflow_id: &str) -> Result<(), EngineError> {
        if slot.cancel.is_cancelled() {
            return Err(EngineError::Cancelled {
                workflow_id: workflow_id.to_string(),
            });
        }
        if slot.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(EngineError::DeadlineExceeded {
                workflow_id: workflow_id.to_string(),
            });
        }
        Ok(())
    }

    fn call_context(&self, slot: &WorkflowSlot, timeout: Duration) -> CallContext {
        CallContext {
            timeout,
            deadline: slot.deadline,
            limiter: Some(self.limiter.clone()),
            cancel: slot.cancel.clone(),
        }
    }

    /// Append the step's audit entry, then move to the next state. Saving is
    /// left to the caller.
    async fn commit_step(
        &self,
        current: &KycWorkflow,
        event: StepEvent,
        output: StepOutput,
    ) -> Result<KycWorkflow, EngineError> {
        let (next_state, event_type) = transition(current.current_state, event)?;
        let mut next = output.draft;
        let entry = self
            .ledger
            .append(NewEntry {
                chain_id: next.chain_id.clone(),
                subject: next.subject(),
                user_id: next.user_id.clone(),
                event_type,
                severity: output.severity,
                event_data: output.data,
            })
            .await?;

        next.current_state = next_state;
        next.updated_at = entry.timestamp.clone();
        next.audit_trail.push(entry);

        tracing::info!(
            workflow_id = %next.workflow_id,
            from = %current.current_state,
            to = %next_state,
            "workflow advanced"
        );
        Ok(next)
    }

    /// Record `WorkflowFailed` and move to `Failed`. The step's partial
    /// results are discarded.
    async fn commit_failure(
        &self,
        current: &KycWorkflow,
        event: StepEvent,
        error: EngineError,
    ) -> Result<KycWorkflow, EngineError> {
        let (failed, event_type) = transition(current.current_state, StepEvent::Failed)?;
        let failure = WorkflowFailure {
            error_class: error.class().to_string(),
            message: error.to_string(),
            last_state: current.current_state,
        };
        tracing::warn!(
            workflow_id = %current.workflow_id,
            state = %current.current_state,
            error_class = %failure.error_class,
            error = %failure.message,
            "workflow failed"
        );

        let mut next = current.clone();
        let entry = self
            .ledger
            .append(NewEntry {
                chain_id: next.chain_id.clone(),
                subject: next.subject(),
                user_id: next.user_id.clone(),
                event_type,
                severity: Severity::Error,
                event_data: json!({
                    "error_class": failure.error_class,
                    "error": failure.message,
                    "last_state": failure.last_state,
                    "failed_step": event,
                }),
            })
            .await?;

        next.current_state = failed;
        next.failure = Some(failure);
        next.updated_at = entry.timestamp.clone();
        next.audit_trail.push(entry);
        Ok(next)
    }

    // ── Steps ──

    async fn run_step(
        &self,
        slot: &WorkflowSlot,
        current: &KycWorkflow,
        event: StepEvent,
    ) -> Result<StepOutput, EngineError> {
        let mut draft = current.clone();
        let (severity, data) = match event {
            StepEvent::DocumentUploaded => self.step_upload(&mut draft).await?,
            StepEvent::OcrCompleted => self.step_ocr(slot, &mut draft).await?,
            StepEvent::CountryDetected => self.step_detect(slot, &mut draft).await,
            StepEvent::FieldsExtracted => self.step_extract(slot, &mut draft).await,
            StepEvent::Validated => self.step_validate(&mut draft),
            StepEvent::Decided => self.step_decide(&mut draft),
            StepEvent::Completed => Self::step_complete(&draft),
            StepEvent::Failed => {
                return Err(EngineError::InvalidTransition(kyc_core::InvalidTransition {
                    from: current.current_state,
                    event,
                }))
            }
        };
        Ok(StepOutput {
            draft,
            severity,
            data,
        })
    }

    async fn step_upload(&self, draft: &mut KycWorkflow) -> Result<(Severity, Value), EngineError> {
        let bytes = self.documents.fetch(&draft.document_id).await?;
        let digest = sha256_hex(&bytes);
        draft.document_sha256 = Some(digest.clone());
        Ok((
            Severity::Info,
            json!({
                "document_id": draft.document_id,
                "sha256": digest,
                "size_bytes": bytes.len(),
                "country_hint": draft.country_hint,
            }),
        ))
    }

    async fn step_ocr(
        &self,
        slot: &WorkflowSlot,
        draft: &mut KycWorkflow,
    ) -> Result<(Severity, Value), EngineError> {
        let bytes = self.documents.fetch(&draft.document_id).await?;
        let digest = sha256_hex(&bytes);
        if draft.document_sha256.as_deref() != Some(digest.as_str()) {
            return Err(EngineError::Document {
                document_id: draft.document_id.clone(),
                message: "document changed since upload".to_string(),
            });
        }

        let ctx = self.call_context(slot, self.timeouts.provider());
        let outcome = self.providers.extract(&bytes, &ctx).await?;
        let severity = if outcome.accepted {
            Severity::Info
        } else {
            Severity::Warning
        };
        let data = json!({
            "method": outcome.method,
            "confidence": outcome.confidence,
            "accepted": outcome.accepted,
            "text_length": outcome.text.chars().count(),
            "attempts": outcome.attempts,
        });
        draft.ocr = Some(OcrReading {
            text: outcome.text,
            confidence: outcome.confidence,
            method: outcome.method,
            degraded: !outcome.accepted,
        });
        Ok((severity, data))
    }

    async fn step_detect(&self, slot: &WorkflowSlot, draft: &mut KycWorkflow) -> (Severity, Value) {
        let text = draft.ocr.as_ref().map(|o| o.text.as_str()).unwrap_or_default();
        let ctx = self.call_context(slot, self.timeouts.agent());
        let detection = self.detector.detect(text, draft.country_hint, &ctx).await;
        let severity = if detection.method == METHOD_ERROR {
            Severity::Warning
        } else {
            Severity::Info
        };
        let data = json!({
            "country": detection.country,
            "confidence": detection.confidence,
            "method": detection.method,
            "country_hint": draft.country_hint,
        });
        draft.detected_country = Some(detection.country);
        draft.country_confidence = detection.confidence;
        draft.country_method = Some(detection.method);
        (severity, data)
    }

    async fn step_extract(&self, slot: &WorkflowSlot, draft: &mut KycWorkflow) -> (Severity, Value) {
        let text = draft.ocr.as_ref().map(|o| o.text.as_str()).unwrap_or_default();
        let country = draft
            .detected_country
            .or(draft.country_hint)
            .unwrap_or(kyc_core::DEFAULT_COUNTRY);
        let ctx = self.call_context(slot, self.timeouts.agent());
        let result = self.extractor.extract_fields(text, country, &ctx).await;
        let extraction = result.extraction;
        let severity = if extraction.method == kyc_core::patterns::REGEX_METHOD {
            Severity::Warning
        } else {
            Severity::Info
        };
        let data = json!({
            "method": extraction.method,
            "confidence": extraction.confidence,
            "fields_found": extraction.fields.populated(),
            "attempts": result.attempts,
        });
        draft.extraction_confidence = Some(extraction.confidence);
        draft.extraction_method = Some(extraction.method);
        draft.extracted_fields = Some(extraction.fields);
        (severity, data)
    }

    fn step_validate(&self, draft: &mut KycWorkflow) -> (Severity, Value) {
        let code = draft
            .detected_country
            .map(|c| c.code())
            .unwrap_or_default();
        let empty = IdentityFields::default();
        let fields = draft.extracted_fields.as_ref().unwrap_or(&empty);
        let report = self
            .validator
            .validate_on(code, fields, OffsetDateTime::now_utc().date());
        let severity = if report.failed_checks.is_empty() {
            Severity::Info
        } else {
            Severity::Warning
        };
        let data = json!({
            "country": report.country,
            "score": report.score,
            "passed_checks": report.passed_checks,
            "failed_checks": report.failed_checks,
            "warnings": report.warnings,
        });
        draft.validation_report = Some(report);
        (severity, data)
    }

    fn step_decide(&self, draft: &mut KycWorkflow) -> (Severity, Value) {
        let (validation_score, failed_checks) = match &draft.validation_report {
            Some(report) => (report.score, report.failed_checks.clone()),
            None => (0.0, BTreeSet::new()),
        };
        let outcome = self.decisions.decide_with(&DecisionSignals {
            country_confidence: draft.country_confidence,
            extraction_confidence: draft.extraction_confidence.unwrap_or(0.0),
            validation_score,
            ocr_confidence: draft.ocr.as_ref().map(|o| o.confidence),
            failed_checks,
        });
        let severity = match outcome.decision {
            Decision::Approved => Severity::Info,
            Decision::Rejected => Severity::Warning,
        };
        let data = json!({
            "decision": outcome.decision,
            "confidence": outcome.confidence,
            "rejection_reasons": outcome.rejection_reasons,
        });
        draft.final_decision = Some(outcome.decision);
        draft.decision_confidence = Some(outcome.confidence);
        draft.rejection_reasons = outcome.rejection_reasons;
        (severity, data)
    }

    fn step_complete(draft: &KycWorkflow) -> (Severity, Value) {
        (
            Severity::Info,
            json!({
                "decision": draft.final_decision,
                "decision_confidence": draft.decision_confidence,
                "detected_country": draft.detected_country,
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use kyc_storage::MemoryStore;

    use super::*;
    use crate::document::MemoryDocuments;
    use crate::provider::tests::FixedProvider;

    const NAMIBIAN_ID: &str = "REPUBLIC OF NAMIBIA\n\
NATIONAL IDENTITY CARD\n\
ID NO: 85010112345\n\
SURNAME: SHIKONGO\n\
FIRST NAMES: MARIA NDAPEWA\n\
DATE OF BIRTH: 01/01/1985\n\
SEX: F\n\
NATIONALITY: NAMIBIAN";

    async fn engine_with(text: &str) -> (WorkflowEngine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(MemoryDocuments::new());
        documents.insert("doc-1", text.as_bytes().to_vec()).await;
        let ledger = Arc::new(AuditLedger::new(store.clone()));
        let engine = WorkflowEngine::new(documents, ledger).with_workflow_store(store.clone());
        (engine, store)
    }

    #[tokio::test]
    async fn start_records_initialized_entry() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let wf = engine.get_status(&id).await.unwrap();
        assert_eq!(wf.current_state, WorkflowState::Initialized);
        assert_eq!(wf.audit_trail.len(), 1);
        assert_eq!(wf.audit_trail[0].event_type, EventType::WorkflowInitialized);
    }

    #[tokio::test]
    async fn advance_moves_one_state_and_writes_one_entry() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let state = engine.advance(&id).await.unwrap();
        assert_eq!(state, WorkflowState::DocumentUploaded);
        let trail = engine.get_audit_trail(&id).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[1].event_type, EventType::DocumentUploaded);
        assert_eq!(
            trail[1].event_data["sha256"].as_str(),
            Some(sha256_hex(NAMIBIAN_ID.as_bytes()).as_str())
        );
        assert_eq!(trail[1].event_data["size_bytes"], NAMIBIAN_ID.len());
    }

    #[tokio::test]
    async fn advance_on_terminal_is_a_no_op() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let done = engine.run_to_completion(&id).await.unwrap();
        let before = engine.get_audit_trail(&id).await.unwrap().len();
        assert_eq!(engine.advance(&id).await.unwrap(), done.current_state);
        assert_eq!(engine.get_audit_trail(&id).await.unwrap().len(), before);
    }

    #[tokio::test]
    async fn missing_document_fails_after_initialized() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "missing").await.unwrap();
        let wf = engine.run_to_completion(&id).await.unwrap();
        assert_eq!(wf.current_state, WorkflowState::Failed);
        let failure = wf.failure.unwrap();
        assert_eq!(failure.error_class, "DocumentUnavailable");
        assert_eq!(failure.last_state, WorkflowState::Initialized);
        let last = wf.audit_trail.last().unwrap();
        assert_eq!(last.event_type, EventType::WorkflowFailed);
        assert_eq!(last.severity, Severity::Error);
    }

    #[tokio::test]
    async fn exhausted_chain_under_fail_policy_fails_workflow() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let engine = engine.with_providers(
            ProviderChain::new()
                .with_provider(FixedProvider::down("premium"), Acceptance::Above(0.7))
                .with_exhaustion_policy(crate::provider::ExhaustionPolicy::Fail),
        );
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let wf = engine.run_to_completion(&id).await.unwrap();
        let failure = wf.failure.unwrap();
        assert_eq!(failure.error_class, "ExhaustedChain");
        assert_eq!(failure.last_state, WorkflowState::DocumentUploaded);
    }

    #[tokio::test]
    async fn cancelled_before_step_fails() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        engine.advance(&id).await.unwrap();
        engine.cancel(&id).await.unwrap();
        assert_eq!(engine.advance(&id).await.unwrap(), WorkflowState::Failed);
        let wf = engine.get_status(&id).await.unwrap();
        assert_eq!(wf.failure.unwrap().error_class, "Cancelled");
        assert!(wf.ocr.is_none());
    }

    #[tokio::test]
    async fn saves_after_every_transition() {
        let (engine, store) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        engine.advance(&id).await.unwrap();
        let record = store.load_workflow(&id).await.unwrap();
        assert_eq!(record.state, "document_uploaded");
        let restored = KycWorkflow::from_record(&record).unwrap();
        assert_eq!(restored, engine.get_status(&id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_workflow_is_not_found() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        assert!(matches!(
            engine.advance("nope").await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn credential_requires_approval() {
        let (engine, _) = engine_with("illegible").await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let early = engine.generate_credential_id(&id).await.unwrap_err();
        assert_eq!(early.class(), "Credential");
        let wf = engine.run_to_completion(&id).await.unwrap();
        assert_eq!(wf.final_decision, Some(Decision::Rejected));
        assert!(engine.generate_credential_id(&id).await.is_err());
    }

    /// Workflow store whose `fail_on`-th save (1-based) fails.
    struct FlakyStore {
        inner: MemoryStore,
        saves: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait]
    impl WorkflowStore for FlakyStore {
        async fn save_workflow(&self, record: WorkflowRecord) -> Result<(), StorageError> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if n == self.fail_on {
                return Err(StorageError::Backend("db blip".to_string()));
            }
            self.inner.save_workflow(record).await
        }

        async fn load_workflow(&self, workflow_id: &str) -> Result<WorkflowRecord, StorageError> {
            self.inner.load_workflow(workflow_id).await
        }

        async fn list_workflows(
            &self,
            state_filter: Option<&str>,
        ) -> Result<Vec<WorkflowRecord>, StorageError> {
            self.inner.list_workflows(state_filter).await
        }
    }

    #[tokio::test]
    async fn failed_save_is_retried_without_rerunning_the_step() {
        let documents = Arc::new(MemoryDocuments::new());
        documents.insert("doc-1", NAMIBIAN_ID.as_bytes().to_vec()).await;
        let ledger = Arc::new(AuditLedger::new(Arc::new(MemoryStore::new())));
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            saves: AtomicUsize::new(0),
            fail_on: 2,
        });
        let engine = WorkflowEngine::new(documents, ledger).with_workflow_store(store.clone());

        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let err = engine.advance(&id).await.unwrap_err();
        assert_eq!(err.class(), "Storage");

        // The step is recorded even though the save failed.
        let held = engine.get_status(&id).await.unwrap();
        assert_eq!(held.current_state, WorkflowState::DocumentUploaded);
        assert_eq!(store.inner.load_workflow(&id).await.unwrap().state, "initialized");

        assert_eq!(engine.advance(&id).await.unwrap(), WorkflowState::OcrComplete);
        assert_eq!(store.inner.load_workflow(&id).await.unwrap().state, "ocr_complete");

        let trail = engine.get_audit_trail(&id).await.unwrap();
        let uploads = trail
            .iter()
            .filter(|e| e.event_type == EventType::DocumentUploaded)
            .count();
        assert_eq!(uploads, 1);
        assert_eq!(trail.len(), 3);
        assert!(engine.verify_audit_trail(&id).await.unwrap());
        assert_eq!(engine.get_status(&id).await.unwrap().audit_trail, trail);
    }

    #[tokio::test]
    async fn released_workflow_is_read_from_the_store() {
        let (engine, _) = engine_with(NAMIBIAN_ID).await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        assert!(!engine.release(&id).await.unwrap());

        let done = engine.run_to_completion(&id).await.unwrap();
        assert!(engine.release(&id).await.unwrap());
        assert_eq!(engine.active_workflows().await, 0);

        assert_eq!(engine.get_status(&id).await.unwrap(), done);
        assert_eq!(engine.get_audit_trail(&id).await.unwrap(), done.audit_trail);
        assert!(engine.verify_audit_trail(&id).await.unwrap());
        assert_eq!(engine.advance(&id).await.unwrap(), done.current_state);
        engine.cancel(&id).await.unwrap();
        assert_eq!(engine.active_workflows().await, 0);

        assert!(matches!(
            engine.get_status("nope").await,
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.cancel("nope").await,
            Err(EngineError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn release_needs_a_store() {
        let documents = Arc::new(MemoryDocuments::new());
        documents.insert("doc-1", NAMIBIAN_ID.as_bytes().to_vec()).await;
        let ledger = Arc::new(AuditLedger::new(Arc::new(MemoryStore::new())));
        let engine = WorkflowEngine::new(documents, ledger);
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        engine.run_to_completion(&id).await.unwrap();
        assert!(!engine.release(&id).await.unwrap());
        assert!(engine.get_status(&id).await.is_ok());
    }

    #[tokio::test]
    async fn rejected_credential_writes_no_entry() {
        let (engine, _) = engine_with("illegible").await;
        let id = engine.start_workflow("user-1", "doc-1").await.unwrap();
        let wf = engine.run_to_completion(&id).await.unwrap();
        assert!(engine.generate_credential_id(&id).await.is_err());
        assert_eq!(engine.get_audit_trail(&id).await.unwrap(), wf.audit_trail);
        assert!(engine.get_credential_trail(&id).await.unwrap().is_empty());
    }
}
