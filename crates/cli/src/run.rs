use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use kyc_core::{Country, WorkflowState};
use kyc_engine::{KycWorkflow, LlmClient, MemoryDocuments, Submission, WorkflowEngine};
use kyc_ledger::AuditLedger;
use kyc_storage::MemoryStore;

use crate::{load_config, print_json, read_file, report_error, runtime, OutputFormat};

pub(crate) struct RunArgs {
    pub document: PathBuf,
    pub user: String,
    pub document_id: Option<String>,
    pub country_hint: Option<String>,
    pub config: Option<PathBuf>,
    pub export_trail: Option<PathBuf>,
}

/// The Anthropic client when compiled in and `ANTHROPIC_API_KEY` is set.
#[cfg(feature = "anthropic")]
pub(crate) fn llm_from_env() -> Option<Arc<dyn LlmClient>> {
    match kyc_engine::AnthropicClient::from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            tracing::info!(error = %e, "AI backends disabled");
            None
        }
    }
}

#[cfg(not(feature = "anthropic"))]
pub(crate) fn llm_from_env() -> Option<Arc<dyn LlmClient>> {
    None
}

/// Exits 0 when the workflow completes (approved or rejected), 1 when it
/// fails or cannot start.
pub(crate) fn cmd_run(args: &RunArgs, output: OutputFormat, quiet: bool) {
    let config = load_config(args.config.as_deref(), output, quiet);
    let text = read_file(&args.document, output, quiet);

    let country_hint = match args.country_hint.as_deref() {
        None => None,
        Some(code) => match Country::from_code(code) {
            Some(c) => Some(c),
            None => {
                let msg = format!("error: '{}' is not a supported country code", code);
                report_error(&msg, output, quiet);
                process::exit(1);
            }
        },
    };
    let document_id = args.document_id.clone().unwrap_or_else(|| {
        args.document
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string())
    });

    let rt = runtime(output, quiet);
    let result: Result<KycWorkflow, String> = rt.block_on(async {
        let store = Arc::new(MemoryStore::new());
        let documents = Arc::new(MemoryDocuments::new());
        documents.insert(document_id.clone(), text.into_bytes()).await;
        let ledger = Arc::new(
            AuditLedger::new(store.clone())
                .with_merkle_batch_size(config.ledger.merkle_batch_size)
                .with_retention(config.ledger.retention()),
        );

        let mut engine = WorkflowEngine::from_config(&config, documents, ledger)
            .map_err(|e| e.to_string())?
            .with_workflow_store(store);
        if let Some(client) = llm_from_env() {
            engine = engine.with_llm(client, &config).map_err(|e| e.to_string())?;
        }

        let mut submission = Submission::new(args.user.clone(), document_id.clone());
        submission.country_hint = country_hint;
        let id = engine.submit(submission).await.map_err(|e| e.to_string())?;
        engine.run_to_completion(&id).await.map_err(|e| e.to_string())
    });

    let workflow = match result {
        Ok(w) => w,
        Err(msg) => {
            report_error(&format!("error: {}", msg), output, quiet);
            process::exit(1);
        }
    };

    if let Some(path) = &args.export_trail {
        let written = serde_json::to_string_pretty(&workflow.audit_trail)
            .map_err(|e| e.to_string())
            .and_then(|s| std::fs::write(path, s).map_err(|e| e.to_string()));
        if let Err(e) = written {
            let msg = format!("error writing '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }

    if !quiet {
        match output {
            OutputFormat::Json => match serde_json::to_value(&workflow) {
                Ok(v) => print_json(&v),
                Err(e) => {
                    report_error(&format!("error: {}", e), output, quiet);
                    process::exit(1);
                }
            },
            OutputFormat::Text => print_summary(&workflow),
        }
    }

    if workflow.current_state == WorkflowState::Failed {
        process::exit(1);
    }
}

fn print_summary(workflow: &KycWorkflow) {
    println!("workflow {}", workflow.workflow_id);
    println!("  state:    {}", workflow.current_state);
    if let Some(country) = workflow.detected_country {
        println!(
            "  country:  {} ({}) confidence {:.2} via {}",
            country.code(),
            country.name(),
            workflow.country_confidence,
            workflow.country_method.as_deref().unwrap_or("-")
        );
    }
    if let (Some(method), Some(confidence)) =
        (&workflow.extraction_method, workflow.extraction_confidence)
    {
        println!("  fields:   {} confidence {:.2}", method, confidence);
    }
    if let Some(report) = &workflow.validation_report {
        println!("  checks:   score {:.2}", report.score);
    }
    if let (Some(decision), Some(confidence)) = (workflow.final_decision, workflow.decision_confidence)
    {
        println!("  decision: {:?} ({:.2})", decision, confidence);
    }
    for reason in &workflow.rejection_reasons {
        println!("    - {}", reason);
    }
    if let Some(failure) = &workflow.failure {
        println!(
            "  failed:   {} after {}: {}",
            failure.error_class, failure.last_state, failure.message
        );
    }
    println!("  audit:    {} entries", workflow.audit_trail.len());
}
