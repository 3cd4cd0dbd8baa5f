use std::collections::HashMap;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use kyc_ledger::{AuditLedger, RetentionPolicy, GENESIS_HASH};
use kyc_storage::{AuditStore, MemoryStore};
use time::OffsetDateTime;

use crate::verify::parse_trail;
use crate::{load_config, print_json, read_file, report_error, runtime, OutputFormat};

pub(crate) struct PruneArgs {
    pub trails: Vec<PathBuf>,
    pub days: Option<u32>,
    pub config: Option<PathBuf>,
    pub delete: bool,
}

fn fail(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

/// Load exported trails into a scratch ledger, run its retention pass, and
/// report (or delete) the files whose chains expired.
pub(crate) fn cmd_prune(args: &PruneArgs, output: OutputFormat, quiet: bool) {
    let days = match args.days {
        Some(days) => days,
        None => {
            let config = load_config(args.config.as_deref(), output, quiet);
            match config.ledger.retention_days {
                Some(days) => days,
                None => fail(
                    "error: no retention window: pass --days or set [ledger] retention_days",
                    output,
                    quiet,
                ),
            }
        }
    };

    let mut chains: Vec<(String, Vec<kyc_storage::AuditEntryRecord>)> = Vec::new();
    let mut paths: HashMap<String, PathBuf> = HashMap::new();
    for path in &args.trails {
        let content = read_file(path, output, quiet);
        let records = serde_json::from_str(&content)
            .map_err(|e| format!("error parsing JSON in '{}': {}", path.display(), e))
            .and_then(|v| parse_trail(v).map_err(|e| format!("error in '{}': {}", path.display(), e)));
        let records = match records {
            Ok(r) => r,
            Err(msg) => fail(&msg, output, quiet),
        };
        let Some(chain_id) = records.first().map(|r| r.chain_id.clone()) else {
            tracing::info!(path = %path.display(), "empty trail skipped");
            continue;
        };
        if let Some(other) = paths.insert(chain_id.clone(), path.clone()) {
            let msg = format!(
                "error: chain {} appears in both '{}' and '{}'",
                chain_id,
                other.display(),
                path.display()
            );
            fail(&msg, output, quiet);
        }
        chains.push((chain_id, records));
    }

    let rt = runtime(output, quiet);
    let pruned: Result<Vec<String>, String> = rt.block_on(async {
        let store = Arc::new(MemoryStore::new());
        for (chain_id, records) in chains {
            for record in records {
                let previous = record.previous_hash.clone();
                store
                    .append_entry(record, &previous, GENESIS_HASH)
                    .await
                    .map_err(|e| format!("chain {} does not link: {}", chain_id, e))?;
            }
        }
        AuditLedger::new(store)
            .with_retention(RetentionPolicy { days: Some(days) })
            .prune_expired(OffsetDateTime::now_utc())
            .await
            .map_err(|e| e.to_string())
    });
    let pruned = match pruned {
        Ok(p) => p,
        Err(msg) => fail(&format!("error: {}", msg), output, quiet),
    };

    let mut expired = Vec::new();
    for chain_id in &pruned {
        let Some(path) = paths.get(chain_id) else { continue };
        if args.delete {
            if let Err(e) = std::fs::remove_file(path) {
                let msg = format!("error deleting '{}': {}", path.display(), e);
                fail(&msg, output, quiet);
            }
        }
        expired.push((chain_id.as_str(), path));
    }

    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "retention_days": days,
            "checked": paths.len(),
            "deleted": args.delete,
            "expired": expired
                .iter()
                .map(|(chain_id, path)| serde_json::json!({
                    "chain_id": chain_id,
                    "path": path.display().to_string(),
                }))
                .collect::<Vec<_>>(),
        })),
        OutputFormat::Text => {
            for (chain_id, path) in &expired {
                let verb = if args.delete { "deleted" } else { "expired" };
                println!("{} {} (chain {})", verb, path.display(), chain_id);
            }
            println!(
                "{} of {} trail(s) older than {} day(s)",
                expired.len(),
                paths.len(),
                days
            );
        }
    }
}
