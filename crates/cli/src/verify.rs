use std::path::Path;
use std::process;

use kyc_ledger::{batch_roots, verify_records, AuditEntry, DEFAULT_MERKLE_BATCH_SIZE};
use kyc_storage::AuditEntryRecord;
use serde_json::Value;

use crate::{print_json, read_file, report_error, OutputFormat};

/// Accepts either an entry array or an object with an `audit_trail` array.
pub(crate) fn parse_trail(value: Value) -> Result<Vec<AuditEntryRecord>, String> {
    let entries = match value {
        Value::Object(mut map) => map
            .remove("audit_trail")
            .ok_or_else(|| "expected an entry array or an object with 'audit_trail'".to_string())?,
        other => other,
    };
    let entries: Vec<AuditEntry> =
        serde_json::from_value(entries).map_err(|e| format!("malformed audit entry: {}", e))?;
    Ok(entries.iter().map(AuditEntry::to_record).collect())
}

/// Exits 1 on an integrity violation or an unreadable trail.
pub(crate) fn cmd_verify(trail_path: &Path, output: OutputFormat, quiet: bool) {
    let content = read_file(trail_path, output, quiet);
    let records = serde_json::from_str(&content)
        .map_err(|e| format!("error parsing JSON in '{}': {}", trail_path.display(), e))
        .and_then(|v| parse_trail(v).map_err(|e| format!("error: {}", e)));
    let records = match records {
        Ok(r) => r,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let chain_id = records.first().map(|r| r.chain_id.clone()).unwrap_or_default();
    if let Some(stray) = records.iter().find(|r| r.chain_id != chain_id) {
        let msg = format!(
            "error: entry {} belongs to chain {}, not {}",
            stray.id, stray.chain_id, chain_id
        );
        report_error(&msg, output, quiet);
        process::exit(1);
    }

    if let Err(e) = verify_records(&chain_id, &records) {
        report_error(&e.to_string(), output, quiet);
        process::exit(1);
    }

    let hashes: Vec<&str> = records.iter().map(|r| r.hash.as_str()).collect();
    let roots = batch_roots(&hashes, DEFAULT_MERKLE_BATCH_SIZE);
    if quiet {
        return;
    }
    match output {
        OutputFormat::Json => print_json(&serde_json::json!({
            "chain_id": chain_id,
            "entries": records.len(),
            "valid": true,
            "merkle_roots": roots,
        })),
        OutputFormat::Text => {
            println!("chain {}: {} entries verified", chain_id, records.len());
            for (i, root) in roots.iter().enumerate() {
                println!("  merkle root {}: {}", i, root);
            }
        }
    }
}
