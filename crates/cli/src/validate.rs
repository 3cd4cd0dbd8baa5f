use std::path::Path;
use std::process;

use kyc_core::{IdentityFields, SadcValidator};
use time::OffsetDateTime;

use crate::{print_json, read_file, report_error, OutputFormat};

/// Exits 1 when any scoring check fails.
pub(crate) fn cmd_validate(fields_path: &Path, country: &str, output: OutputFormat, quiet: bool) {
    let content = read_file(fields_path, output, quiet);
    let fields: IdentityFields = match serde_json::from_str(&content) {
        Ok(f) => f,
        Err(e) => {
            let msg = format!("error parsing JSON in '{}': {}", fields_path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let report =
        SadcValidator::default().validate_on(country, &fields.cleaned(), OffsetDateTime::now_utc().date());

    if !quiet {
        match output {
            OutputFormat::Json => match serde_json::to_value(&report) {
                Ok(v) => print_json(&v),
                Err(e) => {
                    report_error(&format!("error: {}", e), output, quiet);
                    process::exit(1);
                }
            },
            OutputFormat::Text => {
                println!(
                    "{} rules: score {:.2} ({} passed, {} failed)",
                    report.country,
                    report.score,
                    report.passed_checks.len(),
                    report.failed_checks.len()
                );
                for check in &report.passed_checks {
                    println!("  pass  {}", check);
                }
                for check in &report.failed_checks {
                    println!("  FAIL  {}", check);
                }
                for warning in &report.warnings {
                    println!("  warn  {}", warning);
                }
            }
        }
    }

    if !report.failed_checks.is_empty() {
        process::exit(1);
    }
}
