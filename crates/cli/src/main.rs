mod detect;
mod prune;
mod run;
mod validate;
mod verify;

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use kyc_engine::EngineConfig;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// KYC document verification and audit ledger tools.
#[derive(Parser)]
#[command(
    name = "kyc",
    version,
    about = "KYC document verification and audit ledger tools"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect the issuing country of a document's extracted text
    Detect {
        /// Path to a UTF-8 text file holding the document text
        file: PathBuf,
        /// Engine configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Validate extracted identity fields against a country's rules
    Validate {
        /// Path to a JSON object of identity fields
        fields: PathBuf,
        /// Two-letter country code whose rules apply
        #[arg(long)]
        country: String,
    },

    /// Run a full verification workflow over a pre-extracted text document
    Run {
        /// Path to the document (UTF-8 text)
        document: PathBuf,
        /// Submitting user id
        #[arg(long)]
        user: String,
        /// Document id recorded in the audit trail (default: file name)
        #[arg(long)]
        document_id: Option<String>,
        /// Two-letter country code to fall back on when detection fails
        #[arg(long)]
        country_hint: Option<String>,
        /// Engine configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,
        /// Also write the audit trail to this file as JSON
        #[arg(long)]
        export_trail: Option<PathBuf>,
    },

    /// Verify an exported audit trail
    Verify {
        /// Path to the audit trail JSON (an entry array or a workflow object)
        trail: PathBuf,
    },

    /// Apply the ledger retention window to exported audit trails
    Prune {
        /// Exported audit trail files
        #[arg(required = true)]
        trails: Vec<PathBuf>,
        /// Retention window in days (default: [ledger] retention_days)
        #[arg(long)]
        days: Option<u32>,
        /// Engine configuration TOML
        #[arg(long)]
        config: Option<PathBuf>,
        /// Delete the files of expired trails
        #[arg(long)]
        delete: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    match cli.command {
        Commands::Detect { file, config } => {
            detect::cmd_detect(&file, config.as_deref(), cli.output, cli.quiet);
        }
        Commands::Validate { fields, country } => {
            validate::cmd_validate(&fields, &country, cli.output, cli.quiet);
        }
        Commands::Run {
            document,
            user,
            document_id,
            country_hint,
            config,
            export_trail,
        } => {
            run::cmd_run(
                &run::RunArgs {
                    document,
                    user,
                    document_id,
                    country_hint,
                    config,
                    export_trail,
                },
                cli.output,
                cli.quiet,
            );
        }
        Commands::Verify { trail } => {
            verify::cmd_verify(&trail, cli.output, cli.quiet);
        }
        Commands::Prune {
            trails,
            days,
            config,
            delete,
        } => {
            prune::cmd_prune(
                &prune::PruneArgs {
                    trails,
                    days,
                    config,
                    delete,
                },
                cli.output,
                cli.quiet,
            );
        }
    }
}

/// Log to stderr, filtered by `KYC_LOG` (default `warn`).
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_env("KYC_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load the engine config, or defaults when no path is given. Exits on error.
pub(crate) fn load_config(path: Option<&Path>, output: OutputFormat, quiet: bool) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match EngineConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            report_error(&format!("error: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

/// Build the runtime for one command. Exits on error.
pub(crate) fn runtime(output: OutputFormat, quiet: bool) -> tokio::runtime::Runtime {
    match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(&format!("error: failed to start runtime: {}", e), output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn read_file(path: &Path, output: OutputFormat, quiet: bool) -> String {
    match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            let msg = format!("error reading file '{}': {}", path.display(), e);
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    }
}

pub(crate) fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{}", s),
        Err(e) => {
            eprintln!("error: failed to serialize output: {}", e);
            process::exit(1);
        }
    }
}

/// Report an error message respecting output format and quiet mode.
pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
