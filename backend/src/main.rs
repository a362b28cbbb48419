//! Postcheck CLI - validate and correct shipment CSV files
//!
//! ```bash
//! postcheck sniff envios.csv                      # Detected encoding, delimiter and mapping
//! postcheck validate envios.csv                   # Full validation with postal lookups
//! postcheck validate envios.csv --quick           # Format rules only
//! postcheck validate envios.csv --map postal_code=ZIP -o corrigido.csv
//! postcheck fields                                # Canonical fields and synonyms
//! postcheck serve --port 3000                     # HTTP API
//! ```
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use postcheck::{
    check_file, read_bytes, write_file, CanonicalField, EngineConfig, EventSink,
    MappingOverrides, Report, Severity, ValidationMode, Validator,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "postcheck")]
#[command(about = "Validate and correct shipment CSV files before upload", long_about = None)]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect encoding and delimiter and propose a column mapping
    Sniff {
        /// Input CSV file
        input: PathBuf,
    },

    /// Validate a CSV file and optionally write the corrected copy
    Validate {
        /// Input CSV file
        input: PathBuf,

        /// Format rules only, no postal lookups
        #[arg(long)]
        quick: bool,

        /// Column override, e.g. `postal_code=ZIP` (repeatable)
        #[arg(short, long = "map", value_name = "FIELD=COLUMN", value_parser = parse_override)]
        map: Vec<(CanonicalField, String)>,

        /// Write the corrected CSV here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also apply address corrections from postal providers
        #[arg(long)]
        apply_address_corrections: bool,

        /// Write the full report as JSON here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Per-file lookup budget in milliseconds
        #[arg(long)]
        budget_ms: Option<u64>,
    },

    /// List canonical fields, required flags and header synonyms
    Fields,

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

fn parse_override(s: &str) -> Result<(CanonicalField, String), String> {
    let (field, column) = s
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=COLUMN, got '{}'", s))?;
    Ok((field.parse()?, column.trim().to_string()))
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = match EngineConfig::load(cli.config.as_deref()) {
        Err(e) => Err(e.into()),
        Ok(config) => match cli.command {
            Commands::Sniff { input } => cmd_sniff(&input, config),

            Commands::Validate {
                input,
                quick,
                map,
                output,
                apply_address_corrections,
                report,
                budget_ms,
            } => {
                let mut config = config;
                if let Some(ms) = budget_ms {
                    config.lookup.lookup_budget_ms = ms;
                }
                let options = ValidateOptions {
                    mode: if quick { ValidationMode::Quick } else { ValidationMode::Full },
                    overrides: map.into_iter().collect(),
                    output,
                    apply_address_corrections,
                    report,
                };
                cmd_validate(&input, config, options).await
            }

            Commands::Fields => cmd_fields(&config),

            Commands::Serve { port } => postcheck::server::start_server(port, config)
                .await
                .map_err(Into::into),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

struct ValidateOptions {
    mode: ValidationMode,
    overrides: MappingOverrides,
    output: Option<PathBuf>,
    apply_address_corrections: bool,
    report: Option<PathBuf>,
}

fn cmd_sniff(input: &Path, config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(input)?;
    let file = read_bytes(&bytes, &config.sniffer)?;
    let suggestion = config.mapping.resolver().suggest(&file.headers, None)?;

    println!("File:      {}", input.display());
    println!("Encoding:  {}", file.format.encoding);
    println!("Delimiter: '{}'", postcheck::format_delimiter(file.format.delimiter));
    println!("Rows:      {}", file.records.len());
    println!();
    for field in CanonicalField::ALL {
        match suggestion.mapping.column(field) {
            Some(column) => println!("  {:<14} <- {}", field.as_str(), column.name),
            None => println!("  {:<14}    (unmapped)", field.as_str()),
        }
    }
    if !suggestion.missing_required.is_empty() {
        let missing: Vec<_> = suggestion.missing_required.iter().map(|f| f.as_str()).collect();
        println!("\nMissing required fields: {}", missing.join(", "));
    }
    if !suggestion.unmapped_columns.is_empty() {
        println!("Unused columns: {}", suggestion.unmapped_columns.join(", "));
    }
    Ok(())
}

async fn cmd_validate(
    input: &Path,
    config: EngineConfig,
    options: ValidateOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let events = EventSink::new(config.events.channel_capacity);
    let validator = match options.mode {
        ValidationMode::Full => Validator::from_config(config, events)?,
        ValidationMode::Quick => Validator::new(config, events),
    };

    // Ctrl-C cancels the run; no report is produced
    let token = validator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    let overrides = (!options.overrides.is_empty()).then_some(&options.overrides);
    let outcome = check_file(&validator, input, overrides, options.mode).await?;
    print_report(&outcome.report);

    if let Some(path) = &options.report {
        fs::write(path, serde_json::to_string_pretty(&outcome.report)?)?;
        eprintln!("Report written to: {}", path.display());
    }

    if let Some(path) = &options.output {
        let bytes = write_file(&outcome.file, &outcome.report, options.apply_address_corrections)?;
        fs::write(path, bytes)?;
        eprintln!(
            "Corrected file written to: {} ({})",
            path.display(),
            outcome.file.format.encoding
        );
    }

    if outcome.report.rows_with_errors > 0 {
        std::process::exit(2);
    }
    Ok(())
}

fn print_report(report: &Report) {
    for finding in &report.findings {
        let level = match finding.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        println!(
            "line {:>5}  {}  {:<14} {}",
            finding.row_index,
            level,
            finding.field.as_str(),
            finding.message
        );
    }
    for correction in &report.corrections {
        println!(
            "line {:>5}  FIX    {:<14} '{}' -> '{}' ({})",
            correction.row_index,
            correction.field.as_str(),
            correction.original_value,
            correction.suggested_value,
            correction.source
        );
    }
    println!("\n{}", report.summary());
}

fn cmd_fields(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let resolver = config.mapping.resolver();
    for field in CanonicalField::ALL {
        let required = if resolver.is_required(field) { "required" } else { "optional" };
        println!("{:<14} {:<9} {}", field.as_str(), required, resolver.synonyms(field).join(", "));
    }
    Ok(())
}
