//! Tagpulse CLI - replay, validate and inspect data layer tracking
//!
//! Commands:
//! - replay: Run a recorded UI signal script and print the resulting data layer
//! - validate: Check a data layer against the record contracts
//! - resolve: Resolve a referral id against a persistent store
//! - doctor: Diagnose configuration and identity storage
//! - schema: Print the record contracts

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use tagpulse::config::{TrackingConfig, GTM_ID_ENV};
use tagpulse::identity::{FileStore, IdentityResolver, IdentityStore, REF_ID_STORAGE_KEY};
use tagpulse::replay::{parse_script, replay};
use tagpulse::schema::{known_events, required_attributes, validate_all};
use tagpulse::types::EventRecord;
use tagpulse::{TrackError, PRODUCER_NAME, TAGPULSE_VERSION};
use tracing_subscriber::EnvFilter;

/// Tagpulse - data layer instrumentation for page analytics
#[derive(Parser)]
#[command(name = "tagpulse")]
#[command(version = TAGPULSE_VERSION)]
#[command(about = "Replay UI signals into a data layer and check its records", long_about = None)]
struct Cli {
    /// Log tracking decisions to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a signal script into a data layer
    Replay {
        /// Script path, NDJSON or JSON array (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Tracking configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Persist referral ids in this JSON file across runs
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Tear down a page still open after the last signal
        #[arg(long)]
        close: bool,
    },

    /// Validate a data layer against the record contracts
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the referral id for a page URL
    Resolve {
        /// Page URL, e.g. https://example.com/?ref_id=abc
        #[arg(long)]
        url: Option<String>,

        /// JSON file holding the persisted id
        #[arg(long)]
        store: PathBuf,

        /// Forget the persisted id instead of resolving
        #[arg(long)]
        clear: bool,
    },

    /// Diagnose configuration and storage
    Doctor {
        /// Tracking configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Identity store file to check
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print record contracts
    Schema {
        /// Only this event
        event: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "tagpulse=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let error = CliError::from(e);
            eprintln!(
                "{}",
                serde_json::to_string(&error).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), TagpulseCliError> {
    match cli.command {
        Commands::Replay {
            input,
            output,
            config,
            store,
            output_format,
            close,
        } => cmd_replay(
            &input,
            &output,
            config.as_deref(),
            store.as_deref(),
            output_format,
            close,
        ),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Resolve { url, store, clear } => cmd_resolve(url.as_deref(), &store, clear),

        Commands::Doctor {
            config,
            store,
            json,
        } => cmd_doctor(config.as_deref(), store.as_deref(), json),

        Commands::Schema { event, json } => cmd_schema(event.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, TagpulseCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<TrackingConfig, TagpulseCliError> {
    match path {
        Some(path) => Ok(TrackingConfig::from_json_file(path)?),
        None => Ok(TrackingConfig::from_env()),
    }
}

fn cmd_replay(
    input: &Path,
    output: &Path,
    config: Option<&Path>,
    store: Option<&Path>,
    output_format: OutputFormat,
    close: bool,
) -> Result<(), TagpulseCliError> {
    let config = load_config(config)?;
    let script = read_input(input)?;
    let signals = parse_script(&script)?;

    if signals.is_empty() {
        return Err(TagpulseCliError::NoSignals);
    }

    let store: Arc<dyn IdentityStore> = match store {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(tagpulse::identity::MemoryStore::new()),
    };

    let layer = replay(&signals, config, store, close)?;
    tracing::info!(signals = signals.len(), records = layer.len(), "replay finished");

    let output_data = match output_format {
        OutputFormat::Ndjson => layer.to_ndjson()?,
        OutputFormat::Json => format!("{}\n", layer.to_json()?),
        OutputFormat::JsonPretty => {
            format!("{}\n", serde_json::to_string_pretty(&layer.snapshot())?)
        }
    };

    if output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(output, output_data)?;
    }

    Ok(())
}

fn parse_records(data: &str, format: InputFormat) -> Result<Vec<EventRecord>, TagpulseCliError> {
    match format {
        InputFormat::Json => Ok(serde_json::from_str(data)?),
        InputFormat::Ndjson => {
            let mut records = Vec::new();
            for (line_num, line) in data.lines().enumerate() {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let record = serde_json::from_str::<EventRecord>(trimmed).map_err(|e| {
                    TagpulseCliError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    ))
                })?;
                records.push(record);
            }
            Ok(records)
        }
    }
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), TagpulseCliError> {
    let data = read_input(input)?;
    let records = parse_records(&data, input_format)?;

    if records.is_empty() {
        return Err(TagpulseCliError::NoRecords);
    }

    let violations = validate_all(&records);
    let mut invalid_indices: Vec<usize> = violations.iter().map(|(i, _)| *i).collect();
    invalid_indices.dedup();

    let report = ValidationReport {
        total_records: records.len(),
        valid_records: records.len() - invalid_indices.len(),
        invalid_records: invalid_indices.len(),
        errors: violations
            .iter()
            .map(|(index, violation)| ValidationErrorDetail {
                index: *index,
                event: records[*index].event().to_string(),
                error: violation.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {} ({}): {}", err.index, err.event, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(TagpulseCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_resolve(url: Option<&str>, store: &Path, clear: bool) -> Result<(), TagpulseCliError> {
    let resolver = IdentityResolver::new(FileStore::new(store));

    if clear {
        resolver.clear();
        println!("{}", serde_json::json!({ "ref_id": null, "cleared": true }));
        return Ok(());
    }

    let output = match resolver.resolve(url) {
        Some(resolution) => serde_json::to_value(&resolution)?,
        None => serde_json::json!({ "ref_id": null }),
    };
    println!("{}", output);
    Ok(())
}

fn cmd_doctor(
    config: Option<&Path>,
    store: Option<&Path>,
    json: bool,
) -> Result<(), TagpulseCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "tagpulse_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Tagpulse version {}", TAGPULSE_VERSION),
    });

    let loaded = match config {
        Some(path) => match TrackingConfig::from_json_file(path) {
            Ok(config) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Config file valid: {}", path.display()),
                });
                Some(config)
            }
            Err(e) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot load config: {}", e),
                });
                None
            }
        },
        None => Some(TrackingConfig::from_env()),
    };

    if let Some(config) = &loaded {
        let check = match config.active_container_id() {
            Some(id) => DoctorCheck {
                name: "container".to_string(),
                status: CheckStatus::Ok,
                message: format!("Tag loader enabled for {}", id),
            },
            None => DoctorCheck {
                name: "container".to_string(),
                status: CheckStatus::Warning,
                message: format!(
                    "No container id configured (set {} or container_id); data layer only",
                    GTM_ID_ENV
                ),
            },
        };
        checks.push(check);
    }

    if let Some(store_path) = store {
        let file_store = FileStore::new(store_path);
        let check = match file_store.get(REF_ID_STORAGE_KEY) {
            Ok(Some(ref_id)) => DoctorCheck {
                name: "identity_store".to_string(),
                status: CheckStatus::Ok,
                message: format!("Persisted ref_id: {}", ref_id),
            },
            Ok(None) if store_path.exists() => DoctorCheck {
                name: "identity_store".to_string(),
                status: CheckStatus::Ok,
                message: "Store readable, no ref_id persisted".to_string(),
            },
            Ok(None) => DoctorCheck {
                name: "identity_store".to_string(),
                status: CheckStatus::Warning,
                message: "Store file does not exist yet".to_string(),
            },
            Err(e) => DoctorCheck {
                name: "identity_store".to_string(),
                status: CheckStatus::Error,
                message: format!("Store unreadable: {}", e),
            },
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass scripts with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (replay --input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TAGPULSE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Tagpulse Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(TagpulseCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn cmd_schema(event: Option<&str>, json: bool) -> Result<(), TagpulseCliError> {
    let events: Vec<&str> = match event {
        Some(name) if required_attributes(name).is_empty() => {
            return Err(TagpulseCliError::UnknownEvent(name.to_string()));
        }
        Some(name) => vec![name],
        None => known_events().collect(),
    };

    if json {
        let contracts: serde_json::Map<String, serde_json::Value> = events
            .iter()
            .map(|name| (name.to_string(), serde_json::json!(required_attributes(name))))
            .collect();
        println!("{}", serde_json::to_string_pretty(&contracts)?);
    } else {
        println!("Record Contracts");
        println!("================");
        println!("Every record is {{ \"event\": <name>, ...attributes }}.");
        println!("Extra attributes are allowed.");
        println!();
        for name in events {
            println!("{:<24} {}", name, required_attributes(name).join(", "));
        }
    }

    Ok(())
}

// Error types

#[derive(Debug)]
enum TagpulseCliError {
    Io(io::Error),
    Track(TrackError),
    Json(serde_json::Error),
    NoSignals,
    NoRecords,
    ValidationFailed(usize),
    DoctorFailed,
    UnknownEvent(String),
    ParseError(String),
}

impl From<io::Error> for TagpulseCliError {
    fn from(e: io::Error) -> Self {
        TagpulseCliError::Io(e)
    }
}

impl From<TrackError> for TagpulseCliError {
    fn from(e: TrackError) -> Self {
        TagpulseCliError::Track(e)
    }
}

impl From<serde_json::Error> for TagpulseCliError {
    fn from(e: serde_json::Error) -> Self {
        TagpulseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TagpulseCliError> for CliError {
    fn from(e: TagpulseCliError) -> Self {
        match e {
            TagpulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TagpulseCliError::Track(e @ TrackError::InvalidConfig(_)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Run 'tagpulse doctor --config <file>' for details".to_string()),
            },
            TagpulseCliError::Track(e @ TrackError::NoPage) => CliError {
                code: "NO_PAGE".to_string(),
                message: e.to_string(),
                hint: Some("Start the script with an \"open\" signal".to_string()),
            },
            TagpulseCliError::Track(e) => CliError {
                code: "TRACK_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure the script contains valid, time-ordered signals".to_string()),
            },
            TagpulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TagpulseCliError::NoSignals => CliError {
                code: "NO_SIGNALS".to_string(),
                message: "No signals found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TagpulseCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TagpulseCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            TagpulseCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            TagpulseCliError::UnknownEvent(name) => CliError {
                code: "UNKNOWN_EVENT".to_string(),
                message: format!("No contract for event '{}'", name),
                hint: Some("Run 'tagpulse schema' to list known events".to_string()),
            },
            TagpulseCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    event: String,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
