//! Compliance CLI - Command-line interface for the participation compliance engine
//!
//! Commands:
//! - participants: List participant ids in a segment
//! - report: Generate weekly compliance stages for one participant
//! - doctor: Diagnose configuration and data availability

use clap::{Parser, Subcommand, ValueEnum};
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use participation_compliance::adapters::SharedSource;
use participation_compliance::config::Config;
use participation_compliance::directory::{JsonDirectory, ParticipantDirectory, TableDirectory};
use participation_compliance::source::{MemorySource, TableName};
use participation_compliance::types::{AnchorMode, StageRequest};
use participation_compliance::{ComplianceError, ComplianceReporter, PRODUCER_NAME, VERSION};

/// Weekly study-compliance reports for pregnancy and postpartum participants
#[derive(Parser)]
#[command(name = "compliance")]
#[command(version = VERSION)]
#[command(about = "Weekly study compliance and compensation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List participant ids in a segment
    Participants {
        /// Segment id (defaults to MDH_SEGMENT_ID)
        #[arg(long)]
        segment: Option<String>,
    },

    /// Generate weekly compliance for one participant
    Report {
        /// Participant identifier
        #[arg(short, long)]
        participant: String,

        /// Week range such as 9-19; repeat for several stages (default: standard stages)
        #[arg(long = "stage")]
        stages: Vec<String>,

        /// Count --stage weeks from the delivery date
        #[arg(long)]
        postpartum: bool,

        /// Output format (default: table on a terminal, json otherwise)
        #[arg(long)]
        format: Option<OutputFormat>,
    },

    /// Diagnose configuration and data availability
    Doctor {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
    /// Plain-text tables
    Table,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), CliFailure> {
    match cli.command {
        Commands::Participants { segment } => cmd_participants(segment),
        Commands::Report {
            participant,
            stages,
            postpartum,
            format,
        } => cmd_report(&participant, &stages, postpartum, format),
        Commands::Doctor { json } => cmd_doctor(json),
    }
}

fn load_source(config: &Config) -> Result<SharedSource, CliFailure> {
    let dir = config.data_dir.as_ref().ok_or(CliFailure::NoDataSource)?;
    Ok(Arc::new(MemorySource::from_csv_dir(dir)?))
}

/// Participant directory from the JSON export, or from the table source when none is set.
///
/// The source is only loaded for a table-backed directory.
fn load_directory<F>(
    config: &Config,
    source: F,
) -> Result<Box<dyn ParticipantDirectory>, CliFailure>
where
    F: FnOnce() -> Result<SharedSource, CliFailure>,
{
    match &config.directory_file {
        Some(path) => Ok(Box::new(JsonDirectory::from_path(path)?)),
        None => Ok(Box::new(TableDirectory::new(source()?))),
    }
}

fn cmd_participants(segment: Option<String>) -> Result<(), CliFailure> {
    let config = Config::from_env().map_err(ComplianceError::from)?;
    let directory = load_directory(&config, || load_source(&config))?;

    let segment = segment.or_else(|| config.segment_id.clone());
    for id in directory.list_participants(segment.as_deref())? {
        println!("{id}");
    }
    Ok(())
}

/// Parse a `first-last` week range
fn parse_stage(raw: &str, postpartum: bool) -> Result<StageRequest, CliFailure> {
    let (first, last) = raw
        .split_once('-')
        .ok_or_else(|| CliFailure::BadStage(raw.to_string()))?;
    let first: u32 = first
        .trim()
        .parse()
        .map_err(|_| CliFailure::BadStage(raw.to_string()))?;
    let last: u32 = last
        .trim()
        .parse()
        .map_err(|_| CliFailure::BadStage(raw.to_string()))?;

    let (mode, label) = if postpartum {
        (AnchorMode::Postpartum, format!("Postpartum Weeks {first}-{last}"))
    } else {
        (AnchorMode::Gestational, format!("Prenatal Weeks {first}-{last}"))
    };
    Ok(StageRequest::new(label, first, last, mode)?)
}

fn cmd_report(
    participant: &str,
    stages: &[String],
    postpartum: bool,
    format: Option<OutputFormat>,
) -> Result<(), CliFailure> {
    let config = Config::from_env().map_err(ComplianceError::from)?;
    let source = load_source(&config)?;
    let directory = load_directory(&config, || Ok(source.clone()))?;
    let reporter = ComplianceReporter::from_config(&config, source, directory)?;

    let requests = if stages.is_empty() {
        StageRequest::standard_stages()
    } else {
        stages
            .iter()
            .map(|s| parse_stage(s, postpartum))
            .collect::<Result<Vec<_>, _>>()?
    };

    let report = reporter.generate_report(participant, &requests)?;

    let format = format.unwrap_or(if atty::is(atty::Stream::Stdout) {
        OutputFormat::Table
    } else {
        OutputFormat::Json
    });
    let encoder = reporter.encoder();
    match format {
        OutputFormat::Json => println!("{}", encoder.encode_to_json(&report, false)?),
        OutputFormat::JsonPretty => println!("{}", encoder.encode_to_json(&report, true)?),
        OutputFormat::Table => print!("{}", encoder.render_table(&report)),
    }
    Ok(())
}

fn cmd_doctor(json: bool) -> Result<(), CliFailure> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    let config = match Config::from_env() {
        Ok(config) => {
            checks.push(DoctorCheck::ok("config", "Configuration loaded from environment"));
            Some(config)
        }
        Err(e) => {
            checks.push(DoctorCheck::error("config", format!("Invalid configuration: {e}")));
            None
        }
    };

    if let Some(config) = &config {
        match &config.data_dir {
            Some(dir) if dir.is_dir() => {
                let present: Vec<&str> = TableName::ALL
                    .iter()
                    .filter(|t| dir.join(format!("{}.csv", t.as_str())).is_file())
                    .map(|t| t.as_str())
                    .collect();
                let status = if present.len() == TableName::ALL.len() {
                    CheckStatus::Ok
                } else {
                    CheckStatus::Warning
                };
                checks.push(DoctorCheck {
                    name: "data_dir".to_string(),
                    status,
                    message: format!(
                        "{} of {} table exports present in {}",
                        present.len(),
                        TableName::ALL.len(),
                        dir.display()
                    ),
                });
            }
            Some(dir) => checks.push(DoctorCheck::error(
                "data_dir",
                format!("{} is not a directory", dir.display()),
            )),
            None => checks.push(DoctorCheck::error("data_dir", "COMPLIANCE_DATA_DIR is not set")),
        }

        match &config.directory_file {
            Some(path) => match JsonDirectory::from_path(path) {
                Ok(directory) => checks.push(DoctorCheck::ok(
                    "directory",
                    format!("{} participants in {}", directory.len(), path.display()),
                )),
                Err(e) => checks.push(DoctorCheck::error(
                    "directory",
                    format!("Cannot read {}: {e}", path.display()),
                )),
            },
            None => checks.push(DoctorCheck {
                name: "directory".to_string(),
                status: CheckStatus::Warning,
                message: "COMPLIANCE_DIRECTORY_FILE not set; using the allparticipants table"
                    .to_string(),
            }),
        }

        if config.wear_api.enabled {
            match config.ensure_directories() {
                Ok(()) => checks.push(DoctorCheck::ok(
                    "wear_api",
                    format!(
                        "Vendor API fallback enabled ({}), cache at {}",
                        config.wear_api.endpoint,
                        config.cache_dir.display()
                    ),
                )),
                Err(e) => checks.push(DoctorCheck::error(
                    "wear_api",
                    format!("Cannot create cache directory: {e}"),
                )),
            }
        } else {
            checks.push(DoctorCheck::ok(
                "wear_api",
                "Vendor API fallback disabled; ring wear read from the temp table",
            ));
        }
    }

    let stdout_check = if atty::is(atty::Stream::Stdout) {
        DoctorCheck::ok("stdout", "stdout is a TTY (table output by default)")
    } else {
        DoctorCheck::ok("stdout", "stdout is a pipe (JSON output by default)")
    };
    checks.push(stdout_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Compliance Doctor Report");
        println!("========================");
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CliFailure::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error handling

#[derive(Debug)]
enum CliFailure {
    Compliance(ComplianceError),
    Json(serde_json::Error),
    NoDataSource,
    BadStage(String),
    DoctorFailed,
}

impl From<ComplianceError> for CliFailure {
    fn from(e: ComplianceError) -> Self {
        CliFailure::Compliance(e)
    }
}

impl From<serde_json::Error> for CliFailure {
    fn from(e: serde_json::Error) -> Self {
        CliFailure::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CliFailure> for CliError {
    fn from(e: CliFailure) -> Self {
        match e {
            CliFailure::Compliance(e) => {
                let (code, hint) = match &e {
                    ComplianceError::ParticipantNotFound(_) => (
                        "PARTICIPANT_NOT_FOUND",
                        "Run 'compliance participants' to list known ids",
                    ),
                    ComplianceError::Config(_) => (
                        "CONFIG_ERROR",
                        "Run 'compliance doctor' to check the environment",
                    ),
                    ComplianceError::SourceQueryFailure { .. } | ComplianceError::CsvError(_) => (
                        "SOURCE_ERROR",
                        "Check the table exports in COMPLIANCE_DATA_DIR",
                    ),
                    ComplianceError::InvalidStage(_) => {
                        ("INVALID_STAGE", "Weeks start at 1 and ranges run first-last")
                    }
                    ComplianceError::Io(_) => ("IO_ERROR", "Check file paths and permissions"),
                    _ => ("COMPLIANCE_ERROR", "Re-run with RUST_LOG=debug for details"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            CliFailure::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check the participant directory JSON".to_string()),
            },
            CliFailure::NoDataSource => CliError {
                code: "NO_DATA_SOURCE".to_string(),
                message: "No table exports configured".to_string(),
                hint: Some("Set COMPLIANCE_DATA_DIR to a directory of <table>.csv files".to_string()),
            },
            CliFailure::BadStage(raw) => CliError {
                code: "INVALID_STAGE".to_string(),
                message: format!("Cannot parse stage {raw:?}"),
                hint: Some("Use a week range such as 9-19".to_string()),
            },
            CliFailure::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

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

impl DoctorCheck {
    fn ok(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.into(),
        }
    }

    fn error(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.into(),
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_json_directory_needs_no_data_dir() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("participants.json");
        fs::write(
            &path,
            r#"{"participants": [{"participantIdentifier": "BB-0001", "customFields": {}}]}"#,
        )
        .unwrap();
        let config = Config {
            directory_file: Some(path),
            ..Config::default()
        };

        let directory = load_directory(&config, || load_source(&config)).unwrap();
        assert_eq!(directory.list_participants(None).unwrap(), vec!["BB-0001"]);
    }

    #[test]
    fn test_table_directory_needs_data_dir() {
        let config = Config::default();
        let result = load_directory(&config, || load_source(&config));
        assert!(matches!(result, Err(CliFailure::NoDataSource)));
    }

    #[test]
    fn test_parse_stage() {
        let stage = parse_stage("20-30", false).unwrap();
        assert_eq!((stage.first_week, stage.last_week), (20, 30));
        assert_eq!(stage.label, "Prenatal Weeks 20-30");
        assert!(matches!(parse_stage("9", false), Err(CliFailure::BadStage(_))));
        assert!(matches!(
            parse_stage("6-1", true),
            Err(CliFailure::Compliance(ComplianceError::InvalidStage(_)))
        ));
    }
}
