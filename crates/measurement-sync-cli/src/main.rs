// crates/measurement-sync-cli/src/main.rs
// ============================================================================
// Module: Measurement Sync CLI Entry Point
// Description: Command dispatcher for offline normalization and replay tasks.
// Purpose: Exercise the sync engine against definition and entity files.
// Dependencies: clap, measurement-sync-config, measurement-sync-core, tokio.
// ============================================================================

//! ## Overview
//! The measurement sync CLI runs the engine offline. It converts values
//! between model and form shapes, projects table columns, validates
//! configuration, and replays an entity or a table of records through a
//! reconciler backed by an in-memory catalog. Inputs are untrusted and read
//! with hard size limits.

// ============================================================================
// SECTION: Modules
// ============================================================================

#[cfg(test)]
mod main_tests;

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::ArgAction;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use measurement_sync_config::CONFIG_ENV_VAR;
use measurement_sync_config::DEFAULT_CONFIG_NAME;
use measurement_sync_config::EngineConfig;
use measurement_sync_config::config_toml_example;
use measurement_sync_core::AcquisitionLevel;
use measurement_sync_core::ApplyOutcome;
use measurement_sync_core::Collaborators;
use measurement_sync_core::DefinitionSet;
use measurement_sync_core::EntityReconciler;
use measurement_sync_core::FieldDefinition;
use measurement_sync_core::FormValueMap;
use measurement_sync_core::GearId;
use measurement_sync_core::InMemoryCatalog;
use measurement_sync_core::MeasurementRecord;
use measurement_sync_core::MeasurementValues;
use measurement_sync_core::ModelValueMap;
use measurement_sync_core::ProgramLabel;
use measurement_sync_core::ReconcilerOptions;
use measurement_sync_core::RowReconciler;
use measurement_sync_core::StrategyLabel;
use measurement_sync_core::runtime::normalizer::model_values_of;
use measurement_sync_core::runtime::normalizer::to_form_values;
use measurement_sync_core::runtime::rows::project_columns;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a definitions file.
const MAX_DEFINITIONS_BYTES: usize = 8 * 1024 * 1024;
/// Maximum size of a values or entity file.
const MAX_ENTITY_BYTES: usize = 8 * 1024 * 1024;
/// Environment variable holding the log filter.
const LOG_ENV: &str = "MEASUREMENT_SYNC_LOG";
/// Default replay timeout in milliseconds.
const DEFAULT_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "measurement-sync", disable_help_subcommand = true, disable_version_flag = true)]
struct Cli {
    /// Print version information and exit.
    #[arg(long = "version", action = ArgAction::SetTrue, global = true)]
    show_version: bool,
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Convert measurement values between model and form shapes.
    Normalize(NormalizeCommand),
    /// Print the table columns for a definition set.
    Columns(ColumnsCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Replay an entity or a table through a reconciler.
    Replay(ReplayCommand),
}

/// Arguments for value normalization.
#[derive(Args, Debug)]
struct NormalizeCommand {
    /// Path to the field definitions JSON array.
    #[arg(long, value_name = "PATH")]
    definitions: PathBuf,
    /// Path to the values JSON object.
    #[arg(long, value_name = "PATH")]
    values: PathBuf,
    /// Target value shape.
    #[arg(long, value_enum, value_name = "SHAPE")]
    to: ShapeArg,
}

/// Target shape for normalization.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ShapeArg {
    /// Typed values keyed by field id.
    Form,
    /// String-encoded values keyed by field id.
    Model,
}

/// Arguments for column projection.
#[derive(Args, Debug)]
struct ColumnsCommand {
    /// Path to the field definitions JSON array.
    #[arg(long, value_name = "PATH")]
    definitions: PathBuf,
    /// Optional config file path (defaults to measurement-sync.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Validate a configuration file.
    Validate(ConfigValidateCommand),
    /// Print the canonical example configuration.
    Example,
}

/// Arguments for config validation.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to measurement-sync.toml or env override).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for replay.
#[derive(Args, Debug)]
struct ReplayCommand {
    /// Path to the field definitions JSON array served by the catalog.
    #[arg(long, value_name = "PATH")]
    definitions: PathBuf,
    /// Path to the entity JSON (an array of records with `--table`).
    #[arg(long, value_name = "PATH")]
    entity: PathBuf,
    /// Replay a table of records instead of a single entity.
    #[arg(long, action = ArgAction::SetTrue)]
    table: bool,
    /// Optional config file path.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Context overrides applied on top of the config.
    #[command(flatten)]
    context: ContextArgs,
    /// Time allowed for the reconciler to become ready.
    #[arg(long, value_name = "MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,
}

/// Context overrides.
#[derive(Args, Debug, Default)]
struct ContextArgs {
    /// Program label.
    #[arg(long, value_name = "LABEL")]
    program: Option<String>,
    /// Acquisition level.
    #[arg(long, value_name = "LEVEL")]
    level: Option<String>,
    /// Strategy label.
    #[arg(long, value_name = "LABEL")]
    strategy: Option<String>,
    /// Gear identifier.
    #[arg(long, value_name = "ID")]
    gear: Option<i64>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    init_tracing();
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Installs the stderr tracing subscriber.
fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    if cli.show_version {
        let version = env!("CARGO_PKG_VERSION");
        write_stdout_line(&format!("measurement-sync {version}"))
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    }

    let Some(command) = cli.command else {
        write_stdout_line("usage: measurement-sync <normalize|columns|config|replay> [OPTIONS]")
            .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Commands::Normalize(command) => command_normalize(&command),
        Commands::Columns(command) => command_columns(&command),
        Commands::Config {
            command,
        } => command_config(command),
        Commands::Replay(command) => command_replay(command).await,
    }
}

// ============================================================================
// SECTION: Normalize Command
// ============================================================================

/// Executes the `normalize` command.
fn command_normalize(command: &NormalizeCommand) -> CliResult<ExitCode> {
    let definitions = read_definitions(&command.definitions)?;
    let values: Value = read_json(&command.values, "values", MAX_ENTITY_BYTES)?;
    let output = normalize_values(&definitions, values, command.to)?;
    write_json(&output)?;
    Ok(ExitCode::SUCCESS)
}

/// Converts a values document to the target shape.
fn normalize_values(
    definitions: &DefinitionSet,
    values: Value,
    target: ShapeArg,
) -> CliResult<Value> {
    let converted = match target {
        ShapeArg::Form => {
            let model: ModelValueMap = serde_json::from_value(values)
                .map_err(|err| CliError::new(format!("values are not model-shaped: {err}")))?;
            serde_json::to_value(to_form_values(&model, definitions))
        }
        ShapeArg::Model => {
            let form: FormValueMap = serde_json::from_value(values)
                .map_err(|err| CliError::new(format!("values are not form-shaped: {err}")))?;
            serde_json::to_value(model_values_of(&MeasurementValues::Form(form), definitions))
        }
    };
    converted.map_err(|err| CliError::new(format!("failed to encode values: {err}")))
}

// ============================================================================
// SECTION: Columns Command
// ============================================================================

/// Executes the `columns` command.
fn command_columns(command: &ColumnsCommand) -> CliResult<ExitCode> {
    let definitions = read_definitions(&command.definitions)?;
    let config = load_optional_config(command.config.as_deref())?;
    for name in column_names(&definitions, &config) {
        write_stdout_line(&name).map_err(|err| CliError::new(output_error("stdout", &err)))?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Projects column names for the configured table layout.
fn column_names(definitions: &DefinitionSet, config: &EngineConfig) -> Vec<String> {
    let options = config.row_options();
    project_columns(definitions, &options.leading_columns, &options.trailing_columns)
        .iter()
        .map(ToString::to_string)
        .collect()
}

// ============================================================================
// SECTION: Config Commands
// ============================================================================

/// Dispatches config subcommands.
fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => {
            EngineConfig::load(command.config.as_deref())
                .map_err(|err| CliError::new(format!("failed to load config: {err}")))?;
            write_stdout_line("config ok").map_err(|err| CliError::new(output_error("stdout", &err)))?;
        }
        ConfigCommand::Example => {
            write_stdout_bytes(config_toml_example().as_bytes())
                .map_err(|err| CliError::new(output_error("stdout", &err)))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Replay Command
// ============================================================================

/// Result of a single-entity replay.
#[derive(Debug, Serialize)]
struct EntityReplay {
    /// Whether the apply landed.
    applied: bool,
    /// Entity extracted after the apply.
    entity: MeasurementRecord,
}

/// Executes the `replay` command.
async fn command_replay(command: ReplayCommand) -> CliResult<ExitCode> {
    let definitions = read_json::<Vec<FieldDefinition>>(
        &command.definitions,
        "definitions",
        MAX_DEFINITIONS_BYTES,
    )?;
    let config = load_optional_config(command.config.as_deref())?;
    let options = replay_options(&config, &command.context)?;
    let timeout = Duration::from_millis(command.timeout_ms);
    if command.table {
        let records: Vec<MeasurementRecord> =
            read_json(&command.entity, "entity", MAX_ENTITY_BYTES)?;
        let rows = replay_table(&config, options, definitions, records, timeout).await?;
        write_json(&rows)?;
    } else {
        let record: MeasurementRecord = read_json(&command.entity, "entity", MAX_ENTITY_BYTES)?;
        let replay = replay_entity(&config, options, definitions, record, timeout).await?;
        write_json(&replay)?;
    }
    Ok(ExitCode::SUCCESS)
}

/// Builds reconciler options from config and CLI overrides.
fn replay_options(config: &EngineConfig, overrides: &ContextArgs) -> CliResult<ReconcilerOptions> {
    let mut options = config.reconciler_options();
    if let Some(program) = &overrides.program {
        options.context.program_label = Some(ProgramLabel::new(program.as_str()));
    }
    if let Some(level) = &overrides.level {
        options.context.acquisition_level = Some(AcquisitionLevel::new(level.as_str()));
    }
    if let Some(strategy) = &overrides.strategy {
        options.context.strategy_label = Some(StrategyLabel::new(strategy.as_str()));
    }
    if let Some(gear) = overrides.gear {
        options.context.gear_id = Some(GearId::new(gear));
    }
    if !options.context.is_resolvable() {
        return Err(CliError::new(
            "context is not resolvable: set a program label and acquisition level".to_string(),
        ));
    }
    Ok(options)
}

/// Builds collaborators serving `definitions` for every context.
fn replay_collaborators(config: &EngineConfig, definitions: Vec<FieldDefinition>) -> Collaborators {
    Collaborators::new(Arc::new(InMemoryCatalog::with_fallback(definitions)))
        .with_sink(config.build_log_sink())
}

/// Applies one entity, waits for it to land, and extracts it back.
async fn replay_entity(
    config: &EngineConfig,
    options: ReconcilerOptions,
    definitions: Vec<FieldDefinition>,
    record: MeasurementRecord,
    timeout: Duration,
) -> CliResult<EntityReplay> {
    let reconciler = EntityReconciler::new(replay_collaborators(config, definitions), options)
        .map_err(|err| CliError::new(err.to_string()))?;
    let ticket = reconciler.apply_entity(record).map_err(|err| CliError::new(err.to_string()))?;
    reconciler.request_ready().map_err(|err| CliError::new(err.to_string()))?;
    let outcome = tokio::time::timeout(timeout, ticket.outcome())
        .await
        .map_err(|_| CliError::new("reconciler did not become ready in time".to_string()))?
        .map_err(|err| CliError::new(err.to_string()))?;
    debug!(?outcome, "replayed entity");
    let entity = reconciler
        .extract_entity()
        .map_err(|err| CliError::new(err.to_string()))?
        .ok_or_else(|| CliError::new("reconciler holds no entity".to_string()))?;
    reconciler.stop();
    Ok(EntityReplay {
        applied: outcome == ApplyOutcome::Applied,
        entity,
    })
}

/// Creates one row per record, waits for readiness, and extracts the rows.
async fn replay_table(
    config: &EngineConfig,
    options: ReconcilerOptions,
    definitions: Vec<FieldDefinition>,
    records: Vec<MeasurementRecord>,
    timeout: Duration,
) -> CliResult<Vec<MeasurementRecord>> {
    let table = RowReconciler::new(
        replay_collaborators(config, definitions),
        options,
        config.row_options(),
    )
    .map_err(|err| CliError::new(err.to_string()))?;
    table
        .create_rows(records.into_iter().map(Some).collect())
        .map_err(|err| CliError::new(err.to_string()))?;
    table.request_ready().map_err(|err| CliError::new(err.to_string()))?;
    tokio::time::timeout(timeout, table.wait_until_ready())
        .await
        .map_err(|_| CliError::new("reconciler did not become ready in time".to_string()))?
        .map_err(|err| CliError::new(err.to_string()))?;
    let rows = table.extract_rows().map_err(|err| CliError::new(err.to_string()))?;
    debug!(rows = rows.len(), "replayed table");
    table.stop();
    Ok(rows.into_iter().map(|(_, record)| record).collect())
}

// ============================================================================
// SECTION: Input Helpers
// ============================================================================

/// Loads the config when a path or environment override exists.
///
/// A missing default file yields the default configuration.
fn load_optional_config(path: Option<&Path>) -> CliResult<EngineConfig> {
    let explicit = path.is_some() || std::env::var_os(CONFIG_ENV_VAR).is_some();
    if !explicit && !Path::new(DEFAULT_CONFIG_NAME).exists() {
        return Ok(EngineConfig::default());
    }
    EngineConfig::load(path).map_err(|err| CliError::new(format!("failed to load config: {err}")))
}

/// Reads and validates a definitions file.
fn read_definitions(path: &Path) -> CliResult<DefinitionSet> {
    let definitions: Vec<FieldDefinition> = read_json(path, "definitions", MAX_DEFINITIONS_BYTES)?;
    DefinitionSet::new(definitions)
        .map_err(|err| CliError::new(format!("invalid definitions: {err}")))
}

/// Reads a JSON file with a size limit.
fn read_json<T: DeserializeOwned>(path: &Path, label: &str, max_bytes: usize) -> CliResult<T> {
    let bytes = read_bytes_with_limit(path, max_bytes).map_err(|err| match err {
        ReadLimitError::Io(err) => {
            CliError::new(format!("failed to read {label} {}: {err}", path.display()))
        }
        ReadLimitError::TooLarge {
            size,
            limit,
        } => CliError::new(format!(
            "{label} file {} is too large ({size} bytes, limit {limit})",
            path.display()
        )),
    })?;
    serde_json::from_slice(&bytes)
        .map_err(|err| CliError::new(format!("failed to parse {label} {}: {err}", path.display())))
}

/// Errors returned by bounded file reads.
#[derive(Debug)]
enum ReadLimitError {
    /// File I/O failure.
    Io(std::io::Error),
    /// File size exceeds the configured limit.
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
}

/// Reads a file from disk while enforcing a hard size limit.
fn read_bytes_with_limit(path: &Path, max_bytes: usize) -> Result<Vec<u8>, ReadLimitError> {
    let file = File::open(path).map_err(ReadLimitError::Io)?;
    let size = file.metadata().map_err(ReadLimitError::Io)?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(ReadLimitError::TooLarge {
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(ReadLimitError::Io)?;
    if bytes.len() > max_bytes {
        return Err(ReadLimitError::TooLarge {
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes a value as pretty JSON to stdout.
fn write_json<T: Serialize>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|err| CliError::new(format!("failed to encode output: {err}")))?;
    write_stdout_line(&text).map_err(|err| CliError::new(output_error("stdout", &err)))
}

/// Writes a line to stdout.
fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

/// Writes raw bytes to stdout without adding a newline.
fn write_stdout_bytes(bytes: &[u8]) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    stdout.write_all(bytes)
}

/// Writes a line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Formats an output error message.
fn output_error(stream: &str, error: &std::io::Error) -> String {
    format!("failed to write to {stream}: {error}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
