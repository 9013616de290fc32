// crates/measurement-sync-config/src/config.rs
// ============================================================================
// Module: Measurement Sync Configuration
// Description: Configuration loading and validation for the sync engine.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: measurement-sync-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Every section is optional and defaults to the engine's own defaults.
//! Invalid configuration fails closed; nothing is partially applied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use measurement_sync_core::AcquisitionLevel;
use measurement_sync_core::Context;
use measurement_sync_core::EngineLogSink;
use measurement_sync_core::ExtractionOptions;
use measurement_sync_core::FieldId;
use measurement_sync_core::GearId;
use measurement_sync_core::MemoryLogSink;
use measurement_sync_core::NoopLogSink;
use measurement_sync_core::ProgramLabel;
use measurement_sync_core::ReconcilerOptions;
use measurement_sync_core::RowOptions;
use measurement_sync_core::SchemaOptions;
use measurement_sync_core::StderrLogSink;
use measurement_sync_core::StrategyId;
use measurement_sync_core::StrategyLabel;
use measurement_sync_core::TracingLogSink;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
pub const DEFAULT_CONFIG_NAME: &str = "measurement-sync.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "MEASUREMENT_SYNC_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Maximum number of structural columns per side.
pub(crate) const MAX_STRUCTURAL_COLUMNS: usize = 32;
/// Maximum length of a structural column name.
pub(crate) const MAX_COLUMN_NAME_LENGTH: usize = 64;
/// Maximum number of force-optional exclusions.
pub(crate) const MAX_FORCE_OPTIONAL_EXCLUSIONS: usize = 1024;
/// Maximum length of a context label.
pub(crate) const MAX_LABEL_LENGTH: usize = 128;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Measurement sync engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Initial context and context policy.
    #[serde(default)]
    pub context: ContextConfig,
    /// Extraction filter.
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Schema options.
    #[serde(default)]
    pub schema: SchemaConfig,
    /// Table layout for row reconcilers.
    #[serde(default)]
    pub table: TableConfig,
    /// Log sink selection.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path comes from `path`, then `MEASUREMENT_SYNC_CONFIG`, then
    /// `measurement-sync.toml` in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Parses and validates configuration from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the payload is oversized, not UTF-8, not
    /// valid TOML, or fails validation.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.context.validate()?;
        self.table.validate()?;
        Ok(())
    }

    /// Converts into reconciler options.
    #[must_use]
    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            context: self.context.initial_context(),
            force_optional_excluded: self.context.excluded_fields(),
            extraction: ExtractionOptions {
                skip_disabled: self.extraction.skip_disabled,
                skip_computed: self.extraction.skip_computed,
            },
            schema: SchemaOptions {
                with_typename: self.schema.with_typename,
            },
        }
    }

    /// Converts into table options.
    #[must_use]
    pub fn row_options(&self) -> RowOptions {
        RowOptions {
            leading_columns: self.table.leading_columns.clone(),
            trailing_columns: self.table.trailing_columns.clone(),
            can_edit_rank: self.table.can_edit_rank,
        }
    }

    /// Builds the configured log sink.
    #[must_use]
    pub fn build_log_sink(&self) -> Arc<dyn EngineLogSink> {
        match self.logging.sink {
            LogSinkKind::Tracing => Arc::new(TracingLogSink),
            LogSinkKind::Stderr => Arc::new(StderrLogSink),
            LogSinkKind::Memory => Arc::new(MemoryLogSink::new()),
            LogSinkKind::None => Arc::new(NoopLogSink),
        }
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Initial context and context policy.
#[allow(clippy::struct_excessive_bools, reason = "Config flags mirror user-facing toggles.")]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContextConfig {
    /// Initial program label.
    #[serde(default)]
    pub program_label: Option<String>,
    /// Initial acquisition level.
    #[serde(default)]
    pub acquisition_level: Option<String>,
    /// Initial strategy label.
    #[serde(default)]
    pub strategy_label: Option<String>,
    /// Initial strategy id.
    #[serde(default)]
    pub strategy_id: Option<i64>,
    /// Initial gear id.
    #[serde(default)]
    pub gear_id: Option<i64>,
    /// Whether a strategy must be set before definitions load.
    #[serde(default)]
    pub required_strategy: bool,
    /// Whether a gear must be set before definitions load.
    #[serde(default)]
    pub required_gear: bool,
    /// Whether required definitions are relaxed to optional.
    #[serde(default)]
    pub force_optional: bool,
    /// Field ids that stay required under force-optional.
    #[serde(default)]
    pub force_optional_excluded: Vec<u32>,
}

impl ContextConfig {
    /// Validates context configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("context.program_label", &self.program_label),
            ("context.acquisition_level", &self.acquisition_level),
            ("context.strategy_label", &self.strategy_label),
        ] {
            if let Some(value) = value {
                validate_label(field, value)?;
            }
        }
        if self.force_optional_excluded.len() > MAX_FORCE_OPTIONAL_EXCLUSIONS {
            return Err(ConfigError::Invalid(
                "context.force_optional_excluded exceeds max entries".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for id in &self.force_optional_excluded {
            if !seen.insert(*id) {
                return Err(ConfigError::Invalid(format!(
                    "context.force_optional_excluded contains duplicate id {id}"
                )));
            }
        }
        Ok(())
    }

    /// Builds the initial context.
    fn initial_context(&self) -> Context {
        Context {
            program_label: self.program_label.as_deref().map(ProgramLabel::new),
            acquisition_level: self.acquisition_level.as_deref().map(AcquisitionLevel::new),
            strategy_label: self.strategy_label.as_deref().map(StrategyLabel::new),
            strategy_id: self.strategy_id.map(StrategyId::new),
            gear_id: self.gear_id.map(GearId::new),
            required_strategy: self.required_strategy,
            required_gear: self.required_gear,
            force_optional: self.force_optional,
        }
    }

    /// Returns the exclusion set.
    fn excluded_fields(&self) -> BTreeSet<FieldId> {
        self.force_optional_excluded.iter().copied().map(FieldId::new).collect()
    }
}

// ============================================================================
// SECTION: Extraction And Schema
// ============================================================================

/// Extraction filter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtractionConfig {
    /// Skip fields whose control is disabled.
    #[serde(default = "default_true")]
    pub skip_disabled: bool,
    /// Skip computed fields.
    #[serde(default = "default_true")]
    pub skip_computed: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            skip_disabled: true,
            skip_computed: true,
        }
    }
}

/// Schema configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchemaConfig {
    /// Whether schemas carry the value-shape meta field.
    #[serde(default = "default_true")]
    pub with_typename: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            with_typename: true,
        }
    }
}

// ============================================================================
// SECTION: Table
// ============================================================================

/// Table layout configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableConfig {
    /// Structural columns shown before the dynamic ones.
    #[serde(default)]
    pub leading_columns: Vec<String>,
    /// Structural columns shown after the dynamic ones.
    #[serde(default)]
    pub trailing_columns: Vec<String>,
    /// Whether rank orders may be set explicitly.
    #[serde(default)]
    pub can_edit_rank: bool,
}

impl TableConfig {
    /// Validates table configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.leading_columns.len() > MAX_STRUCTURAL_COLUMNS
            || self.trailing_columns.len() > MAX_STRUCTURAL_COLUMNS
        {
            return Err(ConfigError::Invalid("table columns exceed max entries".to_string()));
        }
        let mut seen = BTreeSet::new();
        for name in self.leading_columns.iter().chain(&self.trailing_columns) {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::Invalid("table column names must be non-empty".to_string()));
            }
            if trimmed.len() > MAX_COLUMN_NAME_LENGTH {
                return Err(ConfigError::Invalid(format!("table column {trimmed} exceeds max length")));
            }
            if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
                return Err(ConfigError::Invalid(format!(
                    "table column {trimmed} is reserved for field ids"
                )));
            }
            if !seen.insert(trimmed) {
                return Err(ConfigError::Invalid(format!("table column {trimmed} is duplicated")));
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Log sink selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Sink receiving engine log events.
    #[serde(default)]
    pub sink: LogSinkKind,
}

/// Engine log sink kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSinkKind {
    /// Forward to `tracing`.
    #[default]
    Tracing,
    /// JSON lines on stderr.
    Stderr,
    /// Keep in memory.
    Memory,
    /// Discard.
    None,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a context label.
fn validate_label(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_LABEL_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    if trimmed.contains('|') {
        return Err(ConfigError::Invalid(format!("{field} must not contain '|'")));
    }
    Ok(())
}

/// Returns true; serde default helper.
const fn default_true() -> bool {
    true
}
