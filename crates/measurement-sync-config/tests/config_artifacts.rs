//! Config artifact tests for measurement-sync-config.
// crates/measurement-sync-config/tests/config_artifacts.rs
// ============================================================================
// Module: Config Artifact Tests
// Description: Validate defaults, the example payload, and option conversion.
// Purpose: Prevent drift between the config model and the engine options.
// Dependencies: measurement-sync-config, measurement-sync-core, toml
// ============================================================================

use measurement_sync_config::EngineConfig;
use measurement_sync_config::LogSinkKind;
use measurement_sync_config::config_toml_example;
use measurement_sync_core::FieldId;
use measurement_sync_core::ReconcilerOptions;
use measurement_sync_core::RowOptions;

mod common;

use crate::common::TestResult;
use crate::common::minimal_config;

#[test]
fn minimal_config_matches_engine_defaults() -> TestResult {
    let config = minimal_config().map_err(|err| err.to_string())?;
    config.validate().map_err(|err| err.to_string())?;
    if config.reconciler_options() != ReconcilerOptions::default() {
        return Err("minimal config should map to default reconciler options".to_string());
    }
    if config.row_options() != RowOptions::default() {
        return Err("minimal config should map to default row options".to_string());
    }
    if config.logging.sink != LogSinkKind::Tracing {
        return Err("default sink should be tracing".to_string());
    }
    Ok(())
}

#[test]
fn example_config_validates() -> TestResult {
    let example = config_toml_example();
    let config =
        EngineConfig::from_bytes(example.as_bytes()).map_err(|err| err.to_string())?;
    let options = config.reconciler_options();
    let key = options.context.resolve().map(|resolved| resolved.key().to_string());
    if key.as_deref() != Some("SIH-OBSBIO|TRIP|null|null") {
        return Err("unexpected context key".to_string());
    }
    if !options.force_optional_excluded.contains(&FieldId::new(12)) {
        return Err("exclusions should carry over".to_string());
    }
    let rows = config.row_options();
    if rows.leading_columns != vec!["select".to_string(), "id".to_string()] {
        return Err("leading columns should carry over".to_string());
    }
    Ok(())
}

#[test]
fn extraction_flags_map_to_options() -> TestResult {
    let config: EngineConfig =
        toml::from_str("[extraction]\nskip_computed = false\n\n[schema]\nwith_typename = false\n")
            .map_err(|err| err.to_string())?;
    let options = config.reconciler_options();
    if !options.extraction.skip_disabled || options.extraction.skip_computed {
        return Err("extraction flags should map field by field".to_string());
    }
    if options.schema.with_typename {
        return Err("schema flag should map".to_string());
    }
    Ok(())
}

#[test]
fn every_sink_kind_builds() -> TestResult {
    for sink in ["tracing", "stderr", "memory", "none"] {
        let config: EngineConfig = toml::from_str(&format!("[logging]\nsink = \"{sink}\"\n"))
            .map_err(|err| err.to_string())?;
        let _sink = config.build_log_sink();
    }
    Ok(())
}
