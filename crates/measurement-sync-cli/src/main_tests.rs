// crates/measurement-sync-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for normalization, columns, replay, and bounded reads.
// Purpose: Ensure CLI helpers drive the engine and fail closed on bad input.
// Dependencies: measurement-sync-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! Exercises the command helpers without going through argument parsing.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::time::Duration;

use measurement_sync_config::EngineConfig;
use measurement_sync_core::FieldDefinition;
use measurement_sync_core::FieldId;
use measurement_sync_core::FormValue;
use measurement_sync_core::FormValueMap;
use measurement_sync_core::MeasurementRecord;
use measurement_sync_core::MeasurementValues;
use measurement_sync_core::ModelValueMap;
use measurement_sync_core::ValueKind;
use serde_json::json;
use tempfile::NamedTempFile;

use super::ContextArgs;
use super::DefinitionSet;
use super::ReadLimitError;
use super::ShapeArg;
use super::column_names;
use super::normalize_values;
use super::read_bytes_with_limit;
use super::replay_entity;
use super::replay_options;
use super::replay_table;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn definitions() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new(1, "COUNT", ValueKind::Integer),
        FieldDefinition::new(2, "NOTE", ValueKind::String),
    ]
}

fn trip_context() -> ContextArgs {
    ContextArgs {
        program: Some("SIH-OBSBIO".to_string()),
        level: Some("TRIP".to_string()),
        ..ContextArgs::default()
    }
}

fn counted(count: &str) -> MeasurementRecord {
    let model: ModelValueMap = [(FieldId::new(1), count.to_string())].into_iter().collect();
    MeasurementRecord::new(MeasurementValues::Model(model))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

/// Verifies model values convert to typed form values and back.
#[test]
fn normalize_converts_between_shapes() {
    let definitions = DefinitionSet::new(definitions()).unwrap();
    let form = normalize_values(&definitions, json!({"1": "4", "2": "net"}), ShapeArg::Form)
        .unwrap();
    let expected: FormValueMap = [
        (FieldId::new(1), FormValue::Integer(4)),
        (FieldId::new(2), FormValue::Text("net".to_string())),
    ]
    .into_iter()
    .collect();
    assert_eq!(form, serde_json::to_value(&expected).unwrap());

    let model = normalize_values(&definitions, form, ShapeArg::Model).unwrap();
    assert_eq!(model, json!({"1": "4", "2": "net"}));
}

/// Verifies a values document of the wrong shape is rejected.
#[test]
fn normalize_rejects_mismatched_shape() {
    let definitions = DefinitionSet::new(definitions()).unwrap();
    let err = normalize_values(&definitions, json!(["4"]), ShapeArg::Form).unwrap_err();
    assert!(err.to_string().contains("values are not model-shaped"));
}

/// Verifies columns frame field ids between configured structural columns.
#[test]
fn columns_use_configured_layout() {
    let definitions = DefinitionSet::new(definitions()).unwrap();
    let mut config = EngineConfig::default();
    config.table.leading_columns = vec!["id".to_string()];
    config.table.trailing_columns = vec!["comments".to_string()];
    assert_eq!(column_names(&definitions, &config), vec!["id", "1", "2", "comments"]);
}

/// Verifies replay requires a resolvable context.
#[test]
fn replay_requires_a_resolvable_context() {
    let config = EngineConfig::default();
    let err = replay_options(&config, &ContextArgs::default()).unwrap_err();
    assert!(err.to_string().contains("context is not resolvable"));

    let options = replay_options(&config, &trip_context()).unwrap();
    let key = options.context.resolve().unwrap().key();
    assert_eq!(key.as_str(), "SIH-OBSBIO|TRIP|null|null");
}

/// Verifies a replayed entity lands and extracts its known values.
#[tokio::test]
async fn replay_entity_round_trips_known_values() {
    let config = EngineConfig::default();
    let options = replay_options(&config, &trip_context()).unwrap();
    let replay =
        replay_entity(&config, options, definitions(), counted("7"), Duration::from_secs(5))
            .await
            .unwrap();

    assert!(replay.applied);
    let MeasurementValues::Model(model) = &replay.entity.measurement_values else {
        panic!("extracted values should be model-shaped");
    };
    assert_eq!(model.get(FieldId::new(1)), Some("7"));
    assert_eq!(model.get(FieldId::new(2)), None);
}

/// Verifies a replayed table assigns ranks in record order.
#[tokio::test]
async fn replay_table_assigns_ranks() {
    let config = EngineConfig::default();
    let options = replay_options(&config, &trip_context()).unwrap();
    let rows = replay_table(
        &config,
        options,
        definitions(),
        vec![counted("1"), counted("2")],
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    let ranks: Vec<Option<u32>> = rows.iter().map(|record| record.rank_order).collect();
    assert_eq!(ranks, vec![Some(1), Some(2)]);
}

/// Verifies bounded reads fail closed on oversized inputs.
#[test]
fn read_bytes_with_limit_rejects_oversized_files() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[b'x'; 32]).unwrap();

    match read_bytes_with_limit(file.path(), 16) {
        Err(ReadLimitError::TooLarge {
            size,
            limit,
        }) => {
            assert_eq!(size, 32);
            assert_eq!(limit, 16);
        }
        other => panic!("unexpected result: {other:?}"),
    }
    assert_eq!(read_bytes_with_limit(file.path(), 32).unwrap().len(), 32);
}
