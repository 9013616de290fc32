//! Section validation tests for measurement-sync-config.
// crates/measurement-sync-config/tests/section_validation.rs
// =============================================================================
// Module: Config Section Validation Tests
// Description: Validate context and table constraints.
// Purpose: Ensure labels, exclusions, and column names fail closed.
// =============================================================================

mod common;

use crate::common::TestResult;
use crate::common::assert_invalid;
use crate::common::minimal_config;

#[test]
fn empty_program_label_is_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.context.program_label = Some("   ".to_string());
    assert_invalid(config.validate(), "context.program_label must be non-empty")
}

#[test]
fn labels_reject_the_key_separator() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.context.acquisition_level = Some("TRIP|GEAR".to_string());
    assert_invalid(config.validate(), "context.acquisition_level must not contain '|'")
}

#[test]
fn duplicate_exclusions_are_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.context.force_optional_excluded = vec![12, 14, 12];
    assert_invalid(config.validate(), "duplicate id 12")
}

#[test]
fn empty_column_names_are_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.table.leading_columns = vec![String::new()];
    assert_invalid(config.validate(), "table column names must be non-empty")
}

#[test]
fn numeric_column_names_are_reserved() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.table.trailing_columns = vec!["42".to_string()];
    assert_invalid(config.validate(), "table column 42 is reserved for field ids")
}

#[test]
fn columns_are_unique_across_both_sides() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.table.leading_columns = vec!["id".to_string()];
    config.table.trailing_columns = vec!["comments".to_string(), "id".to_string()];
    assert_invalid(config.validate(), "table column id is duplicated")
}

#[test]
fn too_many_columns_are_rejected() -> TestResult {
    let mut config = minimal_config().map_err(|err| err.to_string())?;
    config.table.leading_columns = (0 .. 33).map(|index| format!("c{index}")).collect();
    assert_invalid(config.validate(), "table columns exceed max entries")
}
