// crates/measurement-sync-core/tests/normalizer.rs
// ============================================================================
// Module: Value Normalizer Tests
// Description: Conversions between model and form value shapes.
// ============================================================================
//! ## Overview
//! Covers round trips for each value kind, computed-field immutability,
//! default values at apply time, and extraction filters.

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

mod common;

use std::sync::Arc;

use measurement_sync_core::DefaultValidatorFactory;
use measurement_sync_core::DefinitionSet;
use measurement_sync_core::ExtractionOptions;
use measurement_sync_core::FieldDefinition;
use measurement_sync_core::FieldId;
use measurement_sync_core::FormValue;
use measurement_sync_core::FormValueMap;
use measurement_sync_core::MeasurementValues;
use measurement_sync_core::ModelValueMap;
use measurement_sync_core::QualitativeValue;
use measurement_sync_core::SchemaBuilder;
use measurement_sync_core::SchemaOptions;
use measurement_sync_core::ValueKind;
use measurement_sync_core::runtime::normalizer::extractable;
use measurement_sync_core::runtime::normalizer::form_values_for_apply;
use measurement_sync_core::runtime::normalizer::model_values_of;
use measurement_sync_core::runtime::normalizer::to_form_value;
use measurement_sync_core::runtime::normalizer::to_form_values;
use measurement_sync_core::runtime::normalizer::to_model_value;
use measurement_sync_core::runtime::normalizer::to_model_values;
use proptest::prelude::*;
use time::macros::datetime;

use crate::common::COUNT;
use crate::common::NOTE;
use crate::common::SPECIES;
use crate::common::WEIGHT;
use crate::common::trip_definitions;

fn integer() -> FieldDefinition {
    FieldDefinition::new(1, "COUNT", ValueKind::Integer)
}

fn decimal() -> FieldDefinition {
    FieldDefinition::new(
        2,
        "LENGTH",
        ValueKind::Decimal {
            precision: None,
        },
    )
}

fn text() -> FieldDefinition {
    FieldDefinition::new(3, "NOTE", ValueKind::String)
}

fn round_trip(raw: &str, definition: &FieldDefinition) -> Option<String> {
    to_model_value(&to_form_value(Some(raw), definition), definition)
}

proptest! {
    #[test]
    fn integers_round_trip(value in any::<i64>()) {
        let raw = value.to_string();
        prop_assert_eq!(round_trip(&raw, &integer()), Some(raw));
    }

    #[test]
    fn decimals_round_trip(value in -1.0e9f64..1.0e9f64) {
        let raw = value.to_string();
        prop_assert_eq!(round_trip(&raw, &decimal()), Some(raw));
    }

    #[test]
    fn text_round_trips(raw in "[a-zA-Z0-9][a-zA-Z0-9 ]{0,19}") {
        prop_assert_eq!(round_trip(&raw, &text()), Some(raw));
    }

    #[test]
    fn integer_lists_round_trip(values in prop::collection::vec(any::<i64>(), 1..6)) {
        let definition = integer().multiple();
        let raw = values.iter().map(ToString::to_string).collect::<Vec<_>>().join("|");
        let form = to_form_value(Some(&raw), &definition);
        prop_assert_eq!(
            &form,
            &FormValue::List(values.iter().copied().map(FormValue::Integer).collect())
        );
        prop_assert_eq!(to_model_value(&form, &definition), Some(raw));
    }
}

/// Verifies booleans accept numeric spellings and encode canonically.
#[test]
fn booleans_accept_numeric_spellings() {
    let definition = FieldDefinition::new(1, "FLAG", ValueKind::Boolean);
    assert_eq!(to_form_value(Some("1"), &definition), FormValue::Boolean(true));
    assert_eq!(to_form_value(Some("false"), &definition), FormValue::Boolean(false));
    assert_eq!(to_form_value(Some("maybe"), &definition), FormValue::Empty);
    assert_eq!(round_trip("0", &definition), Some("false".to_string()));
}

/// Verifies whole decimals are accepted by integer fields.
#[test]
fn integer_fields_accept_whole_decimals() {
    assert_eq!(to_form_value(Some("4.0"), &integer()), FormValue::Integer(4));
    assert_eq!(to_form_value(Some("4.5"), &integer()), FormValue::Empty);
}

/// Verifies bare dates parse at UTC midnight and encode as RFC 3339.
#[test]
fn bare_dates_parse_at_utc_midnight() {
    let definition = FieldDefinition::new(1, "LANDING", ValueKind::Date);
    let form = to_form_value(Some("2024-03-01"), &definition);
    assert_eq!(form, FormValue::Date(datetime!(2024-03-01 00:00 UTC)));
    assert_eq!(to_model_value(&form, &definition), Some("2024-03-01T00:00:00Z".to_string()));
}

/// Verifies qualitative values resolve by id and unknown ids are dropped.
#[test]
fn qualitative_values_resolve_by_id() {
    let definitions = DefinitionSet::new(trip_definitions()).unwrap();
    let species = definitions.get(FieldId::new(SPECIES)).unwrap();
    assert_eq!(
        to_form_value(Some("11"), species),
        FormValue::Qualitative(QualitativeValue::new(11, "HAKE"))
    );
    assert_eq!(to_form_value(Some("99"), species), FormValue::Empty);
    assert_eq!(round_trip("10", species), Some("10".to_string()));
}

/// Verifies empty inputs convert to empty values and back to nothing.
#[test]
fn empty_values_are_omitted() {
    assert_eq!(to_form_value(None, &integer()), FormValue::Empty);
    assert_eq!(to_form_value(Some("  "), &text()), FormValue::Empty);
    assert_eq!(to_form_value(None, &integer().multiple()), FormValue::List(Vec::new()));
    assert_eq!(to_model_value(&FormValue::List(vec![FormValue::Empty]), &integer()), None);
}

/// Verifies blank text encodes the empty value for string fields both ways.
#[test]
fn blank_text_is_an_empty_encoding() {
    assert_eq!(to_form_value(Some(" \t "), &text()), FormValue::Empty);
    assert_eq!(to_model_value(&FormValue::Text("   ".to_string()), &text()), None);
    assert_eq!(round_trip(" padded ", &text()), Some(" padded ".to_string()));
}

/// Verifies computed fields keep the previous model value.
#[test]
fn computed_fields_copy_previous_values() {
    let definitions = DefinitionSet::new(trip_definitions()).unwrap();
    let previous: ModelValueMap = [
        (FieldId::new(WEIGHT), "10.5".to_string()),
        (FieldId::new(COUNT), "2".to_string()),
    ]
    .into_iter()
    .collect();
    let mut form = to_form_values(&previous, &definitions);
    form.insert(FieldId::new(WEIGHT), FormValue::Decimal(99.0));
    form.insert(FieldId::new(COUNT), FormValue::Integer(3));

    let model = to_model_values(&form, &definitions, Some(&previous));
    assert_eq!(model.get(FieldId::new(WEIGHT)), Some("10.5"));
    assert_eq!(model.get(FieldId::new(COUNT)), Some("3"));

    let without_previous = to_model_values(&form, &definitions, None);
    assert_eq!(without_previous.get(FieldId::new(WEIGHT)), None);
}

/// Verifies defaults fill missing values at apply time only.
#[test]
fn defaults_fill_missing_values_when_applying() {
    let definitions = DefinitionSet::new(vec![
        integer().with_default("5"),
        text().with_default("n/a"),
    ])
    .unwrap();
    let model: ModelValueMap = [(FieldId::new(3), "kept".to_string())].into_iter().collect();

    let applied = form_values_for_apply(&MeasurementValues::Model(model.clone()), &definitions);
    assert_eq!(applied.get(FieldId::new(1)), Some(&FormValue::Integer(5)));
    assert_eq!(applied.get(FieldId::new(3)), Some(&FormValue::Text("kept".to_string())));

    let plain = to_form_values(&model, &definitions);
    assert_eq!(plain.get(FieldId::new(1)), Some(&FormValue::Empty));
}

/// Verifies form-shaped entity values convert to model values.
#[test]
fn form_shaped_entities_convert_to_model_values() {
    let definitions = DefinitionSet::new(trip_definitions()).unwrap();
    let form: FormValueMap = [
        (FieldId::new(COUNT), FormValue::Integer(8)),
        (FieldId::new(NOTE), FormValue::Empty),
        (FieldId::new(SPECIES), FormValue::Qualitative(QualitativeValue::new(10, "COD"))),
    ]
    .into_iter()
    .collect();

    let model = model_values_of(&MeasurementValues::Form(form), &definitions);
    assert_eq!(model.get(FieldId::new(COUNT)), Some("8"));
    assert_eq!(model.get(FieldId::new(NOTE)), None);
    assert_eq!(model.get(FieldId::new(SPECIES)), Some("10"));
}

/// Verifies extraction skips computed fields and fields without a control.
#[test]
fn extraction_filters_computed_and_hidden_fields() {
    let definitions = DefinitionSet::new(trip_definitions()).unwrap();
    let builder = SchemaBuilder::new(Arc::new(DefaultValidatorFactory), SchemaOptions::default());
    let schema = builder.rebuild(&definitions, &builder.empty_schema()).unwrap().schema;

    let fields: Vec<FieldId> = extractable(&definitions, &schema, ExtractionOptions::default())
        .iter()
        .map(|definition| definition.id)
        .collect();
    assert_eq!(fields, vec![FieldId::new(COUNT), FieldId::new(NOTE), FieldId::new(SPECIES)]);

    let everything = ExtractionOptions {
        skip_disabled: false,
        skip_computed: false,
    };
    assert_eq!(extractable(&definitions, &schema, everything).len(), 4);
}
