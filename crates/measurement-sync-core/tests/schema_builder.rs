// crates/measurement-sync-core/tests/schema_builder.rs
// ============================================================================
// Module: Schema Builder Tests
// Description: Control reuse, refresh, and removal across rebuilds.
// ============================================================================
//! ## Overview
//! Exercises [`SchemaBuilder`] directly: rebuilding is idempotent, surviving
//! controls keep identity and values, and list controls honor minimum lengths.

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

use measurement_sync_core::ControlSlot;
use measurement_sync_core::DefaultValidatorFactory;
use measurement_sync_core::DefinitionSet;
use measurement_sync_core::FieldDefinition;
use measurement_sync_core::FieldId;
use measurement_sync_core::FormValue;
use measurement_sync_core::FormValueMap;
use measurement_sync_core::Schema;
use measurement_sync_core::SchemaBuilder;
use measurement_sync_core::SchemaError;
use measurement_sync_core::SchemaOptions;
use measurement_sync_core::ValidationIssue;
use measurement_sync_core::ValueKind;
use measurement_sync_core::ValuesShape;
use proptest::prelude::*;

use crate::common::COUNT;
use crate::common::INTERNAL;
use crate::common::NOTE;
use crate::common::SPECIES;
use crate::common::WEIGHT;
use crate::common::trip_definitions;

fn builder() -> SchemaBuilder {
    SchemaBuilder::new(Arc::new(DefaultValidatorFactory), SchemaOptions::default())
}

fn set(definitions: Vec<FieldDefinition>) -> DefinitionSet {
    DefinitionSet::new(definitions).unwrap()
}

fn built(builder: &SchemaBuilder, definitions: &DefinitionSet) -> Schema {
    let mut schema = builder.rebuild(definitions, &builder.empty_schema()).unwrap().schema;
    schema.enable();
    schema
}

/// Verifies a rebuild with equal definitions changes nothing.
#[test]
fn rebuild_with_equal_definitions_is_idempotent() {
    let builder = builder();
    let definitions = set(trip_definitions());
    let first = built(&builder, &definitions);

    let reordered = set(trip_definitions().into_iter().rev().collect());
    let second = builder.rebuild(&reordered, &first).unwrap();

    assert!(second.change.is_noop());
    for field in first.fields() {
        assert_eq!(
            first.control(*field).unwrap().id(),
            second.schema.control(*field).unwrap().id()
        );
    }
    let mut probe = first.clone();
    assert!(!builder.begin(&reordered, &mut probe));
    assert!(!probe.is_disabled());
}

proptest! {
    #[test]
    fn rebuild_is_idempotent_for_any_subset_and_order(
        mask in 1u8..32,
        keys in prop::collection::vec(any::<u32>(), 5),
    ) {
        let chosen: Vec<FieldDefinition> = trip_definitions()
            .into_iter()
            .enumerate()
            .filter(|(index, _)| mask & (1 << index) != 0)
            .map(|(_, definition)| definition)
            .collect();
        let mut keyed: Vec<(u32, FieldDefinition)> =
            keys.iter().copied().zip(chosen.iter().cloned()).collect();
        keyed.sort_by_key(|(key, _)| *key);
        let shuffled: Vec<FieldDefinition> =
            keyed.into_iter().map(|(_, definition)| definition).collect();

        let builder = builder();
        let first = built(&builder, &set(chosen));
        let again = builder.rebuild(&set(shuffled), &first).unwrap();

        prop_assert!(again.change.is_noop());
        prop_assert_eq!(first.fields(), again.schema.fields());
        for field in first.fields() {
            prop_assert_eq!(
                first.control(*field).unwrap().id(),
                again.schema.control(*field).unwrap().id()
            );
        }
        prop_assert_eq!(first.form_values(), again.schema.form_values());
    }
}

/// Verifies hidden definitions get no control and the meta field is set.
#[test]
fn hidden_definitions_have_no_control() {
    let builder = builder();
    let schema = built(&builder, &set(trip_definitions()));

    assert_eq!(schema.len(), 4);
    assert!(schema.control(FieldId::new(INTERNAL)).is_none());
    assert_eq!(
        schema.fields(),
        &[FieldId::new(COUNT), FieldId::new(NOTE), FieldId::new(SPECIES), FieldId::new(WEIGHT)]
    );
    assert_eq!(schema.shape(), Some(ValuesShape::Form));
}

/// Verifies the meta field can be turned off.
#[test]
fn typename_meta_field_is_optional() {
    let builder = SchemaBuilder::new(
        Arc::new(DefaultValidatorFactory),
        SchemaOptions {
            with_typename: false,
        },
    );
    let schema = built(&builder, &set(trip_definitions()));
    assert_eq!(schema.shape(), None);
}

/// Verifies surviving controls keep identity and user values.
#[test]
fn surviving_controls_keep_identity_and_values() {
    let builder = builder();
    let mut first = built(&builder, &set(trip_definitions()));
    first.set_value(FieldId::new(COUNT), FormValue::Integer(7)).unwrap();
    let count_id = first.control(FieldId::new(COUNT)).unwrap().id();

    let mut next = trip_definitions();
    next.retain(|definition| definition.id != FieldId::new(NOTE));
    next.push(FieldDefinition::new(6, "DEPTH", ValueKind::Integer));
    let rebuilt = builder.rebuild(&set(next), &first).unwrap();

    assert_eq!(rebuilt.change.added, vec![FieldId::new(6)]);
    assert_eq!(rebuilt.change.removed, vec![FieldId::new(NOTE)]);
    assert!(rebuilt.change.refreshed.is_empty());
    let count = rebuilt.schema.control(FieldId::new(COUNT)).unwrap();
    assert_eq!(count.id(), count_id);
    assert_eq!(count.value(), FormValue::Integer(7));
    assert!(rebuilt.schema.is_disabled());
    assert!(rebuilt.schema.is_dirty());
}

/// Verifies changed validation parameters refresh a control in place.
#[test]
fn changed_parameters_refresh_the_control() {
    let builder = builder();
    let first = built(&builder, &set(trip_definitions()));
    let note_id = first.control(FieldId::new(NOTE)).unwrap().id();

    let next: Vec<FieldDefinition> = trip_definitions()
        .into_iter()
        .map(|definition| {
            if definition.id == FieldId::new(NOTE) { definition.required() } else { definition }
        })
        .collect();
    let mut rebuilt = builder.rebuild(&set(next), &first).unwrap();

    assert_eq!(rebuilt.change.refreshed, vec![FieldId::new(NOTE)]);
    let note = rebuilt.schema.control(FieldId::new(NOTE)).unwrap();
    assert_eq!(note.id(), note_id);
    assert!(note.params().required);
    rebuilt.schema.enable();
    let issues = rebuilt.schema.validate();
    assert!(issues.iter().any(|entry| {
        entry.field == FieldId::new(NOTE) && entry.issues == vec![ValidationIssue::Required]
    }));
}

/// Verifies required multi-valued controls start with one slot.
#[test]
fn required_multiple_control_starts_with_one_slot() {
    let builder = builder();
    let definitions = set(vec![
        FieldDefinition::new(1, "TAGS", ValueKind::String).multiple().required(),
        FieldDefinition::new(2, "CODES", ValueKind::Integer).multiple(),
    ]);
    let mut schema = built(&builder, &definitions);

    assert_eq!(schema.control(FieldId::new(1)).unwrap().len(), Some(1));
    assert_eq!(schema.control(FieldId::new(2)).unwrap().len(), Some(0));
    assert_eq!(
        schema.remove_item(FieldId::new(1), 0),
        Err(SchemaError::BelowMinimum {
            field: FieldId::new(1),
            min: 1,
        })
    );

    let len = schema.push_item(FieldId::new(1)).unwrap();
    assert_eq!(len, 2);
    schema.set_item(FieldId::new(1), 1, FormValue::Text("b".to_string())).unwrap();
    schema.remove_item(FieldId::new(1), 0).unwrap();
    assert_eq!(
        schema.control(FieldId::new(1)).unwrap().slot(),
        &ControlSlot::List(vec![FormValue::Text("b".to_string())])
    );
}

/// Verifies applying a short list pads it to the minimum length.
#[test]
fn applied_lists_are_padded_to_minimum() {
    let builder = builder();
    let definitions =
        set(vec![FieldDefinition::new(1, "TAGS", ValueKind::String).multiple().required()]);
    let mut schema = built(&builder, &definitions);
    let values: FormValueMap = [(FieldId::new(1), FormValue::List(Vec::new()))].into_iter().collect();
    schema.apply_values(&values);
    assert_eq!(schema.control(FieldId::new(1)).unwrap().len(), Some(1));
    assert!(!schema.is_dirty());
}

/// Verifies new controls take the definition's default value.
#[test]
fn new_controls_are_seeded_from_defaults() {
    let builder = builder();
    let definitions =
        set(vec![FieldDefinition::new(1, "COUNT", ValueKind::Integer).with_default("3")]);
    let schema = built(&builder, &definitions);
    assert_eq!(schema.control(FieldId::new(1)).unwrap().value(), FormValue::Integer(3));
}

/// Verifies computed controls are read-only and carry no validator.
#[test]
fn computed_controls_refuse_edits() {
    let builder = builder();
    let mut schema = built(&builder, &set(trip_definitions()));
    let weight = schema.control(FieldId::new(WEIGHT)).unwrap();
    assert!(weight.is_disabled());
    assert!(!weight.has_validator());
    assert_eq!(
        schema.set_value(FieldId::new(WEIGHT), FormValue::Decimal(1.5)),
        Err(SchemaError::ControlDisabled(FieldId::new(WEIGHT)))
    );
}

/// Verifies disabled schemas refuse every edit.
#[test]
fn disabled_schema_refuses_edits() {
    let builder = builder();
    let mut schema = built(&builder, &set(trip_definitions()));
    schema.disable();
    assert_eq!(
        schema.set_value(FieldId::new(COUNT), FormValue::Integer(1)),
        Err(SchemaError::Disabled)
    );
    assert!(!schema.is_dirty());
}

/// Verifies a validator build failure leaves the previous schema untouched.
#[test]
fn validator_failure_aborts_the_rebuild() {
    let builder = builder();
    let first = built(&builder, &set(trip_definitions()));
    let broken = set(vec![FieldDefinition::new(
        9,
        "BROKEN",
        ValueKind::Qualitative {
            values: Vec::new(),
        },
    )]);

    let err = builder.rebuild(&broken, &first).unwrap_err();
    assert!(matches!(err, SchemaError::Validator { field, .. } if field == FieldId::new(9)));
    assert_eq!(first.len(), 4);
}

/// Verifies kind and qualitative checks run against control values.
#[test]
fn validation_reports_kind_and_reference_issues() {
    let builder = builder();
    let mut schema = built(&builder, &set(trip_definitions()));
    schema.set_value(FieldId::new(COUNT), FormValue::Text("many".to_string())).unwrap();
    schema
        .set_value(
            FieldId::new(SPECIES),
            FormValue::Qualitative(measurement_sync_core::QualitativeValue::new(99, "SHARK")),
        )
        .unwrap();

    let issues = schema.validate();
    let count = issues.iter().find(|entry| entry.field == FieldId::new(COUNT)).unwrap();
    assert_eq!(
        count.issues,
        vec![ValidationIssue::KindMismatch {
            expected: "integer",
        }]
    );
    let species = issues.iter().find(|entry| entry.field == FieldId::new(SPECIES)).unwrap();
    assert!(matches!(species.issues[0], ValidationIssue::UnknownQualitativeValue { .. }));
    assert!(!schema.is_valid());
}
