// crates/measurement-sync-core/tests/entity_reconciler.rs
// ============================================================================
// Module: Entity Reconciler Tests
// Description: Context-driven reloads, deferred applies, and failure handling.
// ============================================================================
//! ## Overview
//! Drives an [`EntityReconciler`] against an [`InMemoryCatalog`] and checks
//! reload deduplication, apply supersession, edit preservation across
//! definition changes, catalog failure recovery, and shutdown.

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

use measurement_sync_core::ApplyOutcome;
use measurement_sync_core::Context;
use measurement_sync_core::ContextPatch;
use measurement_sync_core::DefinitionMapper;
use measurement_sync_core::EngineEvent;
use measurement_sync_core::EntityReconciler;
use measurement_sync_core::FieldDefinition;
use measurement_sync_core::FieldId;
use measurement_sync_core::FormValue;
use measurement_sync_core::InMemoryCatalog;
use measurement_sync_core::MeasurementRecord;
use measurement_sync_core::MeasurementValues;
use measurement_sync_core::ModelValueMap;
use measurement_sync_core::ReadinessStep;
use measurement_sync_core::ReconcileError;
use measurement_sync_core::ReconcilerOptions;
use measurement_sync_core::ResolvedContext;
use measurement_sync_core::SchemaError;
use measurement_sync_core::ValueKind;

use crate::common::COUNT;
use crate::common::LEVEL;
use crate::common::NOTE;
use crate::common::PROGRAM;
use crate::common::TRIP_KEY;
use crate::common::WEIGHT;
use crate::common::collaborators;
use crate::common::next_matching;
use crate::common::trip_context;
use crate::common::trip_definitions;
use crate::common::trip_options;
use crate::common::within;

fn record(values: &[(u32, &str)]) -> MeasurementRecord {
    let model: ModelValueMap =
        values.iter().map(|(field, value)| (FieldId::new(*field), (*value).to_string())).collect();
    MeasurementRecord::new(MeasurementValues::Model(model))
}

fn model_of(record: &MeasurementRecord) -> ModelValueMap {
    match &record.measurement_values {
        MeasurementValues::Model(model) => model.clone(),
        MeasurementValues::Form(_) => panic!("extracted values must be model-shaped"),
    }
}

fn reconciler(catalog: &InMemoryCatalog) -> EntityReconciler<MeasurementRecord> {
    let (collaborators, _) = collaborators(catalog);
    EntityReconciler::new(collaborators, trip_options()).unwrap()
}

/// Verifies the reconciler refuses to start outside a tokio runtime.
#[test]
fn construction_requires_a_runtime() {
    let catalog = InMemoryCatalog::new();
    let (collaborators, _) = collaborators(&catalog);
    let result = EntityReconciler::<MeasurementRecord>::new(collaborators, trip_options());
    assert!(matches!(result, Err(ReconcileError::Runtime(_))));
}

/// Verifies an unchanged context never triggers a second catalog fetch.
#[tokio::test]
async fn equal_context_loads_definitions_once() {
    let catalog = InMemoryCatalog::new();
    catalog.publish(TRIP_KEY, trip_definitions());
    let reconciler = reconciler(&catalog);
    assert_eq!(reconciler.readiness(), ReadinessStep::Starting);

    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    reconciler.set_context(ContextPatch::new().program_label("SIH-OBSBIO")).unwrap();
    reconciler.request_ready().unwrap();

    assert_eq!(catalog.fetch_count(TRIP_KEY), 1);
    assert_eq!(catalog.total_fetches(), 1);
    assert!(reconciler.is_ready());
    let fields = reconciler.with_schema(|schema| schema.len()).unwrap();
    assert_eq!(fields, 4);
}

/// Verifies a context without a program waits, then loads once it is set.
#[tokio::test]
async fn missing_program_defers_loading_until_set() {
    let catalog = InMemoryCatalog::new();
    catalog.publish(TRIP_KEY, trip_definitions());
    let options = ReconcilerOptions {
        context: Context {
            acquisition_level: Some(LEVEL.into()),
            ..Context::default()
        },
        ..ReconcilerOptions::default()
    };
    let (collaborators, _) = collaborators(&catalog);
    let reconciler = EntityReconciler::<MeasurementRecord>::new(collaborators, options).unwrap();
    reconciler.request_ready().unwrap();
    assert_eq!(reconciler.readiness(), ReadinessStep::Starting);
    assert_eq!(catalog.total_fetches(), 0);

    reconciler.set_context(ContextPatch::new().program_label(PROGRAM)).unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(catalog.fetch_count(TRIP_KEY), 1);
    assert_eq!(catalog.total_fetches(), 1);
}

/// Verifies nothing loads until readiness is requested.
#[tokio::test]
async fn loading_waits_for_a_ready_request() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.set_context(ContextPatch::new().acquisition_level("OPERATION")).unwrap();
    assert_eq!(catalog.total_fetches(), 0);

    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(catalog.fetch_count("SIH-OBSBIO|OPERATION|null|null"), 1);
}

/// Verifies a context that lacks a required strategy stays unresolved.
#[tokio::test]
async fn required_strategy_blocks_loading() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let options = ReconcilerOptions {
        context: trip_context(),
        ..ReconcilerOptions::default()
    };
    let (collaborators, _) = collaborators(&catalog);
    let reconciler = EntityReconciler::<MeasurementRecord>::new(collaborators, options).unwrap();
    reconciler.set_context(ContextPatch::new().required_strategy(true)).unwrap();
    reconciler.request_ready().unwrap();
    assert_eq!(catalog.total_fetches(), 0);

    reconciler.set_context(ContextPatch::new().strategy_label("OBSMER")).unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(catalog.fetch_count("SIH-OBSBIO|TRIP|OBSMER|null"), 1);
}

/// Verifies an entity applied while loading lands once ready.
#[tokio::test]
async fn apply_before_ready_is_deferred() {
    let catalog = InMemoryCatalog::new();
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    assert!(reconciler.is_loading());

    let ticket = reconciler.apply_entity(record(&[(COUNT, "3"), (NOTE, "first haul")])).unwrap();
    assert!(!ticket.is_settled());
    catalog.publish(TRIP_KEY, trip_definitions());

    assert_eq!(within(ticket.outcome()).await.unwrap(), ApplyOutcome::Applied);
    let count =
        reconciler.with_schema(|schema| schema.control(FieldId::new(COUNT)).unwrap().value());
    assert_eq!(count.unwrap(), FormValue::Integer(3));
}

/// Verifies a later apply supersedes an earlier pending one.
#[tokio::test]
async fn later_apply_supersedes_pending_apply() {
    let catalog = InMemoryCatalog::new();
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();

    let first = reconciler.apply_entity(record(&[(COUNT, "1")])).unwrap();
    let second = reconciler.apply_entity(record(&[(COUNT, "2")])).unwrap();
    catalog.publish(TRIP_KEY, trip_definitions());

    assert_eq!(within(first.outcome()).await.unwrap(), ApplyOutcome::Superseded);
    assert_eq!(within(second.outcome()).await.unwrap(), ApplyOutcome::Applied);
    let extracted = reconciler.extract_entity().unwrap().unwrap();
    assert_eq!(model_of(&extracted).get(FieldId::new(COUNT)), Some("2"));
}

/// Verifies applying while ready settles immediately.
#[tokio::test]
async fn apply_while_ready_settles_immediately() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();

    let ticket = reconciler.apply_entity(record(&[(COUNT, "9")])).unwrap();
    assert!(ticket.is_settled());
    assert_eq!(ticket.outcome().await.unwrap(), ApplyOutcome::Applied);
}

/// Verifies extraction while loading returns the held entity unchanged.
#[tokio::test]
async fn extraction_while_loading_returns_held_entity() {
    let catalog = InMemoryCatalog::new();
    let reconciler = reconciler(&catalog);
    assert!(reconciler.extract_entity().unwrap().is_none());
    reconciler.request_ready().unwrap();

    let held = record(&[(COUNT, "4"), (99, "unknown field")]);
    let _ticket = reconciler.apply_entity(held.clone()).unwrap();
    assert_eq!(reconciler.extract_entity().unwrap(), Some(held));
}

/// Verifies extraction merges edits and keeps computed and unknown values.
#[tokio::test]
async fn extraction_merges_edits_over_held_values() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();

    let held = record(&[(COUNT, "4"), (NOTE, "old"), (WEIGHT, "12.5"), (99, "kept")]);
    let _ticket = reconciler.apply_entity(held).unwrap();
    reconciler.set_value(FieldId::new(NOTE), FormValue::Empty).unwrap();
    reconciler.set_value(FieldId::new(COUNT), FormValue::Integer(5)).unwrap();
    assert!(matches!(
        reconciler.set_value(FieldId::new(WEIGHT), FormValue::Decimal(1.0)),
        Err(ReconcileError::Schema(SchemaError::ControlDisabled(_)))
    ));

    let model = model_of(&reconciler.extract_entity().unwrap().unwrap());
    assert_eq!(model.get(FieldId::new(COUNT)), Some("5"));
    assert_eq!(model.get(FieldId::new(NOTE)), None);
    assert_eq!(model.get(FieldId::new(WEIGHT)), Some("12.5"));
    assert_eq!(model.get(FieldId::new(99)), Some("kept"));
}

/// Verifies user edits survive a definition change.
#[tokio::test]
async fn edits_survive_definition_changes() {
    let catalog = InMemoryCatalog::new();
    catalog.publish(TRIP_KEY, trip_definitions());
    let reconciler = reconciler(&catalog);
    let mut events = reconciler.subscribe();
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    let _ticket = reconciler.apply_entity(record(&[(COUNT, "5")])).unwrap();
    reconciler.set_value(FieldId::new(NOTE), FormValue::Text("edited".to_string())).unwrap();

    let mut next = trip_definitions();
    next.push(FieldDefinition::new(6, "DEPTH", ValueKind::Integer));
    catalog.publish(TRIP_KEY, next);
    next_matching(&mut events, |event| {
        matches!(event, EngineEvent::DefinitionsChanged { fields: 6, .. })
    })
    .await;

    let model = model_of(&reconciler.extract_entity().unwrap().unwrap());
    assert_eq!(model.get(FieldId::new(COUNT)), Some("5"));
    assert_eq!(model.get(FieldId::new(NOTE)), Some("edited"));
    assert!(reconciler.with_schema(|schema| schema.control(FieldId::new(6)).is_some()).unwrap());
}

/// Verifies edits to a replaced entity never leak into the entity replacing it.
#[tokio::test]
async fn pending_apply_ignores_edits_of_the_replaced_entity() {
    let catalog = InMemoryCatalog::new();
    catalog.publish(TRIP_KEY, trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    let _first = reconciler.apply_entity(record(&[(COUNT, "1")])).unwrap();
    reconciler.set_value(FieldId::new(COUNT), FormValue::Integer(99)).unwrap();

    reconciler.set_context(ContextPatch::new().acquisition_level("OPERATION")).unwrap();
    let second = reconciler.apply_entity(record(&[(COUNT, "2"), (NOTE, "second")])).unwrap();
    assert!(!second.is_settled());
    let mut operation = trip_definitions();
    operation.push(FieldDefinition::new(6, "DEPTH", ValueKind::Integer));
    catalog.publish("SIH-OBSBIO|OPERATION|null|null", operation);

    assert_eq!(within(second.outcome()).await.unwrap(), ApplyOutcome::Applied);
    let model = model_of(&reconciler.extract_entity().unwrap().unwrap());
    assert_eq!(model.get(FieldId::new(COUNT)), Some("2"));
    assert_eq!(model.get(FieldId::new(NOTE)), Some("second"));
}

/// Verifies definitions for an abandoned context never reach the schema.
#[tokio::test]
async fn switching_context_discards_the_previous_load() {
    let catalog = InMemoryCatalog::new();
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    reconciler.set_context(ContextPatch::new().acquisition_level("OPERATION")).unwrap();

    catalog.publish(TRIP_KEY, trip_definitions());
    catalog.publish(
        "SIH-OBSBIO|OPERATION|null|null",
        vec![FieldDefinition::new(20, "GEAR_DEPTH", ValueKind::Integer)],
    );
    within(reconciler.wait_until_ready()).await.unwrap();

    let definitions = reconciler.definitions().unwrap().unwrap();
    assert_eq!(definitions.len(), 1);
    assert!(definitions.contains(FieldId::new(20)));
    assert_eq!(catalog.fetch_count(TRIP_KEY), 1);
}

/// Verifies catalog failures collapse the schema until a later load.
#[tokio::test]
async fn catalog_failure_collapses_schema_and_recovers() {
    let catalog = InMemoryCatalog::new();
    catalog.fail(TRIP_KEY, "catalog unavailable");
    let (collaborators, sink) = collaborators(&catalog);
    let reconciler =
        EntityReconciler::<MeasurementRecord>::new(collaborators, trip_options()).unwrap();
    let mut events = reconciler.subscribe();
    reconciler.request_ready().unwrap();

    let failed =
        next_matching(&mut events, |event| matches!(event, EngineEvent::DefinitionsFailed { .. }))
            .await;
    assert_eq!(
        failed,
        EngineEvent::DefinitionsFailed {
            key: TRIP_KEY.into(),
            message: "catalog fetch error: catalog unavailable".to_string(),
        }
    );
    assert!(!reconciler.is_ready());
    assert!(reconciler.definitions().unwrap().is_none());
    assert!(reconciler.with_schema(|schema| schema.is_empty()).unwrap());
    assert_eq!(sink.named("definitions_failed").len(), 1);

    catalog.publish(TRIP_KEY, trip_definitions());
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(catalog.fetch_count(TRIP_KEY), 2);
    assert_eq!(reconciler.with_schema(|schema| schema.len()).unwrap(), 4);
}

/// Verifies an unresolvable context discards definitions and a resolvable one reloads.
#[tokio::test]
async fn unresolvable_context_resets_until_restored() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    let mut events = reconciler.subscribe();
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();

    reconciler.set_context(ContextPatch::new().clear_acquisition_level()).unwrap();
    next_matching(&mut events, |event| matches!(event, EngineEvent::ContextReset)).await;
    assert_eq!(reconciler.readiness(), ReadinessStep::Starting);
    assert!(reconciler.definitions().unwrap().is_none());

    reconciler.set_context(ContextPatch::new().acquisition_level("TRIP")).unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(catalog.fetch_count(TRIP_KEY), 2);
}

/// Verifies required fields become optional under force-optional.
#[tokio::test]
async fn force_optional_relaxes_requirements() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let mut options = trip_options();
    options.context.force_optional = true;
    let (collaborators, _) = collaborators(&catalog);
    let reconciler = EntityReconciler::<MeasurementRecord>::new(collaborators, options).unwrap();
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();

    let definitions = reconciler.definitions().unwrap().unwrap();
    assert!(!definitions.get(FieldId::new(COUNT)).unwrap().required);
    assert!(reconciler.with_schema(|schema| schema.is_valid()).unwrap());
}

/// Mapper that hides every field but the first.
struct FirstFieldOnly;

impl DefinitionMapper for FirstFieldOnly {
    fn map(
        &self,
        _context: &ResolvedContext,
        definitions: Vec<FieldDefinition>,
    ) -> Vec<FieldDefinition> {
        definitions.into_iter().take(1).collect()
    }
}

/// Verifies the mapper rewrites definitions before the schema is built.
#[tokio::test]
async fn mapper_rewrites_incoming_definitions() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let (collaborators, _) = collaborators(&catalog);
    let reconciler = EntityReconciler::<MeasurementRecord>::new(
        collaborators.with_mapper(Arc::new(FirstFieldOnly)),
        trip_options(),
    )
    .unwrap();
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(reconciler.with_schema(|schema| schema.fields().to_vec()).unwrap(), vec![
        FieldId::new(COUNT)
    ]);
}

/// Verifies applying an entity propagates its program into the context.
#[tokio::test]
async fn entity_program_propagates_into_context() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();

    let mut entity = record(&[(COUNT, "1")]);
    entity.program_label = Some("SIH-ACTIFLOT".into());
    let ticket = reconciler.apply_entity(entity).unwrap();
    assert_eq!(within(ticket.outcome()).await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(catalog.fetch_count("SIH-ACTIFLOT|TRIP|null|null"), 1);
    assert_eq!(
        reconciler.context().unwrap().program_label.unwrap().as_str(),
        "SIH-ACTIFLOT"
    );
}

/// Verifies control paths translate to display names.
#[tokio::test]
async fn control_paths_translate_to_display_names() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();

    let name = reconciler.translate_control_path("measurementValues.2").unwrap();
    assert_eq!(name.as_deref(), Some("Note"));
    let label = reconciler.translate_control_path("measurementValues.1").unwrap();
    assert_eq!(label.as_deref(), Some("COUNT"));
    assert_eq!(reconciler.translate_control_path("comments").unwrap(), None);
}

/// Verifies unloading drops the entity and definitions but keeps the context.
#[tokio::test]
async fn unload_returns_to_starting() {
    let catalog = InMemoryCatalog::with_fallback(trip_definitions());
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    let _ticket = reconciler.apply_entity(record(&[(COUNT, "1")])).unwrap();

    reconciler.unload().unwrap();
    assert_eq!(reconciler.readiness(), ReadinessStep::Starting);
    assert!(reconciler.extract_entity().unwrap().is_none());
    assert!(reconciler.definitions().unwrap().is_none());
    assert_eq!(reconciler.context().unwrap(), trip_context());

    reconciler.request_ready().unwrap();
    within(reconciler.wait_until_ready()).await.unwrap();
    assert_eq!(catalog.fetch_count(TRIP_KEY), 2);
}

/// Verifies stopping releases pending waits and refuses new work.
#[tokio::test]
async fn stop_releases_pending_waits() {
    let catalog = InMemoryCatalog::new();
    let reconciler = reconciler(&catalog);
    reconciler.request_ready().unwrap();
    let ticket = reconciler.apply_entity(record(&[(COUNT, "1")])).unwrap();

    reconciler.stop();
    assert_eq!(within(ticket.outcome()).await, Err(ReconcileError::Stopped));
    assert_eq!(within(reconciler.wait_until_ready()).await, Err(ReconcileError::Stopped));
    assert_eq!(reconciler.request_ready(), Err(ReconcileError::Stopped));
    assert!(matches!(
        reconciler.apply_entity(record(&[])),
        Err(ReconcileError::Stopped)
    ));
}
