// crates/measurement-sync-core/tests/common/mod.rs
// ============================================================================
// Module: Measurement Sync Test Fixtures
// Description: Shared definitions, contexts, and async helpers.
// ============================================================================
//! ## Overview
//! Fixtures shared by the integration tests.

#![allow(dead_code, reason = "Each test crate uses a different subset of the fixtures.")]
#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Fixtures panic on broken setup.")]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use measurement_sync_core::Collaborators;
use measurement_sync_core::Context;
use measurement_sync_core::EngineEvent;
use measurement_sync_core::EngineLogSink;
use measurement_sync_core::FieldDefinition;
use measurement_sync_core::InMemoryCatalog;
use measurement_sync_core::MemoryLogSink;
use measurement_sync_core::QualitativeValue;
use measurement_sync_core::ReconcilerOptions;
use measurement_sync_core::ValueKind;
use tokio::sync::broadcast;

/// Program used by most scenarios.
pub const PROGRAM: &str = "SIH-OBSBIO";
/// Acquisition level used by most scenarios.
pub const LEVEL: &str = "TRIP";
/// Catalog key of [`PROGRAM`] at [`LEVEL`].
pub const TRIP_KEY: &str = "SIH-OBSBIO|TRIP|null|null";
/// Upper bound for any single await in a test.
pub const WAIT: Duration = Duration::from_secs(5);

/// Integer field.
pub const COUNT: u32 = 1;
/// Free text field.
pub const NOTE: u32 = 2;
/// Qualitative field.
pub const SPECIES: u32 = 3;
/// Computed decimal field.
pub const WEIGHT: u32 = 4;
/// Hidden boolean field.
pub const INTERNAL: u32 = 5;

/// Returns the qualitative values of [`SPECIES`].
pub fn species_values() -> Vec<QualitativeValue> {
    vec![QualitativeValue::new(10, "COD"), QualitativeValue::new(11, "HAKE")]
}

/// Returns a small definition set covering the common kinds.
pub fn trip_definitions() -> Vec<FieldDefinition> {
    vec![
        FieldDefinition::new(COUNT, "COUNT", ValueKind::Integer).required(),
        FieldDefinition::new(NOTE, "NOTE", ValueKind::String).with_name("Note"),
        FieldDefinition::new(
            SPECIES,
            "SPECIES",
            ValueKind::Qualitative {
                values: species_values(),
            },
        ),
        FieldDefinition::new(
            WEIGHT,
            "WEIGHT",
            ValueKind::Decimal {
                precision: Some(2),
            },
        )
        .computed(),
        FieldDefinition::new(INTERNAL, "INTERNAL", ValueKind::Boolean).hidden(),
    ]
}

/// Returns the trip context.
pub fn trip_context() -> Context {
    Context::new(PROGRAM, LEVEL)
}

/// Returns options starting at the trip context.
pub fn trip_options() -> ReconcilerOptions {
    ReconcilerOptions {
        context: trip_context(),
        ..ReconcilerOptions::default()
    }
}

/// Returns collaborators backed by `catalog`, logging into memory.
pub fn collaborators(catalog: &InMemoryCatalog) -> (Collaborators, Arc<MemoryLogSink>) {
    let sink = Arc::new(MemoryLogSink::new());
    let shared: Arc<dyn EngineLogSink> = sink.clone();
    let collaborators = Collaborators::new(Arc::new(catalog.clone())).with_sink(shared);
    (collaborators, sink)
}

/// Awaits a future, failing the test after [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future).await.expect("operation timed out")
}

/// Receives events until one matches, failing after [`WAIT`].
pub async fn next_matching(
    events: &mut broadcast::Receiver<EngineEvent>,
    matches: impl Fn(&EngineEvent) -> bool,
) -> EngineEvent {
    within(async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
}
