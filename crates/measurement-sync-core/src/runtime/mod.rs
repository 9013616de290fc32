// crates/measurement-sync-core/src/runtime/mod.rs
// ============================================================================
// Module: Measurement Sync Runtime
// Description: Reconcilers, schema builder, normalizer, and readiness machine.
// Purpose: Keep entities and schemas consistent while definitions change.
// Dependencies: crate::{core, interfaces}, tokio, tokio-stream, tracing
// ============================================================================

//! ## Overview
//! Runtime modules implement both reconciler flavors on top of one shared
//! core. The normalizer and schema builder are pure and usable on their own;
//! the reconcilers add the catalog subscription, readiness, and deferred
//! applies.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod catalog;
pub mod entity;
pub mod lifecycle;
pub mod log;
pub mod normalizer;
pub mod readiness;
pub mod rows;
pub mod schema;
pub mod shared;
mod unit;
pub mod validator;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use catalog::InMemoryCatalog;
pub use entity::EntityReconciler;
pub use entity::MEASUREMENT_VALUES_PATH;
pub use entity::translate_control_path;
pub use lifecycle::Lifecycle;
pub use log::EngineLogEvent;
pub use log::EngineLogEventParams;
pub use log::EngineLogSink;
pub use log::LogLevel;
pub use log::MemoryLogSink;
pub use log::NoopLogSink;
pub use log::StderrLogSink;
pub use log::TracingLogSink;
pub use normalizer::ExtractionOptions;
pub use readiness::Readiness;
pub use readiness::ReadinessStep;
pub use readiness::Stopped;
pub use rows::Column;
pub use rows::RowOptions;
pub use rows::RowReconciler;
pub use rows::SortDirection;
pub use schema::ControlId;
pub use schema::ControlSlot;
pub use schema::FieldControl;
pub use schema::FieldIssues;
pub use schema::Rebuilt;
pub use schema::Schema;
pub use schema::SchemaBuilder;
pub use schema::SchemaChange;
pub use schema::SchemaError;
pub use schema::SchemaOptions;
pub use shared::ApplyOutcome;
pub use shared::ApplyTicket;
pub use shared::Collaborators;
pub use shared::EngineEvent;
pub use shared::ReconcileError;
pub use shared::ReconcilerOptions;
pub use validator::DefaultValidatorFactory;
pub use validator::FieldRules;
