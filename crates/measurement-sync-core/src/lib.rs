// crates/measurement-sync-core/src/lib.rs
// ============================================================================
// Module: Measurement Sync Core Library
// Description: Public API surface for the measurement synchronization engine.
// Purpose: Expose core types, collaborator interfaces, and reconcilers.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Measurement sync keeps business entities, editable schemas, and a
//! runtime-discovered set of field definitions consistent. Definitions arrive
//! from a catalog keyed by context, may change at any time, and determine
//! which controls exist, how values are typed, and which table columns show.
//! Entities applied while definitions load are held and applied once the
//! schema is ready; values travel between a string-keyed storage shape and a
//! typed form shape through a pure normalizer.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use core::*;

pub use interfaces::CatalogError;
pub use interfaces::CatalogResolver;
pub use interfaces::DefinitionMapper;
pub use interfaces::DefinitionStream;
pub use interfaces::FieldValidator;
pub use interfaces::ValidationIssue;
pub use interfaces::ValidatorError;
pub use interfaces::ValidatorFactory;
pub use runtime::ApplyOutcome;
pub use runtime::ApplyTicket;
pub use runtime::Collaborators;
pub use runtime::Column;
pub use runtime::ControlId;
pub use runtime::ControlSlot;
pub use runtime::DefaultValidatorFactory;
pub use runtime::EngineEvent;
pub use runtime::EngineLogEvent;
pub use runtime::EngineLogSink;
pub use runtime::EntityReconciler;
pub use runtime::ExtractionOptions;
pub use runtime::InMemoryCatalog;
pub use runtime::LogLevel;
pub use runtime::MemoryLogSink;
pub use runtime::NoopLogSink;
pub use runtime::ReadinessStep;
pub use runtime::ReconcileError;
pub use runtime::ReconcilerOptions;
pub use runtime::RowOptions;
pub use runtime::RowReconciler;
pub use runtime::Schema;
pub use runtime::SchemaBuilder;
pub use runtime::SchemaError;
pub use runtime::SchemaOptions;
pub use runtime::SortDirection;
pub use runtime::StderrLogSink;
pub use runtime::TracingLogSink;
