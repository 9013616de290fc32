// crates/measurement-sync-core/src/core/mod.rs
// ============================================================================
// Module: Measurement Sync Core Types
// Description: Field definitions, contexts, value shapes, and entities.
// Purpose: Provide the serializable vocabulary shared by the runtime.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Core types describe what is reconciled: field definitions discovered at
//! runtime, the context selecting them, the two value shapes, and the entity
//! trait. They carry no runtime state.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod context;
pub mod definition;
pub mod entity;
pub mod identifiers;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use context::Context;
pub use context::ContextKey;
pub use context::ContextPatch;
pub use context::ResolvedContext;
pub use definition::Applicability;
pub use definition::DefinitionError;
pub use definition::DefinitionSet;
pub use definition::FieldDefinition;
pub use definition::QualitativeValue;
pub use definition::ValidationParams;
pub use definition::ValueKind;
pub use entity::MeasuredEntity;
pub use entity::MeasurementRecord;
pub use identifiers::AcquisitionLevel;
pub use identifiers::FieldId;
pub use identifiers::GearId;
pub use identifiers::ProgramLabel;
pub use identifiers::QualitativeValueId;
pub use identifiers::RowId;
pub use identifiers::StrategyId;
pub use identifiers::StrategyLabel;
pub use value::FormValue;
pub use value::FormValueMap;
pub use value::MeasurementValues;
pub use value::ModelValueMap;
pub use value::ValuesShape;
