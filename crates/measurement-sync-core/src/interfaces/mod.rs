// crates/measurement-sync-core/src/interfaces/mod.rs
// ============================================================================
// Module: Measurement Sync Interfaces
// Description: Collaborator contracts for catalogs, validators, and mapping hooks.
// Purpose: Define the seams the reconcilers consume without owning them.
// Dependencies: crate::core, thiserror, tokio-stream
// ============================================================================

//! ## Overview
//! Reconcilers never fetch field definitions or build validators themselves.
//! A [`CatalogResolver`] turns a resolved context into a long-lived stream of
//! definition sets, a [`ValidatorFactory`] is consulted once per control
//! creation or refresh, and an optional [`DefinitionMapper`] rewrites each
//! incoming set before it reaches the schema builder.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_stream::Stream;

use crate::core::FieldDefinition;
use crate::core::FormValue;
use crate::core::QualitativeValueId;
use crate::core::ResolvedContext;

// ============================================================================
// SECTION: Catalog Resolver
// ============================================================================

/// Catalog resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// The catalog could not be reached or answered with an error.
    #[error("catalog fetch error: {0}")]
    Fetch(String),
    /// The catalog answered with unusable definitions.
    #[error("catalog invalid data: {0}")]
    Invalid(String),
}

/// Lazy sequence of definition sets emitted by a catalog.
pub type DefinitionStream =
    Pin<Box<dyn Stream<Item = Result<Vec<FieldDefinition>, CatalogError>> + Send>>;

/// Resolves field definitions for a context.
///
/// The returned stream may emit more than once as the catalog refreshes and
/// may never end. Reconcilers subscribe once per distinct resolved context
/// and drop the stream when the context changes or the engine stops.
pub trait CatalogResolver: Send + Sync {
    /// Starts resolving definitions for a context.
    fn resolve(&self, context: &ResolvedContext) -> DefinitionStream;
}

// ============================================================================
// SECTION: Validators
// ============================================================================

/// A single validation failure reported for a control value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ValidationIssue {
    /// A required value is missing.
    Required,
    /// The value does not match the field's kind.
    KindMismatch {
        /// Expected kind name.
        expected: &'static str,
    },
    /// A decimal value has more fraction digits than allowed.
    Precision {
        /// Maximum fraction digits.
        max: u8,
    },
    /// A qualitative value is not among the allowed values.
    UnknownQualitativeValue {
        /// Rejected value id.
        value: QualitativeValueId,
    },
}

/// Validator errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidatorError {
    /// The factory cannot build a validator for the definition.
    #[error("validator build error: {0}")]
    Build(String),
}

/// Validates the value of one control.
pub trait FieldValidator: Send + Sync {
    /// Returns every issue found in the value.
    fn validate(&self, value: &FormValue) -> Vec<ValidationIssue>;
}

/// Builds validators from field definitions.
pub trait ValidatorFactory: Send + Sync {
    /// Builds a validator, or `None` when the field needs no validation.
    ///
    /// # Errors
    ///
    /// Returns [`ValidatorError`] when the definition cannot be validated.
    fn build(
        &self,
        definition: &FieldDefinition,
    ) -> Result<Option<Arc<dyn FieldValidator>>, ValidatorError>;
}

// ============================================================================
// SECTION: Definition Mapper
// ============================================================================

/// Rewrites an incoming definition set before the schema is rebuilt.
pub trait DefinitionMapper: Send + Sync {
    /// Returns the definitions to use for the context.
    fn map(
        &self,
        context: &ResolvedContext,
        definitions: Vec<FieldDefinition>,
    ) -> Vec<FieldDefinition>;
}
