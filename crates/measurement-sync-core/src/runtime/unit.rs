// crates/measurement-sync-core/src/runtime/unit.rs
// ============================================================================
// Module: Reconciliation Unit
// Description: One held entity bound to its own schema instance.
// Purpose: Apply, rebuild, and extract values for a single entity or row.
// Dependencies: crate::core, crate::runtime::{normalizer, schema}
// ============================================================================

//! ## Overview
//! A unit pairs the entity most recently handed to it with the schema its
//! values are bound to. Each [`ReconciliationUnit::hold`] call carries a
//! sequence number; a deferred apply only lands when its number is still the
//! held one, which makes later calls supersede earlier ones.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::DefinitionSet;
use crate::core::MeasuredEntity;
use crate::core::MeasurementValues;
use crate::runtime::normalizer::ExtractionOptions;
use crate::runtime::normalizer::extractable;
use crate::runtime::normalizer::form_values_for_apply;
use crate::runtime::normalizer::model_values_of;
use crate::runtime::normalizer::to_model_values;
use crate::runtime::schema::Schema;
use crate::runtime::schema::SchemaBuilder;
use crate::runtime::schema::SchemaError;

// ============================================================================
// SECTION: Unit
// ============================================================================

/// Entity bound to one schema instance.
///
/// # Invariants
/// - `applied_seq` never exceeds `held_seq`.
#[derive(Debug, Clone)]
pub(crate) struct ReconciliationUnit<E> {
    /// Bound schema.
    schema: Schema,
    /// Entity most recently handed to the unit.
    held: Option<Arc<E>>,
    /// Sequence number of the held entity.
    held_seq: Option<u64>,
    /// Sequence number of the entity last applied to the schema.
    applied_seq: Option<u64>,
    /// Whether the held entity must be (re)applied.
    needs_apply: bool,
}

impl<E: MeasuredEntity> ReconciliationUnit<E> {
    /// Creates a unit with no held entity.
    pub(crate) const fn new(schema: Schema) -> Self {
        Self {
            schema,
            held: None,
            held_seq: None,
            applied_seq: None,
            needs_apply: false,
        }
    }

    /// Returns the bound schema.
    pub(crate) const fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Returns the bound schema for user edits.
    pub(crate) const fn schema_mut(&mut self) -> &mut Schema {
        &mut self.schema
    }

    /// Returns the held entity.
    pub(crate) const fn held(&self) -> Option<&Arc<E>> {
        self.held.as_ref()
    }

    /// Returns the sequence number of the held entity.
    pub(crate) const fn held_seq(&self) -> Option<u64> {
        self.held_seq
    }

    /// Returns true when the entity with `seq` is the one applied.
    pub(crate) fn is_applied(&self, seq: u64) -> bool {
        self.applied_seq == Some(seq) && !self.needs_apply
    }

    /// Records a new held entity, superseding any pending one.
    pub(crate) fn hold(&mut self, entity: Arc<E>, seq: u64) {
        self.held = Some(entity);
        self.held_seq = Some(seq);
        self.needs_apply = true;
    }

    /// Replaces the schema with an empty one, keeping the held entity.
    pub(crate) fn clear(&mut self, builder: &SchemaBuilder) {
        self.schema = builder.empty_schema();
        self.needs_apply = self.held.is_some();
    }

    /// Rebuilds the schema for new definitions.
    ///
    /// On failure the previous schema stays in place, disabled.
    pub(crate) fn rebuild(
        &mut self,
        builder: &SchemaBuilder,
        definitions: &DefinitionSet,
    ) -> Result<(), SchemaError> {
        if !builder.begin(definitions, &mut self.schema) {
            return Ok(());
        }
        let rebuilt = builder.rebuild(definitions, &self.schema)?;
        self.schema = rebuilt.schema;
        self.needs_apply = self.held.is_some();
        Ok(())
    }

    /// Folds user edits into the held entity before a rebuild.
    ///
    /// Edits are dropped when a newer entity waits to be applied; the schema
    /// still carries values of the entity it supersedes.
    pub(crate) fn capture_edits(&mut self, definitions: &DefinitionSet, options: ExtractionOptions) {
        if self.needs_apply
            || !self.schema.is_dirty()
            || self.schema.definitions() != Some(definitions)
        {
            return;
        }
        if let Some(copy) = self.extract(definitions, options) {
            self.held = Some(Arc::new(copy));
            self.needs_apply = true;
        }
    }

    /// Applies the held entity when needed and enables the schema.
    ///
    /// A schema left stale by a failed rebuild stays disabled.
    pub(crate) fn apply_pending(&mut self, definitions: &DefinitionSet) {
        if self.schema.definitions() != Some(definitions) {
            return;
        }
        if self.needs_apply {
            if let Some(entity) = &self.held {
                let values = form_values_for_apply(entity.measurement_values(), definitions);
                self.schema.apply_values(&values);
                self.applied_seq = self.held_seq;
            }
            self.needs_apply = false;
        }
        self.schema.enable();
    }

    /// Produces a copy of the held entity carrying the schema's values.
    ///
    /// Values of fields that do not contribute keep their held value.
    pub(crate) fn extract(
        &self,
        definitions: &DefinitionSet,
        options: ExtractionOptions,
    ) -> Option<E> {
        let held = self.held.as_ref()?;
        let previous = model_values_of(held.measurement_values(), definitions);
        let contributing = extractable(definitions, &self.schema, options);
        let form = self.schema.form_values();
        let extracted = to_model_values(&form, contributing.iter().copied(), Some(&previous));
        let mut merged = previous;
        for definition in &contributing {
            match extracted.get(definition.id) {
                Some(value) => {
                    merged.insert(definition.id, value);
                }
                None => {
                    merged.remove(definition.id);
                }
            }
        }
        let mut copy = E::clone(held);
        copy.set_measurement_values(MeasurementValues::Model(merged));
        Some(copy)
    }
}
