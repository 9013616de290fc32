// crates/measurement-sync-core/src/core/entity.rs
// ============================================================================
// Module: Measured Entities
// Description: Trait for entities carrying measurement values, plus a record type.
// Purpose: Let reconcilers read and replace values without knowing the entity.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Reconcilers hold entities behind [`std::sync::Arc`] and never mutate them
//! in place. Extraction clones the held entity and replaces its values on the
//! clone. Entities that carry a rank order opt in through
//! [`MeasuredEntity::HAS_RANK_ORDER`]; the row reconciler then assigns ranks
//! to new rows. [`MeasurementRecord`] is a general-purpose implementation.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ProgramLabel;
use crate::core::value::MeasurementValues;

// ============================================================================
// SECTION: Measured Entity
// ============================================================================

/// Entity reconciled against dynamic field definitions.
pub trait MeasuredEntity: Clone + Send + Sync + 'static {
    /// Whether the entity kind carries a rank order.
    const HAS_RANK_ORDER: bool = false;

    /// Returns the held measurement values.
    fn measurement_values(&self) -> &MeasurementValues;

    /// Replaces the measurement values.
    fn set_measurement_values(&mut self, values: MeasurementValues);

    /// Returns the program the entity belongs to, when known.
    fn program_label(&self) -> Option<&ProgramLabel> {
        None
    }

    /// Returns the rank order.
    fn rank_order(&self) -> Option<u32> {
        None
    }

    /// Sets the rank order.
    fn set_rank_order(&mut self, _rank: u32) {}
}

// ============================================================================
// SECTION: Measurement Record
// ============================================================================

/// Serializable entity with optional identity, program, and rank order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementRecord {
    /// Persistent identifier, absent for new records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    /// Program label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_label: Option<ProgramLabel>,
    /// Rank order within a table.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank_order: Option<u32>,
    /// Free comments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
    /// Measurement values.
    pub measurement_values: MeasurementValues,
}

impl MeasurementRecord {
    /// Creates a record holding the given values.
    #[must_use]
    pub fn new(measurement_values: MeasurementValues) -> Self {
        Self {
            measurement_values,
            ..Self::default()
        }
    }
}

impl MeasuredEntity for MeasurementRecord {
    const HAS_RANK_ORDER: bool = true;

    fn measurement_values(&self) -> &MeasurementValues {
        &self.measurement_values
    }

    fn set_measurement_values(&mut self, values: MeasurementValues) {
        self.measurement_values = values;
    }

    fn program_label(&self) -> Option<&ProgramLabel> {
        self.program_label.as_ref()
    }

    fn rank_order(&self) -> Option<u32> {
        self.rank_order
    }

    fn set_rank_order(&mut self, rank: u32) {
        self.rank_order = Some(rank);
    }
}
