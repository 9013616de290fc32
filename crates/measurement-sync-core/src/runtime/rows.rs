// crates/measurement-sync-core/src/runtime/rows.rs
// ============================================================================
// Module: Row Reconciler
// Description: Tabular reconciliation of many rows sharing one definition set.
// Purpose: Manage per-row values, columns, rank orders, and dynamic sort keys.
// Dependencies: crate::{core, runtime}, serde, tokio
// ============================================================================

//! ## Overview
//! [`RowReconciler`] shares one context, definition set, and readiness
//! machine across many rows. Each row is its own reconciliation unit with its
//! own schema instance, so rows never see each other's edits and a failure
//! while rebuilding one row leaves its siblings untouched.
//!
//! Columns are the non-hidden definition ids in catalog order, framed by
//! caller-supplied structural columns. They stay unset until definitions
//! first load. New rows of entity kinds with a rank order get the next rank
//! after the current maximum; batches are ranked under one lock.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::Context;
use crate::core::ContextPatch;
use crate::core::DefinitionSet;
use crate::core::FieldId;
use crate::core::FormValue;
use crate::core::MeasuredEntity;
use crate::core::RowId;
use crate::runtime::entity::MEASUREMENT_VALUES_PATH;
use crate::runtime::entity::propagate_program;
use crate::runtime::entity::translate_control_path;
use crate::runtime::log::LogLevel;
use crate::runtime::readiness::ReadinessStep;
use crate::runtime::schema::Schema;
use crate::runtime::shared::ApplyTicket;
use crate::runtime::shared::Collaborators;
use crate::runtime::shared::CoreState;
use crate::runtime::shared::EngineEvent;
use crate::runtime::shared::ReconcileError;
use crate::runtime::shared::ReconcilerOptions;
use crate::runtime::shared::SharedCore;
use crate::runtime::shared::UnitSet;
use crate::runtime::unit::ReconciliationUnit;

// ============================================================================
// SECTION: Columns
// ============================================================================

/// Suffix appended to sort keys of qualitative fields.
pub const QUALITATIVE_SORT_SUFFIX: &str = "label";

/// One displayed table column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum Column {
    /// Caller-supplied structural column.
    Structural(String),
    /// Dynamic column for a field definition.
    Field(FieldId),
}

impl Column {
    /// Returns the column name; dynamic columns are named by field id.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Structural(name) => name.clone(),
            Self::Field(field) => field.to_string(),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Structural(name) => f.write_str(name),
            Self::Field(field) => field.fmt(f),
        }
    }
}

/// Frames the visible definitions between structural columns.
#[must_use]
pub fn project_columns(
    definitions: &DefinitionSet,
    leading: &[String],
    trailing: &[String],
) -> Vec<Column> {
    leading
        .iter()
        .cloned()
        .map(Column::Structural)
        .chain(definitions.visible().map(|definition| Column::Field(definition.id)))
        .chain(trailing.iter().cloned().map(Column::Structural))
        .collect()
}

/// Resolves the sort key of a dynamic column.
///
/// Qualitative fields sort by the referenced value's label.
#[must_use]
pub fn sort_key(definitions: &DefinitionSet, field: FieldId) -> Option<String> {
    let definition = definitions.get(field)?;
    let base = format!("{MEASUREMENT_VALUES_PATH}.{field}");
    if definition.value_kind.is_qualitative() {
        Some(format!("{base}.{QUALITATIVE_SORT_SUFFIX}"))
    } else {
        Some(base)
    }
}

// ============================================================================
// SECTION: Options
// ============================================================================

/// Table layout and editing options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowOptions {
    /// Structural columns shown before the dynamic ones.
    pub leading_columns: Vec<String>,
    /// Structural columns shown after the dynamic ones.
    pub trailing_columns: Vec<String>,
    /// Whether callers may set rank orders explicitly.
    pub can_edit_rank: bool,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

// ============================================================================
// SECTION: Row Table
// ============================================================================

/// Rows driven by the shared core.
pub(crate) struct RowTable<E> {
    /// Units by row id.
    rows: BTreeMap<RowId, ReconciliationUnit<E>>,
    /// Next row id.
    next_row: u64,
    /// Current columns; `None` while no definitions are applied.
    columns: Option<Vec<Column>>,
    /// Layout and editing options.
    options: RowOptions,
}

impl<E: MeasuredEntity> RowTable<E> {
    /// Returns the highest rank order across rows.
    fn max_rank(&self) -> u32 {
        self.rows
            .values()
            .filter_map(|unit| unit.held().and_then(|held| held.rank_order()))
            .max()
            .unwrap_or(0)
    }

    /// Returns true when another row holds the rank order.
    fn rank_exists(&self, rank: u32, excluding: Option<RowId>) -> bool {
        self.rows.iter().any(|(row, unit)| {
            Some(*row) != excluding
                && unit.held().and_then(|held| held.rank_order()) == Some(rank)
        })
    }
}

impl<E: MeasuredEntity> UnitSet for RowTable<E> {
    type Entity = E;
    type Key = RowId;

    fn for_each_unit(
        &mut self,
        visit: &mut dyn FnMut(Option<RowId>, &mut ReconciliationUnit<E>),
    ) {
        for (row, unit) in &mut self.rows {
            visit(Some(*row), unit);
        }
    }

    fn unit_mut(&mut self, key: RowId) -> Result<&mut ReconciliationUnit<E>, ReconcileError> {
        self.rows.get_mut(&key).ok_or(ReconcileError::UnknownRow(key))
    }

    fn definitions_changed(&mut self, definitions: &DefinitionSet) -> Option<EngineEvent> {
        let columns =
            project_columns(definitions, &self.options.leading_columns, &self.options.trailing_columns);
        if self.columns.as_ref() == Some(&columns) {
            return None;
        }
        self.columns = Some(columns.clone());
        Some(EngineEvent::ColumnsChanged {
            columns,
        })
    }

    fn definitions_failed(&mut self) {
        self.columns = None;
    }
}

// ============================================================================
// SECTION: Row Reconciler
// ============================================================================

/// Reconciles many rows against one shared definition set.
///
/// Dropping the reconciler stops it.
pub struct RowReconciler<E: MeasuredEntity + Default> {
    /// Shared coordinator.
    core: SharedCore<RowTable<E>>,
}

impl<E: MeasuredEntity + Default> RowReconciler<E> {
    /// Creates a reconciler. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Runtime`] outside a tokio runtime.
    pub fn new(
        collaborators: Collaborators,
        options: ReconcilerOptions,
        row_options: RowOptions,
    ) -> Result<Self, ReconcileError> {
        let core = SharedCore::new(collaborators, options, |_| RowTable {
            rows: BTreeMap::new(),
            next_row: 0,
            columns: None,
            options: row_options,
        })?;
        Ok(Self {
            core,
        })
    }

    /// Returns the current context.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn context(&self) -> Result<Context, ReconcileError> {
        Ok(self.core.lock()?.context.clone())
    }

    /// Merges a context patch shared by every row.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when stopped or the state is unusable.
    pub fn set_context(&self, patch: ContextPatch) -> Result<(), ReconcileError> {
        self.core.ensure_running()?;
        let mut state = self.core.lock()?;
        self.core.set_context_locked(&mut state, patch);
        Ok(())
    }

    /// Requests readiness: loads definitions once the context is resolvable.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when stopped or the state is unusable.
    pub fn request_ready(&self) -> Result<(), ReconcileError> {
        self.core.request_ready()
    }

    /// Creates one row, applying `initial` now or once ready.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::DuplicateRank`] when an explicit rank is
    /// already used, or another [`ReconcileError`] when stopped.
    pub fn create_row(&self, initial: Option<E>) -> Result<RowId, ReconcileError> {
        self.create_rows(vec![initial])?
            .into_iter()
            .next()
            .ok_or_else(|| ReconcileError::State("row was not created".to_string()))
    }

    /// Creates rows in one batch; ranks are assigned in order and never repeat.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::DuplicateRank`] when an explicit rank is
    /// already used, or [`ReconcileError::RankExhausted`] when no rank is
    /// left to assign; rows created earlier in the batch are kept.
    pub fn create_rows(&self, batch: Vec<Option<E>>) -> Result<Vec<RowId>, ReconcileError> {
        self.core.ensure_running()?;
        let mut state = self.core.lock()?;
        let mut created = Vec::with_capacity(batch.len());
        for initial in batch {
            let row = self.insert_row(&mut state, initial)?;
            created.push(row);
        }
        Ok(created)
    }

    /// Inserts one row under the lock.
    fn insert_row(
        &self,
        state: &mut CoreState<RowTable<E>>,
        initial: Option<E>,
    ) -> Result<RowId, ReconcileError> {
        let supplied = initial.is_some();
        let mut entity = initial.unwrap_or_default();
        if E::HAS_RANK_ORDER {
            match entity.rank_order() {
                Some(rank) if state.units.options.can_edit_rank => {
                    if state.units.rank_exists(rank, None) {
                        return Err(ReconcileError::DuplicateRank(rank));
                    }
                }
                _ => {
                    let next = state
                        .units
                        .max_rank()
                        .checked_add(1)
                        .ok_or(ReconcileError::RankExhausted)?;
                    entity.set_rank_order(next);
                }
            }
        }
        if supplied {
            propagate_program(&self.core, state, &entity);
        }
        let builder = self.core.builder();
        let mut unit = ReconciliationUnit::new(builder.empty_schema());
        if let Some(definitions) = &state.definitions
            && let Err(err) = unit.rebuild(builder, definitions)
        {
            self.core.log(
                LogLevel::Error,
                "row_schema_failed",
                None,
                None,
                err.to_string(),
            );
        }
        state.units.next_row += 1;
        let row = RowId::new(state.units.next_row);
        state.units.rows.insert(row, unit);
        self.core.hold(state, row, Arc::new(entity))?;
        Ok(row)
    }

    /// Replaces a row's entity, applying it now or once ready.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownRow`] for unknown rows, or
    /// [`ReconcileError::DuplicateRank`] when the rank is taken.
    pub fn apply_row(&self, row: RowId, entity: impl Into<Arc<E>>) -> Result<ApplyTicket, ReconcileError> {
        self.core.ensure_running()?;
        let entity = entity.into();
        let mut state = self.core.lock()?;
        state.units.unit_mut(row)?;
        if E::HAS_RANK_ORDER
            && state.units.options.can_edit_rank
            && let Some(rank) = entity.rank_order()
            && state.units.rank_exists(rank, Some(row))
        {
            return Err(ReconcileError::DuplicateRank(rank));
        }
        propagate_program(&self.core, &mut state, entity.as_ref());
        self.core.hold(&mut state, row, entity)
    }

    /// Returns a copy of a row's entity carrying its current values.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownRow`] for unknown rows.
    pub fn extract_row(&self, row: RowId) -> Result<Option<E>, ReconcileError> {
        let state = self.core.lock()?;
        let unit = state.units.rows.get(&row).ok_or(ReconcileError::UnknownRow(row))?;
        Ok(self.extract_unit(&state, unit))
    }

    /// Returns copies of every row's entity in row order.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn extract_rows(&self) -> Result<Vec<(RowId, E)>, ReconcileError> {
        let state = self.core.lock()?;
        Ok(state
            .units
            .rows
            .iter()
            .filter_map(|(row, unit)| self.extract_unit(&state, unit).map(|entity| (*row, entity)))
            .collect())
    }

    /// Extracts one unit, or returns its held entity while loading.
    fn extract_unit(
        &self,
        state: &CoreState<RowTable<E>>,
        unit: &ReconciliationUnit<E>,
    ) -> Option<E> {
        match (&state.definitions, self.core.readiness().is_ready()) {
            (Some(definitions), true) => unit.extract(definitions, self.core.options().extraction),
            _ => unit.held().map(|held| E::clone(held)),
        }
    }

    /// Removes a row, returning true when it existed.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn remove_row(&self, row: RowId) -> Result<bool, ReconcileError> {
        Ok(self.core.lock()?.units.rows.remove(&row).is_some())
    }

    /// Returns row ids in creation order.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn rows(&self) -> Result<Vec<RowId>, ReconcileError> {
        Ok(self.core.lock()?.units.rows.keys().copied().collect())
    }

    /// Sets a control value of one row on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] for unknown rows or non-editable controls.
    pub fn set_row_value(
        &self,
        row: RowId,
        field: FieldId,
        value: FormValue,
    ) -> Result<(), ReconcileError> {
        let mut state = self.core.lock()?;
        state.units.unit_mut(row)?.schema_mut().set_value(field, value)?;
        Ok(())
    }

    /// Runs `read` against one row's schema.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::UnknownRow`] for unknown rows.
    pub fn with_row_schema<R>(
        &self,
        row: RowId,
        read: impl FnOnce(&Schema) -> R,
    ) -> Result<R, ReconcileError> {
        let state = self.core.lock()?;
        let unit = state.units.rows.get(&row).ok_or(ReconcileError::UnknownRow(row))?;
        Ok(read(unit.schema()))
    }

    /// Returns the columns, or `None` while no definitions are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn columns(&self) -> Result<Option<Vec<Column>>, ReconcileError> {
        Ok(self.core.lock()?.units.columns.clone())
    }

    /// Resolves the sort key of a dynamic column.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn sort_key(&self, field: FieldId) -> Result<Option<String>, ReconcileError> {
        let state = self.core.lock()?;
        Ok(state.definitions.as_ref().and_then(|definitions| sort_key(definitions, field)))
    }

    /// Orders rows by a dynamic column; empty values always sort last.
    ///
    /// Ties keep creation order.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn sort_rows(
        &self,
        field: FieldId,
        direction: SortDirection,
    ) -> Result<Vec<RowId>, ReconcileError> {
        let state = self.core.lock()?;
        let mut keyed: Vec<(RowId, FormValue)> = state
            .units
            .rows
            .iter()
            .map(|(row, unit)| {
                let value =
                    unit.schema().control(field).map(|control| control.value()).unwrap_or_default();
                (*row, value)
            })
            .collect();
        keyed.sort_by(|(_, left), (_, right)| {
            match (left.is_empty(), right.is_empty(), direction) {
                (false, false, SortDirection::Descending) => right.sort_cmp(left),
                _ => left.sort_cmp(right),
            }
        });
        Ok(keyed.into_iter().map(|(row, _)| row).collect())
    }

    /// Returns true when a row other than `excluding` holds the rank order.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn rank_exists(&self, rank: u32, excluding: Option<RowId>) -> Result<bool, ReconcileError> {
        Ok(self.core.lock()?.units.rank_exists(rank, excluding))
    }

    /// Translates a control path such as `measurementValues.12` into the
    /// field's display name.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn translate_control_path(&self, path: &str) -> Result<Option<String>, ReconcileError> {
        let state = self.core.lock()?;
        Ok(state.definitions.as_ref().and_then(|definitions| translate_control_path(definitions, path)))
    }

    /// Returns the current readiness step.
    #[must_use]
    pub fn readiness(&self) -> ReadinessStep {
        self.core.readiness().step()
    }

    /// Returns true once ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.core.readiness().is_ready()
    }

    /// Returns true while definitions load or the schema rebuilds.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.core.readiness().is_loading()
    }

    /// Waits until ready.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Stopped`] when the reconciler stops first.
    pub async fn wait_until_ready(&self) -> Result<(), ReconcileError> {
        self.core.wait_until_ready().await
    }

    /// Subscribes to engine events, including column changes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.subscribe()
    }

    /// Stops the reconciler, releasing every pending wait.
    pub fn stop(&self) {
        self.core.stop();
    }
}

impl<E: MeasuredEntity + Default> Drop for RowReconciler<E> {
    fn drop(&mut self) {
        self.core.stop();
    }
}
