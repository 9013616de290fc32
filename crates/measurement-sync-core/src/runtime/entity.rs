// crates/measurement-sync-core/src/runtime/entity.rs
// ============================================================================
// Module: Entity Reconciler
// Description: Single-entity reconciliation against dynamic field definitions.
// Purpose: Apply and extract one measured entity safely while definitions load.
// Dependencies: crate::{core, runtime}, tokio
// ============================================================================

//! ## Overview
//! [`EntityReconciler`] binds one entity to one schema. Applying an entity
//! records it immediately and applies it once readiness reaches `Ready`; a
//! later apply supersedes an earlier pending one. Extraction converts the
//! schema's values back to model form and returns a modified copy of the held
//! entity, leaving the held entity untouched.
//!
//! Applying an entity that names a program propagates that program into the
//! context before the entity is held.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::core::Context;
use crate::core::ContextPatch;
use crate::core::DefinitionSet;
use crate::core::FieldId;
use crate::core::FormValue;
use crate::core::MeasuredEntity;
use crate::core::RowId;
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
// SECTION: Control Paths
// ============================================================================

/// Prefix of control paths addressing measurement values.
pub const MEASUREMENT_VALUES_PATH: &str = "measurementValues";

/// Translates `measurementValues.<id>` into the field's display name.
#[must_use]
pub fn translate_control_path(definitions: &DefinitionSet, path: &str) -> Option<String> {
    let rest = path.strip_prefix(MEASUREMENT_VALUES_PATH)?.strip_prefix('.')?;
    let field = rest.split('.').next()?.parse::<FieldId>().ok()?;
    definitions.get(field).map(|definition| definition.display_name().to_string())
}

// ============================================================================
// SECTION: Single Unit
// ============================================================================

/// Unit set holding exactly one unit.
pub(crate) struct SingleUnit<E> {
    /// The unit.
    unit: ReconciliationUnit<E>,
}

impl<E: MeasuredEntity> UnitSet for SingleUnit<E> {
    type Entity = E;
    type Key = ();

    fn for_each_unit(
        &mut self,
        visit: &mut dyn FnMut(Option<RowId>, &mut ReconciliationUnit<E>),
    ) {
        visit(None, &mut self.unit);
    }

    fn unit_mut(&mut self, (): ()) -> Result<&mut ReconciliationUnit<E>, ReconcileError> {
        Ok(&mut self.unit)
    }
}

// ============================================================================
// SECTION: Entity Reconciler
// ============================================================================

/// Reconciles one measured entity against dynamic field definitions.
///
/// Dropping the reconciler stops it.
pub struct EntityReconciler<E: MeasuredEntity> {
    /// Shared coordinator.
    core: SharedCore<SingleUnit<E>>,
}

impl<E: MeasuredEntity> EntityReconciler<E> {
    /// Creates a reconciler. Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Runtime`] outside a tokio runtime.
    pub fn new(
        collaborators: Collaborators,
        options: ReconcilerOptions,
    ) -> Result<Self, ReconcileError> {
        let core = SharedCore::new(collaborators, options, |builder| SingleUnit {
            unit: ReconciliationUnit::new(builder.empty_schema()),
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

    /// Merges a context patch, scheduling a reload when the resolved context
    /// changes and resetting when it becomes unresolvable.
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

    /// Holds an entity and applies it now or once ready.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when stopped or the state is unusable.
    pub fn apply_entity(&self, entity: impl Into<Arc<E>>) -> Result<ApplyTicket, ReconcileError> {
        self.core.ensure_running()?;
        let entity = entity.into();
        let mut state = self.core.lock()?;
        propagate_program(&self.core, &mut state, entity.as_ref());
        self.core.hold(&mut state, (), entity)
    }

    /// Returns a copy of the held entity carrying the current values.
    ///
    /// While definitions load, the held entity is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the state is unusable.
    pub fn extract_entity(&self) -> Result<Option<E>, ReconcileError> {
        let state = self.core.lock()?;
        let unit = &state.units.unit;
        match (&state.definitions, self.core.readiness().is_ready()) {
            (Some(definitions), true) => {
                Ok(unit.extract(definitions, self.core.options().extraction))
            }
            _ => Ok(unit.held().map(|held| E::clone(held))),
        }
    }

    /// Sets a control value on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Schema`] when the control is not editable.
    pub fn set_value(&self, field: FieldId, value: FormValue) -> Result<(), ReconcileError> {
        let mut state = self.core.lock()?;
        state.units.unit.schema_mut().set_value(field, value)?;
        Ok(())
    }

    /// Sets one slot of a multi-valued control on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::Schema`] when the slot is not editable.
    pub fn set_item(
        &self,
        field: FieldId,
        index: usize,
        value: FormValue,
    ) -> Result<(), ReconcileError> {
        let mut state = self.core.lock()?;
        state.units.unit.schema_mut().set_item(field, index, value)?;
        Ok(())
    }

    /// Runs `read` against the current schema.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn with_schema<R>(&self, read: impl FnOnce(&Schema) -> R) -> Result<R, ReconcileError> {
        let state = self.core.lock()?;
        Ok(read(state.units.unit.schema()))
    }

    /// Returns the applied definitions.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn definitions(&self) -> Result<Option<DefinitionSet>, ReconcileError> {
        Ok(self.core.lock()?.definitions.clone())
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

    /// Drops the held entity and the definitions, returning to `Starting`.
    ///
    /// The context is kept; the next [`EntityReconciler::request_ready`]
    /// loads definitions again.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::State`] when the shared state is unusable.
    pub fn unload(&self) -> Result<(), ReconcileError> {
        let mut state = self.core.lock()?;
        self.core.unload(&mut state);
        Ok(())
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

    /// Subscribes to engine events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.core.subscribe()
    }

    /// Stops the reconciler, releasing every pending wait.
    pub fn stop(&self) {
        self.core.stop();
    }
}

impl<E: MeasuredEntity> Drop for EntityReconciler<E> {
    fn drop(&mut self) {
        self.core.stop();
    }
}

/// Propagates the entity's program into the context when it differs.
pub(crate) fn propagate_program<U: UnitSet>(
    core: &SharedCore<U>,
    state: &mut CoreState<U>,
    entity: &U::Entity,
) {
    if let Some(program) = entity.program_label()
        && state.context.program_label.as_ref() != Some(program)
    {
        core.set_context_locked(state, ContextPatch::new().program_label(program.clone()));
    }
}

