// crates/measurement-sync-core/src/runtime/schema.rs
// ============================================================================
// Module: Dynamic Schema Builder
// Description: Live bindable controls keyed by field id, rebuilt from definitions.
// Purpose: Grow and shrink the schema while preserving surviving controls.
// Dependencies: crate::core, crate::interfaces, thiserror
// ============================================================================

//! ## Overview
//! A [`Schema`] holds one [`FieldControl`] per visible field definition plus
//! an optional meta field naming the value shape. [`SchemaBuilder::rebuild`]
//! diffs a new definition set against the previous schema: surviving controls
//! keep their identity and value and only get a fresh validator when their
//! validation parameters change; new controls are seeded from the default
//! value; controls for vanished ids are dropped. Rebuilding with an equal set
//! returns the previous schema untouched.
//!
//! Multi-valued fields are lists of slots whose minimum length is one when the
//! field is required. A schema is disabled while a rebuild is in progress and
//! re-enabled only by the reconciler once values have been applied.
//!
//! Security posture: user edits go through [`Schema::set_value`], which
//! refuses disabled schemas, disabled controls, and unknown fields.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use thiserror::Error;

use crate::core::DefinitionSet;
use crate::core::FieldDefinition;
use crate::core::FieldId;
use crate::core::FormValue;
use crate::core::FormValueMap;
use crate::core::ValidationParams;
use crate::core::ValuesShape;
use crate::interfaces::FieldValidator;
use crate::interfaces::ValidationIssue;
use crate::interfaces::ValidatorError;
use crate::interfaces::ValidatorFactory;
use crate::runtime::normalizer::to_form_value;

// ============================================================================
// SECTION: Control Identity
// ============================================================================

/// Process-wide control identity counter.
static NEXT_CONTROL_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a control; stable for as long as the control is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ControlId(u64);

impl ControlId {
    /// Allocates a fresh identity.
    fn next() -> Self {
        Self(NEXT_CONTROL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identity.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Schema errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A validator could not be built.
    #[error("schema validator error for field {field}: {source}")]
    Validator {
        /// Field whose validator failed.
        field: FieldId,
        /// Underlying error.
        source: ValidatorError,
    },
    /// The schema is disabled while a rebuild is in progress.
    #[error("schema is disabled")]
    Disabled,
    /// The control is disabled.
    #[error("control for field {0} is disabled")]
    ControlDisabled(FieldId),
    /// No control exists for the field.
    #[error("no control for field {0}")]
    UnknownField(FieldId),
    /// A list slot index is out of range.
    #[error("field {field} has no slot {index}")]
    SlotOutOfRange {
        /// Field holding the list.
        field: FieldId,
        /// Requested index.
        index: usize,
    },
    /// Removing a slot would drop below the minimum length.
    #[error("field {field} requires at least {min} slot(s)")]
    BelowMinimum {
        /// Field holding the list.
        field: FieldId,
        /// Minimum number of slots.
        min: usize,
    },
    /// The field is single-valued.
    #[error("field {0} is not multi-valued")]
    NotList(FieldId),
}

// ============================================================================
// SECTION: Controls
// ============================================================================

/// Value slot of a control.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSlot {
    /// Single value.
    Single(FormValue),
    /// Ordered list of values.
    List(Vec<FormValue>),
}

/// One bindable control.
#[derive(Clone)]
pub struct FieldControl {
    /// Control identity.
    id: ControlId,
    /// Field the control binds.
    field: FieldId,
    /// Current value.
    slot: ControlSlot,
    /// Minimum list length; zero for single values.
    min_items: usize,
    /// Whether users may edit the control.
    disabled: bool,
    /// Parameters the validator was built from.
    params: ValidationParams,
    /// Attached validator.
    validator: Option<Arc<dyn FieldValidator>>,
}

impl fmt::Debug for FieldControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldControl")
            .field("id", &self.id)
            .field("field", &self.field)
            .field("slot", &self.slot)
            .field("min_items", &self.min_items)
            .field("disabled", &self.disabled)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

impl FieldControl {
    /// Returns the control identity.
    #[must_use]
    pub const fn id(&self) -> ControlId {
        self.id
    }

    /// Returns the bound field.
    #[must_use]
    pub const fn field(&self) -> FieldId {
        self.field
    }

    /// Returns the value slot.
    #[must_use]
    pub const fn slot(&self) -> &ControlSlot {
        &self.slot
    }

    /// Returns the number of list slots, or `None` for single values.
    #[must_use]
    pub const fn len(&self) -> Option<usize> {
        match &self.slot {
            ControlSlot::Single(_) => None,
            ControlSlot::List(items) => Some(items.len()),
        }
    }

    /// Returns the minimum list length.
    #[must_use]
    pub const fn min_items(&self) -> usize {
        self.min_items
    }

    /// Returns true when users may not edit the control.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Returns the validation parameters.
    #[must_use]
    pub const fn params(&self) -> &ValidationParams {
        &self.params
    }

    /// Returns true when a validator is attached.
    #[must_use]
    pub const fn has_validator(&self) -> bool {
        self.validator.is_some()
    }

    /// Returns the value as a form value.
    #[must_use]
    pub fn value(&self) -> FormValue {
        match &self.slot {
            ControlSlot::Single(value) => value.clone(),
            ControlSlot::List(items) => FormValue::List(items.clone()),
        }
    }

    /// Runs the attached validator.
    #[must_use]
    pub fn validate(&self) -> Vec<ValidationIssue> {
        self.validator.as_ref().map(|validator| validator.validate(&self.value())).unwrap_or_default()
    }

    /// Replaces the value, padding lists to the minimum length.
    fn assign(&mut self, value: FormValue) {
        self.slot = match &self.slot {
            ControlSlot::Single(_) => ControlSlot::Single(match value {
                FormValue::List(items) => items.into_iter().find(|item| !item.is_empty()).unwrap_or_default(),
                scalar => scalar,
            }),
            ControlSlot::List(_) => ControlSlot::List(pad(into_items(value), self.min_items)),
        };
    }

    /// Reshapes the control for refreshed parameters, keeping its value.
    fn reshape(&mut self, definition: &FieldDefinition) {
        self.min_items = if definition.multiple { definition.min_items() } else { 0 };
        let value = self.value();
        self.slot = if definition.multiple {
            ControlSlot::List(Vec::new())
        } else {
            ControlSlot::Single(FormValue::Empty)
        };
        self.assign(value);
        self.disabled = definition.computed;
    }
}

/// Flattens a form value into list items.
fn into_items(value: FormValue) -> Vec<FormValue> {
    match value {
        FormValue::List(items) => items,
        FormValue::Empty => Vec::new(),
        scalar => vec![scalar],
    }
}

/// Pads a list with empty slots up to `min`.
fn pad(mut items: Vec<FormValue>, min: usize) -> Vec<FormValue> {
    while items.len() < min {
        items.push(FormValue::Empty);
    }
    items
}

// ============================================================================
// SECTION: Schema
// ============================================================================

/// A field's validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssues {
    /// Field with issues.
    pub field: FieldId,
    /// Issues found.
    pub issues: Vec<ValidationIssue>,
}

/// Live set of bindable controls.
///
/// # Invariants
/// - One control per visible definition of `definitions`.
/// - `order` lists control fields in catalog order.
#[derive(Debug, Clone)]
pub struct Schema {
    /// Controls by field id.
    controls: BTreeMap<FieldId, FieldControl>,
    /// Control fields in catalog order.
    order: Vec<FieldId>,
    /// Meta field naming the value shape, when enabled.
    shape: Option<ValuesShape>,
    /// Definitions the schema was built from; `None` before the first build.
    definitions: Option<DefinitionSet>,
    /// Whether edits are refused.
    disabled: bool,
    /// Whether a user edited a value since the last apply.
    dirty: bool,
}

impl Schema {
    /// Creates an empty schema that has never been built.
    #[must_use]
    pub const fn empty(with_typename: bool) -> Self {
        Self {
            controls: BTreeMap::new(),
            order: Vec::new(),
            shape: if with_typename { Some(ValuesShape::Form) } else { None },
            definitions: None,
            disabled: false,
            dirty: false,
        }
    }

    /// Returns the definitions the schema was built from.
    #[must_use]
    pub const fn definitions(&self) -> Option<&DefinitionSet> {
        self.definitions.as_ref()
    }

    /// Returns the meta field value.
    #[must_use]
    pub const fn shape(&self) -> Option<ValuesShape> {
        self.shape
    }

    /// Returns the number of controls, excluding the meta field.
    #[must_use]
    pub fn len(&self) -> usize {
        self.controls.len()
    }

    /// Returns true when only the meta field remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Returns the control for a field.
    #[must_use]
    pub fn control(&self, field: FieldId) -> Option<&FieldControl> {
        self.controls.get(&field)
    }

    /// Iterates controls in catalog order.
    pub fn controls(&self) -> impl Iterator<Item = &FieldControl> {
        self.order.iter().filter_map(|field| self.controls.get(field))
    }

    /// Returns control fields in catalog order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.order
    }

    /// Returns true while edits are refused.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Refuses edits until [`Schema::enable`].
    pub const fn disable(&mut self) {
        self.disabled = true;
    }

    /// Accepts edits again.
    pub const fn enable(&mut self) {
        self.disabled = false;
    }

    /// Returns true when a user edited a value since the last apply.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns every control value.
    #[must_use]
    pub fn form_values(&self) -> FormValueMap {
        self.controls.iter().map(|(field, control)| (*field, control.value())).collect()
    }

    /// Overwrites control values from a map and marks the schema pristine.
    ///
    /// Fields without a control are ignored; controls absent from the map keep
    /// their value.
    pub fn apply_values(&mut self, values: &FormValueMap) {
        for (field, value) in values {
            if let Some(control) = self.controls.get_mut(field) {
                control.assign(value.clone());
            }
        }
        self.dirty = false;
    }

    /// Sets a control value on behalf of a user.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the schema or control is disabled or the
    /// field has no control.
    pub fn set_value(&mut self, field: FieldId, value: FormValue) -> Result<(), SchemaError> {
        let control = self.editable(field)?;
        control.assign(value);
        self.dirty = true;
        Ok(())
    }

    /// Sets one slot of a multi-valued control.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the control is not editable, not a list,
    /// or has no such slot.
    pub fn set_item(
        &mut self,
        field: FieldId,
        index: usize,
        value: FormValue,
    ) -> Result<(), SchemaError> {
        let control = self.editable(field)?;
        let ControlSlot::List(items) = &mut control.slot else {
            return Err(SchemaError::NotList(field));
        };
        let slot = items.get_mut(index).ok_or(SchemaError::SlotOutOfRange {
            field,
            index,
        })?;
        *slot = value;
        self.dirty = true;
        Ok(())
    }

    /// Appends an empty slot to a multi-valued control.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the control is not editable or not a list.
    pub fn push_item(&mut self, field: FieldId) -> Result<usize, SchemaError> {
        let control = self.editable(field)?;
        let ControlSlot::List(items) = &mut control.slot else {
            return Err(SchemaError::NotList(field));
        };
        items.push(FormValue::Empty);
        let len = items.len();
        self.dirty = true;
        Ok(len)
    }

    /// Removes one slot of a multi-valued control.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError`] when the control is not editable, not a list,
    /// has no such slot, or would drop below its minimum length.
    pub fn remove_item(&mut self, field: FieldId, index: usize) -> Result<(), SchemaError> {
        let control = self.editable(field)?;
        let min = control.min_items;
        let ControlSlot::List(items) = &mut control.slot else {
            return Err(SchemaError::NotList(field));
        };
        if index >= items.len() {
            return Err(SchemaError::SlotOutOfRange {
                field,
                index,
            });
        }
        if items.len() <= min {
            return Err(SchemaError::BelowMinimum {
                field,
                min,
            });
        }
        items.remove(index);
        self.dirty = true;
        Ok(())
    }

    /// Validates every control.
    #[must_use]
    pub fn validate(&self) -> Vec<FieldIssues> {
        self.controls()
            .map(|control| FieldIssues {
                field: control.field,
                issues: control.validate(),
            })
            .filter(|entry| !entry.issues.is_empty())
            .collect()
    }

    /// Returns true when no control reports an issue.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Returns a control that users may edit.
    fn editable(&mut self, field: FieldId) -> Result<&mut FieldControl, SchemaError> {
        if self.disabled {
            return Err(SchemaError::Disabled);
        }
        let control = self.controls.get_mut(&field).ok_or(SchemaError::UnknownField(field))?;
        if control.disabled {
            return Err(SchemaError::ControlDisabled(field));
        }
        Ok(control)
    }
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Options shaping built schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Whether schemas carry the value-shape meta field.
    pub with_typename: bool,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            with_typename: true,
        }
    }
}

/// Controls added, refreshed, and removed by one rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaChange {
    /// Fields that gained a control.
    pub added: Vec<FieldId>,
    /// Fields whose control got a fresh validator.
    pub refreshed: Vec<FieldId>,
    /// Fields whose control was dropped.
    pub removed: Vec<FieldId>,
    /// Whether the definitions differed from the previous schema's.
    pub definitions_changed: bool,
}

impl SchemaChange {
    /// Returns true when the rebuild changed nothing.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        !self.definitions_changed
    }
}

/// Result of a rebuild.
#[derive(Debug, Clone)]
pub struct Rebuilt {
    /// The new schema.
    pub schema: Schema,
    /// What changed.
    pub change: SchemaChange,
}

/// Builds schemas from definition sets.
#[derive(Clone)]
pub struct SchemaBuilder {
    /// Validator factory consulted per control creation or refresh.
    validators: Arc<dyn ValidatorFactory>,
    /// Schema options.
    options: SchemaOptions,
}

impl fmt::Debug for SchemaBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaBuilder").field("options", &self.options).finish_non_exhaustive()
    }
}

impl SchemaBuilder {
    /// Creates a builder.
    #[must_use]
    pub fn new(validators: Arc<dyn ValidatorFactory>, options: SchemaOptions) -> Self {
        Self {
            validators,
            options,
        }
    }

    /// Returns an empty, never-built schema.
    #[must_use]
    pub const fn empty_schema(&self) -> Schema {
        Schema::empty(self.options.with_typename)
    }

    /// Disables `schema` when `definitions` differ from the ones it was built
    /// from, returning true when a rebuild is needed.
    pub fn begin(&self, definitions: &DefinitionSet, schema: &mut Schema) -> bool {
        if schema.definitions.as_ref() == Some(definitions) {
            return false;
        }
        schema.disable();
        true
    }

    /// Rebuilds a schema for `definitions`, reusing controls from `previous`.
    ///
    /// The returned schema is disabled whenever anything changed.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Validator`] when a validator cannot be built;
    /// `previous` is left untouched.
    pub fn rebuild(
        &self,
        definitions: &DefinitionSet,
        previous: &Schema,
    ) -> Result<Rebuilt, SchemaError> {
        if previous.definitions.as_ref() == Some(definitions) {
            return Ok(Rebuilt {
                schema: previous.clone(),
                change: SchemaChange::default(),
            });
        }
        let mut change = SchemaChange {
            definitions_changed: true,
            ..SchemaChange::default()
        };
        let mut controls = BTreeMap::new();
        let mut order = Vec::new();
        for definition in definitions.visible() {
            let control = match previous.controls.get(&definition.id) {
                Some(existing) => {
                    let mut control = existing.clone();
                    let params = definition.validation_params();
                    if control.params != params {
                        control.validator = self.validator_for(definition)?;
                        control.params = params;
                        control.reshape(definition);
                        change.refreshed.push(definition.id);
                    }
                    control
                }
                None => {
                    change.added.push(definition.id);
                    self.create(definition)?
                }
            };
            order.push(definition.id);
            controls.insert(definition.id, control);
        }
        change.removed =
            previous.order.iter().copied().filter(|field| !controls.contains_key(field)).collect();
        let schema = Schema {
            controls,
            order,
            shape: self.options.with_typename.then_some(ValuesShape::Form),
            definitions: Some(definitions.clone()),
            disabled: true,
            dirty: previous.dirty,
        };
        Ok(Rebuilt {
            schema,
            change,
        })
    }

    /// Creates a control seeded from the definition's default value.
    fn create(&self, definition: &FieldDefinition) -> Result<FieldControl, SchemaError> {
        let seeded = to_form_value(definition.default_value.as_deref(), definition);
        let min_items = if definition.multiple { definition.min_items() } else { 0 };
        let slot = if definition.multiple {
            ControlSlot::List(pad(into_items(seeded), min_items))
        } else {
            ControlSlot::Single(seeded)
        };
        Ok(FieldControl {
            id: ControlId::next(),
            field: definition.id,
            slot,
            min_items,
            disabled: definition.computed,
            params: definition.validation_params(),
            validator: self.validator_for(definition)?,
        })
    }

    /// Builds the validator for a definition.
    fn validator_for(
        &self,
        definition: &FieldDefinition,
    ) -> Result<Option<Arc<dyn FieldValidator>>, SchemaError> {
        self.validators.build(definition).map_err(|source| SchemaError::Validator {
            field: definition.id,
            source,
        })
    }
}
