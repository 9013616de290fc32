// crates/measurement-sync-core/src/core/definition.rs
// ============================================================================
// Module: Field Definitions
// Description: Runtime-discovered typed field descriptors and definition sets.
// Purpose: Describe the dynamic fields a measured entity is reconciled against.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A [`FieldDefinition`] describes one dynamically discovered field: its value
//! kind, cardinality, and editing policy. Definitions arrive grouped in a
//! [`DefinitionSet`], which is immutable once built. Two sets are equal when
//! they hold the same definitions by id, regardless of catalog order, so
//! equivalent re-emissions from the catalog are recognized as no-ops.
//!
//! Validation happens once, when the set is built: ids must be unique and the
//! allowed values of a qualitative field must carry unique ids.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::FieldId;
use crate::core::identifiers::GearId;
use crate::core::identifiers::ProgramLabel;
use crate::core::identifiers::QualitativeValueId;

// ============================================================================
// SECTION: Value Kinds
// ============================================================================

/// One allowed value of a qualitative field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualitativeValue {
    /// Stable identifier, persisted as the model value.
    pub id: QualitativeValueId,
    /// Short label, used for display and sorting.
    pub label: String,
    /// Optional long name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl QualitativeValue {
    /// Creates a qualitative value without a long name.
    #[must_use]
    pub fn new(id: u32, label: impl Into<String>) -> Self {
        Self {
            id: QualitativeValueId::new(id),
            label: label.into(),
            name: None,
        }
    }

    /// Returns the text shown to users: the name when present, else the label.
    #[must_use]
    pub fn display_text(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.label)
    }
}

/// Value kind of a field definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    /// True/false values.
    Boolean,
    /// Whole numbers.
    Integer,
    /// Decimal numbers with an optional maximum number of fraction digits.
    Decimal {
        /// Maximum number of fraction digits accepted by validation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        precision: Option<u8>,
    },
    /// Calendar dates with time of day and offset.
    Date,
    /// Free text.
    String,
    /// One of an enumerated list of values.
    Qualitative {
        /// Allowed values, in catalog order.
        values: Vec<QualitativeValue>,
    },
}

impl ValueKind {
    /// Returns the stable name of the kind.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Decimal {
                ..
            } => "decimal",
            Self::Date => "date",
            Self::String => "string",
            Self::Qualitative {
                ..
            } => "qualitative",
        }
    }

    /// Looks up an allowed qualitative value by id.
    #[must_use]
    pub fn qualitative_value(&self, id: QualitativeValueId) -> Option<&QualitativeValue> {
        match self {
            Self::Qualitative {
                values,
            } => values.iter().find(|value| value.id == id),
            _ => None,
        }
    }

    /// Returns true for qualitative kinds.
    #[must_use]
    pub const fn is_qualitative(&self) -> bool {
        matches!(self, Self::Qualitative { .. })
    }
}

// ============================================================================
// SECTION: Field Definitions
// ============================================================================

/// Program and gear scoping information, consumed only by catalog resolvers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Applicability {
    /// Programs the definition applies to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub programs: Vec<ProgramLabel>,
    /// Gears the definition applies to; empty means all.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gears: Vec<GearId>,
}

/// One dynamically discovered typed field.
///
/// # Invariants
/// - `id` is unique within a [`DefinitionSet`].
/// - `default_value` uses the model encoding of `value_kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Stable field identifier.
    pub id: FieldId,
    /// Short label.
    pub label: String,
    /// Optional long name, used when translating control paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Value kind.
    #[serde(flatten)]
    pub value_kind: ValueKind,
    /// Whether the field holds an ordered list of values.
    #[serde(default)]
    pub multiple: bool,
    /// Whether absence is invalid.
    #[serde(default)]
    pub required: bool,
    /// Whether the value is derived elsewhere and never taken from user input.
    #[serde(default)]
    pub computed: bool,
    /// Whether the field is excluded from the bindable schema.
    #[serde(default)]
    pub hidden: bool,
    /// Model-encoded value used when no value exists yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    /// Unit label appended to displayed values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_label: Option<String>,
    /// Catalog rank order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank_order: Option<u32>,
    /// Program and gear scoping information.
    #[serde(default)]
    pub applicability: Applicability,
}

impl FieldDefinition {
    /// Creates a visible, optional, single-valued definition.
    #[must_use]
    pub fn new(id: u32, label: impl Into<String>, value_kind: ValueKind) -> Self {
        Self {
            id: FieldId::new(id),
            label: label.into(),
            name: None,
            value_kind,
            multiple: false,
            required: false,
            computed: false,
            hidden: false,
            default_value: None,
            unit_label: None,
            rank_order: None,
            applicability: Applicability::default(),
        }
    }

    /// Marks the definition as required.
    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Marks the definition as multi-valued.
    #[must_use]
    pub const fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Marks the definition as computed.
    #[must_use]
    pub const fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    /// Marks the definition as hidden.
    #[must_use]
    pub const fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Sets the model-encoded default value.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Sets the long name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Returns the name used in user-facing messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.label)
    }

    /// Returns the parameters that drive validator construction.
    #[must_use]
    pub fn validation_params(&self) -> ValidationParams {
        ValidationParams {
            kind: self.value_kind.clone(),
            multiple: self.multiple,
            required: self.required,
            computed: self.computed,
        }
    }

    /// Returns the minimum number of list slots for multi-valued fields.
    #[must_use]
    pub const fn min_items(&self) -> usize {
        if self.required { 1 } else { 0 }
    }
}

/// Validation-relevant subset of a definition.
///
/// A control's validator is refreshed only when these parameters change.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationParams {
    /// Value kind.
    pub kind: ValueKind,
    /// Whether the field is multi-valued.
    pub multiple: bool,
    /// Whether the field is required.
    pub required: bool,
    /// Whether the field is computed.
    pub computed: bool,
}

// ============================================================================
// SECTION: Definition Sets
// ============================================================================

/// Errors raised while building a definition set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Two definitions share an id.
    #[error("duplicate field definition id: {0}")]
    DuplicateId(FieldId),
    /// Two qualitative values of one field share an id.
    #[error("field {field} declares qualitative value {value} more than once")]
    DuplicateQualitativeValue {
        /// Field declaring the values.
        field: FieldId,
        /// Repeated value id.
        value: QualitativeValueId,
    },
}

/// Immutable set of field definitions in catalog order.
///
/// # Invariants
/// - Definition ids are unique.
/// - Equality ignores catalog order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldDefinition>", into = "Vec<FieldDefinition>")]
pub struct DefinitionSet {
    /// Definitions in catalog order.
    definitions: Vec<FieldDefinition>,
}

impl DefinitionSet {
    /// Builds a validated definition set.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] when ids are repeated.
    pub fn new(definitions: Vec<FieldDefinition>) -> Result<Self, DefinitionError> {
        let mut seen = BTreeSet::new();
        for definition in &definitions {
            if !seen.insert(definition.id) {
                return Err(DefinitionError::DuplicateId(definition.id));
            }
            if let ValueKind::Qualitative {
                values,
            } = &definition.value_kind
            {
                let mut value_ids = BTreeSet::new();
                for value in values {
                    if !value_ids.insert(value.id) {
                        return Err(DefinitionError::DuplicateQualitativeValue {
                            field: definition.id,
                            value: value.id,
                        });
                    }
                }
            }
        }
        Ok(Self {
            definitions,
        })
    }

    /// Returns the empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            definitions: Vec::new(),
        }
    }

    /// Returns the number of definitions.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Returns true when the set holds no definitions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// Iterates definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.definitions.iter()
    }

    /// Iterates non-hidden definitions in catalog order.
    pub fn visible(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.definitions.iter().filter(|definition| !definition.hidden)
    }

    /// Looks up a definition by id.
    #[must_use]
    pub fn get(&self, id: FieldId) -> Option<&FieldDefinition> {
        self.definitions.iter().find(|definition| definition.id == id)
    }

    /// Returns true when a definition with the id exists.
    #[must_use]
    pub fn contains(&self, id: FieldId) -> bool {
        self.get(id).is_some()
    }

    /// Returns a copy where every required definition becomes optional,
    /// except those whose id is in `excluded`.
    #[must_use]
    pub fn with_forced_optional(&self, excluded: &BTreeSet<FieldId>) -> Self {
        let definitions = self
            .definitions
            .iter()
            .map(|definition| {
                if definition.required && !excluded.contains(&definition.id) {
                    let mut relaxed = definition.clone();
                    relaxed.required = false;
                    relaxed
                } else {
                    definition.clone()
                }
            })
            .collect();
        Self {
            definitions,
        }
    }

    /// Consumes the set and returns the definitions in catalog order.
    #[must_use]
    pub fn into_vec(self) -> Vec<FieldDefinition> {
        self.definitions
    }

    /// Indexes definitions by id.
    fn by_id(&self) -> BTreeMap<FieldId, &FieldDefinition> {
        self.definitions.iter().map(|definition| (definition.id, definition)).collect()
    }
}

impl PartialEq for DefinitionSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.by_id() == other.by_id()
    }
}

impl Eq for DefinitionSet {}

impl TryFrom<Vec<FieldDefinition>> for DefinitionSet {
    type Error = DefinitionError;

    fn try_from(value: Vec<FieldDefinition>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DefinitionSet> for Vec<FieldDefinition> {
    fn from(value: DefinitionSet) -> Self {
        value.definitions
    }
}

impl<'a> IntoIterator for &'a DefinitionSet {
    type Item = &'a FieldDefinition;
    type IntoIter = std::slice::Iter<'a, FieldDefinition>;

    fn into_iter(self) -> Self::IntoIter {
        self.definitions.iter()
    }
}
