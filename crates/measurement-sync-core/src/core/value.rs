// crates/measurement-sync-core/src/core/value.rs
// ============================================================================
// Module: Measurement Values
// Description: Model-form and form-form value maps keyed by field id.
// Purpose: Represent the two shapes a measured entity's values travel in.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! Model form is the persistence shape: a sparse map from field id to a
//! string-encoded value. Multiple values are joined with
//! [`MULTIPLE_VALUE_SEPARATOR`], booleans are `true`/`false`, qualitative
//! values are referenced by id, and dates use RFC 3339.
//!
//! Form form is the bindable shape: one typed [`FormValue`] per field, with
//! qualitative values carried as full objects so a picker can show a label.
//! [`MeasurementValues`] tags which shape an entity currently holds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::core::definition::QualitativeValue;
use crate::core::identifiers::FieldId;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Separator joining the values of a multi-valued field in model form.
pub const MULTIPLE_VALUE_SEPARATOR: char = '|';

/// Separator joining list items when displaying a form value.
pub const DISPLAY_LIST_SEPARATOR: &str = ", ";

// ============================================================================
// SECTION: Form Values
// ============================================================================

/// Typed value bound to one control.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FormValue {
    /// No value.
    #[default]
    Empty,
    /// Boolean value.
    Boolean(bool),
    /// Whole number.
    Integer(i64),
    /// Decimal number.
    Decimal(f64),
    /// Date with time of day and offset.
    Date(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    /// Free text.
    Text(String),
    /// Referenced qualitative value.
    Qualitative(QualitativeValue),
    /// Ordered values of a multi-valued field.
    List(Vec<FormValue>),
}

impl FormValue {
    /// Returns true for empty values, blank text, and lists of empty values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Text(text) => text.trim().is_empty(),
            Self::List(items) => items.iter().all(Self::is_empty),
            _ => false,
        }
    }

    /// Compares two values treating every empty encoding as equal.
    #[must_use]
    pub fn equivalent(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::List(left), Self::List(right)) => {
                let left: Vec<&Self> = left.iter().filter(|item| !item.is_empty()).collect();
                let right: Vec<&Self> = right.iter().filter(|item| !item.is_empty()).collect();
                left.len() == right.len()
                    && left.iter().zip(right.iter()).all(|(a, b)| a.equivalent(b))
            }
            (left, right) if left.is_empty() && right.is_empty() => true,
            (left, right) => left == right,
        }
    }

    /// Renders the value for display.
    ///
    /// Qualitative values show their name, falling back to the label. List
    /// items are joined with [`DISPLAY_LIST_SEPARATOR`].
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Boolean(value) => value.to_string(),
            Self::Integer(value) => value.to_string(),
            Self::Decimal(value) => value.to_string(),
            Self::Date(value) => value.format(&Rfc3339).unwrap_or_default(),
            Self::Text(value) => value.clone(),
            Self::Qualitative(value) => value.display_text().to_string(),
            Self::List(items) => items
                .iter()
                .filter(|item| !item.is_empty())
                .map(Self::display)
                .collect::<Vec<_>>()
                .join(DISPLAY_LIST_SEPARATOR),
        }
    }

    /// Orders two values for sorting; empty values sort after everything.
    ///
    /// Qualitative values compare by label, lists by their first item.
    #[must_use]
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self.sort_head(), other.sort_head()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(left), Some(right)) => compare_present(left, right),
        }
    }

    /// Returns the scalar used for sorting, or `None` when empty.
    fn sort_head(&self) -> Option<&Self> {
        match self {
            Self::List(items) => items.iter().find(|item| !item.is_empty()),
            value if value.is_empty() => None,
            value => Some(value),
        }
    }
}

/// Compares two non-empty scalar values.
fn compare_present(left: &FormValue, right: &FormValue) -> Ordering {
    match (left, right) {
        (FormValue::Boolean(a), FormValue::Boolean(b)) => a.cmp(b),
        (FormValue::Integer(a), FormValue::Integer(b)) => a.cmp(b),
        (FormValue::Decimal(a), FormValue::Decimal(b)) => a.total_cmp(b),
        (FormValue::Integer(a), FormValue::Decimal(b)) => integer_as_decimal(*a).total_cmp(b),
        (FormValue::Decimal(a), FormValue::Integer(b)) => a.total_cmp(&integer_as_decimal(*b)),
        (FormValue::Date(a), FormValue::Date(b)) => a.cmp(b),
        (FormValue::Qualitative(a), FormValue::Qualitative(b)) => {
            a.label.cmp(&b.label).then(a.id.cmp(&b.id))
        }
        (a, b) => a.display().cmp(&b.display()),
    }
}

/// Widens an integer for mixed numeric comparison.
#[allow(clippy::cast_precision_loss, reason = "Sorting tolerates precision loss beyond 2^53.")]
const fn integer_as_decimal(value: i64) -> f64 {
    value as f64
}

// ============================================================================
// SECTION: Value Maps
// ============================================================================

/// Sparse model-form map from field id to encoded value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelValueMap(BTreeMap<FieldId, String>);

impl ModelValueMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the encoded value for a field.
    #[must_use]
    pub fn get(&self, id: FieldId) -> Option<&str> {
        self.0.get(&id).map(String::as_str)
    }

    /// Inserts an encoded value, returning the previous one.
    pub fn insert(&mut self, id: FieldId, value: impl Into<String>) -> Option<String> {
        self.0.insert(id, value.into())
    }

    /// Removes the value for a field.
    pub fn remove(&mut self, id: FieldId) -> Option<String> {
        self.0.remove(&id)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no values are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates values in field id order.
    pub fn iter(&self) -> btree_map::Iter<'_, FieldId, String> {
        self.0.iter()
    }
}

impl FromIterator<(FieldId, String)> for ModelValueMap {
    fn from_iter<T: IntoIterator<Item = (FieldId, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ModelValueMap {
    type Item = (&'a FieldId, &'a String);
    type IntoIter = btree_map::Iter<'a, FieldId, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Form-form map from field id to typed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormValueMap(BTreeMap<FieldId, FormValue>);

impl FormValueMap {
    /// Creates an empty map.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the value for a field.
    #[must_use]
    pub fn get(&self, id: FieldId) -> Option<&FormValue> {
        self.0.get(&id)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, id: FieldId, value: FormValue) -> Option<FormValue> {
        self.0.insert(id, value)
    }

    /// Removes the value for a field.
    pub fn remove(&mut self, id: FieldId) -> Option<FormValue> {
        self.0.remove(&id)
    }

    /// Returns the number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no values are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates values in field id order.
    pub fn iter(&self) -> btree_map::Iter<'_, FieldId, FormValue> {
        self.0.iter()
    }
}

impl FromIterator<(FieldId, FormValue)> for FormValueMap {
    fn from_iter<T: IntoIterator<Item = (FieldId, FormValue)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a FormValueMap {
    type Item = (&'a FieldId, &'a FormValue);
    type IntoIter = btree_map::Iter<'a, FieldId, FormValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

// ============================================================================
// SECTION: Entity Values
// ============================================================================

/// Shape tag carried by the schema meta field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValuesShape {
    /// Model-form values.
    #[serde(rename = "MeasurementModelValues")]
    Model,
    /// Form-form values.
    #[serde(rename = "MeasurementFormValue")]
    Form,
}

impl ValuesShape {
    /// Returns the type name written to the meta field.
    #[must_use]
    pub const fn type_name(self) -> &'static str {
        match self {
            Self::Model => "MeasurementModelValues",
            Self::Form => "MeasurementFormValue",
        }
    }
}

/// Measurement values held by an entity, in either shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementValues {
    /// Model-form values.
    Model(ModelValueMap),
    /// Form-form values.
    Form(FormValueMap),
}

impl MeasurementValues {
    /// Returns the shape tag.
    #[must_use]
    pub const fn shape(&self) -> ValuesShape {
        match self {
            Self::Model(_) => ValuesShape::Model,
            Self::Form(_) => ValuesShape::Form,
        }
    }
}

impl Default for MeasurementValues {
    fn default() -> Self {
        Self::Model(ModelValueMap::new())
    }
}
