// crates/measurement-sync-core/src/runtime/normalizer.rs
// ============================================================================
// Module: Value Normalizer
// Description: Conversion between model-form and form-form measurement values.
// Purpose: Map values both ways per field definition, best effort and total.
// Dependencies: crate::core, time
// ============================================================================

//! ## Overview
//! [`to_form_values`] and [`to_model_values`] are pure and total over a
//! well-formed definition set. Malformed model values are coerced when the
//! intent is unambiguous (`"1.0"` for an integer field, `"1"` for a boolean)
//! and otherwise become empty for that field alone.
//!
//! Computed fields are never read from the form: [`to_model_values`] copies
//! their value from the entity's previous model values. Default values are
//! not applied here; they seed new controls and fill gaps when an entity is
//! applied, so converting a model map to form and back reproduces it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use time::Date;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;

use crate::core::DefinitionSet;
use crate::core::FieldDefinition;
use crate::core::FormValue;
use crate::core::FormValueMap;
use crate::core::MeasurementValues;
use crate::core::ModelValueMap;
use crate::core::QualitativeValueId;
use crate::core::ValueKind;
use crate::core::value::MULTIPLE_VALUE_SEPARATOR;
use crate::runtime::schema::Schema;

// ============================================================================
// SECTION: Extraction Options
// ============================================================================

/// Which controls contribute values when extracting an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionOptions {
    /// Skip fields whose control is disabled.
    pub skip_disabled: bool,
    /// Skip computed fields.
    pub skip_computed: bool,
}

impl Default for ExtractionOptions {
    fn default() -> Self {
        Self {
            skip_disabled: true,
            skip_computed: true,
        }
    }
}

/// Returns the definitions whose live controls contribute to extraction.
#[must_use]
pub fn extractable<'a>(
    definitions: &'a DefinitionSet,
    schema: &Schema,
    options: ExtractionOptions,
) -> Vec<&'a FieldDefinition> {
    definitions
        .iter()
        .filter(|definition| {
            schema.control(definition.id).is_some_and(|control| {
                (!options.skip_disabled || !control.is_disabled())
                    && (!options.skip_computed || !definition.computed)
            })
        })
        .collect()
}

// ============================================================================
// SECTION: Model To Form
// ============================================================================

/// Converts a model value map to form values for every definition.
#[must_use]
pub fn to_form_values<'a>(
    model: &ModelValueMap,
    definitions: impl IntoIterator<Item = &'a FieldDefinition>,
) -> FormValueMap {
    definitions
        .into_iter()
        .map(|definition| (definition.id, to_form_value(model.get(definition.id), definition)))
        .collect()
}

/// Converts one model-encoded value to its form value.
#[must_use]
pub fn to_form_value(raw: Option<&str>, definition: &FieldDefinition) -> FormValue {
    if definition.multiple {
        let items = raw
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                raw.split(MULTIPLE_VALUE_SEPARATOR)
                    .map(|part| scalar_to_form(Some(part), &definition.value_kind))
                    .collect()
            })
            .unwrap_or_default();
        return FormValue::List(items);
    }
    scalar_to_form(raw, &definition.value_kind)
}

/// Converts one scalar, falling back to empty on malformed input.
///
/// Blank text is an encoding of the empty value for every kind, strings
/// included.
fn scalar_to_form(raw: Option<&str>, kind: &ValueKind) -> FormValue {
    let Some(raw) = raw.filter(|raw| !raw.trim().is_empty()) else {
        return FormValue::Empty;
    };
    let trimmed = raw.trim();
    let converted = match kind {
        ValueKind::Boolean => parse_boolean(trimmed).map(FormValue::Boolean),
        ValueKind::Integer => parse_integer(trimmed).map(FormValue::Integer),
        ValueKind::Decimal {
            ..
        } => trimmed.parse::<f64>().ok().filter(|number| number.is_finite()).map(FormValue::Decimal),
        ValueKind::Date => parse_date(trimmed).map(FormValue::Date),
        ValueKind::String => Some(FormValue::Text(raw.to_string())),
        ValueKind::Qualitative {
            ..
        } => trimmed
            .parse::<QualitativeValueId>()
            .ok()
            .and_then(|id| kind.qualitative_value(id))
            .map(|value| FormValue::Qualitative(value.clone())),
    };
    converted.unwrap_or(FormValue::Empty)
}

/// Parses `true`/`false`, accepting `1`/`0`.
fn parse_boolean(raw: &str) -> Option<bool> {
    match raw {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Parses an integer, accepting decimals whose fraction is all zeros.
fn parse_integer(raw: &str) -> Option<i64> {
    if let Ok(value) = raw.parse::<i64>() {
        return Some(value);
    }
    let (whole, fraction) = raw.split_once('.')?;
    if fraction.chars().all(|digit| digit == '0') {
        whole.parse::<i64>().ok()
    } else {
        None
    }
}

/// Parses an RFC 3339 timestamp or a bare `YYYY-MM-DD` date at UTC midnight.
fn parse_date(raw: &str) -> Option<OffsetDateTime> {
    if let Ok(value) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(value);
    }
    Date::parse(raw, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

// ============================================================================
// SECTION: Form To Model
// ============================================================================

/// Converts form values back to a model value map.
///
/// Only the given definitions contribute. Computed definitions copy their
/// value from `previous`, whatever the form holds.
#[must_use]
pub fn to_model_values<'a>(
    form: &FormValueMap,
    definitions: impl IntoIterator<Item = &'a FieldDefinition>,
    previous: Option<&ModelValueMap>,
) -> ModelValueMap {
    let mut model = ModelValueMap::new();
    for definition in definitions {
        if definition.computed {
            if let Some(value) = previous.and_then(|previous| previous.get(definition.id)) {
                model.insert(definition.id, value);
            }
            continue;
        }
        if let Some(value) = form.get(definition.id).and_then(|value| to_model_value(value, definition))
        {
            model.insert(definition.id, value);
        }
    }
    model
}

/// Converts one form value to its model encoding, `None` when empty.
#[must_use]
pub fn to_model_value(value: &FormValue, definition: &FieldDefinition) -> Option<String> {
    match value {
        FormValue::List(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| scalar_to_model(item, &definition.value_kind))
                .collect();
            (!parts.is_empty()).then(|| parts.join(&MULTIPLE_VALUE_SEPARATOR.to_string()))
        }
        scalar => scalar_to_model(scalar, &definition.value_kind),
    }
}

/// Encodes one scalar, coercing across kinds where unambiguous.
fn scalar_to_model(value: &FormValue, kind: &ValueKind) -> Option<String> {
    if value.is_empty() {
        return None;
    }
    match (kind, value) {
        (_, FormValue::List(items)) => items.iter().find_map(|item| scalar_to_model(item, kind)),
        (ValueKind::Boolean, FormValue::Boolean(flag)) => Some(flag.to_string()),
        (ValueKind::Boolean, FormValue::Integer(number)) => match number {
            0 => Some("false".to_string()),
            1 => Some("true".to_string()),
            _ => None,
        },
        (ValueKind::Boolean, FormValue::Text(text)) => {
            parse_boolean(text.trim()).map(|flag| flag.to_string())
        }
        (ValueKind::Integer, FormValue::Integer(number)) => Some(number.to_string()),
        (ValueKind::Integer, FormValue::Decimal(number)) => {
            parse_integer(&number.to_string()).map(|whole| whole.to_string())
        }
        (ValueKind::Integer, FormValue::Text(text)) => {
            parse_integer(text.trim()).map(|whole| whole.to_string())
        }
        (
            ValueKind::Decimal {
                ..
            },
            FormValue::Decimal(number),
        ) => number.is_finite().then(|| number.to_string()),
        (
            ValueKind::Decimal {
                ..
            },
            FormValue::Integer(number),
        ) => Some(number.to_string()),
        (
            ValueKind::Decimal {
                ..
            },
            FormValue::Text(text),
        ) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()).map(|n| n.to_string()),
        (ValueKind::Date, FormValue::Date(date)) => date.format(&Rfc3339).ok(),
        (ValueKind::Date, FormValue::Text(text)) => {
            parse_date(text.trim()).and_then(|date| date.format(&Rfc3339).ok())
        }
        (ValueKind::String, FormValue::Text(text)) => Some(text.clone()),
        (ValueKind::String, other) => Some(other.display()),
        (
            ValueKind::Qualitative {
                ..
            },
            FormValue::Qualitative(selected),
        ) => Some(selected.id.to_string()),
        (
            ValueKind::Qualitative {
                ..
            },
            FormValue::Integer(number),
        ) => u32::try_from(*number).ok().map(|id| id.to_string()),
        (
            ValueKind::Qualitative {
                ..
            },
            FormValue::Text(text),
        ) => text.trim().parse::<QualitativeValueId>().ok().map(|id| id.to_string()),
        _ => None,
    }
}

// ============================================================================
// SECTION: Entity Values
// ============================================================================

/// Returns entity values in model form, converting form-form values.
///
/// Form-form values of computed fields are converted too, since they
/// originate from the entity rather than from user input.
#[must_use]
pub fn model_values_of(values: &MeasurementValues, definitions: &DefinitionSet) -> ModelValueMap {
    match values {
        MeasurementValues::Model(model) => model.clone(),
        MeasurementValues::Form(form) => definitions
            .iter()
            .filter_map(|definition| {
                form.get(definition.id)
                    .and_then(|value| to_model_value(value, definition))
                    .map(|value| (definition.id, value))
            })
            .collect(),
    }
}

/// Returns entity values in form form for applying to a schema.
///
/// Fields without a value take their definition's default.
#[must_use]
pub fn form_values_for_apply(
    values: &MeasurementValues,
    definitions: &DefinitionSet,
) -> FormValueMap {
    definitions
        .iter()
        .map(|definition| {
            let current = match values {
                MeasurementValues::Model(model) => to_form_value(model.get(definition.id), definition),
                MeasurementValues::Form(form) => {
                    form.get(definition.id).cloned().unwrap_or_else(|| to_form_value(None, definition))
                }
            };
            let value = if current.is_empty() {
                definition
                    .default_value
                    .as_deref()
                    .map_or(current, |raw| to_form_value(Some(raw), definition))
            } else {
                current
            };
            (definition.id, value)
        })
        .collect()
}
