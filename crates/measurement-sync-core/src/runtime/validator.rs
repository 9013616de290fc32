// crates/measurement-sync-core/src/runtime/validator.rs
// ============================================================================
// Module: Default Validators
// Description: Kind, requirement, and precision checks built from definitions.
// Purpose: Provide the validator factory used when callers supply none.
// Dependencies: crate::core, crate::interfaces
// ============================================================================

//! ## Overview
//! The default factory builds one [`FieldRules`] validator per definition.
//! Computed fields get no validator because users never edit them. For
//! multi-valued fields the requirement applies to the list as a whole and the
//! kind checks apply to each non-empty item.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use crate::core::FieldDefinition;
use crate::core::FormValue;
use crate::core::ValueKind;
use crate::interfaces::FieldValidator;
use crate::interfaces::ValidationIssue;
use crate::interfaces::ValidatorError;
use crate::interfaces::ValidatorFactory;

// ============================================================================
// SECTION: Factory
// ============================================================================

/// Validator factory deriving rules from each definition.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultValidatorFactory;

impl ValidatorFactory for DefaultValidatorFactory {
    fn build(
        &self,
        definition: &FieldDefinition,
    ) -> Result<Option<Arc<dyn FieldValidator>>, ValidatorError> {
        if definition.computed {
            return Ok(None);
        }
        if let ValueKind::Qualitative {
            values,
        } = &definition.value_kind
            && values.is_empty()
        {
            return Err(ValidatorError::Build(format!(
                "qualitative field {} has no allowed values",
                definition.id
            )));
        }
        Ok(Some(Arc::new(FieldRules {
            kind: definition.value_kind.clone(),
            required: definition.required,
        })))
    }
}

// ============================================================================
// SECTION: Rules
// ============================================================================

/// Requirement and kind rules for one field.
#[derive(Debug, Clone)]
pub struct FieldRules {
    /// Expected value kind.
    kind: ValueKind,
    /// Whether a value must be present.
    required: bool,
}

impl FieldRules {
    /// Checks one non-empty scalar against the kind.
    fn check_scalar(&self, value: &FormValue, issues: &mut Vec<ValidationIssue>) {
        let matches = match (&self.kind, value) {
            (ValueKind::Boolean, FormValue::Boolean(_))
            | (ValueKind::Integer, FormValue::Integer(_))
            | (ValueKind::Date, FormValue::Date(_))
            | (ValueKind::String, FormValue::Text(_))
            | (ValueKind::Decimal { .. }, FormValue::Integer(_)) => true,
            (
                ValueKind::Decimal {
                    precision,
                },
                FormValue::Decimal(number),
            ) => {
                if let Some(max) = precision
                    && fraction_digits(*number) > usize::from(*max)
                {
                    issues.push(ValidationIssue::Precision {
                        max: *max,
                    });
                }
                true
            }
            (
                ValueKind::Qualitative {
                    values,
                },
                FormValue::Qualitative(selected),
            ) => {
                if !values.iter().any(|allowed| allowed.id == selected.id) {
                    issues.push(ValidationIssue::UnknownQualitativeValue {
                        value: selected.id,
                    });
                }
                true
            }
            _ => false,
        };
        if !matches {
            issues.push(ValidationIssue::KindMismatch {
                expected: self.kind.name(),
            });
        }
    }
}

impl FieldValidator for FieldRules {
    fn validate(&self, value: &FormValue) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if value.is_empty() {
            if self.required {
                issues.push(ValidationIssue::Required);
            }
            return issues;
        }
        match value {
            FormValue::List(items) => {
                for item in items.iter().filter(|item| !item.is_empty()) {
                    self.check_scalar(item, &mut issues);
                }
            }
            scalar => self.check_scalar(scalar, &mut issues),
        }
        issues
    }
}

/// Counts fraction digits in the shortest decimal rendering of a number.
fn fraction_digits(number: f64) -> usize {
    let rendered = number.to_string();
    rendered.split_once('.').map_or(0, |(_, fraction)| fraction.len())
}
