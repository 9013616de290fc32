// crates/measurement-sync-core/src/core/context.rs
// ============================================================================
// Module: Reconciliation Context
// Description: Program, acquisition level, strategy, and gear selection.
// Purpose: Decide when field definitions can be resolved and de-duplicate reloads.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! The [`Context`] selects which field definitions apply. It becomes
//! resolvable once the program label and acquisition level are set and every
//! piece marked required by policy is present. A resolved context is frozen
//! into a [`ResolvedContext`], whose value equality is the de-duplication key
//! for definition reloads, and whose [`ContextKey`] renders as
//! `program|acquisition|strategy|gear` with `null` for absent parts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::AcquisitionLevel;
use crate::core::identifiers::GearId;
use crate::core::identifiers::ProgramLabel;
use crate::core::identifiers::StrategyId;
use crate::core::identifiers::StrategyLabel;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Placeholder rendered in context keys for absent parts.
pub const KEY_NULL: &str = "null";

/// Separator between context key parts.
pub const KEY_SEPARATOR: char = '|';

// ============================================================================
// SECTION: Context
// ============================================================================

/// Mutable selection of program, acquisition level, strategy, and gear.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Program label.
    pub program_label: Option<ProgramLabel>,
    /// Acquisition level.
    pub acquisition_level: Option<AcquisitionLevel>,
    /// Strategy label.
    pub strategy_label: Option<StrategyLabel>,
    /// Strategy identifier, accepted in place of a label.
    pub strategy_id: Option<StrategyId>,
    /// Gear identifier.
    pub gear_id: Option<GearId>,
    /// Whether a strategy must be set before resolving.
    pub required_strategy: bool,
    /// Whether a gear must be set before resolving.
    pub required_gear: bool,
    /// Whether required definitions are relaxed to optional.
    pub force_optional: bool,
}

impl Context {
    /// Creates a context for a program and acquisition level.
    #[must_use]
    pub fn new(
        program_label: impl Into<ProgramLabel>,
        acquisition_level: impl Into<AcquisitionLevel>,
    ) -> Self {
        Self {
            program_label: Some(program_label.into()),
            acquisition_level: Some(acquisition_level.into()),
            ..Self::default()
        }
    }

    /// Returns true when a strategy label or id is set.
    #[must_use]
    pub const fn has_strategy(&self) -> bool {
        self.strategy_label.is_some() || self.strategy_id.is_some()
    }

    /// Returns true when every piece required by policy is present.
    #[must_use]
    pub const fn is_resolvable(&self) -> bool {
        self.program_label.is_some()
            && self.acquisition_level.is_some()
            && (!self.required_strategy || self.has_strategy())
            && (!self.required_gear || self.gear_id.is_some())
    }

    /// Freezes the context when it is resolvable.
    #[must_use]
    pub fn resolve(&self) -> Option<ResolvedContext> {
        self.is_resolvable().then(|| ResolvedContext(self.clone()))
    }

    /// Merges a patch, returning true when any field changed.
    pub fn apply(&mut self, patch: ContextPatch) -> bool {
        let before = self.clone();
        if let Some(value) = patch.program_label {
            self.program_label = value;
        }
        if let Some(value) = patch.acquisition_level {
            self.acquisition_level = value;
        }
        if let Some(value) = patch.strategy_label {
            self.strategy_label = value;
        }
        if let Some(value) = patch.strategy_id {
            self.strategy_id = value;
        }
        if let Some(value) = patch.gear_id {
            self.gear_id = value;
        }
        if let Some(value) = patch.required_strategy {
            self.required_strategy = value;
        }
        if let Some(value) = patch.required_gear {
            self.required_gear = value;
        }
        if let Some(value) = patch.force_optional {
            self.force_optional = value;
        }
        *self != before
    }
}

// ============================================================================
// SECTION: Context Patch
// ============================================================================

/// Partial update merged into a [`Context`].
///
/// Outer `None` keeps the current value; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextPatch {
    /// Program label update.
    pub program_label: Option<Option<ProgramLabel>>,
    /// Acquisition level update.
    pub acquisition_level: Option<Option<AcquisitionLevel>>,
    /// Strategy label update.
    pub strategy_label: Option<Option<StrategyLabel>>,
    /// Strategy id update.
    pub strategy_id: Option<Option<StrategyId>>,
    /// Gear id update.
    pub gear_id: Option<Option<GearId>>,
    /// Strategy requirement update.
    pub required_strategy: Option<bool>,
    /// Gear requirement update.
    pub required_gear: Option<bool>,
    /// Force-optional update.
    pub force_optional: Option<bool>,
}

impl ContextPatch {
    /// Creates an empty patch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the program label.
    #[must_use]
    pub fn program_label(mut self, value: impl Into<ProgramLabel>) -> Self {
        self.program_label = Some(Some(value.into()));
        self
    }

    /// Clears the program label.
    #[must_use]
    pub fn clear_program_label(mut self) -> Self {
        self.program_label = Some(None);
        self
    }

    /// Sets the acquisition level.
    #[must_use]
    pub fn acquisition_level(mut self, value: impl Into<AcquisitionLevel>) -> Self {
        self.acquisition_level = Some(Some(value.into()));
        self
    }

    /// Clears the acquisition level.
    #[must_use]
    pub fn clear_acquisition_level(mut self) -> Self {
        self.acquisition_level = Some(None);
        self
    }

    /// Sets the strategy label.
    #[must_use]
    pub fn strategy_label(mut self, value: impl Into<StrategyLabel>) -> Self {
        self.strategy_label = Some(Some(value.into()));
        self
    }

    /// Clears the strategy label.
    #[must_use]
    pub fn clear_strategy_label(mut self) -> Self {
        self.strategy_label = Some(None);
        self
    }

    /// Sets or clears the strategy id.
    #[must_use]
    pub const fn strategy_id(mut self, value: Option<StrategyId>) -> Self {
        self.strategy_id = Some(value);
        self
    }

    /// Sets or clears the gear id.
    #[must_use]
    pub const fn gear_id(mut self, value: Option<GearId>) -> Self {
        self.gear_id = Some(value);
        self
    }

    /// Sets the strategy requirement.
    #[must_use]
    pub const fn required_strategy(mut self, value: bool) -> Self {
        self.required_strategy = Some(value);
        self
    }

    /// Sets the gear requirement.
    #[must_use]
    pub const fn required_gear(mut self, value: bool) -> Self {
        self.required_gear = Some(value);
        self
    }

    /// Sets the force-optional flag.
    #[must_use]
    pub const fn force_optional(mut self, value: bool) -> Self {
        self.force_optional = Some(value);
        self
    }
}

// ============================================================================
// SECTION: Resolved Context
// ============================================================================

/// A context whose required pieces are all present.
///
/// # Invariants
/// - The wrapped context is resolvable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ResolvedContext(Context);

impl ResolvedContext {
    /// Returns the underlying context.
    #[must_use]
    pub const fn context(&self) -> &Context {
        &self.0
    }

    /// Returns the program label.
    #[must_use]
    pub fn program_label(&self) -> Option<&ProgramLabel> {
        self.0.program_label.as_ref()
    }

    /// Returns the acquisition level.
    #[must_use]
    pub fn acquisition_level(&self) -> Option<&AcquisitionLevel> {
        self.0.acquisition_level.as_ref()
    }

    /// Returns true when required definitions are relaxed to optional.
    #[must_use]
    pub const fn force_optional(&self) -> bool {
        self.0.force_optional
    }

    /// Renders the catalog key for this context.
    #[must_use]
    pub fn key(&self) -> ContextKey {
        let context = &self.0;
        let strategy = context
            .strategy_label
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| context.strategy_id.map(|id| id.to_string()));
        let parts = [
            context.program_label.as_ref().map(ToString::to_string),
            context.acquisition_level.as_ref().map(ToString::to_string),
            strategy,
            context.gear_id.map(|id| id.to_string()),
        ];
        let rendered = parts
            .iter()
            .map(|part| part.as_deref().unwrap_or(KEY_NULL))
            .collect::<Vec<_>>()
            .join(&KEY_SEPARATOR.to_string());
        ContextKey(rendered)
    }
}

/// Catalog key rendered from a resolved context.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a key from its rendered form.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ContextKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
