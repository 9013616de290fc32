// crates/measurement-sync-config/src/lib.rs
// ============================================================================
// Module: Measurement Sync Config Library
// Description: Canonical config model, validation, and example generation.
// Purpose: Single source of truth for measurement-sync.toml semantics.
// Dependencies: measurement-sync-core, serde, toml
// ============================================================================

//! ## Overview
//! `measurement-sync-config` defines the canonical configuration model for
//! the measurement synchronization engine. It provides strict, fail-closed
//! validation and converts into the core's reconciler and table options.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
