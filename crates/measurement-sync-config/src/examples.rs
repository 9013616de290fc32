// crates/measurement-sync-config/src/examples.rs
// ============================================================================
// Module: Config Examples
// Description: Canonical example configuration payloads.
// Purpose: Deterministic examples for docs and tooling.
// Dependencies: std
// ============================================================================

//! ## Overview
//! Canonical example for measurement sync configuration. The output is
//! deterministic and must always pass [`crate::EngineConfig::validate`].

/// Returns a canonical example `measurement-sync.toml` configuration.
#[must_use]
pub fn config_toml_example() -> String {
    String::from(
        r#"[context]
program_label = "SIH-OBSBIO"
acquisition_level = "TRIP"
# strategy_label = "OBSMER"
# gear_id = 12
required_strategy = false
required_gear = false
force_optional = false
force_optional_excluded = [12, 14]

[extraction]
skip_disabled = true
skip_computed = true

[schema]
with_typename = true

[table]
leading_columns = ["select", "id"]
trailing_columns = ["comments", "actions"]
can_edit_rank = false

[logging]
sink = "tracing"
"#,
    )
}
