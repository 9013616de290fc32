// crates/measurement-sync-config/tests/common/mod.rs
// ============================================================================
// Module: Config Test Helpers
// Description: Shared builders for config validation tests.
// ============================================================================

#![allow(dead_code, reason = "Shared helpers are not used by every test binary.")]

use measurement_sync_config::ConfigError;
use measurement_sync_config::EngineConfig;

/// Result type used by config tests.
pub type TestResult = Result<(), String>;

/// Parses a minimal configuration with every section defaulted.
pub fn minimal_config() -> Result<EngineConfig, toml::de::Error> {
    toml::from_str("")
}

/// Asserts the result is an error whose message contains `needle`.
pub fn assert_invalid<T>(result: Result<T, ConfigError>, needle: &str) -> TestResult {
    match result {
        Err(error) => {
            let message = error.to_string();
            if message.contains(needle) {
                Ok(())
            } else {
                Err(format!("error {message} did not contain {needle}"))
            }
        }
        Ok(_) => Err("expected invalid config".to_string()),
    }
}
