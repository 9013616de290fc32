//! Config load validation tests for measurement-sync-config.
// crates/measurement-sync-config/tests/load_validation.rs
// =============================================================================
// Module: Config Load Validation Tests
// Description: Validate config loading guards (path, size, encoding, syntax).
// Purpose: Ensure config input handling is strict and fail-closed.
// =============================================================================

use std::io::Write;
use std::path::Path;

use measurement_sync_config::EngineConfig;
use measurement_sync_config::LogSinkKind;
use tempfile::NamedTempFile;

mod common;

use crate::common::TestResult;
use crate::common::assert_invalid;

#[test]
fn load_rejects_path_too_long() -> TestResult {
    let long_path = "a".repeat(5_000);
    let path = Path::new(&long_path);
    assert_invalid(EngineConfig::load(Some(path)), "config path exceeds max length")
}

#[test]
fn load_rejects_path_component_too_long() -> TestResult {
    let long_component = "a".repeat(300);
    let path = Path::new(&long_component);
    assert_invalid(EngineConfig::load(Some(path)), "config path component too long")
}

#[test]
fn load_reports_missing_file_as_io_error() -> TestResult {
    let dir = tempfile::tempdir().map_err(|err| err.to_string())?;
    let path = dir.path().join("missing.toml");
    assert_invalid(EngineConfig::load(Some(&path)), "config io error")
}

#[test]
fn load_rejects_oversized_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    let payload = vec![b'#'; 1_048_577];
    file.write_all(&payload).map_err(|err| err.to_string())?;
    assert_invalid(EngineConfig::load(Some(file.path())), "config file exceeds size limit")
}

#[test]
fn load_rejects_non_utf8_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(&[0xFF, 0xFE, 0xFF]).map_err(|err| err.to_string())?;
    assert_invalid(EngineConfig::load(Some(file.path())), "config file must be utf-8")
}

#[test]
fn load_rejects_unknown_sections() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[server]\nbind = \"127.0.0.1:0\"\n").map_err(|err| err.to_string())?;
    assert_invalid(EngineConfig::load(Some(file.path())), "config parse error")
}

#[test]
fn load_reads_a_valid_file() -> TestResult {
    let mut file = NamedTempFile::new().map_err(|err| err.to_string())?;
    file.write_all(b"[context]\nprogram_label = \"SIH-OBSBIO\"\n\n[logging]\nsink = \"memory\"\n")
        .map_err(|err| err.to_string())?;
    let config = EngineConfig::load(Some(file.path())).map_err(|err| err.to_string())?;
    if config.context.program_label.as_deref() != Some("SIH-OBSBIO") {
        return Err("program label not loaded".to_string());
    }
    if config.logging.sink != LogSinkKind::Memory {
        return Err("log sink not loaded".to_string());
    }
    Ok(())
}
