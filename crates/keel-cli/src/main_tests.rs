// crates/keel-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for argument parsing and config overrides.
// Purpose: Ensure command-line values land in the validated configuration.
// Dependencies: keel-cli main helpers
// ============================================================================

//! ## Overview
//! Validates argument parsing, override precedence and run tags.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only output and panic-based assertions are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use clap::Parser;
use keel_config::KeelConfig;

use super::Cli;
use super::Commands;
use super::apply_overrides;
use super::run_tag;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn single_overrides_path_and_sizing() {
    let cli = Cli::try_parse_from([
        "keel",
        "single",
        "--path",
        "/tmp/keel-test.db",
        "--threads",
        "2",
        "--operations",
        "7",
    ])
    .unwrap();
    let mut config = KeelConfig::default();
    apply_overrides(&mut config, &cli.command);
    assert_eq!(config.single.path, Path::new("/tmp/keel-test.db"));
    assert_eq!(config.workload.threads, 2);
    assert_eq!(config.workload.operations, 7);
    assert!(config.validate().is_ok());
}

#[test]
fn multi_overrides_directory_only() {
    let cli = Cli::try_parse_from(["keel", "multi", "--directory", "/srv/keel"]).unwrap();
    let mut config = KeelConfig::default();
    apply_overrides(&mut config, &cli.command);
    assert_eq!(config.multi.directory, Path::new("/srv/keel"));
    assert_eq!(config.workload, KeelConfig::default().workload);
}

#[test]
fn zero_threads_fail_validation_after_override() {
    let cli = Cli::try_parse_from(["keel", "thread-modes", "--threads", "0"]).unwrap();
    assert!(matches!(cli.command, Commands::ThreadModes(_)));
    let mut config = KeelConfig::default();
    apply_overrides(&mut config, &cli.command);
    assert!(config.validate().is_err());
}

#[test]
fn global_flags_parse_after_subcommand() {
    let cli =
        Cli::try_parse_from(["keel", "single", "--config", "keel.toml", "--log", "debug"]).unwrap();
    assert_eq!(cli.config.as_deref(), Some(Path::new("keel.toml")));
    assert_eq!(cli.log.as_deref(), Some("debug"));
}

#[test]
fn missing_subcommand_is_rejected() {
    assert!(Cli::try_parse_from(["keel"]).is_err());
}

#[test]
fn run_tags_are_prefixed_hex() {
    let tag = run_tag();
    assert!(tag.starts_with("run"));
    assert!(tag[3 ..].chars().all(|c| c.is_ascii_hexdigit()));
}
