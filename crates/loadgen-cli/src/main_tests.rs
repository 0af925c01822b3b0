// crates/loadgen-cli/src/main_tests.rs
// ============================================================================
// Module: CLI Main Helpers Tests
// Description: Unit tests for flag parsing and config resolution.
// Purpose: Ensure flags override file values the same way for every command.
// Dependencies: clap, loadgen-cli main helpers, tempfile
// ============================================================================

//! ## Overview
//! Parses argument vectors through clap and checks the resulting config,
//! matrix settings, and error paths.

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

use std::fs;
use std::path::PathBuf;

use clap::CommandFactory;
use clap::Parser;
use loadgen_core::CrudMix;

use super::AnalyzeCommand;
use super::Cli;
use super::CliError;
use super::Commands;
use super::MatrixCommand;
use super::RunCommand;
use super::command_analyze;
use super::parse_crud;
use super::resolve_analyze_dir;
use super::resolve_matrix;
use super::resolve_run_config;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const CONFIG: &str = r#"
[run]
duration_secs = 20
doc_size = 128

[[databases]]
name = "orders"
workers = 2
connections = 2

[matrix]
databases = [1, 2]
connections = [1]
workers = [1, 4]
output_dir = "sweep"
"#;

fn write_config(dir: &tempfile::TempDir) -> PathBuf {
    let path = dir.path().join("loadgen.toml");
    fs::write(&path, CONFIG).unwrap();
    path
}

fn parse(args: &[&str]) -> Commands {
    Cli::try_parse_from(args).unwrap().command
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn command_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn crud_flag_parses_four_percentages() {
    assert_eq!(parse_crud("10, 70,10,10").unwrap(), CrudMix::new(10, 70, 10, 10).unwrap());
    assert!(parse_crud("10,70,10").is_err());
    assert!(parse_crud("10,70,10,x").is_err());
    assert!(parse_crud("50,50,50,50").is_err());
}

#[test]
fn run_flags_override_the_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir);
    let path_arg = path.display().to_string();
    let Commands::Run(command) = parse(&[
        "loadgen",
        "run",
        "--config",
        &path_arg,
        "--databases",
        "db1,db2",
        "--workers",
        "3",
        "--connections",
        "5",
        "--duration",
        "7",
        "--crud",
        "25,25,25,25",
        "--store",
        "127.0.0.1:9999",
    ]) else {
        panic!("expected run command");
    };
    let config = resolve_run_config(&command).unwrap();
    let names: Vec<&str> = config.databases.iter().map(|db| db.name.as_str()).collect();
    assert_eq!(names, vec!["db1", "db2"]);
    assert!(config.databases.iter().all(|db| db.workers == 3 && db.connections == 5));
    assert_eq!(config.run.duration_secs, 7);
    assert_eq!(config.run.doc_size, 128);
    assert_eq!(config.crud, Some(CrudMix::new(25, 25, 25, 25).unwrap()));
    assert_eq!(config.store.address, "127.0.0.1:9999");
}

#[test]
fn invalid_override_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let command = RunCommand {
        config: Some(write_config(&dir)),
        workers: Some(0),
        ..RunCommand::default()
    };
    assert!(matches!(resolve_run_config(&command), Err(CliError::Config(_))));
}

#[test]
fn matrix_flags_override_the_matrix_section() {
    let dir = tempfile::tempdir().unwrap();
    let command = MatrixCommand {
        config: Some(write_config(&dir)),
        workers: Some(vec![2, 8]),
        duration: Some(3),
        restart_server: true,
        no_summary: true,
        doc_count: Some(77),
        ..MatrixCommand::default()
    };
    let (settings, config) = resolve_matrix(&command).unwrap();
    assert_eq!(config.matrix.databases, vec![1, 2]);
    assert_eq!(config.matrix.workers, vec![2, 8]);
    assert_eq!(settings.output_dir, PathBuf::from("sweep"));
    assert_eq!(settings.duration_secs, 3);
    assert!(settings.restart_server);
    assert!(settings.persist_results);
    assert!(!settings.write_summary);
    assert_eq!(settings.workload.doc_count, Some(77));
}

#[test]
fn matrix_list_flags_split_on_commas() {
    let Commands::Matrix(command) =
        parse(&["loadgen", "matrix", "--databases", "1,2,4", "--no-persist"])
    else {
        panic!("expected matrix command");
    };
    assert_eq!(command.databases, Some(vec![1, 2, 4]));
    assert!(command.no_persist);
}

#[test]
fn analyze_prefers_the_explicit_directory() {
    let dir = tempfile::tempdir().unwrap();
    let command = AnalyzeCommand {
        config: Some(write_config(&dir)),
        dir: Some(PathBuf::from("elsewhere")),
    };
    assert_eq!(resolve_analyze_dir(&command).unwrap(), PathBuf::from("elsewhere"));
    let command = AnalyzeCommand {
        config: Some(write_config(&dir)),
        dir: None,
    };
    assert_eq!(resolve_analyze_dir(&command).unwrap(), PathBuf::from("sweep"));
}

#[test]
fn analyze_without_results_fails() {
    let dir = tempfile::tempdir().unwrap();
    let command = AnalyzeCommand {
        config: None,
        dir: Some(dir.path().to_path_buf()),
    };
    assert!(matches!(command_analyze(&command), Err(CliError::Matrix(_))));
}
