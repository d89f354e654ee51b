//! Integration tests for the layered configuration system

use deferred_prover::computation::{Priority, TriggerPolicy};
use deferred_prover::config::{ConfigLoader, ProverConfig};
use deferred_prover::error::ConfigError;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use crate::integration::with_isolated_env;

fn write_global(home: &Path, contents: &str) {
    let dir = home.join(".config").join("deferred-prover");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("config.toml"), contents).unwrap();
}

fn write_workspace(workspace: &Path, name: &str, contents: &str) {
    let dir = workspace.join("config");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(name), contents).unwrap();
}

#[test]
fn test_load_without_any_files_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();

    let config = with_isolated_env(&temp_dir, &[], |_home| ConfigLoader::load(&workspace).unwrap());
    assert_eq!(config, ProverConfig::default());
}

#[test]
fn test_global_config_path_follows_home() {
    let temp_dir = TempDir::new().unwrap();
    with_isolated_env(&temp_dir, &[], |home| {
        assert_eq!(
            ConfigLoader::global_config_path().unwrap(),
            home.join(".config").join("deferred-prover").join("config.toml")
        );
    });
}

#[test]
fn test_workspace_overrides_global() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();

    let config = with_isolated_env(&temp_dir, &[], |home| {
        write_global(
            home,
            r#"
[scheduler]
max_concurrent = 3
max_queue_size = 50

[prefetch]
max_prefetch = 9
"#,
        );
        write_workspace(
            &workspace,
            "config.toml",
            r#"
[scheduler]
max_concurrent = 6
"#,
        );
        ConfigLoader::load(&workspace).unwrap()
    });

    assert_eq!(config.scheduler.max_concurrent, 6);
    assert_eq!(config.scheduler.max_queue_size, 50);
    assert_eq!(config.prefetch.max_prefetch, 9);
}

#[test]
fn test_env_specific_file_overrides_base() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();

    write_workspace(
        &workspace,
        "config.toml",
        r#"
[computation]
priority = "low"
trigger = "on-serialize"
"#,
    );
    write_workspace(
        &workspace,
        "ci.toml",
        r#"
[computation]
priority = "critical"
"#,
    );

    let config = with_isolated_env(&temp_dir, &[("DEFERRED_PROVER_ENV", "ci")], |_home| {
        ConfigLoader::load(&workspace).unwrap()
    });
    assert_eq!(config.computation.priority, Priority::Critical);
    assert_eq!(config.computation.trigger, TriggerPolicy::OnSerialize);
}

#[test]
fn test_environment_variables_override_files() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("workspace");
    write_workspace(
        &workspace,
        "config.toml",
        r#"
[scheduler]
max_concurrent = 4
"#,
    );

    let config = with_isolated_env(
        &temp_dir,
        &[
            ("DEFERRED_PROVER__SCHEDULER__MAX_CONCURRENT", "12"),
            ("DEFERRED_PROVER__SCHEDULER__AUTO_PROCESS", "false"),
        ],
        |_home| ConfigLoader::load(&workspace).unwrap(),
    );
    assert_eq!(config.scheduler.max_concurrent, 12);
    assert!(!config.scheduler.auto_process);
}

#[test]
fn test_load_validated_reports_every_problem() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("workspace");
    write_workspace(
        &workspace,
        "config.toml",
        r#"
[scheduler]
max_concurrent = 0

[prefetch]
likelihood_threshold = 2.0
"#,
    );

    let err = with_isolated_env(&temp_dir, &[], |_home| {
        ConfigLoader::load_validated(&workspace).unwrap_err()
    });
    match err {
        ConfigError::Invalid(message) => {
            assert!(message.contains("Scheduler: max_concurrent must be at least 1"));
            assert!(message.contains("Prefetch: likelihood_threshold"));
        }
        other => panic!("expected validation failure, got {other}"),
    }
}

#[test]
fn test_malformed_file_is_a_load_error() {
    let temp_dir = TempDir::new().unwrap();
    let workspace = temp_dir.path().join("workspace");
    write_workspace(
        &workspace,
        "config.toml",
        r#"
[scheduler]
max_concurrent = "many"
"#,
    );

    let result = with_isolated_env(&temp_dir, &[], |_home| ConfigLoader::load(&workspace));
    assert!(matches!(result, Err(ConfigError::Load(_))));
}
