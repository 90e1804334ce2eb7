//! Layered configuration loading

use clusterflow::config::ConfigLoader;
use clusterflow::engine::BarrierMode;
use clusterflow::error::EngineError;
use clusterflow::logging::{LogFormat, LogOutput};
use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_full_file_is_loaded() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("clusterflow.toml");
    fs::write(
        &path,
        r#"
[engine]
host_id = "cp-east-1"
bus_subject = "installer.tasks"
timeout_threshold = 3
barrier_mode = "wait_for_first"

[storage]
path = "/srv/clusterflow"

[logging]
level = "debug"
format = "json"
output = "stdout"
"#,
    )
    .unwrap();

    let config = ConfigLoader::load_from_file(&path).unwrap();
    assert_eq!(config.engine.host_id, "cp-east-1");
    assert_eq!(config.engine.bus_subject, "installer.tasks");
    assert_eq!(config.engine.timeout_threshold, 3);
    assert_eq!(config.engine.barrier_mode, BarrierMode::WaitForFirst);
    assert_eq!(config.engine.node_timeout_secs, 60);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.logging.output, LogOutput::Stdout);

    let settings = config.engine.to_settings();
    assert_eq!(settings.timeout_threshold, 3);
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::load_from_file(&temp_dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::ConfigError(ref msg) if msg.contains("absent.toml")));
}

#[test]
fn test_malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    fs::write(&path, "[engine\nhost_id = ").unwrap();
    assert!(matches!(
        ConfigLoader::load_from_file(&path),
        Err(EngineError::ConfigError(_))
    ));
}

#[test]
fn test_environment_wins_over_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("clusterflow.toml");
    fs::write(&path, "[engine]\nhost_id = \"from-file\"\ntimeout_threshold = 2\n").unwrap();

    let mut env = HashMap::new();
    env.insert("CLUSTERFLOW__ENGINE__HOST_ID".to_string(), "from-env".to_string());
    let config = ConfigLoader::load_with_env(Some(&path), Some(env)).unwrap();

    assert_eq!(config.engine.host_id, "from-env");
    assert_eq!(config.engine.timeout_threshold, 2);
}

#[test]
fn test_empty_host_id_fails_validation() {
    let mut env = HashMap::new();
    env.insert("CLUSTERFLOW__ENGINE__HOST_ID".to_string(), " ".to_string());
    let err = ConfigLoader::load_with_env(None, Some(env)).unwrap_err();
    assert!(matches!(err, EngineError::ConfigError(ref msg) if msg.contains("host_id")));
}
