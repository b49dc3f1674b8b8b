//! Configuration loading tests
//!
//! Uses serial_test for tests that manipulate environment variables.

use serde::Deserialize;
use serial_test::serial;
use std::env;
use std::io::Write;
use wrap_common::config::{load_toml_or_default, resolve_config_path, resolve_secret, LoggingConfig};

#[derive(Debug, Default, Deserialize)]
struct SampleConfig {
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[test]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config: SampleConfig =
        load_toml_or_default(Some(&dir.path().join("absent.toml"))).unwrap();
    assert!(config.port.is_none());
}

#[test]
fn test_existing_file_is_parsed() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = 4000\n[logging]\nlevel = \"debug\"").unwrap();

    let config: SampleConfig = load_toml_or_default(Some(file.path())).unwrap();
    assert_eq!(config.port, Some(4000));
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_broken_file_is_an_error() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "port = \"not a number").unwrap();

    let result: wrap_common::Result<SampleConfig> = load_toml_or_default(Some(file.path()));
    assert!(matches!(result, Err(wrap_common::Error::Config(_))));
}

#[test]
fn test_unreadable_path_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory exists but cannot be read as a file
    let result: wrap_common::Result<SampleConfig> = load_toml_or_default(Some(dir.path()));
    assert!(matches!(result, Err(wrap_common::Error::Config(_))));
}

#[test]
#[serial]
fn test_env_config_path_used_without_cli_arg() {
    env::set_var("WRAP_TEST_CONFIG", "/tmp/from-env.toml");
    let path = resolve_config_path(None, "WRAP_TEST_CONFIG", "wrap-api");
    env::remove_var("WRAP_TEST_CONFIG");
    assert_eq!(path, Some("/tmp/from-env.toml".into()));
}

#[test]
#[serial]
fn test_secret_prefers_environment() {
    env::set_var("WRAP_TEST_SECRET", "from-env");
    assert_eq!(
        resolve_secret("WRAP_TEST_SECRET", Some("from-toml")),
        Some("from-env".to_string())
    );

    env::set_var("WRAP_TEST_SECRET", "   ");
    assert_eq!(
        resolve_secret("WRAP_TEST_SECRET", Some("from-toml")),
        Some("from-toml".to_string())
    );

    env::remove_var("WRAP_TEST_SECRET");
    assert_eq!(resolve_secret("WRAP_TEST_SECRET", None), None);
}
