//! Integration tests for linkpack-config
//!
//! Verifies config file loading against real files on disk.

use std::path::PathBuf;
use tempfile::tempdir;

use linkpack_config::{Config, ConfigError};

#[test]
fn load_full_config_from_file() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");

    let config_content = r#"
[scan]
concurrent_ops = 6
tree_depth = 12

[link]
min_file_size = 4096
ref_size = 3
ignore_mtime = true

[refs]
file = "/var/cache/linkpack/refs.json"
"#;
    std::fs::write(&path, config_content).unwrap();

    let config = Config::load_file(&path).unwrap();
    assert_eq!(config.scan.concurrent_ops, 6);
    assert_eq!(config.scan.tree_depth, 12);
    assert_eq!(config.link.min_file_size, 4096);
    assert_eq!(config.link.ref_size, 3);
    assert!(config.link.ignore_mtime);
    assert_eq!(
        config.refs.file,
        PathBuf::from("/var/cache/linkpack/refs.json")
    );
}

#[test]
fn malformed_toml_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[scan\nconcurrent_ops = ").unwrap();

    let err = Config::load_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

#[test]
fn unknown_sections_are_ignored() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[future]\nshiny = true\n").unwrap();

    let config = Config::load_file(&path).unwrap();
    config.validate().unwrap();
}
