use sandcell::{Config, EXAMPLE_CONFIG};

#[test]
fn embedded_example_config_is_valid() {
    let config = Config::parse_toml(EXAMPLE_CONFIG).expect("example config should parse");
    assert!(config.pool_size >= 1);
    assert!(!config.interpreter.is_empty());
    assert!(config.default_limits.wall_time.is_some());
}

#[tokio::test]
async fn config_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sandcell.toml");
    tokio::fs::write(&path, EXAMPLE_CONFIG).await.unwrap();

    let from_file = Config::from_file(&path).expect("config file should load");
    let embedded = Config::default();

    assert_eq!(from_file.pool_size, embedded.pool_size);
    assert_eq!(from_file.interpreter, embedded.interpreter);
    assert_eq!(
        from_file.default_limits.wall_time,
        embedded.default_limits.wall_time
    );
    assert_eq!(from_file.sandbox_mounts.len(), embedded.sandbox_mounts.len());
}

#[test]
fn loading_a_missing_file_fails() {
    assert!(Config::from_file("/definitely/not/a/config.toml").is_err());
}

#[test]
fn overrides_in_a_partial_file_apply_over_defaults() {
    let toml = r#"
pool_size = 7

[default_limits]
wall_time = 12.0
"#;
    let config = Config::parse_toml(toml).expect("partial config should parse");
    assert_eq!(config.pool_size, 7);
    assert_eq!(config.default_limits.wall_time, Some(12.0));
    // Unspecified fields use the built-in defaults
    assert_eq!(config.queue_depth, 8);
    assert_eq!(config.uid, 65534);
}
