//! Integration tests for wssc-core infrastructure

use wssc_core::{
    config_error, creation_error, init_logging, lookup_error, validation_error, ErrorContext,
    LogFormat, LoggingConfig, WsscConfig, WsscError,
};

#[test]
fn test_error_handling() {
    let error = creation_error!("Test creation error", "test_component");

    match &error {
        WsscError::SessionCreation {
            message, context, ..
        } => {
            assert_eq!(message, "Test creation error");
            assert_eq!(context.component, "test_component");
            assert!(!context.error_id.is_empty());
        }
        _ => panic!("Expected SessionCreation error"),
    }

    // Should not panic
    error.log();

    let lookup = lookup_error!("service url is blank", "outbound");
    assert!(!lookup.is_creation_error());
    assert!(!lookup.is_recoverable());

    let config = config_error!("Invalid config", "test");
    assert!(!config.is_recoverable());
    assert_eq!(config.context().unwrap().recovery_suggestions.len(), 2);

    let validation = validation_error!("bad value", "session.max_key_size", "test");
    match validation {
        WsscError::Validation { field, .. } => {
            assert_eq!(field.as_deref(), Some("session.max_key_size"))
        }
        _ => panic!("Expected Validation error"),
    }
}

#[test]
fn test_error_context_builder() {
    let context = ErrorContext::new("persist")
        .with_operation("find")
        .with_metadata("hash", "abc")
        .with_suggestion("retry later");

    assert_eq!(context.operation.as_deref(), Some("find"));
    assert_eq!(context.metadata.get("hash").map(String::as_str), Some("abc"));
    assert_eq!(context.recovery_suggestions, vec!["retry later".to_string()]);
}

#[test]
fn test_logging_initialization() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        format: LogFormat::Compact,
        include_location: false,
        include_thread: false,
        log_to_file: false,
        log_file_path: None,
        enable_span_timing: false,
        filter_directives: vec!["wssc_core=debug".to_string()],
    };

    // A global subscriber can only be installed once per process, so a second
    // call must fail cleanly rather than panic
    let _ = init_logging(&config);
    assert!(init_logging(&config).is_err());
}

#[test]
fn test_log_to_file_requires_path() {
    let config = LoggingConfig {
        log_to_file: true,
        log_file_path: None,
        ..LoggingConfig::default()
    };
    assert!(init_logging(&config).is_err());
}

#[test]
fn test_load_with_file_and_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wssc.toml");
    std::fs::write(
        &path,
        r#"
[session]
default_key_size = 16
sweep_interval_ms = 1000

[cluster]
cluster_sessions_enabled = true
"#,
    )
    .unwrap();

    let config = WsscConfig::load(Some(path.as_path())).unwrap();
    assert_eq!(config.session.default_key_size, 16);
    assert_eq!(config.session.max_key_size, 64);
    assert_eq!(config.session.sweep_interval_ms, 1000);
    assert!(config.cluster.cluster_sessions_enabled);
}

#[test]
fn test_load_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wssc.toml");
    std::fs::write(&path, "[session]\nsweep_interval_ms = 0\n").unwrap();

    assert!(matches!(
        WsscConfig::load(Some(path.as_path())),
        Err(WsscError::Config { .. })
    ));
}

#[test]
fn test_maintenance_interval_follows_config() {
    let mut config = WsscConfig::default();
    assert_eq!(
        config.cluster.maintenance_interval(),
        std::time::Duration::from_secs(600)
    );

    config.cluster.maintenance_interval_ms = 250;
    assert_eq!(
        config.cluster.maintenance_interval(),
        std::time::Duration::from_millis(250)
    );
}
