use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_default_config_values() {
    let config = Config::default();
    assert_eq!(config.compiler.command, "csc");
    assert_eq!(config.host.command, "dotnet");
    assert_eq!(config.host.args, vec!["exec".to_string()]);
    assert_eq!(config.ipc.queue_capacity, DEFAULT_IPC_QUEUE_CAPACITY);
    assert_eq!(config.ipc.worker_count, DEFAULT_IPC_WORKER_COUNT);
    assert_eq!(config.ipc.join_timeout_ms, DEFAULT_IPC_JOIN_TIMEOUT_MS);
    assert_eq!(
        config.process_limits.stop_grace_period_ms,
        DEFAULT_STOP_GRACE_PERIOD_MS
    );
    assert!(config.process_limits.max_runtime().is_none());
    assert_eq!(config.default_framework, DEFAULT_FRAMEWORK);
}

#[test]
fn test_partial_config_uses_defaults_for_missing_fields() {
    let json = r#"{
        "host": { "command": "/usr/bin/dotnet" },
        "ipc": { "workerCount": 3 },
        "processLimits": { "maxRuntimeSeconds": 30 }
    }"#;
    let config: Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.host.command, "/usr/bin/dotnet");
    assert_eq!(config.host.args, vec!["exec".to_string()]);
    assert_eq!(config.ipc.worker_count, 3);
    assert_eq!(config.ipc.queue_capacity, DEFAULT_IPC_QUEUE_CAPACITY);
    assert_eq!(
        config.process_limits.max_runtime(),
        Some(std::time::Duration::from_secs(30))
    );
    assert_eq!(config.compiler, CompilerConfig::default());
}

#[test]
fn test_config_serialization_is_camel_case() {
    let config = Config::default();
    let json = serde_json::to_string(&config).unwrap();
    assert!(json.contains("\"processLimits\""));
    assert!(json.contains("\"queueCapacity\""));
    assert!(json.contains("\"defaultFramework\""));
    assert!(!json.contains("\"workingDir\""));
}

#[test]
fn test_tilde_paths_are_expanded() {
    let config = Config {
        working_dir: Some("~/runs".to_string()),
        ..Config::default()
    };
    assert!(!config.working_dir().to_string_lossy().starts_with('~'));
    assert!(config.working_dir().ends_with("runs"));
}

#[test]
fn test_load_config_from_missing_file_returns_default() {
    let config = load_config_from(std::path::Path::new("/nonexistent/scriptpad/config.json"));
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_config_from_invalid_json_returns_default() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{{ not json").unwrap();
    let config = load_config_from(file.path());
    assert_eq!(config, Config::default());
}

#[test]
fn test_load_config_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"compiler": {{"command": "mcs", "args": []}}, "builtinAssemblies": ["/opt/lib/Helpers.dll"]}}"#
    )
    .unwrap();
    let config = load_config_from(file.path());
    assert_eq!(config.compiler.command, "mcs");
    assert!(config.compiler.args.is_empty());
    assert_eq!(
        config.builtin_assembly_paths(),
        vec![std::path::PathBuf::from("/opt/lib/Helpers.dll")]
    );
}
