//! Unit tests for configuration parsing and the error type.

use std::time::Duration;

use approver_policy::config::{ControllerConfig, GlobalConfig};
use approver_policy::AppError;

const MINIMAL: &str = r#"manifests_dir = "/etc/approver/manifests""#;

#[test]
fn minimal_config_uses_defaults() {
    let config = GlobalConfig::from_toml_str(MINIMAL).expect("valid config");
    assert_eq!(config.manifests_dir().to_str(), Some("/etc/approver/manifests"));
    assert!(config.db_path.is_none());
    assert_eq!(config.http_port, 8080);
    assert_eq!(config.controller, ControllerConfig::default());
    assert!(config.plugins.is_empty());

    let c = &config.controller;
    assert_eq!(c.request_workers, 4);
    assert_eq!(c.policy_workers, 2);
    assert_eq!(c.reconcile_timeout(), Duration::from_secs(30));
    assert_eq!(c.backoff_base(), Duration::from_millis(5));
    assert_eq!(c.backoff_max(), Duration::from_secs(300));
}

#[test]
fn full_config_parses() {
    let raw = r#"
manifests_dir = "manifests"
db_path = "data/approver.db"
http_port = 9443

[controller]
request_workers = 8
policy_workers = 1
reconcile_timeout_seconds = 5
backoff_base_millis = 100
backoff_max_seconds = 60

[[plugins]]
name = "venafi"
endpoint = "http://127.0.0.1:9000"
timeout_seconds = 3

[[plugins]]
name = "audit"
endpoint = "https://audit.internal"
"#;
    let config = GlobalConfig::from_toml_str(raw).expect("valid config");
    assert_eq!(config.http_port, 9443);
    assert_eq!(config.controller.request_workers, 8);
    assert_eq!(config.controller.reconcile_timeout(), Duration::from_secs(5));
    assert_eq!(config.plugins.len(), 2);
    assert_eq!(config.plugins[0].timeout(), Duration::from_secs(3));
    assert_eq!(config.plugins[1].timeout(), Duration::from_secs(10));
}

fn rejected(raw: &str) -> String {
    match GlobalConfig::from_toml_str(raw) {
        Err(AppError::Config(msg)) => msg,
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn missing_manifests_dir_is_rejected() {
    rejected("http_port = 80");
}

#[test]
fn zero_workers_are_rejected() {
    let msg = rejected(&format!("{MINIMAL}\n[controller]\nrequest_workers = 0\n"));
    assert!(msg.contains("workers"), "{msg}");
}

#[test]
fn backoff_base_above_max_is_rejected() {
    let msg = rejected(&format!(
        "{MINIMAL}\n[controller]\nbackoff_base_millis = 5000\nbackoff_max_seconds = 1\n"
    ));
    assert!(msg.contains("backoff"), "{msg}");
}

#[test]
fn plugin_names_must_not_shadow_builtins() {
    let msg = rejected(&format!(
        "{MINIMAL}\n[[plugins]]\nname = \"allowed\"\nendpoint = \"http://x\"\n"
    ));
    assert!(msg.contains("built-in"), "{msg}");
}

#[test]
fn duplicate_plugins_are_rejected() {
    let plugin = "[[plugins]]\nname = \"p\"\nendpoint = \"http://x\"\n";
    let msg = rejected(&format!("{MINIMAL}\n{plugin}{plugin}"));
    assert!(msg.contains("duplicate"), "{msg}");
}

#[test]
fn plugin_endpoint_must_be_http() {
    let msg = rejected(&format!(
        "{MINIMAL}\n[[plugins]]\nname = \"p\"\nendpoint = \"unix:///tmp/sock\"\n"
    ));
    assert!(msg.contains("http"), "{msg}");
}

#[test]
fn load_from_missing_path_is_config_error() {
    let err = GlobalConfig::load_from_path("/definitely/not/here.toml").expect_err("missing");
    assert!(matches!(err, AppError::Config(_)), "{err:?}");
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("config.toml");
    std::fs::write(&path, MINIMAL).expect("write");
    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.http_port, 8080);
}

#[test]
fn retryable_classification() {
    for err in [
        AppError::Db("x".into()),
        AppError::Authorization("x".into()),
        AppError::Approver("x".into()),
        AppError::Cancelled("x".into()),
        AppError::DeadlineExceeded("x".into()),
        AppError::NotFound("x".into()),
        AppError::Io("x".into()),
    ] {
        assert!(err.is_retryable(), "{err}");
    }
    for err in [
        AppError::Config("x".into()),
        AppError::Policy("x".into()),
        AppError::UnknownPlugin("x".into()),
        AppError::AlreadyDecided("x".into()),
        AppError::Invalid("x".into()),
    ] {
        assert!(!err.is_retryable(), "{err}");
    }
}

#[test]
fn error_display_is_prefixed() {
    assert_eq!(
        AppError::UnknownPlugin("ghost".into()).to_string(),
        "unknown plugin: ghost"
    );
    assert_eq!(
        AppError::DeadlineExceeded("evaluate stub".into()).to_string(),
        "deadline exceeded: evaluate stub"
    );
}

#[test]
fn foreign_errors_convert() {
    let json: AppError = serde_json::from_str::<serde_json::Value>("{")
        .expect_err("bad json")
        .into();
    assert!(matches!(json, AppError::Invalid(_)));

    let io: AppError = std::io::Error::other("disk").into();
    assert!(matches!(io, AppError::Io(_)));
    assert!(io.is_retryable());
}
