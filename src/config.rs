//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::approver::registry::BUILTIN_APPROVERS;
use crate::{AppError, Result};

/// Scheduling and retry knobs for the controller.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ControllerConfig {
    /// Concurrent request reconcilers.
    #[serde(default = "default_request_workers")]
    pub request_workers: usize,
    /// Concurrent policy reconcilers.
    #[serde(default = "default_policy_workers")]
    pub policy_workers: usize,
    /// Upper bound on one reconciliation, external calls included.
    #[serde(default = "default_reconcile_timeout_seconds")]
    pub reconcile_timeout_seconds: u64,
    /// First retry delay after a retryable failure.
    #[serde(default = "default_backoff_base_millis")]
    pub backoff_base_millis: u64,
    /// Retry delay cap.
    #[serde(default = "default_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_workers: default_request_workers(),
            policy_workers: default_policy_workers(),
            reconcile_timeout_seconds: default_reconcile_timeout_seconds(),
            backoff_base_millis: default_backoff_base_millis(),
            backoff_max_seconds: default_backoff_max_seconds(),
        }
    }
}

impl ControllerConfig {
    /// Per-reconciliation deadline.
    #[must_use]
    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_seconds)
    }

    /// First backoff delay.
    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_millis)
    }

    /// Backoff cap.
    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_seconds)
    }
}

fn default_request_workers() -> usize {
    4
}

fn default_policy_workers() -> usize {
    2
}

fn default_reconcile_timeout_seconds() -> u64 {
    30
}

fn default_backoff_base_millis() -> u64 {
    5
}

fn default_backoff_max_seconds() -> u64 {
    300
}

/// A remote approver plugin reached over HTTP.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PluginConfig {
    /// Name policies use to reference the plugin.
    pub name: String,
    /// Base URL; `/ready` and `/evaluate` are appended.
    pub endpoint: String,
    /// Per-call HTTP timeout.
    #[serde(default = "default_plugin_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl PluginConfig {
    /// Per-call timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_plugin_timeout_seconds() -> u64 {
    10
}

fn default_http_port() -> u16 {
    8080
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory of JSON manifests (policies, namespaces, role bindings).
    pub manifests_dir: PathBuf,
    /// `SQLite` database file; in-memory store when absent.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// HTTP port for the request API.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Controller tuning.
    #[serde(default)]
    pub controller: ControllerConfig,
    /// Remote approver plugins.
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory of JSON manifests.
    #[must_use]
    pub fn manifests_dir(&self) -> &Path {
        &self.manifests_dir
    }

    fn validate(&self) -> Result<()> {
        if self.manifests_dir.as_os_str().is_empty() {
            return Err(AppError::Config("manifests_dir must not be empty".into()));
        }

        let c = &self.controller;
        if c.request_workers == 0 || c.policy_workers == 0 {
            return Err(AppError::Config(
                "request_workers and policy_workers must be greater than zero".into(),
            ));
        }
        if c.reconcile_timeout_seconds == 0 {
            return Err(AppError::Config(
                "reconcile_timeout_seconds must be greater than zero".into(),
            ));
        }
        if c.backoff_base() > c.backoff_max() {
            return Err(AppError::Config(
                "backoff_base_millis must not exceed backoff_max_seconds".into(),
            ));
        }

        let mut seen = HashSet::new();
        for plugin in &self.plugins {
            if plugin.name.trim().is_empty() {
                return Err(AppError::Config("plugin name must not be empty".into()));
            }
            if BUILTIN_APPROVERS.contains(&plugin.name.as_str()) {
                return Err(AppError::Config(format!(
                    "plugin name {} collides with a built-in approver",
                    plugin.name
                )));
            }
            if !seen.insert(plugin.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate plugin name {}",
                    plugin.name
                )));
            }
            if !(plugin.endpoint.starts_with("http://") || plugin.endpoint.starts_with("https://"))
            {
                return Err(AppError::Config(format!(
                    "plugin {} endpoint must be an http(s) URL",
                    plugin.name
                )));
            }
            if plugin.timeout_seconds == 0 {
                return Err(AppError::Config(format!(
                    "plugin {} timeout_seconds must be greater than zero",
                    plugin.name
                )));
            }
        }

        Ok(())
    }
}
