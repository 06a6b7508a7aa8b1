//! Controller Configuration
//!
//! Loaded from a mounted YAML file. Every section has defaults, so an absent
//! or partial file still yields a usable configuration.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::info;

/// Environment variable that overrides the watched namespace
pub const NAMESPACE_ENV: &str = "SLSA_NAMESPACE";

/// Main controller configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ControllerConfig {
    /// Namespace to watch; all namespaces when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Requeue and store-call timing
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Back-off applied after failed reconciliations
    #[serde(default)]
    pub backoff: BackoffConfig,

    /// Which workflows are ready to be processed
    #[serde(default)]
    pub gate: GateConfig,

    /// Health and metrics server
    #[serde(default)]
    pub server: ServerConfig,
}

/// Reconciliation timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Delay before re-checking a workflow that has not finished yet
    #[serde(rename = "pendingRequeueSeconds", default = "default_pending_requeue")]
    pub pending_requeue_seconds: u64,

    /// Delay before retrying after losing a write race
    #[serde(rename = "conflictRequeueSeconds", default = "default_conflict_requeue")]
    pub conflict_requeue_seconds: u64,

    /// Upper bound for a single get/update/list call against the API server
    #[serde(rename = "storeTimeoutSeconds", default = "default_store_timeout")]
    pub store_timeout_seconds: u64,
}

/// Exponential back-off for failed reconciliations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    #[serde(rename = "baseSeconds", default = "default_backoff_base")]
    pub base_seconds: u64,

    #[serde(rename = "maxSeconds", default = "default_backoff_max")]
    pub max_seconds: u64,
}

/// Readiness gate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    /// Workflow phases after which pods and artifacts are final
    #[serde(rename = "terminalPhases", default = "default_terminal_phases")]
    pub terminal_phases: Vec<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(rename = "bindAddress", default = "default_bind_address")]
    pub bind_address: String,
}

fn default_pending_requeue() -> u64 {
    15
}

fn default_conflict_requeue() -> u64 {
    1
}

fn default_store_timeout() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    300 // 5 minutes
}

fn default_terminal_phases() -> Vec<String> {
    vec!["Succeeded".to_string(), "Failed".to_string()]
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        ReconcileConfig {
            pending_requeue_seconds: default_pending_requeue(),
            conflict_requeue_seconds: default_conflict_requeue(),
            store_timeout_seconds: default_store_timeout(),
        }
    }
}

impl ReconcileConfig {
    #[must_use]
    pub fn pending_requeue(&self) -> Duration {
        Duration::from_secs(self.pending_requeue_seconds)
    }

    #[must_use]
    pub fn conflict_requeue(&self) -> Duration {
        Duration::from_secs(self.conflict_requeue_seconds)
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            base_seconds: default_backoff_base(),
            max_seconds: default_backoff_max(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            terminal_phases: default_terminal_phases(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_address: default_bind_address(),
        }
    }
}

impl ControllerConfig {
    /// Validate that configuration values are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let durations = [
            ("reconcile.pendingRequeueSeconds", self.reconcile.pending_requeue_seconds),
            ("reconcile.conflictRequeueSeconds", self.reconcile.conflict_requeue_seconds),
            ("reconcile.storeTimeoutSeconds", self.reconcile.store_timeout_seconds),
            ("backoff.baseSeconds", self.backoff.base_seconds),
            ("backoff.maxSeconds", self.backoff.max_seconds),
        ];
        if let Some((field, _)) = durations.iter().find(|(_, value)| *value == 0) {
            return Err(anyhow::anyhow!("{field} must be greater than zero"));
        }

        if self.backoff.base_seconds > self.backoff.max_seconds {
            return Err(anyhow::anyhow!(
                "backoff.baseSeconds ({}) must not exceed backoff.maxSeconds ({})",
                self.backoff.base_seconds,
                self.backoff.max_seconds
            ));
        }

        if self
            .gate
            .terminal_phases
            .iter()
            .all(|phase| phase.trim().is_empty())
        {
            return Err(anyhow::anyhow!(
                "gate.terminalPhases must name at least one workflow phase"
            ));
        }

        if self.namespace.as_deref().is_some_and(|ns| ns.trim().is_empty()) {
            return Err(anyhow::anyhow!("namespace must not be empty when set"));
        }

        self.server
            .bind_address
            .parse::<SocketAddr>()
            .map_err(|e| {
                anyhow::anyhow!(
                    "server.bindAddress '{}' is not a valid socket address: {e}",
                    self.server.bind_address
                )
            })?;

        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: &str) -> Result<Self, anyhow::Error> {
        let config_str = std::fs::read_to_string(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {config_path}: {e}"))?;

        Self::from_yaml(&config_str)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(yaml).map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }

    /// Apply environment variable overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(namespace) = std::env::var(NAMESPACE_ENV) {
            let namespace = namespace.trim();
            if !namespace.is_empty() {
                info!("Namespace overridden by {}: {}", NAMESPACE_ENV, namespace);
                self.namespace = Some(namespace.to_string());
            }
        }
    }
}
