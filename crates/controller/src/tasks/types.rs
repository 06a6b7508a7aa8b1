//! Shared error, result and context types for the workflow controller

use crate::tasks::backoff::FailureBackoff;
use crate::tasks::config::ControllerConfig;
use crate::tasks::metrics::ReconcileMetrics;
use crate::tasks::supply_chain::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Cluster store error: {0}")]
    StoreError(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Object is missing a name or namespace")]
    MissingObjectKey,

    #[error("Pod pipeline error: {0}")]
    PipelineError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every reconciliation by the kube-rs runtime
#[derive(Clone)]
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub config: Arc<ControllerConfig>,
    pub backoff: Arc<FailureBackoff>,
    pub metrics: Arc<ReconcileMetrics>,
}
