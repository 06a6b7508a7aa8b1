//! Argo `Workflow` resource as observed by the supply-chain controller
//!
//! The controller does not own this type. It reads metadata and `status.phase`
//! and patches a single label, so only those fields are modelled explicitly.
//! Everything else in `spec` and `status` is kept in flattened maps so the
//! object survives a deserialize/serialize cycle unchanged.

use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Label the workflow engine puts on every pod it creates for a workflow
pub const WORKFLOW_POD_LABEL: &str = "workflows.argoproj.io/workflow";

/// `Workflow` spec (opaque apart from the entrypoint)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "Workflow",
    plural = "workflows"
)]
#[kube(namespaced)]
#[kube(status = "WorkflowStatus")]
#[kube(schema = "disabled")]
pub struct WorkflowSpec {
    /// Template the workflow starts from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// `Workflow` status as written by the workflow engine
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct WorkflowStatus {
    /// Lifecycle phase (Pending, Running, Succeeded, Failed, Error)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default, rename = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,

    #[serde(default, rename = "finishedAt", skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Workflow lifecycle phase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkflowPhase {
    /// No phase reported yet (freshly created workflow)
    Unset,
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    /// Any value this controller does not recognise
    Other(String),
}

impl WorkflowPhase {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowPhase::Unset => "",
            WorkflowPhase::Pending => "Pending",
            WorkflowPhase::Running => "Running",
            WorkflowPhase::Succeeded => "Succeeded",
            WorkflowPhase::Failed => "Failed",
            WorkflowPhase::Error => "Error",
            WorkflowPhase::Other(raw) => raw,
        }
    }
}

impl From<&str> for WorkflowPhase {
    fn from(raw: &str) -> Self {
        match raw {
            "" => WorkflowPhase::Unset,
            "Pending" => WorkflowPhase::Pending,
            "Running" => WorkflowPhase::Running,
            "Succeeded" => WorkflowPhase::Succeeded,
            "Failed" => WorkflowPhase::Failed,
            "Error" => WorkflowPhase::Error,
            other => WorkflowPhase::Other(other.to_string()),
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowPhase::Unset => write!(f, "<unset>"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

impl Workflow {
    /// Current lifecycle phase; never fabricated when the engine has not set one
    #[must_use]
    pub fn phase(&self) -> WorkflowPhase {
        self.status
            .as_ref()
            .and_then(|status| status.phase.as_deref())
            .map_or(WorkflowPhase::Unset, WorkflowPhase::from)
    }
}

/// Identity of a workflow: namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowKey {
    pub namespace: String,
    pub name: String,
}

impl WorkflowKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a workflow object, `None` when name or namespace is missing
    #[must_use]
    pub fn from_workflow(workflow: &Workflow) -> Option<Self> {
        let namespace = workflow.namespace()?;
        let name = workflow.metadata.name.clone()?;
        Some(Self { namespace, name })
    }
}

impl fmt::Display for WorkflowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
