//! Supply-chain security status carried on the workflow itself
//!
//! The opt-in flag is an annotation and the progress marker is a label. Both
//! keys are a stable contract with users and tooling; changing them needs a
//! migration.

use crate::crds::Workflow;
use kube::ResourceExt;
use std::fmt;

/// Annotation users set to `"true"` to opt a workflow in
pub const ENABLE_ANNOTATION: &str = "argo.slsa.io/enable";

/// Label holding the current [`SecurityStatus`]
pub const STATUS_LABEL: &str = "argo.slsa.io/status";

/// Value of the status label
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityStatus {
    InProgress,
    Completed,
    Error,
    /// Reserved for workflows whose pods produced nothing signable
    NoArtifactsToSign,
    /// Value written by something other than this controller
    Other(String),
}

impl SecurityStatus {
    #[must_use]
    pub fn from_label(value: &str) -> Self {
        match value {
            "in-progress" => SecurityStatus::InProgress,
            "completed" => SecurityStatus::Completed,
            "error" => SecurityStatus::Error,
            "no-artifacts-to-sign" => SecurityStatus::NoArtifactsToSign,
            other => SecurityStatus::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SecurityStatus::InProgress => "in-progress",
            SecurityStatus::Completed => "completed",
            SecurityStatus::Error => "error",
            SecurityStatus::NoArtifactsToSign => "no-artifacts-to-sign",
            SecurityStatus::Other(value) => value,
        }
    }

    /// No further writes happen once a workflow reaches a terminal status
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SecurityStatus::Completed | SecurityStatus::Error)
    }
}

impl fmt::Display for SecurityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact match on `"true"`; other truthy spellings do not opt in
#[must_use]
pub fn is_enabled(workflow: &Workflow) -> bool {
    workflow
        .annotations()
        .get(ENABLE_ANNOTATION)
        .is_some_and(|value| value == "true")
}

/// Status label value, `None` when the label is absent
#[must_use]
pub fn current_status(workflow: &Workflow) -> Option<SecurityStatus> {
    workflow
        .labels()
        .get(STATUS_LABEL)
        .map(|value| SecurityStatus::from_label(value))
}
