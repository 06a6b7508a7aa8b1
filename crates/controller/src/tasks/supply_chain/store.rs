//! Cluster state access used by the reconciler
//!
//! `ClusterStore` is the seam between the state machine and the API server.
//! Writes report their outcome as a [`WriteOutcome`] so conflict and
//! not-found are ordinary values rather than error variants the caller has to
//! pick apart.

use crate::crds::{Workflow, WorkflowKey, WORKFLOW_POD_LABEL};
use crate::tasks::types::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client, Error as KubeError, ResourceExt};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Result of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Applied,
    /// The object changed since it was read
    Conflict,
    /// The object was deleted since it was read
    NotFound,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch a workflow, `None` when it does not exist
    async fn get_workflow(&self, key: &WorkflowKey) -> Result<Option<Workflow>>;

    /// Set one label, conditioned on the resource version observed in `workflow`
    async fn set_workflow_label(
        &self,
        workflow: &Workflow,
        key: &str,
        value: &str,
    ) -> Result<WriteOutcome>;

    /// Pods in `namespace` that carry the back-reference label for `workflow_name`
    async fn list_workflow_pods(&self, namespace: &str, workflow_name: &str) -> Result<Vec<Pod>>;
}

/// Label selector matching the pods a workflow created
#[must_use]
pub fn workflow_pod_selector(workflow_name: &str) -> String {
    format!("{WORKFLOW_POD_LABEL}={workflow_name}")
}

/// Merge patch that sets one label and carries the observed resource version
/// as a precondition
#[must_use]
pub fn label_patch(workflow: &Workflow, key: &str, value: &str) -> Value {
    let mut labels = Map::new();
    labels.insert(key.to_string(), Value::String(value.to_string()));

    let mut metadata = Map::new();
    metadata.insert("labels".to_string(), Value::Object(labels));
    if let Some(resource_version) = workflow.resource_version() {
        metadata.insert("resourceVersion".to_string(), Value::String(resource_version));
    }

    json!({ "metadata": metadata })
}

/// [`ClusterStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    timeout: Duration,
}

impl KubeStore {
    #[must_use]
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn workflows(&self, namespace: &str) -> Api<Workflow> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Bound an API call by the configured timeout. The inner kube result is
    /// returned untouched so callers can inspect status codes.
    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<Result<T, KubeError>>
    where
        F: Future<Output = Result<T, KubeError>> + Send,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| Error::Timeout {
                operation,
                after: self.timeout,
            })
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_workflow(&self, key: &WorkflowKey) -> Result<Option<Workflow>> {
        let workflows = self.workflows(&key.namespace);
        let workflow = self.bounded("get workflow", workflows.get_opt(&key.name)).await??;
        Ok(workflow)
    }

    async fn set_workflow_label(
        &self,
        workflow: &Workflow,
        key: &str,
        value: &str,
    ) -> Result<WriteOutcome> {
        let namespace = workflow.namespace().ok_or(Error::MissingObjectKey)?;
        let name = workflow.metadata.name.as_deref().ok_or(Error::MissingObjectKey)?;
        let workflows = self.workflows(&namespace);
        let patch = label_patch(workflow, key, value);

        let result = self
            .bounded(
                "patch workflow label",
                workflows.patch(name, &PatchParams::default(), &Patch::Merge(&patch)),
            )
            .await?;

        match result {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(KubeError::Api(err)) if err.code == 409 => {
                debug!("Workflow {}/{} changed since it was read", namespace, name);
                Ok(WriteOutcome::Conflict)
            }
            Err(KubeError::Api(err)) if err.code == 404 => {
                debug!("Workflow {}/{} was deleted since it was read", namespace, name);
                Ok(WriteOutcome::NotFound)
            }
            Err(e) => Err(Error::KubeError(e)),
        }
    }

    async fn list_workflow_pods(&self, namespace: &str, workflow_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&workflow_pod_selector(workflow_name));
        let list = self.bounded("list workflow pods", pods.list(&params)).await??;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::WorkflowSpec;

    #[test]
    fn test_label_patch_carries_resource_version() {
        let mut workflow = Workflow::new("build-1", WorkflowSpec::default());
        workflow.metadata.resource_version = Some("1337".to_string());

        let patch = label_patch(&workflow, "argo.slsa.io/status", "in-progress");
        assert_eq!(
            patch,
            json!({
                "metadata": {
                    "labels": { "argo.slsa.io/status": "in-progress" },
                    "resourceVersion": "1337"
                }
            })
        );
    }

    #[test]
    fn test_label_patch_touches_nothing_else() {
        let mut workflow = Workflow::new("build-1", WorkflowSpec::default());
        workflow
            .labels_mut()
            .insert("team".to_string(), "platform".to_string());

        let patch = label_patch(&workflow, "argo.slsa.io/status", "completed");
        let metadata = patch["metadata"].as_object().unwrap();
        assert_eq!(metadata.len(), 1);
        assert_eq!(metadata["labels"].as_object().unwrap().len(), 1);
        assert!(patch.get("spec").is_none());
        assert!(patch.get("status").is_none());
    }

    #[test]
    fn test_pod_selector() {
        assert_eq!(
            workflow_pod_selector("build-1"),
            "workflows.argoproj.io/workflow=build-1"
        );
    }
}
