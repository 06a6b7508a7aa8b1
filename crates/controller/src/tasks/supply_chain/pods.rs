//! Pods produced by a finished workflow, and the pipeline that consumes them
//!
//! The reconciler hands every enumerated [`PodSet`] to a [`PodPipeline`].
//! Signing, attestation and SBOM generation plug in here as further pipeline
//! implementations; the workflow-level status transitions do not depend on
//! which one is installed.

use crate::crds::WorkflowKey;
use crate::tasks::types::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Read-only view of the pods a workflow created, valid for one reconciliation
#[derive(Debug, Clone, Default)]
pub struct PodSet {
    pods: Vec<Pod>,
}

impl PodSet {
    #[must_use]
    pub fn new(pods: Vec<Pod>) -> Self {
        Self { pods }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pods.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pod> {
        self.pods.iter()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.pods.iter().map(|pod| pod.name_any()).collect()
    }

    /// Every image a pod declared or ran, de-duplicated
    ///
    /// Includes the image references from the pod spec (containers and init
    /// containers) and the resolved `imageID` digests reported in container
    /// statuses, which are what a signer ultimately needs.
    #[must_use]
    pub fn image_references(&self) -> BTreeSet<String> {
        self.pods.iter().flat_map(pod_image_references).collect()
    }
}

fn pod_image_references(pod: &Pod) -> BTreeSet<String> {
    let mut images = BTreeSet::new();

    if let Some(spec) = &pod.spec {
        let init = spec.init_containers.iter().flatten();
        for container in spec.containers.iter().chain(init) {
            if let Some(image) = container.image.as_deref().filter(|i| !i.is_empty()) {
                images.insert(image.to_string());
            }
        }
    }

    if let Some(status) = &pod.status {
        let statuses = status
            .container_statuses
            .iter()
            .flatten()
            .chain(status.init_container_statuses.iter().flatten());
        for container_status in statuses {
            if !container_status.image_id.is_empty() {
                images.insert(container_status.image_id.clone());
            }
        }
    }

    images
}

/// Work performed on the pods of a finished, opted-in workflow
#[async_trait]
pub trait PodPipeline: Send + Sync {
    async fn process(&self, workflow: &WorkflowKey, pods: &PodSet) -> Result<()>;
}

/// Default pipeline: records which pods and images a workflow produced
#[derive(Debug, Clone, Copy, Default)]
pub struct PodInventory;

#[async_trait]
impl PodPipeline for PodInventory {
    async fn process(&self, workflow: &WorkflowKey, pods: &PodSet) -> Result<()> {
        if pods.is_empty() {
            info!(workflow = %workflow, "Workflow produced no pods");
            return Ok(());
        }

        for pod in pods.iter() {
            let phase = pod
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref())
                .unwrap_or("Unknown");
            debug!(workflow = %workflow, pod = %pod.name_any(), phase, "Workflow pod");
        }

        let images = pods.image_references();
        info!(
            workflow = %workflow,
            pods = pods.len(),
            images = images.len(),
            "Inventoried workflow pods"
        );
        for image in &images {
            debug!(workflow = %workflow, image = %image, "Image reference");
        }

        Ok(())
    }
}
