//! Supply-chain security reconciliation for a single workflow
//!
//! Level-triggered: every call re-reads the workflow and derives the next
//! step from what is stored on it, so repeated or out-of-order delivery is
//! harmless. At most one write is attempted per call, always conditioned on
//! the resource version that was just read.

use super::gate::{ReadinessGate, TerminalPhaseGate};
use super::pods::{PodInventory, PodPipeline, PodSet};
use super::status::{current_status, is_enabled, SecurityStatus, STATUS_LABEL};
use super::store::{ClusterStore, WriteOutcome};
use crate::crds::{Workflow, WorkflowKey};
use crate::tasks::metrics::ReconcileMetrics;
use crate::tasks::types::Result;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Why a reconciliation asked to be retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequeueReason {
    /// The workflow has not reached a terminal phase yet
    WorkflowNotFinished,
    /// Another writer updated the workflow between read and write
    WriteConflict,
    /// The workflow was deleted between read and write
    DeletedDuringWrite,
}

/// Non-error result of a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    Requeue(RequeueReason),
}

pub struct Reconciler {
    store: Arc<dyn ClusterStore>,
    gate: Arc<dyn ReadinessGate>,
    pipeline: Arc<dyn PodPipeline>,
    metrics: Option<Arc<ReconcileMetrics>>,
}

impl Reconciler {
    /// Reconciler with the terminal-phase gate and the inventory pipeline
    pub fn new(store: Arc<dyn ClusterStore>) -> Self {
        Self {
            store,
            gate: Arc::new(TerminalPhaseGate::default()),
            pipeline: Arc::new(PodInventory),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_gate(mut self, gate: Arc<dyn ReadinessGate>) -> Self {
        self.gate = gate;
        self
    }

    #[must_use]
    pub fn with_pipeline(mut self, pipeline: Arc<dyn PodPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Count applied label writes in `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<ReconcileMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[instrument(skip(self), fields(workflow = %key))]
    pub async fn reconcile(&self, key: &WorkflowKey) -> Result<ReconcileOutcome> {
        let workflow = match self.store.get_workflow(key).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => {
                // Deletes can leave a stale request in the queue
                debug!("Workflow no longer exists, nothing to do");
                return Ok(ReconcileOutcome::Done);
            }
            Err(err) => {
                error!(error = %err, "Unable to fetch workflow");
                return Err(err);
            }
        };

        if !self.gate.is_actionable(&workflow) {
            debug!(phase = %workflow.phase(), "Workflow has not finished yet, requeueing");
            return Ok(ReconcileOutcome::Requeue(RequeueReason::WorkflowNotFinished));
        }

        if !is_enabled(&workflow) {
            debug!("Supply-chain security not enabled, ignoring workflow");
            return Ok(ReconcileOutcome::Done);
        }

        match current_status(&workflow) {
            None => {
                info!("Marking workflow as {}", SecurityStatus::InProgress);
                return self
                    .update_status(&workflow, STATUS_LABEL, &SecurityStatus::InProgress)
                    .await;
            }
            Some(status) if status.is_terminal() => {
                debug!(status = %status, "Supply-chain status is final");
                return Ok(ReconcileOutcome::Done);
            }
            Some(status) => {
                debug!(status = %status, "Continuing supply-chain processing");
            }
        }

        let pods = match self.store.list_workflow_pods(&key.namespace, &key.name).await {
            Ok(pods) => PodSet::new(pods),
            Err(err) => {
                error!(error = %err, "Unable to list workflow pods");
                return Err(err);
            }
        };
        info!(pods = pods.len(), "Enumerated workflow pods");

        if let Err(err) = self.pipeline.process(key, &pods).await {
            error!(error = %err, "Pod pipeline failed");
            return Err(err);
        }

        self.update_status(&workflow, STATUS_LABEL, &SecurityStatus::Completed)
            .await
    }

    /// Write `desired` to `label_key` unless it is already there
    ///
    /// Losing a race (conflict) or finding the object gone are both reported
    /// as a requeue; the next call starts again from fresh state.
    pub async fn update_status(
        &self,
        workflow: &Workflow,
        label_key: &str,
        desired: &SecurityStatus,
    ) -> Result<ReconcileOutcome> {
        if workflow
            .labels()
            .get(label_key)
            .is_some_and(|current| current == desired.as_str())
        {
            return Ok(ReconcileOutcome::Done);
        }

        match self
            .store
            .set_workflow_label(workflow, label_key, desired.as_str())
            .await
        {
            Ok(WriteOutcome::Applied) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_label_write();
                }
                info!(status = %desired, "Updated supply-chain status");
                Ok(ReconcileOutcome::Done)
            }
            Ok(WriteOutcome::Conflict) => {
                debug!("Workflow changed since it was read, requeueing");
                Ok(ReconcileOutcome::Requeue(RequeueReason::WriteConflict))
            }
            Ok(WriteOutcome::NotFound) => {
                debug!("Workflow was deleted since it was read, requeueing");
                Ok(ReconcileOutcome::Requeue(RequeueReason::DeletedDuringWrite))
            }
            Err(err) => {
                error!(error = %err, "Unable to update workflow");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::{WorkflowSpec, WorkflowStatus};
    use crate::tasks::supply_chain::status::ENABLE_ANNOTATION;
    use crate::tasks::supply_chain::store::MockClusterStore;
    use crate::tasks::types::Error;
    use async_trait::async_trait;
    use k8s_openapi::api::core::v1::Pod;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key() -> WorkflowKey {
        WorkflowKey::new("argo", "build-1")
    }

    fn workflow(phase: &str, enabled: bool, status: Option<&str>) -> Workflow {
        let mut workflow = Workflow::new("build-1", WorkflowSpec::default());
        workflow.metadata.namespace = Some("argo".to_string());
        workflow.metadata.resource_version = Some("7".to_string());
        workflow.status = Some(WorkflowStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        });
        if enabled {
            workflow
                .annotations_mut()
                .insert(ENABLE_ANNOTATION.to_string(), "true".to_string());
        }
        if let Some(status) = status {
            workflow
                .labels_mut()
                .insert(STATUS_LABEL.to_string(), status.to_string());
        }
        workflow
    }

    fn store_returning(workflow: Workflow) -> MockClusterStore {
        let mut store = MockClusterStore::new();
        store
            .expect_get_workflow()
            .returning(move |_| Ok(Some(workflow.clone())));
        store
    }

    fn reconciler(store: MockClusterStore) -> Reconciler {
        Reconciler::new(Arc::new(store))
    }

    #[tokio::test]
    async fn test_missing_workflow_is_done() {
        let mut store = MockClusterStore::new();
        store.expect_get_workflow().times(1).returning(|_| Ok(None));
        store.expect_set_workflow_label().never();
        store.expect_list_workflow_pods().never();

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    #[tokio::test]
    async fn test_fetch_error_is_surfaced() {
        let mut store = MockClusterStore::new();
        store
            .expect_get_workflow()
            .returning(|_| Err(Error::StoreError("connection refused".to_string())));
        store.expect_set_workflow_label().never();

        let result = reconciler(store).reconcile(&key()).await;
        assert!(matches!(result, Err(Error::StoreError(_))));
    }

    #[tokio::test]
    async fn test_running_workflow_is_requeued_without_writes() {
        let mut store = store_returning(workflow("Running", true, None));
        store.expect_set_workflow_label().never();
        store.expect_list_workflow_pods().never();

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Requeue(RequeueReason::WorkflowNotFinished)
        );
    }

    #[tokio::test]
    async fn test_first_pass_marks_in_progress_with_single_write() {
        let mut store = store_returning(workflow("Succeeded", true, None));
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|workflow, key, value| {
                assert_eq!(workflow.resource_version().as_deref(), Some("7"));
                assert_eq!(key, STATUS_LABEL);
                assert_eq!(value, "in-progress");
                Ok(WriteOutcome::Applied)
            });
        store.expect_list_workflow_pods().never();

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    #[tokio::test]
    async fn test_applied_writes_are_counted() {
        let mut store = store_returning(workflow("Succeeded", true, None));
        store
            .expect_set_workflow_label()
            .returning(|_, _, _| Ok(WriteOutcome::Applied));

        let metrics = Arc::new(ReconcileMetrics::new());
        reconciler(store)
            .with_metrics(metrics.clone())
            .reconcile(&key())
            .await
            .unwrap();
        assert_eq!(metrics.snapshot().label_writes, 1);
    }

    #[tokio::test]
    async fn test_conflict_requeues_after_one_attempt() {
        let mut store = store_returning(workflow("Succeeded", true, None));
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|_, _, _| Ok(WriteOutcome::Conflict));

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Requeue(RequeueReason::WriteConflict));
    }

    #[tokio::test]
    async fn test_deleted_during_write_requeues() {
        let mut store = store_returning(workflow("Failed", true, Some("in-progress")));
        store.expect_list_workflow_pods().returning(|_, _| Ok(vec![]));
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|_, _, _| Ok(WriteOutcome::NotFound));

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Requeue(RequeueReason::DeletedDuringWrite)
        );
    }

    #[tokio::test]
    async fn test_write_error_is_surfaced() {
        let mut store = store_returning(workflow("Succeeded", true, None));
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|_, _, _| Err(Error::StoreError("admission webhook denied".to_string())));

        let result = reconciler(store).reconcile(&key()).await;
        assert!(matches!(result, Err(Error::StoreError(_))));
    }

    #[tokio::test]
    async fn test_in_progress_lists_pods_then_completes() {
        let mut store = store_returning(workflow("Succeeded", true, Some("in-progress")));
        store
            .expect_list_workflow_pods()
            .times(1)
            .returning(|namespace, name| {
                assert_eq!(namespace, "argo");
                assert_eq!(name, "build-1");
                Ok(vec![Pod::default(), Pod::default()])
            });
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|_, _, value| {
                assert_eq!(value, "completed");
                Ok(WriteOutcome::Applied)
            });

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    #[tokio::test]
    async fn test_reserved_status_continues_to_completion() {
        let mut store = store_returning(workflow("Succeeded", true, Some("no-artifacts-to-sign")));
        store.expect_list_workflow_pods().times(1).returning(|_, _| Ok(vec![]));
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|_, _, value| {
                assert_eq!(value, "completed");
                Ok(WriteOutcome::Applied)
            });

        let outcome = reconciler(store).reconcile(&key()).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    #[tokio::test]
    async fn test_list_error_prevents_completion() {
        let mut store = store_returning(workflow("Succeeded", true, Some("in-progress")));
        store
            .expect_list_workflow_pods()
            .returning(|_, _| Err(Error::StoreError("forbidden".to_string())));
        store.expect_set_workflow_label().never();

        let result = reconciler(store).reconcile(&key()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_terminal_statuses_are_left_alone() {
        for status in ["completed", "error"] {
            let mut store = store_returning(workflow("Succeeded", true, Some(status)));
            store.expect_set_workflow_label().never();
            store.expect_list_workflow_pods().never();

            let outcome = reconciler(store).reconcile(&key()).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::Done);
        }
    }

    #[tokio::test]
    async fn test_disabled_workflow_is_never_written() {
        for status in [None, Some("in-progress"), Some("completed")] {
            let mut store = store_returning(workflow("Succeeded", false, status));
            store.expect_set_workflow_label().never();
            store.expect_list_workflow_pods().never();

            let outcome = reconciler(store).reconcile(&key()).await.unwrap();
            assert_eq!(outcome, ReconcileOutcome::Done);
        }
    }

    #[tokio::test]
    async fn test_update_status_skips_equal_value() {
        let mut store = MockClusterStore::new();
        store.expect_set_workflow_label().never();

        let existing = workflow("Succeeded", true, Some("completed"));
        let outcome = reconciler(store)
            .update_status(&existing, STATUS_LABEL, &SecurityStatus::Completed)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    struct AlwaysOpen;

    impl ReadinessGate for AlwaysOpen {
        fn is_actionable(&self, _workflow: &Workflow) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_custom_gate_replaces_phase_check() {
        let mut store = store_returning(workflow("Running", true, None));
        store
            .expect_set_workflow_label()
            .times(1)
            .returning(|_, _, _| Ok(WriteOutcome::Applied));

        let outcome = reconciler(store)
            .with_gate(Arc::new(AlwaysOpen))
            .reconcile(&key())
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    #[derive(Default)]
    struct CountingPipeline {
        seen: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PodPipeline for CountingPipeline {
        async fn process(&self, _workflow: &WorkflowKey, pods: &PodSet) -> Result<()> {
            self.seen.fetch_add(pods.len(), Ordering::SeqCst);
            if self.fail {
                return Err(Error::PipelineError("signer unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pipeline_receives_enumerated_pods() {
        let mut store = store_returning(workflow("Succeeded", true, Some("in-progress")));
        store
            .expect_list_workflow_pods()
            .returning(|_, _| Ok(vec![Pod::default(); 3]));
        store
            .expect_set_workflow_label()
            .returning(|_, _, _| Ok(WriteOutcome::Applied));

        let pipeline = Arc::new(CountingPipeline::default());
        reconciler(store)
            .with_pipeline(pipeline.clone())
            .reconcile(&key())
            .await
            .unwrap();
        assert_eq!(pipeline.seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_pipeline_failure_is_fatal_for_attempt() {
        let mut store = store_returning(workflow("Succeeded", true, Some("in-progress")));
        store.expect_list_workflow_pods().returning(|_, _| Ok(vec![]));
        store.expect_set_workflow_label().never();

        let pipeline = Arc::new(CountingPipeline {
            fail: true,
            ..Default::default()
        });
        let result = reconciler(store)
            .with_pipeline(pipeline)
            .reconcile(&key())
            .await;
        assert!(matches!(result, Err(Error::PipelineError(_))));
    }
}
