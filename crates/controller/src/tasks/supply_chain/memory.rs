//! In-memory [`ClusterStore`] with resource versions and failure injection
//!
//! Behaves like the API server for the three operations the reconciler uses:
//! writes are rejected with a conflict when the caller's resource version is
//! stale, and every accepted write bumps the version.

use super::store::{ClusterStore, WriteOutcome};
use crate::crds::{Workflow, WorkflowKey, WORKFLOW_POD_LABEL};
use crate::tasks::types::{Error, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Failure returned by the next write instead of applying it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedWriteFailure {
    Conflict,
    NotFound,
    Error(String),
}

#[derive(Default)]
struct MemoryState {
    workflows: BTreeMap<WorkflowKey, Workflow>,
    pods: Vec<Pod>,
    resource_version: u64,
    write_attempts: usize,
    list_calls: usize,
    write_failures: VecDeque<InjectedWriteFailure>,
    list_failures: VecDeque<String>,
    get_failures: VecDeque<String>,
}

impl MemoryState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a workflow, assigning a fresh resource version
    pub fn insert_workflow(&self, mut workflow: Workflow) -> Result<WorkflowKey> {
        let key = WorkflowKey::from_workflow(&workflow).ok_or(Error::MissingObjectKey)?;
        let mut state = self.state();
        workflow.metadata.resource_version = Some(state.next_version());
        state.workflows.insert(key.clone(), workflow);
        Ok(key)
    }

    pub fn remove_workflow(&self, key: &WorkflowKey) -> Option<Workflow> {
        self.state().workflows.remove(key)
    }

    pub fn insert_pod(&self, pod: Pod) {
        self.state().pods.push(pod);
    }

    #[must_use]
    pub fn workflow(&self, key: &WorkflowKey) -> Option<Workflow> {
        self.state().workflows.get(key).cloned()
    }

    /// Simulate another writer modifying the workflow
    pub fn touch(&self, key: &WorkflowKey) {
        let mut state = self.state();
        let version = state.next_version();
        if let Some(workflow) = state.workflows.get_mut(key) {
            workflow.metadata.resource_version = Some(version);
        }
    }

    pub fn fail_next_write(&self, failure: InjectedWriteFailure) {
        self.state().write_failures.push_back(failure);
    }

    pub fn fail_next_list(&self, message: impl Into<String>) {
        self.state().list_failures.push_back(message.into());
    }

    pub fn fail_next_get(&self, message: impl Into<String>) {
        self.state().get_failures.push_back(message.into());
    }

    /// Number of `set_workflow_label` calls, successful or not
    #[must_use]
    pub fn write_attempts(&self) -> usize {
        self.state().write_attempts
    }

    #[must_use]
    pub fn list_calls(&self) -> usize {
        self.state().list_calls
    }
}

#[async_trait]
impl ClusterStore for InMemoryStore {
    async fn get_workflow(&self, key: &WorkflowKey) -> Result<Option<Workflow>> {
        let mut state = self.state();
        if let Some(message) = state.get_failures.pop_front() {
            return Err(Error::StoreError(message));
        }
        Ok(state.workflows.get(key).cloned())
    }

    async fn set_workflow_label(
        &self,
        workflow: &Workflow,
        key: &str,
        value: &str,
    ) -> Result<WriteOutcome> {
        let target = WorkflowKey::from_workflow(workflow).ok_or(Error::MissingObjectKey)?;
        let mut state = self.state();
        state.write_attempts += 1;

        match state.write_failures.pop_front() {
            Some(InjectedWriteFailure::Conflict) => return Ok(WriteOutcome::Conflict),
            Some(InjectedWriteFailure::NotFound) => return Ok(WriteOutcome::NotFound),
            Some(InjectedWriteFailure::Error(message)) => return Err(Error::StoreError(message)),
            None => {}
        }

        let observed = workflow.resource_version();
        let version = state.next_version();
        let Some(stored) = state.workflows.get_mut(&target) else {
            return Ok(WriteOutcome::NotFound);
        };
        if observed.is_some() && stored.resource_version() != observed {
            return Ok(WriteOutcome::Conflict);
        }

        stored.labels_mut().insert(key.to_string(), value.to_string());
        stored.metadata.resource_version = Some(version);
        Ok(WriteOutcome::Applied)
    }

    async fn list_workflow_pods(&self, namespace: &str, workflow_name: &str) -> Result<Vec<Pod>> {
        let mut state = self.state();
        state.list_calls += 1;
        if let Some(message) = state.list_failures.pop_front() {
            return Err(Error::StoreError(message));
        }

        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.namespace().as_deref() == Some(namespace))
            .filter(|pod| {
                pod.labels()
                    .get(WORKFLOW_POD_LABEL)
                    .is_some_and(|owner| owner == workflow_name)
            })
            .cloned()
            .collect())
    }
}
