//! Supply-chain security label state machine for Argo workflows
//!
//! Opted-in workflows move through `in-progress` to `completed` once they
//! have finished. The reconciler never holds state between calls; the
//! status label on the workflow is the only record of progress.

pub mod gate;
pub mod memory;
pub mod pods;
pub mod reconciler;
pub mod status;
pub mod store;

pub use gate::{ReadinessGate, TerminalPhaseGate};
pub use memory::{InMemoryStore, InjectedWriteFailure};
pub use pods::{PodInventory, PodPipeline, PodSet};
pub use reconciler::{ReconcileOutcome, Reconciler, RequeueReason};
pub use status::{current_status, is_enabled, SecurityStatus, ENABLE_ANNOTATION, STATUS_LABEL};
pub use store::{label_patch, workflow_pod_selector, ClusterStore, KubeStore, WriteOutcome};
