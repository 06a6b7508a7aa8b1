//! Readiness gate deciding when a workflow may be processed at all
//!
//! Pods and artifacts are only final once the workflow has finished, so the
//! default gate holds back every workflow, including its enablement
//! bookkeeping, until it reaches a terminal phase. Recording intent earlier
//! would only need a different gate.

use crate::crds::{Workflow, WorkflowPhase};
use crate::tasks::config::GateConfig;
use std::collections::BTreeSet;

pub trait ReadinessGate: Send + Sync {
    fn is_actionable(&self, workflow: &Workflow) -> bool;
}

/// Actionable once the workflow phase is one of a fixed set
#[derive(Debug, Clone)]
pub struct TerminalPhaseGate {
    phases: BTreeSet<WorkflowPhase>,
}

impl TerminalPhaseGate {
    pub fn new(phases: impl IntoIterator<Item = WorkflowPhase>) -> Self {
        Self {
            phases: phases.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            config
                .terminal_phases
                .iter()
                .map(|phase| phase.trim())
                .filter(|phase| !phase.is_empty())
                .map(WorkflowPhase::from),
        )
    }

    #[must_use]
    pub fn phases(&self) -> &BTreeSet<WorkflowPhase> {
        &self.phases
    }
}

impl Default for TerminalPhaseGate {
    fn default() -> Self {
        Self::new([WorkflowPhase::Succeeded, WorkflowPhase::Failed])
    }
}

impl ReadinessGate for TerminalPhaseGate {
    fn is_actionable(&self, workflow: &Workflow) -> bool {
        self.phases.contains(&workflow.phase())
    }
}
