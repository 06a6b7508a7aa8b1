use crate::crds::{Workflow, WorkflowKey};
use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Instrument};

pub mod backoff;
pub mod config;
pub mod metrics;
pub mod supply_chain;
pub mod types;

// Re-export commonly used items
pub use config::ControllerConfig;
pub use metrics::ReconcileMetrics;
pub use types::{Error, Result};

use backoff::FailureBackoff;
use config::ReconcileConfig;
use supply_chain::{
    is_enabled, KubeStore, ReconcileOutcome, Reconciler, RequeueReason, TerminalPhaseGate,
};
use types::Context;

/// Main entry point for the workflow controller
///
/// Runs until the process receives SIGINT or SIGTERM.
#[instrument(skip_all, fields(namespace = config.namespace.as_deref().unwrap_or("*")))]
pub async fn run_workflow_controller(
    client: Client,
    config: Arc<ControllerConfig>,
    metrics: Arc<ReconcileMetrics>,
) -> Result<()> {
    if let Err(validation_error) = config.validate() {
        error!("Configuration validation failed: {}", validation_error);
        return Err(Error::ConfigError(validation_error.to_string()));
    }

    let workflows: Api<Workflow> = match config.namespace.as_deref() {
        Some(namespace) => Api::namespaced(client.clone(), namespace),
        None => Api::all(client.clone()),
    };

    let store = Arc::new(KubeStore::new(
        client.clone(),
        config.reconcile.store_timeout(),
    ));
    let reconciler = Reconciler::new(store)
        .with_gate(Arc::new(TerminalPhaseGate::from_config(&config.gate)))
        .with_metrics(metrics.clone());

    let context = Arc::new(Context {
        reconciler: Arc::new(reconciler),
        config: config.clone(),
        backoff: Arc::new(FailureBackoff::from_config(&config.backoff)),
        metrics,
    });
    debug!("Controller context created successfully");

    log_startup_inventory(&workflows).await;

    info!("Starting Workflow controller");
    Controller::new(workflows, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(reconcile_workflow, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("workflow_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((workflow, action)) => {
                        debug!(workflow = %workflow, ?action, "Workflow reconciliation finished");
                    }
                    Err(reconciliation_err) => {
                        // Per-object failures are already logged by the error policy
                        debug!(error = ?reconciliation_err, "Workflow reconciliation error");
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("Workflow controller shutting down");
    Ok(())
}

/// Startup visibility: how many workflows in scope have opted in
async fn log_startup_inventory(workflows: &Api<Workflow>) {
    match workflows.list(&ListParams::default()).await {
        Ok(list) => {
            let enabled: Vec<&Workflow> = list.items.iter().filter(|wf| is_enabled(wf)).collect();
            info!(
                "Controller startup: found {} Workflow(s), {} with supply-chain security enabled",
                list.items.len(),
                enabled.len()
            );
            for workflow in enabled {
                debug!(
                    "Enabled Workflow: {}/{}, phase='{}'",
                    workflow.namespace().unwrap_or_default(),
                    workflow.name_any(),
                    workflow.phase()
                );
            }
        }
        Err(e) => {
            warn!("Failed to list Workflows at startup: {}", e);
        }
    }
}

/// Translate a reconciliation outcome into a dispatcher action
#[must_use]
pub fn action_for(outcome: ReconcileOutcome, config: &ReconcileConfig) -> Action {
    match outcome {
        ReconcileOutcome::Done => Action::await_change(),
        ReconcileOutcome::Requeue(RequeueReason::WorkflowNotFinished) => {
            Action::requeue(config.pending_requeue())
        }
        ReconcileOutcome::Requeue(
            RequeueReason::WriteConflict | RequeueReason::DeletedDuringWrite,
        ) => Action::requeue(config.conflict_requeue()),
    }
}

async fn reconcile_workflow(workflow: Arc<Workflow>, ctx: Arc<Context>) -> Result<Action> {
    let key = WorkflowKey::from_workflow(&workflow).ok_or(Error::MissingObjectKey)?;

    let outcome = ctx.reconciler.reconcile(&key).await?;
    ctx.backoff.reset(&key);
    ctx.metrics.record(outcome);

    Ok(action_for(outcome, &ctx.config.reconcile))
}

/// Error policy: exponential back-off per workflow
#[instrument(skip_all, fields(workflow = %workflow.name_any(), namespace = %workflow.namespace().unwrap_or_default()))]
fn error_policy(workflow: Arc<Workflow>, err: &Error, ctx: Arc<Context>) -> Action {
    ctx.metrics.record_error();

    let Some(key) = WorkflowKey::from_workflow(&workflow) else {
        error!(error = ?err, "Reconciliation failed for workflow without a namespace");
        return Action::requeue(ctx.backoff.max_delay());
    };

    let delay = ctx.backoff.record_failure(&key);
    error!(
        error = %err,
        failures = ctx.backoff.failures(&key),
        retry_in = ?delay,
        "Workflow reconciliation failed"
    );
    Action::requeue(delay)
}
