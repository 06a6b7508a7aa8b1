//! In-process reconciliation counters served on `/metrics`

use crate::tasks::supply_chain::{ReconcileOutcome, RequeueReason};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ReconcileMetrics {
    reconciliations: AtomicU64,
    done: AtomicU64,
    requeue_not_finished: AtomicU64,
    requeue_conflict: AtomicU64,
    requeue_deleted: AtomicU64,
    errors: AtomicU64,
    label_writes: AtomicU64,
    /// Unix millis of the last reconciliation that did not fail, 0 if none
    last_success_millis: AtomicI64,
}

/// Point-in-time copy of [`ReconcileMetrics`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub reconciliations: u64,
    pub done: u64,
    pub requeues: RequeueCounts,
    pub errors: u64,
    pub label_writes: u64,
    pub last_success: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueCounts {
    pub workflow_not_finished: u64,
    pub write_conflict: u64,
    pub deleted_during_write: u64,
}

impl ReconcileMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcome: ReconcileOutcome) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ReconcileOutcome::Done => &self.done,
            ReconcileOutcome::Requeue(RequeueReason::WorkflowNotFinished) => {
                &self.requeue_not_finished
            }
            ReconcileOutcome::Requeue(RequeueReason::WriteConflict) => &self.requeue_conflict,
            ReconcileOutcome::Requeue(RequeueReason::DeletedDuringWrite) => &self.requeue_deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.last_success_millis
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.reconciliations.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_label_write(&self) {
        self.label_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_success = match self.last_success_millis.load(Ordering::Relaxed) {
            0 => None,
            millis => Utc.timestamp_millis_opt(millis).single(),
        };

        MetricsSnapshot {
            reconciliations: self.reconciliations.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            requeues: RequeueCounts {
                workflow_not_finished: self.requeue_not_finished.load(Ordering::Relaxed),
                write_conflict: self.requeue_conflict.load(Ordering::Relaxed),
                deleted_during_write: self.requeue_deleted.load(Ordering::Relaxed),
            },
            errors: self.errors.load(Ordering::Relaxed),
            label_writes: self.label_writes.load(Ordering::Relaxed),
            last_success,
        }
    }
}
