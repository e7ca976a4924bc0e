//! Schedule worker — turns due queue deliveries into workflow executions.
//!
//! Each firing walks Due → Validating → Invoking → Recording → Done in its
//! own task. Failures are contained inside the firing that produced them:
//! a bad invocation is recorded as `failed` and the loop, sibling firings,
//! and future occurrences are untouched. Kickoff is fire-and-forget — the
//! recorded outcome is whether the execution endpoint accepted the run,
//! not whether the run eventually finished.

use std::sync::Arc;
use std::time::Instant;

use affinity_store::{ExecutionStatus, TriggerConfig, WorkflowStore};
use chrono::Utc;
use tokio::task::JoinHandle;

use crate::history::ExecutionHistory;
use crate::invoker::WorkflowInvoker;
use crate::queue::{DueFiring, ScheduleQueue};

pub struct ScheduleWorker {
    store: Arc<WorkflowStore>,
    queue: Arc<ScheduleQueue>,
    invoker: Arc<dyn WorkflowInvoker>,
    history: Arc<ExecutionHistory>,
}

impl ScheduleWorker {
    pub fn new(
        store: Arc<WorkflowStore>,
        queue: Arc<ScheduleQueue>,
        invoker: Arc<dyn WorkflowInvoker>,
        history: Arc<ExecutionHistory>,
    ) -> Self {
        Self { store, queue, invoker, history }
    }

    /// One tick: drain due firings and handle each in its own task.
    /// Returns the spawned handles so callers (and tests) can await them;
    /// the background loop just drops them.
    pub async fn tick(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let due = self.queue.take_due(Utc::now()).await;
        due.into_iter()
            .map(|firing| {
                let worker = Arc::clone(&self);
                tokio::spawn(async move {
                    worker.fire(firing).await;
                })
            })
            .collect()
    }

    /// Handle one due delivery to completion. Never panics or errors out:
    /// every outcome ends in a history record.
    pub async fn fire(&self, firing: DueFiring) {
        tracing::info!(
            "🔔 Schedule due: trigger {} (scheduled for {})",
            firing.trigger_id,
            firing.scheduled_for.to_rfc3339()
        );
        let started = Instant::now();

        let (status, error) = match self.validate(&firing) {
            Validation::Proceed => self.invoke(&firing.workflow_id).await,
            Validation::Skip(reason) => {
                tracing::info!("⏭️ Skipped firing for {}: {reason}", firing.trigger_id);
                (ExecutionStatus::Skipped, None)
            }
            Validation::Error(detail) => (ExecutionStatus::Failed, Some(detail)),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        self.history
            .record(&firing.trigger_id, status, duration_ms, error.as_deref());
    }

    /// Validating: the queue entry does not override current database
    /// state. A trigger or workflow deactivated after arming — including
    /// a job already in flight — skips instead of firing.
    fn validate(&self, firing: &DueFiring) -> Validation {
        let trigger = match self.store.get_trigger(&firing.trigger_id) {
            Ok(Some(t)) => t,
            Ok(None) => return Validation::Skip("trigger no longer exists".into()),
            Err(e) => return Validation::Error(format!("validation read failed: {e}")),
        };
        if !trigger.is_active {
            return Validation::Skip("trigger is paused".into());
        }
        if !matches!(trigger.config, TriggerConfig::Schedule { .. }) {
            return Validation::Skip("trigger is no longer a schedule".into());
        }

        match self.store.get_workflow(&firing.workflow_id) {
            Ok(Some(wf)) if wf.is_active => Validation::Proceed,
            Ok(Some(_)) => Validation::Skip("workflow is inactive".into()),
            Ok(None) => Validation::Skip("workflow no longer exists".into()),
            Err(e) => Validation::Error(format!("validation read failed: {e}")),
        }
    }

    /// Invoking: kick the workflow off and classify the outcome.
    async fn invoke(&self, workflow_id: &str) -> (ExecutionStatus, Option<String>) {
        match self.invoker.invoke(workflow_id, None).await {
            Ok(outcome) if outcome.success => (ExecutionStatus::Success, None),
            Ok(outcome) => {
                let detail = outcome.error.unwrap_or_else(|| "kickoff rejected".into());
                tracing::warn!("⚠️ Workflow {workflow_id} kickoff rejected: {detail}");
                (ExecutionStatus::Failed, Some(detail))
            }
            Err(e) => {
                tracing::warn!("⚠️ Workflow {workflow_id} kickoff failed: {e}");
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
        }
    }
}

enum Validation {
    Proceed,
    Skip(String),
    Error(String),
}

/// Spawn the worker loop as a background tokio task.
pub fn spawn_worker(worker: Arc<ScheduleWorker>, tick_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("⏰ Schedule worker started (check every {tick_secs}s)");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_secs));
        loop {
            interval.tick().await;
            let _ = worker.clone().tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::stub::StubInvoker;
    use affinity_store::{Trigger, Workflow};

    struct Fixture {
        store: Arc<WorkflowStore>,
        queue: Arc<ScheduleQueue>,
        invoker: Arc<StubInvoker>,
        history: Arc<ExecutionHistory>,
        worker: Arc<ScheduleWorker>,
        dir: std::path::PathBuf,
    }

    fn fixture(name: &str, invoker: StubInvoker) -> Fixture {
        let dir = std::env::temp_dir().join(format!("affinity-worker-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        let store = Arc::new(WorkflowStore::open(&path).unwrap());
        let queue = Arc::new(ScheduleQueue::new());
        let invoker = Arc::new(invoker);
        let history = Arc::new(ExecutionHistory::new(store.clone(), 500));
        let worker = Arc::new(ScheduleWorker::new(
            store.clone(),
            queue.clone(),
            invoker.clone(),
            history.clone(),
        ));
        Fixture { store, queue, invoker, history, worker, dir }
    }

    fn seed(store: &WorkflowStore, active_workflow: bool) -> (Workflow, Trigger) {
        let mut wf = Workflow::new("owner-1", "wf");
        wf.is_active = active_workflow;
        store.insert_workflow(&wf).unwrap();
        let t = Trigger::new(
            &wf.workflow_id,
            TriggerConfig::Schedule { cron: "*/5 * * * *".into(), timezone: "UTC".into() },
        );
        store.insert_trigger(&t).unwrap();
        (wf, t)
    }

    fn firing(wf: &Workflow, t: &Trigger) -> DueFiring {
        DueFiring {
            trigger_id: t.trigger_id.clone(),
            workflow_id: wf.workflow_id.clone(),
            scheduled_for: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_successful_firing_records_success() {
        let f = fixture("success", StubInvoker::ok());
        let (wf, t) = seed(&f.store, true);

        f.worker.fire(firing(&wf, &t)).await;

        assert_eq!(f.invoker.call_count(), 1);
        let page = f.history.get_history(&t.trigger_id, None).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].status, ExecutionStatus::Success);
        assert!(page.records[0].error.is_none());

        std::fs::remove_dir_all(&f.dir).ok();
    }

    #[tokio::test]
    async fn test_inactive_workflow_skips_without_invoking() {
        let f = fixture("skip-wf", StubInvoker::ok());
        let (wf, t) = seed(&f.store, false);

        f.worker.fire(firing(&wf, &t)).await;

        // The policy under test: no invocation happened at all
        assert_eq!(f.invoker.call_count(), 0);
        let page = f.history.get_history(&t.trigger_id, None).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].status, ExecutionStatus::Skipped);

        std::fs::remove_dir_all(&f.dir).ok();
    }

    #[tokio::test]
    async fn test_paused_trigger_skips() {
        let f = fixture("skip-trigger", StubInvoker::ok());
        let (wf, t) = seed(&f.store, true);
        f.store.set_trigger_active(&t.trigger_id, false).unwrap();

        f.worker.fire(firing(&wf, &t)).await;

        assert_eq!(f.invoker.call_count(), 0);
        let page = f.history.get_history(&t.trigger_id, None).unwrap();
        assert_eq!(page.records[0].status, ExecutionStatus::Skipped);

        std::fs::remove_dir_all(&f.dir).ok();
    }

    #[tokio::test]
    async fn test_deleted_trigger_skips() {
        let f = fixture("gone", StubInvoker::ok());
        let (wf, _) = seed(&f.store, true);

        f.worker
            .fire(DueFiring {
                trigger_id: "deleted".into(),
                workflow_id: wf.workflow_id.clone(),
                scheduled_for: Utc::now(),
            })
            .await;

        assert_eq!(f.invoker.call_count(), 0);
        let page = f.history.get_history("deleted", None).unwrap();
        assert_eq!(page.records[0].status, ExecutionStatus::Skipped);

        std::fs::remove_dir_all(&f.dir).ok();
    }

    #[tokio::test]
    async fn test_failed_kickoff_is_contained() {
        let f = fixture("failure", StubInvoker::failing_for(&["wf-will-fail"]));

        let mut wf = Workflow::new("owner-1", "wf");
        wf.workflow_id = "wf-will-fail".into();
        f.store.insert_workflow(&wf).unwrap();
        let t = Trigger::new(
            &wf.workflow_id,
            TriggerConfig::Schedule { cron: "*/5 * * * *".into(), timezone: "UTC".into() },
        );
        f.store.insert_trigger(&t).unwrap();

        f.worker.fire(firing(&wf, &t)).await;

        let page = f.history.get_history(&t.trigger_id, None).unwrap();
        assert_eq!(page.records[0].status, ExecutionStatus::Failed);
        assert!(
            page.records[0]
                .error
                .as_deref()
                .unwrap()
                .contains("stubbed kickoff failure")
        );

        // The worker survives: a second firing still goes through
        f.worker.fire(firing(&wf, &t)).await;
        let page = f.history.get_history(&t.trigger_id, None).unwrap();
        assert_eq!(page.records.len(), 2);

        std::fs::remove_dir_all(&f.dir).ok();
    }

    #[tokio::test]
    async fn test_end_to_end_register_fire_record() {
        let f = fixture("e2e", StubInvoker::ok());
        let (wf, t) = seed(&f.store, true);

        // Register via the queue the way the registry would, then make it due
        f.queue
            .arm(&t.trigger_id, &wf.workflow_id, "*/5 * * * *", "UTC")
            .await
            .unwrap();
        assert!(f.queue.armed(&t.trigger_id).await.is_some());
        f.queue.force_due(&t.trigger_id).await;

        for handle in f.worker.clone().tick().await {
            handle.await.unwrap();
        }

        let page = f.history.get_history(&t.trigger_id, None).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].status, ExecutionStatus::Success);
        assert_eq!(page.stats.total, 1);
        assert_eq!(page.stats.success_rate, 100.0);

        std::fs::remove_dir_all(&f.dir).ok();
    }
}
