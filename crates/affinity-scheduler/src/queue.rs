//! In-process recurring-job queue — the armed side of every schedule.
//!
//! Keyed by trigger id; arming an already-armed trigger replaces the old
//! entry, which is what makes registration idempotent. The database is the
//! source of truth: this queue is a disposable cache rebuilt by startup
//! sync, so nothing here is persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;

use affinity_core::error::{CoreError, Result};

use crate::cron::{self, CronSchedule};

/// Public view of an armed recurring job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ArmedSchedule {
    pub trigger_id: String,
    pub workflow_id: String,
    pub cron: String,
    pub timezone: String,
    pub next_run: DateTime<Utc>,
}

/// One due delivery handed to the worker.
#[derive(Debug, Clone)]
pub struct DueFiring {
    pub trigger_id: String,
    pub workflow_id: String,
    pub scheduled_for: DateTime<Utc>,
}

struct ArmedJob {
    workflow_id: String,
    cron_expr: String,
    timezone: String,
    tz: Tz,
    schedule: CronSchedule,
    next_run: DateTime<Utc>,
}

impl ArmedJob {
    fn view(&self, trigger_id: &str) -> ArmedSchedule {
        ArmedSchedule {
            trigger_id: trigger_id.to_string(),
            workflow_id: self.workflow_id.clone(),
            cron: self.cron_expr.clone(),
            timezone: self.timezone.clone(),
            next_run: self.next_run,
        }
    }
}

/// The armed-schedule queue. Constructed once at startup and shared by the
/// registry (arms/disarms) and the worker (drains due firings).
pub struct ScheduleQueue {
    jobs: Mutex<HashMap<String, ArmedJob>>,
}

impl ScheduleQueue {
    pub fn new() -> Self {
        Self { jobs: Mutex::new(HashMap::new()) }
    }

    /// Arm (or re-arm) a recurring job. Replaces any existing entry for
    /// the trigger — there is never more than one armed job per trigger.
    pub async fn arm(
        &self,
        trigger_id: &str,
        workflow_id: &str,
        cron_expr: &str,
        timezone: &str,
    ) -> Result<ArmedSchedule> {
        let schedule = CronSchedule::parse(cron_expr)?;
        let tz = cron::resolve_timezone(timezone)?;
        let next_run = schedule.next_occurrence(tz, Utc::now()).ok_or_else(|| {
            CoreError::InvalidSchedule(format!("'{cron_expr}' never matches a future instant"))
        })?;

        let job = ArmedJob {
            workflow_id: workflow_id.to_string(),
            cron_expr: cron_expr.to_string(),
            timezone: timezone.to_string(),
            tz,
            schedule,
            next_run,
        };
        let view = job.view(trigger_id);

        let mut jobs = self.jobs.lock().await;
        let replaced = jobs.insert(trigger_id.to_string(), job).is_some();
        tracing::info!(
            "📅 Schedule {}: '{}' ({}) next at {}",
            if replaced { "re-armed" } else { "armed" },
            cron_expr,
            trigger_id,
            view.next_run.to_rfc3339()
        );
        Ok(view)
    }

    /// Remove a job. Not an error when nothing was armed.
    pub async fn disarm(&self, trigger_id: &str) -> bool {
        let removed = self.jobs.lock().await.remove(trigger_id).is_some();
        if removed {
            tracing::info!("⏸️ Schedule disarmed ({trigger_id})");
        }
        removed
    }

    /// Drain every job due at `now`, rescheduling each to its next
    /// occurrence computed from `now` — a missed window is skipped, never
    /// back-filled, and one occurrence is delivered at most once.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<DueFiring> {
        let mut jobs = self.jobs.lock().await;
        let mut due = Vec::new();
        let mut exhausted = Vec::new();

        for (trigger_id, job) in jobs.iter_mut() {
            if job.next_run > now {
                continue;
            }
            due.push(DueFiring {
                trigger_id: trigger_id.clone(),
                workflow_id: job.workflow_id.clone(),
                scheduled_for: job.next_run,
            });
            match job.schedule.next_occurrence(job.tz, now) {
                Some(next) => job.next_run = next,
                None => {
                    tracing::warn!(
                        "⚠️ Schedule '{}' has no future occurrence, disarming ({trigger_id})",
                        job.cron_expr
                    );
                    exhausted.push(trigger_id.clone());
                }
            }
        }
        for id in exhausted {
            jobs.remove(&id);
        }
        due
    }

    /// Inspect one armed entry.
    pub async fn armed(&self, trigger_id: &str) -> Option<ArmedSchedule> {
        self.jobs.lock().await.get(trigger_id).map(|j| j.view(trigger_id))
    }

    /// All armed entries.
    pub async fn list(&self) -> Vec<ArmedSchedule> {
        self.jobs
            .lock()
            .await
            .iter()
            .map(|(id, j)| j.view(id))
            .collect()
    }

    /// Number of armed jobs.
    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Test hook: pull a job's next_run into the past so the next tick
    /// delivers it.
    pub(crate) async fn force_due(&self, trigger_id: &str) {
        if let Some(job) = self.jobs.lock().await.get_mut(trigger_id) {
            job.next_run = Utc::now() - chrono::Duration::seconds(1);
        }
    }
}

impl Default for ScheduleQueue {
    fn default() -> Self {
        Self::new()
    }
}
