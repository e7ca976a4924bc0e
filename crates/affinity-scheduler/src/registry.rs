//! Schedule registry — keeps the persisted trigger configuration and the
//! queue's armed state in agreement.
//!
//! The registry is the only writer of schedule configs. Registration is
//! idempotent: re-registering a trigger replaces both the stored config
//! and the armed queue entry, so there is never more than one live job
//! per trigger.

use std::sync::Arc;

use affinity_core::error::{CoreError, Result};
use affinity_store::{TriggerConfig, TriggerType, WorkflowStore};

use crate::cron;
use crate::queue::{ArmedSchedule, ScheduleQueue};

/// Registration request for one schedule trigger.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterSchedule {
    pub trigger_id: String,
    pub workflow_id: String,
    pub cron: String,
    /// IANA timezone name; UTC when omitted.
    pub timezone: Option<String>,
    /// Arm immediately (default) or persist paused.
    pub enabled: Option<bool>,
}

pub struct ScheduleRegistry {
    store: Arc<WorkflowStore>,
    queue: Arc<ScheduleQueue>,
}

impl ScheduleRegistry {
    pub fn new(store: Arc<WorkflowStore>, queue: Arc<ScheduleQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate and persist a schedule, then arm (or disarm) the queue
    /// entry. Returns the armed view, or None when registered paused.
    pub async fn register_schedule(&self, req: RegisterSchedule) -> Result<Option<ArmedSchedule>> {
        // Input validation first — a bad expression is rejected before any
        // state is touched.
        cron::validate(&req.cron)?;
        let timezone = req.timezone.as_deref().unwrap_or("UTC").to_string();
        cron::resolve_timezone(&timezone)?;

        let (owning_workflow, trigger_type, _) = self
            .store
            .get_trigger_meta(&req.trigger_id)?
            .ok_or_else(|| CoreError::NotFound(format!("trigger '{}'", req.trigger_id)))?;
        if owning_workflow != req.workflow_id || trigger_type != TriggerType::Schedule {
            return Err(CoreError::NotFound(format!(
                "schedule trigger '{}' on workflow '{}'",
                req.trigger_id, req.workflow_id
            )));
        }
        if self.store.get_workflow(&req.workflow_id)?.is_none() {
            return Err(CoreError::NotFound(format!("workflow '{}'", req.workflow_id)));
        }

        let config = TriggerConfig::Schedule { cron: req.cron.clone(), timezone: timezone.clone() };
        self.store.update_trigger_config(&req.trigger_id, &config)?;

        let enabled = req.enabled.unwrap_or(true);
        self.store.set_trigger_active(&req.trigger_id, enabled)?;

        if enabled {
            let armed = self
                .queue
                .arm(&req.trigger_id, &req.workflow_id, &req.cron, &timezone)
                .await?;
            Ok(Some(armed))
        } else {
            // Persist-only registration is a register-then-pause in one step.
            self.queue.disarm(&req.trigger_id).await;
            tracing::info!("📅 Schedule registered paused ({})", req.trigger_id);
            Ok(None)
        }
    }

    /// Suspend a schedule without touching its stored configuration.
    /// Idempotent: pausing an already-paused or never-armed schedule is
    /// not an error.
    pub async fn pause_schedule(&self, trigger_id: &str) -> Result<()> {
        self.queue.disarm(trigger_id).await;
        if !self.store.set_trigger_active(trigger_id, false)? {
            tracing::debug!("Pause for unknown trigger '{trigger_id}' — nothing to do");
        }
        Ok(())
    }

    /// Re-arm a paused schedule from its last-known-good persisted
    /// configuration.
    pub async fn resume_schedule(&self, trigger_id: &str) -> Result<ArmedSchedule> {
        let trigger = self
            .store
            .get_trigger(trigger_id)?
            .ok_or_else(|| CoreError::NotFound(format!("trigger '{trigger_id}'")))?;

        let TriggerConfig::Schedule { cron, timezone } = &trigger.config else {
            // A resume target without a schedule config means the stored
            // state is corrupt, not that the trigger is missing.
            return Err(CoreError::InvalidSchedule(format!(
                "trigger '{trigger_id}' has no schedule configuration"
            )));
        };

        let armed = self
            .queue
            .arm(trigger_id, &trigger.workflow_id, cron, timezone)
            .await?;
        self.store.set_trigger_active(trigger_id, true)?;
        tracing::info!("▶️ Schedule resumed ({trigger_id})");
        Ok(armed)
    }

    /// Reconcile the queue against the database. Run once at worker
    /// startup: the database is the source of truth, the queue is a
    /// disposable cache that may have lost state. Rows whose stored
    /// config no longer parses are logged and skipped, never fatal.
    pub async fn sync_schedules_from_database(&self) -> Result<usize> {
        let triggers = self.store.active_schedule_triggers()?;
        let mut armed = 0usize;

        for trigger in &triggers {
            let TriggerConfig::Schedule { cron, timezone } = &trigger.config else {
                continue;
            };
            match self
                .queue
                .arm(&trigger.trigger_id, &trigger.workflow_id, cron, timezone)
                .await
            {
                Ok(_) => armed += 1,
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Sync skipped schedule '{}': {e}",
                        trigger.trigger_id
                    );
                }
            }
        }

        tracing::info!("🔄 Startup sync armed {armed}/{} schedules", triggers.len());
        Ok(armed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affinity_store::{Trigger, Workflow};

    fn temp_store(name: &str) -> (Arc<WorkflowStore>, std::path::PathBuf) {
        let dir = std::env::temp_dir().join(format!("affinity-registry-test-{name}"));
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        (Arc::new(WorkflowStore::open(&path).unwrap()), dir)
    }

    fn seed_schedule_trigger(store: &WorkflowStore) -> (Workflow, Trigger) {
        let wf = Workflow::new("owner-1", "report");
        store.insert_workflow(&wf).unwrap();
        let trigger = Trigger::new(
            &wf.workflow_id,
            TriggerConfig::Schedule { cron: "0 8 * * *".into(), timezone: "UTC".into() },
        );
        store.insert_trigger(&trigger).unwrap();
        (wf, trigger)
    }

    fn register_req(wf: &Workflow, t: &Trigger, cron: &str) -> RegisterSchedule {
        RegisterSchedule {
            trigger_id: t.trigger_id.clone(),
            workflow_id: wf.workflow_id.clone(),
            cron: cron.into(),
            timezone: None,
            enabled: None,
        }
    }

    #[tokio::test]
    async fn test_register_arms_queue_and_persists() {
        let (store, dir) = temp_store("register");
        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        let (wf, t) = seed_schedule_trigger(&store);

        let armed = registry
            .register_schedule(register_req(&wf, &t, "*/5 * * * *"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(armed.cron, "*/5 * * * *");
        assert_eq!(armed.timezone, "UTC");
        assert!(queue.armed(&t.trigger_id).await.is_some());

        let stored = store.get_trigger(&t.trigger_id).unwrap().unwrap();
        assert_eq!(
            stored.config,
            TriggerConfig::Schedule { cron: "*/5 * * * *".into(), timezone: "UTC".into() }
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_register_twice_replaces_not_duplicates() {
        let (store, dir) = temp_store("idempotent");
        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        let (wf, t) = seed_schedule_trigger(&store);

        registry
            .register_schedule(register_req(&wf, &t, "0 8 * * *"))
            .await
            .unwrap();
        registry
            .register_schedule(register_req(&wf, &t, "0 9 * * *"))
            .await
            .unwrap();

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.armed(&t.trigger_id).await.unwrap().cron, "0 9 * * *");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_register_rejects_bad_cron_before_touching_state() {
        let (store, dir) = temp_store("badcron");
        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        let (wf, t) = seed_schedule_trigger(&store);

        let err = registry
            .register_schedule(register_req(&wf, &t, "every tuesday"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule(_)));
        assert!(queue.armed(&t.trigger_id).await.is_none());

        // Stored config is untouched
        let stored = store.get_trigger(&t.trigger_id).unwrap().unwrap();
        assert_eq!(
            stored.config,
            TriggerConfig::Schedule { cron: "0 8 * * *".into(), timezone: "UTC".into() }
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_register_unknown_trigger_is_not_found() {
        let (store, dir) = temp_store("missing");
        let registry = ScheduleRegistry::new(store.clone(), Arc::new(ScheduleQueue::new()));

        let err = registry
            .register_schedule(RegisterSchedule {
                trigger_id: "nope".into(),
                workflow_id: "nope".into(),
                cron: "0 8 * * *".into(),
                timezone: None,
                enabled: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_register_disabled_persists_without_arming() {
        let (store, dir) = temp_store("disabled");
        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        let (wf, t) = seed_schedule_trigger(&store);

        let mut req = register_req(&wf, &t, "*/10 * * * *");
        req.enabled = Some(false);
        let armed = registry.register_schedule(req).await.unwrap();
        assert!(armed.is_none());
        assert!(queue.armed(&t.trigger_id).await.is_none());

        let stored = store.get_trigger(&t.trigger_id).unwrap().unwrap();
        assert!(!stored.is_active);
        match stored.config {
            TriggerConfig::Schedule { cron, .. } => assert_eq!(cron, "*/10 * * * *"),
            other => panic!("unexpected config: {other:?}"),
        }

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_pause_resume_round_trip() {
        let (store, dir) = temp_store("roundtrip");
        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        let (wf, t) = seed_schedule_trigger(&store);

        let mut req = register_req(&wf, &t, "0 6 * * 1-5");
        req.timezone = Some("America/New_York".into());
        let before = registry.register_schedule(req).await.unwrap().unwrap();

        registry.pause_schedule(&t.trigger_id).await.unwrap();
        assert!(queue.armed(&t.trigger_id).await.is_none());
        assert!(!store.get_trigger(&t.trigger_id).unwrap().unwrap().is_active);

        // Pausing again is fine
        registry.pause_schedule(&t.trigger_id).await.unwrap();

        let after = registry.resume_schedule(&t.trigger_id).await.unwrap();
        assert_eq!(after.cron, before.cron);
        assert_eq!(after.timezone, before.timezone);
        assert!(store.get_trigger(&t.trigger_id).unwrap().unwrap().is_active);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_resume_without_schedule_config_is_invalid() {
        let (store, dir) = temp_store("resume-bad");
        let registry = ScheduleRegistry::new(store.clone(), Arc::new(ScheduleQueue::new()));

        let wf = Workflow::new("owner-1", "wf");
        store.insert_workflow(&wf).unwrap();
        let t = Trigger::new(&wf.workflow_id, TriggerConfig::Manual);
        store.insert_trigger(&t).unwrap();

        let err = registry.resume_schedule(&t.trigger_id).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidSchedule(_)));

        let err = registry.resume_schedule("missing").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_startup_sync_heals_drift() {
        let (store, dir) = temp_store("sync");
        let (_, t) = seed_schedule_trigger(&store);

        // Fresh queue simulates broker state loss
        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        assert!(queue.armed(&t.trigger_id).await.is_none());

        let armed = registry.sync_schedules_from_database().await.unwrap();
        assert_eq!(armed, 1);

        let entry = queue.armed(&t.trigger_id).await.unwrap();
        assert_eq!(entry.cron, "0 8 * * *");
        assert_eq!(entry.timezone, "UTC");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_sync_ignores_paused_triggers() {
        let (store, dir) = temp_store("sync-paused");
        let (_, t) = seed_schedule_trigger(&store);
        store.set_trigger_active(&t.trigger_id, false).unwrap();

        let queue = Arc::new(ScheduleQueue::new());
        let registry = ScheduleRegistry::new(store.clone(), queue.clone());
        let armed = registry.sync_schedules_from_database().await.unwrap();
        assert_eq!(armed, 0);
        assert_eq!(queue.len().await, 0);

        std::fs::remove_dir_all(&dir).ok();
    }
}
