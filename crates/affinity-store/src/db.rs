//! SQLite store for workflows, triggers, and execution history.
//!
//! Single connection behind a mutex, WAL mode for concurrent readers.
//! Execution rows are append-only: this module exposes no UPDATE or DELETE
//! for `workflow_schedule_executions`.

use affinity_core::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use std::path::Path;
use std::sync::Mutex;

use crate::models::{
    ExecutionRecord, ExecutionStatus, Trigger, TriggerConfig, TriggerType, Workflow,
};

/// Persistent store shared by the registry, worker, dispatcher, and gateway.
pub struct WorkflowStore {
    conn: Mutex<Connection>,
}

impl WorkflowStore {
    /// Open or create the store database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::Persistence(format!("DB open: {e}")))?;

        // WAL for concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();

        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS workflows (
                workflow_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_triggers (
                trigger_id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                trigger_type TEXT NOT NULL,      -- 'schedule', 'webhook', 'integration', 'manual'
                config TEXT NOT NULL,            -- JSON bag, keyed by trigger_type
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (workflow_id) REFERENCES workflows(workflow_id)
            );

            CREATE INDEX IF NOT EXISTS idx_triggers_workflow
                ON workflow_triggers(workflow_id);
            CREATE INDEX IF NOT EXISTS idx_triggers_type_active
                ON workflow_triggers(trigger_type, is_active);

            -- Append-only firing log
            CREATE TABLE IF NOT EXISTS workflow_schedule_executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trigger_id TEXT NOT NULL,
                executed_at TEXT NOT NULL,
                status TEXT NOT NULL,            -- 'success', 'failed', 'skipped'
                duration_ms INTEGER NOT NULL DEFAULT 0,
                error TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_executions_trigger
                ON workflow_schedule_executions(trigger_id, id DESC);
         ",
        )
        .map_err(|e| CoreError::Persistence(format!("Migration: {e}")))?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CoreError::Persistence(format!("Lock: {e}")))
    }

    // ─── Workflows ──────────────────────────────────────

    /// Insert a workflow row.
    pub fn insert_workflow(&self, wf: &Workflow) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflows (workflow_id, owner_id, name, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                wf.workflow_id,
                wf.owner_id,
                wf.name,
                wf.is_active as i32,
                wf.created_at.to_rfc3339(),
                wf.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::Persistence(format!("Insert workflow: {e}")))?;
        Ok(())
    }

    /// Fetch a workflow by id.
    pub fn get_workflow(&self, workflow_id: &str) -> Result<Option<Workflow>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT workflow_id, owner_id, name, is_active, created_at, updated_at
                 FROM workflows WHERE workflow_id = ?1",
            )
            .map_err(|e| CoreError::Persistence(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map([workflow_id], row_to_workflow)
            .map_err(|e| CoreError::Persistence(format!("Query workflow: {e}")))?;
        match rows.next() {
            Some(Ok(wf)) => Ok(Some(wf)),
            Some(Err(e)) => Err(CoreError::Persistence(format!("Read workflow: {e}"))),
            None => Ok(None),
        }
    }

    /// Flip a workflow's active flag.
    pub fn set_workflow_active(&self, workflow_id: &str, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE workflows SET is_active = ?1, updated_at = ?2 WHERE workflow_id = ?3",
                params![active as i32, Utc::now().to_rfc3339(), workflow_id],
            )
            .map_err(|e| CoreError::Persistence(format!("Update workflow: {e}")))?;
        Ok(n > 0)
    }

    // ─── Triggers ──────────────────────────────────────

    /// Insert a trigger row.
    pub fn insert_trigger(&self, trigger: &Trigger) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_triggers
             (trigger_id, workflow_id, trigger_type, config, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                trigger.trigger_id,
                trigger.workflow_id,
                trigger.trigger_type.as_str(),
                trigger.config.to_json().to_string(),
                trigger.is_active as i32,
                trigger.created_at.to_rfc3339(),
                trigger.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| CoreError::Persistence(format!("Insert trigger: {e}")))?;
        Ok(())
    }

    /// Fetch a trigger by id. Unlike the scan paths, a stored config that
    /// no longer parses surfaces as the typed error (resume relies on the
    /// distinction between "missing" and "corrupt").
    pub fn get_trigger(&self, trigger_id: &str) -> Result<Option<Trigger>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT trigger_id, workflow_id, trigger_type, config, is_active, created_at, updated_at
                 FROM workflow_triggers WHERE trigger_id = ?1",
            )
            .map_err(|e| CoreError::Persistence(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map([trigger_id], row_to_raw_trigger)
            .map_err(|e| CoreError::Persistence(format!("Query trigger: {e}")))?;
        match rows.next() {
            Some(Ok(raw)) => Ok(Some(raw.into_trigger()?)),
            Some(Err(e)) => Err(CoreError::Persistence(format!("Read trigger: {e}"))),
            None => Ok(None),
        }
    }

    /// Fetch just (workflow_id, trigger_type, is_active) for a trigger.
    /// Registration uses this so a corrupt stored config cannot block the
    /// re-registration that would heal it.
    pub fn get_trigger_meta(
        &self,
        trigger_id: &str,
    ) -> Result<Option<(String, TriggerType, bool)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT workflow_id, trigger_type, is_active
                 FROM workflow_triggers WHERE trigger_id = ?1",
            )
            .map_err(|e| CoreError::Persistence(format!("Prepare: {e}")))?;
        let mut rows = stmt
            .query_map([trigger_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)? != 0,
                ))
            })
            .map_err(|e| CoreError::Persistence(format!("Query trigger: {e}")))?;
        match rows.next() {
            Some(Ok((wf, type_str, active))) => {
                Ok(Some((wf, TriggerType::parse(&type_str)?, active)))
            }
            Some(Err(e)) => Err(CoreError::Persistence(format!("Read trigger: {e}"))),
            None => Ok(None),
        }
    }

    /// List all triggers belonging to a workflow.
    pub fn triggers_for_workflow(&self, workflow_id: &str) -> Result<Vec<Trigger>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT trigger_id, workflow_id, trigger_type, config, is_active, created_at, updated_at
                 FROM workflow_triggers WHERE workflow_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| CoreError::Persistence(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([workflow_id], row_to_trigger)
            .map_err(|e| CoreError::Persistence(format!("Query triggers: {e}")))?;
        collect_triggers(rows)
    }

    /// Replace a trigger's config bag (re-registration path).
    pub fn update_trigger_config(&self, trigger_id: &str, config: &TriggerConfig) -> Result<()> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE workflow_triggers SET config = ?1, trigger_type = ?2, updated_at = ?3
                 WHERE trigger_id = ?4",
                params![
                    config.to_json().to_string(),
                    config.trigger_type().as_str(),
                    Utc::now().to_rfc3339(),
                    trigger_id,
                ],
            )
            .map_err(|e| CoreError::Persistence(format!("Update trigger: {e}")))?;
        if n == 0 {
            return Err(CoreError::NotFound(format!("trigger '{trigger_id}'")));
        }
        Ok(())
    }

    /// Flip a trigger's active flag.
    pub fn set_trigger_active(&self, trigger_id: &str, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let n = conn
            .execute(
                "UPDATE workflow_triggers SET is_active = ?1, updated_at = ?2 WHERE trigger_id = ?3",
                params![active as i32, Utc::now().to_rfc3339(), trigger_id],
            )
            .map_err(|e| CoreError::Persistence(format!("Update trigger: {e}")))?;
        Ok(n > 0)
    }

    /// All active schedule-type triggers — the startup-sync working set.
    pub fn active_schedule_triggers(&self) -> Result<Vec<Trigger>> {
        self.active_triggers_of_type(TriggerType::Schedule)
    }

    /// All active integration-type triggers — the dispatch fan-out set.
    pub fn active_integration_triggers(&self) -> Result<Vec<Trigger>> {
        self.active_triggers_of_type(TriggerType::Integration)
    }

    fn active_triggers_of_type(&self, trigger_type: TriggerType) -> Result<Vec<Trigger>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT trigger_id, workflow_id, trigger_type, config, is_active, created_at, updated_at
                 FROM workflow_triggers WHERE trigger_type = ?1 AND is_active = 1
                 ORDER BY created_at",
            )
            .map_err(|e| CoreError::Persistence(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([trigger_type.as_str()], row_to_trigger)
            .map_err(|e| CoreError::Persistence(format!("Query triggers: {e}")))?;
        collect_triggers(rows)
    }

    // ─── Execution history (append-only) ──────────────────────────────

    /// Append one firing record. Never updates or deletes existing rows.
    pub fn insert_execution(
        &self,
        trigger_id: &str,
        status: ExecutionStatus,
        duration_ms: u64,
        error: Option<&str>,
    ) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO workflow_schedule_executions
             (trigger_id, executed_at, status, duration_ms, error)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                trigger_id,
                Utc::now().to_rfc3339(),
                status.as_str(),
                duration_ms as i64,
                error,
            ],
        )
        .map_err(|e| CoreError::Persistence(format!("Insert execution: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Newest-first execution records for a trigger.
    pub fn recent_executions(&self, trigger_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, trigger_id, executed_at, status, duration_ms, error
                 FROM workflow_schedule_executions
                 WHERE trigger_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| CoreError::Persistence(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![trigger_id, limit as i64], |row| {
                let status_str: String = row.get(3)?;
                let executed_at_str: String = row.get(2)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    executed_at_str,
                    status_str,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })
            .map_err(|e| CoreError::Persistence(format!("Query executions: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, trigger_id, executed_at, status, duration_ms, error) =
                row.map_err(|e| CoreError::Persistence(format!("Read execution: {e}")))?;
            out.push(ExecutionRecord {
                id,
                trigger_id,
                executed_at: parse_rfc3339(&executed_at),
                status: ExecutionStatus::parse(&status)?,
                duration_ms: duration_ms.max(0) as u64,
                error,
            });
        }
        Ok(out)
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_workflow(row: &rusqlite::Row<'_>) -> rusqlite::Result<Workflow> {
    let created_at: String = row.get(4)?;
    let updated_at: String = row.get(5)?;
    Ok(Workflow {
        workflow_id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get::<_, i32>(3)? != 0,
        created_at: parse_rfc3339(&created_at),
        updated_at: parse_rfc3339(&updated_at),
    })
}

/// Unparsed trigger row — type/config stay raw until the caller decides
/// whether a bad config is a skip (scans) or an error (point lookup).
struct RawTrigger {
    trigger_id: String,
    workflow_id: String,
    type_str: String,
    config_str: String,
    is_active: bool,
    created_at: String,
    updated_at: String,
}

impl RawTrigger {
    fn into_trigger(self) -> Result<Trigger> {
        let trigger_type = TriggerType::parse(&self.type_str)?;
        let bag: serde_json::Value = serde_json::from_str(&self.config_str).unwrap_or_default();
        let config = TriggerConfig::from_parts(trigger_type, &bag)?;
        Ok(Trigger {
            trigger_id: self.trigger_id,
            workflow_id: self.workflow_id,
            trigger_type,
            config,
            is_active: self.is_active,
            created_at: parse_rfc3339(&self.created_at),
            updated_at: parse_rfc3339(&self.updated_at),
        })
    }
}

fn row_to_raw_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTrigger> {
    Ok(RawTrigger {
        trigger_id: row.get(0)?,
        workflow_id: row.get(1)?,
        type_str: row.get(2)?,
        config_str: row.get(3)?,
        is_active: row.get::<_, i32>(4)? != 0,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

/// Map a trigger row, skipping type/config combinations that no longer
/// parse (scans treat those as absent rather than failing the whole set).
fn row_to_trigger(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<Trigger>> {
    let raw = row_to_raw_trigger(row)?;
    let trigger_id = raw.trigger_id.clone();
    match raw.into_trigger() {
        Ok(t) => Ok(Some(t)),
        Err(e) => {
            tracing::warn!("⚠️ Trigger '{trigger_id}' has invalid stored config, skipping: {e}");
            Ok(None)
        }
    }
}

fn collect_triggers(
    rows: impl Iterator<Item = rusqlite::Result<Option<Trigger>>>,
) -> Result<Vec<Trigger>> {
    let mut out = Vec::new();
    for row in rows {
        if let Some(t) = row.map_err(|e| CoreError::Persistence(format!("Read trigger: {e}")))? {
            out.push(t);
        }
    }
    Ok(out)
}
