//! SQLite-backed persistence for the scheduling core.
//!
//! Three tables, each independently keyed: `workflows`, `workflow_triggers`,
//! and `workflow_schedule_executions`. All writes are single-row,
//! single-statement inserts/upserts — the database is the source of truth
//! the queue and worker reconcile against.

pub mod db;
pub mod models;

pub use db::WorkflowStore;
pub use models::{
    ExecutionRecord, ExecutionStatus, Trigger, TriggerConfig, TriggerType, Workflow,
};
