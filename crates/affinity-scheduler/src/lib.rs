//! # AffinityBots Scheduler
//!
//! Workflow scheduling and trigger-dispatch core. Registers cron-style
//! schedules for workflow triggers, fires them through an in-process
//! recurring-job queue, records every firing, and fans inbound
//! webhook/integration events out to matching triggers.
//!
//! ## Architecture
//! ```text
//! Registry (register / pause / resume / startup sync)
//!   └── persists TriggerConfig, arms ScheduleQueue
//!
//! ScheduleQueue (armed recurring jobs, db is source of truth)
//!   └── Worker (tokio interval)
//!         Due → Validating → Invoking → Recording → Done
//!                  │              │          └── ExecutionHistory (append-only)
//!                  │              └── WorkflowInvoker (execution endpoint kickoff)
//!                  └── skip when trigger/workflow inactive
//!
//! EventDispatcher (stateless)
//!   ├── webhook: single trigger, secret-checked
//!   └── integration: fan-out to all matching active triggers
//! ```

pub mod cron;
pub mod dispatch;
pub mod history;
pub mod invoker;
pub mod queue;
pub mod registry;
pub mod worker;

pub use cron::CronSchedule;
pub use dispatch::{EventDispatcher, IntegrationEvent, WebhookDispatch};
pub use history::{ExecutionHistory, ExecutionStats, HistoryPage};
pub use invoker::{HttpInvoker, InvokeOutcome, WorkflowInvoker};
pub use queue::{ArmedSchedule, DueFiring, ScheduleQueue};
pub use registry::{RegisterSchedule, ScheduleRegistry};
pub use worker::{ScheduleWorker, spawn_worker};
