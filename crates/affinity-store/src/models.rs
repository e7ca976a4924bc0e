//! Data model for workflows, triggers, and execution history.

use affinity_core::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A workflow owned by a user. The scheduling core only reads `owner_id`
/// and `is_active`; everything else about a workflow lives upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: String,
    pub owner_id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Create a new active workflow with a fresh id.
    pub fn new(owner_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// How a workflow gets invoked automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Schedule,
    Webhook,
    Integration,
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Webhook => "webhook",
            Self::Integration => "integration",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "schedule" => Ok(Self::Schedule),
            "webhook" => Ok(Self::Webhook),
            "integration" => Ok(Self::Integration),
            "manual" => Ok(Self::Manual),
            other => Err(CoreError::Persistence(format!(
                "unknown trigger type '{other}'"
            ))),
        }
    }
}

/// Per-type trigger configuration. Stored as a JSON bag in the `config`
/// column but always validated into this union at the boundary — the
/// interpretation is keyed by the trigger's type column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerConfig {
    Schedule {
        cron: String,
        timezone: String,
    },
    Webhook {
        secret: String,
    },
    Integration {
        provider: String,
        event: String,
        secret: Option<String>,
    },
    Manual,
}

impl TriggerConfig {
    /// The trigger type this config belongs to.
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            Self::Schedule { .. } => TriggerType::Schedule,
            Self::Webhook { .. } => TriggerType::Webhook,
            Self::Integration { .. } => TriggerType::Integration,
            Self::Manual => TriggerType::Manual,
        }
    }

    /// Serialize to the JSON bag stored in the `config` column.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Schedule { cron, timezone } => {
                serde_json::json!({"cron": cron, "timezone": timezone})
            }
            Self::Webhook { secret } => serde_json::json!({"webhook_secret": secret}),
            Self::Integration { provider, event, secret } => {
                serde_json::json!({"provider": provider, "event": event, "secret": secret})
            }
            Self::Manual => serde_json::json!({}),
        }
    }

    /// Rebuild the typed config from the type column + JSON bag.
    pub fn from_parts(trigger_type: TriggerType, config: &serde_json::Value) -> Result<Self> {
        match trigger_type {
            TriggerType::Schedule => {
                let cron = config["cron"]
                    .as_str()
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| {
                        CoreError::InvalidSchedule("schedule config missing 'cron'".into())
                    })?;
                let timezone = config["timezone"].as_str().unwrap_or("UTC");
                Ok(Self::Schedule {
                    cron: cron.to_string(),
                    timezone: timezone.to_string(),
                })
            }
            TriggerType::Webhook => Ok(Self::Webhook {
                secret: config["webhook_secret"].as_str().unwrap_or("").to_string(),
            }),
            TriggerType::Integration => {
                let provider = config["provider"].as_str().unwrap_or("").to_string();
                let event = config["event"].as_str().unwrap_or("").to_string();
                let secret = config["secret"].as_str().map(String::from);
                Ok(Self::Integration { provider, event, secret })
            }
            TriggerType::Manual => Ok(Self::Manual),
        }
    }
}

/// One way of invoking a workflow automatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub trigger_id: String,
    pub workflow_id: String,
    pub trigger_type: TriggerType,
    pub config: TriggerConfig,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Create a new active trigger with a fresh id. The type is derived
    /// from the config variant.
    pub fn new(workflow_id: &str, config: TriggerConfig) -> Self {
        let now = Utc::now();
        Self {
            trigger_id: uuid::Uuid::new_v4().to_string(),
            workflow_id: workflow_id.to_string(),
            trigger_type: config.trigger_type(),
            config,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of a single firing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(CoreError::Persistence(format!(
                "unknown execution status '{other}'"
            ))),
        }
    }
}

/// One row per firing attempt. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub trigger_id: String,
    pub executed_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
}
