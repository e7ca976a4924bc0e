//! Webhook / integration event dispatcher — stateless fan-out from one
//! inbound event to the workflow invocations it should cause.
//!
//! ## Architecture
//! ```text
//! webhook call (workflow_id, trigger_id, secret, payload)
//!   → exact trigger lookup → secret check → invoke once → record
//!
//! integration event (provider, event, payload, secret?)
//!   → all active integration triggers
//!     → match provider+event (case-insensitive) and secret (when configured)
//!     → invoke each match independently; one failure never stops the rest
//! ```

use std::sync::Arc;

use affinity_core::error::{CoreError, Result};
use affinity_store::{ExecutionStatus, Trigger, TriggerConfig, WorkflowStore};
use std::time::Instant;

use crate::history::ExecutionHistory;
use crate::invoker::{InvokeOutcome, WorkflowInvoker};

/// An inbound third-party integration event.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct IntegrationEvent {
    pub provider: String,
    pub event: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub secret: Option<String>,
}

/// Result of a direct webhook dispatch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookDispatch {
    pub success: bool,
    pub run_id: Option<String>,
    pub error: Option<String>,
}

impl From<InvokeOutcome> for WebhookDispatch {
    fn from(o: InvokeOutcome) -> Self {
        Self { success: o.success, run_id: o.run_id, error: o.error }
    }
}

pub struct EventDispatcher {
    store: Arc<WorkflowStore>,
    invoker: Arc<dyn WorkflowInvoker>,
    history: Arc<ExecutionHistory>,
}

impl EventDispatcher {
    pub fn new(
        store: Arc<WorkflowStore>,
        invoker: Arc<dyn WorkflowInvoker>,
        history: Arc<ExecutionHistory>,
    ) -> Self {
        Self { store, invoker, history }
    }

    /// Fire a single webhook trigger addressed by (workflow, trigger).
    /// An inactive or wrong-typed trigger is reported as missing — callers
    /// learn nothing about triggers they cannot fire.
    ///
    /// Callers may present the secret in more than one place (query
    /// parameter, header); any candidate matching the configured secret
    /// authorizes the call. A mismatch is `Unauthorized` with no detail
    /// and leaves no execution record.
    pub async fn dispatch_webhook(
        &self,
        workflow_id: &str,
        trigger_id: &str,
        provided_secrets: &[String],
        payload: Option<serde_json::Value>,
    ) -> Result<WebhookDispatch> {
        let not_found = || CoreError::NotFound(format!("webhook trigger '{trigger_id}'"));

        let trigger = self.store.get_trigger(trigger_id)?.ok_or_else(not_found)?;
        if trigger.workflow_id != workflow_id || !trigger.is_active {
            return Err(not_found());
        }
        let TriggerConfig::Webhook { secret } = &trigger.config else {
            return Err(not_found());
        };
        let workflow = self
            .store
            .get_workflow(workflow_id)?
            .filter(|wf| wf.is_active)
            .ok_or_else(not_found)?;

        let authorized = if secret.is_empty() {
            provided_secrets.is_empty()
        } else {
            provided_secrets.iter().any(|s| s == secret)
        };
        if !authorized {
            tracing::warn!("[dispatch] Webhook secret mismatch for trigger {trigger_id}");
            return Err(CoreError::Unauthorized);
        }

        tracing::info!(
            "[dispatch] Webhook firing trigger {trigger_id} → workflow {}",
            workflow.workflow_id
        );
        let started = Instant::now();
        let outcome = match self.invoker.invoke(workflow_id, payload).await {
            Ok(o) => o,
            Err(e) => InvokeOutcome::failed(e.to_string()),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        let status = if outcome.success { ExecutionStatus::Success } else { ExecutionStatus::Failed };
        self.history
            .record(trigger_id, status, duration_ms, outcome.error.as_deref());

        Ok(outcome.into())
    }

    /// Fan an integration event out to every matching active trigger.
    /// Returns the number of matches attempted — not the number that
    /// succeeded; per-match outcomes land in execution history.
    pub async fn dispatch_integration_event(&self, event: IntegrationEvent) -> Result<usize> {
        let triggers = self.store.active_integration_triggers()?;
        let matches: Vec<Trigger> = triggers
            .into_iter()
            .filter(|t| matches_event(t, &event))
            .collect();

        if matches.is_empty() {
            tracing::info!(
                "[dispatch] No triggers matched {}/{}",
                event.provider,
                event.event
            );
            return Ok(0);
        }

        let attempted = matches.len();
        for trigger in matches {
            self.dispatch_one_match(&trigger, event.payload.clone()).await;
        }

        tracing::info!(
            "[dispatch] Integration event {}/{} dispatched to {attempted} trigger(s)",
            event.provider,
            event.event
        );
        Ok(attempted)
    }

    /// Invoke one matched trigger. Every failure mode is caught here so a
    /// broken match cannot abort the remaining fan-out.
    async fn dispatch_one_match(&self, trigger: &Trigger, payload: Option<serde_json::Value>) {
        let started = Instant::now();

        let workflow_active = match self.store.get_workflow(&trigger.workflow_id) {
            Ok(Some(wf)) => wf.is_active,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    "[dispatch] Workflow lookup failed for trigger {}: {e}",
                    trigger.trigger_id
                );
                false
            }
        };
        if !workflow_active {
            self.history.record(
                &trigger.trigger_id,
                ExecutionStatus::Skipped,
                started.elapsed().as_millis() as u64,
                None,
            );
            return;
        }

        let (status, error) = match self.invoker.invoke(&trigger.workflow_id, payload).await {
            Ok(o) if o.success => (ExecutionStatus::Success, None),
            Ok(o) => (ExecutionStatus::Failed, o.error),
            Err(e) => {
                tracing::warn!(
                    "[dispatch] Invocation failed for trigger {}: {e}",
                    trigger.trigger_id
                );
                (ExecutionStatus::Failed, Some(e.to_string()))
            }
        };
        self.history.record(
            &trigger.trigger_id,
            status,
            started.elapsed().as_millis() as u64,
            error.as_deref(),
        );
    }
}

/// Match rule: provider and event compare case-insensitively; a trigger
/// with a configured secret also requires an exact secret match, while a
/// trigger without one accepts any (or no) secret.
fn matches_event(trigger: &Trigger, event: &IntegrationEvent) -> bool {
    let TriggerConfig::Integration { provider, event: trigger_event, secret } = &trigger.config
    else {
        return false;
    };
    if !provider.eq_ignore_ascii_case(&event.provider) {
        return false;
    }
    if !trigger_event.eq_ignore_ascii_case(&event.event) {
        return false;
    }
    match secret {
        Some(expected) => event.secret.as_deref() == Some(expected.as_str()),
        None => true,
    }
}
