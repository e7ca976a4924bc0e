//! Workflow execution boundary.
//!
//! The scheduler only kicks workflows off; it never owns run state. The
//! trait exists so the worker and dispatcher can be tested against a
//! scripted stub instead of a live execution service.

use affinity_core::config::ExecutionConfig;
use affinity_core::error::{CoreError, Result};
use async_trait::async_trait;

/// Result of one kickoff attempt.
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub success: bool,
    /// Run identifier reported by the execution service, when it has one.
    pub run_id: Option<String>,
    pub error: Option<String>,
}

impl InvokeOutcome {
    pub fn ok(run_id: Option<String>) -> Self {
        Self { success: true, run_id, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { success: false, run_id: None, error: Some(error.into()) }
    }
}

/// Starts a workflow run. Implementations must treat duplicate kickoffs
/// for the same occurrence as tolerable — the queue does not deduplicate.
#[async_trait]
pub trait WorkflowInvoker: Send + Sync {
    async fn invoke(
        &self,
        workflow_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<InvokeOutcome>;
}

/// Production invoker — POSTs a kickoff request to the workflow execution
/// endpoint and reports kickoff success/failure, not run completion.
pub struct HttpInvoker {
    client: reqwest::Client,
    endpoint: String,
    auth_token: String,
    timeout: std::time::Duration,
}

impl HttpInvoker {
    pub fn new(config: &ExecutionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            timeout: std::time::Duration::from_secs(config.timeout_secs),
        }
    }
}

#[async_trait]
impl WorkflowInvoker for HttpInvoker {
    async fn invoke(
        &self,
        workflow_id: &str,
        payload: Option<serde_json::Value>,
    ) -> Result<InvokeOutcome> {
        let url = format!("{}/api/workflows/{}/execute", self.endpoint, workflow_id);
        let body = serde_json::json!({
            "workflow_id": workflow_id,
            "payload": payload,
        });

        let mut req = self.client.post(&url).json(&body).timeout(self.timeout);
        if !self.auth_token.is_empty() {
            req = req.bearer_auth(&self.auth_token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| CoreError::Invocation(format!("kickoff request failed: {e}")))?;

        if resp.status().is_success() {
            let body: serde_json::Value = resp.json().await.unwrap_or_default();
            let run_id = body["run_id"].as_str().map(String::from);
            tracing::info!("✅ Workflow kickoff accepted ({workflow_id})");
            Ok(InvokeOutcome::ok(run_id))
        } else {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            Ok(InvokeOutcome::failed(format!(
                "execution endpoint returned {status}: {detail}"
            )))
        }
    }
}

#[cfg(test)]
pub(crate) mod stub {
    //! Scripted invoker for worker/dispatcher tests.

    use super::*;
    use std::sync::Mutex;

    /// Records every invocation; fails when the workflow id is listed.
    pub struct StubInvoker {
        pub calls: Mutex<Vec<(String, Option<serde_json::Value>)>>,
        pub fail_for: Vec<String>,
    }

    impl StubInvoker {
        pub fn ok() -> Self {
            Self { calls: Mutex::new(Vec::new()), fail_for: Vec::new() }
        }

        pub fn failing_for(ids: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_for: ids.iter().map(|s| s.to_string()).collect(),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        pub fn called_workflows(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(w, _)| w.clone()).collect()
        }
    }

    #[async_trait]
    impl WorkflowInvoker for StubInvoker {
        async fn invoke(
            &self,
            workflow_id: &str,
            payload: Option<serde_json::Value>,
        ) -> Result<InvokeOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((workflow_id.to_string(), payload));
            if self.fail_for.iter().any(|id| id == workflow_id) {
                Err(CoreError::Invocation("stubbed kickoff failure".into()))
            } else {
                Ok(InvokeOutcome::ok(Some(format!("run-{workflow_id}"))))
            }
        }
    }
}
