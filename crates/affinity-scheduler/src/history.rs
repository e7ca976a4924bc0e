//! Execution history — the durable record of every firing, plus the
//! read-side stats derived from it.
//!
//! Recording is the last line of observability for the scheduler: a failed
//! insert is logged loudly but never thrown back into the worker's path.

use std::sync::Arc;

use affinity_core::error::Result;
use affinity_store::{ExecutionRecord, ExecutionStatus, WorkflowStore};

/// Default page size for history queries; requests are clamped to the cap.
const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

/// Aggregate stats over a set of execution records. Derived, never stored.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ExecutionStats {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    /// successful / total * 100, rounded to two decimals. 0 when empty.
    pub success_rate: f64,
    /// Rounded mean duration over the returned records. 0 when empty.
    pub avg_duration_ms: u64,
}

impl ExecutionStats {
    /// Compute stats from a record set.
    pub fn from_records(records: &[ExecutionRecord]) -> Self {
        let total = records.len();
        let successful = records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Success)
            .count();
        let failed = records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Failed)
            .count();
        let skipped = records
            .iter()
            .filter(|r| r.status == ExecutionStatus::Skipped)
            .count();

        let success_rate = if total == 0 {
            0.0
        } else {
            (successful as f64 / total as f64 * 100.0 * 100.0).round() / 100.0
        };
        let avg_duration_ms = if total == 0 {
            0
        } else {
            let sum: u64 = records.iter().map(|r| r.duration_ms).sum();
            ((sum as f64) / (total as f64)).round() as u64
        };

        Self { total, successful, failed, skipped, success_rate, avg_duration_ms }
    }
}

/// One page of history: newest-first records plus their derived stats.
#[derive(Debug, Clone, serde::Serialize)]
pub struct HistoryPage {
    pub records: Vec<ExecutionRecord>,
    pub stats: ExecutionStats,
}

/// Append-only execution log over the store. Authorization is the
/// caller's job — the gateway verifies ownership before calling in.
pub struct ExecutionHistory {
    store: Arc<WorkflowStore>,
    max_error_len: usize,
}

impl ExecutionHistory {
    pub fn new(store: Arc<WorkflowStore>, max_error_len: usize) -> Self {
        Self { store, max_error_len }
    }

    /// Append one firing record. Error detail is truncated to the
    /// configured bound. An insert failure is logged and swallowed so it
    /// cannot take the worker loop down with it.
    pub fn record(
        &self,
        trigger_id: &str,
        status: ExecutionStatus,
        duration_ms: u64,
        error: Option<&str>,
    ) {
        let truncated = error.map(|e| truncate(e, self.max_error_len));
        if let Err(e) =
            self.store
                .insert_execution(trigger_id, status, duration_ms, truncated.as_deref())
        {
            tracing::error!(
                "❌ Failed to record {} execution for trigger '{trigger_id}': {e}",
                status.as_str()
            );
        }
    }

    /// Newest-first records and derived stats. `limit` defaults to 50 and
    /// is clamped to 1..=200.
    pub fn get_history(&self, trigger_id: &str, limit: Option<usize>) -> Result<HistoryPage> {
        let limit = limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let records = self.store.recent_executions(trigger_id, limit)?;
        let stats = ExecutionStats::from_records(&records);
        Ok(HistoryPage { records, stats })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(status: ExecutionStatus, duration_ms: u64) -> ExecutionRecord {
        ExecutionRecord {
            id: 0,
            trigger_id: "t-1".into(),
            executed_at: Utc::now(),
            status,
            duration_ms,
            error: None,
        }
    }

    #[test]
    fn test_stats_consistency() {
        let records = vec![
            record(ExecutionStatus::Success, 100),
            record(ExecutionStatus::Success, 200),
            record(ExecutionStatus::Failed, 50),
            record(ExecutionStatus::Skipped, 0),
        ];
        let stats = ExecutionStats::from_records(&records);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successful + stats.failed + stats.skipped, stats.total);
        assert_eq!(stats.success_rate, 50.0);
        assert_eq!(stats.avg_duration_ms, 88); // (100+200+50+0)/4 = 87.5 → 88
    }

    #[test]
    fn test_stats_empty_is_zero_not_nan() {
        let stats = ExecutionStats::from_records(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.avg_duration_ms, 0);
    }

    #[test]
    fn test_stats_rounding() {
        let records = vec![
            record(ExecutionStatus::Success, 10),
            record(ExecutionStatus::Failed, 10),
            record(ExecutionStatus::Failed, 10),
        ];
        let stats = ExecutionStats::from_records(&records);
        assert_eq!(stats.success_rate, 33.33);
    }

    #[test]
    fn test_record_truncates_error_detail() {
        let dir = std::env::temp_dir().join("affinity-history-test-trunc");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        let store = Arc::new(WorkflowStore::open(&path).unwrap());
        let history = ExecutionHistory::new(store, 10);

        let long_error = "x".repeat(100);
        history.record("t-1", ExecutionStatus::Failed, 5, Some(&long_error));

        let page = history.get_history("t-1", None).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].error.as_deref(), Some("xxxxxxxxxx"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_limit_clamped() {
        let dir = std::env::temp_dir().join("affinity-history-test-limit");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("test.db");
        std::fs::remove_file(&path).ok();
        let store = Arc::new(WorkflowStore::open(&path).unwrap());
        let history = ExecutionHistory::new(store, 500);

        for _ in 0..5 {
            history.record("t-1", ExecutionStatus::Success, 1, None);
        }

        // limit 0 clamps up to 1, oversized limits clamp down to the cap
        let page = history.get_history("t-1", Some(0)).unwrap();
        assert_eq!(page.records.len(), 1);
        let page = history.get_history("t-1", Some(100_000)).unwrap();
        assert_eq!(page.records.len(), 5);

        std::fs::remove_dir_all(&dir).ok();
    }
}
