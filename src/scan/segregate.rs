//! Category-partitioned event store
//!
//! Both collectors feed the store concurrently through the consumer task; the
//! end-of-session readers (forest builder, network cache, alert processor)
//! iterate it exactly once after the streams have closed.

use serde::Serialize;
use tokio::sync::RwLock;

use super::record::{OperationKind, Record};
use crate::metrics::{RECORDS_DROPPED, RECORDS_SEGREGATED};

/// The six buckets: alerts and logs, each split by operation category.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SegregatedData {
    pub network_alerts: Vec<Record>,
    pub file_alerts: Vec<Record>,
    pub process_alerts: Vec<Record>,
    pub network_logs: Vec<Record>,
    pub file_logs: Vec<Record>,
    pub process_logs: Vec<Record>,
}

/// Per-bucket record counts for the session summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketCounts {
    pub network_alerts: usize,
    pub file_alerts: usize,
    pub process_alerts: usize,
    pub network_logs: usize,
    pub file_logs: usize,
    pub process_logs: usize,
}

impl BucketCounts {
    pub fn total(&self) -> usize {
        self.network_alerts
            + self.file_alerts
            + self.process_alerts
            + self.network_logs
            + self.file_logs
            + self.process_logs
    }
}

/// Lock-protected store shared between the consumer and the session.
#[derive(Debug, Default)]
pub struct SegregatedStore {
    inner: RwLock<SegregatedData>,
}

impl SegregatedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an alert to its category bucket.
    ///
    /// A record with an unrecognized operation category is dropped and lands
    /// in no bucket. Returns whether the record was stored.
    pub async fn segregate_alert(&self, record: Record) -> bool {
        let Some(kind) = record.operation_kind() else {
            RECORDS_DROPPED.with_label_values(&["unknown_operation"]).inc();
            tracing::debug!(operation = %record.operation, "dropping alert with unrecognized operation");
            return false;
        };

        let mut data = self.inner.write().await;
        let bucket = match kind {
            OperationKind::Network => {
                RECORDS_SEGREGATED.with_label_values(&["network_alerts"]).inc();
                &mut data.network_alerts
            }
            OperationKind::File => {
                RECORDS_SEGREGATED.with_label_values(&["file_alerts"]).inc();
                &mut data.file_alerts
            }
            OperationKind::Process => {
                RECORDS_SEGREGATED.with_label_values(&["process_alerts"]).inc();
                &mut data.process_alerts
            }
        };
        bucket.push(record);
        true
    }

    /// Append a log to its category bucket. Same drop rule as alerts.
    pub async fn segregate_log(&self, record: Record) -> bool {
        let Some(kind) = record.operation_kind() else {
            RECORDS_DROPPED.with_label_values(&["unknown_operation"]).inc();
            tracing::debug!(operation = %record.operation, "dropping log with unrecognized operation");
            return false;
        };

        let mut data = self.inner.write().await;
        let bucket = match kind {
            OperationKind::Network => {
                RECORDS_SEGREGATED.with_label_values(&["network_logs"]).inc();
                &mut data.network_logs
            }
            OperationKind::File => {
                RECORDS_SEGREGATED.with_label_values(&["file_logs"]).inc();
                &mut data.file_logs
            }
            OperationKind::Process => {
                RECORDS_SEGREGATED.with_label_values(&["process_logs"]).inc();
                &mut data.process_logs
            }
        };
        bucket.push(record);
        true
    }

    /// Clone the current contents for the artifact writer.
    pub async fn snapshot(&self) -> SegregatedData {
        self.inner.read().await.clone()
    }

    pub async fn counts(&self) -> BucketCounts {
        let data = self.inner.read().await;
        BucketCounts {
            network_alerts: data.network_alerts.len(),
            file_alerts: data.file_alerts.len(),
            process_alerts: data.process_alerts.len(),
            network_logs: data.network_logs.len(),
            file_logs: data.file_logs.len(),
            process_logs: data.process_logs.len(),
        }
    }

    /// Consume the store at session end.
    pub fn into_inner(self) -> SegregatedData {
        self.inner.into_inner()
    }
}
