//! Event records decoded off the agent streams
//!
//! Alerts and logs share one in-memory shape. A record is immutable after
//! decoding and owned exclusively by the segregated store once handed off.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::agent::pb;

/// Operation category used as the segregation axis.
///
/// Anything else the agent emits is unrecognized and the record is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Network,
    File,
    Process,
}

impl OperationKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Network" => Some(OperationKind::Network),
            "File" => Some(OperationKind::File),
            "Process" => Some(OperationKind::Process),
            _ => None,
        }
    }
}

/// A decode failure for a single wire message.
///
/// Dropping one record never stops the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordError {
    NegativePid { field: &'static str, value: i32 },
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordError::NegativePid { field, value } => {
                write!(f, "record has negative {}: {}", field, value)
            }
        }
    }
}

impl std::error::Error for RecordError {}

/// One agent-emitted event (alert or log).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub host_pid: i32,
    pub host_ppid: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub process_name: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource: String,
    /// Syscall/kprobe hint, e.g. `kprobe=tcp_connect` or `syscall=SYS_BIND`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_name: String,
    /// Structured tag list. Wins over `raw_tags` when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Legacy comma-joined tag string kept for older agents.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw_tags: String,
}

impl Record {
    /// Decode an alert wire message.
    pub fn from_alert(alert: pb::Alert) -> Result<Self, RecordError> {
        validate_pids(alert.host_pid, alert.host_ppid)?;
        Ok(Record {
            host_pid: alert.host_pid,
            host_ppid: alert.host_ppid,
            process_name: alert.process_name,
            operation: alert.operation,
            resource: alert.resource,
            data: alert.data,
            message: alert.message,
            policy_name: alert.policy_name,
            tags: alert.atags,
            raw_tags: alert.tags,
        })
    }

    /// Decode a log wire message.
    pub fn from_log(log: pb::Log) -> Result<Self, RecordError> {
        validate_pids(log.host_pid, log.host_ppid)?;
        Ok(Record {
            host_pid: log.host_pid,
            host_ppid: log.host_ppid,
            process_name: log.process_name,
            operation: log.operation,
            resource: log.resource,
            data: log.data,
            ..Record::default()
        })
    }

    pub fn operation_kind(&self) -> Option<OperationKind> {
        OperationKind::parse(&self.operation)
    }

    /// The tag set under the list-wins-over-string legacy rule.
    pub fn effective_tags(&self) -> Vec<String> {
        if !self.tags.is_empty() {
            return self.tags.clone();
        }
        if self.raw_tags.is_empty() {
            return Vec::new();
        }
        self.raw_tags.split(',').map(|t| t.trim().to_string()).collect()
    }
}

fn validate_pids(host_pid: i32, host_ppid: i32) -> Result<(), RecordError> {
    if host_pid < 0 {
        return Err(RecordError::NegativePid { field: "host_pid", value: host_pid });
    }
    if host_ppid < 0 {
        return Err(RecordError::NegativePid { field: "host_ppid", value: host_ppid });
    }
    Ok(())
}
