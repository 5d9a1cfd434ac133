//! Scan session pipeline
//!
//! One scan session wires a fixed set of long-lived tasks:
//!
//! ```text
//! WatchAlerts ──► alert collector ──┐
//!                                   ├──► distribution queue ──► consumer ──► SegregatedStore
//! WatchLogs ────► log collector ────┘                              │
//!                                                                  └──► NetworkCache (network logs)
//!        collector errors ──► error reporter
//! ```
//!
//! At session end the segregated store is drained once into the artifacts:
//! process forest, network events, alert report.

pub mod collector;
pub mod record;
pub mod report;
pub mod segregate;
pub mod session;

pub use collector::{spawn_error_reporter, CollectorError, ScanEvent};
pub use record::{OperationKind, Record, RecordError};
pub use segregate::{BucketCounts, SegregatedData, SegregatedStore};
pub use session::{ScanConfig, ScanError, ScanRunner, ScanSummary};
