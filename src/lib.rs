//! SentryScan - host-side runtime-security scanner for CI/CD pipelines
//!
//! This library attaches to a locally running security-enforcement agent over
//! gRPC, ingests its alert and log streams for one scan session, reconstructs
//! forensic structures from them, and can fetch/rewrite/apply host-policy
//! templates to switch the agent between audit and block modes.
//!
//! # Modules
//!
//! - `agent` - gRPC client for the local enforcement agent
//! - `scan` - scan session: stream collectors, event segregation, reporting
//! - `forest` - process ancestry reconstruction
//! - `netflow` - network flow extraction and reverse-DNS resolution
//! - `policy` - host-policy templates: fetch, rewrite, apply
//! - `metrics` - Prometheus metrics for observability
//!
//! # Quick Start
//!
//! ```ignore
//! use sentryscan::scan::{ScanConfig, ScanRunner};
//!
//! let runner = ScanRunner::connect(ScanConfig::default()).await?;
//! let summary = runner.run(cancel_rx).await?;
//! ```

pub mod agent;
pub mod cli;
pub mod forest;
pub mod metrics;
pub mod netflow;
pub mod policy;
pub mod scan;
pub mod tracing;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentClient, AgentError, EventFilter};
pub use forest::ProcessForest;
pub use scan::{ScanConfig, ScanRunner};
