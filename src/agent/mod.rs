//! gRPC client for the local security-enforcement agent
//!
//! The agent owns enforcement; this module only talks to it:
//! - `HealthCheck` nonce probe before a scan starts
//! - `WatchAlerts` / `WatchLogs` long-lived streaming subscriptions
//! - `HostPolicy` unary call used by the policy applier

pub mod client;

/// Generated protobuf/tonic stubs for the agent RPC surface.
pub mod pb {
    tonic::include_proto!("sentryscan.agent");
}

pub use client::{AgentClient, AgentError, EventFilter, PolicyEventKind};
