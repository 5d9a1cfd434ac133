//! Agent RPC client
//!
//! One `AgentClient` is constructed per run and passed by reference into each
//! pipeline stage. There is deliberately no global connection handle: every
//! caller sees the same explicitly-owned channel, and tests can point the
//! client at an in-process mock agent.

use std::fmt;
use std::time::Duration;

use hyper_util::rt::TokioIo;
use rand::Rng;
use serde::Serialize;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Streaming;
use tower::service_fn;

use super::pb;
use super::pb::policy_service_client::PolicyServiceClient;
use super::pb::watch_service_client::WatchServiceClient;

/// How long the health probe may take before the agent is declared dead.
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

/// Event stream filter requested from the agent.
///
/// Flag precedence is `all > system > policy`; `policy` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventFilter {
    All,
    System,
    #[default]
    Policy,
}

impl EventFilter {
    /// Resolve the filter from the `--all` / `--system` CLI flags.
    pub fn from_flags(all: bool, system: bool) -> Self {
        if all {
            EventFilter::All
        } else if system {
            EventFilter::System
        } else {
            EventFilter::Policy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventFilter::All => "all",
            EventFilter::System => "system",
            EventFilter::Policy => "policy",
        }
    }
}

/// Kind of policy event sent in the `HostPolicy` JSON envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PolicyEventKind {
    #[default]
    #[value(name = "ADDED")]
    Added,
    #[value(name = "DELETED")]
    Deleted,
}

impl PolicyEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyEventKind::Added => "ADDED",
            PolicyEventKind::Deleted => "DELETED",
        }
    }
}

/// Errors from the agent channel.
#[derive(Debug)]
pub enum AgentError {
    /// The channel could not be opened at all. Fatal to the whole run.
    Connect(tonic::transport::Error),
    /// The agent address was not a usable URI.
    InvalidAddress(String),
    /// A call failed at the transport/RPC level.
    Rpc(tonic::Status),
    /// The agent answered the health probe with the wrong nonce.
    UnhealthyAgent { sent: i32, got: i32 },
    /// The health probe did not answer within the configured timeout.
    HealthCheckTimeout,
    /// The policy envelope could not be serialized.
    Encode(serde_json::Error),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Connect(e) => write!(f, "failed to connect to agent: {}", e),
            AgentError::InvalidAddress(a) => write!(f, "invalid agent address '{}'", a),
            AgentError::Rpc(s) => write!(f, "agent RPC failed: {}", s),
            AgentError::UnhealthyAgent { sent, got } => {
                write!(f, "agent health check mismatch: sent nonce {}, got {}", sent, got)
            }
            AgentError::HealthCheckTimeout => write!(f, "agent health check timed out"),
            AgentError::Encode(e) => write!(f, "failed to encode policy envelope: {}", e),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Connect(e) => Some(e),
            AgentError::Rpc(s) => Some(s),
            AgentError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tonic::Status> for AgentError {
    fn from(s: tonic::Status) -> Self {
        AgentError::Rpc(s)
    }
}

/// Client owning the single gRPC channel to the local agent.
///
/// Cloning is cheap: both generated service clients share the channel.
#[derive(Clone)]
pub struct AgentClient {
    watch: WatchServiceClient<Channel>,
    policy: PolicyServiceClient<Channel>,
}

impl AgentClient {
    /// Open the channel to the agent.
    ///
    /// Accepts `http://host:port` TCP endpoints and `unix:///path` sockets.
    /// Connection failure is fatal for the caller; there is no retry here.
    pub async fn connect(addr: &str) -> Result<Self, AgentError> {
        let channel = if let Some(path) = addr.strip_prefix("unix://") {
            let path = path.to_string();
            // The URI is ignored by the connector but tonic requires one.
            Endpoint::try_from("http://[::1]:50051")
                .map_err(|_| AgentError::InvalidAddress(addr.to_string()))?
                .connect_with_connector(service_fn(move |_: Uri| {
                    let path = path.clone();
                    async move {
                        let stream = UnixStream::connect(path).await?;
                        Ok::<_, std::io::Error>(TokioIo::new(stream))
                    }
                }))
                .await
                .map_err(AgentError::Connect)?
        } else {
            Endpoint::try_from(addr.to_string())
                .map_err(|_| AgentError::InvalidAddress(addr.to_string()))?
                .connect()
                .await
                .map_err(AgentError::Connect)?
        };

        Ok(Self {
            watch: WatchServiceClient::new(channel.clone()),
            policy: PolicyServiceClient::new(channel),
        })
    }

    /// Probe the agent with a random nonce and verify the echo.
    ///
    /// A wrong echo means the agent is up but unhealthy; that is a typed
    /// error, not a transport failure, and the caller aborts the run without
    /// opening any subscription. An expired `timeout` is equally fatal and
    /// never retried.
    pub async fn health_check(&self, timeout: Duration) -> Result<(), AgentError> {
        let nonce: i32 = rand::thread_rng().gen_range(0..i32::MAX);
        let mut watch = self.watch.clone();

        let request = pb::NonceMessage { nonce };
        let reply = tokio::time::timeout(timeout, watch.health_check(request))
            .await
            .map_err(|_| AgentError::HealthCheckTimeout)??;

        let got = reply.into_inner().retval;
        if got != nonce {
            return Err(AgentError::UnhealthyAgent { sent: nonce, got });
        }

        tracing::debug!(nonce, "agent health check ok");
        Ok(())
    }

    /// Open the alert subscription.
    pub async fn watch_alerts(&self, filter: EventFilter) -> Result<Streaming<pb::Alert>, AgentError> {
        let mut watch = self.watch.clone();
        let request = pb::WatchRequest { filter: filter.as_str().to_string() };
        Ok(watch.watch_alerts(request).await?.into_inner())
    }

    /// Open the log subscription.
    pub async fn watch_logs(&self, filter: EventFilter) -> Result<Streaming<pb::Log>, AgentError> {
        let mut watch = self.watch.clone();
        let request = pb::WatchRequest { filter: filter.as_str().to_string() };
        Ok(watch.watch_logs(request).await?.into_inner())
    }

    /// Send one host policy to the agent.
    ///
    /// Returns the agent's status string. Any delivered response counts as a
    /// wire-level success; the status field reports policy-engine-level
    /// success or failure and is surfaced to the operator as-is.
    pub async fn host_policy<T: Serialize>(
        &self,
        event: PolicyEventKind,
        object: &T,
    ) -> Result<String, AgentError> {
        #[derive(Serialize)]
        struct Envelope<'a, T> {
            #[serde(rename = "type")]
            kind: &'a str,
            object: &'a T,
        }

        let envelope = Envelope { kind: event.as_str(), object };
        let bytes = serde_json::to_vec(&envelope).map_err(AgentError::Encode)?;

        let mut policy = self.policy.clone();
        let reply = policy.host_policy(pb::PolicyRequest { policy: bytes }).await?;
        Ok(reply.into_inner().status)
    }
}
