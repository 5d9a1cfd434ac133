//! Scan session orchestration
//!
//! `ScanRunner::connect` performs the fatal preamble (channel + health
//! probe); `run` wires the collectors, consumes the event queue until both
//! streams end or the session is cancelled, then drains the segregated store
//! once into the session artifacts.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::collector::{pump_stream, spawn_error_reporter, ScanEvent};
use super::record::{OperationKind, Record};
use super::report;
use super::segregate::{BucketCounts, SegregatedStore};
use crate::agent::{AgentClient, AgentError, EventFilter};
use crate::forest::ProcessForest;
use crate::metrics;
use crate::netflow::{DomainResolver, NetworkCache};

pub const DEFAULT_AGENT_ADDR: &str = "http://127.0.0.1:50051";

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub agent_addr: String,
    pub filter: EventFilter,
    pub output_dir: PathBuf,
    pub resolver_permits: usize,
    /// How long the pre-scan health probe may take before the agent is
    /// declared dead.
    pub health_check_timeout: Duration,
    /// Dump the metrics registry at session end.
    pub stats: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            agent_addr: DEFAULT_AGENT_ADDR.to_string(),
            filter: EventFilter::default(),
            output_dir: PathBuf::from("."),
            resolver_permits: crate::netflow::resolver::DEFAULT_PERMITS,
            health_check_timeout: crate::agent::client::DEFAULT_HEALTH_CHECK_TIMEOUT,
            stats: false,
        }
    }
}

#[derive(Debug)]
pub enum ScanError {
    Agent(AgentError),
    Resolver(hickory_resolver::error::ResolveError),
    Serialize(serde_json::Error),
    Artifact { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::Agent(e) => write!(f, "{}", e),
            ScanError::Resolver(e) => write!(f, "failed to build DNS resolver: {}", e),
            ScanError::Serialize(e) => write!(f, "failed to serialize artifact: {}", e),
            ScanError::Artifact { path, source } => {
                write!(f, "failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ScanError::Agent(e) => Some(e),
            ScanError::Resolver(e) => Some(e),
            ScanError::Serialize(e) => Some(e),
            ScanError::Artifact { source, .. } => Some(source),
        }
    }
}

impl From<AgentError> for ScanError {
    fn from(e: AgentError) -> Self {
        ScanError::Agent(e)
    }
}

/// What one scan session saw, for the console summary.
#[derive(Debug)]
pub struct ScanSummary {
    pub session_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub counts: BucketCounts,
    pub network_events: usize,
    pub forest_roots: usize,
    pub collector_errors: usize,
    pub artifacts: Vec<PathBuf>,
}

impl ScanSummary {
    pub fn print(&self) {
        let c = &self.counts;
        println!("──────────── scan session {} ────────────", self.session_id);
        println!(
            "  alerts   network={} file={} process={}",
            c.network_alerts, c.file_alerts, c.process_alerts
        );
        println!(
            "  logs     network={} file={} process={}",
            c.network_logs, c.file_logs, c.process_logs
        );
        println!(
            "  network events={}  forest roots={}  collector errors={}",
            self.network_events, self.forest_roots, self.collector_errors
        );
        for artifact in &self.artifacts {
            println!("  artifact: {}", artifact.display());
        }
        let duration = self.finished_at - self.started_at;
        println!("  duration: {}.{:03}s", duration.num_seconds(), duration.num_milliseconds() % 1000);
    }
}

/// One scan session against one agent.
pub struct ScanRunner {
    client: AgentClient,
    config: ScanConfig,
    session_id: Uuid,
}

impl ScanRunner {
    /// Connect to the agent and verify it is healthy.
    ///
    /// Any failure here is fatal to the run: an unreachable agent, a nonce
    /// mismatch, or a probe timeout all return before any subscription is
    /// opened.
    pub async fn connect(config: ScanConfig) -> Result<Self, ScanError> {
        let session_id = Uuid::now_v7();
        tracing::info!(session = %session_id, addr = %config.agent_addr, "connecting to agent");

        let client = AgentClient::connect(&config.agent_addr).await?;
        client.health_check(config.health_check_timeout).await?;

        Ok(Self { client, config, session_id })
    }

    /// Run the session until both streams end or `cancel` fires.
    ///
    /// Cancellation stops production; records already accepted into the
    /// queue are still consumed before the session closes.
    pub async fn run(self, cancel: watch::Receiver<bool>) -> Result<ScanSummary, ScanError> {
        let started_at = Utc::now();
        let filter = self.config.filter;
        tracing::info!(session = %self.session_id, filter = filter.as_str(), "scan session started");

        let store = SegregatedStore::new();
        let resolver =
            DomainResolver::new(self.config.resolver_permits).map_err(ScanError::Resolver)?;
        let cache = NetworkCache::new(resolver);

        let alerts = self.client.watch_alerts(filter).await?;
        let logs = self.client.watch_logs(filter).await?;

        // Capacity 1: a slow consumer suspends the collectors, which in
        // turn throttles the transport.
        let (tx, mut rx) = mpsc::channel::<ScanEvent>(1);
        let (err_tx, err_rx) = mpsc::channel(16);
        let reporter = spawn_error_reporter(err_rx);

        let alert_pump = tokio::spawn(pump_stream(
            alerts,
            "alert",
            Record::from_alert,
            ScanEvent::Alert,
            tx.clone(),
            err_tx.clone(),
            cancel.clone(),
        ));
        let log_pump = tokio::spawn(pump_stream(
            logs,
            "log",
            Record::from_log,
            ScanEvent::Log,
            tx,
            err_tx,
            cancel,
        ));

        // The consumer drains until the channel closes, i.e. until both
        // pumps have dropped their senders. Network-category logs feed the
        // flow cache incrementally; everything is segregated.
        while let Some(event) = rx.recv().await {
            match event {
                ScanEvent::Alert(record) => {
                    store.segregate_alert(record).await;
                }
                ScanEvent::Log(record) => {
                    if record.operation_kind() == Some(OperationKind::Network) {
                        cache.add_network_event(&record).await;
                    }
                    store.segregate_log(record).await;
                }
            }
        }

        // Both pumps are done once the channel closed; join to surface
        // panics, then let the reporter drain the error queue.
        let _ = alert_pump.await;
        let _ = log_pump.await;
        let collector_errors = reporter.await.unwrap_or(0);

        self.finish(started_at, store, cache, collector_errors).await
    }

    /// Session end: reconstruct, resolve, and persist the artifacts.
    ///
    /// Writes are best-effort: every artifact is attempted, the first
    /// failure is returned after the summary has been printed.
    async fn finish(
        self,
        started_at: DateTime<Utc>,
        store: SegregatedStore,
        cache: NetworkCache,
        collector_errors: usize,
    ) -> Result<ScanSummary, ScanError> {
        let counts = store.counts().await;
        let data = store.into_inner();

        if let Err(e) = std::fs::create_dir_all(&self.config.output_dir) {
            return Err(ScanError::Artifact { path: self.config.output_dir.clone(), source: e });
        }

        let mut artifacts = Vec::new();
        let mut first_error: Option<ScanError> = None;
        let mut record = |result: Result<PathBuf, ScanError>| match result {
            Ok(path) => artifacts.push(path),
            Err(e) => {
                tracing::error!(error = %e, "artifact write failed");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        };

        record(self.write_json("segregated_data.json", &data));

        let forest = ProcessForest::build(&data.process_logs);
        let forest_roots = forest.root_count();
        record(self.write_json("process_tree.json", &forest));

        cache.resolve_domains().await;
        let network = cache.into_report().await;
        let network_events = network.network_events.len();
        record(self.write_json("network_events.json", &network));

        let rows = report::flatten_alerts(&data);
        record(
            report::render_json(&rows)
                .map_err(ScanError::Serialize)
                .and_then(|json| self.write_text("alerts.json", &json)),
        );
        record(self.write_text("alerts.md", &report::render_markdown(&rows)));

        let summary = ScanSummary {
            session_id: self.session_id,
            started_at,
            finished_at: Utc::now(),
            counts,
            network_events,
            forest_roots,
            collector_errors,
            artifacts,
        };
        summary.print();

        if self.config.stats {
            println!("{}", metrics::dump());
        }

        tracing::info!(session = %self.session_id, "scan session finished");
        match first_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) -> Result<PathBuf, ScanError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(ScanError::Serialize)?;
        self.write_bytes(name, &bytes)
    }

    fn write_text(&self, name: &str, contents: &str) -> Result<PathBuf, ScanError> {
        self.write_bytes(name, contents.as_bytes())
    }

    fn write_bytes(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, ScanError> {
        let path = Path::new(&self.config.output_dir).join(name);
        std::fs::write(&path, bytes)
            .map_err(|e| ScanError::Artifact { path: path.clone(), source: e })?;
        Ok(path)
    }
}
