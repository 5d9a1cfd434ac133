//! Command-line surface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::agent::PolicyEventKind;
use crate::policy::apply::DEFAULT_MAX_CONCURRENCY;
use crate::policy::PolicyAction;
use crate::scan::session::DEFAULT_AGENT_ADDR;

#[derive(Parser, Debug)]
#[command(name = "sentryscan", version, about = "Host-side runtime-security scanner for CI/CD pipelines")]
pub struct Cli {
    /// Agent gRPC address (http://host:port or unix:///path)
    #[arg(long, global = true, env = "SENTRYSCAN_AGENT_ADDR", default_value = DEFAULT_AGENT_ADDR)]
    pub grpc: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one scan session and write the forensic artifacts
    Scan(ScanArgs),
    /// Fetch host-policy templates, rewrite them for this host, and apply them
    Policy(PolicyArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// Subscribe to all events
    #[arg(long)]
    pub all: bool,

    /// Subscribe to system events (ignored when --all is set)
    #[arg(long)]
    pub system: bool,

    /// Output directory for session artifacts
    #[arg(long, default_value = ".")]
    pub out: PathBuf,

    /// Dump the metrics registry at session end
    #[arg(long)]
    pub stats: bool,
}

#[derive(Args, Debug)]
pub struct PolicyArgs {
    /// Action to rewrite into every template
    #[arg(long, value_enum)]
    pub action: PolicyAction,

    /// Policy event kind sent to the agent
    #[arg(long, value_enum, default_value = "ADDED")]
    pub event: PolicyEventKind,

    /// Render the rewritten YAML instead of sending it to the agent
    #[arg(long)]
    pub dryrun: bool,

    /// Branch of the template repository to fetch
    #[arg(long, default_value = "main")]
    pub branch: String,

    /// Bound on concurrent policy applies
    #[arg(long, default_value_t = DEFAULT_MAX_CONCURRENCY)]
    pub max_concurrency: usize,
}
