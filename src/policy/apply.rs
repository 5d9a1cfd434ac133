//! Policy applier
//!
//! Every apply works on a private copy of a cached template: the hostname
//! label is forced to the local host, present action fields are rewritten to
//! the requested action, and empty fields are pruned. Dry run renders the
//! cleaned YAML; live apply fans out one task per policy through a bounded
//! permit pool (the same pattern as the DNS resolver, so a large template
//! set cannot exhaust agent-side RPC capacity). Partial application is not
//! rolled back.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};

use super::model::{HostPolicy, PolicyAction};
use super::templates::{PolicyError, TemplateCache};
use crate::agent::{AgentClient, PolicyEventKind};
use crate::metrics::POLICY_TEMPLATES;

/// Default apply fan-out bound.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    pub action: PolicyAction,
    pub event: PolicyEventKind,
    pub max_concurrency: usize,
}

/// Local hostname used to pin policies to this host.
pub fn local_hostname() -> Result<String, PolicyError> {
    let name = nix::unistd::gethostname()
        .map_err(|e| PolicyError::Hostname(std::io::Error::from(e)))?;
    Ok(name.to_string_lossy().into_owned())
}

/// Rewrite one template for this host. The cache entry itself is untouched.
fn prepare(template: &HostPolicy, hostname: &str, action: PolicyAction) -> HostPolicy {
    let mut policy = template.clone();
    policy.set_local_host(hostname);
    policy.rewrite_actions(action);
    policy.prune();
    policy
}

/// Render every prepared template as one `---`-separated YAML stream
/// without touching the agent.
pub fn render_dry_run(
    cache: &TemplateCache,
    action: PolicyAction,
    hostname: &str,
) -> Result<String, PolicyError> {
    let mut documents = Vec::with_capacity(cache.len());
    for (_, template) in cache.iter() {
        let policy = prepare(template, hostname, action);
        documents.push(serde_yaml::to_string(&policy).map_err(PolicyError::Render)?);
    }
    Ok(documents.join("---\n"))
}

/// Apply every cached template to the agent concurrently.
///
/// One task per policy, bounded by `max_concurrency` permits. Each task
/// reports its failure on a shared error channel; all tasks run to
/// completion and the first reported error, if any, is returned. Returns
/// the number of templates attempted.
pub async fn apply_templates(
    client: &AgentClient,
    cache: &TemplateCache,
    hostname: &str,
    opts: &ApplyOptions,
) -> Result<usize, PolicyError> {
    let permits = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
    let (err_tx, mut err_rx) = mpsc::channel::<(String, crate::agent::AgentError)>(cache.len().max(1));

    let mut handles = Vec::with_capacity(cache.len());
    for (name, template) in cache.iter() {
        let policy = prepare(template, hostname, opts.action);
        let client = client.clone();
        let name = name.clone();
        let err_tx = err_tx.clone();
        let permits = permits.clone();
        let event = opts.event;

        handles.push(tokio::spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // pool closed, session is tearing down
            };
            match client.host_policy(event, &policy).await {
                Ok(status) => {
                    POLICY_TEMPLATES.with_label_values(&["applied"]).inc();
                    // The status string is policy-engine feedback, not a wire
                    // error; surface it and move on.
                    tracing::info!(policy = %name, status = %status, "policy applied");
                }
                Err(e) => {
                    POLICY_TEMPLATES.with_label_values(&["apply_failed"]).inc();
                    tracing::error!(policy = %name, error = %e, "policy apply failed");
                    let _ = err_tx.send((name, e)).await;
                }
            }
        }));
    }
    drop(err_tx);

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "apply task failed to join");
        }
    }

    if let Some((name, source)) = err_rx.recv().await {
        return Err(PolicyError::Apply { name, source });
    }
    Ok(cache.len())
}
