//! Permit-bounded concurrent reverse-DNS resolver
//!
//! One resolution task is spawned per event with a syntactically valid IPv4
//! remote address. Every task takes one permit from a fixed-capacity
//! semaphore before touching the network and releases it on drop, so at most
//! `permits` lookups run at any instant regardless of batch size. The caller
//! is suspended until every task has completed (fan-out/fan-in barrier).

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use hickory_resolver::error::ResolveError;
use hickory_resolver::TokioAsyncResolver;
use tokio::sync::Semaphore;

use super::cache::NetworkEvent;
use crate::metrics::DNS_LOOKUPS;

/// Default permit pool capacity.
pub const DEFAULT_PERMITS: usize = 100;

/// Seam between the resolver plumbing and the actual lookup backend.
///
/// Production uses [`SystemLookup`]; tests substitute a counting double to
/// assert the concurrency bound without network access.
pub trait ReverseLookup: Send + Sync {
    /// Resolve one IPv4 address to a domain name, `None` on any failure.
    fn lookup(&self, ip: Ipv4Addr) -> BoxFuture<'static, Option<String>>;
}

/// Reverse lookup backed by the system resolver configuration.
pub struct SystemLookup {
    resolver: TokioAsyncResolver,
}

impl SystemLookup {
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        Ok(Self { resolver: TokioAsyncResolver::tokio_from_system_conf()? })
    }
}

impl ReverseLookup for SystemLookup {
    fn lookup(&self, ip: Ipv4Addr) -> BoxFuture<'static, Option<String>> {
        let resolver = self.resolver.clone();
        Box::pin(async move {
            match resolver.reverse_lookup(IpAddr::V4(ip)).await {
                Ok(names) => names
                    .iter()
                    .next()
                    .map(|ptr| ptr.to_string().trim_end_matches('.').to_string()),
                Err(e) => {
                    tracing::debug!(ip = %ip, error = %e, "reverse lookup failed");
                    None
                }
            }
        })
    }
}

/// Fan-out resolver owned by the network cache.
pub struct DomainResolver {
    lookup: Arc<dyn ReverseLookup>,
    permits: Arc<Semaphore>,
}

impl DomainResolver {
    /// Build a resolver over the system DNS configuration.
    pub fn new(permits: usize) -> Result<Self, ResolveError> {
        Ok(Self::with_lookup(Arc::new(SystemLookup::from_system_conf()?), permits))
    }

    /// Build a resolver over an explicit lookup backend.
    pub fn with_lookup(lookup: Arc<dyn ReverseLookup>, permits: usize) -> Self {
        Self { lookup, permits: Arc::new(Semaphore::new(permits.max(1))) }
    }

    /// Resolve domains for a batch of events, bounded by the permit pool.
    ///
    /// Events without a parseable IPv4 remote address are never submitted
    /// and keep an absent domain. Returns once every spawned task is done;
    /// completion order is unspecified.
    pub async fn resolve_concurrently(&self, mut events: Vec<NetworkEvent>) -> Vec<NetworkEvent> {
        let mut handles = Vec::new();

        for (idx, event) in events.iter().enumerate() {
            let Ok(ip) = event.remote_ip.parse::<Ipv4Addr>() else {
                DNS_LOOKUPS.with_label_values(&["skipped"]).inc();
                continue;
            };

            let lookup = self.lookup.clone();
            let permits = self.permits.clone();
            handles.push(tokio::spawn(async move {
                // Released on drop, even if the lookup panics.
                let _permit = match permits.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return (idx, None), // pool closed, nothing to do
                };
                (idx, lookup.lookup(ip).await)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((idx, Some(domain))) => {
                    DNS_LOOKUPS.with_label_values(&["resolved"]).inc();
                    events[idx].domain = Some(domain);
                }
                Ok((_, None)) => {
                    DNS_LOOKUPS.with_label_values(&["unresolved"]).inc();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "resolver task failed");
                }
            }
        }

        events
    }
}
