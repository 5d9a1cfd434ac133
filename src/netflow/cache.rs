//! Network event cache
//!
//! Flow and protocol are derived from the record's `data` hint by keyword
//! matching, not full parsing: the agent's kprobe/syscall strings are stable
//! enough for substring checks, and anything we cannot classify is dropped
//! rather than cached half-empty.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::resolver::DomainResolver;
use crate::metrics::RECORDS_DROPPED;
use crate::scan::Record;

/// One structured network flow observed during the session.
///
/// An event is cached only if both `flow` and `protocol` could be derived;
/// the invariant is enforced in [`NetworkEvent::from_record`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEvent {
    pub host_pid: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub process_name: String,
    /// "egress" or "ingress".
    pub flow: String,
    /// "TCP" or "UDP".
    pub protocol: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

/// Serialized artifact shape: `{"networkEvents": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkReport {
    #[serde(rename = "networkEvents")]
    pub network_events: Vec<NetworkEvent>,
}

impl NetworkEvent {
    /// Derive a network event from a network-category record.
    ///
    /// Returns `None` when neither flow nor protocol can be derived; such
    /// records are never cached.
    pub fn from_record(record: &Record) -> Option<NetworkEvent> {
        let mut event = NetworkEvent {
            host_pid: record.host_pid,
            process_name: record.process_name.clone(),
            ..NetworkEvent::default()
        };

        let data = record.data.as_str();
        if contains_ignore_case(data, "tcp_connect") {
            event.flow = "egress".to_string();
            event.protocol = "TCP".to_string();
            parse_resource_fields(&record.resource, &mut event);
        } else if contains_ignore_case(data, "tcp_accept") {
            event.flow = "ingress".to_string();
            event.protocol = "TCP".to_string();
            parse_resource_fields(&record.resource, &mut event);
        } else if data.contains("SYS_BIND") {
            // Flow is whatever the resource fields say; no kprobe to infer
            // a direction from.
            parse_resource_fields(&record.resource, &mut event);
        } else if data.contains("SYS_SOCKET") && record.resource.contains("SOCK_DGRAM") {
            event.flow = "egress".to_string();
            event.protocol = "UDP".to_string();
        } else {
            return None;
        }

        if event.flow.is_empty() || event.protocol.is_empty() {
            return None;
        }
        Some(event)
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_ascii_lowercase().contains(needle)
}

/// Scan a `key=value` resource string for the fields we recognize.
///
/// Keys come in two generations of agent output: `remoteip`/`port`/`protocol`
/// and the raw sockaddr names `sin_addr`/`sin_port`/`sa_family`.
fn parse_resource_fields(resource: &str, event: &mut NetworkEvent) {
    for token in resource.split_whitespace() {
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "remoteip" | "sin_addr" => event.remote_ip = value.to_string(),
            "port" | "sin_port" => {
                if let Ok(port) = value.parse::<u16>() {
                    event.port = port;
                }
            }
            "protocol" | "sa_family" => {
                let upper = value.to_ascii_uppercase();
                if upper.contains("TCP") {
                    event.protocol = "TCP".to_string();
                } else if upper.contains("UDP") {
                    event.protocol = "UDP".to_string();
                }
            }
            "flow" => {
                let lower = value.to_ascii_lowercase();
                if lower == "egress" || lower == "ingress" {
                    event.flow = lower;
                }
            }
            _ => {}
        }
    }
}

/// Lock-protected pid-indexed flow cache plus its owned resolver.
pub struct NetworkCache {
    events: Mutex<HashMap<i32, Vec<NetworkEvent>>>,
    resolver: DomainResolver,
}

impl NetworkCache {
    pub fn new(resolver: DomainResolver) -> Self {
        Self { events: Mutex::new(HashMap::new()), resolver }
    }

    /// Derive and cache the flow carried by a network-category record.
    ///
    /// Returns whether an event was cached.
    pub async fn add_network_event(&self, record: &Record) -> bool {
        let Some(event) = NetworkEvent::from_record(record) else {
            RECORDS_DROPPED.with_label_values(&["unparsed_flow"]).inc();
            return false;
        };

        self.events.lock().await.entry(record.host_pid).or_default().push(event);
        true
    }

    pub async fn event_count(&self) -> usize {
        self.events.lock().await.values().map(Vec::len).sum()
    }

    /// Resolve remote IPs to domains in one bounded-concurrency batch.
    ///
    /// Blocks until every lookup has completed or been abandoned, then
    /// writes the resolved domains back into the cache.
    pub async fn resolve_domains(&self) {
        let batch: Vec<NetworkEvent> = {
            let mut events = self.events.lock().await;
            events.drain().flat_map(|(_, v)| v).collect()
        };
        if batch.is_empty() {
            return;
        }

        let resolved = self.resolver.resolve_concurrently(batch).await;

        let mut events = self.events.lock().await;
        for event in resolved {
            events.entry(event.host_pid).or_default().push(event);
        }
    }

    /// Consume the cache into the serialized artifact shape.
    ///
    /// Events are ordered by (pid, port, remote ip) so the artifact is a
    /// deterministic function of the input.
    pub async fn into_report(self) -> NetworkReport {
        let mut flat: Vec<NetworkEvent> =
            self.events.into_inner().into_values().flatten().collect();
        flat.sort_by(|a, b| {
            (a.host_pid, a.port, &a.remote_ip).cmp(&(b.host_pid, b.port, &b.remote_ip))
        });
        NetworkReport { network_events: flat }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netflow::resolver::ReverseLookup;
    use futures_util::future::BoxFuture;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn network_log(data: &str, resource: &str) -> Record {
        Record {
            host_pid: 100,
            process_name: "curl".to_string(),
            operation: "Network".to_string(),
            data: data.to_string(),
            resource: resource.to_string(),
            ..Record::default()
        }
    }

    struct StaticLookup;
    impl ReverseLookup for StaticLookup {
        fn lookup(&self, _ip: Ipv4Addr) -> BoxFuture<'static, Option<String>> {
            Box::pin(async { Some("resolved.example.com".to_string()) })
        }
    }

    fn cache() -> NetworkCache {
        NetworkCache::new(DomainResolver::with_lookup(Arc::new(StaticLookup), 10))
    }

    #[test]
    fn test_tcp_connect_kprobe_is_egress() {
        let record = network_log(
            "kprobe=tcp_connect",
            "remoteip=127.0.0.1 port=12345 protocol=TCP",
        );
        let event = NetworkEvent::from_record(&record).unwrap();
        assert_eq!(event.flow, "egress");
        assert_eq!(event.protocol, "TCP");
        assert_eq!(event.remote_ip, "127.0.0.1");
        assert_eq!(event.port, 12345);
    }

    #[test]
    fn test_tcp_accept_kprobe_is_ingress() {
        let record = network_log("kprobe=tcp_accept", "sin_addr=10.2.3.4 sin_port=8080");
        let event = NetworkEvent::from_record(&record).unwrap();
        assert_eq!(event.flow, "ingress");
        assert_eq!(event.protocol, "TCP");
        assert_eq!(event.remote_ip, "10.2.3.4");
        assert_eq!(event.port, 8080);
    }

    #[test]
    fn test_udp_socket_needs_no_field_parse() {
        let record = network_log("syscall=SYS_SOCKET", "domain=AF_INET type=SOCK_DGRAM");
        let event = NetworkEvent::from_record(&record).unwrap();
        assert_eq!(event.flow, "egress");
        assert_eq!(event.protocol, "UDP");
        assert!(event.remote_ip.is_empty());
        assert_eq!(event.port, 0);
    }

    #[test]
    fn test_bind_without_flow_field_is_dropped() {
        // SYS_BIND parses fields but derives no direction by itself.
        let record = network_log("syscall=SYS_BIND", "sin_addr=0.0.0.0 sin_port=53 sa_family=UDP");
        assert!(NetworkEvent::from_record(&record).is_none());
    }

    #[test]
    fn test_bind_with_flow_field_survives() {
        let record = network_log(
            "syscall=SYS_BIND",
            "flow=ingress sin_addr=0.0.0.0 sin_port=53 sa_family=UDP",
        );
        let event = NetworkEvent::from_record(&record).unwrap();
        assert_eq!(event.flow, "ingress");
        assert_eq!(event.protocol, "UDP");
        assert_eq!(event.port, 53);
    }

    #[test]
    fn test_unclassifiable_record_is_dropped() {
        assert!(NetworkEvent::from_record(&network_log("syscall=SYS_OPEN", "/etc/passwd")).is_none());
        assert!(NetworkEvent::from_record(&network_log("", "")).is_none());
    }

    #[tokio::test]
    async fn test_cache_never_holds_partial_events() {
        let cache = cache();
        assert!(cache.add_network_event(&network_log("kprobe=tcp_connect", "remoteip=1.2.3.4")).await);
        assert!(!cache.add_network_event(&network_log("syscall=SYS_BIND", "sin_port=53")).await);
        assert!(!cache.add_network_event(&network_log("unrelated", "")).await);

        let report = cache.into_report().await;
        assert_eq!(report.network_events.len(), 1);
        assert!(report
            .network_events
            .iter()
            .all(|e| !e.flow.is_empty() && !e.protocol.is_empty()));
    }

    #[tokio::test]
    async fn test_resolve_domains_writes_back() {
        let cache = cache();
        cache
            .add_network_event(&network_log("kprobe=tcp_connect", "remoteip=93.184.216.34 port=443"))
            .await;
        cache
            .add_network_event(&network_log("syscall=SYS_SOCKET", "type=SOCK_DGRAM"))
            .await;

        cache.resolve_domains().await;

        let report = cache.into_report().await;
        assert_eq!(report.network_events.len(), 2);
        let with_ip = report.network_events.iter().find(|e| !e.remote_ip.is_empty()).unwrap();
        assert_eq!(with_ip.domain.as_deref(), Some("resolved.example.com"));
        let without_ip = report.network_events.iter().find(|e| e.remote_ip.is_empty()).unwrap();
        assert!(without_ip.domain.is_none());
    }

    #[tokio::test]
    async fn test_report_is_deterministically_ordered() {
        let cache = cache();
        let mut a = network_log("kprobe=tcp_connect", "remoteip=9.9.9.9 port=53");
        a.host_pid = 300;
        let mut b = network_log("kprobe=tcp_connect", "remoteip=8.8.8.8 port=53");
        b.host_pid = 100;
        cache.add_network_event(&a).await;
        cache.add_network_event(&b).await;

        let report = cache.into_report().await;
        let pids: Vec<i32> = report.network_events.iter().map(|e| e.host_pid).collect();
        assert_eq!(pids, vec![100, 300]);
    }

    #[test]
    fn test_domain_omitted_from_artifact_when_absent() {
        let event = NetworkEvent {
            host_pid: 1,
            flow: "egress".to_string(),
            protocol: "UDP".to_string(),
            ..NetworkEvent::default()
        };
        let json = serde_json::to_value(&event).unwrap();
        assert!(json.get("domain").is_none());
        assert!(json.get("remoteIp").is_none());
        assert!(json.get("port").is_none());
    }
}
