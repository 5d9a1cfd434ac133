//! Prometheus metrics for scan observability
//!
//! These counters are populated by the collectors, the segregator, the DNS
//! resolver and the policy applier. `sentryscan scan --stats` dumps the
//! registry in text exposition format at session end so CI logs carry the
//! numbers without a scrape endpoint.

use lazy_static::lazy_static;
use prometheus::{register_counter_vec, CounterVec, Encoder, TextEncoder};

lazy_static! {
    /// Records decoded off the agent streams, by stream ("alert" / "log").
    pub static ref RECORDS_RECEIVED: CounterVec = register_counter_vec!(
        "sentryscan_records_received_total",
        "Records decoded from the agent event streams",
        &["stream"]
    ).expect("failed to register RECORDS_RECEIVED metric");

    /// Records dropped before segregation, by reason
    /// ("decode", "unknown_operation").
    pub static ref RECORDS_DROPPED: CounterVec = register_counter_vec!(
        "sentryscan_records_dropped_total",
        "Records dropped during ingestion",
        &["reason"]
    ).expect("failed to register RECORDS_DROPPED metric");

    /// Records appended to a segregated bucket, by bucket name
    /// (e.g. "network_alerts", "process_logs").
    pub static ref RECORDS_SEGREGATED: CounterVec = register_counter_vec!(
        "sentryscan_records_segregated_total",
        "Records appended to segregated store buckets",
        &["bucket"]
    ).expect("failed to register RECORDS_SEGREGATED metric");

    /// Reverse-DNS lookups, by outcome ("resolved", "unresolved", "skipped").
    pub static ref DNS_LOOKUPS: CounterVec = register_counter_vec!(
        "sentryscan_dns_lookups_total",
        "Reverse-DNS lookups performed for network events",
        &["outcome"]
    ).expect("failed to register DNS_LOOKUPS metric");

    /// Policy template operations, by outcome
    /// ("parsed", "parse_failed", "applied", "apply_failed").
    pub static ref POLICY_TEMPLATES: CounterVec = register_counter_vec!(
        "sentryscan_policy_templates_total",
        "Policy template parse and apply outcomes",
        &["outcome"]
    ).expect("failed to register POLICY_TEMPLATES metric");
}

/// Render every registered metric in Prometheus text exposition format.
pub fn dump() -> String {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() {
        return String::new();
    }
    String::from_utf8(buf).unwrap_or_default()
}
