//! Alert report rendering
//!
//! A pure transform over the three alert buckets: flatten to rows, render
//! JSON and a fixed-column Markdown table. Serialization is the only effect.

use serde::Serialize;

use super::segregate::SegregatedData;

/// One flattened alert row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRow {
    pub policy_name: String,
    pub operation: String,
    pub host_pid: i32,
    pub process_name: String,
    /// Best-effort binary name: the last path component of the resource.
    pub actual_name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

const MARKDOWN_COLUMNS: [&str; 7] =
    ["Policy", "Operation", "PID", "Process", "Actual Process", "Message", "Tags"];

/// Flatten the three alert buckets into report rows, in bucket order
/// (network, file, process) and receipt order within each bucket.
pub fn flatten_alerts(data: &SegregatedData) -> Vec<AlertRow> {
    data.network_alerts
        .iter()
        .chain(data.file_alerts.iter())
        .chain(data.process_alerts.iter())
        .map(|record| AlertRow {
            policy_name: record.policy_name.clone(),
            operation: record.operation.clone(),
            host_pid: record.host_pid,
            process_name: record.process_name.clone(),
            actual_name: strip_path(&record.resource),
            message: record.message.clone(),
            tags: record.effective_tags(),
        })
        .collect()
}

/// Last component of a path-like resource string.
fn strip_path(resource: &str) -> String {
    resource.rsplit('/').next().unwrap_or(resource).to_string()
}

pub fn render_json(rows: &[AlertRow]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(rows)
}

/// Fixed-column Markdown table, one row per alert.
pub fn render_markdown(rows: &[AlertRow]) -> String {
    let mut out = String::new();
    out.push_str("# Alert Summary\n\n");
    out.push_str(&format!(
        "Generated at {} - {} alert(s)\n\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        rows.len()
    ));

    out.push_str(&format!("| {} |\n", MARKDOWN_COLUMNS.join(" | ")));
    out.push_str(&format!("|{}\n", "---|".repeat(MARKDOWN_COLUMNS.len())));

    for row in rows {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} | {} |\n",
            cell(&row.policy_name),
            cell(&row.operation),
            row.host_pid,
            cell(&row.process_name),
            cell(&row.actual_name),
            cell(&row.message),
            cell(&row.tags.join(", ")),
        ));
    }
    out
}

/// Keep table geometry intact for empty or pipe-carrying values.
fn cell(value: &str) -> String {
    if value.is_empty() {
        "-".to_string()
    } else {
        value.replace('|', "\\|")
    }
}
