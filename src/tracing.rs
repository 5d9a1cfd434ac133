//! Tracing subscriber setup for the scanner
//!
//! Console logging is always on; OTLP span export is attached only when an
//! endpoint is configured (CI runs usually have no collector to talk to).
//!
//! ```text
//! sentryscan → stdout (fmt layer, EnvFilter)
//!            → OTLP (gRPC) → collector   [only with SENTRYSCAN_OTLP_ENDPOINT]
//! ```

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subsystem.
///
/// # Arguments
/// * `service_name` - Name for the service in exported traces
/// * `otlp_endpoint` - OTLP endpoint URL; `None` disables span export entirely
pub fn init_tracing(
    service_name: &str,
    otlp_endpoint: Option<&str>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sentryscan=debug"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let registry = tracing_subscriber::registry().with(filter).with(fmt_layer);

    match otlp_endpoint {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);

            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(sdktrace::Config::default().with_resource(Resource::new(
                    vec![
                        KeyValue::new("service.name", service_name.to_string()),
                        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                    ],
                )))
                .install_batch(runtime::Tokio)?;

            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .init();

            tracing::info!(service = service_name, endpoint, "tracing initialized with OTLP export");
        }
        None => {
            registry.init();
            tracing::debug!(service = service_name, "tracing initialized (console only)");
        }
    }

    Ok(())
}

/// Flush any pending spans to the collector and tear the provider down.
///
/// A no-op when no OTLP pipeline was installed.
pub fn shutdown_tracing() {
    opentelemetry::global::shutdown_tracer_provider();
}
