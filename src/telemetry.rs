//! Logging and optional OpenTelemetry export for the hook runner
//!
//! Log lines go to stderr so the run report on stdout stays machine-readable.
//! When `OTEL_EXPORTER_OTLP_ENDPOINT` is set, hook spans and run metrics are
//! also pushed over OTLP.

use std::fmt::Display;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{Tracer, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,posthook=debug,kube=info,tower=warn,hyper=warn";

/// Telemetry setup failures
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be built
    #[error("OTLP {signal} exporter for {endpoint}: {message}")]
    Exporter {
        /// `traces` or `metrics`
        signal: &'static str,
        /// Collector endpoint
        endpoint: String,
        /// Underlying failure
        message: String,
    },

    /// A global subscriber is already installed
    #[error("tracing subscriber already installed: {0}")]
    Subscriber(String),
}

impl TelemetryError {
    fn exporter(signal: &'static str, endpoint: &str, message: impl Display) -> Self {
        Self::Exporter {
            signal,
            endpoint: endpoint.to_string(),
            message: message.to_string(),
        }
    }
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to exported spans and metrics
    pub service_name: String,
    /// OTLP collector endpoint; `None` keeps everything local
    pub otlp_endpoint: Option<String>,
    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "posthook".to_string(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            json: false,
        }
    }
}

/// Install the global subscriber, and the OTLP pipeline if configured
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let otel_layer = config
        .otlp_endpoint
        .as_deref()
        .map(|endpoint| install_otlp(endpoint, &config.service_name))
        .transpose()?
        .map(|tracer| tracing_opentelemetry::layer().with_tracer(tracer));

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_writer(std::io::stderr)
    });
    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init()
        .map_err(|e| TelemetryError::Subscriber(e.to_string()))
}

/// Flush exporters before the process exits
pub fn shutdown_telemetry() {
    global::shutdown_tracer_provider();
}

fn build_resource(service_name: &str) -> Resource {
    Resource::new([
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            service_name.to_string(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ])
}

/// Register global OTLP trace and metric providers and return the hook tracer
///
/// Metrics are pushed by a periodic reader so the counters recorded during a
/// short run still reach the collector.
fn install_otlp(endpoint: &str, service_name: &str) -> Result<Tracer, TelemetryError> {
    let resource = build_resource(service_name);

    let spans = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::exporter("traces", endpoint, e))?;
    let metrics = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| TelemetryError::exporter("metrics", endpoint, e))?;

    global::set_meter_provider(
        SdkMeterProvider::builder()
            .with_reader(PeriodicReader::builder(metrics, runtime::Tokio).build())
            .with_resource(resource.clone())
            .build(),
    );

    let provider = TracerProvider::builder()
        .with_batch_exporter(spans, runtime::Tokio)
        .with_resource(resource)
        .build();
    let tracer = provider.tracer(service_name.to_string());
    global::set_tracer_provider(provider);
    Ok(tracer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_errors_name_signal_and_endpoint() {
        let err = TelemetryError::exporter("metrics", "http://collector:4317", "invalid uri");
        assert_eq!(
            err.to_string(),
            "OTLP metrics exporter for http://collector:4317: invalid uri"
        );
    }

    #[test]
    fn test_resource_names_the_service() {
        let resource = build_resource("posthook-test");
        assert!(resource.iter().any(|(key, value)| {
            key.as_str() == opentelemetry_semantic_conventions::resource::SERVICE_NAME
                && value.as_str() == "posthook-test"
        }));
    }

    #[test]
    fn test_default_filter_is_verbose_for_this_crate_only() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
        assert!(DEFAULT_FILTER.contains("posthook=debug"));
    }
}
