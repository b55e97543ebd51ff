// Telemetry: structured logging, OpenTelemetry tracing, Prometheus metrics

use crate::models::{FailureKind, Platform};
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const SERVICE_NAME: &str = "publication-scheduler";

/// Initialize JSON logging, with an OpenTelemetry layer when an endpoint is given
///
/// `RUST_LOG` takes precedence over `log_level`.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized"
    );

    Ok(())
}

/// OTLP (gRPC) tracer exporting every span
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", SERVICE_NAME),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let tracer = tracer_provider.tracer(SERVICE_NAME);

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Flush remaining spans on graceful shutdown
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Install the Prometheus exporter and describe the publication metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(
        "publication_success_total",
        "Deliveries that ended published with a permalink"
    );
    describe_counter!(
        "publication_failed_total",
        "Delivery attempts that ended failed, by failure kind"
    );
    describe_counter!(
        "invariant_corrections_total",
        "Platform records repaired by the status validator"
    );
    describe_counter!(
        "tick_skipped_total",
        "Scheduler ticks skipped because another tick held the flag"
    );
    describe_histogram!(
        "tick_duration_seconds",
        "Duration of scheduler tick bodies in seconds"
    );
    describe_gauge!("due_pairs", "Due (content, platform) pairs found by the last tick");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_publication_success(platform: Platform) {
    counter!("publication_success_total", "platform" => platform.as_str()).increment(1);
}

#[inline]
pub fn record_publication_failure(platform: Platform, kind: FailureKind) {
    counter!(
        "publication_failed_total",
        "platform" => platform.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

/// Counted per repaired record, labelled with the repair applied
#[inline]
pub fn record_invariant_correction(repair: &'static str) {
    counter!("invariant_corrections_total", "repair" => repair).increment(1);
}

#[inline]
pub fn record_tick_skipped() {
    counter!("tick_skipped_total").increment(1);
}

#[inline]
pub fn record_tick_duration(duration_seconds: f64) {
    histogram!("tick_duration_seconds").record(duration_seconds);
}

#[inline]
pub fn update_due_pairs(count: usize) {
    gauge!("due_pairs").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_logging_init_is_refused() {
        let _ = init_logging("info", None);
        assert!(init_logging("debug", None).is_err());
    }

    #[test]
    fn test_metrics_recording_without_exporter() {
        record_publication_success(Platform::Telegram);
        record_publication_failure(Platform::Vk, FailureKind::Transport);
        record_invariant_correction("permalink");
        record_tick_skipped();
        record_tick_duration(0.25);
        update_due_pairs(3);
    }
}
