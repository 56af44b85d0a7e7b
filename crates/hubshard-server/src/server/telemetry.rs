//! # Telemetry Features
//!
//! Console logs are always on. OpenTelemetry export is optional and selected
//! with cargo features.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables OpenTelemetry distributed tracing (via spans) and the
//!   log statements of the `hubshard` engine.
//! - `metrics`: Enables OpenTelemetry metrics (workflow counts, activity
//!   attempts and retries, compensations, durations).
//! - `otlp`: Enables the OTLP/gRPC exporter. The collector address is read from
//!   `OTEL_EXPORTER_OTLP_ENDPOINT`, optional headers from
//!   `OTEL_EXPORTER_OTLP_HEADERS` (`key=value,key=value`).
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - Exporters require using at least one of: `tracing` or `metrics`.
//! - Both `otlp` and `stdout` exporters can be enabled at the same time.
//!
//! ## Example usage
//!
//! Enable tracing and metrics, exported to a local collector:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 \
//!   cargo run --features tracing,metrics,otlp
//! ```
//!
//! Enable only local stdout export:
//!
//! ```bash
//! cargo run --features tracing,stdout
//! ```

// Disallow using `otlp` without `tracing` or `metrics`
#[cfg(all(feature = "otlp", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!("The 'otlp' feature requires at least one of 'tracing' or 'metrics' to be enabled.");

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Core imports - always needed
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// OTLP-specific imports
#[cfg(all(feature = "otlp", any(feature = "metrics", feature = "tracing")))]
use opentelemetry_otlp::{Compression, Protocol, WithExportConfig, WithTonicConfig};
#[cfg(feature = "otlp")]
use tonic::metadata::{Ascii, MetadataKey, MetadataMap, MetadataValue};

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::propagation::TraceContextPropagator;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());

    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("hubshard")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Console output via `tracing_subscriber::fmt`, independent of the
    // `opentelemetry_stdout` exporter.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

#[cfg(feature = "otlp")]
fn otlp_endpoint() -> anyhow::Result<String> {
    use anyhow::Context;

    std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").context("missing `OTEL_EXPORTER_OTLP_ENDPOINT`")
}

#[cfg(feature = "otlp")]
fn otlp_metadata() -> anyhow::Result<MetadataMap> {
    use anyhow::Context;

    let mut map = MetadataMap::new();
    let Ok(raw) = std::env::var("OTEL_EXPORTER_OTLP_HEADERS") else {
        return Ok(map);
    };
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("invalid OTLP header `{pair}`, expected key=value"))?;
        let name = MetadataKey::<Ascii>::from_bytes(key.trim().as_bytes())
            .with_context(|| format!("invalid OTLP header name `{key}`"))?;
        let value = value
            .trim()
            .parse::<MetadataValue<Ascii>>()
            .with_context(|| format!("invalid OTLP header value for `{key}`"))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("hubshard")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_metadata(otlp_metadata()?)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(Compression::Gzip)
            .with_endpoint(otlp_endpoint()?)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build metrics exporter")?;

        builder.with_periodic_exporter(exporter)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        builder.with_span_processor(batch_processor(exporter))
    };

    #[cfg(feature = "otlp")]
    let builder = {
        use anyhow::Context;

        let exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_metadata(otlp_metadata()?)
            .with_timeout(std::time::Duration::from_secs(10))
            .with_compression(Compression::Gzip)
            .with_endpoint(otlp_endpoint()?)
            .with_protocol(Protocol::Grpc)
            .build()
            .context("failed to build tracer exporter")?;

        builder.with_span_processor(batch_processor(exporter))
    };

    Ok(builder.build())
}

#[cfg(all(feature = "tracing", any(feature = "stdout", feature = "otlp")))]
fn batch_processor<E>(exporter: E) -> sdktrace::BatchSpanProcessor
where
    E: opentelemetry_sdk::trace::SpanExporter + 'static,
{
    sdktrace::BatchSpanProcessor::builder(exporter)
        .with_batch_config(
            sdktrace::BatchConfigBuilder::default()
                .with_scheduled_delay(std::time::Duration::from_secs(5))
                .with_max_queue_size(2048)
                .build(),
        )
        .build()
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static WORKFLOWS_STARTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WORKFLOWS_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WORKFLOW_RESULTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static WORKFLOW_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ACTIVITY_ATTEMPTS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static ACTIVITY_RETRIES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static COMPENSATIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TELEMETRY_EVENTS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = WORKFLOWS_STARTED.set(
        meter
            .u64_counter("workflows_started")
            .with_description("Workflow instances accepted for execution")
            .build(),
    );

    let _ = WORKFLOWS_INFLIGHT.set(
        meter
            .i64_up_down_counter("workflows_inflight")
            .with_description("Workflow instances queued or running")
            .build(),
    );

    let _ = WORKFLOW_RESULTS.set(
        meter
            .u64_counter("workflow_results")
            .with_description("Terminal workflow results by kind")
            .build(),
    );

    let _ = WORKFLOW_DURATION_MS.set(
        meter
            .f64_histogram("workflow_duration")
            .with_unit("ms")
            .with_description("End-to-end workflow duration, retries included")
            .build(),
    );

    let _ = ACTIVITY_ATTEMPTS.set(
        meter
            .u64_counter("activity_attempts")
            .with_description("Activity attempts by activity and status")
            .build(),
    );

    let _ = ACTIVITY_RETRIES.set(
        meter
            .u64_counter("activity_retries")
            .with_description("Retries scheduled after a retryable failure")
            .build(),
    );

    let _ = COMPENSATIONS.set(
        meter
            .u64_counter("compensations")
            .with_description("Workflows that entered their rollback path")
            .build(),
    );

    let _ = TELEMETRY_EVENTS.set(
        meter
            .u64_counter("telemetry_events")
            .with_description("Business telemetry events by name")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_workflows_started() {
    if let Some(counter) = WORKFLOWS_STARTED.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_workflows_started() {}

#[cfg(feature = "metrics")]
pub fn increment_workflows_inflight() {
    if let Some(counter) = WORKFLOWS_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_workflows_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_workflows_inflight() {
    if let Some(counter) = WORKFLOWS_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_workflows_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_workflow_results(kind: &'static str) {
    if let Some(counter) = WORKFLOW_RESULTS.get() {
        counter.add(1, &[KeyValue::new("kind", kind)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_workflow_results(_kind: &'static str) {}

#[cfg(feature = "metrics")]
pub fn record_workflow_duration(duration_ms: f64) {
    if let Some(histogram) = WORKFLOW_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_workflow_duration(_duration_ms: f64) {}

#[cfg(feature = "metrics")]
pub fn increment_activity_attempts(activity: &'static str, status: &'static str) {
    if let Some(counter) = ACTIVITY_ATTEMPTS.get() {
        counter.add(
            1,
            &[
                KeyValue::new("activity", activity),
                KeyValue::new("status", status),
            ],
        );
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_activity_attempts(_activity: &'static str, _status: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_activity_retries(activity: &'static str) {
    if let Some(counter) = ACTIVITY_RETRIES.get() {
        counter.add(1, &[KeyValue::new("activity", activity)]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_activity_retries(_activity: &'static str) {}

#[cfg(feature = "metrics")]
pub fn increment_compensations() {
    if let Some(counter) = COMPENSATIONS.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_compensations() {}

#[cfg(feature = "metrics")]
pub fn increment_telemetry_events(name: &str) {
    if let Some(counter) = TELEMETRY_EVENTS.get() {
        counter.add(1, &[KeyValue::new("event", name.to_string())]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_telemetry_events(_name: &str) {}
