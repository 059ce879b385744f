//! Logging, tracing and metrics setup shared by the ferry crates.
//!
//! Logs go to stdout, either as human readable lines or as JSON when
//! `RUST_LOG_FORMAT=json`. OpenTelemetry export over OTLP is opt-in:
//! it only starts when `OTEL_SDK_DISABLED=false`.
use std::{borrow::Cow, time::Duration};

use opentelemetry::{InstrumentationScope, global, trace::TracerProvider as _};
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter};
use opentelemetry_sdk::{
    Resource,
    metrics::{MeterProviderBuilder, PeriodicReader},
    trace::SdkTracerProvider,
};
use snafu::{ResultExt, Snafu};
use tracing::Subscriber;
use tracing_opentelemetry::MetricsLayer;
use tracing_subscriber::{EnvFilter, Layer, prelude::*, registry::LookupSpan};

pub use opentelemetry::{
    KeyValue,
    metrics::{Counter, Gauge, Histogram, Meter},
};

pub use crate::{format::LogFormat, metrics::MetricsExporter};

mod format;
mod metrics;

const OTEL_SDK_DISABLED: &str = "OTEL_SDK_DISABLED";
const RUST_LOG_FORMAT: &str = "RUST_LOG_FORMAT";
const DEFAULT_DIRECTIVE: &str = "info";
const METRICS_EXPORT_INTERVAL: Duration = Duration::from_secs(10);

pub type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync>;

#[derive(Debug, Snafu)]
pub enum ObservabilityError {
    #[snafu(display("failed to build {signal} exporter"))]
    Exporter {
        signal: &'static str,
        source: ExporterBuildError,
    },
}

/// Returns a meter from the global meter provider.
pub fn meter(name: &'static str) -> Meter {
    global::meter(name)
}

/// Installs the global tracing subscriber and meter provider.
///
/// `metrics_exporter` is always registered, so metrics can be read in
/// process even when OTLP export is disabled.
pub fn init_observability(
    service_name: impl Into<Cow<'static, str>>,
    service_version: impl Into<Cow<'static, str>>,
    metrics_exporter: MetricsExporter,
) -> Result<(), ObservabilityError> {
    let otel = otel_layer(
        service_name.into(),
        service_version.into(),
        metrics_exporter,
        otel_export_enabled(),
    )?;

    tracing_subscriber::registry()
        .with(vec![stdout_layer(), otel])
        .init();

    Ok(())
}

/// OTLP export stays off unless explicitly enabled.
fn otel_export_enabled() -> bool {
    std::env::var(OTEL_SDK_DISABLED)
        .map(|value| value.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE))
}

fn stdout_layer<S>() -> BoxedLayer<S>
where
    S: Subscriber,
    for<'a> S: LookupSpan<'a>,
{
    let json = std::env::var(RUST_LOG_FORMAT)
        .map(|value| value.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        return tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_current_span(true)
            .with_filter(env_filter())
            .boxed();
    }

    tracing_subscriber::fmt::layer()
        .with_ansi(true)
        .event_format(LogFormat)
        .fmt_fields(LogFormat)
        .with_filter(env_filter())
        .boxed()
}

fn otel_layer<S>(
    service_name: Cow<'static, str>,
    service_version: Cow<'static, str>,
    metrics_exporter: MetricsExporter,
    export: bool,
) -> Result<BoxedLayer<S>, ObservabilityError>
where
    S: Subscriber + Send + Sync,
    for<'a> S: LookupSpan<'a>,
{
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();
    let scope = InstrumentationScope::builder(service_name)
        .with_version(service_version)
        .build();

    let mut tracer_provider = SdkTracerProvider::builder().with_resource(resource.clone());
    let mut meter_provider = MeterProviderBuilder::default()
        .with_resource(resource)
        .with_reader(metrics_exporter);

    if export {
        let spans = SpanExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu { signal: "span" })?;
        tracer_provider = tracer_provider.with_batch_exporter(spans);

        let metrics = MetricExporter::builder()
            .with_tonic()
            .build()
            .context(ExporterSnafu { signal: "metric" })?;
        meter_provider = meter_provider.with_reader(
            PeriodicReader::builder(metrics)
                .with_interval(METRICS_EXPORT_INTERVAL)
                .build(),
        );
    }

    let tracer = tracer_provider.build().tracer_with_scope(scope);
    let meter_provider = meter_provider.build();
    global::set_meter_provider(meter_provider.clone());

    Ok(env_filter()
        .and_then(MetricsLayer::new(meter_provider))
        .and_then(tracing_opentelemetry::layer().with_tracer(tracer))
        .boxed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_builds_counters_without_provider() {
        let counter = meter("test").u64_counter("test.counter").build();
        counter.add(1, &[KeyValue::new("destination", "orders")]);
    }
}
