//! Logging, span export and the Prometheus metric catalogue of the server.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_sdk::resource::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
use opentelemetry_stdout::SpanExporter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const SERVICE_NAME: &str = "scrum-poker-server";
const DEFAULT_FILTER: &str = "info,tower_http=warn,hyper=warn";

pub const CONNECTIONS_TOTAL: &str = "scrum_poker_connections_total";
pub const CONNECTIONS_ACTIVE: &str = "scrum_poker_connections_active";
pub const SESSIONS_ACTIVE: &str = "scrum_poker_sessions_active";
pub const SESSIONS_EXPIRED_TOTAL: &str = "scrum_poker_sessions_expired_total";
pub const INTENTS_TOTAL: &str = "scrum_poker_intents_total";
pub const INTENTS_REJECTED_TOTAL: &str = "scrum_poker_intents_rejected_total";
pub const BROADCAST_DROPS_TOTAL: &str = "scrum_poker_broadcast_drops_total";

#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives; falls back to `RUST_LOG`, then to info.
    pub log_filter: Option<String>,
    /// Also print finished spans to stdout through OpenTelemetry.
    pub otel_stdout: bool,
}

impl TelemetryConfig {
    fn env_filter(&self) -> Result<EnvFilter> {
        match &self.log_filter {
            Some(directives) => EnvFilter::try_new(directives)
                .with_context(|| format!("invalid log filter {directives:?}")),
            None => Ok(EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))),
        }
    }
}

/// Process-wide logging, tracing and metrics. Keep it alive for the life of
/// the server; dropping it flushes the span exporter.
pub struct Telemetry {
    metrics_handle: PrometheusHandle,
    tracer_provider: Option<SdkTracerProvider>,
}

impl Telemetry {
    pub fn init(config: &TelemetryConfig) -> Result<Self> {
        let filter = config.env_filter()?;
        let metrics_handle = PrometheusBuilder::new()
            .add_global_label("service", SERVICE_NAME)
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;
        describe_metrics();

        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false));

        let tracer_provider = if config.otel_stdout {
            let provider = SdkTracerProvider::builder()
                .with_simple_exporter(SpanExporter::default())
                .with_sampler(Sampler::AlwaysOn)
                .with_resource(
                    Resource::builder()
                        .with_attributes(vec![KeyValue::new("service.name", SERVICE_NAME)])
                        .build(),
                )
                .build();
            let tracer = provider.tracer(SERVICE_NAME);
            global::set_tracer_provider(provider.clone());
            registry
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .context("failed to initialise tracing subscriber")?;
            info!("span export to stdout enabled");
            Some(provider)
        } else {
            registry
                .try_init()
                .context("failed to initialise tracing subscriber")?;
            None
        };

        Ok(Self {
            metrics_handle,
            tracer_provider,
        })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        if let Some(provider) = &self.tracer_provider {
            if let Err(err) = provider.shutdown() {
                warn!(error = %err, "failed to shutdown OpenTelemetry tracer provider");
            }
        }
    }
}

fn describe_metrics() {
    describe_counter!(CONNECTIONS_TOTAL, Unit::Count, "Session channels opened.");
    describe_gauge!(CONNECTIONS_ACTIVE, Unit::Count, "Session channels currently open.");
    describe_gauge!(SESSIONS_ACTIVE, Unit::Count, "Sessions held by the registry.");
    describe_counter!(
        SESSIONS_EXPIRED_TOTAL,
        Unit::Count,
        "Sessions removed after staying without connections for the TTL."
    );
    describe_counter!(INTENTS_TOTAL, Unit::Count, "Decoded client intents, by kind.");
    describe_counter!(
        INTENTS_REJECTED_TOTAL,
        Unit::Count,
        "Frames or intent fields ignored, by reason."
    );
    describe_counter!(
        BROADCAST_DROPS_TOTAL,
        Unit::Count,
        "State pushes dropped because a connection's queue was full."
    );
}
