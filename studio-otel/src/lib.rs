//! Tracing and metrics initialization for the workflow engine.
//!
//! `init_telemetry`/`shutdown` give the process-wide `init`/`shutdown`
//! lifecycle spec §9 asks for ("no hidden singletons; dependency injection
//! at the edges") — the returned [`TelemetryGuard`] is held by the caller
//! (typically `studio-cli`'s `main`), not stashed in a static.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{runtime, trace as sdktrace, Resource};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

/// Where spans should be sent.
#[derive(Debug, Clone)]
pub enum Exporter {
    /// No OTLP export, `tracing_subscriber::fmt` only. Used in tests and
    /// local development.
    None,
    Otlp { endpoint: String },
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub exporter: Exporter,
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { service_name: "apps-script-studio".to_string(), exporter: Exporter::None, json_logs: false }
    }
}

/// Held for the process lifetime; dropping it does not itself flush —
/// call [`TelemetryGuard::shutdown`] explicitly so exporters drain before
/// the process exits.
pub struct TelemetryGuard {
    has_provider: bool,
}

impl TelemetryGuard {
    pub fn shutdown(self) {
        if self.has_provider {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Install the global `tracing` subscriber. Call once at process startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, String> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let fmt_layer = if config.json_logs {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    match &config.exporter {
        Exporter::None => {
            Registry::default().with(env_filter).with(fmt_layer).try_init().map_err(|e| e.to_string())?;
            Ok(TelemetryGuard { has_provider: false })
        }
        Exporter::Otlp { endpoint } => {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint.clone()))
                .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![KeyValue::new(
                    "service.name",
                    config.service_name.clone(),
                )])))
                .install_batch(runtime::Tokio)
                .map_err(|e| e.to_string())?;

            let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

            Registry::default()
                .with(env_filter)
                .with(fmt_layer)
                .with(otel_layer)
                .try_init()
                .map_err(|e| e.to_string())?;

            Ok(TelemetryGuard { has_provider: true })
        }
    }
}

use tracing_subscriber::layer::Layer;
trait BoxedLayerExt<S>: Layer<S> + Sized + Send + Sync + 'static {
    fn boxed(self) -> Box<dyn Layer<S> + Send + Sync + 'static> {
        Box::new(self)
    }
}
impl<S, L: Layer<S> + Send + Sync + 'static> BoxedLayerExt<S> for L {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_no_exporter() {
        let config = TelemetryConfig::default();
        assert!(matches!(config.exporter, Exporter::None));
    }
}
