//! Logging and tracing bootstrap.
//!
//! # Responsibilities
//! - Install the `tracing` subscriber (console + rotating JSON file)
//! - Build the OTLP tracer provider when tracing is enabled
//! - Flush and shut everything down exactly once on exit
//!
//! # Design Decisions
//! - `init` may succeed once per process; a second call reports an error
//! - `shutdown` consumes the handle, so it cannot run twice
//! - The file sink goes through a non-blocking worker; its guard lives here

use std::str::FromStr;

use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::schema::{
    ConsoleFormat, LogFileConfig, LogRotation, ObservabilityConfig, OtlpProtocol, TracingConfig,
};
use crate::observability::logging::JsonLayer;
use crate::observability::ObservabilityContext;

/// Error type for telemetry setup and teardown.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("cannot open log file: {0}")]
    Appender(#[from] InitError),

    #[error("cannot build span exporter: {0}")]
    Exporter(String),

    #[error("cannot install subscriber: {0}")]
    Subscriber(#[from] TryInitError),

    #[error("tracer provider shutdown failed: {0}")]
    Shutdown(String),
}

/// Process-wide telemetry handle.
pub struct Telemetry {
    context: ObservabilityContext,
    provider: Option<SdkTracerProvider>,
    file_guard: Option<WorkerGuard>,
}

impl Telemetry {
    /// Install log sinks and, if enabled, the span exporter.
    ///
    /// `default_service_name` is used when `tracing.service_name` is empty.
    pub fn init(
        config: &ObservabilityConfig,
        default_service_name: &str,
    ) -> Result<Self, TelemetryError> {
        let console_filter = console_filter(&config.log_level)?;
        let console: Box<dyn Layer<Registry> + Send + Sync> = match config.console_format {
            ConsoleFormat::Pretty => tracing_subscriber::fmt::layer().with_target(true).boxed(),
            ConsoleFormat::Json => JsonLayer::new(std::io::stdout).boxed(),
        };

        let (file_layer, file_guard) = match file_writer(&config.file)? {
            Some((writer, guard)) => {
                let level = file_level(&config.file)?;
                (Some(JsonLayer::new(writer).with_filter(level)), Some(guard))
            }
            None => (None, None),
        };

        let provider = if config.tracing.enabled {
            let service_name = if config.tracing.service_name.is_empty() {
                default_service_name
            } else {
                config.tracing.service_name.as_str()
            };
            Some(build_provider(&config.tracing, service_name)?)
        } else {
            None
        };

        tracing_subscriber::registry()
            .with(console.with_filter(console_filter))
            .with(file_layer)
            .try_init()?;

        let context = provider
            .as_ref()
            .map(ObservabilityContext::new)
            .unwrap_or_else(ObservabilityContext::without_tracing);

        tracing::info!(
            tracing_enabled = context.tracing_enabled(),
            file_sink = file_guard.is_some(),
            otlp_endpoint = %config.tracing.otlp_endpoint,
            "Telemetry initialized"
        );

        Ok(Self {
            context,
            provider,
            file_guard,
        })
    }

    /// Handle for the request pipeline.
    pub fn context(&self) -> ObservabilityContext {
        self.context.clone()
    }

    /// Flush pending spans and log lines, then release the exporters.
    pub fn shutdown(self) -> Result<(), TelemetryError> {
        let Self {
            provider,
            file_guard,
            ..
        } = self;

        tracing::info!("Telemetry shutting down");
        let result = match provider {
            Some(provider) => provider
                .shutdown()
                .map_err(|e| TelemetryError::Shutdown(e.to_string())),
            None => Ok(()),
        };
        drop(file_guard);
        result
    }
}

fn console_filter(level: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| TelemetryError::Filter(e.to_string()))
}

fn file_level(config: &LogFileConfig) -> Result<LevelFilter, TelemetryError> {
    LevelFilter::from_str(&config.level).map_err(|e| TelemetryError::Filter(e.to_string()))
}

fn file_writer(config: &LogFileConfig) -> Result<Option<(NonBlocking, WorkerGuard)>, TelemetryError> {
    if !config.enabled {
        return Ok(None);
    }
    let appender = rolling_appender(config)?;
    Ok(Some(tracing_appender::non_blocking(appender)))
}

/// Build the rotating file appender described by `config`.
pub fn rolling_appender(config: &LogFileConfig) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(rotation(config.rotation))
        .filename_prefix(config.prefix.as_str())
        .filename_suffix("log")
        .max_log_files(config.max_files)
        .build(&config.directory)
}

fn rotation(rotation: LogRotation) -> Rotation {
    match rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn build_provider(
    config: &TracingConfig,
    service_name: &str,
) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = match config.protocol {
        OtlpProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(config.otlp_endpoint.clone())
            .build(),
        OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(http_traces_endpoint(&config.otlp_endpoint))
            .build(),
    }
    .map_err(|e| TelemetryError::Exporter(e.to_string()))?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build())
}

/// OTLP/HTTP wants the signal path; add it when only the base URL is given.
fn http_traces_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim_end_matches('/');
    if endpoint.ends_with("/v1/traces") {
        endpoint.to_string()
    } else {
        format!("{endpoint}/v1/traces")
    }
}
