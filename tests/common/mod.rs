//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use api_template::observability::logging::JsonLayer;
use api_template::{AppConfig, ObservabilityContext};
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use serde_json::{Map, Value};
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer as _;

pub type Record = Map<String, Value>;

pub const TRACEPARENT: &str = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
pub const INBOUND_TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
pub const INBOUND_SPAN_ID: &str = "b7ad6b7169203331";

/// In-memory sink for JSON log lines.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    pub fn records(&self) -> Vec<Record> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Records whose `message` equals `message`, in emission order.
    pub fn with_message(&self, message: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|record| record["message"] == message)
            .collect()
    }
}

/// Route this thread's `tracing` events into a fresh [`LogCapture`].
///
/// Tests using it must run on a current-thread runtime so spawned tasks
/// stay on the thread the guard covers.
pub fn capture_logs() -> (LogCapture, DefaultGuard) {
    capture_logs_at(LevelFilter::TRACE)
}

/// Like [`capture_logs`], with the sink filtered at `level`.
pub fn capture_logs_at(level: LevelFilter) -> (LogCapture, DefaultGuard) {
    let capture = LogCapture::default();
    let sink = capture.clone();
    let subscriber = tracing_subscriber::registry()
        .with(JsonLayer::new(move || sink.clone()).with_filter(level));
    let guard = tracing::subscriber::set_default(subscriber);
    (capture, guard)
}

/// Provider exporting finished spans synchronously into memory.
pub struct SpanHarness {
    exporter: InMemorySpanExporter,
    provider: SdkTracerProvider,
}

impl SpanHarness {
    pub fn new() -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = SdkTracerProvider::builder()
            .with_simple_exporter(exporter.clone())
            .build();
        Self { exporter, provider }
    }

    pub fn context(&self) -> ObservabilityContext {
        ObservabilityContext::new(&self.provider)
    }

    pub fn spans(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap()
    }
}

/// String value of a span attribute.
pub fn attribute(span: &SpanData, key: &str) -> Option<String> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.as_str().into_owned())
}

/// A config that passes validation with rate limiting out of the way.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig {
        secret_key: "integration-secret".to_string(),
        ..AppConfig::default()
    };
    config.rate_limit.enabled = false;
    config.observability.file.enabled = false;
    config
}
