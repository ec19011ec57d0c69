//! Structured logging.
//!
//! # Responsibilities
//! - Serialize every `tracing` event as one JSON object per line
//! - Enrich events with the trace identity of the request they belong to
//! - Keep the reserved schema intact whatever fields callers attach
//!
//! # Design Decisions
//! - Trace ids travel as `trace_id` / `span_id` fields on an enclosing
//!   `tracing` span; the nearest span carrying them wins
//! - Absent trace ids are omitted, never serialized as `null`
//! - Formatting never fails the caller: unrepresentable values degrade to
//!   strings and sink write errors are dropped

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;

use serde::Serialize;
use serde_json::{Number, Value};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes as SpanAttributes, Id, Record};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

pub const FIELD_TRACE_ID: &str = "trace_id";
pub const FIELD_SPAN_ID: &str = "span_id";

/// Keys owned by the emitter. Caller fields never overwrite them.
pub const RESERVED_KEYS: [&str; 6] = [
    "timestamp",
    "level",
    "name",
    "message",
    FIELD_TRACE_ID,
    FIELD_SPAN_ID,
];

/// Prefix applied to caller fields whose name collides with a reserved key.
pub const RENAMED_PREFIX: &str = "fields.";

fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Flat caller-supplied attributes of a log event.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute, renaming it if it would shadow a reserved key.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        let key = if is_reserved(key) {
            format!("{RENAMED_PREFIX}{key}")
        } else {
            key.to_string()
        };
        self.0.insert(key, value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    pub level: String,
    pub name: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl LogEvent {
    /// Serialize as a single newline-terminated JSON line.
    pub fn to_json_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_else(|e| self.fallback_line(&e));
        line.push(b'\n');
        line
    }

    fn fallback_line(&self, error: &serde_json::Error) -> Vec<u8> {
        let record = serde_json::json!({
            "timestamp": self.timestamp,
            "level": self.level,
            "name": self.name,
            "message": self.message,
            "log_error": error.to_string(),
        });
        serde_json::to_vec(&record).unwrap_or_default()
    }
}

/// Collects event fields into a message plus attributes.
struct EventVisitor<'a> {
    message: &'a mut Option<String>,
    attributes: &'a mut Attributes,
}

impl EventVisitor<'_> {
    fn put(&mut self, field: &Field, value: Value) {
        if field.name() == "message" {
            *self.message = Some(match value {
                Value::String(s) => s,
                other => other.to_string(),
            });
        } else {
            self.attributes.insert(field.name(), value);
        }
    }
}

impl Visit for EventVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.put(field, Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.put(field, Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.put(field, Value::Bool(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        let value = Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(value.to_string()));
        self.put(field, value);
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.put(field, Value::String(value.to_string()));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, Value::String(format!("{value:?}")));
    }
}

/// Trace identity recorded on a `tracing` span.
#[derive(Debug, Clone, Default)]
struct TraceFields {
    trace_id: Option<String>,
    span_id: Option<String>,
}

impl TraceFields {
    fn is_empty(&self) -> bool {
        self.trace_id.is_none() && self.span_id.is_none()
    }

    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            FIELD_TRACE_ID => self.trace_id = Some(value),
            FIELD_SPAN_ID => self.span_id = Some(value),
            _ => {}
        }
    }
}

impl Visit for TraceFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{value:?}"));
    }
}

/// `tracing` layer writing [`LogEvent`]s as JSON lines to a sink.
pub struct JsonLayer<W> {
    make_writer: W,
}

impl<W> JsonLayer<W>
where
    W: for<'w> MakeWriter<'w> + 'static,
{
    pub fn new(make_writer: W) -> Self {
        Self { make_writer }
    }

    fn build_event<S>(&self, event: &Event<'_>, ctx: &Context<'_, S>) -> LogEvent
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let mut message = None;
        let mut attributes = Attributes::new();
        event.record(&mut EventVisitor {
            message: &mut message,
            attributes: &mut attributes,
        });

        let trace = ctx.event_scope(event).and_then(|scope| {
            scope.into_iter().find_map(|span| {
                let fields = span.extensions().get::<TraceFields>().cloned();
                fields
            })
        });
        let (trace_id, span_id) = trace.map_or((None, None), |t| (t.trace_id, t.span_id));

        let metadata = event.metadata();
        LogEvent {
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: metadata.level().to_string(),
            name: metadata.target().to_string(),
            message: message.unwrap_or_default(),
            trace_id,
            span_id,
            attributes,
        }
    }
}

impl<S, W> Layer<S> for JsonLayer<W>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + 'static,
{
    fn on_new_span(&self, attrs: &SpanAttributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut fields = TraceFields::default();
        attrs.record(&mut fields);
        if fields.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().replace(fields);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        let mut fields = extensions.get_mut::<TraceFields>().cloned().unwrap_or_default();
        values.record(&mut fields);
        if !fields.is_empty() {
            extensions.replace(fields);
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let line = self.build_event(event, &ctx).to_json_line();
        let mut writer = self.make_writer.make_writer_for(event.metadata());
        let _ = writer.write_all(&line);
    }
}
