use crate::buffer::BufferSender;
use crate::record::LogRecord;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, atomic::{AtomicU64, Ordering}};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Events from this crate's own modules are never captured, otherwise a
/// failing sink would log about itself in a loop.
const INTERNAL_TARGET: &str = "mongo_log_sink";

/// Producer-facing entry point of the pipeline.
///
/// `emit` pushes onto the unbounded buffer and returns immediately; it does
/// no validation and never reports what happens downstream. Cloning is
/// cheap and every clone feeds the same buffer.
#[derive(Clone)]
pub struct LogHandler {
    sender: BufferSender<LogRecord>,
    /// Successfully pushed into the buffer.
    pub enqueued_events: Arc<AtomicU64>,
}

impl LogHandler {
    pub fn new(sender: BufferSender<LogRecord>) -> Self {
        Self {
            sender,
            enqueued_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, record: LogRecord) {
        // A closed buffer counts the record in `dropped_events`.
        if self.sender.push(record).is_ok() {
            self.enqueued_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records that were never inserted because the drain worker had
    /// stopped: emitted after it closed, or queued behind its stop request.
    pub fn dropped_events(&self) -> u64 {
        self.sender.dropped()
    }

    /// Records waiting in the buffer.
    pub fn buffer_depth(&self) -> usize {
        self.sender.depth()
    }

    pub fn high_water_crossings(&self) -> u64 {
        self.sender.high_water_crossings()
    }
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`]s and
/// hands them to a [`LogHandler`].
///
/// Every level is captured unless narrowed with
/// [`with_max_level`](Self::with_max_level). Storage I/O happens on the
/// pipeline's drain worker, never on the thread that logged the event.
pub struct LogSinkLayer {
    handler: LogHandler,
    max_level: Level,
    /// Total events seen by the layer (before filtering by level).
    pub total_events: Arc<AtomicU64>,
}

impl LogSinkLayer {
    pub fn new(handler: LogHandler) -> Self {
        Self {
            handler,
            max_level: Level::TRACE,
            total_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Only capture events at `level` or more severe.
    pub fn with_max_level(mut self, level: Level) -> Self {
        self.max_level = level;
        self
    }
}

impl<S> Layer<S> for LogSinkLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event, _ctx: Context<'_, S>) {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let meta = event.metadata();
        if *meta.level() > self.max_level || meta.target().starts_with(INTERNAL_TARGET) {
            return;
        }

        let mut fields = BTreeMap::new();
        let mut message: Option<String> = None;

        let mut visitor = FieldVisitor { fields: &mut fields, message: &mut message };
        event.record(&mut visitor);

        let record = LogRecord {
            timestamp: Utc::now(),
            level: meta.level().to_string(),
            target: meta.target().to_string(),
            module_path: meta.module_path().map(|s| s.to_string()),
            file: meta.file().map(|s| s.to_string()),
            line: meta.line(),
            thread_name: std::thread::current().name().map(|s| s.to_string()),
            fields,
            message,
        };

        self.handler.emit(record);
    }
}

use tracing::field::{Field, Visit};

pub struct FieldVisitor<'a> {
    pub fields: &'a mut BTreeMap<String, serde_json::Value>,
    pub message: &'a mut Option<String>,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), serde_json::Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        // `message` arrives here for format-string events.
        if field.name() == "message" {
            *self.message = Some(format!("{:?}", value));
        } else {
            self.fields.insert(field.name().to_string(), serde_json::Value::String(format!("{:?}", value)));
        }
    }
}
