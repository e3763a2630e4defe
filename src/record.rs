use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Capability to look up a named attribute on a log record.
///
/// Mappers only ever ask for the attributes their schema declares, so a
/// record never has to enumerate what it carries. `None` means the record
/// has no such attribute; mappers treat it the same as an explicit null.
pub trait Record {
    fn attribute(&self, name: &str) -> Option<Value>;
}

/// A log event captured from `tracing`.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub thread_name: Option<String>,
    pub fields: BTreeMap<String, Value>,
    pub message: Option<String>,
}

impl LogRecord {
    /// Minimal record with only a level and message, stamped with the
    /// current time. Handy when feeding a [`LogHandler`](crate::layer::LogHandler)
    /// directly instead of through the layer.
    pub fn new(level: impl Into<String>, message: impl Into<String>) -> Self {
        LogRecord {
            timestamp: Utc::now(),
            level: level.into(),
            target: String::new(),
            module_path: None,
            file: None,
            line: None,
            thread_name: None,
            fields: BTreeMap::new(),
            message: Some(message.into()),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Numeric severity on the familiar 10/20/30/40 scale.
    pub fn level_number(&self) -> u32 {
        match self.level.to_ascii_uppercase().as_str() {
            "TRACE" => 5,
            "DEBUG" => 10,
            "INFO" => 20,
            "WARN" | "WARNING" => 30,
            "ERROR" => 40,
            "CRITICAL" | "FATAL" => 50,
            _ => 0,
        }
    }
}

impl Record for LogRecord {
    fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "message" | "msg" => self.message.clone().map(Value::String),
            "level" | "levelname" => Some(Value::String(self.level.clone())),
            "levelno" => Some(Value::from(self.level_number())),
            "timestamp" => Some(Value::String(self.timestamp.to_rfc3339())),
            "created" => Some(Value::from(
                self.timestamp.timestamp_micros() as f64 / 1_000_000.0,
            )),
            "target" | "name" => Some(Value::String(self.target.clone())),
            "module_path" | "module" => self.module_path.clone().map(Value::String),
            "file" | "pathname" => self.file.clone().map(Value::String),
            "line" | "lineno" => self.line.map(Value::from),
            "thread_name" | "threadName" => self.thread_name.clone().map(Value::String),
            other => self.fields.get(other).cloned(),
        }
    }
}

impl Record for BTreeMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Record for HashMap<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

impl Record for serde_json::Map<String, Value> {
    fn attribute(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}
