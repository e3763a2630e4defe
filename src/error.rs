use std::error::Error;
use std::time::Duration;

use crate::schema::FieldType;

/// A record attribute could not be turned into the value a schema field
/// declares.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
    #[error("field `{field}` expects {expected}, got {found}")]
    Coercion {
        field: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("record does not fit entity `{entity}`: {source}")]
    Entity {
        entity: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("entity `{0}` did not serialize into a key-value document")]
    NotAnObject(&'static str),

    #[error("document mapper panicked: {0}")]
    MapperPanicked(String),
}

/// Failure of a single insert attempt against the document store.
#[derive(thiserror::Error, Debug)]
pub enum SinkError {
    #[error("insert rejected: {0}")]
    Rejected(#[source] Box<dyn Error + Send + Sync>),

    #[error("insert did not complete within {0:?}")]
    TimedOut(Duration),

    #[error("insert task panicked: {0}")]
    Panicked(String),
}

/// Misuse of the drain worker's start/stop lifecycle.
#[derive(thiserror::Error, Debug)]
pub enum LifecycleError {
    #[error("drain worker is already running")]
    AlreadyRunning,

    #[error("drain worker was stopped and cannot be restarted")]
    AlreadyStopped,

    #[error("drain worker is not running")]
    NotRunning,

    #[error("failed to spawn drain worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("drain worker thread panicked")]
    WorkerPanicked,
}

/// Invalid schema declaration.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum SchemaError {
    #[error("schema declares no fields")]
    Empty,

    #[error("schema field name must not be empty")]
    EmptyName,

    #[error("duplicate schema field `{0}`")]
    DuplicateField(String),
}

/// Invalid value found while reading configuration from the environment.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value `{value}` for {key}")]
    InvalidValue { key: &'static str, value: String },
}

/// Anything that can go wrong while assembling a [`LogPipeline`](crate::pipeline::LogPipeline).
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Uri(#[from] crate::backend::UriError),

    #[error(transparent)]
    Backend(#[from] crate::backend::BackendBuildError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
