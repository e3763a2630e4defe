pub mod record;
pub mod schema;
pub mod mapper;
pub mod buffer;
pub mod sink;
pub mod layer;
pub mod worker;
pub mod pipeline;
pub mod config;
pub mod backend;
pub mod error;

#[cfg(feature = "mongodb")]
pub mod mongo;

pub mod init;
pub mod memory_sink;

pub use error::{LifecycleError, PipelineError, SchemaError, SinkError, ValidationError};
pub use mapper::{to_document, Document, DocumentMapper, Entity, EntityMapper};
pub use pipeline::LogPipeline;
pub use record::{LogRecord, Record};
pub use schema::{FieldType, Schema};
