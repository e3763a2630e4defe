use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use mongo_log_sink::{
    config::PipelineConfig,
    init::init_tracing,
    schema::{FieldType, Schema},
    sink::DocumentSink,
    Document, LogPipeline,
};

/// Example of integrating a completely custom store by implementing
/// the `DocumentSink` trait directly. Imagine this talks to some
/// proprietary DB for which this crate does not provide a built-in
/// sink.
struct MyCustomDbSink;

#[async_trait]
impl DocumentSink for MyCustomDbSink {
    async fn insert_one(&self, document: &Document) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Here you would call your own client library for the target DB.
        // For the sake of example we just print the document.
        println!("[my-custom-db] {}", serde_json::Value::Object(document.clone()));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let schema = Schema::new([
        ("levelname", FieldType::String),
        ("message", FieldType::String),
        ("db", FieldType::String),
    ])?;
    let sink: Arc<dyn DocumentSink> = Arc::new(MyCustomDbSink);
    let mut pipeline = LogPipeline::with_sink(schema, sink, PipelineConfig::default())?;

    init_tracing(&pipeline)?;

    info!("custom backend example started");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    pipeline.stop()?;
    Ok(())
}
