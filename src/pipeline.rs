use std::sync::Arc;

use crate::backend::{make_sink, parse_uri};
use crate::buffer;
use crate::config::PipelineConfig;
use crate::error::{LifecycleError, PipelineError};
use crate::layer::{LogHandler, LogSinkLayer};
use crate::mapper::DocumentMapper;
use crate::record::LogRecord;
use crate::sink::DocumentSink;
use crate::worker::{DrainWorker, WorkerState, WorkerStatsSnapshot};

/// A complete producer → buffer → worker → sink pipeline.
///
/// ```ignore
/// let schema = Schema::new([("message", FieldType::String)])?;
/// let pipeline = LogPipeline::new(schema, "mongodb://localhost:27017")?;
/// init_tracing(&pipeline)?;
/// tracing::info!("stored as {{\"message\": ...}}");
/// ```
///
/// Dropping the pipeline stops the worker the same way [`stop`](Self::stop)
/// does.
pub struct LogPipeline {
    handler: LogHandler,
    worker: DrainWorker<LogRecord>,
}

impl LogPipeline {
    /// Pipeline with default configuration; the worker starts immediately.
    pub fn new<M>(mapper: M, connection_uri: &str) -> Result<Self, PipelineError>
    where
        M: DocumentMapper + 'static,
    {
        Self::with_config(mapper, connection_uri, PipelineConfig::default())
    }

    /// Pipeline writing to the sink selected by `connection_uri`.
    pub fn with_config<M>(
        mapper: M,
        connection_uri: &str,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError>
    where
        M: DocumentMapper + 'static,
    {
        let sink = make_sink(&parse_uri(connection_uri)?, &config)?;
        Self::with_sink(mapper, sink, config)
    }

    /// Pipeline writing to an already constructed sink.
    pub fn with_sink<M>(
        mapper: M,
        sink: Arc<dyn DocumentSink>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError>
    where
        M: DocumentMapper + 'static,
    {
        let (sender, receiver) = buffer::unbounded(config.high_water_mark);
        let worker = DrainWorker::new(
            receiver,
            sender.clone(),
            Arc::new(mapper),
            sink,
            config.retry.clone(),
        );
        let mut pipeline = LogPipeline {
            handler: LogHandler::new(sender),
            worker,
        };
        if config.autorun {
            pipeline.start()?;
        }
        Ok(pipeline)
    }

    /// Producer handle; clone it freely across threads.
    pub fn handler(&self) -> LogHandler {
        self.handler.clone()
    }

    /// A `tracing` layer feeding this pipeline.
    pub fn layer(&self) -> LogSinkLayer {
        LogSinkLayer::new(self.handler())
    }

    pub fn emit(&self, record: LogRecord) {
        self.handler.emit(record);
    }

    pub fn start(&mut self) -> Result<(), LifecycleError> {
        self.worker.start()
    }

    /// Stop the drain worker, waiting for it to finish what was buffered
    /// before this call.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        self.worker.stop()
    }

    pub fn state(&self) -> WorkerState {
        self.worker.state()
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.worker.stats()
    }

    pub fn buffer_depth(&self) -> usize {
        self.handler.buffer_depth()
    }

    /// How many times the backlog has climbed to the high-water mark.
    pub fn high_water_crossings(&self) -> u64 {
        self.handler.high_water_crossings()
    }
}
