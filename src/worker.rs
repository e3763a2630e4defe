use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::buffer::{BufferReceiver, BufferSender};
use crate::config::RetryPolicy;
use crate::error::{LifecycleError, SinkError, ValidationError};
use crate::mapper::{Document, DocumentMapper};
use crate::record::Record;
use crate::sink::DocumentSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Running,
}

/// Counters maintained by the drain loop.
#[derive(Debug, Default)]
pub struct WorkerStats {
    inserted: AtomicU64,
    validation_failures: AtomicU64,
    sink_failures: AtomicU64,
    retries: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    /// Documents the sink accepted.
    pub inserted: u64,
    /// Records dropped because they did not fit the schema.
    pub validation_failures: u64,
    /// Records dropped after every insert attempt failed.
    pub sink_failures: u64,
    /// Insert attempts beyond the first, over all records.
    pub retries: u64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            inserted: self.inserted.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

/// Background worker that drains a buffer into a [`DocumentSink`].
///
/// `start` spawns a dedicated OS thread that owns a single-threaded Tokio
/// runtime, so inserts can await without ever blocking producer threads
/// or borrowing an application runtime. Records are inserted strictly one
/// at a time, in the order they were buffered.
///
/// `stop` pushes a shutdown sentinel through the buffer and joins the
/// thread: records buffered before the call are still drained, anything
/// pushed afterwards is never inserted. A stopped worker cannot be
/// restarted.
pub struct DrainWorker<R> {
    state: WorkerState,
    receiver: Option<BufferReceiver<R>>,
    control: BufferSender<R>,
    mapper: Arc<dyn DocumentMapper>,
    sink: Arc<dyn DocumentSink>,
    policy: RetryPolicy,
    stats: Arc<WorkerStats>,
    thread: Option<JoinHandle<()>>,
}

impl<R> DrainWorker<R>
where
    R: Record + Send + 'static,
{
    /// Create a stopped worker over `receiver`. `control` must belong to the
    /// same buffer; it is only used to deliver the shutdown sentinel.
    pub fn new(
        receiver: BufferReceiver<R>,
        control: BufferSender<R>,
        mapper: Arc<dyn DocumentMapper>,
        sink: Arc<dyn DocumentSink>,
        policy: RetryPolicy,
    ) -> Self {
        DrainWorker {
            state: WorkerState::Stopped,
            receiver: Some(receiver),
            control,
            mapper,
            sink,
            policy,
            stats: Arc::new(WorkerStats::default()),
            thread: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn start(&mut self) -> Result<(), LifecycleError> {
        if self.state == WorkerState::Running {
            return Err(LifecycleError::AlreadyRunning);
        }
        let Some(receiver) = self.receiver.take() else {
            return Err(LifecycleError::AlreadyStopped);
        };

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                self.receiver = Some(receiver);
                return Err(LifecycleError::Spawn(e));
            }
        };

        let drain = DrainLoop {
            receiver,
            mapper: Arc::clone(&self.mapper),
            sink: Arc::clone(&self.sink),
            policy: self.policy.clone(),
            stats: Arc::clone(&self.stats),
        };

        let handle = thread::Builder::new()
            .name("log-drain".into())
            .spawn(move || runtime.block_on(drain.run()))?;

        self.thread = Some(handle);
        self.state = WorkerState::Running;
        debug!("log drain worker started");
        Ok(())
    }

    /// Signal the drain loop to finish and block until its thread exits.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        if self.state != WorkerState::Running {
            return Err(LifecycleError::NotRunning);
        }
        self.state = WorkerState::Stopped;

        if !self.control.shutdown() {
            debug!("drain loop already gone before shutdown was requested");
        }
        let result = match self.thread.take() {
            Some(handle) => handle.join().map_err(|_| LifecycleError::WorkerPanicked),
            None => Ok(()),
        };
        debug!("log drain worker stopped");
        result
    }
}

impl<R> Drop for DrainWorker<R> {
    fn drop(&mut self) {
        if self.state != WorkerState::Running {
            return;
        }
        self.control.shutdown();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("log drain worker panicked");
            }
        }
    }
}

struct DrainLoop<R> {
    receiver: BufferReceiver<R>,
    mapper: Arc<dyn DocumentMapper>,
    sink: Arc<dyn DocumentSink>,
    policy: RetryPolicy,
    stats: Arc<WorkerStats>,
}

impl<R: Record> DrainLoop<R> {
    async fn run(mut self) {
        while let Some(record) = self.receiver.recv().await {
            self.process(&record).await;
        }
        debug!("drain loop reached shutdown");
    }

    /// Failure boundary for one record: every error ends here, logged and
    /// counted, and the loop carries on with the next record.
    async fn process(&self, record: &R) {
        let document = match map_record(self.mapper.as_ref(), record) {
            Ok(document) => Arc::new(document),
            Err(e) => {
                self.stats.validation_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "dropping log record that does not fit the schema");
                return;
            }
        };

        match insert_with_retry(&self.sink, document, &self.policy, &self.stats).await {
            Ok(()) => {
                self.stats.inserted.fetch_add(1, Ordering::Relaxed);
            }
            Err((e, attempts)) => {
                self.stats.sink_failures.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, attempts, "dropping log record after failed inserts");
            }
        }
    }
}

/// Run a user-supplied mapper with a panic turned into a validation error,
/// so a buggy mapper costs one record instead of the drain thread.
fn map_record<R: Record>(mapper: &dyn DocumentMapper, record: &R) -> Result<Document, ValidationError> {
    panic::catch_unwind(AssertUnwindSafe(|| mapper.to_document(record)))
        .unwrap_or_else(|payload| Err(ValidationError::MapperPanicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Insert `document`, retrying with exponential backoff. On failure returns
/// the last error and how many attempts were made.
async fn insert_with_retry(
    sink: &Arc<dyn DocumentSink>,
    document: Arc<Document>,
    policy: &RetryPolicy,
    stats: &WorkerStats,
) -> Result<(), (SinkError, u32)> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match insert_once(sink, &document, policy).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if attempt > policy.max_retries {
            return Err((err, attempt));
        }

        let backoff = policy.backoff_for(attempt);
        warn!(error = %err, attempt, ?backoff, "log insert failed, retrying");
        stats.retries.fetch_add(1, Ordering::Relaxed);
        sleep(backoff).await;
    }
}

/// One attempt, run as its own task so a panicking sink is contained and a
/// hung one can be aborted.
async fn insert_once(
    sink: &Arc<dyn DocumentSink>,
    document: &Arc<Document>,
    policy: &RetryPolicy,
) -> Result<(), SinkError> {
    let sink = Arc::clone(sink);
    let document = Arc::clone(document);
    let mut task = tokio::spawn(async move { sink.insert_one(&document).await });

    match timeout(policy.insert_timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(SinkError::Rejected(e)),
        Ok(Err(join)) => Err(SinkError::Panicked(join.to_string())),
        Err(_) => {
            task.abort();
            Err(SinkError::TimedOut(policy.insert_timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer;
    use crate::memory_sink::MemorySink;
    use crate::record::LogRecord;
    use crate::schema::{FieldType, Schema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::error::Error;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn message_schema() -> Arc<dyn DocumentMapper> {
        Arc::new(Schema::new([("message", FieldType::String)]).unwrap())
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            insert_timeout: Duration::from_millis(200),
        }
    }

    fn worker_with(
        sink: Arc<dyn DocumentSink>,
        mapper: Arc<dyn DocumentMapper>,
    ) -> (BufferSender<LogRecord>, DrainWorker<LogRecord>) {
        let (tx, rx) = buffer::unbounded(0);
        let worker = DrainWorker::new(rx, tx.clone(), mapper, sink, fast_policy());
        (tx, worker)
    }

    /// Fails the first `failures` inserts, then behaves like a memory sink.
    struct FlakySink {
        failures: AtomicU32,
        inner: MemorySink,
    }

    #[async_trait]
    impl DocumentSink for FlakySink {
        async fn insert_one(&self, document: &Document) -> Result<(), Box<dyn Error + Send + Sync>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err("connection reset".into());
            }
            self.inner.insert_one(document).await
        }
    }

    struct PanickingSink;

    #[async_trait]
    impl DocumentSink for PanickingSink {
        async fn insert_one(&self, document: &Document) -> Result<(), Box<dyn Error + Send + Sync>> {
            if document["message"] == json!("poison") {
                panic!("driver bug");
            }
            Ok(())
        }
    }

    /// Panics on a record whose message is "poison".
    struct PanickingMapper(Schema);

    impl DocumentMapper for PanickingMapper {
        fn to_document(&self, record: &dyn Record) -> Result<Document, ValidationError> {
            if record.attribute("message") == Some(json!("poison")) {
                panic!("mapper bug");
            }
            self.0.to_document(record)
        }
    }

    struct HangingSink;

    #[async_trait]
    impl DocumentSink for HangingSink {
        async fn insert_one(&self, _document: &Document) -> Result<(), Box<dyn Error + Send + Sync>> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[test]
    fn lifecycle_misuse_is_reported_not_fatal() {
        let (_tx, mut worker) = worker_with(Arc::new(MemorySink::new()), message_schema());
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(matches!(worker.stop(), Err(LifecycleError::NotRunning)));

        worker.start().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        assert!(matches!(worker.start(), Err(LifecycleError::AlreadyRunning)));

        worker.stop().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(matches!(worker.stop(), Err(LifecycleError::NotRunning)));
        assert!(matches!(worker.start(), Err(LifecycleError::AlreadyStopped)));
    }

    #[test]
    fn drains_in_push_order_before_stopping() {
        let sink = MemorySink::new();
        let (tx, mut worker) = worker_with(Arc::new(sink.clone()), message_schema());
        worker.start().unwrap();
        for i in 0..50 {
            tx.push(LogRecord::new("INFO", format!("record {i}"))).unwrap_or_else(|_| panic!("closed"));
        }
        worker.stop().unwrap();

        let messages: Vec<_> = sink.documents().into_iter().map(|d| d["message"].clone()).collect();
        let expected: Vec<_> = (0..50).map(|i| json!(format!("record {i}"))).collect();
        assert_eq!(messages, expected);
        assert_eq!(worker.stats().inserted, 50);
    }

    #[test]
    fn records_pushed_after_stop_are_not_inserted() {
        let sink = MemorySink::new();
        let (tx, mut worker) = worker_with(Arc::new(sink.clone()), message_schema());
        worker.start().unwrap();
        tx.push(LogRecord::new("INFO", "before")).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        assert!(tx.push(LogRecord::new("INFO", "after")).is_err());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn transient_failure_is_retried_until_persisted() {
        let memory = MemorySink::new();
        let sink = FlakySink {
            failures: AtomicU32::new(1),
            inner: memory.clone(),
        };
        let (tx, mut worker) = worker_with(Arc::new(sink), message_schema());
        worker.start().unwrap();
        tx.push(LogRecord::new("ERROR", "survives a hiccup")).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        assert_eq!(memory.documents()[0]["message"], json!("survives a hiccup"));
        let stats = worker.stats();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.retries, 1);
        assert_eq!(stats.sink_failures, 0);
    }

    #[test]
    fn exhausted_retries_drop_the_record_and_keep_draining() {
        let memory = MemorySink::new();
        // max_retries is 2, so the first record burns all three attempts.
        let sink = FlakySink {
            failures: AtomicU32::new(3),
            inner: memory.clone(),
        };
        let (tx, mut worker) = worker_with(Arc::new(sink), message_schema());
        worker.start().unwrap();
        tx.push(LogRecord::new("ERROR", "lost")).unwrap_or_else(|_| panic!("closed"));
        tx.push(LogRecord::new("INFO", "kept")).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        let docs = memory.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["message"], json!("kept"));
        assert_eq!(worker.stats().sink_failures, 1);
    }

    #[test]
    fn validation_failure_skips_only_that_record() {
        let sink = MemorySink::new();
        let mapper: Arc<dyn DocumentMapper> =
            Arc::new(Schema::new([("message", FieldType::String), ("code", FieldType::Integer)]).unwrap());
        let (tx, mut worker) = worker_with(Arc::new(sink.clone()), mapper);
        worker.start().unwrap();
        tx.push(LogRecord::new("INFO", "bad").with_field("code", "E42")).unwrap_or_else(|_| panic!("closed"));
        tx.push(LogRecord::new("INFO", "good").with_field("code", 42)).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        let docs = sink.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["code"], json!(42));
        assert_eq!(worker.stats().validation_failures, 1);
    }

    #[test]
    fn panicking_sink_does_not_kill_the_loop() {
        let (tx, mut worker) = worker_with(Arc::new(PanickingSink), message_schema());
        worker.start().unwrap();
        tx.push(LogRecord::new("INFO", "poison")).unwrap_or_else(|_| panic!("closed"));
        tx.push(LogRecord::new("INFO", "fine")).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        let stats = worker.stats();
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[test]
    fn panicking_mapper_skips_only_that_record() {
        let sink = MemorySink::new();
        let mapper = PanickingMapper(Schema::new([("message", FieldType::String)]).unwrap());
        let (tx, mut worker) = worker_with(Arc::new(sink.clone()), Arc::new(mapper));
        worker.start().unwrap();
        tx.push(LogRecord::new("INFO", "poison")).unwrap_or_else(|_| panic!("closed"));
        tx.push(LogRecord::new("INFO", "after")).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        let docs = sink.documents();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["message"], json!("after"));
        let stats = worker.stats();
        assert_eq!(stats.validation_failures, 1);
        assert_eq!(stats.inserted, 1);
    }

    #[test]
    fn mapper_panic_payload_becomes_the_error_message() {
        let mapper = PanickingMapper(Schema::new([("message", FieldType::String)]).unwrap());
        let err = map_record(&mapper, &LogRecord::new("INFO", "poison")).unwrap_err();
        assert!(matches!(err, ValidationError::MapperPanicked(ref m) if m == "mapper bug"));
    }

    #[test]
    fn hung_insert_times_out() {
        let (tx, mut worker) = worker_with(Arc::new(HangingSink), message_schema());
        worker.start().unwrap();
        tx.push(LogRecord::new("INFO", "stuck")).unwrap_or_else(|_| panic!("closed"));
        worker.stop().unwrap();

        let stats = worker.stats();
        assert_eq!(stats.sink_failures, 1);
        assert_eq!(stats.retries, 2);
    }
}
