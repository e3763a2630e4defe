use crate::mapper::Document;
use async_trait::async_trait;
use std::error::Error;

/// Asynchronous document store that persists one [`Document`] per log
/// record.
///
/// Implementations are responsible for transporting documents to a concrete
/// backend (MongoDB, an in-memory vector, nothing at all). The drain worker
/// calls `insert_one` from its own runtime and never on an application
/// thread.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Insert a single document.
    ///
    /// **Parameters**
    /// - `document`: validated [`Document`] produced by the pipeline's
    ///   mapper.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the document.
    /// - `Err(..)` if the backend failed (connection error, serialization
    ///   error, rejected write, etc.). The worker treats this as a
    ///   transient failure and retries the same document with backoff
    ///   before giving up on it.
    ///
    /// Each call runs as its own task on the worker's runtime and is
    /// cancelled if it outlives the configured insert timeout, so
    /// implementations should stay cancel-safe.
    async fn insert_one(&self, document: &Document) -> Result<(), Box<dyn Error + Send + Sync>>;
}
