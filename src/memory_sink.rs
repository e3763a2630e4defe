use crate::mapper::Document;
use crate::sink::DocumentSink;
use async_trait::async_trait;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// A sink that simply drops all documents.
///
/// Useful for measuring the overhead of the pipeline itself without any
/// external I/O.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl DocumentSink for NoopSink {
    async fn insert_one(&self, _document: &Document) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// A sink that keeps every inserted document in memory, in insert order.
///
/// Clones share the same storage, so a test can hand one clone to the
/// pipeline and inspect another.
#[derive(Clone, Default)]
pub struct MemorySink {
    documents: Arc<Mutex<Vec<Document>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything inserted so far.
    pub fn documents(&self) -> Vec<Document> {
        match self.documents.lock() {
            Ok(docs) => docs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn insert_one(&self, document: &Document) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut docs = self
            .documents
            .lock()
            .map_err(|_| "memory sink lock poisoned")?;
        docs.push(document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(message: &str) -> Document {
        let mut d = Document::new();
        d.insert("message".into(), json!(message));
        d
    }

    #[tokio::test]
    async fn memory_sink_keeps_insert_order_across_clones() {
        let sink = MemorySink::new();
        let handle = sink.clone();
        sink.insert_one(&doc("first")).await.unwrap();
        sink.insert_one(&doc("second")).await.unwrap();

        let docs = handle.documents();
        assert_eq!(docs, vec![doc("first"), doc("second")]);
    }

    #[tokio::test]
    async fn noop_sink_accepts_everything() {
        assert!(NoopSink.insert_one(&doc("ignored")).await.is_ok());
    }
}
