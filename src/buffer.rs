//! Unbounded FIFO shared between any number of producers and the single
//! drain worker.
//!
//! Producers never block: [`BufferSender::push`] always returns straight
//! away. Because growth is unbounded the queue keeps a depth gauge. Pushes
//! count each climb to the configured high-water mark, even while no
//! consumer is running, and the consumer side warns once it sees the
//! backlog, so a stalled sink shows up long before memory runs out.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{info, warn};

enum Envelope<T> {
    Item(T),
    Shutdown,
}

#[derive(Debug)]
struct Gauge {
    depth: AtomicUsize,
    high_water_mark: usize,
    /// Producer-side crossing state.
    above_mark: AtomicBool,
    crossings: AtomicU64,
    /// Consumer-side warning state.
    warned: AtomicBool,
    dropped: AtomicU64,
}

impl Gauge {
    /// Producer side: count the climb to the mark, re-armed once a push
    /// lands at half the mark or less. Never logs, since pushes usually
    /// run inside `Layer::on_event`.
    fn pushed(&self, depth: usize) {
        if self.high_water_mark == 0 {
            return;
        }
        if depth >= self.high_water_mark {
            if !self.above_mark.swap(true, Ordering::Relaxed) {
                self.crossings.fetch_add(1, Ordering::Relaxed);
            }
        } else if depth <= self.high_water_mark / 2 {
            self.above_mark.store(false, Ordering::Relaxed);
        }
    }

    /// Consumer side: warn once per backlog, re-armed at half the mark.
    fn observe(&self, depth: usize) {
        if self.high_water_mark == 0 {
            return;
        }
        if depth >= self.high_water_mark {
            if !self.warned.swap(true, Ordering::Relaxed) {
                warn!(
                    depth,
                    high_water_mark = self.high_water_mark,
                    "log buffer reached its high-water mark; the drain worker is falling behind"
                );
            }
        } else if depth <= self.high_water_mark / 2 && self.warned.swap(false, Ordering::Relaxed) {
            info!(depth, "log buffer drained back below half its high-water mark");
        }
    }
}

/// The item handed back when pushing into a buffer whose consumer is gone.
#[derive(Debug, thiserror::Error)]
#[error("log buffer is closed")]
pub struct BufferClosed<T>(pub T);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    #[error("log buffer is empty")]
    Empty,
    #[error("log buffer is closed")]
    Closed,
}

/// Create an unbounded buffer. A `high_water_mark` of 0 disables the
/// depth warning.
pub fn unbounded<T>(high_water_mark: usize) -> (BufferSender<T>, BufferReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let gauge = Arc::new(Gauge {
        depth: AtomicUsize::new(0),
        high_water_mark,
        above_mark: AtomicBool::new(false),
        crossings: AtomicU64::new(0),
        warned: AtomicBool::new(false),
        dropped: AtomicU64::new(0),
    });
    (
        BufferSender { tx, gauge: Arc::clone(&gauge) },
        BufferReceiver { rx, gauge, shut_down: false },
    )
}

/// Producer half. Cheap to clone; every clone feeds the same queue.
pub struct BufferSender<T> {
    tx: mpsc::UnboundedSender<Envelope<T>>,
    gauge: Arc<Gauge>,
}

impl<T> Clone for BufferSender<T> {
    fn clone(&self) -> Self {
        BufferSender {
            tx: self.tx.clone(),
            gauge: Arc::clone(&self.gauge),
        }
    }
}

impl<T> BufferSender<T> {
    /// Append `item` to the tail. Never blocks.
    pub fn push(&self, item: T) -> Result<(), BufferClosed<T>> {
        let depth = self.gauge.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if let Err(mpsc::error::SendError(envelope)) = self.tx.send(Envelope::Item(item)) {
            self.gauge.depth.fetch_sub(1, Ordering::Relaxed);
            self.gauge.dropped.fetch_add(1, Ordering::Relaxed);
            if let Envelope::Item(item) = envelope {
                return Err(BufferClosed(item));
            }
        }
        self.gauge.pushed(depth);
        Ok(())
    }

    /// Enqueue the shutdown sentinel behind everything already pushed.
    /// Returns `false` if the consumer is already gone.
    pub(crate) fn shutdown(&self) -> bool {
        self.tx.send(Envelope::Shutdown).is_ok()
    }

    /// Number of items pushed but not yet popped.
    pub fn depth(&self) -> usize {
        self.gauge.depth.load(Ordering::Relaxed)
    }

    /// How many times depth has climbed to the high-water mark.
    pub fn high_water_crossings(&self) -> u64 {
        self.gauge.crossings.load(Ordering::Relaxed)
    }

    /// Items that never reach the consumer: pushed after it closed, or
    /// still queued behind the shutdown sentinel.
    pub fn dropped(&self) -> u64 {
        self.gauge.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer half. Exactly one exists per buffer.
pub struct BufferReceiver<T> {
    rx: mpsc::UnboundedReceiver<Envelope<T>>,
    gauge: Arc<Gauge>,
    shut_down: bool,
}

impl<T> BufferReceiver<T> {
    /// Wait for the next item. Resolves to `None` once the shutdown
    /// sentinel has been reached or every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        if self.shut_down {
            return None;
        }
        let envelope = self.rx.recv().await;
        self.accept(envelope)
    }

    /// Remove and return the head of the queue.
    ///
    /// With `blocking` set the calling thread sleeps until an item arrives;
    /// otherwise an empty queue yields [`PopError::Empty`].
    ///
    /// # Panics
    ///
    /// A blocking pop panics when called from inside an async runtime; use
    /// [`recv`](Self::recv) there.
    pub fn pop(&mut self, blocking: bool) -> Result<T, PopError> {
        if self.shut_down {
            return Err(PopError::Closed);
        }
        let envelope = if blocking {
            self.rx.blocking_recv()
        } else {
            match self.rx.try_recv() {
                Ok(envelope) => Some(envelope),
                Err(TryRecvError::Empty) => return Err(PopError::Empty),
                Err(TryRecvError::Disconnected) => None,
            }
        };
        self.accept(envelope).ok_or(PopError::Closed)
    }

    pub fn depth(&self) -> usize {
        self.gauge.depth.load(Ordering::Relaxed)
    }

    /// Account for items that slipped in behind the sentinel before the
    /// channel closed; they are never handed out.
    fn discard_remaining(&mut self) {
        while let Ok(envelope) = self.rx.try_recv() {
            if let Envelope::Item(_) = envelope {
                self.gauge.depth.fetch_sub(1, Ordering::Relaxed);
                self.gauge.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn accept(&mut self, envelope: Option<Envelope<T>>) -> Option<T> {
        match envelope {
            Some(Envelope::Item(item)) => {
                let before = self.gauge.depth.fetch_sub(1, Ordering::Relaxed);
                self.gauge.observe(before);
                Some(item)
            }
            Some(Envelope::Shutdown) | None => {
                self.shut_down = true;
                self.rx.close();
                self.discard_remaining();
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pop_preserves_push_order() {
        let (tx, mut rx) = unbounded(0);
        for i in 0..100 {
            tx.push(i).unwrap();
        }
        let drained: Vec<_> = (0..100).map(|_| rx.pop(false).unwrap()).collect();
        assert_eq!(drained, (0..100).collect::<Vec<_>>());
        assert_eq!(rx.pop(false), Err(PopError::Empty));
    }

    #[test]
    fn depth_tracks_queued_items() {
        let (tx, mut rx) = unbounded(0);
        tx.push("a").unwrap();
        tx.push("b").unwrap();
        assert_eq!(tx.depth(), 2);
        rx.pop(false).unwrap();
        assert_eq!(rx.depth(), 1);
    }

    #[test]
    fn blocking_pop_waits_for_a_producer() {
        let (tx, mut rx) = unbounded(0);
        let producer = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(20));
            tx.push(7u32).unwrap();
        });
        assert_eq!(rx.pop(true), Ok(7));
        producer.join().unwrap();
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let (tx, mut rx) = unbounded(0);
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..250 {
                        tx.push((p, i)).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let mut seen = Vec::new();
        while let Ok(item) = rx.pop(false) {
            seen.push(item);
        }
        assert_eq!(seen.len(), 1000);
        // Per-producer order survives interleaving.
        for p in 0..4 {
            let mine: Vec<_> = seen.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(mine, (0..250).collect::<Vec<_>>());
        }
    }

    #[test]
    fn shutdown_sentinel_is_seen_after_pending_items() {
        let (tx, mut rx) = unbounded(0);
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert!(tx.shutdown());
        tx.push(3).unwrap_or_else(|_| panic!("receiver still alive"));

        assert_eq!(rx.pop(false), Ok(1));
        assert_eq!(rx.pop(false), Ok(2));
        assert_eq!(rx.pop(false), Err(PopError::Closed));
        assert_eq!(rx.pop(true), Err(PopError::Closed));
    }

    #[test]
    fn items_behind_the_sentinel_are_counted_as_dropped() {
        let (tx, mut rx) = unbounded(0);
        tx.push("drained").unwrap();
        assert!(tx.shutdown());
        tx.push("late one").unwrap_or_else(|_| panic!("receiver still alive"));
        tx.push("late two").unwrap_or_else(|_| panic!("receiver still alive"));

        assert_eq!(rx.pop(false), Ok("drained"));
        assert_eq!(rx.pop(false), Err(PopError::Closed));
        assert_eq!(tx.depth(), 0);
        assert_eq!(tx.dropped(), 2);

        assert!(tx.push("after close").is_err());
        assert_eq!(tx.depth(), 0);
        assert_eq!(tx.dropped(), 3);
    }

    #[test]
    fn push_after_receiver_dropped_hands_item_back() {
        let (tx, rx) = unbounded(0);
        drop(rx);
        let BufferClosed(item) = tx.push("late").unwrap_err();
        assert_eq!(item, "late");
        assert_eq!(tx.depth(), 0);
        assert_eq!(tx.dropped(), 1);
        assert!(tx.is_closed());
    }

    #[test]
    fn high_water_mark_counts_each_crossing_once() {
        let (tx, mut rx) = unbounded(4);
        for i in 0..10 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.high_water_crossings(), 1);
        for _ in 0..3 {
            rx.pop(false).unwrap();
        }
        assert_eq!(tx.high_water_crossings(), 1);

        // Drain below half the mark, then refill past it.
        while rx.pop(false).is_ok() {}
        for i in 0..6 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.high_water_crossings(), 2);
    }

    #[test]
    fn crossing_is_counted_without_a_consumer() {
        let (tx, _rx) = unbounded::<u32>(3);
        for i in 0..3 {
            tx.push(i).unwrap();
        }
        assert_eq!(tx.high_water_crossings(), 1);
        assert_eq!(tx.depth(), 3);
    }

    #[tokio::test]
    async fn async_recv_stops_at_sentinel() {
        let (tx, mut rx) = unbounded(0);
        tx.push("a").unwrap();
        tx.shutdown();
        assert_eq!(rx.recv().await, Some("a"));
        assert_eq!(rx.recv().await, None);
    }
}
