//! In-memory log ring buffer fanning out to bounded per-subscriber
//! queues, served by the control plane as Server-Sent Events.
//!
//! A stalled subscriber must never block log ingestion: its queue simply
//! drops frames once full.

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use tokio::sync::mpsc;

/// Bound on each subscriber's pending-frame queue.
const SUBSCRIBER_CAPACITY: usize = 256;

/// A ring buffer of recent log lines, with live subscribers.
#[derive(Debug)]
pub struct LogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
    subscribers: Mutex<Vec<(u64, mpsc::Sender<String>)>>,
    next_subscriber_id: AtomicU64,
}

impl LogBuffer {
    /// Creates a new buffer retaining up to `capacity` lines.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    /// Appends `line` to the buffer, evicting the oldest line if full,
    /// and fans it out to every live subscriber. Slow subscribers whose
    /// queue is full silently drop the line.
    pub fn push(&self, line: String) {
        {
            let mut lines = self.lines.lock().expect("log buffer lock poisoned");
            if lines.len() >= self.capacity {
                lines.pop_front();
            }
            lines.push_back(line.clone());
        }

        let mut subscribers =
            self.subscribers.lock().expect("subscribers lock poisoned");
        subscribers.retain(|(_, tx)| match tx.try_send(line.clone()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Returns up to the last `n` lines, oldest first.
    #[must_use]
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock().expect("log buffer lock poisoned");
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    /// Registers a new subscriber, returning its ID and a receiver of
    /// newly-pushed lines.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .push((id, tx));
        (id, rx)
    }

    /// Removes a subscriber by ID, e.g. once its HTTP connection closes.
    pub fn unsubscribe(&self, id: u64) {
        self.subscribers
            .lock()
            .expect("subscribers lock poisoned")
            .retain(|(sub_id, _)| *sub_id != id);
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    #[test]
    fn tail_respects_capacity_and_order() {
        let buf = LogBuffer::new(3);
        for i in 0..5 {
            buf.push(format!("line {}", i));
        }
        assert_eq!(buf.tail(10), vec!["line 2", "line 3", "line 4"]);
    }

    #[tokio::test]
    async fn subscribers_receive_pushed_lines() {
        let buf = LogBuffer::new(10);
        let (_, mut rx) = buf.subscribe();
        buf.push("hello".to_owned());
        assert_eq!(rx.recv().await, Some("hello".to_owned()));
    }

    #[tokio::test]
    async fn full_subscriber_queue_drops_without_blocking() {
        let buf = LogBuffer::new(10);
        let (_, _rx) = buf.subscribe();
        for i in 0..(SUBSCRIBER_CAPACITY + 10) {
            buf.push(format!("line {}", i));
        }
        // Ingestion into the ring buffer itself must never be blocked by a
        // stalled subscriber.
        assert_eq!(buf.tail(1), vec![format!("line {}", SUBSCRIBER_CAPACITY + 9)]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let buf = LogBuffer::new(10);
        let (id, mut rx) = buf.subscribe();
        buf.unsubscribe(id);
        buf.push("after unsubscribe".to_owned());
        assert!(rx.recv().await.is_none() || rx.try_recv().is_err());
    }
}
