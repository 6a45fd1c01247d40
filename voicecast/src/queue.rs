//! Per-tenant FIFO utterance queue with a configurable overflow policy.

use std::{collections::VecDeque, sync::Mutex};

use tokio::sync::Notify;

use crate::cli::DropPolicy;

/// An immutable request to synthesize and play one utterance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct QueueItem {
    /// Text to synthesize.
    pub text: String,
    /// Voice to synthesize it with.
    pub voice_id: String,
    /// Playback volume, 0..=2; [`None`] uses the sink's default.
    pub volume: Option<f32>,
}

#[derive(Debug)]
enum Entry {
    Utterance(QueueItem),
    /// Terminates the worker loop; see [`UtteranceQueue::close`].
    Sentinel,
}

/// Result of [`UtteranceQueue::enqueue`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EnqueueOutcome {
    /// Whether the item was accepted into the queue.
    pub accepted: bool,
    /// How many items were dropped to make room for it.
    pub dropped: u32,
}

/// A bounded, single-tenant FIFO queue of utterances.
#[derive(Debug)]
pub struct UtteranceQueue {
    capacity: usize,
    policy: DropPolicy,
    entries: Mutex<VecDeque<Entry>>,
    notify: Notify,
}

impl UtteranceQueue {
    /// Creates an empty queue with the given `capacity` and overflow
    /// `policy`.
    #[must_use]
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            capacity: capacity.max(1),
            policy,
            entries: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Enqueues `item`, applying the overflow policy if the queue is
    /// already at capacity.
    pub fn enqueue(&self, item: QueueItem) -> EnqueueOutcome {
        let outcome = {
            let mut entries = self.entries.lock().expect("queue lock poisoned");
            if entries.len() >= self.capacity {
                match self.policy {
                    DropPolicy::DropOldest => {
                        entries.pop_front();
                        entries.push_back(Entry::Utterance(item));
                        EnqueueOutcome {
                            accepted: true,
                            dropped: 1,
                        }
                    }
                    DropPolicy::Reject => EnqueueOutcome {
                        accepted: false,
                        dropped: 0,
                    },
                }
            } else {
                entries.push_back(Entry::Utterance(item));
                EnqueueOutcome {
                    accepted: true,
                    dropped: 0,
                }
            }
        };
        if outcome.accepted {
            self.notify.notify_one();
        }
        outcome
    }

    /// Signals the worker loop to terminate once it drains prior items.
    pub fn close(&self) {
        self.entries
            .lock()
            .expect("queue lock poisoned")
            .push_back(Entry::Sentinel);
        self.notify.notify_one();
    }

    /// Waits for and removes the next item, returning [`None`] once the
    /// sentinel pushed by [`Self::close`] is reached.
    pub async fn dequeue(&self) -> Option<QueueItem> {
        loop {
            {
                let mut entries = self.entries.lock().expect("queue lock poisoned");
                match entries.pop_front() {
                    Some(Entry::Utterance(item)) => return Some(item),
                    Some(Entry::Sentinel) => return None,
                    None => {}
                }
            }
            self.notify.notified().await;
        }
    }

    /// Current number of queued utterances (excluding any sentinel).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .expect("queue lock poisoned")
            .iter()
            .filter(|e| matches!(e, Entry::Utterance(_)))
            .count()
    }

    /// Returns `true` if the queue holds no utterances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod spec {
    use super::*;

    fn item(text: &str) -> QueueItem {
        QueueItem {
            text: text.to_owned(),
            voice_id: "en_us_001".to_owned(),
            volume: None,
        }
    }

    #[test]
    fn drop_oldest_keeps_capacity_and_reports_drop() {
        let queue = UtteranceQueue::new(2, DropPolicy::DropOldest);
        assert!(queue.enqueue(item("a")).accepted);
        assert!(queue.enqueue(item("b")).accepted);
        let outcome = queue.enqueue(item("c"));
        assert_eq!(
            outcome,
            EnqueueOutcome {
                accepted: true,
                dropped: 1
            }
        );
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn reject_policy_refuses_when_full() {
        let queue = UtteranceQueue::new(1, DropPolicy::Reject);
        assert!(queue.enqueue(item("a")).accepted);
        let outcome = queue.enqueue(item("b"));
        assert_eq!(
            outcome,
            EnqueueOutcome {
                accepted: false,
                dropped: 0
            }
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn dequeue_preserves_fifo_order() {
        let queue = UtteranceQueue::new(10, DropPolicy::DropOldest);
        queue.enqueue(item("a"));
        queue.enqueue(item("b"));
        queue.enqueue(item("c"));
        assert_eq!(queue.dequeue().await.unwrap().text, "a");
        assert_eq!(queue.dequeue().await.unwrap().text, "b");
        assert_eq!(queue.dequeue().await.unwrap().text, "c");
    }

    #[tokio::test]
    async fn close_terminates_the_dequeue_loop() {
        let queue = UtteranceQueue::new(10, DropPolicy::DropOldest);
        queue.enqueue(item("a"));
        queue.close();
        assert_eq!(queue.dequeue().await.unwrap().text, "a");
        assert!(queue.dequeue().await.is_none());
    }
}
