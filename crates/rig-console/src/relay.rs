//! Bounded single-producer/single-consumer relay that favours fresh items.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use tracing::trace;

/// Frames held per relay queue.
pub const RELAY_CAPACITY: usize = 2;

/// Bounded queue whose `push` never blocks: when full, the oldest entry is
/// evicted to make room, so the consumer always sees the newest items.
pub struct RelayQueue<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> Clone for RelayQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

impl<T> RelayQueue<T> {
    pub fn new(name: &'static str) -> Self {
        Self::with_capacity(name, RELAY_CAPACITY)
    }

    pub fn with_capacity(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { name, tx, rx }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue `item`, returning the entry evicted to make room, if any.
    pub fn push(&self, item: T) -> Option<T> {
        let mut pending = item;
        let mut evicted = None;
        loop {
            match self.tx.try_send(pending) {
                Ok(()) => return evicted,
                Err(TrySendError::Full(back)) => {
                    pending = back;
                    if let Ok(oldest) = self.rx.try_recv() {
                        metrics::counter!("rig_relay_evicted_total", "queue" => self.name)
                            .increment(1);
                        trace!(queue = self.name, "relay full, evicted oldest entry");
                        evicted = Some(oldest);
                    }
                }
                // Unreachable while `self` holds a receiver.
                Err(TrySendError::Disconnected(back)) => return Some(back),
            }
        }
    }

    /// Non-blocking take of the oldest entry.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Drop everything queued, returning how many entries were discarded.
    pub fn clear(&self) -> usize {
        let mut dropped = 0;
        while self.rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use std::{thread, time::Duration};

    use super::*;

    fn drain(queue: &RelayQueue<u32>) -> Vec<u32> {
        let mut items = Vec::new();
        while let Some(item) = queue.try_pop() {
            items.push(item);
        }
        items
    }

    #[test]
    fn overflow_keeps_the_two_newest_in_order() {
        for count in 3..12u32 {
            let queue = RelayQueue::new("test");
            for item in 0..count {
                queue.push(item);
            }
            assert_eq!(drain(&queue), vec![count - 2, count - 1], "after {count} puts");
        }
    }

    #[test]
    fn push_reports_the_evicted_entry() {
        let queue = RelayQueue::new("test");
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), Some(1));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn under_capacity_nothing_is_lost() {
        let queue = RelayQueue::new("test");
        queue.push(7);
        assert_eq!(drain(&queue), vec![7]);
        assert!(queue.is_empty());
        assert_eq!(queue.try_pop(), None);
    }

    #[test]
    fn clear_discards_everything() {
        let queue = RelayQueue::new("test");
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn producer_never_blocks_on_a_stalled_consumer() {
        let queue = RelayQueue::new("test");
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for item in 0..10_000u32 {
                    queue.push(item);
                }
            })
        };
        producer.join().unwrap();
        assert_eq!(drain(&queue), vec![9_998, 9_999]);

        // A concurrent consumer only ever sees increasing values.
        let producer = {
            let queue = queue.clone();
            thread::spawn(move || {
                for item in 0..5_000u32 {
                    queue.push(item);
                }
            })
        };
        let mut last = None;
        while !producer.is_finished() || !queue.is_empty() {
            if let Some(item) = queue.try_pop() {
                if let Some(previous) = last {
                    assert!(item > previous);
                }
                last = Some(item);
            } else {
                thread::sleep(Duration::from_micros(50));
            }
        }
        producer.join().unwrap();
        assert_eq!(last, Some(4_999));
    }
}
