//! Bounded hand-off between pipeline stages.
//!
//! `FrameChannel` is a fixed-capacity FIFO with a drop-when-full policy: a
//! producer never waits on a slow consumer, it discards the new item and moves
//! on. Consumers wait with a bound so every suspension point doubles as a
//! shutdown check.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Capacity used between stages unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 4;

/// Outcome of a non-blocking push.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    Dropped,
}

/// Counters for a channel. Shared by every clone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub accepted: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

/// Fixed-capacity FIFO shared by a producer stage and one or more consumers.
///
/// Clones refer to the same queue. Because every handle holds both ends, the
/// channel never disconnects while a handle is alive.
pub struct FrameChannel<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl<T> Clone for FrameChannel<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
            capacity: self.capacity,
            counters: self.counters.clone(),
        }
    }
}

impl<T> FrameChannel<T> {
    /// Create a channel holding at most `capacity` items (minimum 1).
    pub fn bounded(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = crossbeam_channel::bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Push without waiting. A full channel discards `item`.
    pub fn try_push(&self, item: T) -> PushOutcome {
        match self.tx.try_send(item) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Accepted
            }
            // Disconnected cannot happen while `self` holds a receiver.
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::Dropped
            }
        }
    }

    /// Wait up to `timeout` for the oldest item.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Take the oldest item if one is buffered.
    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn overflow_drops_newest_and_keeps_order() {
        for capacity in 1..=8usize {
            let channel = FrameChannel::bounded(capacity);
            for i in 0..capacity {
                assert_eq!(channel.try_push(i), PushOutcome::Accepted);
            }
            assert_eq!(channel.try_push(capacity), PushOutcome::Dropped);

            assert_eq!(channel.len(), capacity);
            assert_eq!(
                channel.stats(),
                ChannelStats {
                    accepted: capacity as u64,
                    dropped: 1
                }
            );
            let drained: Vec<usize> = std::iter::from_fn(|| channel.try_pop()).collect();
            assert_eq!(drained, (0..capacity).collect::<Vec<_>>());
        }
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let channel = FrameChannel::bounded(0);
        assert_eq!(channel.capacity(), 1);
        assert_eq!(channel.try_push('a'), PushOutcome::Accepted);
        assert_eq!(channel.try_push('b'), PushOutcome::Dropped);
    }

    #[test]
    fn pop_timeout_returns_none_after_bound() {
        let channel: FrameChannel<u8> = FrameChannel::bounded(2);
        let started = Instant::now();
        assert!(channel.pop_timeout(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn clones_share_queue_and_counters() {
        let producer = FrameChannel::bounded(1);
        let consumer = producer.clone();
        producer.try_push(5u32);
        producer.try_push(6u32);
        assert_eq!(consumer.pop_timeout(Duration::from_millis(10)), Some(5));
        assert_eq!(consumer.stats().dropped, 1);
    }

    #[test]
    fn pop_wakes_on_push_from_other_thread() {
        let channel = FrameChannel::bounded(4);
        let producer = channel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.try_push(42u64)
        });
        assert_eq!(channel.pop_timeout(Duration::from_secs(2)), Some(42));
        assert_eq!(handle.join().unwrap(), PushOutcome::Accepted);
    }
}
