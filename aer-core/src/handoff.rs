//! Single-slot handoff between an input producer and the pipeline.
//!
//! The producer fills its next buffer without holding any lock and then
//! swaps it into the slot; the pipeline swaps it out at the start of a cycle.
//! The lock therefore only ever covers an `Option` swap, and a reader never
//! observes a half-written buffer.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

/// Latest-value slot shared by one producer and one consumer.
#[derive(Debug)]
pub struct InputHandoff<T> {
    slot: Mutex<Option<T>>,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl<T> Default for InputHandoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InputHandoff<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Makes `value` the pending input.
    ///
    /// Returns `true` when an unconsumed value was replaced; that value is
    /// dropped and counted.
    pub fn publish(&self, value: T) -> bool {
        let previous = self.slot.lock().replace(value);
        self.published.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("pending input overwritten");
            true
        } else {
            false
        }
    }

    /// Takes the pending input, waiting at most `wait` for the lock.
    ///
    /// Returns `None` when nothing is pending or the lock stayed contended.
    pub fn take(&self, wait: Duration) -> Option<T> {
        match self.slot.try_lock_for(wait) {
            Some(mut guard) => guard.take(),
            None => {
                trace!(?wait, "input slot busy");
                None
            }
        }
    }

    /// Whether a value is waiting to be taken.
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Total number of published values.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of values overwritten before they were taken.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const WAIT: Duration = Duration::from_micros(500);

    #[test]
    fn test_take_empty() {
        let handoff: InputHandoff<Vec<u8>> = InputHandoff::new();
        assert_eq!(handoff.take(WAIT), None);
    }

    #[test]
    fn test_publish_then_take() {
        let handoff = InputHandoff::new();
        assert!(!handoff.publish(vec![1u8, 2, 3]));
        assert!(handoff.is_pending());
        assert_eq!(handoff.take(WAIT), Some(vec![1, 2, 3]));
        assert_eq!(handoff.take(WAIT), None);
    }

    #[test]
    fn test_overwrite_counts_drop() {
        let handoff = InputHandoff::new();
        handoff.publish(1u32);
        assert!(handoff.publish(2u32));
        assert_eq!(handoff.take(WAIT), Some(2));
        assert_eq!(handoff.published(), 2);
        assert_eq!(handoff.dropped(), 1);
    }

    #[test]
    fn test_contended_take_gives_up() {
        let handoff = Arc::new(InputHandoff::new());
        handoff.publish(7u32);

        let guard = handoff.slot.lock();
        let other = Arc::clone(&handoff);
        let taken = thread::spawn(move || other.take(WAIT)).join().unwrap();
        drop(guard);

        assert_eq!(taken, None);
        assert_eq!(handoff.take(WAIT), Some(7));
    }
}
