//! Process-wide logical clock used to detect stale pipeline state.
//!
//! Every "something changed" event takes a fresh value from the global
//! counter, so comparing two captured values orders the events that produced
//! them. Nodes compare the time they last computed against the modified
//! times of their inputs.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// An atomically incremented counter.
///
/// [`GlobalTimestamp`] wraps the process-wide instance; separate sources are
/// useful when a test needs a counter no other code touches.
#[derive(Debug, Default)]
pub struct TimestampSource {
    counter: AtomicU64,
}

impl TimestampSource {
    /// Create a counter starting at zero.
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Increment and return the new value.
    pub fn increment(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Latest value, without incrementing.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }
}

static GLOBAL_SOURCE: TimestampSource = TimestampSource::new();

/// The process-wide modification counter.
pub struct GlobalTimestamp;

impl GlobalTimestamp {
    /// Atomically increment the global counter and return the new value.
    pub fn increment() -> u64 {
        GLOBAL_SOURCE.increment()
    }

    /// Latest value of the global counter.
    pub fn current() -> u64 {
        GLOBAL_SOURCE.current()
    }
}

/// A captured value of the global clock.
///
/// Zero means "never modified", which is older than any captured value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TimeStamp {
    modified_time: u64,
}

impl TimeStamp {
    /// A timestamp that predates every modification.
    pub const fn new() -> Self {
        Self { modified_time: 0 }
    }

    /// Capture a fresh value of the global clock.
    pub fn modified(&mut self) {
        self.modified_time = GlobalTimestamp::increment();
    }

    /// Captured value.
    pub fn get(&self) -> u64 {
        self.modified_time
    }

    /// Whether this stamp was captured after `other`.
    pub fn is_newer_than(&self, other: &TimeStamp) -> bool {
        self.modified_time > other.modified_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_increment_is_strictly_increasing() {
        let first = GlobalTimestamp::increment();
        let second = GlobalTimestamp::increment();
        assert!(second > first);
        assert!(GlobalTimestamp::current() >= second);
    }

    #[test]
    fn test_concurrent_increments_are_distinct() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 2_000;

        let source = Arc::new(TimestampSource::new());
        let start = source.current();

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    (0..PER_THREAD).map(|_| source.increment()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value), "duplicate timestamp {}", value);
            }
        }

        let total = (THREADS * PER_THREAD) as u64;
        assert_eq!(seen.len() as u64, total);
        assert_eq!(source.current(), start + total);
        // No value was skipped.
        assert_eq!(seen.iter().copied().min(), Some(start + 1));
        assert_eq!(seen.iter().copied().max(), Some(start + total));
    }

    #[test]
    fn test_global_concurrent_increments_are_distinct() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| (0..500).map(|_| GlobalTimestamp::increment()).collect::<Vec<_>>()))
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for value in handle.join().unwrap() {
                assert!(seen.insert(value));
            }
        }
        assert_eq!(seen.len(), 2_000);
    }

    #[test]
    fn test_time_stamp_ordering() {
        let mut older = TimeStamp::new();
        let mut newer = TimeStamp::new();
        assert_eq!(older, newer);

        older.modified();
        newer.modified();
        assert!(newer.is_newer_than(&older));
        assert!(!older.is_newer_than(&newer));
        assert!(older.is_newer_than(&TimeStamp::new()));

        let copy = newer;
        assert_eq!(copy.get(), newer.get());
    }
}
