//! Local order number generator.
//!
//! Each node mints order numbers from its own counter.  The counter is
//! reset upwards whenever the node's view of the log's maximum key may have
//! advanced from outside (bootstrap sync, becoming leader), and is never
//! moved backwards. `i64::MAX` is never minted: a counter that reaches it
//! is exhausted and refuses to yield further numbers.

use std::sync::atomic::{AtomicI64, Ordering};

/// Monotonic, thread-safe order number counter.
#[derive(Debug)]
pub struct OrderSequence {
    next: AtomicI64,
}

impl OrderSequence {
    /// Start a sequence whose first value is `max_seen + 1`.
    pub fn starting_above(max_seen: i64) -> Self {
        Self {
            next: AtomicI64::new(max_seen.saturating_add(1)),
        }
    }

    /// Return the current value and advance the counter, or `None` once the
    /// counter is exhausted.
    pub fn next(&self) -> Option<i64> {
        self.next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_add(1)
            })
            .ok()
    }

    /// Move the counter to `max_seen + 1` unless it is already further ahead.
    ///
    /// Returns the counter value after the reset.
    pub fn reset_above(&self, max_seen: i64) -> i64 {
        let target = max_seen.saturating_add(1);
        let previous = self.next.fetch_max(target, Ordering::SeqCst);
        previous.max(target)
    }

    /// Peek at the value the next call to [`next`](Self::next) would return.
    /// `i64::MAX` means exhausted.
    pub fn peek(&self) -> i64 {
        self.next.load(Ordering::SeqCst)
    }
}
