//! Deterministic exhaustion test double.
//!
//! Wraps a real [`crate::heap::ArenaAllocator`] and fails the Nth allocation request with
//! [`crate::Error::AllocatorExhausted`], regardless of actual arena occupancy. This is how
//! the test suite exercises the invoker's enlarge-and-retry path and the error surface
//! without having to size arenas against real foreign workloads.

use crate::{
    heap::{ArenaAllocator, HeapBackend},
    Error::AllocatorExhausted,
    Result,
};

/// A [`HeapBackend`] that injects exhaustion on a fixed schedule.
///
/// Requests before the trigger are served by the wrapped arena; the request at the trigger
/// count fails. [`HeapBackend::enlarge`] clears the trigger, mirroring how a real arena stops
/// being exhausted once the invoker grows it.
///
/// # Examples
///
/// ```rust
/// use terrabridge::heap::{QuotaAllocator, HeapBackend};
///
/// // Fail the second allocation
/// let mut quota = QuotaAllocator::new(4096, 1);
/// assert!(quota.allocate(64, 16).is_ok());
/// assert!(quota.allocate(64, 16).is_err());
///
/// quota.enlarge(0);
/// assert!(quota.allocate(64, 16).is_ok());
/// ```
pub struct QuotaAllocator {
    inner: ArenaAllocator,
    /// Allocation index at which to fail, if still armed.
    fail_at: Option<usize>,
    /// Number of allocation requests seen so far.
    served: usize,
}

impl QuotaAllocator {
    /// Creates a quota allocator failing the allocation with index `fail_at` (0-based).
    ///
    /// # Arguments
    /// * `budget`  - Capacity of the wrapped arena
    /// * `fail_at` - Index of the allocation request to fail
    #[must_use]
    pub fn new(budget: usize, fail_at: usize) -> Self {
        QuotaAllocator {
            inner: ArenaAllocator::new(budget),
            fail_at: Some(fail_at),
            served: 0,
        }
    }
}

impl HeapBackend for QuotaAllocator {
    fn allocate(&mut self, size: usize, align: usize) -> Result<u64> {
        let index = self.served;
        self.served += 1;

        if self.fail_at == Some(index) {
            return Err(AllocatorExhausted {
                requested: size,
                available: 0,
            });
        }

        self.inner.allocate(size, align)
    }

    fn free(&mut self, address: u64) -> Result<()> {
        self.inner.free(address)
    }

    fn enlarge(&mut self, extra: usize) {
        self.fail_at = None;
        self.inner.enlarge(extra);
    }

    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn largest_free(&self) -> usize {
        self.inner.largest_free()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fails_exactly_at_trigger() {
        let mut quota = QuotaAllocator::new(4096, 2);

        assert!(quota.allocate(64, 16).is_ok());
        assert!(quota.allocate(64, 16).is_ok());
        assert!(matches!(
            quota.allocate(64, 16),
            Err(AllocatorExhausted { .. })
        ));
        // The trigger fires once per armed state
        assert!(quota.allocate(64, 16).is_ok());
    }

    #[test]
    fn enlarge_disarms_trigger() {
        let mut quota = QuotaAllocator::new(4096, 0);
        assert!(quota.allocate(64, 16).is_err());

        quota.enlarge(4096);
        assert!(quota.allocate(64, 16).is_ok());
    }
}
