//! Hosted heap substituted for the foreign code's expected allocator.
//!
//! The original generator never talks to the host's allocator directly: its allocation calls
//! are routed through the bridge, which serves them from pre-reserved arenas and tracks every
//! outstanding allocation. This gives the bridge three guarantees the foreign code cannot
//! provide for itself:
//!
//! - no two live allocations ever overlap
//! - every address handed to foreign code is tracked until freed
//! - a `free` of an untracked address is a reported error, never a silent no-op
//!
//! # Architecture
//!
//! The invocation layer depends on the [`HeapBackend`] capability, not on a concrete
//! allocator. Two implementations exist:
//!
//! - [`ArenaAllocator`] - the production arena: fixed-capacity blocks, first-fit free list,
//!   real backing memory so foreign code can write through returned pointers
//! - [`QuotaAllocator`] - a test double that injects deterministic exhaustion
//!
//! [`AllocatorShim`] wraps a backend with the record tracking and the C ABI entry points
//! ([`bridge_alloc`]/[`bridge_free`]) the foreign code is linked against. One shim is bound to
//! exactly one loaded image instance and never shared across concurrent invocations.
//!
//! # Key Components
//!
//! - [`HeapBackend`] - The allocator capability
//! - [`ArenaAllocator`] / [`QuotaAllocator`] - Implementations
//! - [`AllocatorShim`] / [`InstalledShim`] - Record tracking and per-call installation
//! - [`AllocationRecord`] - One tracked allocation

mod arena;
mod quota;
mod shim;

pub use arena::ArenaAllocator;
pub use quota::QuotaAllocator;
pub use shim::{bridge_alloc, bridge_free, AllocatorShim, InstalledShim, DEFAULT_ALIGN};

use crate::Result;

/// One tracked allocation handed to foreign code.
///
/// Created when the shim serves an allocation and retained (dead) after free so use-after-free
/// style misbehavior remains attributable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocationRecord {
    /// Base address of the allocation.
    pub address: u64,
    /// Size of the allocation in bytes.
    pub size: usize,
    /// Whether the allocation is still live.
    pub live: bool,
}

impl AllocationRecord {
    /// Returns `true` if `address` falls inside this record's range.
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.size as u64
    }
}

/// The allocator capability the invocation layer depends on.
///
/// A backend owns real memory and hands out addresses; the [`AllocatorShim`] layered on top
/// owns the allocation records and their invariants. Implementations must fail with
/// [`crate::Error::AllocatorExhausted`] when no sufficiently large free region exists rather
/// than growing unboundedly; the invoker may then retry once after [`HeapBackend::enlarge`].
pub trait HeapBackend: Send {
    /// Serves an allocation of `size` bytes at the given alignment.
    ///
    /// # Errors
    /// Returns [`crate::Error::AllocatorExhausted`] when no free region fits.
    fn allocate(&mut self, size: usize, align: usize) -> Result<u64>;

    /// Returns a previously served allocation.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownFree`] if `address` was not served by this backend or
    /// was already freed.
    fn free(&mut self, address: u64) -> Result<()>;

    /// Adds `extra` bytes of capacity for the exhaustion retry path.
    fn enlarge(&mut self, extra: usize);

    /// Total capacity in bytes across all arenas.
    fn capacity(&self) -> usize;

    /// Size of the largest allocation that could currently be served.
    fn largest_free(&self) -> usize;
}
