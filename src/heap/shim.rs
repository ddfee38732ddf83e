//! The allocator shim: record tracking and the C ABI surface.
//!
//! [`AllocatorShim`] is what the foreign code actually calls through: its allocation entry
//! points are exported with the C ABI ([`bridge_alloc`]/[`bridge_free`]) and dispatch to the
//! shim installed on the invoking thread. The shim layers the bridge's safety invariants over
//! any [`crate::heap::HeapBackend`]:
//!
//! - every served allocation is tracked in an [`crate::heap::AllocationRecord`]
//! - live records never overlap (checked on every allocation, not assumed)
//! - freed records stay behind, dead, so a double free or an invented address is reported as
//!   [`crate::Error::UnknownFree`] instead of silently ignored
//!
//! Exhaustion and misuse observed *during* a foreign call cannot be surfaced across the C
//! ABI, so the shim latches them; the invoker collects the latched fault with
//! [`AllocatorShim::take_fault`] after the call returns.
//!
//! One shim is bound to exactly one loaded image instance. Installation is thread-local and
//! guard-scoped, so at most one shim is ever active per invoking thread.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::{
    heap::{AllocationRecord, HeapBackend},
    Error::{self, AllocatorExhausted, HeapOverlap, UnknownFree},
    Result,
};

/// Default allocation alignment, matching the replaced allocator's contract.
pub const DEFAULT_ALIGN: usize = 16;

thread_local! {
    /// The shim serving foreign allocation calls on this thread, if any.
    static ACTIVE_SHIM: RefCell<Option<AllocatorShim>> = const { RefCell::new(None) };
}

/// Internal state shared by all handles to one shim.
struct ShimState {
    backend: Box<dyn HeapBackend>,
    records: BTreeMap<u64, AllocationRecord>,
    /// Latched exhaustion observed during a foreign call: `(requested, available)`.
    exhausted: Option<(usize, usize)>,
    /// Latched first unknown-free address observed during a foreign call.
    misuse: Option<u64>,
}

/// Allocation shim bound to one loaded image instance.
///
/// Cheap to clone; clones share state. See the module docs for the invariants it maintains.
///
/// # Examples
///
/// ```rust
/// use terrabridge::heap::AllocatorShim;
///
/// let shim = AllocatorShim::with_arena(64 * 1024);
/// let addr = shim.allocate(256, 16)?;
/// shim.free(addr)?;
/// assert!(shim.free(addr).is_err()); // double free is reported
/// # Ok::<(), terrabridge::Error>(())
/// ```
#[derive(Clone)]
pub struct AllocatorShim {
    state: Arc<Mutex<ShimState>>,
}

impl AllocatorShim {
    /// Creates a shim over the given backend.
    #[must_use]
    pub fn new(backend: Box<dyn HeapBackend>) -> Self {
        AllocatorShim {
            state: Arc::new(Mutex::new(ShimState {
                backend,
                records: BTreeMap::new(),
                exhausted: None,
                misuse: None,
            })),
        }
    }

    /// Creates a shim over a fresh [`crate::heap::ArenaAllocator`] of `budget` bytes.
    #[must_use]
    pub fn with_arena(budget: usize) -> Self {
        Self::new(Box::new(crate::heap::ArenaAllocator::new(budget)))
    }

    /// Serves an allocation and records it.
    ///
    /// # Arguments
    /// * `size`  - Requested size in bytes
    /// * `align` - Requested alignment (power of two)
    ///
    /// # Errors
    /// Returns [`crate::Error::AllocatorExhausted`] when the backend cannot serve the
    /// request (also latched for [`AllocatorShim::take_fault`]), or
    /// [`crate::Error::HeapOverlap`] if the backend produced a range colliding with a live
    /// record.
    pub fn allocate(&self, size: usize, align: usize) -> Result<u64> {
        let mut state = self.state.lock().map_err(|_| Error::LockError)?;

        let address = match state.backend.allocate(size, align) {
            Ok(address) => address,
            Err(AllocatorExhausted {
                requested,
                available,
            }) => {
                state.exhausted.get_or_insert((requested, available));
                return Err(AllocatorExhausted {
                    requested,
                    available,
                });
            }
            Err(other) => return Err(other),
        };

        let end = address + size as u64;
        let collision = state
            .records
            .values()
            .filter(|record| record.live)
            .any(|record| address < record.address + record.size as u64 && record.address < end);
        if collision {
            // Roll the allocation back; a backend violating disjointness is unusable
            let _ = state.backend.free(address);
            return Err(HeapOverlap { address, size });
        }

        state.records.insert(
            address,
            AllocationRecord {
                address,
                size,
                live: true,
            },
        );

        Ok(address)
    }

    /// Returns an allocation, marking its record dead.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownFree`] for an address no live record tracks; the
    /// misuse is also latched for [`AllocatorShim::take_fault`].
    pub fn free(&self, address: u64) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| Error::LockError)?;

        match state.records.get(&address) {
            Some(record) if record.live => {}
            _ => {
                state.misuse.get_or_insert(address);
                return Err(UnknownFree { address });
            }
        }

        state.backend.free(address)?;
        if let Some(record) = state.records.get_mut(&address) {
            record.live = false;
        }
        Ok(())
    }

    /// Finds the live record containing `address`, if any.
    ///
    /// The invoker uses this to validate the output pointer the foreign routine hands back
    /// before trusting a single byte behind it.
    #[must_use]
    pub fn record_containing(&self, address: u64) -> Option<AllocationRecord> {
        let state = self.state.lock().ok()?;
        state
            .records
            .values()
            .find(|record| record.live && record.contains(address))
            .copied()
    }

    /// Snapshot of all live records.
    #[must_use]
    pub fn live_records(&self) -> Vec<AllocationRecord> {
        match self.state.lock() {
            Ok(state) => state
                .records
                .values()
                .filter(|record| record.live)
                .copied()
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Collects the fault latched during the last foreign call, clearing it.
    ///
    /// Exhaustion takes priority: it is the one fault with a retry path.
    pub fn take_fault(&self) -> Option<Error> {
        let mut state = self.state.lock().ok()?;

        if let Some((requested, available)) = state.exhausted.take() {
            state.misuse = None;
            return Some(AllocatorExhausted {
                requested,
                available,
            });
        }
        if let Some(address) = state.misuse.take() {
            return Some(UnknownFree { address });
        }
        None
    }

    /// Adds backend capacity for the exhaustion retry path.
    pub fn enlarge(&self, extra: usize) {
        if let Ok(mut state) = self.state.lock() {
            state.backend.enlarge(extra);
        }
    }

    /// Frees every live record and clears latched faults.
    ///
    /// Called by the invoker after each generation call: whatever the foreign routine leaked
    /// during one invocation must not survive into the next.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().map_err(|_| Error::LockError)?;

        let live: Vec<u64> = state
            .records
            .values()
            .filter(|record| record.live)
            .map(|record| record.address)
            .collect();
        for address in live {
            state.backend.free(address)?;
        }

        state.records.clear();
        state.exhausted = None;
        state.misuse = None;
        Ok(())
    }

    /// Installs this shim as the active allocator for the current thread.
    ///
    /// The returned guard restores the previous installation on drop. The install lasts for
    /// the duration of one foreign call and never outlives the invoking thread's scope.
    #[must_use]
    pub fn install(&self) -> InstalledShim {
        let previous = ACTIVE_SHIM.with(|slot| slot.borrow_mut().replace(self.clone()));
        InstalledShim { previous }
    }

    /// Returns the shim installed on the current thread, if any.
    #[must_use]
    pub fn active() -> Option<AllocatorShim> {
        ACTIVE_SHIM.with(|slot| slot.borrow().clone())
    }
}

/// Guard scoping a thread-local shim installation.
///
/// Restores the previously installed shim (usually none) when dropped.
pub struct InstalledShim {
    previous: Option<AllocatorShim>,
}

impl Drop for InstalledShim {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_SHIM.with(|slot| *slot.borrow_mut() = previous);
    }
}

/// C ABI allocation entry point the foreign code is linked against.
///
/// Dispatches to the shim installed on the calling thread. Returns null when no shim is
/// installed or the arena is exhausted; the exhaustion is latched on the shim for the
/// invoker to collect.
pub extern "C" fn bridge_alloc(size: usize) -> *mut u8 {
    match AllocatorShim::active() {
        Some(shim) => match shim.allocate(size, DEFAULT_ALIGN) {
            Ok(address) => address as *mut u8,
            Err(_) => std::ptr::null_mut(),
        },
        None => std::ptr::null_mut(),
    }
}

/// C ABI free entry point the foreign code is linked against.
///
/// A free of an untracked address is latched as misuse on the installed shim; the C surface
/// itself cannot report it.
pub extern "C" fn bridge_free(ptr: *mut u8) {
    if let Some(shim) = AllocatorShim::active() {
        let _ = shim.free(ptr as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::QuotaAllocator;

    #[test]
    fn live_records_never_overlap() {
        let shim = AllocatorShim::with_arena(64 * 1024);

        let mut addresses = Vec::new();
        for _ in 0..32 {
            addresses.push(shim.allocate(100, 16).unwrap());
        }
        // Free every other allocation and allocate again into the gaps
        for address in addresses.iter().step_by(2) {
            shim.free(*address).unwrap();
        }
        for _ in 0..16 {
            shim.allocate(60, 16).unwrap();
        }

        let mut live = shim.live_records();
        live.sort_by_key(|record| record.address);
        for pair in live.windows(2) {
            assert!(
                pair[0].address + pair[0].size as u64 <= pair[1].address,
                "overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn unknown_free_is_latched() {
        let shim = AllocatorShim::with_arena(4096);

        assert!(matches!(
            shim.free(0xDEAD_BEEF),
            Err(UnknownFree { .. })
        ));
        assert!(matches!(
            shim.take_fault(),
            Some(UnknownFree {
                address: 0xDEAD_BEEF
            })
        ));
        assert!(shim.take_fault().is_none());
    }

    #[test]
    fn double_free_is_reported() {
        let shim = AllocatorShim::with_arena(4096);
        let address = shim.allocate(64, 16).unwrap();

        shim.free(address).unwrap();
        assert!(matches!(shim.free(address), Err(UnknownFree { .. })));
    }

    #[test]
    fn exhaustion_is_latched_with_priority() {
        let shim = AllocatorShim::new(Box::new(QuotaAllocator::new(4096, 0)));

        assert!(shim.allocate(64, 16).is_err());
        let _ = shim.free(0x1234);

        assert!(matches!(
            shim.take_fault(),
            Some(AllocatorExhausted { .. })
        ));
        // Misuse was discarded alongside the exhaustion latch
        assert!(shim.take_fault().is_none());
    }

    #[test]
    fn reset_reclaims_everything() {
        let shim = AllocatorShim::with_arena(4096);

        for _ in 0..8 {
            shim.allocate(256, 16).unwrap();
        }
        assert!(shim.allocate(4096, 16).is_err());

        shim.reset().unwrap();
        assert!(shim.live_records().is_empty());
        // With every record reclaimed, a half-arena allocation fits again
        assert!(shim.allocate(2048, 16).is_ok());
    }

    #[test]
    fn record_containing_interior_address() {
        let shim = AllocatorShim::with_arena(4096);
        let address = shim.allocate(128, 16).unwrap();

        let record = shim.record_containing(address + 64).unwrap();
        assert_eq!(record.address, address);
        assert!(shim.record_containing(address + 128).is_none());

        shim.free(address).unwrap();
        assert!(shim.record_containing(address).is_none());
    }

    #[test]
    fn c_surface_dispatches_to_installed_shim() {
        let shim = AllocatorShim::with_arena(4096);

        // No installation: null, nothing latched anywhere
        assert!(bridge_alloc(64).is_null());

        {
            let _guard = shim.install();
            let ptr = bridge_alloc(64);
            assert!(!ptr.is_null());
            assert_eq!(shim.live_records().len(), 1);
            bridge_free(ptr);
            assert!(shim.live_records().is_empty());
        }

        // Guard dropped: surface is inert again
        assert!(bridge_alloc(64).is_null());
    }

    #[test]
    fn arena_exhaustion_reported_after_shim_reset() {
        // 8 * 256 fits in 4096 only with room for alignment padding; the 9th fails
        let shim = AllocatorShim::with_arena(2048);
        let mut served = 0;
        loop {
            match shim.allocate(256, 16) {
                Ok(_) => served += 1,
                Err(AllocatorExhausted { .. }) => break,
                Err(other) => panic!("unexpected {:?}", other),
            }
        }
        assert!(served >= 7);

        shim.enlarge(4096);
        let _ = shim.take_fault();
        assert!(shim.allocate(256, 16).is_ok());
    }
}
