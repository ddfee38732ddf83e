//! Bounded pool of independently loaded image instances.
//!
//! Foreign code loaded from the generator image is assumed not thread-safe: it may rely on
//! its own implicit global state, which the bridge cannot inspect. That state is therefore
//! modeled as an opaque resource owned exclusively by one [`BridgeInstance`] - its own mapped
//! image, its own allocator shim - and **at most one invocation is ever in flight per
//! instance**. Concurrency across requests comes from pooling several instances, never from
//! sharing one.
//!
//! Acquiring is a blocking wait with a bound: when every instance stays busy past the bound,
//! the request fails with [`crate::Error::Backpressure`] instead of queueing unboundedly.
//!
//! A faulted or timed-out instance is poisoned and retired on release - it never re-enters
//! the pool; the next acquire loads a fresh replacement from the source bytes. A timed-out
//! instance is additionally *abandoned* (leaked), because its runaway invocation thread may
//! still be executing inside the mapped image.
//!
//! # Key Components
//!
//! - [`InstancePool`] / [`PoolConfig`] - The bounded pool
//! - [`BridgeInstance`] - One mapped image + shim + resolved entry point
//! - [`PoolGuard`] - Exclusive instance lease, returned on drop

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::{
    heap::AllocatorShim,
    image::TerrainImage,
    symbols::ExportSymbol,
    Error::{Backpressure, LockError},
    Result,
};

/// One independently loaded image instance.
///
/// Bundles everything one invocation needs exclusive access to: the mapped image (with the
/// foreign code's implicit state inside it), the allocator shim bound to it, and the
/// resolved generation entry point.
pub struct BridgeInstance {
    image: TerrainImage,
    shim: AllocatorShim,
    symbol: ExportSymbol,
    id: u64,
    poisoned: bool,
    abandoned: bool,
}

impl BridgeInstance {
    /// Bundles a freshly loaded image, its shim, and its resolved entry point.
    #[must_use]
    pub fn new(image: TerrainImage, shim: AllocatorShim, symbol: ExportSymbol) -> Self {
        BridgeInstance {
            image,
            shim,
            symbol,
            id: 0,
            poisoned: false,
            abandoned: false,
        }
    }

    /// The mapped image.
    #[must_use]
    pub fn image(&self) -> &TerrainImage {
        &self.image
    }

    /// The allocator shim bound to this instance.
    #[must_use]
    pub fn shim(&self) -> &AllocatorShim {
        &self.shim
    }

    /// The resolved generation entry point.
    #[must_use]
    pub fn symbol(&self) -> &ExportSymbol {
        &self.symbol
    }

    /// Pool-assigned instance id; fresh replacements get fresh ids.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Marks the instance unusable; it is retired instead of returned on release.
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    /// Poisons the instance and additionally marks it abandoned: its resources are leaked
    /// on release because a runaway invocation thread may still be using them.
    pub fn abandon(&mut self) {
        self.poisoned = true;
        self.abandoned = true;
    }

    /// Whether the instance has been poisoned.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Whether the instance must be leaked rather than dropped.
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }
}

/// Pool sizing and acquire behavior.
#[derive(Clone, Debug)]
pub struct PoolConfig {
    /// Maximum number of simultaneously live instances.
    pub capacity: usize,

    /// Bound on the blocking wait in [`InstancePool::acquire`].
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: 2,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Loads one fresh instance from the source image bytes.
type InstanceLoader = dyn Fn() -> Result<BridgeInstance> + Send + Sync;

struct PoolState {
    idle: Vec<BridgeInstance>,
    live: usize,
    next_id: u64,
}

/// Bounded pool of [`BridgeInstance`]s.
///
/// Instances are loaded lazily on demand (or eagerly via [`InstancePool::warm`]) and handed
/// out exclusively through [`PoolGuard`]s.
pub struct InstancePool {
    config: PoolConfig,
    loader: Box<InstanceLoader>,
    inner: Mutex<PoolState>,
    available: Condvar,
}

impl InstancePool {
    /// Creates a pool that loads instances through `loader`.
    ///
    /// # Arguments
    /// * `config` - Capacity and acquire bound
    /// * `loader` - Loads one fresh instance; called under no lock
    #[must_use]
    pub fn new(config: PoolConfig, loader: Box<InstanceLoader>) -> Self {
        InstancePool {
            config,
            loader,
            inner: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                next_id: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Eagerly loads up to `count` instances in parallel, bounded by the capacity.
    ///
    /// Returns the number of instances actually loaded.
    ///
    /// # Errors
    /// Returns the first load error if nothing could be loaded at all.
    pub fn warm(&self, count: usize) -> Result<usize> {
        let reserve = {
            let mut state = self.inner.lock().map_err(|_| LockError)?;
            let reserve = count.min(self.config.capacity.saturating_sub(state.live));
            state.live += reserve;
            reserve
        };

        if reserve == 0 {
            return Ok(0);
        }

        let results: Vec<Result<BridgeInstance>> =
            (0..reserve).into_par_iter().map(|_| (self.loader)()).collect();

        let mut loaded = 0;
        let mut first_error = None;
        {
            let mut state = self.inner.lock().map_err(|_| LockError)?;
            for result in results {
                match result {
                    Ok(mut instance) => {
                        instance.id = state.next_id;
                        state.next_id += 1;
                        state.idle.push(instance);
                        loaded += 1;
                    }
                    Err(error) => {
                        state.live -= 1;
                        if first_error.is_none() {
                            first_error = Some(error);
                        }
                    }
                }
            }
        }
        self.available.notify_all();

        match (loaded, first_error) {
            (0, Some(error)) => Err(error),
            _ => Ok(loaded),
        }
    }

    /// Acquires an exclusive instance lease, blocking up to the configured bound.
    ///
    /// Hands out an idle instance when one exists, loads a fresh one while under capacity,
    /// and otherwise waits for a release. Exceeding the bound fails with
    /// [`crate::Error::Backpressure`].
    ///
    /// # Errors
    /// Also propagates instance load errors - a parse or resolution failure aborts the
    /// request, never installs a partial instance.
    pub fn acquire(&self) -> Result<PoolGuard<'_>> {
        let start = Instant::now();
        let mut state = self.inner.lock().map_err(|_| LockError)?;

        loop {
            if let Some(instance) = state.idle.pop() {
                return Ok(PoolGuard {
                    pool: self,
                    instance: Some(instance),
                });
            }

            if state.live < self.config.capacity {
                state.live += 1;
                let id = state.next_id;
                state.next_id += 1;
                drop(state);

                match (self.loader)() {
                    Ok(mut instance) => {
                        instance.id = id;
                        return Ok(PoolGuard {
                            pool: self,
                            instance: Some(instance),
                        });
                    }
                    Err(error) => {
                        if let Ok(mut state) = self.inner.lock() {
                            state.live = state.live.saturating_sub(1);
                        }
                        self.available.notify_one();
                        return Err(error);
                    }
                }
            }

            let Some(remaining) = self.config.acquire_timeout.checked_sub(start.elapsed())
            else {
                return Err(Backpressure {
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            };

            let (next_state, _timeout) = self
                .available
                .wait_timeout(state, remaining)
                .map_err(|_| LockError)?;
            state = next_state;
        }
    }

    /// Number of currently live instances (idle + leased).
    #[must_use]
    pub fn live(&self) -> usize {
        self.inner.lock().map(|state| state.live).unwrap_or(0)
    }

    /// Returns an instance from a dropped guard.
    fn release(&self, instance: BridgeInstance) {
        if instance.is_poisoned() {
            if instance.is_abandoned() {
                // A runaway invocation thread may still execute inside the mapped image
                // and write through the arena; neither can be freed safely.
                std::mem::forget(instance);
            } else {
                drop(instance);
            }

            if let Ok(mut state) = self.inner.lock() {
                state.live = state.live.saturating_sub(1);
            }
        } else if let Ok(mut state) = self.inner.lock() {
            state.idle.push(instance);
        }

        self.available.notify_one();
    }
}

/// Exclusive lease on one [`BridgeInstance`].
///
/// Dereferences to the instance; returning it to the pool (or retiring it, when poisoned)
/// happens on drop.
pub struct PoolGuard<'a> {
    pool: &'a InstancePool,
    instance: Option<BridgeInstance>,
}

impl std::fmt::Debug for PoolGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolGuard")
            .field("instance", &self.instance.is_some())
            .finish()
    }
}

impl std::ops::Deref for PoolGuard<'_> {
    type Target = BridgeInstance;

    fn deref(&self) -> &Self::Target {
        self.instance.as_ref().expect("guard holds an instance")
    }
}

impl std::ops::DerefMut for PoolGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.instance.as_mut().expect("guard holds an instance")
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.release(instance);
        }
    }
}
