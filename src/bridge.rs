//! High-level terrain bridge facade.
//!
//! [`TerrainBridge`] wires the whole pipeline together behind one call:
//! cache read-through, instance acquisition from the bounded pool, invocation of the foreign
//! generation routine, conversion into the host chunk representation, and write-back. It is
//! the only type most embedders touch.
//!
//! # Setup semantics
//!
//! Construction eagerly loads and resolves one instance: a malformed image or an unresolvable
//! generation symbol aborts setup entirely, and no partial bridge is ever exposed. Further
//! instances load on demand as concurrent requests arrive, up to the pool capacity.
//!
//! # Failure semantics
//!
//! Per-request errors are scoped to the request. An [`crate::Error::InvocationFault`] or
//! [`crate::Error::InvocationTimeout`] additionally retires the instance that served the
//! request (a timed-out instance is abandoned, since its invocation thread cannot be
//! cancelled); the next request draws a freshly loaded instance. A foreign-code fault never
//! propagates as an unstructured crash of the serving process.
//!
//! # Examples
//!
//! ```rust,no_run
//! use terrabridge::{BridgeConfig, TerrainBridge};
//! use terrabridge::chunk::ChunkSeed;
//!
//! let bridge = TerrainBridge::from_file("worldgen.dll".as_ref(), BridgeConfig::default())?;
//!
//! let chunk = bridge.generate(ChunkSeed { world_seed: 42, x: 3, y: 7, version: 1 })?;
//! println!("{} payload bytes", chunk.len());
//! # Ok::<(), terrabridge::Error>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    capability::{detect, Capabilities},
    chunk::{convert, ChunkCache, ChunkSeed, TerrainChunk},
    file::File,
    heap::AllocatorShim,
    image::{ImageLoader, LoaderConfig},
    invoke::{generator_signature, InvokeConfig, NativeHooks, TerrainInvoker, GENERATOR_SYMBOL},
    pool::{BridgeInstance, InstancePool, PoolConfig},
    symbols::{Signature, SymbolResolver},
    Error,
    Result,
};

/// Configuration of a [`TerrainBridge`].
///
/// Defaults are production-shaped; tests and bring-up tighten the timeouts.
#[derive(Clone)]
pub struct BridgeConfig {
    /// Maximum simultaneously loaded image instances.
    pub pool_capacity: usize,

    /// Bound on waiting for a free instance before failing with backpressure.
    pub acquire_timeout: Duration,

    /// Wall-clock budget for one foreign generation call.
    pub invoke_timeout: Duration,

    /// Arena budget per instance, in bytes.
    pub arena_budget: usize,

    /// Directory of the persistent chunk store; `None` keeps the cache in memory only.
    pub cache_dir: Option<PathBuf>,

    /// Undecorated name of the generation entry point.
    pub generator_symbol: String,

    /// Signature the entry point must demangle to.
    pub expected_signature: Signature,

    /// Image mapping options.
    pub loader: LoaderConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            pool_capacity: 2,
            acquire_timeout: Duration::from_secs(5),
            invoke_timeout: Duration::from_secs(10),
            arena_budget: 8 * 1024 * 1024,
            cache_dir: None,
            generator_symbol: GENERATOR_SYMBOL.to_string(),
            expected_signature: generator_signature(),
            loader: LoaderConfig::default(),
        }
    }
}

/// The terrain generation bridge.
///
/// Owns the source image bytes, the instance pool, the chunk cache, the hook registry, and
/// the invocation boundary. See the module docs for semantics.
pub struct TerrainBridge {
    pool: InstancePool,
    cache: ChunkCache,
    invoker: TerrainInvoker,
    hooks: Arc<NativeHooks>,
    capabilities: Capabilities,
}

impl TerrainBridge {
    /// Builds a bridge from an executable image on disk.
    ///
    /// # Arguments
    /// * `path`   - Path to the generator executable
    /// * `config` - Bridge configuration
    ///
    /// # Errors
    /// Any parse or resolution error aborts setup; see [`crate::Error`].
    pub fn from_file(path: &Path, config: BridgeConfig) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes, config)
    }

    /// Builds a bridge from executable image bytes.
    ///
    /// The bytes are retained: every pool instance is loaded fresh from them, including
    /// replacements for retired instances.
    ///
    /// # Errors
    /// Any parse or resolution error aborts setup; see [`crate::Error`].
    pub fn from_bytes(bytes: Vec<u8>, config: BridgeConfig) -> Result<Self> {
        let bytes = Arc::new(bytes);
        let resolver = Arc::new(SymbolResolver::new());
        let hooks = Arc::new(NativeHooks::new());

        let loader_bytes = bytes.clone();
        let loader_config = config.loader.clone();
        let symbol_name = config.generator_symbol.clone();
        let expected = config.expected_signature.clone();
        let arena_budget = config.arena_budget;
        let loader_resolver = resolver.clone();

        let load_instance = move || -> Result<BridgeInstance> {
            let file = File::from_mem(loader_bytes.as_ref().clone())?;
            let image = ImageLoader::with_config(loader_config.clone()).load(&file)?;
            let symbol = loader_resolver.resolve(&image, &symbol_name, &expected)?;

            Ok(BridgeInstance::new(
                image,
                AllocatorShim::with_arena(arena_budget),
                symbol,
            ))
        };

        let pool = InstancePool::new(
            PoolConfig {
                capacity: config.pool_capacity,
                acquire_timeout: config.acquire_timeout,
            },
            Box::new(load_instance),
        );

        // Parse and resolution errors must abort setup entirely; warming one instance
        // also provides the fingerprint the cache store is keyed by.
        if pool.warm(1)? == 0 {
            return Err(Error::Other(
                "failed to load the initial image instance".to_string(),
            ));
        }

        let fingerprint = {
            let guard = pool.acquire()?;
            *guard.image().fingerprint()
        };

        let cache = match &config.cache_dir {
            Some(dir) => ChunkCache::with_store(dir, fingerprint)?,
            None => ChunkCache::in_memory(fingerprint),
        };

        let invoker = TerrainInvoker::new(
            InvokeConfig {
                timeout: config.invoke_timeout,
                arena_retry_extra: config.arena_budget,
            },
            hooks.clone(),
        );

        Ok(TerrainBridge {
            pool,
            cache,
            invoker,
            hooks,
            capabilities: detect(),
        })
    }

    /// Generates (or serves from cache) the chunk for `seed`.
    ///
    /// Read-through: a cache miss acquires an instance, invokes the foreign routine,
    /// converts the output, and writes the result back before returning it.
    ///
    /// # Errors
    /// See [`crate::Error`]; every failure is scoped to this request.
    pub fn generate(&self, seed: ChunkSeed) -> Result<Arc<TerrainChunk>> {
        if let Some(chunk) = self.cache.get(&seed) {
            return Ok(chunk);
        }

        let mut guard = self.pool.acquire()?;

        let raw = match self
            .invoker
            .generate(guard.image(), guard.symbol(), guard.shim(), &seed)
        {
            Ok(raw) => raw,
            Err(error) => {
                match &error {
                    Error::InvocationTimeout { .. } => guard.abandon(),
                    Error::InvocationFault { .. } => guard.poison(),
                    _ => {}
                }
                return Err(error);
            }
        };

        let chunk = convert(&raw, &seed)?;
        self.cache.put(chunk)
    }

    /// The native hook registry.
    ///
    /// Registering a hook for the generator symbol routes invocations to a host-native
    /// stand-in; used by tests and platform bring-up.
    #[must_use]
    pub fn hooks(&self) -> &NativeHooks {
        &self.hooks
    }

    /// The capability selection compiled into this build.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Number of chunks currently held in the in-memory cache layer.
    #[must_use]
    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }

    /// Drops `seed` from both cache layers; the next request regenerates it.
    pub fn invalidate(&self, seed: &ChunkSeed) {
        self.cache.invalidate(seed);
    }

    /// Number of currently live image instances.
    #[must_use]
    pub fn live_instances(&self) -> usize {
        self.pool.live()
    }
}
