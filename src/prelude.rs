//! Convenient re-exports of the most commonly used types and traits.
//!
//! This module provides a curated selection of the most frequently used types from across
//! the terrabridge library, allowing for convenient glob imports.
//!
//! # Example
//!
//! ```rust,no_run
//! use terrabridge::prelude::*;
//!
//! let bridge = TerrainBridge::from_file("worldgen.dll".as_ref(), BridgeConfig::default())?;
//! let chunk = bridge.generate(ChunkSeed { world_seed: 42, x: 0, y: 0, version: 1 })?;
//! # Ok::<(), terrabridge::Error>(())
//! ```

pub use crate::{
    capability::Capabilities,
    chunk::{convert, ChunkCache, ChunkSeed, TerrainChunk, CHUNK_DIM, CHUNK_PAYLOAD_LEN},
    file::{Backend, File},
    heap::{AllocatorShim, ArenaAllocator, HeapBackend, QuotaAllocator},
    image::{ExportTable, ImageLoader, LoaderConfig, MappedSection, SectionProtection, TerrainImage},
    invoke::{
        generator_signature, GenRequest, InvokeConfig, NativeHooks, RawBuffer, TerrainInvoker,
        GENERATOR_SYMBOL,
    },
    pool::{BridgeInstance, InstancePool, PoolConfig, PoolGuard},
    symbols::{
        demangle, CallingConvention, DemangledSignature, ExportSymbol, Signature, SymbolResolver,
        TypeShape,
    },
    BridgeConfig, Error, Parser, Result, TerrainBridge,
};
