// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
//#![deny(unsafe_code)]
// - 'heap/shim.rs' hands real arena pointers across the C ABI
// - 'invoke/mod.rs' transmutes a resolved export address into a callable and copies the
//   output allocation it returns
// - 'file/physical.rs' uses mmap to map a file into memory

//! # terrabridge
//!
//! A defensive hosting bridge that reproduces procedurally generated terrain bit-identical
//! to an original closed-source world generator, by loading that generator's PE executable
//! image and invoking its generation routine directly - without access to its source code.
//!
//! ## Features
//!
//! - **🛡️ Defensive image loading** - Every offset and size read from the untrusted
//!   executable is validated against the real input length before use
//! - **🔍 Signature-verified resolution** - Mangled export names are demangled into
//!   structured signatures and checked against the caller's expectation before any call
//! - **📦 Hosted allocator** - The foreign code's heap calls are served from tracked,
//!   non-overlapping arena allocations; misuse is reported, never ignored
//! - **⏱️ Bounded invocation** - Foreign calls run under a wall-clock timeout on pooled,
//!   single-use-on-fault image instances; a foreign fault never crashes the host
//! - **🗃️ Deterministic chunk cache** - Keyed by the full (seed, coordinate, version)
//!   tuple, with an optional fingerprint-guarded persistent store
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use terrabridge::{BridgeConfig, TerrainBridge};
//! use terrabridge::chunk::ChunkSeed;
//!
//! let bridge = TerrainBridge::from_file("worldgen.dll".as_ref(), BridgeConfig::default())?;
//!
//! let chunk = bridge.generate(ChunkSeed { world_seed: 42, x: 3, y: 7, version: 1 })?;
//! println!("Generated {} payload bytes", chunk.len());
//! # Ok::<(), terrabridge::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `terrabridge` is organized as a pipeline, leaves first:
//!
//! - [`file`] - PE file abstraction, backends, and the bounds-checked cursor parser
//! - [`image`] - Validation and mapping of the executable into an addressable image
//! - [`symbols`] - Demangling and signature-verified export resolution
//! - [`heap`] - The allocator substituted for the foreign code's expected heap
//! - [`invoke`] - The guarded invocation boundary with timeout and fault mapping
//! - [`chunk`] - Conversion into the host chunk representation and the keyed cache
//! - [`pool`] - The bounded pool of independently loaded image instances
//! - [`capability`] - The build-time capability selection point
//! - [`TerrainBridge`] - The facade wiring all of the above together
//!
//! ## Concurrency Model
//!
//! Foreign code is assumed not thread-safe: at most one invocation is in flight per loaded
//! image instance, and concurrency comes from a small pool of independently loaded
//! instances. Acquiring is a bounded blocking wait; exceeding the bound is a typed
//! backpressure error, never an unbounded queue. See [`pool`] for details.
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result) with typed failure modes: parse and
//! resolution errors abort setup entirely, per-invocation errors are scoped to one request,
//! and faulting instances are retired rather than reused. The bridge never lets a
//! foreign-code fault propagate as an unstructured crash of the serving process.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit-tests
#[cfg(test)]
pub(crate) mod test;

mod bridge;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust,no_run
/// use terrabridge::prelude::*;
///
/// let bridge = TerrainBridge::from_file("worldgen.dll".as_ref(), BridgeConfig::default())?;
/// # Ok::<(), terrabridge::Error>(())
/// ```
pub mod prelude;

/// Build-time capability selection point.
///
/// Reports which conversion path and calling-convention variant the packaging
/// configuration compiled in. See [`capability::Capabilities`].
pub mod capability;

/// Host chunk representation, conversion, and the keyed chunk cache.
///
/// # Key Types
///
/// - [`chunk::ChunkSeed`] - Full request key: seed, coordinate, version
/// - [`chunk::TerrainChunk`] - Converted chunk with the documented wire encoding
/// - [`chunk::ChunkCache`] - Concurrent in-memory layer plus persistent blob store
/// - [`chunk::convert`] - Pure raw-to-host layout transform
pub mod chunk;

/// PE file abstraction: backends, header access, and the bounds-checked parser.
///
/// # Key Types
///
/// - [`file::File`] - Parsed PE with RVA translation
/// - [`file::Backend`] - Data source trait ([`file::Physical`], [`file::Memory`])
/// - [`file::parser::Parser`] - Cursor parser for untrusted bytes
pub mod file;

/// The allocator substituted for the foreign code's expected heap.
///
/// # Key Types
///
/// - [`heap::HeapBackend`] - The allocator capability
/// - [`heap::ArenaAllocator`] / [`heap::QuotaAllocator`] - Production arena and test double
/// - [`heap::AllocatorShim`] - Record tracking and the C ABI surface
pub mod heap;

/// Validation and mapping of the generator executable image.
///
/// # Key Types
///
/// - [`image::ImageLoader`] - Defensive loader
/// - [`image::TerrainImage`] - The mapped, immutable image instance
/// - [`image::ExportTable`] - Parsed export directory
pub mod image;

/// The guarded invocation boundary around the foreign generation routine.
///
/// # Key Types
///
/// - [`invoke::TerrainInvoker`] - Marshalling, dispatch, timeout, fault mapping
/// - [`invoke::RawBuffer`] - Captured foreign output
/// - [`invoke::NativeHooks`] - Host-native stand-ins for named exports
pub mod invoke;

/// Bounded pool of independently loaded image instances.
///
/// # Key Types
///
/// - [`pool::InstancePool`] - The bounded pool with backpressure
/// - [`pool::BridgeInstance`] - One mapped image + shim + resolved entry point
pub mod pool;

/// Demangling and signature-verified export resolution.
///
/// # Key Types
///
/// - [`symbols::SymbolResolver`] - Lookup, demangle, verify, resolve
/// - [`symbols::ExportSymbol`] - A resolved, signature-verified export
/// - [`symbols::demangle`] - The pure name demangler
pub mod symbols;

/// `terrabridge` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always
/// [`Error`]. Used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `terrabridge` Error type
///
/// The main error type for all operations in this crate. See [`error::Error`] for the full
/// taxonomy: image parsing, resolution, allocator, invocation, conversion, and resource
/// errors.
pub use error::Error;

/// Main entry point for hosting a generator image.
///
/// See [`bridge::TerrainBridge`] for the read-through generation pipeline.
pub use bridge::{BridgeConfig, TerrainBridge};

/// Cursor parser for untrusted bytes.
///
/// Re-exported at the crate root since consumers of raw chunk payloads use it too.
pub use file::parser::Parser;
