//! Foreign calling-convention selection and request marshalling.
//!
//! The generation entry point of the original binary has one fixed contract, determined
//! empirically against the target image and treated as an assumption rather than guessed
//! per-call:
//!
//! ```c
//! int GenerateChunk(unsigned int seed, long x, long y, unsigned int version,
//!                   unsigned char **out);
//! ```
//!
//! The routine allocates its output through the installed allocator, writes the raw chunk
//! (header + payload), stores the buffer's base pointer through `out`, and returns zero on
//! success. The bridge owns the buffer afterwards and frees it through the same allocator.
//!
//! Which convention carries that contract is a build-time property of the host platform: the
//! packaging configuration selects the target, and the `cfg`-gated alias below follows it.
//! This module is the capability-selection point for the calling convention; the `vector`
//! feature (see [`crate::chunk`]) is its counterpart for the conversion path.

use crate::{
    chunk::ChunkSeed,
    symbols::{CallingConvention, Signature, TypeShape},
};

/// Marshalled generation request, in the memory layout the foreign routine expects.
///
/// Field order and types mirror the foreign parameter list exactly; the invoker passes the
/// fields as individual arguments, and native hooks receive the struct whole.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct GenRequest {
    /// World seed.
    pub world_seed: u32,
    /// Chunk X coordinate.
    pub chunk_x: i32,
    /// Chunk Y coordinate.
    pub chunk_y: i32,
    /// Generator version tag.
    pub version: u32,
}

impl GenRequest {
    /// Marshals a [`ChunkSeed`] into the foreign layout.
    #[must_use]
    pub fn from_seed(seed: &ChunkSeed) -> Self {
        GenRequest {
            world_seed: seed.world_seed,
            chunk_x: seed.x,
            chunk_y: seed.y,
            version: seed.version,
        }
    }
}

/// Raw foreign entry point type on Win32/x86 targets (`__stdcall`).
#[cfg(all(windows, target_arch = "x86"))]
pub type RawGeneratorFn =
    unsafe extern "stdcall" fn(u32, i32, i32, u32, *mut *mut u8) -> i32;

/// Raw foreign entry point type on all other targets (C convention).
#[cfg(not(all(windows, target_arch = "x86")))]
pub type RawGeneratorFn = unsafe extern "C" fn(u32, i32, i32, u32, *mut *mut u8) -> i32;

/// The calling convention the foreign entry point is expected to use on this build target.
#[must_use]
pub fn foreign_convention() -> CallingConvention {
    if cfg!(all(windows, target_arch = "x86")) {
        CallingConvention::Stdcall
    } else {
        CallingConvention::Cdecl
    }
}

/// The signature the invoker expects of the generation entry point.
///
/// Resolution verifies the demangled export signature against this before any call is made.
#[must_use]
pub fn generator_signature() -> Signature {
    Signature {
        convention: foreign_convention(),
        returns: TypeShape::Int,
        params: vec![
            TypeShape::UInt,
            TypeShape::Long,
            TypeShape::Long,
            TypeShape::UInt,
            TypeShape::Ptr(Box::new(TypeShape::Ptr(Box::new(TypeShape::UChar)))),
        ],
    }
}

/// Undecorated name of the generation entry point in the original binary.
pub const GENERATOR_SYMBOL: &str = "GenerateChunk";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout_is_fixed() {
        assert_eq!(std::mem::size_of::<GenRequest>(), 16);

        let seed = ChunkSeed {
            world_seed: 42,
            x: 3,
            y: -7,
            version: 1,
        };
        let request = GenRequest::from_seed(&seed);
        assert_eq!(request.world_seed, 42);
        assert_eq!(request.chunk_x, 3);
        assert_eq!(request.chunk_y, -7);
        assert_eq!(request.version, 1);
    }

    #[test]
    fn expected_signature_matches_convention() {
        let sig = generator_signature();
        assert_eq!(sig.convention, foreign_convention());
        assert_eq!(sig.params.len(), 5);
        assert_eq!(sig.stack_bytes(), 20);
    }
}
