//! Host-side chunk representation and layout constants.
//!
//! A terrain chunk is a bounded unit of generated terrain keyed by the full
//! `(seed, coordinate, version)` tuple. The foreign routine emits it in its own raw layout
//! (see [`RAW_HEADER_LEN`]); [`crate::chunk::convert`] validates and transforms that into the
//! host [`TerrainChunk`], whose wire encoding is the documented fixed layout the server's
//! serialization layer consumes.
//!
//! # Layouts
//!
//! Raw foreign buffer (little-endian):
//!
//! ```text
//! u32 payload_len | i32 x | i32 y | u32 version | payload (column-major u32 values)
//! ```
//!
//! Host wire encoding ([`TerrainChunk::encode`], little-endian):
//!
//! ```text
//! i32 x | i32 y | u32 version | u32 payload_len | payload (row-major u32 values)
//! ```
//!
//! # Key Components
//!
//! - [`ChunkSeed`] - Full request key
//! - [`TerrainChunk`] - Converted chunk with deterministic payload
//! - [`convert`] - Raw-to-host layout transform
//! - [`ChunkCache`] - Keyed in-memory + persistent store

mod cache;
mod converter;

pub use cache::ChunkCache;
pub use converter::convert;

use crate::{file::parser::Parser, Error::Conversion, Result};

/// Chunk edge length in columns.
pub const CHUNK_DIM: usize = 64;

/// Payload size in bytes: one little-endian `u32` per column.
pub const CHUNK_PAYLOAD_LEN: usize = CHUNK_DIM * CHUNK_DIM * 4;

/// Size of the raw foreign output header.
pub const RAW_HEADER_LEN: usize = 16;

/// Size of the host wire-encoding header.
pub const WIRE_HEADER_LEN: usize = 16;

/// Full key of one generation request: world seed, chunk coordinate, generator version.
///
/// The version tag participates in every lookup; a version change never reuses a stale
/// cache entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkSeed {
    /// World seed.
    pub world_seed: u32,
    /// Chunk X coordinate.
    pub x: i32,
    /// Chunk Y coordinate.
    pub y: i32,
    /// Generator version tag.
    pub version: u32,
}

impl std::fmt::Display for ChunkSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "seed={} x={} y={} v={}",
            self.world_seed, self.x, self.y, self.version
        )
    }
}

/// One converted terrain chunk.
///
/// Owned by the caller once returned. For a fixed [`ChunkSeed`] and a fixed loaded image,
/// the payload is byte-identical across generations - the cache relies on this and the test
/// suite asserts it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerrainChunk {
    seed: ChunkSeed,
    payload: Vec<u8>,
}

impl TerrainChunk {
    /// Builds a chunk from an already-validated row-major payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::Conversion`] if the payload is not exactly
    /// [`CHUNK_PAYLOAD_LEN`] bytes.
    pub fn new(seed: ChunkSeed, payload: Vec<u8>) -> Result<Self> {
        if payload.len() != CHUNK_PAYLOAD_LEN {
            return Err(Conversion(format!(
                "payload is {} bytes, expected {}",
                payload.len(),
                CHUNK_PAYLOAD_LEN
            )));
        }

        Ok(TerrainChunk { seed, payload })
    }

    /// The key this chunk was generated for.
    #[must_use]
    pub fn seed(&self) -> &ChunkSeed {
        &self.seed
    }

    /// The row-major payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for an empty payload (never produced by conversion).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Column value at `(row, col)`.
    ///
    /// # Panics
    /// Panics if `row` or `col` is outside [`CHUNK_DIM`]; this is an index operation, not a
    /// parse of untrusted input.
    #[must_use]
    pub fn column(&self, row: usize, col: usize) -> u32 {
        assert!(row < CHUNK_DIM && col < CHUNK_DIM);
        let offset = (row * CHUNK_DIM + col) * 4;
        u32::from_le_bytes([
            self.payload[offset],
            self.payload[offset + 1],
            self.payload[offset + 2],
            self.payload[offset + 3],
        ])
    }

    /// Encodes the chunk into the documented wire layout.
    ///
    /// Header: `x | y | version | payload_len`, little-endian, then the payload. The
    /// serialization collaborator owns everything beyond this framing.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(WIRE_HEADER_LEN + self.payload.len());
        out.extend_from_slice(&self.seed.x.to_le_bytes());
        out.extend_from_slice(&self.seed.y.to_le_bytes());
        out.extend_from_slice(&self.seed.version.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Decodes a wire-encoded chunk back, validating the header against `seed`.
    ///
    /// Used by the persistent cache store; the world seed is part of the lookup key, not the
    /// wire header, so it is supplied from outside.
    ///
    /// # Errors
    /// Returns [`crate::Error::Conversion`] if the header disagrees with `seed` or the
    /// declared length disagrees with the actual byte count.
    pub fn decode(seed: ChunkSeed, bytes: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(bytes);

        let x = parser.read_le::<i32>()?;
        let y = parser.read_le::<i32>()?;
        let version = parser.read_le::<u32>()?;
        let payload_len = parser.read_le::<u32>()? as usize;

        if x != seed.x || y != seed.y || version != seed.version {
            return Err(Conversion(format!(
                "encoded key (x={} y={} v={}) does not match requested {}",
                x, y, version, seed
            )));
        }

        if payload_len != bytes.len() - WIRE_HEADER_LEN {
            return Err(Conversion(format!(
                "declared payload length {} does not match the {} bytes present",
                payload_len,
                bytes.len() - WIRE_HEADER_LEN
            )));
        }

        let payload = parser.read_bytes(payload_len)?.to_vec();
        TerrainChunk::new(seed, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> ChunkSeed {
        ChunkSeed {
            world_seed: 42,
            x: 3,
            y: 7,
            version: 1,
        }
    }

    #[test]
    fn new_rejects_wrong_payload_size() {
        assert!(TerrainChunk::new(seed(), vec![0u8; 10]).is_err());
        assert!(TerrainChunk::new(seed(), vec![0u8; CHUNK_PAYLOAD_LEN]).is_ok());
    }

    #[test]
    fn encode_decode_preserves_bytes() {
        let mut payload = vec![0u8; CHUNK_PAYLOAD_LEN];
        payload[0] = 0xAA;
        payload[CHUNK_PAYLOAD_LEN - 1] = 0xBB;

        let chunk = TerrainChunk::new(seed(), payload).unwrap();
        let encoded = chunk.encode();
        assert_eq!(encoded.len(), WIRE_HEADER_LEN + CHUNK_PAYLOAD_LEN);

        let decoded = TerrainChunk::decode(seed(), &encoded).unwrap();
        assert_eq!(decoded, chunk);
    }

    #[test]
    fn decode_rejects_key_mismatch() {
        let chunk = TerrainChunk::new(seed(), vec![0u8; CHUNK_PAYLOAD_LEN]).unwrap();
        let encoded = chunk.encode();

        let mut other = seed();
        other.version = 2;
        assert!(TerrainChunk::decode(other, &encoded).is_err());
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let chunk = TerrainChunk::new(seed(), vec![0u8; CHUNK_PAYLOAD_LEN]).unwrap();
        let mut encoded = chunk.encode();
        encoded.truncate(encoded.len() - 1);

        assert!(TerrainChunk::decode(seed(), &encoded).is_err());
        assert!(TerrainChunk::decode(seed(), &encoded[..4]).is_err());
    }

    #[test]
    fn column_indexing_is_row_major() {
        let mut payload = vec![0u8; CHUNK_PAYLOAD_LEN];
        let offset = (2 * CHUNK_DIM + 5) * 4;
        payload[offset..offset + 4].copy_from_slice(&0x11223344u32.to_le_bytes());

        let chunk = TerrainChunk::new(seed(), payload).unwrap();
        assert_eq!(chunk.column(2, 5), 0x11223344);
        assert_eq!(chunk.column(5, 2), 0);
    }
}
