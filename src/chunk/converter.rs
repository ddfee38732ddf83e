//! Conversion of raw foreign output into the host chunk representation.
//!
//! The foreign routine emits columns in column-major order behind a small header; the host
//! representation is row-major. [`convert`] is a pure function: it validates the header
//! (declared length against actual byte count, echoed key against the request) and performs
//! the transpose. No allocation ownership, no foreign-code interaction.
//!
//! Two transpose paths exist: the scalar reference path, and a wide tiled path selected by
//! the `vector` build feature for targets where the packaging configuration enables it. Both
//! produce identical bytes; the test suite asserts that.

use crate::{
    chunk::{ChunkSeed, TerrainChunk, CHUNK_DIM, CHUNK_PAYLOAD_LEN, RAW_HEADER_LEN},
    file::parser::Parser,
    invoke::RawBuffer,
    Error::Conversion,
    Result,
};

/// Validates a raw foreign buffer and converts it into a [`TerrainChunk`].
///
/// # Arguments
/// * `raw`  - The buffer captured from the foreign call
/// * `seed` - The request the buffer is supposed to answer
///
/// # Errors
/// Returns [`crate::Error::Conversion`] if the declared payload length disagrees with the
/// actual byte count or with the fixed chunk size, or if the echoed key disagrees with the
/// request. Such a mismatch indicates a resolver or signature problem upstream and is never
/// retried.
pub fn convert(raw: &RawBuffer, seed: &ChunkSeed) -> Result<TerrainChunk> {
    let bytes = raw.bytes();
    if bytes.len() < RAW_HEADER_LEN {
        return Err(Conversion(format!(
            "raw buffer is {} bytes, smaller than the {} byte header",
            bytes.len(),
            RAW_HEADER_LEN
        )));
    }

    let mut parser = Parser::new(bytes);

    let payload_len = parser.read_le::<u32>()? as usize;
    let x = parser.read_le::<i32>()?;
    let y = parser.read_le::<i32>()?;
    let version = parser.read_le::<u32>()?;

    if payload_len != bytes.len() - RAW_HEADER_LEN {
        return Err(Conversion(format!(
            "declared payload length {} does not match the {} bytes present",
            payload_len,
            bytes.len() - RAW_HEADER_LEN
        )));
    }

    if payload_len != CHUNK_PAYLOAD_LEN {
        return Err(Conversion(format!(
            "declared payload length {} does not match the fixed chunk size {}",
            payload_len, CHUNK_PAYLOAD_LEN
        )));
    }

    if x != seed.x || y != seed.y || version != seed.version {
        return Err(Conversion(format!(
            "echoed key (x={} y={} v={}) does not match requested {}",
            x, y, version, seed
        )));
    }

    let columns = parser.read_bytes(payload_len)?;
    let payload = transpose(columns);

    TerrainChunk::new(*seed, payload)
}

/// Reference transpose: column-major input to row-major output.
#[cfg(not(feature = "vector"))]
fn transpose(columns: &[u8]) -> Vec<u8> {
    let mut payload = vec![0u8; CHUNK_PAYLOAD_LEN];

    for row in 0..CHUNK_DIM {
        for col in 0..CHUNK_DIM {
            let src = (col * CHUNK_DIM + row) * 4;
            let dst = (row * CHUNK_DIM + col) * 4;
            payload[dst..dst + 4].copy_from_slice(&columns[src..src + 4]);
        }
    }

    payload
}

/// Wide transpose: processes 8x8 tiles so reads and writes stay within cache lines.
///
/// Byte-for-byte equivalent to the reference path.
#[cfg(feature = "vector")]
fn transpose(columns: &[u8]) -> Vec<u8> {
    const TILE: usize = 8;
    let mut payload = vec![0u8; CHUNK_PAYLOAD_LEN];

    for tile_row in (0..CHUNK_DIM).step_by(TILE) {
        for tile_col in (0..CHUNK_DIM).step_by(TILE) {
            for row in tile_row..tile_row + TILE {
                for col in tile_col..tile_col + TILE {
                    let src = (col * CHUNK_DIM + row) * 4;
                    let dst = (row * CHUNK_DIM + col) * 4;
                    payload[dst..dst + 4].copy_from_slice(&columns[src..src + 4]);
                }
            }
        }
    }

    payload
}
