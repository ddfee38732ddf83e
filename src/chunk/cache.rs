//! Keyed chunk cache: concurrent in-memory layer plus optional persistent store.
//!
//! The cache sits beside the invoker as a read-through/write-through layer. Keys are always
//! the full `(seed, coordinate, version)` tuple; a version change never reuses a stale
//! entry. Reads are safe for concurrent access; concurrent misses on the same key race
//! harmlessly to the same deterministic result, so no per-key writer lock is taken.
//!
//! # Persistent format
//!
//! One blob file per key under the store directory:
//!
//! ```text
//! "TGC1" | image fingerprint (20 bytes) | world_seed u32 | wire-encoded chunk
//! ```
//!
//! Everything read back is re-validated with the bounds-checked parser; a wrong magic, a
//! foreign fingerprint (the generator binary changed), or a key echo mismatch makes the
//! entry a miss, to be overwritten by the next write-through.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;

use crate::{
    chunk::{ChunkSeed, TerrainChunk},
    file::parser::Parser,
    Result,
};

/// Magic marker of persistent chunk blobs.
const STORE_MAGIC: &[u8; 4] = b"TGC1";

/// Keyed store of previously generated chunks.
///
/// # Examples
///
/// ```rust,no_run
/// use terrabridge::chunk::{ChunkCache, ChunkSeed};
///
/// let cache = ChunkCache::with_store("./chunk-cache".as_ref(), [0u8; 20])?;
/// let key = ChunkSeed { world_seed: 42, x: 3, y: 7, version: 1 };
/// assert!(cache.get(&key).is_none());
/// # Ok::<(), terrabridge::Error>(())
/// ```
pub struct ChunkCache {
    mem: DashMap<ChunkSeed, Arc<TerrainChunk>>,
    store_dir: Option<PathBuf>,
    fingerprint: [u8; 20],
}

impl ChunkCache {
    /// Creates a purely in-memory cache.
    #[must_use]
    pub fn in_memory(fingerprint: [u8; 20]) -> Self {
        ChunkCache {
            mem: DashMap::new(),
            store_dir: None,
            fingerprint,
        }
    }

    /// Creates a cache backed by a persistent blob directory.
    ///
    /// # Arguments
    /// * `dir`         - Store directory; created if missing
    /// * `fingerprint` - Fingerprint of the loaded image, embedded in every blob
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the directory cannot be created.
    pub fn with_store(dir: &Path, fingerprint: [u8; 20]) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        Ok(ChunkCache {
            mem: DashMap::new(),
            store_dir: Some(dir.to_path_buf()),
            fingerprint,
        })
    }

    /// Looks the key up: memory first, then the persistent store.
    ///
    /// A store hit is promoted into memory. An invalid or stale store entry is a miss.
    #[must_use]
    pub fn get(&self, seed: &ChunkSeed) -> Option<Arc<TerrainChunk>> {
        if let Some(entry) = self.mem.get(seed) {
            return Some(entry.value().clone());
        }

        let chunk = self.read_store(seed)?;
        let chunk = Arc::new(chunk);
        self.mem.insert(*seed, chunk.clone());
        Some(chunk)
    }

    /// Writes the chunk through to memory and the persistent store.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the store write fails; the in-memory entry is
    /// installed regardless, so the request that produced the chunk still succeeds.
    pub fn put(&self, chunk: TerrainChunk) -> Result<Arc<TerrainChunk>> {
        let seed = *chunk.seed();
        let chunk = Arc::new(chunk);
        self.mem.insert(seed, chunk.clone());

        if let Some(dir) = &self.store_dir {
            let mut blob =
                Vec::with_capacity(STORE_MAGIC.len() + self.fingerprint.len() + 4);
            blob.extend_from_slice(STORE_MAGIC);
            blob.extend_from_slice(&self.fingerprint);
            blob.extend_from_slice(&seed.world_seed.to_le_bytes());
            blob.extend_from_slice(&chunk.encode());

            std::fs::write(dir.join(Self::file_name(&seed)), blob)?;
        }

        Ok(chunk)
    }

    /// Drops the key from memory and the persistent store.
    pub fn invalidate(&self, seed: &ChunkSeed) {
        self.mem.remove(seed);

        if let Some(dir) = &self.store_dir {
            let _ = std::fs::remove_file(dir.join(Self::file_name(seed)));
        }
    }

    /// Number of chunks held in memory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mem.len()
    }

    /// Returns `true` if no chunks are held in memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mem.is_empty()
    }

    /// Blob file name for a key; the full tuple is spelled out for operability.
    fn file_name(seed: &ChunkSeed) -> String {
        format!(
            "s{}_x{}_y{}_v{}.tgc",
            seed.world_seed, seed.x, seed.y, seed.version
        )
    }

    /// Reads and validates a store blob; any inconsistency is a miss.
    fn read_store(&self, seed: &ChunkSeed) -> Option<TerrainChunk> {
        let dir = self.store_dir.as_ref()?;
        let bytes = std::fs::read(dir.join(Self::file_name(seed))).ok()?;

        let mut parser = Parser::new(&bytes);
        let magic = parser.read_bytes(4).ok()?;
        if magic != STORE_MAGIC {
            return None;
        }

        let fingerprint = parser.read_bytes(20).ok()?;
        if fingerprint != self.fingerprint {
            // The generator binary changed; everything it wrote is stale
            return None;
        }

        let world_seed = parser.read_le::<u32>().ok()?;
        if world_seed != seed.world_seed {
            return None;
        }

        let encoded = parser.read_bytes(parser.len() - parser.pos()).ok()?;
        TerrainChunk::decode(*seed, encoded).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::CHUNK_PAYLOAD_LEN;

    fn seed() -> ChunkSeed {
        ChunkSeed {
            world_seed: 42,
            x: 3,
            y: -7,
            version: 1,
        }
    }

    fn chunk_with(seed: ChunkSeed, fill: u8) -> TerrainChunk {
        TerrainChunk::new(seed, vec![fill; CHUNK_PAYLOAD_LEN]).unwrap()
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn memory_roundtrip() {
        let cache = ChunkCache::in_memory([0u8; 20]);
        assert!(cache.get(&seed()).is_none());

        cache.put(chunk_with(seed(), 0xAA)).unwrap();
        let hit = cache.get(&seed()).unwrap();
        assert_eq!(hit.payload()[0], 0xAA);
    }

    #[test]
    fn version_change_is_a_different_key() {
        let cache = ChunkCache::in_memory([0u8; 20]);
        cache.put(chunk_with(seed(), 0xAA)).unwrap();

        let mut v2 = seed();
        v2.version = 2;
        assert!(cache.get(&v2).is_none());

        cache.put(chunk_with(v2, 0xBB)).unwrap();
        assert_eq!(cache.get(&seed()).unwrap().payload()[0], 0xAA);
        assert_eq!(cache.get(&v2).unwrap().payload()[0], 0xBB);
    }

    #[test]
    fn store_survives_memory_loss() {
        let dir = temp_dir("terrabridge_cache_survive");
        let fingerprint = [7u8; 20];

        {
            let cache = ChunkCache::with_store(&dir, fingerprint).unwrap();
            cache.put(chunk_with(seed(), 0xCC)).unwrap();
        }

        // Fresh cache instance with an empty memory layer
        let cache = ChunkCache::with_store(&dir, fingerprint).unwrap();
        let hit = cache.get(&seed()).unwrap();
        assert_eq!(hit.payload()[0], 0xCC);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stale_fingerprint_is_a_miss() {
        let dir = temp_dir("terrabridge_cache_stale");

        {
            let cache = ChunkCache::with_store(&dir, [1u8; 20]).unwrap();
            cache.put(chunk_with(seed(), 0xDD)).unwrap();
        }

        let cache = ChunkCache::with_store(&dir, [2u8; 20]).unwrap();
        assert!(cache.get(&seed()).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupted_blob_is_a_miss() {
        let dir = temp_dir("terrabridge_cache_corrupt");
        let fingerprint = [3u8; 20];

        {
            let cache = ChunkCache::with_store(&dir, fingerprint).unwrap();
            cache.put(chunk_with(seed(), 0xEE)).unwrap();
        }

        let path = dir.join(ChunkCache::file_name(&seed()));
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, bytes).unwrap();

        let cache = ChunkCache::with_store(&dir, fingerprint).unwrap();
        assert!(cache.get(&seed()).is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn invalidate_removes_both_layers() {
        let dir = temp_dir("terrabridge_cache_invalidate");
        let fingerprint = [4u8; 20];

        let cache = ChunkCache::with_store(&dir, fingerprint).unwrap();
        cache.put(chunk_with(seed(), 0xFF)).unwrap();
        assert!(cache.get(&seed()).is_some());

        cache.invalidate(&seed());
        assert!(cache.get(&seed()).is_none());
        assert!(!dir.join(ChunkCache::file_name(&seed())).exists());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
