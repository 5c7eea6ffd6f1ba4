//! Filesystem tile cache.
//!
//! Each [`Tile`] maps to one file:
//!
//! ```text
//! {root}/{tileMatrixSet}/{level}/{row}/{col}/{collection,collection,...}.{ext}
//! ```
//!
//! Temporary tiles live under `{root}/__tmp__/` with the same layout.
//! Files are written to a temporary file in the target directory and renamed
//! into place, so readers never see a partial tile. Concurrent writers of the
//! same key race and the last rename wins. Nothing expires: deleting a file
//! is how a tile is regenerated.
//!
//! # Memory Layer
//!
//! An optional LRU layer keeps recently used payloads in memory with
//! size-based eviction. A memory hit is only served while the file still
//! exists on disk.

use std::io::Write;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::RwLock;

use super::Tile;
use crate::error::CacheError;

/// Directory for temporary tiles below the cache root.
pub const TEMPORARY_DIR: &str = "__tmp__";

/// Maximum number of entries in the memory layer.
const DEFAULT_MAX_ENTRIES: usize = 10_000;

// =============================================================================
// Memory Layer
// =============================================================================

struct MemoryLayer {
    entries: RwLock<LruCache<Tile, Bytes>>,
    max_size: usize,
    current_size: RwLock<usize>,
}

impl MemoryLayer {
    fn new(max_size: usize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(
                NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            )),
            max_size,
            current_size: RwLock::new(0),
        }
    }

    async fn get(&self, tile: &Tile) -> Option<Bytes> {
        self.entries.write().await.get(tile).cloned()
    }

    async fn put(&self, tile: Tile, data: Bytes) {
        if data.len() > self.max_size {
            return;
        }
        let data_size = data.len();
        let mut entries = self.entries.write().await;
        let mut current_size = self.current_size.write().await;

        if let Some(old) = entries.pop(&tile) {
            *current_size = current_size.saturating_sub(old.len());
        }
        // entry count limit reached
        if let Some((_, evicted)) = entries.push(tile, data) {
            *current_size = current_size.saturating_sub(evicted.len());
        }
        *current_size += data_size;

        while *current_size > self.max_size {
            match entries.pop_lru() {
                Some((_, evicted)) => *current_size = current_size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }

    async fn remove(&self, tile: &Tile) {
        let mut entries = self.entries.write().await;
        let mut current_size = self.current_size.write().await;
        if let Some(data) = entries.pop(tile) {
            *current_size = current_size.saturating_sub(data.len());
        }
    }

    async fn size(&self) -> usize {
        *self.current_size.read().await
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Filesystem-backed tile store.
pub struct TileCache {
    root: PathBuf,
    memory: Option<MemoryLayer>,
}

impl TileCache {
    /// A cache rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory: None,
        }
    }

    /// Keep up to `max_size` bytes of recently used tiles in memory. `0` disables the layer.
    pub fn with_memory_capacity(mut self, max_size: usize) -> Self {
        self.memory = (max_size > 0).then(|| MemoryLayer::new(max_size));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Storage location of a tile. Depends only on the tile's fields.
    pub fn path(&self, tile: &Tile) -> PathBuf {
        let mut path = self.root.clone();
        if tile.is_temporary() {
            path.push(TEMPORARY_DIR);
        }
        path.push(tile.tile_matrix_set());
        path.push(tile.level().to_string());
        path.push(tile.row().to_string());
        path.push(tile.col().to_string());
        path.push(format!(
            "{}.{}",
            tile.collections().join(","),
            tile.format().extension()
        ));
        path
    }

    pub async fn exists(&self, tile: &Tile) -> Result<bool, CacheError> {
        let path = self.path(tile);
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| CacheError::io(&path, e))
    }

    /// Read a cached tile. `None` if it was never stored or has been deleted.
    pub async fn get(&self, tile: &Tile) -> Result<Option<Bytes>, CacheError> {
        if let Some(memory) = &self.memory {
            if let Some(data) = memory.get(tile).await {
                if self.exists(tile).await? {
                    return Ok(Some(data));
                }
                memory.remove(tile).await;
                return Ok(None);
            }
        }

        let path = self.path(tile);
        match tokio::fs::read(&path).await {
            Ok(data) => {
                let data = Bytes::from(data);
                if let Some(memory) = &self.memory {
                    memory.put(tile.clone(), data.clone()).await;
                }
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Store a tile, replacing any previous payload.
    pub async fn put(&self, tile: &Tile, data: Bytes) -> Result<(), CacheError> {
        let path = self.path(tile);
        let dir = match path.parent() {
            Some(dir) => dir.to_path_buf(),
            None => self.root.clone(),
        };
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| CacheError::io(&dir, e))?;

        let target = path.clone();
        let payload = data.clone();
        tokio::task::spawn_blocking(move || -> Result<(), CacheError> {
            let mut file =
                tempfile::NamedTempFile::new_in(&dir).map_err(|e| CacheError::io(&dir, e))?;
            file.write_all(&payload)
                .map_err(|e| CacheError::io(file.path(), e))?;
            file.persist(&target)
                .map_err(|e| CacheError::io(&target, e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })??;

        if let Some(memory) = &self.memory {
            memory.put(tile.clone(), data).await;
        }
        Ok(())
    }

    /// Delete a tile. Returns whether a file was removed.
    pub async fn remove(&self, tile: &Tile) -> Result<bool, CacheError> {
        if let Some(memory) = &self.memory {
            memory.remove(tile).await;
        }
        let path = self.path(tile);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Bytes held by the memory layer.
    pub async fn memory_size(&self) -> usize {
        match &self.memory {
            Some(memory) => memory.size().await,
            None => 0,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
