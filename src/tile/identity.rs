use std::fmt;
use std::sync::Arc;

use crate::error::TileError;
use crate::format::TileFormat;
use crate::tms::TileMatrixSet;

/// Identity of a tile, used as the cache key.
///
/// One collection makes a single-layer tile, several make a multi-layer tile
/// with one layer per collection in the given order. Equality and hashing
/// are structural over all fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tile {
    tile_matrix_set: Arc<str>,
    level: u8,
    row: u32,
    col: u32,
    collections: Vec<String>,
    format: TileFormat,
    temporary: bool,
}

impl Tile {
    /// Create a tile after checking the coordinates against `tms`.
    pub fn new(
        tms: &TileMatrixSet,
        level: u8,
        row: u32,
        col: u32,
        collections: Vec<String>,
        format: TileFormat,
    ) -> Result<Self, TileError> {
        if collections.is_empty() {
            return Err(TileError::NoCollections);
        }
        tms.validate(level, row, col)?;
        Ok(Self {
            tile_matrix_set: Arc::from(tms.id()),
            level,
            row,
            col,
            collections,
            format,
            temporary: false,
        })
    }

    /// Mark the tile as temporary: generated for one request with a property
    /// projection or filter, never stored in the persistent cache.
    pub fn with_temporary(mut self, temporary: bool) -> Self {
        self.temporary = temporary;
        self
    }

    pub fn tile_matrix_set(&self) -> &str {
        &self.tile_matrix_set
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn row(&self) -> u32 {
        self.row
    }

    pub fn col(&self) -> u32 {
        self.col
    }

    pub fn collections(&self) -> &[String] {
        &self.collections
    }

    pub fn format(&self) -> TileFormat {
        self.format
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn is_multi_layer(&self) -> bool {
        self.collections.len() > 1
    }

    /// The single-layer tile of one collection at the same position.
    pub fn single_layer(&self, collection: &str) -> Tile {
        Tile {
            collections: vec![collection.to_string()],
            ..self.clone()
        }
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{} [{}] {}",
            self.tile_matrix_set,
            self.level,
            self.row,
            self.col,
            self.collections.join(","),
            self.format
        )
    }
}
