use thiserror::Error;

/// Errors raised by coordinate reference system transformations
#[derive(Debug, Clone, Error)]
pub enum CrsError {
    /// The CRS is not known to the transformation service
    #[error("Unsupported CRS: {0}")]
    UnsupportedCrs(String),

    /// No transformation path exists between the two reference systems
    #[error("No transformation from {from} to {to}: {reason}")]
    NoTransformation {
        from: String,
        to: String,
        reason: String,
    },

    /// A coordinate could not be transformed (outside the domain of the projection)
    #[error("Failed to transform ({x}, {y}) from {from} to {to}: {reason}")]
    Numeric {
        x: f64,
        y: f64,
        from: String,
        to: String,
        reason: String,
    },
}

/// Errors raised by a feature source while answering a query
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    /// The feature source has no collection with this id
    #[error("Collection not found in feature source: {0}")]
    UnknownCollection(String),

    /// The backing store failed
    #[error("Feature query for {collection} failed: {message}")]
    Backend { collection: String, message: String },

    /// The query did not finish within the configured timeout
    #[error("Feature query for {collection} timed out after {seconds}s")]
    Timeout { collection: String, seconds: u64 },

    /// Query results could not be transformed into the requested CRS
    #[error("CRS error: {0}")]
    Crs(#[from] CrsError),
}

/// Errors raised while encoding features into a tile payload
#[derive(Debug, Clone, Error)]
pub enum EncodeError {
    /// JSON serialization failed
    #[error("JSON encoding failed: {0}")]
    Json(String),

    /// A binary tile could not be decoded for merging
    #[error("Invalid vector tile payload for layer {layer}: {message}")]
    InvalidVectorTile { layer: String, message: String },

    /// The format does not support combining several collections into one tile
    #[error("Format {0} does not support multi-layer tiles")]
    MultiLayerUnsupported(String),
}

/// Filesystem errors raised by the tile cache
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Reading, writing or removing a cached tile failed
    #[error("Tile cache I/O error at {path}: {message}")]
    Io { path: String, message: String },
}

impl CacheError {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        CacheError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while loading or validating the dataset definition
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// A file could not be read
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    /// A file could not be parsed
    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// The definition is structurally valid but inconsistent
    #[error("Invalid dataset definition: {0}")]
    Invalid(String),
}

/// Errors that can occur while resolving, generating or caching a tile
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// No tile matrix set is registered under this id
    #[error("Tile matrix set not found: {id}")]
    UnknownTileMatrixSet { id: String },

    /// Level, row or column is outside the tile matrix (never clamped)
    #[error("Invalid tile coordinate {tile_matrix_set}/{level}/{row}/{col}: {reason}")]
    InvalidTileCoordinate {
        tile_matrix_set: String,
        level: u8,
        row: u32,
        col: u32,
        reason: String,
    },

    /// No collection with this id, or tiles are disabled for it
    #[error("Collection not found: {collection_id}")]
    CollectionNotFound { collection_id: String },

    /// The zoom level is outside the configured zoom levels
    #[error("Zoom level {level} is not enabled for {target} in {tile_matrix_set}")]
    ZoomLevelNotEnabled {
        target: String,
        tile_matrix_set: String,
        level: u8,
    },

    /// The requested format is unknown or not enabled here
    #[error("Unsupported tile format: {format}")]
    UnsupportedFormat { format: String },

    /// A tile was constructed without any collection
    #[error("A tile must contain at least one collection")]
    NoCollections,

    /// A query parameter is invalid
    #[error("Invalid parameter {name}: {message}")]
    InvalidParameter { name: String, message: String },

    /// CRS transformation failed for this tile
    #[error("CRS error: {0}")]
    Crs(#[from] CrsError),

    /// The feature source failed for this tile
    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    /// Encoding the tile payload failed
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The tile cache is unreachable
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Every layer of a multi-layer tile failed
    #[error("All layers failed: {}", failed.join(", "))]
    AllLayersFailed { failed: Vec<String> },
}

impl TileError {
    /// Whether the error should abort a seeding run instead of skipping one tile.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TileError::Cache(_))
    }

    /// Whether the same tile may succeed when generated again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TileError::Query(QueryError::Timeout { .. }))
    }
}
