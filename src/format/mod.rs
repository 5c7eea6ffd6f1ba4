//! Tile encodings.
//!
//! Each output format is a [`TileFormatExtension`]: it knows which CRS its
//! features must be queried in, creates a streaming [`FeatureWriter`] for
//! one layer, and, when the format allows it, merges single-layer payloads
//! into a multi-layer tile. The [`FormatRegistry`] maps a [`TileFormat`] to
//! its extension and is built explicitly at startup.
//!
//! | Format | `f=` | Extension | Multi-layer |
//! |--------|------|-----------|-------------|
//! | Mapbox Vector Tile | `mvt` | `pbf` | yes |
//! | GeoJSON | `json` | `json` | no |

mod clip;
mod json;
mod mvt;
pub mod vector_tile;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::crs::{BoundingBox, EpsgCrs};
use crate::error::{EncodeError, TileError};
use crate::feature::Feature;
use crate::tms::TileMatrixSet;

pub use json::GeoJsonFormat;
pub use mvt::{MvtFormat, DEFAULT_BUFFER, DEFAULT_EXTENT};

/// Output format of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TileFormat {
    #[serde(rename = "mvt")]
    Mvt,
    #[serde(rename = "json")]
    GeoJson,
}

impl TileFormat {
    pub const ALL: [TileFormat; 2] = [TileFormat::Mvt, TileFormat::GeoJson];

    /// Identifier used in the `f` query parameter and the configuration.
    pub fn id(&self) -> &'static str {
        match self {
            TileFormat::Mvt => "mvt",
            TileFormat::GeoJson => "json",
        }
    }

    /// File extension in the tile cache.
    pub fn extension(&self) -> &'static str {
        match self {
            TileFormat::Mvt => "pbf",
            TileFormat::GeoJson => "json",
        }
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            TileFormat::Mvt => "application/vnd.mapbox-vector-tile",
            TileFormat::GeoJson => "application/geo+json",
        }
    }
}

impl fmt::Display for TileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TileFormat {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mvt" | "pbf" => Ok(TileFormat::Mvt),
            "json" | "geojson" => Ok(TileFormat::GeoJson),
            _ => Err(TileError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

/// What a writer needs to know about the layer it encodes.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingContext {
    /// Layer name, the collection id.
    pub layer: String,
    /// Tile footprint in the CRS the features were queried in.
    pub tile_bounds: BoundingBox,
}

/// Consumes the features of one layer and produces the encoded payload.
pub trait FeatureWriter: Send {
    fn write_feature(&mut self, feature: &Feature) -> Result<(), EncodeError>;

    /// Number of features written so far.
    fn feature_count(&self) -> usize;

    /// Encode the layer. Called once; a layer without features yields the
    /// empty document of the format.
    fn finish(self: Box<Self>) -> Result<Bytes, EncodeError>;
}

/// An output format for tiles.
pub trait TileFormatExtension: Send + Sync {
    fn format(&self) -> TileFormat;

    fn can_multi_layer(&self) -> bool;

    /// CRS that features must be queried in for tiles of `tms`.
    fn query_crs(&self, tms: &TileMatrixSet) -> EpsgCrs;

    fn writer(&self, context: EncodingContext) -> Box<dyn FeatureWriter>;

    /// Combine single-layer payloads, in order, into one multi-layer payload.
    fn merge_layers(&self, layers: &[(String, Bytes)]) -> Result<Bytes, EncodeError> {
        let _ = layers;
        Err(EncodeError::MultiLayerUnsupported(self.format().to_string()))
    }

    /// Whether a cached payload is readable. Used to drop corrupt cache entries.
    fn is_valid(&self, payload: &[u8]) -> bool {
        let _ = payload;
        true
    }
}

/// Output formats known to the service.
#[derive(Clone, Default)]
pub struct FormatRegistry {
    formats: BTreeMap<TileFormat, Arc<dyn TileFormatExtension>>,
}

impl FormatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// MVT and GeoJSON.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(Arc::new(MvtFormat::new()))
            .with(Arc::new(GeoJsonFormat::new()))
    }

    pub fn with(mut self, extension: Arc<dyn TileFormatExtension>) -> Self {
        self.formats.insert(extension.format(), extension);
        self
    }

    pub fn get(&self, format: TileFormat) -> Result<Arc<dyn TileFormatExtension>, TileError> {
        self.formats
            .get(&format)
            .cloned()
            .ok_or_else(|| TileError::UnsupportedFormat {
                format: format.to_string(),
            })
    }

    pub fn formats(&self) -> impl Iterator<Item = TileFormat> + '_ {
        self.formats.keys().copied()
    }
}
