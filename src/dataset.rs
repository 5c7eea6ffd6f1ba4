//! Dataset definition.
//!
//! A dataset is a list of feature collections plus the tile settings of the
//! dataset and of each collection. It is read from a JSON file:
//!
//! ```json
//! {
//!   "id": "europe",
//!   "label": "Europe",
//!   "tiles": {
//!     "multiCollection": true,
//!     "formats": ["mvt"],
//!     "seeding": { "WebMercatorQuad": { "min": 0, "max": 6 } }
//!   },
//!   "collections": [
//!     {
//!       "id": "cities",
//!       "source": "cities.geojson",
//!       "tiles": {
//!         "zoomLevels": { "WebMercatorQuad": { "min": 0, "max": 14 } },
//!         "seeding": { "WebMercatorQuad": { "min": 0, "max": 8 } },
//!         "filterable": ["kind"]
//!       }
//!     }
//!   ]
//! }
//! ```
//!
//! Sources are GeoJSON files in CRS84, resolved relative to the definition.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::crs::{BoundingBox, CrsTransformerFactory, CRS84};
use crate::error::{ConfigError, TileError};
use crate::feature::{read_geojson, MemoryFeatureSource};
use crate::format::{FormatRegistry, TileFormat};
use crate::tms::{MinMax, TileMatrixSet, TileMatrixSets};

fn default_true() -> bool {
    true
}

fn default_formats() -> Vec<TileFormat> {
    TileFormat::ALL.to_vec()
}

/// Dataset-wide tile settings. These govern the multi-layer tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetTiles {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Serve `/tiles/...` with one layer per collection.
    #[serde(default)]
    pub multi_collection: bool,
    #[serde(default = "default_formats")]
    pub formats: Vec<TileFormat>,
    /// Multi-layer seeding range per tile matrix set.
    #[serde(default)]
    pub seeding: BTreeMap<String, MinMax>,
}

impl Default for DatasetTiles {
    fn default() -> Self {
        Self {
            enabled: true,
            multi_collection: false,
            formats: default_formats(),
            seeding: BTreeMap::new(),
        }
    }
}

/// Tile settings of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionTiles {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Take part in multi-layer tiles.
    #[serde(default = "default_true")]
    pub multi_collection: bool,
    #[serde(default = "default_formats")]
    pub formats: Vec<TileFormat>,
    /// Levels served per tile matrix set. A missing entry means all levels.
    #[serde(default)]
    pub zoom_levels: BTreeMap<String, MinMax>,
    /// Single-layer seeding range per tile matrix set.
    #[serde(default)]
    pub seeding: BTreeMap<String, MinMax>,
    /// Properties usable as `key=value` filters.
    #[serde(default)]
    pub filterable: Vec<String>,
}

impl Default for CollectionTiles {
    fn default() -> Self {
        Self {
            enabled: true,
            multi_collection: true,
            formats: default_formats(),
            zoom_levels: BTreeMap::new(),
            seeding: BTreeMap::new(),
            filterable: Vec::new(),
        }
    }
}

/// A feature collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    /// GeoJSON file with the features.
    pub source: PathBuf,
    /// `[xmin, ymin, xmax, ymax]` in CRS84. Computed from the data when absent.
    #[serde(default)]
    pub extent: Option<[f64; 4]>,
    #[serde(default)]
    pub tiles: CollectionTiles,
}

impl Collection {
    pub fn new(id: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            label: None,
            source: source.into(),
            extent: None,
            tiles: CollectionTiles::default(),
        }
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn extent(&self) -> Option<BoundingBox> {
        self.extent.map(|coords| BoundingBox::from_array(coords, CRS84))
    }

    pub fn supports(&self, format: TileFormat) -> bool {
        self.tiles.formats.contains(&format)
    }

    /// Levels this collection is served at in `tms`.
    pub fn zoom_levels(&self, tms: &TileMatrixSet) -> Option<MinMax> {
        match self.tiles.zoom_levels.get(tms.id()) {
            Some(range) => range.intersect(&tms.levels()),
            None => Some(tms.levels()),
        }
    }

    /// Single-layer seeding range, clipped to the zoom levels.
    pub fn seeding(&self, tms: &TileMatrixSet) -> Option<MinMax> {
        let seeding = self.tiles.seeding.get(tms.id())?;
        seeding.intersect(&self.zoom_levels(tms)?)
    }

    pub fn is_filterable(&self, property: &str) -> bool {
        self.tiles.filterable.iter().any(|p| p == property)
    }
}

/// The service definition: collections and their tile settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub tiles: DatasetTiles,
    #[serde(default)]
    pub collections: Vec<Collection>,
}

impl Dataset {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
            tiles: DatasetTiles::default(),
            collections: Vec::new(),
        }
    }

    pub fn with_collection(mut self, collection: Collection) -> Self {
        self.collections.push(collection);
        self
    }

    pub fn from_json(text: &str, path: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Read a definition and the features of all its collections.
    ///
    /// Missing collection extents are computed from the loaded features.
    pub fn load(
        path: &Path,
        crs: Arc<dyn CrsTransformerFactory>,
    ) -> Result<(Self, MemoryFeatureSource), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let mut dataset = Self::from_json(&text, path)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let mut source = MemoryFeatureSource::new(crs);
        for collection in &mut dataset.collections {
            let file = base.join(&collection.source);
            let features = read_geojson(&file)?;
            info!(
                collection = %collection.id,
                features = features.len(),
                source = %file.display(),
                "Loaded collection"
            );
            source.insert(collection.id.clone(), features);
            if collection.extent.is_none() {
                collection.extent = source.extent(&collection.id).map(|bbox| bbox.to_array());
            }
        }
        Ok((dataset, source))
    }

    /// Check the definition against the known tile matrix sets and formats.
    pub fn validate(
        &self,
        tile_matrix_sets: &TileMatrixSets,
        formats: &FormatRegistry,
    ) -> Result<(), ConfigError> {
        let check_ranges = |owner: &str, ranges: &BTreeMap<String, MinMax>| {
            for (tms, range) in ranges {
                if !tile_matrix_sets.contains(tms) {
                    return Err(ConfigError::Invalid(format!(
                        "{owner}: unknown tile matrix set '{tms}'"
                    )));
                }
                if range.min > range.max {
                    return Err(ConfigError::Invalid(format!(
                        "{owner}: zoom range {}..{} for {tms} has min > max",
                        range.min, range.max
                    )));
                }
            }
            Ok(())
        };
        let check_formats = |owner: &str, list: &[TileFormat]| {
            match list.iter().find(|f| formats.get(**f).is_err()) {
                Some(format) => Err(ConfigError::Invalid(format!(
                    "{owner}: format '{format}' is not available"
                ))),
                None => Ok(()),
            }
        };

        check_ranges("dataset", &self.tiles.seeding)?;
        check_formats("dataset", &self.tiles.formats)?;

        let mut seen = std::collections::HashSet::new();
        for collection in &self.collections {
            let id = &collection.id;
            if id.is_empty()
                || !id
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
                || id.starts_with('.')
            {
                return Err(ConfigError::Invalid(format!(
                    "collection id '{id}' must match [A-Za-z0-9_.-]+"
                )));
            }
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate collection id '{id}'")));
            }
            if let Some(extent) = collection.extent() {
                if !extent.is_valid() {
                    return Err(ConfigError::Invalid(format!(
                        "collection '{id}': invalid extent {extent}"
                    )));
                }
            }
            check_ranges(id, &collection.tiles.zoom_levels)?;
            check_ranges(id, &collection.tiles.seeding)?;
            check_formats(id, &collection.tiles.formats)?;
        }
        Ok(())
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    /// A collection with tiles enabled.
    pub fn collection(&self, id: &str) -> Result<&Collection, TileError> {
        self.collections
            .iter()
            .find(|c| c.id == id && c.tiles.enabled)
            .ok_or_else(|| TileError::CollectionNotFound {
                collection_id: id.to_string(),
            })
    }

    /// Collections with tiles enabled, in definition order.
    pub fn tiled_collections(&self) -> impl Iterator<Item = &Collection> {
        self.collections.iter().filter(|c| c.tiles.enabled)
    }

    pub fn is_multi_layer_enabled(&self) -> bool {
        self.tiles.enabled && self.tiles.multi_collection
    }

    /// Collections that contribute a layer to multi-layer tiles at `level`.
    pub fn multi_layer_collections(
        &self,
        tms: &TileMatrixSet,
        level: u8,
        format: TileFormat,
    ) -> Vec<String> {
        self.tiled_collections()
            .filter(|c| c.tiles.multi_collection && c.supports(format))
            .filter(|c| c.zoom_levels(tms).is_some_and(|z| z.contains(level)))
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn multi_layer_seeding(&self, tms: &TileMatrixSet) -> Option<MinMax> {
        if !self.is_multi_layer_enabled() {
            return None;
        }
        self.tiles.seeding.get(tms.id())?.intersect(&tms.levels())
    }

    /// Union of the extents of the given collections.
    pub fn extent_of<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Option<BoundingBox> {
        ids.into_iter()
            .filter_map(|id| self.collections.iter().find(|c| c.id == id))
            .filter_map(Collection::extent)
            .reduce(|a, b| a.union(&b))
    }

    /// Whether any seeding range is configured.
    pub fn has_seeding(&self) -> bool {
        (self.is_multi_layer_enabled() && !self.tiles.seeding.is_empty())
            || self
                .tiled_collections()
                .any(|c| !c.tiles.seeding.is_empty())
    }
}
