//! Tile Service for resolving, generating and caching tiles.
//!
//! The TileService is the entry point for both the HTTP read path and
//! seeding. It orchestrates:
//! - Request resolution against the dataset (collections, zoom levels, formats, filters)
//! - Cache lookups, dropping unreadable payloads
//! - Single-flight generation of missing tiles
//! - Result caching
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         TileService                             │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    get_tile()                           │    │
//! │  │  1. Resolve request   4. Generate layers (single-flight)│    │
//! │  │  2. Temporary? ──────────► generate, never cache        │    │
//! │  │  3. Check cache       5. Merge layers & cache           │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │    ┌───────────┐      ┌──────────────┐    ┌──────────────────┐  │
//! │    │ TileCache │      │   Dataset    │    │  TileGenerator   │  │
//! │    └───────────┘      └──────────────┘    └──────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A multi-layer tile is built from the single-layer tiles of its
//! collections. Each of those is read from the cache or generated and
//! cached on the way, so a multi-layer tile also fills the cache for its
//! layers. A multi-layer tile with failed layers is returned but not cached.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::TileError;
use crate::format::{FormatRegistry, TileFormat};
use crate::tms::{GridWalker, MinMax, TileMatrixSet, TileMatrixSetLimits, TileMatrixSets};

use super::cache::TileCache;
use super::generator::{QueryOptions, TileGenerator};
use super::Tile;

// =============================================================================
// Tile Request
// =============================================================================

/// A request for a tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRequest {
    /// Tile matrix set identifier (e.g., "WebMercatorQuad")
    pub tile_matrix_set: String,

    /// Zoom level
    pub level: u8,

    /// Row, 0 at the top
    pub row: u32,

    /// Column, 0 at the left
    pub col: u32,

    /// The collection of a single-layer tile; `None` for a dataset tile
    pub collection: Option<String>,

    /// Subset of the collections of a dataset tile
    pub collections: Option<Vec<String>>,

    /// Output format
    pub format: TileFormat,

    /// Property projection and attribute filter
    pub options: QueryOptions,
}

impl TileRequest {
    /// A single-layer tile of one collection.
    pub fn collection(
        collection: impl Into<String>,
        tile_matrix_set: impl Into<String>,
        level: u8,
        row: u32,
        col: u32,
    ) -> Self {
        Self {
            tile_matrix_set: tile_matrix_set.into(),
            level,
            row,
            col,
            collection: Some(collection.into()),
            collections: None,
            format: TileFormat::Mvt,
            options: QueryOptions::default(),
        }
    }

    /// A dataset tile with one layer per participating collection.
    pub fn dataset(tile_matrix_set: impl Into<String>, level: u8, row: u32, col: u32) -> Self {
        Self {
            tile_matrix_set: tile_matrix_set.into(),
            level,
            row,
            col,
            collection: None,
            collections: None,
            format: TileFormat::Mvt,
            options: QueryOptions::default(),
        }
    }

    pub fn with_format(mut self, format: TileFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_collections(mut self, collections: Vec<String>) -> Self {
        self.collections = Some(collections);
        self
    }

    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

// =============================================================================
// Tile Response
// =============================================================================

/// Response from the tile service.
#[derive(Debug, Clone)]
pub struct TileResponse {
    /// The encoded tile
    pub data: Bytes,

    /// Whether this tile was served from cache
    pub cache_hit: bool,

    /// Format of `data`
    pub format: TileFormat,

    /// Collections left out of a multi-layer tile because they failed
    pub failed_layers: Vec<String>,
}

/// What happened to a tile handed to [`TileService::seed_tile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    /// Already in the cache
    Skipped,
    /// Generated and cached
    Generated,
    /// Multi-layer tile with failed layers; not cached
    Partial { failed: Vec<String> },
}

/// A tileset of a collection in one tile matrix set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSetSummary {
    pub tile_matrix_set: String,
    pub formats: Vec<TileFormat>,
    pub zoom_levels: MinMax,
    pub tile_matrix_set_limits: Vec<TileMatrixSetLimits>,
}

#[derive(Debug, Clone)]
struct Generated {
    data: Bytes,
    failed_layers: Vec<String>,
}

type InFlight = Arc<OnceCell<Result<Generated, TileError>>>;

/// Removes the in-flight entry of a tile when its caller finishes or is
/// dropped, so a later request never sees a finished cell.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashMap<Tile, InFlight>>,
    tile: &'a Tile,
    cell: InFlight,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(self.tile)
            .is_some_and(|c| Arc::ptr_eq(c, &self.cell))
        {
            in_flight.remove(self.tile);
        }
    }
}

// =============================================================================
// Tile Service
// =============================================================================

/// Service for resolving, generating and caching tiles.
///
/// Concurrent requests for the same non-temporary tile share one
/// generation. Temporary tiles are generated per request.
///
/// # Example
///
/// ```ignore
/// use ogcapi_tiles::tile::{TileRequest, TileService};
///
/// let service = TileService::new(dataset, tile_matrix_sets, generator, cache);
///
/// let request = TileRequest::collection("cities", "WebMercatorQuad", 5, 10, 16);
/// let response = service.get_tile(request).await?;
///
/// println!("Tile size: {} bytes, cache hit: {}", response.data.len(), response.cache_hit);
/// ```
pub struct TileService {
    dataset: Arc<Dataset>,
    tile_matrix_sets: Arc<TileMatrixSets>,
    generator: TileGenerator,
    cache: TileCache,
    walker: GridWalker,
    in_flight: Mutex<HashMap<Tile, InFlight>>,
}

impl TileService {
    pub fn new(
        dataset: Arc<Dataset>,
        tile_matrix_sets: Arc<TileMatrixSets>,
        generator: TileGenerator,
        cache: TileCache,
    ) -> Self {
        let walker = GridWalker::new(generator.transformer().clone());
        Self {
            dataset,
            tile_matrix_sets,
            generator,
            cache,
            walker,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn tile_matrix_sets(&self) -> &TileMatrixSets {
        &self.tile_matrix_sets
    }

    pub fn formats(&self) -> &FormatRegistry {
        self.generator.formats()
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn walker(&self) -> &GridWalker {
        &self.walker
    }

    /// Get a tile, using the cache when available.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The tile matrix set, collection or zoom level is unknown
    /// - The coordinates are outside the tile matrix
    /// - The format or a filter is not enabled for the collection
    /// - Generation fails, or every layer of a multi-layer tile fails
    /// - The cache cannot be read or written
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        let (tms, tile) = self.resolve(&request)?;

        if tile.is_temporary() {
            let generated = self.generate(&tms, &tile, &request.options).await?;
            return Ok(TileResponse {
                data: generated.data,
                cache_hit: false,
                format: tile.format(),
                failed_layers: generated.failed_layers,
            });
        }

        if let Some(data) = self.cached(&tile).await? {
            return Ok(TileResponse {
                data,
                cache_hit: true,
                format: tile.format(),
                failed_layers: Vec::new(),
            });
        }

        let generated = self.generate_shared(&tms, &tile).await?;
        Ok(TileResponse {
            data: generated.data,
            cache_hit: false,
            format: tile.format(),
            failed_layers: generated.failed_layers,
        })
    }

    /// Generate and cache a tile unless it is already cached.
    pub async fn seed_tile(&self, tms: &TileMatrixSet, tile: &Tile) -> Result<SeedOutcome, TileError> {
        if self.cache.exists(tile).await? {
            return Ok(SeedOutcome::Skipped);
        }
        let generated = self.generate_shared(tms, tile).await?;
        if generated.failed_layers.is_empty() {
            Ok(SeedOutcome::Generated)
        } else {
            Ok(SeedOutcome::Partial {
                failed: generated.failed_layers,
            })
        }
    }

    /// Map a request to its tile matrix set and tile identity.
    pub fn resolve(&self, request: &TileRequest) -> Result<(Arc<TileMatrixSet>, Tile), TileError> {
        let tms = self.tile_matrix_sets.get(&request.tile_matrix_set)?;
        let (level, row, col) = (request.level, request.row, request.col);
        tms.validate(level, row, col)?;

        let collections = match &request.collection {
            Some(id) => vec![self.resolve_collection(&tms, id, request)?],
            None => self.resolve_dataset_layers(&tms, request)?,
        };

        if collections.len() > 1 && !self.generator.formats().get(request.format)?.can_multi_layer() {
            return Err(TileError::UnsupportedFormat {
                format: request.format.to_string(),
            });
        }

        let tile = Tile::new(&tms, level, row, col, collections, request.format)?
            .with_temporary(request.options.is_temporary());
        Ok((tms, tile))
    }

    fn resolve_collection(
        &self,
        tms: &TileMatrixSet,
        id: &str,
        request: &TileRequest,
    ) -> Result<String, TileError> {
        let collection = self.dataset.collection(id)?;
        if !collection.supports(request.format) {
            return Err(TileError::UnsupportedFormat {
                format: request.format.to_string(),
            });
        }
        if !collection
            .zoom_levels(tms)
            .is_some_and(|z| z.contains(request.level))
        {
            return Err(TileError::ZoomLevelNotEnabled {
                target: id.to_string(),
                tile_matrix_set: tms.id().to_string(),
                level: request.level,
            });
        }
        if let Some(key) = request
            .options
            .filter
            .keys()
            .find(|key| !collection.is_filterable(key))
        {
            return Err(TileError::InvalidParameter {
                name: key.clone(),
                message: format!("'{key}' is not a filterable property of {id}"),
            });
        }
        Ok(collection.id.clone())
    }

    fn resolve_dataset_layers(
        &self,
        tms: &TileMatrixSet,
        request: &TileRequest,
    ) -> Result<Vec<String>, TileError> {
        let dataset = &self.dataset;
        if !dataset.is_multi_layer_enabled() {
            return Err(TileError::CollectionNotFound {
                collection_id: dataset.id.clone(),
            });
        }
        if !dataset.tiles.formats.contains(&request.format) {
            return Err(TileError::UnsupportedFormat {
                format: request.format.to_string(),
            });
        }

        let candidates = dataset.multi_layer_collections(tms, request.level, request.format);
        let layers = match &request.collections {
            Some(subset) => {
                for id in subset {
                    let collection = dataset.collection(id)?;
                    if !collection.tiles.multi_collection {
                        return Err(TileError::CollectionNotFound {
                            collection_id: id.clone(),
                        });
                    }
                }
                // subset keeps dataset order and drops duplicates
                candidates
                    .into_iter()
                    .filter(|id| subset.contains(id))
                    .collect()
            }
            None => candidates,
        };

        if layers.is_empty() {
            return Err(TileError::ZoomLevelNotEnabled {
                target: dataset.id.clone(),
                tile_matrix_set: tms.id().to_string(),
                level: request.level,
            });
        }

        for key in request.options.filter.keys() {
            let filterable = layers
                .iter()
                .filter_map(|id| dataset.collection(id).ok())
                .all(|c| c.is_filterable(key));
            if !filterable {
                return Err(TileError::InvalidParameter {
                    name: key.clone(),
                    message: format!("'{key}' is not filterable in every layer"),
                });
            }
        }
        Ok(layers)
    }

    /// Tilesets of a collection, one per tile matrix set, with the tile
    /// ranges that cover the collection extent.
    pub fn tile_sets(&self, collection_id: &str) -> Result<Vec<TileSetSummary>, TileError> {
        let collection = self.dataset.collection(collection_id)?;
        let mut summaries = Vec::new();
        for tms in self.tile_matrix_sets.iter() {
            let Some(zoom_levels) = collection.zoom_levels(tms) else {
                continue;
            };
            let tile_matrix_set_limits = match collection.extent() {
                Some(extent) => self.walker.limits_for_levels(tms, zoom_levels, &extent)?,
                None => Vec::new(),
            };
            summaries.push(TileSetSummary {
                tile_matrix_set: tms.id().to_string(),
                formats: collection.tiles.formats.clone(),
                zoom_levels,
                tile_matrix_set_limits,
            });
        }
        Ok(summaries)
    }

    /// Read a tile from the cache. Unreadable payloads are removed.
    async fn cached(&self, tile: &Tile) -> Result<Option<Bytes>, TileError> {
        let Some(data) = self.cache.get(tile).await? else {
            return Ok(None);
        };
        if self.generator.formats().get(tile.format())?.is_valid(&data) {
            return Ok(Some(data));
        }
        let path = self.cache.path(tile);
        warn!(tile = %tile, path = %path.display(), "Removing corrupt cached tile");
        self.cache.remove(tile).await?;
        Ok(None)
    }

    /// Generate a tile once for all concurrent callers.
    async fn generate_shared(&self, tms: &TileMatrixSet, tile: &Tile) -> Result<Generated, TileError> {
        let cell = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight
                .entry(tile.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };
        let guard = InFlightGuard {
            in_flight: &self.in_flight,
            tile,
            cell,
        };

        let result = guard
            .cell
            .get_or_init(|| self.generate_and_store(tms, tile))
            .await
            .clone();
        drop(guard);
        result
    }

    async fn generate_and_store(&self, tms: &TileMatrixSet, tile: &Tile) -> Result<Generated, TileError> {
        // a concurrent generation may have finished since the cache lookup
        if let Some(data) = self.cached(tile).await? {
            return Ok(Generated {
                data,
                failed_layers: Vec::new(),
            });
        }

        let generated = self.generate(tms, tile, &QueryOptions::default()).await?;
        if generated.failed_layers.is_empty() {
            self.cache.put(tile, generated.data.clone()).await?;
        } else {
            warn!(
                tile = %tile,
                failed = ?generated.failed_layers,
                "Multi-layer tile incomplete, not cached"
            );
        }
        Ok(generated)
    }

    /// Generate without storing the tile itself. Layers of a non-temporary
    /// multi-layer tile are read from and written to the cache.
    async fn generate(
        &self,
        tms: &TileMatrixSet,
        tile: &Tile,
        options: &QueryOptions,
    ) -> Result<Generated, TileError> {
        if !tile.is_multi_layer() {
            let data = self.generator.generate_single_layer(tms, tile, options).await?;
            return Ok(Generated {
                data,
                failed_layers: Vec::new(),
            });
        }

        let mut layers = Vec::with_capacity(tile.collections().len());
        for collection in tile.collections() {
            let layer = tile.single_layer(collection);
            let result = if layer.is_temporary() {
                self.generator.generate_single_layer(tms, &layer, options).await
            } else {
                self.layer(tms, &layer).await
            };
            match result {
                Err(e) if e.is_fatal() => return Err(e),
                result => layers.push((collection.clone(), result)),
            }
        }

        let outcome = self.generator.generate_multi_layer(tile.format(), layers)?;
        debug!(tile = %tile, failed = outcome.failed.len(), "Generated multi-layer tile");
        Ok(Generated {
            data: outcome.data,
            failed_layers: outcome.failed,
        })
    }

    /// One layer of a multi-layer tile, from the cache or freshly cached.
    async fn layer(&self, tms: &TileMatrixSet, layer: &Tile) -> Result<Bytes, TileError> {
        if let Some(data) = self.cached(layer).await? {
            return Ok(data);
        }
        let data = self
            .generator
            .generate_single_layer(tms, layer, &QueryOptions::default())
            .await?;
        self.cache.put(layer, data.clone()).await?;
        Ok(data)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::ProjTransformerFactory;
    use crate::dataset::Collection;
    use crate::error::QueryError;
    use crate::feature::{Feature, FeatureQuery, FeatureSource, FeatureStream, MemoryFeatureSource};
    use crate::tms::TileCoordinateTransformer;
    use async_trait::async_trait;
    use geo::{point, Geometry};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    /// Never answers its first query.
    struct StallOnce {
        inner: MemoryFeatureSource,
        stalled: AtomicBool,
    }

    #[async_trait]
    impl FeatureSource for StallOnce {
        async fn query(&self, query: &FeatureQuery) -> Result<FeatureStream, QueryError> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            self.inner.query(query).await
        }
    }

    fn dataset() -> Dataset {
        let mut cities = Collection::new("cities", "cities.geojson");
        cities.tiles.filterable = vec!["kind".to_string()];
        cities.tiles.zoom_levels.insert(
            "WebMercatorQuad".to_string(),
            MinMax::new(0, 10),
        );
        cities.extent = Some([2.0, 48.0, 8.0, 51.0]);

        let mut peaks = Collection::new("peaks", "peaks.geojson");
        peaks.tiles.formats = vec![TileFormat::Mvt];

        let mut dataset = Dataset::new("europe")
            .with_collection(cities)
            .with_collection(peaks);
        dataset.tiles.multi_collection = true;
        dataset
    }

    fn service(root: &std::path::Path) -> TileService {
        service_with(root, |memory| Arc::new(memory))
    }

    fn service_with(
        root: &std::path::Path,
        wrap: impl FnOnce(MemoryFeatureSource) -> Arc<dyn FeatureSource>,
    ) -> TileService {
        let crs = Arc::new(ProjTransformerFactory::new());
        let source = MemoryFeatureSource::new(crs.clone())
            .with_collection(
                "cities",
                vec![
                    Feature::new(Geometry::Point(point!(x: 7.1, y: 50.7)))
                        .with_property("kind", "city"),
                    Feature::new(Geometry::Point(point!(x: 2.35, y: 48.85)))
                        .with_property("kind", "capital"),
                ],
            )
            .with_collection(
                "peaks",
                vec![Feature::new(Geometry::Point(point!(x: 6.86, y: 45.83)))],
            );
        let generator = TileGenerator::new(
            wrap(source),
            Arc::new(FormatRegistry::with_defaults()),
            TileCoordinateTransformer::new(crs),
        );
        TileService::new(
            Arc::new(dataset()),
            Arc::new(TileMatrixSets::with_defaults()),
            generator,
            TileCache::new(root),
        )
    }

    #[tokio::test]
    async fn test_cache_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let request = TileRequest::collection("cities", "WebMercatorQuad", 1, 0, 1);
        let first = service.get_tile(request.clone()).await.unwrap();
        assert!(!first.cache_hit);
        assert!(!first.data.is_empty());

        let second = service.get_tile(request).await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn test_multi_layer_fills_single_layers() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let response = service
            .get_tile(TileRequest::dataset("WebMercatorQuad", 5, 11, 16))
            .await
            .unwrap();
        assert!(response.failed_layers.is_empty());

        let tms = TileMatrixSet::web_mercator_quad();
        let multi = Tile::new(
            &tms,
            5,
            11,
            16,
            vec!["cities".into(), "peaks".into()],
            TileFormat::Mvt,
        )
        .unwrap();
        assert!(service.cache.exists(&multi).await.unwrap());
        assert!(service.cache.exists(&multi.single_layer("cities")).await.unwrap());
        assert!(service.cache.exists(&multi.single_layer("peaks")).await.unwrap());
    }

    #[tokio::test]
    async fn test_temporary_tiles_are_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let mut options = QueryOptions::default();
        options.filter.insert("kind".to_string(), "capital".to_string());
        let request = TileRequest::collection("cities", "WebMercatorQuad", 1, 0, 1)
            .with_format(TileFormat::GeoJson)
            .with_options(options);

        let (_, tile) = service.resolve(&request).unwrap();
        assert!(tile.is_temporary());

        let response = service.get_tile(request.clone()).await.unwrap();
        assert!(!response.cache_hit);
        let value: serde_json::Value = serde_json::from_slice(&response.data).unwrap();
        assert_eq!(value["numberReturned"], 1);

        assert!(!service.cache.exists(&tile).await.unwrap());
        assert!(!service.get_tile(request).await.unwrap().cache_hit);
    }

    #[tokio::test]
    async fn test_resolution_errors() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let unknown_tms = TileRequest::collection("cities", "Nope", 0, 0, 0);
        assert!(matches!(
            service.resolve(&unknown_tms),
            Err(TileError::UnknownTileMatrixSet { .. })
        ));

        let out_of_range = TileRequest::collection("cities", "WebMercatorQuad", 1, 2, 0);
        assert!(matches!(
            service.resolve(&out_of_range),
            Err(TileError::InvalidTileCoordinate { .. })
        ));

        let zoom = TileRequest::collection("cities", "WebMercatorQuad", 11, 0, 0);
        assert!(matches!(
            service.resolve(&zoom),
            Err(TileError::ZoomLevelNotEnabled { .. })
        ));

        let format = TileRequest::collection("peaks", "WebMercatorQuad", 1, 0, 0)
            .with_format(TileFormat::GeoJson);
        assert!(matches!(
            service.resolve(&format),
            Err(TileError::UnsupportedFormat { .. })
        ));

        let mut options = QueryOptions::default();
        options.filter.insert("name".to_string(), "x".to_string());
        let filter =
            TileRequest::collection("cities", "WebMercatorQuad", 1, 0, 0).with_options(options);
        assert!(matches!(
            service.resolve(&filter),
            Err(TileError::InvalidParameter { .. })
        ));

        let missing = TileRequest::collection("lakes", "WebMercatorQuad", 1, 0, 0);
        assert!(matches!(
            service.resolve(&missing),
            Err(TileError::CollectionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_dataset_layers() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        // peaks has no zoom restriction, cities stops at 10
        let (_, tile) = service
            .resolve(&TileRequest::dataset("WebMercatorQuad", 12, 0, 0))
            .unwrap();
        assert_eq!(tile.collections(), ["peaks".to_string()]);

        let (_, tile) = service
            .resolve(
                &TileRequest::dataset("WebMercatorQuad", 3, 0, 0)
                    .with_collections(vec!["peaks".into(), "cities".into()]),
            )
            .unwrap();
        assert_eq!(tile.collections(), ["cities".to_string(), "peaks".to_string()]);

        // peaks is MVT only, which leaves a single GeoJSON layer
        let (_, tile) = service
            .resolve(&TileRequest::dataset("WebMercatorQuad", 3, 0, 0).with_format(TileFormat::GeoJson))
            .unwrap();
        assert_eq!(tile.collections(), ["cities".to_string()]);
        assert!(!tile.is_multi_layer());
    }

    #[tokio::test]
    async fn test_corrupt_cached_tile_is_regenerated() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());

        let request = TileRequest::collection("cities", "WebMercatorQuad", 1, 0, 1)
            .with_format(TileFormat::GeoJson);
        let (_, tile) = service.resolve(&request).unwrap();
        service
            .cache
            .put(&tile, Bytes::from_static(b"{\"type\":"))
            .await
            .unwrap();

        let response = service.get_tile(request).await.unwrap();
        assert!(!response.cache_hit);
        let value: serde_json::Value = serde_json::from_slice(&response.data).unwrap();
        assert_eq!(value["numberReturned"], 2);
    }

    #[tokio::test]
    async fn test_seed_tile_skips_existing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let (tms, tile) = service
            .resolve(&TileRequest::collection("cities", "WebMercatorQuad", 2, 1, 2))
            .unwrap();

        assert_eq!(service.seed_tile(&tms, &tile).await.unwrap(), SeedOutcome::Generated);
        assert_eq!(service.seed_tile(&tms, &tile).await.unwrap(), SeedOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_generation() {
        let dir = tempfile::tempdir().unwrap();
        let service = Arc::new(service(dir.path()));

        let request = TileRequest::collection("cities", "WebMercatorQuad", 4, 5, 8);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let request = request.clone();
                tokio::spawn(async move { service.get_tile(request).await.unwrap().data })
            })
            .collect();

        let mut payloads = Vec::new();
        for handle in handles {
            payloads.push(handle.await.unwrap());
        }
        assert!(payloads.windows(2).all(|w| w[0] == w[1]));
        assert!(service.in_flight.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_request_leaves_nothing_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_with(dir.path(), |memory| {
            Arc::new(StallOnce {
                inner: memory,
                stalled: AtomicBool::new(false),
            })
        });
        let request = TileRequest::collection("cities", "WebMercatorQuad", 4, 5, 8);

        // the caller goes away while the generation is pending
        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), service.get_tile(request.clone())).await;
        assert!(abandoned.is_err());
        assert!(service.in_flight.lock().unwrap().is_empty());

        let response = service.get_tile(request.clone()).await.unwrap();
        assert!(!response.cache_hit);
        assert!(service.in_flight.lock().unwrap().is_empty());
        assert!(service.get_tile(request).await.unwrap().cache_hit);
    }

    #[test]
    fn test_tile_sets() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(dir.path());
        let sets = service.tile_sets("cities").unwrap();
        assert_eq!(sets.len(), 2);

        let mercator = sets
            .iter()
            .find(|s| s.tile_matrix_set == "WebMercatorQuad")
            .unwrap();
        assert_eq!(mercator.zoom_levels, MinMax::new(0, 10));
        assert_eq!(mercator.tile_matrix_set_limits.len(), 11);
        assert_eq!(mercator.tile_matrix_set_limits[0].tile_count(), 1);

        // peaks has no extent
        let peaks = service.tile_sets("peaks").unwrap();
        assert!(peaks.iter().all(|s| s.tile_matrix_set_limits.is_empty()));
    }
}
