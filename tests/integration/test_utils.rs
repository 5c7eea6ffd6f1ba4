//! Test utilities for integration tests.
//!
//! This module writes a small dataset to a temporary directory and provides
//! an instrumented feature source plus helpers to drive the router.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use prost::Message;
use tempfile::TempDir;
use tower::ServiceExt;

use ogcapi_tiles::format::vector_tile;
use ogcapi_tiles::{
    create_router, AppState, Dataset, FeatureQuery, FeatureSource, FeatureStream, FormatRegistry,
    MemoryFeatureSource, ProjTransformerFactory, QueryError, RouterConfig, SeedingSupervisor,
    TileCache, TileCoordinateTransformer, TileGenerator, TileMatrixSets, TileService,
};

// =============================================================================
// Test Dataset
// =============================================================================

const DATASET_JSON: &str = r#"{
  "id": "europe",
  "label": "Europe",
  "tiles": {
    "multiCollection": true,
    "formats": ["mvt"],
    "seeding": { "WebMercatorQuad": { "min": 0, "max": 1 } }
  },
  "collections": [
    {
      "id": "cities",
      "label": "Cities",
      "source": "cities.geojson",
      "tiles": {
        "formats": ["mvt", "json"],
        "zoomLevels": { "WebMercatorQuad": { "min": 0, "max": 12 } },
        "seeding": { "WebMercatorQuad": { "min": 0, "max": 2 } },
        "filterable": ["kind"]
      }
    },
    {
      "id": "peaks",
      "source": "peaks.geojson",
      "tiles": {
        "formats": ["mvt"],
        "zoomLevels": { "WebMercatorQuad": { "min": 0, "max": 8 } }
      }
    }
  ]
}"#;

const CITIES_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "id": 1,
      "geometry": { "type": "Point", "coordinates": [7.1, 50.7] },
      "properties": { "name": "Bonn", "kind": "city", "population": 330000 }
    },
    {
      "type": "Feature",
      "id": 2,
      "geometry": { "type": "Point", "coordinates": [2.35, 48.85] },
      "properties": { "name": "Paris", "kind": "capital", "population": 2100000 }
    }
  ]
}"#;

const PEAKS_GEOJSON: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "id": 1,
      "geometry": { "type": "Point", "coordinates": [6.86, 45.83] },
      "properties": { "name": "Mont Blanc", "elevation": 4806 }
    }
  ]
}"#;

/// Tiles the seeding plan of the test dataset covers.
///
/// Multi-layer levels 0..=1 give 1 + 4 tiles. Cities levels 0..=2 give
/// 1 + 4 + 9 tiles in each of the two formats.
pub const SEEDING_TILE_COUNT: u64 = 5 + 14 + 14;

/// A dataset definition with its GeoJSON sources in a temporary directory.
pub struct TestDataset {
    dir: TempDir,
}

impl TestDataset {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dataset.json"), DATASET_JSON).unwrap();
        std::fs::write(dir.path().join("cities.geojson"), CITIES_GEOJSON).unwrap();
        std::fs::write(dir.path().join("peaks.geojson"), PEAKS_GEOJSON).unwrap();
        Self { dir }
    }

    pub fn definition(&self) -> PathBuf {
        self.dir.path().join("dataset.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Load and validate the dataset.
    pub fn load(&self) -> (Dataset, MemoryFeatureSource) {
        let (dataset, source) =
            Dataset::load(&self.definition(), Arc::new(ProjTransformerFactory::new())).unwrap();
        dataset
            .validate(&TileMatrixSets::with_defaults(), &FormatRegistry::with_defaults())
            .unwrap();
        (dataset, source)
    }
}

// =============================================================================
// Instrumented Feature Source
// =============================================================================

/// A feature source wrapper that counts queries and injects failures.
pub struct MockFeatureSource {
    inner: MemoryFeatureSource,
    queries: Mutex<HashMap<String, usize>>,
    delay: Option<Duration>,
    failing: Vec<String>,
    hanging: bool,
}

impl MockFeatureSource {
    pub fn new(inner: MemoryFeatureSource) -> Self {
        Self {
            inner,
            queries: Mutex::new(HashMap::new()),
            delay: None,
            failing: Vec::new(),
            hanging: false,
        }
    }

    /// Sleep before answering each query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every query of `collection`.
    pub fn with_failing(mut self, collection: &str) -> Self {
        self.failing.push(collection.to_string());
        self
    }

    /// Never answer.
    pub fn hanging(mut self) -> Self {
        self.hanging = true;
        self
    }

    pub fn query_count(&self, collection: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .get(collection)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_queries(&self) -> usize {
        self.queries.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl FeatureSource for MockFeatureSource {
    async fn query(&self, query: &FeatureQuery) -> Result<FeatureStream, QueryError> {
        *self
            .queries
            .lock()
            .unwrap()
            .entry(query.collection.clone())
            .or_insert(0) += 1;

        if self.hanging {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.contains(&query.collection) {
            return Err(QueryError::Backend {
                collection: query.collection.clone(),
                message: "unavailable".to_string(),
            });
        }
        self.inner.query(query).await
    }
}

// =============================================================================
// Service and Router
// =============================================================================

pub fn build_service(
    dataset: Dataset,
    source: Arc<dyn FeatureSource>,
    cache: TileCache,
    query_timeout: Option<Duration>,
) -> Arc<TileService> {
    let crs = Arc::new(ProjTransformerFactory::new());
    let generator = TileGenerator::new(
        source,
        Arc::new(FormatRegistry::with_defaults()),
        TileCoordinateTransformer::new(crs),
    )
    .with_query_timeout(query_timeout);

    Arc::new(TileService::new(
        Arc::new(dataset),
        Arc::new(TileMatrixSets::with_defaults()),
        generator,
        cache,
    ))
}

pub fn build_router(service: Arc<TileService>, supervisor: Arc<SeedingSupervisor>) -> Router {
    let state = AppState::new(service, supervisor);
    create_router(state, RouterConfig::new().with_tracing(false))
}

/// A fully wired server over the test dataset.
pub struct TestServer {
    pub dataset: TestDataset,
    pub source: Arc<MockFeatureSource>,
    pub service: Arc<TileService>,
    pub supervisor: Arc<SeedingSupervisor>,
    pub router: Router,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_source(MockFeatureSource::new, None)
    }

    /// Build a server whose feature source is configured by `wrap`.
    pub fn with_source(
        wrap: impl FnOnce(MemoryFeatureSource) -> MockFeatureSource,
        query_timeout: Option<Duration>,
    ) -> Self {
        let dataset = TestDataset::new();
        let cache = TileCache::new(dataset.cache_dir());
        Self::with_cache(dataset, cache, wrap, query_timeout)
    }

    pub fn with_cache(
        dataset: TestDataset,
        cache: TileCache,
        wrap: impl FnOnce(MemoryFeatureSource) -> MockFeatureSource,
        query_timeout: Option<Duration>,
    ) -> Self {
        let (definition, memory) = dataset.load();
        let source = Arc::new(wrap(memory));
        let service = build_service(definition, source.clone(), cache, query_timeout);
        let supervisor = Arc::new(SeedingSupervisor::new());
        let router = build_router(service.clone(), supervisor.clone());
        Self {
            dataset,
            source,
            service,
            supervisor,
            router,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        send(&self.router, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post(&self, uri: &str) -> TestResponse {
        send(&self.router, Request::post(uri).body(Body::empty()).unwrap()).await
    }
}

// =============================================================================
// Responses
// =============================================================================

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cache_hit(&self) -> bool {
        self.header("x-tile-cache-hit") == Some("true")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn mvt(&self) -> vector_tile::Tile {
        vector_tile::Tile::decode(self.body.as_ref()).unwrap()
    }

    /// Layer names of an MVT body, in order.
    pub fn layer_names(&self) -> Vec<String> {
        self.mvt().layers.into_iter().map(|l| l.name).collect()
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> TestResponse {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body,
    }
}
