//! # ogcapi-tiles
//!
//! An OGC API tile server for feature collections.
//!
//! This library serves vector tiles (Mapbox Vector Tiles and GeoJSON) for the
//! collections of a dataset, addressed by tile matrix set, level, row and
//! column. Generated tiles are stored in a filesystem cache whose layout is
//! stable across restarts, and a background seeding task pre-generates the
//! configured zoom ranges.
//!
//! ## Features
//!
//! - **Tiling schemes**: `WebMercatorQuad`, `WorldCRS84Quad` and custom quad-tree schemes
//! - **Multi-layer tiles**: One MVT layer per collection, built from the cached single-layer tiles
//! - **Filesystem cache**: Deterministic paths per tile, atomic writes, optional in-memory hot layer
//! - **Seeding**: Resumable, stoppable background generation with progress reporting
//! - **Property projection and filters**: Served uncached, per request
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`crs`] - Reference systems, bounding boxes and proj4rs-backed transformations
//! - [`tms`] - Tile matrix sets, tile footprints and the grid walker
//! - [`feature`] - Feature queries and the in-memory GeoJSON feature source
//! - [`mod@format`] - GeoJSON and MVT encoders
//! - [`dataset`] - Dataset definition: collections, zoom levels, seeding ranges
//! - [`tile`] - Tile identity, cache, generator and service
//! - [`seeding`] - Seeding plan, task and supervisor
//! - [`server`] - Axum-based HTTP server and routes
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ogcapi_tiles::{
//!     create_router, AppState, Dataset, FormatRegistry, ProjTransformerFactory, RouterConfig,
//!     SeedingSupervisor, TileCache, TileCoordinateTransformer, TileGenerator, TileMatrixSets,
//!     TileService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let crs = Arc::new(ProjTransformerFactory::new());
//!     let (dataset, source) = Dataset::load("dataset.json".as_ref(), crs.clone())?;
//!
//!     let generator = TileGenerator::new(
//!         Arc::new(source),
//!         Arc::new(FormatRegistry::with_defaults()),
//!         TileCoordinateTransformer::new(crs),
//!     );
//!     let service = TileService::new(
//!         Arc::new(dataset),
//!         Arc::new(TileMatrixSets::with_defaults()),
//!         generator,
//!         TileCache::new("./tile-cache"),
//!     );
//!
//!     let state = AppState::new(Arc::new(service), Arc::new(SeedingSupervisor::new()));
//!     let router = create_router(state, RouterConfig::new());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, router).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crs;
pub mod dataset;
pub mod error;
pub mod feature;
pub mod format;
pub mod seeding;
pub mod server;
pub mod tile;
pub mod tms;

// Re-export commonly used types
pub use config::{Cli, Command, DatasetConfig, LimitsConfig, SeedConfig, ServeConfig};
pub use crs::{BoundingBox, CrsTransformer, CrsTransformerFactory, EpsgCrs, ProjTransformerFactory};
pub use dataset::{Collection, CollectionTiles, Dataset, DatasetTiles};
pub use error::{CacheError, ConfigError, CrsError, EncodeError, QueryError, TileError};
pub use feature::{Feature, FeatureQuery, FeatureSource, FeatureStream, MemoryFeatureSource};
pub use format::{FormatRegistry, TileFormat};
pub use seeding::{
    SeedingConfig, SeedingPlan, SeedingProgress, SeedingSupervisor, SeedingTask, TaskId,
    TaskState,
};
pub use server::{create_router, AppState, ErrorResponse, HealthResponse, RouterConfig};
pub use tile::{
    QueryOptions, SeedOutcome, Tile, TileCache, TileGenerator, TileRequest, TileResponse,
    TileService,
};
pub use tms::{
    GridWalker, MinMax, TileCoordinateTransformer, TileMatrixSet, TileMatrixSetLimits,
    TileMatrixSets,
};
