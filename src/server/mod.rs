//! HTTP server layer.
//!
//! This module provides the OGC API tile endpoints and seeding control.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   GET /collections/{collectionId}/tiles/{tms}/{level}/{row}/{col}│
//! │   GET /tiles/{tms}/{level}/{row}/{col}                          │
//! │                                                                 │
//! │  ┌─────────────────────────┐  ┌─────────────────────────────┐   │
//! │  │        handlers         │  │           routes            │   │
//! │  │ (requests, error codes) │  │  (router config, CORS)      │   │
//! │  └─────────────────────────┘  └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    collection_tile_handler, dataset_tile_handler, health_handler, seeding_handler,
    stop_seeding_handler, tile_matrix_set_handler, tile_matrix_sets_handler, tile_sets_handler,
    AppState, CollectionTilePath, DatasetTilePath, ErrorResponse, HealthResponse,
    SeedingStatusResponse, TileMatrixResponse, TileMatrixSetResponse, TileMatrixSetsResponse,
    TileQuery, TileSetsResponse, CACHE_HIT_HEADER, FAILED_LAYERS_HEADER,
};
pub use routes::{create_router, RouterConfig};
