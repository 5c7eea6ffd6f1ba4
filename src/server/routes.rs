//! Router configuration for the tile server.
//!
//! This module defines the HTTP routes and applies middleware for CORS and
//! request tracing.
//!
//! # Route Structure
//!
//! ```text
//! /health                                                              - Health check
//! /tileMatrixSets                                                      - Tiling schemes
//! /tileMatrixSets/{tileMatrixSetId}                                    - Tiling scheme definition
//! /collections/{collectionId}/tiles                                    - Tilesets of a collection
//! /collections/{collectionId}/tiles/{tileMatrixSetId}/{level}/{row}/{col} - Collection tile
//! /tiles/{tileMatrixSetId}/{level}/{row}/{col}                         - Multi-layer tile
//! /seeding                                                             - Seeding progress
//! /seeding/stop                                                        - Stop seeding (POST)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ogcapi_tiles::server::{create_router, AppState, RouterConfig};
//!
//! let state = AppState::new(tile_service, supervisor);
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//!
//! let router = create_router(state, config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    collection_tile_handler, dataset_tile_handler, health_handler, seeding_handler,
    stop_seeding_handler, tile_matrix_set_handler, tile_matrix_sets_handler, tile_sets_handler,
    AppState, CACHE_HIT_HEADER, FAILED_LAYERS_HEADER,
};

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Cache-Control max-age in seconds
    pub cache_max_age: u32,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterConfig {
    /// Create a router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Cache max-age is 1 hour (3600 seconds)
    /// - Tracing is enabled
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            cache_max_age: 3600,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    /// Allow any CORS origin.
    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Set the Cache-Control max-age in seconds.
    pub fn with_cache_max_age(mut self, seconds: u32) -> Self {
        self.cache_max_age = seconds;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the main application router.
///
/// The `cache_max_age` of `config` overrides the one in `state`.
pub fn create_router(state: AppState, config: RouterConfig) -> Router {
    let state = AppState {
        cache_max_age: config.cache_max_age,
        ..state
    };
    let cors = build_cors_layer(&config);

    // axum 0.8 path syntax: {param}
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tileMatrixSets", get(tile_matrix_sets_handler))
        .route(
            "/tileMatrixSets/{tileMatrixSetId}",
            get(tile_matrix_set_handler),
        )
        .route("/collections/{collectionId}/tiles", get(tile_sets_handler))
        .route(
            "/collections/{collectionId}/tiles/{tileMatrixSetId}/{level}/{row}/{col}",
            get(collection_tile_handler),
        )
        .route(
            "/tiles/{tileMatrixSetId}/{level}/{row}/{col}",
            get(dataset_tile_handler),
        )
        .route("/seeding", get(seeding_handler))
        .route("/seeding/stop", post(stop_seeding_handler))
        .with_state(state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CACHE_HIT_HEADER, FAILED_LAYERS_HEADER])
        .max_age(Duration::from_secs(86400)); // 24 hours

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        // no origins allowed
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
