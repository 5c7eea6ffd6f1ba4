//! HTTP request handlers for the OGC API tile endpoints.
//!
//! # Endpoints
//!
//! - `GET /collections/{collectionId}/tiles/{tileMatrixSetId}/{level}/{row}/{col}` - Collection tile
//! - `GET /tiles/{tileMatrixSetId}/{level}/{row}/{col}` - Multi-layer dataset tile
//! - `GET /collections/{collectionId}/tiles` - Tilesets of a collection
//! - `GET /tileMatrixSets` and `GET /tileMatrixSets/{tileMatrixSetId}` - Tiling schemes
//! - `GET /seeding` and `POST /seeding/stop` - Seeding progress and control
//! - `GET /health` - Health check endpoint

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{QueryError, TileError};
use crate::format::TileFormat;
use crate::seeding::{SeedingProgress, SeedingSupervisor, TaskId};
use crate::tile::{QueryOptions, TileRequest, TileService, TileSetSummary};

/// Header telling whether a tile came from the cache.
pub const CACHE_HIT_HEADER: HeaderName = HeaderName::from_static("x-tile-cache-hit");

/// Header listing the collections missing from a partial multi-layer tile.
pub const FAILED_LAYERS_HEADER: HeaderName = HeaderName::from_static("x-tile-failed-layers");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state.
///
/// This is passed to all handlers via Axum's State extractor.
pub struct AppState {
    /// The tile service for processing tile requests
    pub tile_service: Arc<TileService>,

    /// Registry of seeding tasks
    pub seeding: Arc<SeedingSupervisor>,

    /// Default cache control max-age in seconds (defaults to 1 hour)
    pub cache_max_age: u32,
}

impl AppState {
    pub fn new(tile_service: Arc<TileService>, seeding: Arc<SeedingSupervisor>) -> Self {
        Self {
            tile_service,
            seeding,
            cache_max_age: 3600,
        }
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            tile_service: Arc::clone(&self.tile_service),
            seeding: Arc::clone(&self.seeding),
            cache_max_age: self.cache_max_age,
        }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters of a collection tile.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionTilePath {
    pub collection_id: String,
    pub tile_matrix_set_id: String,
    pub level: u8,
    pub row: u32,
    pub col: u32,
}

/// Path parameters of a dataset tile.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetTilePath {
    pub tile_matrix_set_id: String,
    pub level: u8,
    pub row: u32,
    pub col: u32,
}

/// Query parameters of a tile request.
///
/// `f`, `properties` and `collections` are reserved; every other
/// parameter is an attribute filter.
#[derive(Debug, Default, PartialEq)]
pub struct TileQuery {
    pub format: Option<TileFormat>,
    pub collections: Option<Vec<String>>,
    pub options: QueryOptions,
}

impl TileQuery {
    pub fn parse(params: HashMap<String, String>) -> Result<Self, TileError> {
        let mut query = TileQuery::default();
        let mut filter = BTreeMap::new();

        for (key, value) in params {
            match key.as_str() {
                "f" => query.format = Some(value.parse()?),
                "properties" => query.options.properties = Some(split_list(&value)),
                "collections" => {
                    let ids = split_list(&value);
                    if ids.is_empty() {
                        return Err(TileError::InvalidParameter {
                            name: key,
                            message: "must name at least one collection".to_string(),
                        });
                    }
                    query.collections = Some(ids);
                }
                _ => {
                    filter.insert(key, value);
                }
            }
        }
        query.options.filter = filter;
        Ok(query)
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "invalid_parameter")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    pub status: u16,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: status.as_u16(),
        }
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,

    /// Service version
    pub version: String,
}

/// Entry of the tile matrix set list.
#[derive(Debug, Serialize)]
pub struct TileMatrixSetRef {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMatrixSetsResponse {
    pub tile_matrix_sets: Vec<TileMatrixSetRef>,
}

/// One level of a tile matrix set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMatrixResponse {
    pub id: String,
    pub scale_denominator: f64,
    pub cell_size: f64,
    pub matrix_width: u32,
    pub matrix_height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

/// Definition of a tile matrix set.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMatrixSetResponse {
    pub id: String,
    pub title: String,
    pub crs: String,
    pub bounding_box: [f64; 4],
    pub tile_matrices: Vec<TileMatrixResponse>,
}

#[derive(Debug, Serialize)]
pub struct TileSetsResponse {
    pub tilesets: Vec<TileSetSummary>,
}

/// Progress of the current seeding task.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedingStatusResponse {
    pub task_id: TaskId,
    pub running: bool,
    #[serde(flatten)]
    pub progress: SeedingProgress,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Convert TileError to HTTP response.
///
/// 5xx errors are logged at ERROR level, 404s at DEBUG level and other
/// client errors at WARN level.
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            TileError::UnknownTileMatrixSet { .. } | TileError::CollectionNotFound { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            TileError::ZoomLevelNotEnabled { .. } => {
                (StatusCode::NOT_FOUND, "zoom_level_not_enabled")
            }
            TileError::InvalidTileCoordinate { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_tile_coordinate")
            }
            TileError::InvalidParameter { .. } | TileError::NoCollections => {
                (StatusCode::BAD_REQUEST, "invalid_parameter")
            }
            TileError::UnsupportedFormat { .. } => {
                (StatusCode::NOT_ACCEPTABLE, "unsupported_format")
            }
            TileError::Query(QueryError::Timeout { .. }) => {
                (StatusCode::GATEWAY_TIMEOUT, "query_timeout")
            }
            TileError::Query(_) => (StatusCode::BAD_GATEWAY, "query_error"),
            TileError::AllLayersFailed { .. } => (StatusCode::BAD_GATEWAY, "all_layers_failed"),
            TileError::Crs(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crs_error"),
            TileError::Encode(_) => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            TileError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
        };
        let message = self.to_string();

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

fn no_seeding_task() -> Response {
    let status = StatusCode::NOT_FOUND;
    let body = ErrorResponse::with_status("not_found", "No seeding task", status);
    (status, Json(body)).into_response()
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle collection tile requests.
///
/// # Endpoint
///
/// `GET /collections/{collectionId}/tiles/{tileMatrixSetId}/{level}/{row}/{col}`
///
/// # Query Parameters
///
/// - `f`: `mvt` or `json` (default: the first format of the collection)
/// - `properties`: Comma-separated properties to keep
/// - any filterable property: `key=value` attribute filter
///
/// Requests with `properties` or a filter are generated for this request
/// only and never cached.
///
/// # Response
///
/// - `200 OK`: Tile payload
/// - `400 Bad Request`: Coordinates outside the tile matrix, unknown filter
/// - `404 Not Found`: Unknown collection or tile matrix set, zoom level not enabled
/// - `406 Not Acceptable`: Format not enabled for the collection
/// - `502 Bad Gateway` / `504 Gateway Timeout`: Feature query failed or timed out
pub async fn collection_tile_handler(
    State(state): State<AppState>,
    Path(path): Path<CollectionTilePath>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, TileError> {
    let query = TileQuery::parse(params)?;
    if query.collections.is_some() {
        return Err(TileError::InvalidParameter {
            name: "collections".to_string(),
            message: "only valid for dataset tiles".to_string(),
        });
    }

    let format = match query.format {
        Some(format) => format,
        None => state
            .tile_service
            .dataset()
            .collection(&path.collection_id)?
            .tiles
            .formats
            .first()
            .copied()
            .unwrap_or(TileFormat::Mvt),
    };

    let request = TileRequest::collection(
        path.collection_id,
        path.tile_matrix_set_id,
        path.level,
        path.row,
        path.col,
    )
    .with_format(format)
    .with_options(query.options);

    tile_response(&state, request).await
}

/// Handle multi-layer dataset tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{tileMatrixSetId}/{level}/{row}/{col}`
///
/// Takes the same query parameters as collection tiles, plus
/// `collections=a,b` to restrict the layers.
///
/// A tile with failed layers is served with an `X-Tile-Failed-Layers`
/// header; if every layer fails the request fails with `502`.
pub async fn dataset_tile_handler(
    State(state): State<AppState>,
    Path(path): Path<DatasetTilePath>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, TileError> {
    let query = TileQuery::parse(params)?;
    let format = query.format.unwrap_or_else(|| {
        state
            .tile_service
            .dataset()
            .tiles
            .formats
            .first()
            .copied()
            .unwrap_or(TileFormat::Mvt)
    });

    let mut request =
        TileRequest::dataset(path.tile_matrix_set_id, path.level, path.row, path.col)
            .with_format(format)
            .with_options(query.options);
    if let Some(collections) = query.collections {
        request = request.with_collections(collections);
    }

    tile_response(&state, request).await
}

/// Serve a tile with its content type and cache headers.
async fn tile_response(state: &AppState, request: TileRequest) -> Result<Response, TileError> {
    let response = state.tile_service.get_tile(request).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(response.format.media_type()),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("public, max-age={}", state.cache_max_age)) {
        headers.insert(header::CACHE_CONTROL, value);
    }
    headers.insert(
        CACHE_HIT_HEADER,
        HeaderValue::from_static(if response.cache_hit { "true" } else { "false" }),
    );
    if !response.failed_layers.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&response.failed_layers.join(",")) {
            headers.insert(FAILED_LAYERS_HEADER, value);
        }
    }

    Ok((StatusCode::OK, headers, response.data).into_response())
}

/// List the tilesets of a collection.
///
/// # Endpoint
///
/// `GET /collections/{collectionId}/tiles`
///
/// Each tileset carries the zoom levels, formats and the
/// `tileMatrixSetLimits` covering the collection extent.
pub async fn tile_sets_handler(
    State(state): State<AppState>,
    Path(collection_id): Path<String>,
) -> Result<Json<TileSetsResponse>, TileError> {
    let tilesets = state.tile_service.tile_sets(&collection_id)?;
    Ok(Json(TileSetsResponse { tilesets }))
}

/// `GET /tileMatrixSets`
pub async fn tile_matrix_sets_handler(State(state): State<AppState>) -> Json<TileMatrixSetsResponse> {
    let tile_matrix_sets = state
        .tile_service
        .tile_matrix_sets()
        .iter()
        .map(|tms| TileMatrixSetRef {
            id: tms.id().to_string(),
            title: tms.title().to_string(),
        })
        .collect();
    Json(TileMatrixSetsResponse { tile_matrix_sets })
}

/// Describe a tile matrix set level by level.
///
/// # Endpoint
///
/// `GET /tileMatrixSets/{tileMatrixSetId}`
pub async fn tile_matrix_set_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TileMatrixSetResponse>, TileError> {
    let tms = state.tile_service.tile_matrix_sets().get(&id)?;

    let tile_matrices = tms
        .levels()
        .levels()
        .map(|level| {
            Ok(TileMatrixResponse {
                id: level.to_string(),
                scale_denominator: tms.scale_denominator(level)?,
                cell_size: tms.cell_size(level)?,
                matrix_width: tms.matrix_width(level),
                matrix_height: tms.matrix_height(level),
                tile_width: tms.tile_size(),
                tile_height: tms.tile_size(),
            })
        })
        .collect::<Result<Vec<_>, TileError>>()?;

    Ok(Json(TileMatrixSetResponse {
        id: tms.id().to_string(),
        title: tms.title().to_string(),
        crs: tms.crs().uri(),
        bounding_box: tms.extent().to_array(),
        tile_matrices,
    }))
}

/// Report the progress of the most recent seeding task.
///
/// # Endpoint
///
/// `GET /seeding`
///
/// # Response
///
/// - `200 OK`: `{taskId, running, totalTileCount, completedCount, statusMessage, stopped, state, ...}`
/// - `404 Not Found`: Seeding never started
pub async fn seeding_handler(State(state): State<AppState>) -> Response {
    match state.seeding.latest().await {
        Some((task_id, task)) => Json(SeedingStatusResponse {
            task_id,
            running: task.is_running(),
            progress: task.progress().await,
        })
        .into_response(),
        None => no_seeding_task(),
    }
}

/// Ask the most recent seeding task to stop.
///
/// # Endpoint
///
/// `POST /seeding/stop`
///
/// The task finishes the tile in progress, so the response is
/// `202 Accepted` with the progress at the time of the request.
pub async fn stop_seeding_handler(State(state): State<AppState>) -> Response {
    match state.seeding.latest().await {
        Some((task_id, task)) => {
            task.stop();
            info!(task = %task_id, "Seeding stop requested");
            let body = SeedingStatusResponse {
                task_id,
                running: task.is_running(),
                progress: task.progress().await,
            };
            (StatusCode::ACCEPTED, Json(body)).into_response()
        }
        None => no_seeding_task(),
    }
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
