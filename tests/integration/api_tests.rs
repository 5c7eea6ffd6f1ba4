//! API integration tests for tile retrieval and error handling.
//!
//! Tests verify:
//! - Tile matrix set and tileset metadata
//! - Single-layer and multi-layer tile retrieval
//! - Property projection and filters
//! - Error cases and their HTTP status codes
//! - Response headers

use std::time::Duration;

use assert_approx_eq::assert_approx_eq;
use axum::body::Body;
use axum::http::{Request, StatusCode};

use ogcapi_tiles::{Tile, TileFormat};

use super::test_utils::{send, MockFeatureSource, TestServer};

const MVT: &str = "application/vnd.mapbox-vector-tile";
const GEOJSON: &str = "application/geo+json";

// =============================================================================
// Metadata
// =============================================================================

#[tokio::test]
async fn test_health() {
    let server = TestServer::new();
    let response = server.get("/health").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "healthy");
}

#[tokio::test]
async fn test_tile_matrix_sets_list() {
    let server = TestServer::new();
    let response = server.get("/tileMatrixSets").await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    let ids: Vec<&str> = json["tileMatrixSets"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"WebMercatorQuad"));
    assert!(ids.contains(&"WorldCRS84Quad"));
}

#[tokio::test]
async fn test_tile_matrix_set_definition() {
    let server = TestServer::new();
    let response = server.get("/tileMatrixSets/WebMercatorQuad").await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["id"], "WebMercatorQuad");

    let matrices = json["tileMatrices"].as_array().unwrap();
    assert_eq!(matrices.len(), 25);

    let level0 = &matrices[0];
    assert_eq!(level0["id"], "0");
    assert_eq!(level0["matrixWidth"], 1);
    assert_eq!(level0["matrixHeight"], 1);
    assert_eq!(level0["tileWidth"], 256);
    assert_approx_eq!(level0["cellSize"].as_f64().unwrap(), 156_543.033_928, 1e-3);
    assert_approx_eq!(
        level0["scaleDenominator"].as_f64().unwrap(),
        559_082_264.028_7,
        1e-1
    );

    assert_eq!(matrices[5]["matrixWidth"], 32);
}

#[tokio::test]
async fn test_unknown_tile_matrix_set() {
    let server = TestServer::new();
    let response = server.get("/tileMatrixSets/Mars").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "not_found");
}

#[tokio::test]
async fn test_collection_tile_sets() {
    let server = TestServer::new();
    let response = server.get("/collections/cities/tiles").await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    let tilesets = json["tilesets"].as_array().unwrap();
    let web_mercator = tilesets
        .iter()
        .find(|t| t["tileMatrixSet"] == "WebMercatorQuad")
        .unwrap();

    assert_eq!(web_mercator["zoomLevels"]["min"], 0);
    assert_eq!(web_mercator["zoomLevels"]["max"], 12);
    assert_eq!(web_mercator["formats"], serde_json::json!(["mvt", "json"]));

    let limits = web_mercator["tileMatrixSetLimits"].as_array().unwrap();
    assert_eq!(limits.len(), 13);
    assert_eq!(limits[0]["tileMatrix"], "0");
    assert_eq!(limits[5]["minTileCol"], 15);
    assert_eq!(limits[5]["maxTileCol"], 17);
}

#[tokio::test]
async fn test_tile_sets_unknown_collection() {
    let server = TestServer::new();
    let response = server.get("/collections/rivers/tiles").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

// =============================================================================
// Single-Layer Tiles
// =============================================================================

#[tokio::test]
async fn test_collection_tile_mvt() {
    let server = TestServer::new();
    let uri = "/collections/cities/tiles/WebMercatorQuad/5/11/16";

    let response = server.get(uri).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some(MVT));
    assert_eq!(response.header("cache-control"), Some("public, max-age=3600"));
    assert!(!response.cache_hit());

    let tile = response.mvt();
    assert_eq!(tile.layers.len(), 1);
    assert_eq!(tile.layers[0].name, "cities");
    assert_eq!(tile.layers[0].features.len(), 1);

    let again = server.get(uri).await;
    assert_eq!(again.status, StatusCode::OK);
    assert!(again.cache_hit());
    assert_eq!(again.body, response.body);
}

#[tokio::test]
async fn test_collection_tile_geojson() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0?f=json")
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some(GEOJSON));

    let json = response.json();
    assert_eq!(json["type"], "FeatureCollection");
    assert_eq!(json["numberReturned"], 2);
    assert_eq!(json["features"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_default_format_is_first_collection_format() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0")
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some(MVT));
}

#[tokio::test]
async fn test_empty_tile() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/5/0/0?f=json")
        .await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["numberReturned"], 0);
    assert!(json["features"].as_array().unwrap().is_empty());

    let mvt = server
        .get("/collections/cities/tiles/WebMercatorQuad/5/0/0")
        .await;
    assert_eq!(mvt.status, StatusCode::OK);
    assert!(mvt.body.is_empty());
}

#[tokio::test]
async fn test_filter_is_served_uncached() {
    let server = TestServer::new();
    let uri = "/collections/cities/tiles/WebMercatorQuad/0/0/0?f=json&kind=capital";

    let response = server.get(uri).await;
    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    assert_eq!(json["numberReturned"], 1);
    assert_eq!(json["features"][0]["properties"]["name"], "Paris");

    let again = server.get(uri).await;
    assert!(!again.cache_hit());

    let tms = server
        .service
        .tile_matrix_sets()
        .get("WebMercatorQuad")
        .unwrap();
    let tile = Tile::new(&tms, 0, 0, 0, vec!["cities".to_string()], TileFormat::GeoJson).unwrap();
    assert!(!server.service.cache().exists(&tile).await.unwrap());
}

#[tokio::test]
async fn test_property_projection() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0?f=json&properties=name")
        .await;

    assert_eq!(response.status, StatusCode::OK);
    let json = response.json();
    for feature in json["features"].as_array().unwrap() {
        let properties = feature["properties"].as_object().unwrap();
        assert_eq!(properties.keys().collect::<Vec<_>>(), vec!["name"]);
    }
}

// =============================================================================
// Multi-Layer Tiles
// =============================================================================

#[tokio::test]
async fn test_dataset_tile_layers() {
    let server = TestServer::new();
    let response = server.get("/tiles/WebMercatorQuad/0/0/0").await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("content-type"), Some(MVT));
    assert!(response.header("x-tile-failed-layers").is_none());
    assert_eq!(response.layer_names(), vec!["cities", "peaks"]);
}

#[tokio::test]
async fn test_dataset_tile_layer_contents() {
    let server = TestServer::new();

    let paris = server.get("/tiles/WebMercatorQuad/5/11/16").await;
    assert_eq!(paris.status, StatusCode::OK);
    assert_eq!(paris.layer_names(), vec!["cities", "peaks"]);

    // Bonn is alone in the tile above
    let bonn = server.get("/tiles/WebMercatorQuad/5/10/16").await;
    assert_eq!(bonn.status, StatusCode::OK);
    assert_eq!(bonn.layer_names(), vec!["cities"]);
}

#[tokio::test]
async fn test_dataset_tile_collection_subset() {
    let server = TestServer::new();
    let response = server
        .get("/tiles/WebMercatorQuad/0/0/0?collections=peaks")
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.layer_names(), vec!["peaks"]);
}

#[tokio::test]
async fn test_dataset_tile_skips_collections_outside_zoom_range() {
    let server = TestServer::new();

    // peaks stops at level 8
    let response = server.get("/tiles/WebMercatorQuad/9/0/0").await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(!response.layer_names().contains(&"peaks".to_string()));

    // cities stops at level 12
    let response = server.get("/tiles/WebMercatorQuad/13/0/0").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_dataset_tile_partial_failure() {
    let server = TestServer::with_source(|m| MockFeatureSource::new(m).with_failing("peaks"), None);
    let uri = "/tiles/WebMercatorQuad/0/0/0";

    let response = server.get(uri).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("x-tile-failed-layers"), Some("peaks"));
    assert_eq!(response.layer_names(), vec!["cities"]);

    // partial tiles are not cached
    let again = server.get(uri).await;
    assert!(!again.cache_hit());
    assert_eq!(again.header("x-tile-failed-layers"), Some("peaks"));
}

#[tokio::test]
async fn test_dataset_tile_all_layers_failed() {
    let server = TestServer::with_source(
        |m| {
            MockFeatureSource::new(m)
                .with_failing("cities")
                .with_failing("peaks")
        },
        None,
    );
    let response = server.get("/tiles/WebMercatorQuad/0/0/0").await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.json()["error"], "all_layers_failed");
}

// =============================================================================
// Error Handling
// =============================================================================

#[tokio::test]
async fn test_unknown_collection() {
    let server = TestServer::new();
    let response = server
        .get("/collections/rivers/tiles/WebMercatorQuad/0/0/0")
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    let json = response.json();
    assert_eq!(json["error"], "not_found");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_unknown_tile_matrix_set_in_tile_path() {
    let server = TestServer::new();
    let response = server.get("/collections/cities/tiles/Mars/0/0/0").await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_row_out_of_range() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/2/4/0")
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_tile_coordinate");
}

#[tokio::test]
async fn test_non_numeric_level() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/abc/0/0")
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_zoom_level_not_enabled() {
    let server = TestServer::new();
    let response = server
        .get("/collections/peaks/tiles/WebMercatorQuad/9/0/0")
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert_eq!(response.json()["error"], "zoom_level_not_enabled");
}

#[tokio::test]
async fn test_format_not_enabled() {
    let server = TestServer::new();

    let response = server
        .get("/collections/peaks/tiles/WebMercatorQuad/0/0/0?f=json")
        .await;
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);

    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0?f=png")
        .await;
    assert_eq!(response.status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(response.json()["error"], "unsupported_format");
}

#[tokio::test]
async fn test_unknown_filter_property() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0?population=330000")
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["error"], "invalid_parameter");
}

#[tokio::test]
async fn test_collections_parameter_on_collection_tile() {
    let server = TestServer::new();
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0?collections=peaks")
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_collection_in_dataset_tile() {
    let server = TestServer::new();
    let response = server
        .get("/tiles/WebMercatorQuad/0/0/0?collections=rivers")
        .await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_query_error() {
    let server = TestServer::with_source(|m| MockFeatureSource::new(m).with_failing("cities"), None);
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0")
        .await;

    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.json()["error"], "query_error");
}

#[tokio::test]
async fn test_query_timeout() {
    let server = TestServer::with_source(
        |m| MockFeatureSource::new(m).hanging(),
        Some(Duration::from_millis(50)),
    );
    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0")
        .await;

    assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(response.json()["error"], "query_timeout");
}

// =============================================================================
// Seeding and CORS
// =============================================================================

#[tokio::test]
async fn test_seeding_without_task() {
    let server = TestServer::new();

    let response = server.get("/seeding").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = server.post("/seeding/stop").await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cors_exposes_tile_headers() {
    let server = TestServer::new();
    let request = Request::get("/collections/cities/tiles/WebMercatorQuad/0/0/0")
        .header("origin", "https://maps.example.com")
        .body(Body::empty())
        .unwrap();
    let response = send(&server.router, request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    let exposed = response
        .header("access-control-expose-headers")
        .unwrap()
        .to_lowercase();
    assert!(exposed.contains("x-tile-cache-hit"));
}
