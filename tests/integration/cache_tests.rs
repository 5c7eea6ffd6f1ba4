//! Cache integration tests.
//!
//! Tests verify:
//! - Stable on-disk layout of generated tiles
//! - Multi-layer tiles built from cached single-layer tiles
//! - One generation for concurrent requests of the same tile
//! - Repair of unreadable cache entries
//! - The in-memory layer never outlives the file it mirrors

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures::future::join_all;

use ogcapi_tiles::{SeedingSupervisor, TileCache};

use super::test_utils::{build_router, build_service, send, MockFeatureSource, TestDataset, TestServer};

#[tokio::test]
async fn test_cache_layout() {
    let server = TestServer::new();
    let cache_dir = server.dataset.cache_dir();

    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/5/11/16")
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let path = cache_dir.join("WebMercatorQuad/5/11/16/cities.pbf");
    assert!(path.exists());
    assert_eq!(std::fs::read(&path).unwrap(), response.body.to_vec());

    let response = server
        .get("/collections/cities/tiles/WebMercatorQuad/5/11/16?f=json")
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(cache_dir.join("WebMercatorQuad/5/11/16/cities.json").exists());
}

#[tokio::test]
async fn test_multi_layer_tile_layout() {
    let server = TestServer::new();
    let cache_dir = server.dataset.cache_dir();

    let response = server.get("/tiles/WebMercatorQuad/0/0/0").await;
    assert_eq!(response.status, StatusCode::OK);

    let tile_dir = cache_dir.join("WebMercatorQuad/0/0/0");
    assert!(tile_dir.join("cities,peaks.pbf").exists());
    assert!(tile_dir.join("cities.pbf").exists());
    assert!(tile_dir.join("peaks.pbf").exists());
}

#[tokio::test]
async fn test_multi_layer_reuses_single_layer_tiles() {
    let server = TestServer::new();

    let multi = server.get("/tiles/WebMercatorQuad/0/0/0").await;
    assert_eq!(multi.status, StatusCode::OK);
    assert_eq!(server.source.query_count("cities"), 1);
    assert_eq!(server.source.query_count("peaks"), 1);

    let single = server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0")
        .await;
    assert_eq!(single.status, StatusCode::OK);
    assert!(single.cache_hit());
    assert_eq!(server.source.query_count("cities"), 1);

    let multi = server.get("/tiles/WebMercatorQuad/0/0/0").await;
    assert!(multi.cache_hit());
    assert_eq!(server.source.total_queries(), 2);
}

#[tokio::test]
async fn test_multi_layer_built_from_existing_single_layer_tiles() {
    let server = TestServer::new();

    server
        .get("/collections/cities/tiles/WebMercatorQuad/0/0/0")
        .await;
    server
        .get("/collections/peaks/tiles/WebMercatorQuad/0/0/0")
        .await;
    assert_eq!(server.source.total_queries(), 2);

    let multi = server.get("/tiles/WebMercatorQuad/0/0/0").await;
    assert_eq!(multi.status, StatusCode::OK);
    assert!(!multi.cache_hit());
    assert_eq!(multi.layer_names(), vec!["cities", "peaks"]);
    assert_eq!(server.source.total_queries(), 2);
}

#[tokio::test]
async fn test_concurrent_requests_generate_once() {
    let server = TestServer::with_source(
        |m| MockFeatureSource::new(m).with_delay(Duration::from_millis(100)),
        None,
    );

    let requests = (0..8).map(|_| server.get("/collections/cities/tiles/WebMercatorQuad/5/11/16"));
    let responses = join_all(requests).await;

    assert_eq!(server.source.query_count("cities"), 1);
    for response in &responses {
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, responses[0].body);
    }
}

#[tokio::test]
async fn test_filtered_requests_are_not_shared() {
    let server = TestServer::new();
    let uri = "/collections/cities/tiles/WebMercatorQuad/0/0/0?kind=city";

    server.get(uri).await;
    server.get(uri).await;

    assert_eq!(server.source.query_count("cities"), 2);
}

#[tokio::test]
async fn test_corrupt_tile_is_regenerated() {
    let server = TestServer::new();
    let uri = "/collections/cities/tiles/WebMercatorQuad/0/0/0?f=json";
    let path = server
        .dataset
        .cache_dir()
        .join("WebMercatorQuad/0/0/0/cities.json");

    let first = server.get(uri).await;
    assert_eq!(first.status, StatusCode::OK);

    std::fs::write(&path, b"{\"type\": \"FeatureColl").unwrap();

    let repaired = server.get(uri).await;
    assert_eq!(repaired.status, StatusCode::OK);
    assert!(!repaired.cache_hit());
    assert_eq!(repaired.json()["numberReturned"], 2);

    let on_disk: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(on_disk["numberReturned"], 2);
    assert_eq!(server.source.query_count("cities"), 2);
}

#[tokio::test]
async fn test_memory_layer_honors_deleted_files() {
    let dataset = TestDataset::new();
    let cache = TileCache::new(dataset.cache_dir()).with_memory_capacity(1024 * 1024);
    let server = TestServer::with_cache(dataset, cache, MockFeatureSource::new, None);
    let uri = "/collections/cities/tiles/WebMercatorQuad/5/11/16";

    server.get(uri).await;
    let hit = server.get(uri).await;
    assert!(hit.cache_hit());

    let path = server
        .dataset
        .cache_dir()
        .join("WebMercatorQuad/5/11/16/cities.pbf");
    std::fs::remove_file(&path).unwrap();

    let regenerated = server.get(uri).await;
    assert_eq!(regenerated.status, StatusCode::OK);
    assert!(!regenerated.cache_hit());
    assert!(path.exists());
    assert_eq!(server.source.query_count("cities"), 2);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let server = TestServer::new();
    let uri = "/collections/cities/tiles/WebMercatorQuad/5/11/16";

    let first = server.get(uri).await;
    assert!(!first.cache_hit());

    // a second service over the same cache directory
    let (dataset, memory) = server.dataset.load();
    let source = Arc::new(MockFeatureSource::new(memory));
    let service = build_service(
        dataset,
        source.clone(),
        TileCache::new(server.dataset.cache_dir()),
        None,
    );
    let router = build_router(service, Arc::new(SeedingSupervisor::new()));

    let request = axum::http::Request::get(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let second = send(&router, request).await;
    assert_eq!(second.status, StatusCode::OK);
    assert!(second.cache_hit());
    assert_eq!(second.body, first.body);
    assert_eq!(source.total_queries(), 0);
}
