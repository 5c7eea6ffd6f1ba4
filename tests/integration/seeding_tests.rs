//! Seeding integration tests.
//!
//! Tests verify:
//! - A full seeding run fills the cache for later requests
//! - Restarted runs skip what is already cached
//! - Stopping through the API and resuming afterwards
//! - Failure accounting for partial multi-layer tiles

use std::time::Duration;

use axum::http::StatusCode;

use ogcapi_tiles::seeding::SeedingTarget;
use ogcapi_tiles::{SeedingConfig, SeedingPlan, SeedingProgress, SeedingTask, TaskState};

use super::test_utils::{MockFeatureSource, TestServer, SEEDING_TILE_COUNT};

/// Run one seeding task through the server's supervisor.
async fn seed(server: &TestServer, config: SeedingConfig) -> (TaskState, SeedingProgress) {
    let plan = SeedingPlan::build(&server.service);
    let task = SeedingTask::new(server.service.clone(), plan, config);
    let id = server.supervisor.spawn(task).await;
    let state = server.supervisor.wait(id).await.unwrap();
    let progress = server.supervisor.progress(id).await.unwrap();
    (state, progress)
}

#[tokio::test]
async fn test_seeding_plan_size() {
    let server = TestServer::new();
    let plan = SeedingPlan::build(&server.service);

    assert_eq!(plan.tile_count(), SEEDING_TILE_COUNT);
    // multi-layer tiles come first so their layers are reused
    let first = &plan.entries()[0];
    assert_eq!(first.target, SeedingTarget::MultiLayer);
    assert_eq!(first.tile_count(), 5);
}

#[tokio::test]
async fn test_seed_then_serve_from_cache() {
    let server = TestServer::new();

    let (state, progress) = seed(&server, SeedingConfig::default()).await;
    assert_eq!(state, TaskState::Completed);
    assert_eq!(progress.total_tile_count, SEEDING_TILE_COUNT);
    assert_eq!(progress.generated, 28);
    assert_eq!(progress.skipped, 5);
    assert_eq!(progress.failed, 0);
    assert_eq!(progress.fraction(), 1.0);

    let queries = server.source.total_queries();

    let multi = server.get("/tiles/WebMercatorQuad/1/0/1").await;
    assert_eq!(multi.status, StatusCode::OK);
    assert!(multi.cache_hit());

    let single = server
        .get("/collections/cities/tiles/WebMercatorQuad/2/1/2?f=json")
        .await;
    assert_eq!(single.status, StatusCode::OK);
    assert!(single.cache_hit());
    assert_eq!(single.json()["numberReturned"], 2);

    assert_eq!(server.source.total_queries(), queries);
}

#[tokio::test]
async fn test_seeding_status_endpoint() {
    let server = TestServer::new();
    seed(&server, SeedingConfig::default()).await;

    let response = server.get("/seeding").await;
    assert_eq!(response.status, StatusCode::OK);

    let json = response.json();
    assert_eq!(json["running"], false);
    assert_eq!(json["state"], "completed");
    assert_eq!(json["totalTileCount"], SEEDING_TILE_COUNT);
    assert_eq!(json["generated"], 28);
    assert_eq!(json["stopped"], false);
}

#[tokio::test]
async fn test_second_run_skips_everything() {
    let server = TestServer::new();

    seed(&server, SeedingConfig::default()).await;
    let queries = server.source.total_queries();

    let (state, progress) = seed(&server, SeedingConfig::default()).await;
    assert_eq!(state, TaskState::Completed);
    assert_eq!(progress.generated, 0);
    assert_eq!(progress.skipped, SEEDING_TILE_COUNT);
    assert_eq!(server.source.total_queries(), queries);
}

#[tokio::test]
async fn test_stop_through_api_and_resume() {
    let server = TestServer::with_source(
        |m| MockFeatureSource::new(m).with_delay(Duration::from_millis(20)),
        None,
    );

    let plan = SeedingPlan::build(&server.service);
    let task = SeedingTask::new(server.service.clone(), plan, SeedingConfig::default());
    let id = server.supervisor.spawn(task).await;

    while server
        .supervisor
        .progress(id)
        .await
        .is_some_and(|p| p.completed_count < 1.0)
    {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let response = server.post("/seeding/stop").await;
    assert_eq!(response.status, StatusCode::ACCEPTED);

    let state = server.supervisor.wait(id).await.unwrap();
    assert_eq!(state, TaskState::Stopped);
    let stopped = server.supervisor.progress(id).await.unwrap();
    assert!(stopped.stopped);
    assert!(stopped.generated >= 1);
    assert!(stopped.generated < 28);

    let status = server.get("/seeding").await.json();
    assert_eq!(status["state"], "stopped");

    let (state, resumed) = seed(&server, SeedingConfig::default()).await;
    assert_eq!(state, TaskState::Completed);
    assert_eq!(stopped.generated + resumed.generated, 28);
    assert_eq!(resumed.generated + resumed.skipped, SEEDING_TILE_COUNT);
}

#[tokio::test]
async fn test_partial_tiles_count_as_failed() {
    let server = TestServer::with_source(|m| MockFeatureSource::new(m).with_failing("peaks"), None);
    let config = SeedingConfig {
        max_consecutive_failures: 0,
        timeout_retries: 0,
    };

    let (state, progress) = seed(&server, config).await;
    assert_eq!(state, TaskState::Completed);
    assert_eq!(progress.failed, 5);
    assert_eq!(progress.skipped, 5);
    assert_eq!(progress.generated, 23);

    let multi = server
        .dataset
        .cache_dir()
        .join("WebMercatorQuad/0/0/0/cities,peaks.pbf");
    assert!(!multi.exists());
}

#[tokio::test]
async fn test_consecutive_failures_abort_the_run() {
    let server = TestServer::with_source(
        |m| {
            MockFeatureSource::new(m)
                .with_failing("cities")
                .with_failing("peaks")
        },
        None,
    );
    let config = SeedingConfig {
        max_consecutive_failures: 3,
        timeout_retries: 0,
    };

    let (state, progress) = seed(&server, config).await;
    assert_eq!(state, TaskState::Failed);
    assert_eq!(progress.failed, 3);
    assert!(progress.status_message.starts_with("failed"));
}
