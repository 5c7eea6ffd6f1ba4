//! ogcapi-tiles - An OGC API vector tile server.
//!
//! This binary starts the HTTP server, runs seeding and configures all components.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ogcapi_tiles::{
    config::{Cli, Command, DatasetConfig, LimitsConfig, SeedConfig, ServeConfig},
    crs::{CrsTransformerFactory, ProjTransformerFactory},
    dataset::Dataset,
    format::FormatRegistry,
    seeding::{SeedingPlan, SeedingSupervisor, SeedingTask, TaskState},
    server::{create_router, AppState, RouterConfig},
    tile::{TileCache, TileGenerator, TileService},
    tms::{GridWalker, TileCoordinateTransformer, TileMatrixSets},
};

/// Exit code of a seeding run stopped before completion.
const EXIT_STOPPED: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Serve(config) => run_serve(config).await,
        Command::Seed(config) => run_seed(config).await,
        Command::Limits(config) => run_limits(config),
    }
}

// =============================================================================
// Serve Command
// =============================================================================

async fn run_serve(config: ServeConfig) -> ExitCode {
    init_logging(config.dataset.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    print_banner();

    let service = match build_service(&config.dataset) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to load dataset: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log_configuration(&config.dataset, &service);

    let supervisor = Arc::new(SeedingSupervisor::new());
    if config.no_seeding {
        info!("  Seeding: disabled");
    } else if service.dataset().has_seeding() {
        let plan = SeedingPlan::build(&service);
        let task = SeedingTask::new(service.clone(), plan, config.dataset.seeding_config());
        let id = supervisor.spawn(task).await;
        info!("  Seeding: task {} started", id);
    } else {
        info!("  Seeding: nothing configured");
    }

    let state = AppState::new(service, supervisor.clone());
    let router = create_router(state, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/tileMatrixSets", addr);
    info!("    curl http://{}/collections/<collection>/tiles", addr);
    info!("    curl http://{}/seeding", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    let result = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Stopping seeding");
    supervisor.shutdown().await;

    if let Err(e) = result {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Print the startup banner.
fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    info!("");
    info!("  ogcapi-tiles");
    info!("  OGC API vector tile server");
    info!("");
    info!("  v{}", version);
}

fn log_configuration(config: &DatasetConfig, service: &TileService) {
    let dataset = service.dataset();
    info!("Configuration:");
    info!("  Dataset: {} ({})", dataset.label(), config.config.display());
    info!(
        "  Collections: {}",
        dataset
            .tiled_collections()
            .map(|c| c.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    if dataset.is_multi_layer_enabled() {
        info!("  Multi-layer tiles: enabled");
    }
    info!("  Cache: {}", service.cache().root().display());
    if config.cache_memory_size > 0 {
        info!(
            "  Hot tiles: {}MB",
            config.cache_memory_size / (1024 * 1024)
        );
    }
    match config.query_timeout() {
        Some(timeout) => info!("  Query timeout: {}s", timeout.as_secs()),
        None => warn!("  Query timeout: none - a hanging query blocks its tile"),
    }
}

/// Load the dataset and wire the tile service.
fn build_service(config: &DatasetConfig) -> Result<Arc<TileService>, String> {
    let crs: Arc<dyn CrsTransformerFactory> = Arc::new(ProjTransformerFactory::new());
    let tile_matrix_sets = TileMatrixSets::with_defaults();
    let formats = Arc::new(FormatRegistry::with_defaults());

    let (dataset, source) =
        Dataset::load(&config.config, crs.clone()).map_err(|e| e.to_string())?;
    dataset
        .validate(&tile_matrix_sets, &formats)
        .map_err(|e| e.to_string())?;

    let generator = TileGenerator::new(
        Arc::new(source),
        formats,
        TileCoordinateTransformer::new(crs),
    )
    .with_query_timeout(config.query_timeout());
    let cache = TileCache::new(&config.cache_dir).with_memory_capacity(config.cache_memory_size);

    Ok(Arc::new(TileService::new(
        Arc::new(dataset),
        Arc::new(tile_matrix_sets),
        generator,
        cache,
    )))
}

/// Resolve when ctrl-c is received.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Failed to listen for ctrl-c: {}", e),
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "ogcapi_tiles=debug,tower_http=debug"
    } else {
        "ogcapi_tiles=info,tower_http=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build RouterConfig from the application ServeConfig.
fn build_router_config(config: &ServeConfig) -> RouterConfig {
    let mut router_config = RouterConfig::new().with_cache_max_age(config.cache_max_age);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config.with_tracing(!config.no_tracing)
}

// =============================================================================
// Seed Command
// =============================================================================

async fn run_seed(config: SeedConfig) -> ExitCode {
    init_logging(config.dataset.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let service = match build_service(&config.dataset) {
        Ok(service) => service,
        Err(e) => {
            error!("Failed to load dataset: {}", e);
            return ExitCode::FAILURE;
        }
    };
    log_configuration(&config.dataset, &service);

    let plan = SeedingPlan::build(&service);
    if plan.is_empty() {
        info!("Nothing to seed");
        return ExitCode::SUCCESS;
    }

    let supervisor = SeedingSupervisor::new();
    let task = SeedingTask::new(service.clone(), plan, config.dataset.seeding_config());
    let id = supervisor.spawn(task).await;

    let wait = supervisor.wait(id);
    tokio::pin!(wait);
    let mut ticker = tokio::time::interval(Duration::from_secs(10));

    let state = loop {
        tokio::select! {
            state = &mut wait => break state,
            _ = ticker.tick() => {
                if let Some(progress) = supervisor.progress(id).await {
                    info!(
                        "{:.1}% - {}",
                        progress.fraction() * 100.0,
                        progress.status_message
                    );
                }
            }
            _ = shutdown_signal() => {
                supervisor.stop(id).await;
            }
        }
    };

    if let Some(progress) = supervisor.progress(id).await {
        println!("{}", progress.status_message);
    }

    match state {
        Some(TaskState::Completed) => ExitCode::SUCCESS,
        Some(TaskState::Stopped) => ExitCode::from(EXIT_STOPPED),
        _ => ExitCode::FAILURE,
    }
}

// =============================================================================
// Limits Command
// =============================================================================

fn run_limits(config: LimitsConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("Error: {}", e);
        return ExitCode::FAILURE;
    }

    let tile_matrix_sets = TileMatrixSets::with_defaults();
    let tms = match tile_matrix_sets.get(&config.tms) {
        Ok(tms) => tms,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let walker = GridWalker::new(TileCoordinateTransformer::new(Arc::new(
        ProjTransformerFactory::new(),
    )));
    let limits = config
        .bounding_box()
        .map_err(|e| e.to_string())
        .and_then(|bbox| {
            walker
                .limits_for_levels(&tms, config.levels(), &bbox)
                .map_err(|e| e.to_string())
        });

    let limits = match limits {
        Ok(limits) => limits,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let tile_count: u64 = limits.iter().map(|l| l.tile_count()).sum();
    let json = serde_json::json!({
        "tileMatrixSet": tms.id(),
        "tileMatrixSetLimits": limits,
        "tileCount": tile_count,
    });
    match serde_json::to_string_pretty(&json) {
        Ok(text) => {
            println!("{}", text);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
