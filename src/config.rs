//! Configuration management for the tile server.
//!
//! This module provides the command line of the `ogcapi-tiles` binary:
//! - Command-line arguments via clap
//! - Environment variables with `OGC_TILES_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Commands
//!
//! - `serve`: Run the HTTP server and seed in the background
//! - `seed`: Seed the cache in the foreground and exit
//! - `limits`: Print the tile ranges covering a bounding box
//!
//! # Environment Variables
//!
//! - `OGC_TILES_CONFIG` - Dataset definition file (required)
//! - `OGC_TILES_HOST` - Server bind address (default: 0.0.0.0)
//! - `OGC_TILES_PORT` - Server port (default: 8080)
//! - `OGC_TILES_CACHE_DIR` - Tile cache directory (default: ./tile-cache)
//! - `OGC_TILES_CACHE_MEMORY_SIZE` - Hot tile layer size in bytes, 0 disables it (default: 64MB)
//! - `OGC_TILES_CACHE_MAX_AGE` - HTTP cache max-age seconds (default: 3600)
//! - `OGC_TILES_CORS_ORIGINS` - Allowed CORS origins, comma-separated
//! - `OGC_TILES_QUERY_TIMEOUT_SECS` - Feature query timeout
//! - `OGC_TILES_MAX_CONSECUTIVE_FAILURES` - Seeding failure threshold, 0 never gives up (default: 50)
//! - `OGC_TILES_NO_SEEDING` - Do not seed on startup

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::crs::{BoundingBox, CRS84};
use crate::seeding::{SeedingConfig, DEFAULT_MAX_CONSECUTIVE_FAILURES};
use crate::tms::MinMax;

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default server port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default tile cache directory.
pub const DEFAULT_CACHE_DIR: &str = "./tile-cache";

/// Default size of the in-memory hot tile layer (64MB).
pub const DEFAULT_CACHE_MEMORY_SIZE: usize = 64 * 1024 * 1024;

/// Default HTTP cache max-age in seconds (1 hour).
pub const DEFAULT_CACHE_MAX_AGE: u32 = 3600;

/// Default tiling scheme of the `limits` command.
pub const DEFAULT_TILE_MATRIX_SET: &str = "WebMercatorQuad";

// =============================================================================
// CLI Arguments
// =============================================================================

/// OGC API tile server.
///
/// Serves vector tiles for the feature collections of a dataset and seeds a
/// filesystem tile cache in the background.
#[derive(Parser, Debug, Clone)]
#[command(name = "ogcapi-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the HTTP server.
    Serve(ServeConfig),

    /// Seed the tile cache and exit.
    Seed(SeedConfig),

    /// Print the tile matrix set limits covering a bounding box.
    Limits(LimitsConfig),
}

/// Dataset, cache and generation settings shared by `serve` and `seed`.
#[derive(Args, Debug, Clone)]
pub struct DatasetConfig {
    /// Dataset definition (JSON).
    #[arg(short, long, env = "OGC_TILES_CONFIG")]
    pub config: PathBuf,

    /// Directory of the tile cache.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "OGC_TILES_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Size of the in-memory hot tile layer in bytes (0 disables it).
    #[arg(long, default_value_t = DEFAULT_CACHE_MEMORY_SIZE, env = "OGC_TILES_CACHE_MEMORY_SIZE")]
    pub cache_memory_size: usize,

    /// Timeout for a single feature query in seconds.
    ///
    /// If not specified, queries never time out.
    #[arg(long, env = "OGC_TILES_QUERY_TIMEOUT_SECS")]
    pub query_timeout_secs: Option<u64>,

    /// Consecutive failed tiles after which seeding gives up (0 = never).
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONSECUTIVE_FAILURES,
        env = "OGC_TILES_MAX_CONSECUTIVE_FAILURES"
    )]
    pub max_consecutive_failures: u32,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl DatasetConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.config.as_os_str().is_empty() {
            return Err(
                "Dataset definition is required. Set --config or OGC_TILES_CONFIG".to_string(),
            );
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir must not be empty".to_string());
        }
        if self.query_timeout_secs == Some(0) {
            return Err("query_timeout_secs must be greater than 0".to_string());
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }

    pub fn seeding_config(&self) -> SeedingConfig {
        SeedingConfig {
            max_consecutive_failures: self.max_consecutive_failures,
            ..Default::default()
        }
    }
}

/// Settings of the `serve` command.
#[derive(Args, Debug, Clone)]
pub struct ServeConfig {
    #[command(flatten)]
    pub dataset: DatasetConfig,

    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "OGC_TILES_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "OGC_TILES_PORT")]
    pub port: u16,

    /// HTTP Cache-Control max-age in seconds.
    #[arg(long, default_value_t = DEFAULT_CACHE_MAX_AGE, env = "OGC_TILES_CACHE_MAX_AGE")]
    pub cache_max_age: u32,

    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "OGC_TILES_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    /// Do not seed the cache on startup.
    #[arg(long, default_value_t = false, env = "OGC_TILES_NO_SEEDING")]
    pub no_seeding: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl ServeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.dataset.validate()?;
        if self.host.is_empty() {
            return Err("host must not be empty".to_string());
        }
        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings of the `seed` command.
#[derive(Args, Debug, Clone)]
pub struct SeedConfig {
    #[command(flatten)]
    pub dataset: DatasetConfig,
}

impl SeedConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.dataset.validate()
    }
}

/// Settings of the `limits` command.
#[derive(Args, Debug, Clone)]
pub struct LimitsConfig {
    /// Tile matrix set id.
    #[arg(long, default_value = DEFAULT_TILE_MATRIX_SET)]
    pub tms: String,

    /// Bounding box in CRS84 as xmin,ymin,xmax,ymax.
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true, required = true)]
    pub bbox: Vec<f64>,

    /// Lowest level.
    #[arg(long, default_value_t = 0)]
    pub min_level: u8,

    /// Highest level.
    #[arg(long)]
    pub max_level: u8,
}

impl LimitsConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.bounding_box()?;
        if self.min_level > self.max_level {
            return Err(format!(
                "min_level ({}) must not exceed max_level ({})",
                self.min_level, self.max_level
            ));
        }
        Ok(())
    }

    pub fn bounding_box(&self) -> Result<BoundingBox, String> {
        let [xmin, ymin, xmax, ymax] = <[f64; 4]>::try_from(self.bbox.as_slice())
            .map_err(|_| "bbox must have four values: xmin,ymin,xmax,ymax".to_string())?;
        let bbox = BoundingBox::new(xmin, ymin, xmax, ymax, CRS84);
        if !bbox.is_valid() {
            return Err(format!("bbox is inverted or not finite: {bbox}"));
        }
        Ok(bbox)
    }

    pub fn levels(&self) -> MinMax {
        MinMax::new(self.min_level, self.max_level)
    }
}

// =============================================================================
// Tests
// =============================================================================
