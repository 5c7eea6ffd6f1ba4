//! Tile service layer.
//!
//! This module identifies tiles, generates their content and caches it on
//! disk, for both on-demand requests and seeding.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        HTTP Handlers / Seeding          │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │              Tile Service               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │  TileCache   │  │  TileGenerator  │  │
//! │  │  (files +    │  │  (query →       │  │
//! │  │   hot LRU)   │  │   encode)       │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             FeatureSource               │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Tile`]: Structural tile key (tile matrix set, level, row, col, collections, format)
//! - [`TileCache`]: Filesystem cache addressed by the tile key
//! - [`TileGenerator`]: Queries features and encodes single-layer and multi-layer tiles
//! - [`TileService`]: Resolves requests, checks the cache, generates once per key
//! - [`TileRequest`]: Parameters for a tile request
//! - [`TileResponse`]: Response containing tile data and metadata
//!
//! # Example
//!
//! ```no_run
//! use ogcapi_tiles::format::TileFormat;
//! use ogcapi_tiles::tile::{Tile, TileCache};
//! use ogcapi_tiles::tms::TileMatrixSet;
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cache = TileCache::new("/var/cache/tiles");
//!     let tms = TileMatrixSet::web_mercator_quad();
//!     let tile = Tile::new(&tms, 5, 11, 16, vec!["cities".into()], TileFormat::Mvt)?;
//!
//!     // /var/cache/tiles/WebMercatorQuad/5/11/16/cities.pbf
//!     println!("{}", cache.path(&tile).display());
//!
//!     if cache.get(&tile).await?.is_none() {
//!         cache.put(&tile, Bytes::new()).await?;
//!     }
//!     Ok(())
//! }
//! ```

mod cache;
mod generator;
mod identity;
mod service;

pub use cache::{TileCache, TEMPORARY_DIR};
pub use generator::{MultiLayerOutcome, QueryOptions, TileGenerator};
pub use identity::Tile;
pub use service::{SeedOutcome, TileRequest, TileResponse, TileService, TileSetSummary};
