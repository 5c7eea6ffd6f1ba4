//! Tile matrix sets and the grid computations built on them.
//!
//! A [`TileMatrixSet`] is a quad-tree tiling scheme over the extent of a CRS:
//! level 0 has `width0 x height0` tiles and every following level splits
//! each tile into four. Rows count downwards from the top-left origin.
//!
//! ```text
//!   level 1 (WebMercatorQuad)
//!   +---------+---------+  <- ymax (origin row 0)
//!   | r0 c0   | r0 c1   |
//!   +---------+---------+
//!   | r1 c0   | r1 c1   |
//!   +---------+---------+  <- ymin
//!   xmin               xmax
//! ```
//!
//! - [`TileCoordinateTransformer`] moves tile footprints into other CRSs
//!   and derives simplification tolerances.
//! - [`GridWalker`] computes [`TileMatrixSetLimits`] for a bounding box.

mod limits;
mod transformer;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::crs::{BoundingBox, EpsgCrs, CRS84, WEB_MERCATOR};
use crate::error::TileError;

pub use limits::{GridWalker, MinMax, TileMatrixSetLimits};
pub use transformer::TileCoordinateTransformer;

/// Standardized rendering pixel size in meters (OGC 2D tile matrix set).
pub const STANDARD_PIXEL_SIZE: f64 = 0.00028;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

const WEB_MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;

/// A named quad-tree tiling scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrixSet {
    id: String,
    title: String,
    extent: BoundingBox,
    width0: u32,
    height0: u32,
    tile_size: u32,
    max_level: u8,
}

impl TileMatrixSet {
    /// Create a quad-tree scheme over `extent`, in the CRS of the extent.
    ///
    /// Level 0 has `width0 x height0` tiles of `tile_size` pixels.
    pub fn quad(
        id: impl Into<String>,
        title: impl Into<String>,
        extent: BoundingBox,
        width0: u32,
        height0: u32,
        max_level: u8,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            extent,
            width0: width0.max(1),
            height0: height0.max(1),
            tile_size: DEFAULT_TILE_SIZE,
            max_level: max_level.min(30),
        }
    }

    /// Google Maps compatible scheme in spherical Web Mercator.
    pub fn web_mercator_quad() -> Self {
        Self::quad(
            "WebMercatorQuad",
            "Google Maps Compatible for the World",
            BoundingBox::new(
                -WEB_MERCATOR_HALF_EXTENT,
                -WEB_MERCATOR_HALF_EXTENT,
                WEB_MERCATOR_HALF_EXTENT,
                WEB_MERCATOR_HALF_EXTENT,
                WEB_MERCATOR,
            ),
            1,
            1,
            24,
        )
    }

    /// CRS84 scheme with two tiles at level 0.
    pub fn world_crs84_quad() -> Self {
        Self::quad(
            "WorldCRS84Quad",
            "CRS84 for the World",
            BoundingBox::new(-180.0, -90.0, 180.0, 90.0, CRS84),
            2,
            1,
            17,
        )
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// The native CRS of the scheme.
    pub fn crs(&self) -> EpsgCrs {
        self.extent.crs
    }

    /// Full extent of the scheme in its native CRS.
    pub fn extent(&self) -> BoundingBox {
        self.extent
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn min_level(&self) -> u8 {
        0
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    /// Level range as a [`MinMax`].
    pub fn levels(&self) -> MinMax {
        MinMax::new(0, self.max_level)
    }

    /// Number of tile columns at `level`.
    pub fn matrix_width(&self, level: u8) -> u32 {
        self.width0 << level.min(self.max_level)
    }

    /// Number of tile rows at `level`.
    pub fn matrix_height(&self, level: u8) -> u32 {
        self.height0 << level.min(self.max_level)
    }

    /// Number of rows and columns at `level` for square schemes; the number of
    /// rows otherwise.
    pub fn matrix_dimension(&self, level: u8) -> u32 {
        self.matrix_height(level)
    }

    pub fn check_level(&self, level: u8) -> Result<(), TileError> {
        if level > self.max_level {
            return Err(self.invalid(level, 0, 0, format!("level must be 0..={}", self.max_level)));
        }
        Ok(())
    }

    /// Check that `(level, row, col)` addresses a tile of this scheme.
    pub fn validate(&self, level: u8, row: u32, col: u32) -> Result<(), TileError> {
        self.check_level(level)?;
        let height = self.matrix_height(level);
        if row >= height {
            return Err(self.invalid(level, row, col, format!("row must be < {height}")));
        }
        let width = self.matrix_width(level);
        if col >= width {
            return Err(self.invalid(level, row, col, format!("col must be < {width}")));
        }
        Ok(())
    }

    /// Scale denominator at `level` for the standardized 0.28mm pixel.
    pub fn scale_denominator(&self, level: u8) -> Result<f64, TileError> {
        Ok(self.cell_size(level)? * self.crs().meters_per_unit() / STANDARD_PIXEL_SIZE)
    }

    /// Size of one pixel at `level` in CRS units.
    pub fn cell_size(&self, level: u8) -> Result<f64, TileError> {
        self.check_level(level)?;
        Ok(self.tile_width(level) / f64::from(self.tile_size))
    }

    fn tile_width(&self, level: u8) -> f64 {
        self.extent.width() / f64::from(self.matrix_width(level))
    }

    fn tile_height(&self, level: u8) -> f64 {
        self.extent.height() / f64::from(self.matrix_height(level))
    }

    /// Footprint of a tile in the native CRS.
    ///
    /// Edges are computed from the integer tile index, so neighbouring tiles
    /// share identical edge coordinates.
    pub fn tile_bounding_box(&self, level: u8, row: u32, col: u32) -> Result<BoundingBox, TileError> {
        self.validate(level, row, col)?;

        let tile_width = self.tile_width(level);
        let tile_height = self.tile_height(level);
        let e = &self.extent;

        Ok(BoundingBox::new(
            e.xmin + f64::from(col) * tile_width,
            e.ymax - f64::from(row + 1) * tile_height,
            e.xmin + f64::from(col + 1) * tile_width,
            e.ymax - f64::from(row) * tile_height,
            e.crs,
        ))
    }

    fn invalid(&self, level: u8, row: u32, col: u32, reason: String) -> TileError {
        TileError::InvalidTileCoordinate {
            tile_matrix_set: self.id.clone(),
            level,
            row,
            col,
            reason,
        }
    }
}

/// The tile matrix sets known to the service, registered once at startup.
#[derive(Debug, Clone, Default)]
pub struct TileMatrixSets {
    sets: BTreeMap<String, Arc<TileMatrixSet>>,
}

impl TileMatrixSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// `WebMercatorQuad` and `WorldCRS84Quad`.
    pub fn with_defaults() -> Self {
        Self::new()
            .with(TileMatrixSet::web_mercator_quad())
            .with(TileMatrixSet::world_crs84_quad())
    }

    pub fn with(mut self, tms: TileMatrixSet) -> Self {
        self.sets.insert(tms.id().to_string(), Arc::new(tms));
        self
    }

    pub fn get(&self, id: &str) -> Result<Arc<TileMatrixSet>, TileError> {
        self.sets
            .get(id)
            .cloned()
            .ok_or_else(|| TileError::UnknownTileMatrixSet { id: id.to_string() })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sets.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<TileMatrixSet>> {
        self.sets.values()
    }
}
