use std::sync::Arc;

use super::TileMatrixSet;
use crate::crs::{BoundingBox, CrsTransformerFactory, EpsgCrs};
use crate::error::{CrsError, TileError};

/// Moves tile footprints between reference systems.
///
/// All numeric work is delegated to the [`CrsTransformerFactory`]. Failures
/// are returned to the caller, which decides whether to skip the tile.
#[derive(Clone)]
pub struct TileCoordinateTransformer {
    crs: Arc<dyn CrsTransformerFactory>,
}

impl TileCoordinateTransformer {
    pub fn new(crs: Arc<dyn CrsTransformerFactory>) -> Self {
        Self { crs }
    }

    pub fn crs_service(&self) -> &Arc<dyn CrsTransformerFactory> {
        &self.crs
    }

    /// Transform `bbox` into `target`. Returns the box unchanged when the CRS already matches.
    pub fn transform_bounding_box(
        &self,
        bbox: &BoundingBox,
        target: EpsgCrs,
    ) -> Result<BoundingBox, CrsError> {
        if bbox.crs == target {
            return Ok(*bbox);
        }
        self.crs
            .transformer(bbox.crs, target)?
            .transform_bounding_box(bbox)
    }

    /// Footprint of a tile in `target`.
    pub fn tile_bounding_box(
        &self,
        tms: &TileMatrixSet,
        level: u8,
        row: u32,
        col: u32,
        target: EpsgCrs,
    ) -> Result<BoundingBox, TileError> {
        let native = tms.tile_bounding_box(level, row, col)?;
        Ok(self.transform_bounding_box(&native, target)?)
    }

    /// Simplification tolerance for a tile, in units of `target`.
    ///
    /// This is the width of one pixel of the tile once its footprint is
    /// transformed into `target`.
    pub fn max_allowable_offset(
        &self,
        tms: &TileMatrixSet,
        level: u8,
        row: u32,
        col: u32,
        target: EpsgCrs,
    ) -> Result<f64, TileError> {
        let bbox = self.tile_bounding_box(tms, level, row, col, target)?;
        Ok(bbox.width() / f64::from(tms.tile_size()))
    }

    pub fn needs_axis_swap(&self, crs: EpsgCrs) -> bool {
        self.crs.needs_axis_swap(crs)
    }
}
