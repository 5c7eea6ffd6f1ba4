use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::{TileCoordinateTransformer, TileMatrixSet};
use crate::crs::BoundingBox;
use crate::error::TileError;

/// An inclusive zoom level range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MinMax {
    pub min: u8,
    pub max: u8,
}

impl MinMax {
    /// Create a range. `min` and `max` are swapped if given in the wrong order.
    pub fn new(min: u8, max: u8) -> Self {
        Self {
            min: min.min(max),
            max: max.max(min),
        }
    }

    pub fn contains(&self, level: u8) -> bool {
        (self.min..=self.max).contains(&level)
    }

    pub fn levels(&self) -> RangeInclusive<u8> {
        self.min..=self.max
    }

    /// The overlap of two ranges, if any.
    pub fn intersect(&self, other: &MinMax) -> Option<MinMax> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        (min <= max).then_some(MinMax { min, max })
    }

    /// The smallest range covering both.
    pub fn span(&self, other: &MinMax) -> MinMax {
        MinMax {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

/// Inclusive row and column range of a tile matrix covering some area.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TileMatrixSetLimits {
    pub tile_matrix: String,
    pub min_tile_row: u32,
    pub max_tile_row: u32,
    pub min_tile_col: u32,
    pub max_tile_col: u32,
    #[serde(skip)]
    pub level: u8,
}

impl TileMatrixSetLimits {
    pub fn tile_count(&self) -> u64 {
        let rows = u64::from(self.max_tile_row - self.min_tile_row) + 1;
        let cols = u64::from(self.max_tile_col - self.min_tile_col) + 1;
        rows * cols
    }

    pub fn contains(&self, row: u32, col: u32) -> bool {
        (self.min_tile_row..=self.max_tile_row).contains(&row)
            && (self.min_tile_col..=self.max_tile_col).contains(&col)
    }

    /// All `(row, col)` pairs, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (self.min_tile_row..=self.max_tile_row)
            .flat_map(move |row| (self.min_tile_col..=self.max_tile_col).map(move |col| (row, col)))
    }
}

/// Finds the tiles of a tile matrix set that cover a bounding box.
///
/// The search happens in the CRS of the bounding box: tile footprints are
/// transformed into it and compared edge by edge, one tile at a time,
/// starting from row 0 and column 0. Once the first tile past the lower
/// bound is found the index steps back by one unless it is already 0, and
/// the upper bound gets one extra tile clamped to the matrix. The result may
/// therefore contain one tile of margin on each side.
#[derive(Clone)]
pub struct GridWalker {
    transformer: TileCoordinateTransformer,
}

impl GridWalker {
    pub fn new(transformer: TileCoordinateTransformer) -> Self {
        Self { transformer }
    }

    /// Limits for one level.
    pub fn limits(
        &self,
        tms: &TileMatrixSet,
        level: u8,
        bbox: &BoundingBox,
    ) -> Result<TileMatrixSetLimits, TileError> {
        tms.check_level(level)?;
        let target = bbox.crs;
        let last_col = tms.matrix_width(level) - 1;
        let last_row = tms.matrix_height(level) - 1;

        let tile = |row: u32, col: u32| {
            self.transformer
                .tile_bounding_box(tms, level, row, col, target)
        };

        let mut col = 0;
        while col < last_col && tile(0, col)?.xmax <= bbox.xmin {
            col += 1;
        }
        let first_col = col;
        let min_col = if col != 0 { col - 1 } else { col };

        let mut col = first_col;
        while col < last_col && tile(0, col)?.xmax < bbox.xmax {
            col += 1;
        }
        let max_col = (col + 1).min(last_col);

        let mut row = 0;
        while row < last_row && tile(row, first_col)?.ymin >= bbox.ymax {
            row += 1;
        }
        let first_row = row;
        let min_row = if row != 0 { row - 1 } else { row };

        let mut row = first_row;
        while row < last_row && tile(row, first_col)?.ymin > bbox.ymin {
            row += 1;
        }
        let max_row = (row + 1).min(last_row);

        Ok(TileMatrixSetLimits {
            tile_matrix: level.to_string(),
            min_tile_row: min_row,
            max_tile_row: max_row,
            min_tile_col: min_col,
            max_tile_col: max_col,
            level,
        })
    }

    /// Limits for every level in `levels`, lowest level first.
    pub fn limits_for_levels(
        &self,
        tms: &TileMatrixSet,
        levels: MinMax,
        bbox: &BoundingBox,
    ) -> Result<Vec<TileMatrixSetLimits>, TileError> {
        levels
            .levels()
            .map(|level| self.limits(tms, level, bbox))
            .collect()
    }
}
