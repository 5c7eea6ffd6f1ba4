//! Coordinate reference systems and bounding boxes.
//!
//! The tile core treats coordinate transformation as an external service:
//! it asks a [`CrsTransformerFactory`] for a [`CrsTransformer`] between two
//! reference systems and uses it to move points and bounding boxes around.
//! [`ProjTransformerFactory`] is the implementation shipped with the crate.
//!
//! Coordinates inside a [`BoundingBox`] always follow the axis order of its
//! CRS. [`CRS84`] is longitude/latitude, `EPSG:4326` proper is
//! latitude/longitude, and projected systems are easting/northing.

mod proj;

use std::fmt;
use std::sync::Arc;

use crate::error::CrsError;

pub use proj::ProjTransformerFactory;

/// EPSG code of WGS 84 geographic coordinates.
pub const EPSG_WGS84: u32 = 4326;

/// EPSG code of the spherical Web Mercator projection.
pub const EPSG_WEB_MERCATOR: u32 = 3857;

/// WGS 84 with longitude/latitude axis order.
pub const CRS84: EpsgCrs = EpsgCrs {
    code: EPSG_WGS84,
    force_lon_lat: true,
};

/// Spherical Web Mercator.
pub const WEB_MERCATOR: EpsgCrs = EpsgCrs::new(EPSG_WEB_MERCATOR);

/// A coordinate reference system identified by its EPSG code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpsgCrs {
    code: u32,
    force_lon_lat: bool,
}

impl EpsgCrs {
    /// A CRS with the axis order defined by the EPSG registry.
    pub const fn new(code: u32) -> Self {
        Self {
            code,
            force_lon_lat: false,
        }
    }

    /// A CRS with longitude/latitude order even where EPSG defines latitude first.
    pub const fn lon_lat(code: u32) -> Self {
        Self {
            code,
            force_lon_lat: true,
        }
    }

    pub fn code(&self) -> u32 {
        self.code
    }

    pub fn is_forced_lon_lat(&self) -> bool {
        self.force_lon_lat
    }

    /// Whether coordinates are angles (degrees) rather than lengths.
    pub fn is_geographic(&self) -> bool {
        matches!(self.code, 4326 | 4258 | 4269 | 4267 | 4979)
    }

    /// The OGC URI of this CRS.
    pub fn uri(&self) -> String {
        if *self == CRS84 {
            "http://www.opengis.net/def/crs/OGC/1.3/CRS84".to_string()
        } else {
            format!("http://www.opengis.net/def/crs/EPSG/0/{}", self.code)
        }
    }

    /// Length of one CRS unit in meters at the equator.
    pub fn meters_per_unit(&self) -> f64 {
        if self.is_geographic() {
            2.0 * std::f64::consts::PI * 6_378_137.0 / 360.0
        } else {
            1.0
        }
    }
}

impl fmt::Display for EpsgCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == CRS84 {
            write!(f, "CRS84")
        } else if self.force_lon_lat {
            write!(f, "EPSG:{} (lon/lat)", self.code)
        } else {
            write!(f, "EPSG:{}", self.code)
        }
    }
}

/// An axis-aligned rectangle in a given CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub crs: EpsgCrs,
}

impl BoundingBox {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64, crs: EpsgCrs) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            crs,
        }
    }

    /// Build a box from `[xmin, ymin, xmax, ymax]`.
    pub fn from_array(coords: [f64; 4], crs: EpsgCrs) -> Self {
        Self::new(coords[0], coords[1], coords[2], coords[3], crs)
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    /// Whether the two boxes share at least one point. Both must be in the same CRS.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    /// The smallest box containing both boxes. Keeps the CRS of `self`.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
            crs: self.crs,
        }
    }

    /// Whether the box has finite coordinates and `min <= max` on both axes.
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.xmin <= self.xmax
            && self.ymin <= self.ymax
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}] ({})",
            self.xmin, self.ymin, self.xmax, self.ymax, self.crs
        )
    }
}

/// Transforms coordinates from one CRS into another.
pub trait CrsTransformer: Send + Sync {
    fn source_crs(&self) -> EpsgCrs;

    fn target_crs(&self) -> EpsgCrs;

    /// Transform a single coordinate, in the axis order of the source CRS.
    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), CrsError>;

    /// Transform a bounding box.
    ///
    /// Corners and edge midpoints are transformed and the result is their
    /// envelope, so curved edges in the target CRS are approximated.
    fn transform_bounding_box(&self, bbox: &BoundingBox) -> Result<BoundingBox, CrsError> {
        let mid_x = (bbox.xmin + bbox.xmax) / 2.0;
        let mid_y = (bbox.ymin + bbox.ymax) / 2.0;
        let samples = [
            (bbox.xmin, bbox.ymin),
            (bbox.xmax, bbox.ymin),
            (bbox.xmax, bbox.ymax),
            (bbox.xmin, bbox.ymax),
            (mid_x, bbox.ymin),
            (mid_x, bbox.ymax),
            (bbox.xmin, mid_y),
            (bbox.xmax, mid_y),
        ];

        let mut out = BoundingBox::new(
            f64::INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::NEG_INFINITY,
            self.target_crs(),
        );
        for (x, y) in samples {
            let (tx, ty) = self.transform(x, y)?;
            out.xmin = out.xmin.min(tx);
            out.ymin = out.ymin.min(ty);
            out.xmax = out.xmax.max(tx);
            out.ymax = out.ymax.max(ty);
        }
        Ok(out)
    }
}

/// The CRS transformation service consumed by the tile core.
pub trait CrsTransformerFactory: Send + Sync {
    /// Whether transformations from or to this CRS are available.
    fn is_supported(&self, crs: EpsgCrs) -> bool;

    /// Whether the axis order of the CRS is latitude first, i.e. coordinates
    /// must be swapped relative to the usual x/y order.
    fn needs_axis_swap(&self, crs: EpsgCrs) -> bool;

    /// A transformer from `source` to `target`.
    fn transformer(
        &self,
        source: EpsgCrs,
        target: EpsgCrs,
    ) -> Result<Arc<dyn CrsTransformer>, CrsError>;
}
