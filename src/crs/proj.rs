//! CRS transformations backed by proj4rs.
//!
//! Web Mercator to and from WGS 84 is computed inline since it is by far the
//! most frequent pair (every `WebMercatorQuad` tile footprint goes through
//! it). Everything else goes through proj4rs with PROJ.4 definitions from a
//! small built-in table.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use proj4rs::proj::Proj;
use proj4rs::transform::transform;

use super::{CrsTransformer, CrsTransformerFactory, EpsgCrs, EPSG_WEB_MERCATOR, EPSG_WGS84};
use crate::error::CrsError;

/// Half the circumference of the Web Mercator sphere in meters.
const HALF_EARTH: f64 = 20_037_508.342_789_244;

/// Latitude where Web Mercator y reaches `HALF_EARTH`.
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// PROJ.4 definition for an EPSG code, if it is in the built-in table.
fn proj_string(code: u32) -> Option<String> {
    let def = match code {
        4326 => "+proj=longlat +datum=WGS84 +no_defs".to_string(),
        4258 => "+proj=longlat +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +no_defs".to_string(),
        4269 => "+proj=longlat +datum=NAD83 +no_defs".to_string(),
        3857 => "+proj=merc +a=6378137 +b=6378137 +lat_ts=0 +lon_0=0 +x_0=0 +y_0=0 +k=1 +units=m +no_defs".to_string(),
        3395 => "+proj=merc +lon_0=0 +k=1 +x_0=0 +y_0=0 +datum=WGS84 +units=m +no_defs".to_string(),
        3035 => "+proj=laea +lat_0=52 +lon_0=10 +x_0=4321000 +y_0=3210000 +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs".to_string(),
        32601..=32660 => format!("+proj=utm +zone={} +datum=WGS84 +units=m +no_defs", code - 32600),
        32701..=32760 => format!("+proj=utm +zone={} +south +datum=WGS84 +units=m +no_defs", code - 32700),
        25828..=25838 => format!(
            "+proj=utm +zone={} +ellps=GRS80 +towgs84=0,0,0,0,0,0,0 +units=m +no_defs",
            code - 25800
        ),
        _ => return None,
    };
    Some(def)
}

#[inline]
fn lon_to_merc_x(lon: f64) -> f64 {
    lon * HALF_EARTH / 180.0
}

#[inline]
fn lat_to_merc_y(lat: f64) -> f64 {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    ((90.0 + lat) * PI / 360.0).tan().ln() * HALF_EARTH / PI
}

#[inline]
fn merc_x_to_lon(x: f64) -> f64 {
    x * 180.0 / HALF_EARTH
}

#[inline]
fn merc_y_to_lat(y: f64) -> f64 {
    let y_rad = y * PI / HALF_EARTH;
    (2.0 * y_rad.exp().atan() - PI / 2.0) * 180.0 / PI
}

enum Strategy {
    Identity,
    MercatorToGeographic,
    GeographicToMercator,
    Proj4 {
        source: Box<Proj>,
        target: Box<Proj>,
        source_geographic: bool,
        target_geographic: bool,
    },
}

/// A transformer between two EPSG reference systems.
pub struct ProjTransformer {
    source: EpsgCrs,
    target: EpsgCrs,
    swap_input: bool,
    swap_output: bool,
    strategy: Strategy,
}

impl ProjTransformer {
    fn new(source: EpsgCrs, target: EpsgCrs) -> Result<Self, CrsError> {
        let strategy = if source.code() == target.code() {
            Strategy::Identity
        } else if source.code() == EPSG_WEB_MERCATOR && target.code() == EPSG_WGS84 {
            Strategy::MercatorToGeographic
        } else if source.code() == EPSG_WGS84 && target.code() == EPSG_WEB_MERCATOR {
            Strategy::GeographicToMercator
        } else {
            let source_def = proj_string(source.code())
                .ok_or_else(|| CrsError::UnsupportedCrs(source.to_string()))?;
            let target_def = proj_string(target.code())
                .ok_or_else(|| CrsError::UnsupportedCrs(target.to_string()))?;

            let source_proj =
                Proj::from_proj_string(&source_def).map_err(|e| CrsError::NoTransformation {
                    from: source.to_string(),
                    to: target.to_string(),
                    reason: format!("invalid source definition: {e:?}"),
                })?;
            let target_proj =
                Proj::from_proj_string(&target_def).map_err(|e| CrsError::NoTransformation {
                    from: source.to_string(),
                    to: target.to_string(),
                    reason: format!("invalid target definition: {e:?}"),
                })?;

            Strategy::Proj4 {
                source: Box::new(source_proj),
                target: Box::new(target_proj),
                source_geographic: source.is_geographic(),
                target_geographic: target.is_geographic(),
            }
        };

        Ok(Self {
            source,
            target,
            swap_input: needs_swap(source),
            swap_output: needs_swap(target),
            strategy,
        })
    }

    fn numeric_error(&self, x: f64, y: f64, reason: impl Into<String>) -> CrsError {
        CrsError::Numeric {
            x,
            y,
            from: self.source.to_string(),
            to: self.target.to_string(),
            reason: reason.into(),
        }
    }
}

impl CrsTransformer for ProjTransformer {
    fn source_crs(&self) -> EpsgCrs {
        self.source
    }

    fn target_crs(&self) -> EpsgCrs {
        self.target
    }

    fn transform(&self, x: f64, y: f64) -> Result<(f64, f64), CrsError> {
        let (in_x, in_y) = if self.swap_input { (y, x) } else { (x, y) };

        let (out_x, out_y) = match &self.strategy {
            Strategy::Identity => (in_x, in_y),
            Strategy::MercatorToGeographic => (merc_x_to_lon(in_x), merc_y_to_lat(in_y)),
            Strategy::GeographicToMercator => (lon_to_merc_x(in_x), lat_to_merc_y(in_y)),
            Strategy::Proj4 {
                source,
                target,
                source_geographic,
                target_geographic,
            } => {
                let mut point = if *source_geographic {
                    (in_x.to_radians(), in_y.to_radians(), 0.0)
                } else {
                    (in_x, in_y, 0.0)
                };
                transform(source, target, &mut point)
                    .map_err(|e| self.numeric_error(x, y, format!("{e:?}")))?;
                if *target_geographic {
                    (point.0.to_degrees(), point.1.to_degrees())
                } else {
                    (point.0, point.1)
                }
            }
        };

        if !out_x.is_finite() || !out_y.is_finite() {
            return Err(self.numeric_error(x, y, "result is not finite"));
        }

        if self.swap_output {
            Ok((out_y, out_x))
        } else {
            Ok((out_x, out_y))
        }
    }
}

fn needs_swap(crs: EpsgCrs) -> bool {
    crs.is_geographic() && !crs.is_forced_lon_lat()
}

/// [`CrsTransformerFactory`] using proj4rs, caching one transformer per pair.
#[derive(Default)]
pub struct ProjTransformerFactory {
    transformers: Mutex<HashMap<(EpsgCrs, EpsgCrs), Arc<dyn CrsTransformer>>>,
}

impl ProjTransformerFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CrsTransformerFactory for ProjTransformerFactory {
    fn is_supported(&self, crs: EpsgCrs) -> bool {
        proj_string(crs.code()).is_some()
    }

    fn needs_axis_swap(&self, crs: EpsgCrs) -> bool {
        needs_swap(crs)
    }

    fn transformer(
        &self,
        source: EpsgCrs,
        target: EpsgCrs,
    ) -> Result<Arc<dyn CrsTransformer>, CrsError> {
        let key = (source, target);
        if let Ok(cache) = self.transformers.lock() {
            if let Some(existing) = cache.get(&key) {
                return Ok(Arc::clone(existing));
            }
        }

        let created: Arc<dyn CrsTransformer> = Arc::new(ProjTransformer::new(source, target)?);
        if let Ok(mut cache) = self.transformers.lock() {
            cache.insert(key, Arc::clone(&created));
        }
        Ok(created)
    }
}
