use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use geo::{BoundingRect, Coord, Geometry, LineString, MapCoords, MultiLineString, Simplify};
use geojson::GeoJson;

use super::{Feature, FeatureId, FeatureQuery, FeatureSource, FeatureStream};
use crate::crs::{BoundingBox, CrsTransformer, CrsTransformerFactory, EpsgCrs, CRS84};
use crate::error::{ConfigError, QueryError};

/// A feature source holding whole collections in memory.
///
/// Features are stored in CRS84. Queries select features whose geometry
/// envelope intersects the query footprint, apply the attribute filter and
/// the property projection, then transform and simplify the geometries.
pub struct MemoryFeatureSource {
    crs: EpsgCrs,
    collections: HashMap<String, Arc<Vec<Feature>>>,
    transformers: Arc<dyn CrsTransformerFactory>,
}

impl fmt::Debug for MemoryFeatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts: Vec<_> = self
            .collections
            .iter()
            .map(|(id, features)| (id.as_str(), features.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("MemoryFeatureSource")
            .field("crs", &self.crs)
            .field("collections", &counts)
            .finish_non_exhaustive()
    }
}

impl MemoryFeatureSource {
    pub fn new(transformers: Arc<dyn CrsTransformerFactory>) -> Self {
        Self {
            crs: CRS84,
            collections: HashMap::new(),
            transformers,
        }
    }

    pub fn with_collection(mut self, id: impl Into<String>, features: Vec<Feature>) -> Self {
        self.insert(id, features);
        self
    }

    pub fn insert(&mut self, id: impl Into<String>, features: Vec<Feature>) {
        self.collections.insert(id.into(), Arc::new(features));
    }

    pub fn contains(&self, id: &str) -> bool {
        self.collections.contains_key(id)
    }

    /// Envelope of all geometries of a collection, in CRS84.
    pub fn extent(&self, id: &str) -> Option<BoundingBox> {
        self.collections
            .get(id)?
            .iter()
            .filter_map(|f| f.geometry.as_ref().and_then(|g| g.bounding_rect()))
            .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y, self.crs))
            .reduce(|a, b| a.union(&b))
    }

    fn prepare(
        &self,
        feature: &Feature,
        geometry: &Geometry<f64>,
        output: Option<&dyn CrsTransformer>,
        query: &FeatureQuery,
    ) -> Result<Feature, QueryError> {
        let geometry = match output {
            Some(transformer) => geometry.try_map_coords(|c: Coord<f64>| {
                transformer
                    .transform(c.x, c.y)
                    .map(|(x, y)| Coord { x, y })
            })?,
            None => geometry.clone(),
        };

        let properties = match &query.properties {
            Some(keep) => feature
                .properties
                .iter()
                .filter(|(key, _)| keep.iter().any(|k| k == *key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => feature.properties.clone(),
        };

        Ok(Feature {
            id: feature.id.clone(),
            geometry: Some(simplify(geometry, query.max_allowable_offset)),
            properties,
        })
    }
}

#[async_trait]
impl FeatureSource for MemoryFeatureSource {
    async fn query(&self, query: &FeatureQuery) -> Result<FeatureStream, QueryError> {
        let features = self
            .collections
            .get(&query.collection)
            .cloned()
            .ok_or_else(|| QueryError::UnknownCollection(query.collection.clone()))?;

        let bbox = if query.bbox.crs == self.crs {
            query.bbox
        } else {
            self.transformers
                .transformer(query.bbox.crs, self.crs)?
                .transform_bounding_box(&query.bbox)?
        };

        let output = if query.crs == self.crs {
            None
        } else {
            Some(self.transformers.transformer(self.crs, query.crs)?)
        };

        let mut results = Vec::new();
        for feature in features.iter() {
            let Some(geometry) = &feature.geometry else {
                continue;
            };
            let Some(rect) = geometry.bounding_rect() else {
                continue;
            };
            let envelope =
                BoundingBox::new(rect.min().x, rect.min().y, rect.max().x, rect.max().y, self.crs);
            if !envelope.intersects(&bbox) || !feature.matches(&query.filter) {
                continue;
            }
            results.push(self.prepare(feature, geometry, output.as_deref(), query));
        }

        Ok(stream::iter(results).boxed())
    }
}

/// Douglas-Peucker simplification of lines and polygons; points pass through.
fn simplify(geometry: Geometry<f64>, epsilon: f64) -> Geometry<f64> {
    if epsilon <= 0.0 {
        return geometry;
    }

    // geo panics on lines with fewer than two points
    let simplify_line = |line: &LineString<f64>| {
        if line.0.len() < 2 {
            line.clone()
        } else {
            line.simplify(&epsilon)
        }
    };

    match geometry {
        Geometry::LineString(line) => Geometry::LineString(simplify_line(&line)),
        Geometry::MultiLineString(lines) => Geometry::MultiLineString(MultiLineString::new(
            lines.0.iter().map(simplify_line).collect(),
        )),
        Geometry::Polygon(polygon) => Geometry::Polygon(polygon.simplify(&epsilon)),
        Geometry::MultiPolygon(polygons) => Geometry::MultiPolygon(polygons.simplify(&epsilon)),
        other => other,
    }
}

fn parse_features(text: &str) -> Result<Vec<Feature>, String> {
    let geojson: GeoJson = text.parse().map_err(|e: geojson::Error| e.to_string())?;

    let features = match geojson {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![geojson::Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };

    features
        .into_iter()
        .map(|feature| {
            let geometry = feature
                .geometry
                .map(Geometry::<f64>::try_from)
                .transpose()
                .map_err(|e| e.to_string())?;
            let id = feature.id.map(|id| match id {
                geojson::feature::Id::String(s) => FeatureId::String(s),
                geojson::feature::Id::Number(n) => match n.as_u64() {
                    Some(n) => FeatureId::Number(n),
                    None => FeatureId::String(n.to_string()),
                },
            });
            Ok(Feature {
                id,
                geometry,
                properties: feature.properties.unwrap_or_default(),
            })
        })
        .collect()
}

/// Read the features of a GeoJSON file (CRS84).
pub fn read_geojson(path: &Path) -> Result<Vec<Feature>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_features(&text).map_err(|message| ConfigError::Parse {
        path: path.display().to_string(),
        message,
    })
}
