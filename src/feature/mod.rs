//! Features and the feature source contract.
//!
//! Tile generation never reads data directly. It issues one
//! [`FeatureQuery`] per collection and consumes the resulting
//! [`FeatureStream`]. [`MemoryFeatureSource`] is the source used by the
//! binary: collections are loaded from GeoJSON files at startup.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use geo::Geometry;
use serde_json::{Map, Value};

use crate::crs::{BoundingBox, EpsgCrs};
use crate::error::QueryError;

pub use memory::{read_geojson, MemoryFeatureSource};

/// Identifier of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeatureId {
    Number(u64),
    String(String),
}

/// A feature: optional id, optional geometry and a JSON property map.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: Option<FeatureId>,
    pub geometry: Option<Geometry<f64>>,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties: Map::new(),
        }
    }

    pub fn with_id(mut self, id: FeatureId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether every `key=value` pair matches a property of this feature.
    ///
    /// Non-string property values are compared by their JSON text.
    pub fn matches(&self, filter: &BTreeMap<String, String>) -> bool {
        filter.iter().all(|(key, expected)| match self.properties.get(key) {
            Some(Value::String(actual)) => actual == expected,
            Some(Value::Null) | None => false,
            Some(other) => other.to_string() == *expected,
        })
    }
}

/// A query for the features of one collection inside a tile footprint.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureQuery {
    pub collection: String,
    /// Footprint to select features by. May be in any CRS.
    pub bbox: BoundingBox,
    /// CRS of the returned geometries.
    pub crs: EpsgCrs,
    /// Geometry simplification tolerance in units of `crs`; `0` disables it.
    pub max_allowable_offset: f64,
    /// Properties to keep; `None` keeps all of them.
    pub properties: Option<Vec<String>>,
    /// Attribute equality filter.
    pub filter: BTreeMap<String, String>,
}

impl FeatureQuery {
    pub fn new(collection: impl Into<String>, bbox: BoundingBox, crs: EpsgCrs) -> Self {
        Self {
            collection: collection.into(),
            bbox,
            crs,
            max_allowable_offset: 0.0,
            properties: None,
            filter: BTreeMap::new(),
        }
    }
}

/// Stream of query results.
pub type FeatureStream = BoxStream<'static, Result<Feature, QueryError>>;

/// A backing store of feature collections.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Run a query. Errors before the first feature are returned directly,
    /// errors while streaming are items of the stream.
    async fn query(&self, query: &FeatureQuery) -> Result<FeatureStream, QueryError>;
}
