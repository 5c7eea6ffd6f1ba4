use bytes::Bytes;
use geojson::feature::Id;

use super::{EncodingContext, FeatureWriter, TileFormat, TileFormatExtension};
use crate::crs::{EpsgCrs, CRS84};
use crate::error::EncodeError;
use crate::feature::{Feature, FeatureId};
use crate::tms::TileMatrixSet;

const HEADER: &[u8] = br#"{"type":"FeatureCollection","features":["#;

/// Streams features into a GeoJSON FeatureCollection.
pub struct GeoJsonWriter {
    buffer: Vec<u8>,
    count: usize,
}

impl GeoJsonWriter {
    pub fn new() -> Self {
        Self {
            buffer: HEADER.to_vec(),
            count: 0,
        }
    }
}

impl Default for GeoJsonWriter {
    fn default() -> Self {
        Self::new()
    }
}

fn to_geojson(feature: &Feature) -> geojson::Feature {
    geojson::Feature {
        bbox: None,
        geometry: feature
            .geometry
            .as_ref()
            .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
        id: feature.id.as_ref().map(|id| match id {
            FeatureId::Number(n) => Id::Number((*n).into()),
            FeatureId::String(s) => Id::String(s.clone()),
        }),
        properties: Some(feature.properties.clone()),
        foreign_members: None,
    }
}

impl FeatureWriter for GeoJsonWriter {
    fn write_feature(&mut self, feature: &Feature) -> Result<(), EncodeError> {
        if self.count > 0 {
            self.buffer.push(b',');
        }
        serde_json::to_writer(&mut self.buffer, &to_geojson(feature))
            .map_err(|e| EncodeError::Json(e.to_string()))?;
        self.count += 1;
        Ok(())
    }

    fn feature_count(&self) -> usize {
        self.count
    }

    fn finish(self: Box<Self>) -> Result<Bytes, EncodeError> {
        let GeoJsonWriter { mut buffer, count } = *self;
        buffer.extend_from_slice(format!(r#"],"numberReturned":{count}}}"#).as_bytes());
        Ok(Bytes::from(buffer))
    }
}

/// The GeoJSON output format. Single-layer only.
#[derive(Debug, Clone, Default)]
pub struct GeoJsonFormat;

impl GeoJsonFormat {
    pub fn new() -> Self {
        Self
    }
}

impl TileFormatExtension for GeoJsonFormat {
    fn format(&self) -> TileFormat {
        TileFormat::GeoJson
    }

    fn can_multi_layer(&self) -> bool {
        false
    }

    fn query_crs(&self, _tms: &TileMatrixSet) -> EpsgCrs {
        CRS84
    }

    fn writer(&self, _context: EncodingContext) -> Box<dyn FeatureWriter> {
        Box::new(GeoJsonWriter::new())
    }

    fn is_valid(&self, payload: &[u8]) -> bool {
        serde_json::from_slice::<serde_json::Value>(payload).is_ok()
    }
}
