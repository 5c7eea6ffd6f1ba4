//! Mapbox Vector Tile encoding.
//!
//! Geometries arrive in the native CRS of the tile matrix set and are
//! clipped to the tile plus a buffer, then quantised to a 4096 x 4096 grid
//! with the origin at the top-left corner of the tile. Properties are
//! deduplicated per layer into the `keys` and `values` tables.

use std::collections::HashMap;

use bytes::Bytes;
use geo::orient::{Direction, Orient};
use geo::{Coord, Geometry, LineString, Polygon, Rect};
use prost::Message;
use serde_json::Value;

use super::clip;
use super::vector_tile::tile::{self, GeomType, Layer};
use super::vector_tile::Tile;
use super::{EncodingContext, FeatureWriter, TileFormat, TileFormatExtension};
use crate::crs::{BoundingBox, EpsgCrs};
use crate::error::EncodeError;
use crate::feature::{Feature, FeatureId};
use crate::tms::TileMatrixSet;

/// Default tile extent of the MVT 2.1 schema
pub const DEFAULT_EXTENT: u32 = 4096;

/// Geometry kept around the tile, in tile units (8 pixels of a 256 pixel tile).
pub const DEFAULT_BUFFER: u32 = 128;

const COORD_LIMIT: f64 = (1 << 24) as f64;

const LAYER_VERSION: u32 = 2;

const CMD_MOVE_TO: u32 = 1;
const CMD_LINE_TO: u32 = 2;
const CMD_CLOSE_PATH: u32 = 7;

#[inline]
fn zigzag(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

#[inline]
fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

/// Writes MVT geometry commands with a cursor shared by all parts of a feature.
struct CommandEncoder<'a> {
    bounds: &'a BoundingBox,
    extent: f64,
    clip: Rect<f64>,
    cursor: (i32, i32),
    commands: Vec<u32>,
}

impl<'a> CommandEncoder<'a> {
    fn new(bounds: &'a BoundingBox, extent: u32, buffer: u32) -> Self {
        let extent = f64::from(extent);
        Self {
            bounds,
            extent,
            clip: clip::buffered_tile(extent, f64::from(buffer)),
            cursor: (0, 0),
            commands: Vec::new(),
        }
    }

    /// Tile space with the origin at the top-left corner, before rounding.
    fn to_tile(&self, coords: &[Coord<f64>]) -> Vec<Coord<f64>> {
        coords
            .iter()
            .map(|c| Coord {
                x: (c.x - self.bounds.xmin) / self.bounds.width() * self.extent,
                y: (self.bounds.ymax - c.y) / self.bounds.height() * self.extent,
            })
            .collect()
    }

    /// Round to the grid. Clipped input stays near the tile, the clamp keeps
    /// cursor deltas inside i32 whatever arrives.
    fn grid(c: &Coord<f64>) -> (i32, i32) {
        (
            c.x.round().clamp(-COORD_LIMIT, COORD_LIMIT) as i32,
            c.y.round().clamp(-COORD_LIMIT, COORD_LIMIT) as i32,
        )
    }

    /// Grid coordinates without consecutive duplicates.
    fn quantise(coords: &[Coord<f64>]) -> Vec<(i32, i32)> {
        let mut out: Vec<(i32, i32)> = Vec::with_capacity(coords.len());
        for c in coords {
            let p = Self::grid(c);
            if out.last() != Some(&p) {
                out.push(p);
            }
        }
        out
    }

    fn push_point(&mut self, (x, y): (i32, i32)) {
        self.commands.push(zigzag(x - self.cursor.0));
        self.commands.push(zigzag(y - self.cursor.1));
        self.cursor = (x, y);
    }

    fn points(&mut self, coords: &[Coord<f64>]) {
        let inside = clip::clip_points(&self.to_tile(coords), &self.clip);
        if inside.is_empty() {
            return;
        }
        self.commands.push(command(CMD_MOVE_TO, inside.len() as u32));
        for c in &inside {
            self.push_point(Self::grid(c));
        }
    }

    fn line(&mut self, line: &LineString<f64>) {
        let parts = clip::clip_line(&self.to_tile(&line.0), &self.clip);
        for part in parts {
            let points = Self::quantise(&part);
            if points.len() < 2 {
                continue;
            }
            self.commands.push(command(CMD_MOVE_TO, 1));
            self.push_point(points[0]);
            self.commands.push(command(CMD_LINE_TO, (points.len() - 1) as u32));
            for p in &points[1..] {
                self.push_point(*p);
            }
        }
    }

    /// Encode a closed ring. Returns false if it collapsed below three vertices.
    fn ring(&mut self, ring: &LineString<f64>) -> bool {
        let mut points = Self::quantise(&clip::clip_ring(&self.to_tile(&ring.0), &self.clip));
        if points.len() > 1 && points.first() == points.last() {
            points.pop();
        }
        if points.len() < 3 {
            return false;
        }
        self.commands.push(command(CMD_MOVE_TO, 1));
        self.push_point(points[0]);
        self.commands.push(command(CMD_LINE_TO, (points.len() - 1) as u32));
        for p in &points[1..] {
            self.push_point(*p);
        }
        self.commands.push(command(CMD_CLOSE_PATH, 1));
        true
    }

    fn polygon(&mut self, polygon: &Polygon<f64>) {
        // the y flip mirrors the ring: clockwise with y up gives the
        // positive tile-space area MVT requires for exterior rings
        let oriented = polygon.orient(Direction::Reversed);
        if !self.ring(oriented.exterior()) {
            return;
        }
        for interior in oriented.interiors() {
            self.ring(interior);
        }
    }

    fn geometry(&mut self, geometry: &Geometry<f64>) -> GeomType {
        match geometry {
            Geometry::Point(p) => {
                self.points(&[p.0]);
                GeomType::Point
            }
            Geometry::MultiPoint(mp) => {
                let coords: Vec<_> = mp.0.iter().map(|p| p.0).collect();
                self.points(&coords);
                GeomType::Point
            }
            Geometry::Line(line) => {
                self.line(&LineString::new(vec![line.start, line.end]));
                GeomType::Linestring
            }
            Geometry::LineString(line) => {
                self.line(line);
                GeomType::Linestring
            }
            Geometry::MultiLineString(lines) => {
                for line in &lines.0 {
                    self.line(line);
                }
                GeomType::Linestring
            }
            Geometry::Polygon(polygon) => {
                self.polygon(polygon);
                GeomType::Polygon
            }
            Geometry::MultiPolygon(polygons) => {
                for polygon in &polygons.0 {
                    self.polygon(polygon);
                }
                GeomType::Polygon
            }
            Geometry::Rect(rect) => {
                self.polygon(&rect.to_polygon());
                GeomType::Polygon
            }
            Geometry::Triangle(triangle) => {
                self.polygon(&triangle.to_polygon());
                GeomType::Polygon
            }
            Geometry::GeometryCollection(_) => GeomType::Unknown,
        }
    }
}

/// Hashable form of a property value for the layer value table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ValueKey {
    String(String),
    Double(u64),
    Int(i64),
    UInt(u64),
    Bool(bool),
}

impl ValueKey {
    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(ValueKey::Bool(*b)),
            Value::String(s) => Some(ValueKey::String(s.clone())),
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    Some(ValueKey::UInt(u))
                } else if let Some(i) = n.as_i64() {
                    Some(ValueKey::Int(i))
                } else {
                    n.as_f64().map(|f| ValueKey::Double(f.to_bits()))
                }
            }
            other => Some(ValueKey::String(other.to_string())),
        }
    }

    fn to_value(&self) -> tile::Value {
        let mut value = tile::Value::default();
        match self {
            ValueKey::String(s) => value.string_value = Some(s.clone()),
            ValueKey::Double(bits) => value.double_value = Some(f64::from_bits(*bits)),
            ValueKey::Int(i) => value.sint_value = Some(*i),
            ValueKey::UInt(u) => value.uint_value = Some(*u),
            ValueKey::Bool(b) => value.bool_value = Some(*b),
        }
        value
    }
}

/// Builds one MVT layer from a feature stream.
pub struct MvtLayerWriter {
    context: EncodingContext,
    extent: u32,
    buffer: u32,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<tile::Value>,
    value_index: HashMap<ValueKey, u32>,
    features: Vec<tile::Feature>,
}

impl MvtLayerWriter {
    pub fn new(context: EncodingContext, extent: u32, buffer: u32) -> Self {
        Self {
            context,
            extent,
            buffer,
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
            features: Vec::new(),
        }
    }

    fn key(&mut self, key: &str) -> u32 {
        if let Some(&idx) = self.key_index.get(key) {
            return idx;
        }
        let idx = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), idx);
        idx
    }

    fn value(&mut self, value: ValueKey) -> u32 {
        if let Some(&idx) = self.value_index.get(&value) {
            return idx;
        }
        let idx = self.values.len() as u32;
        self.values.push(value.to_value());
        self.value_index.insert(value, idx);
        idx
    }
}

impl FeatureWriter for MvtLayerWriter {
    fn write_feature(&mut self, feature: &Feature) -> Result<(), EncodeError> {
        let Some(geometry) = &feature.geometry else {
            return Ok(());
        };

        let mut encoder = CommandEncoder::new(&self.context.tile_bounds, self.extent, self.buffer);
        let geom_type = encoder.geometry(geometry);
        if encoder.commands.is_empty() || geom_type == GeomType::Unknown {
            return Ok(());
        }
        let commands = encoder.commands;

        let mut tags = Vec::with_capacity(feature.properties.len() * 2);
        for (key, value) in &feature.properties {
            let Some(value) = ValueKey::from_json(value) else {
                continue;
            };
            let key_idx = self.key(key);
            let value_idx = self.value(value);
            tags.push(key_idx);
            tags.push(value_idx);
        }

        let id = match &feature.id {
            Some(FeatureId::Number(n)) => Some(*n),
            Some(FeatureId::String(s)) => s.parse().ok(),
            None => None,
        };

        self.features.push(tile::Feature {
            id,
            tags,
            r#type: Some(geom_type as i32),
            geometry: commands,
        });
        Ok(())
    }

    fn feature_count(&self) -> usize {
        self.features.len()
    }

    fn finish(self: Box<Self>) -> Result<Bytes, EncodeError> {
        let this = *self;
        if this.features.is_empty() {
            return Ok(Bytes::new());
        }
        let tile = Tile {
            layers: vec![Layer {
                version: LAYER_VERSION,
                name: this.context.layer,
                features: this.features,
                keys: this.keys,
                values: this.values,
                extent: Some(this.extent),
            }],
        };
        Ok(Bytes::from(tile.encode_to_vec()))
    }
}

/// The MVT output format.
#[derive(Debug, Clone)]
pub struct MvtFormat {
    extent: u32,
    buffer: u32,
}

impl MvtFormat {
    pub fn new() -> Self {
        Self {
            extent: DEFAULT_EXTENT,
            buffer: DEFAULT_BUFFER,
        }
    }
}

impl Default for MvtFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl TileFormatExtension for MvtFormat {
    fn format(&self) -> TileFormat {
        TileFormat::Mvt
    }

    fn can_multi_layer(&self) -> bool {
        true
    }

    fn query_crs(&self, tms: &TileMatrixSet) -> EpsgCrs {
        tms.crs()
    }

    fn writer(&self, context: EncodingContext) -> Box<dyn FeatureWriter> {
        Box::new(MvtLayerWriter::new(context, self.extent, self.buffer))
    }

    fn merge_layers(&self, layers: &[(String, Bytes)]) -> Result<Bytes, EncodeError> {
        let mut merged = Tile::default();
        for (name, payload) in layers {
            let tile = Tile::decode(payload.as_ref()).map_err(|e| EncodeError::InvalidVectorTile {
                layer: name.clone(),
                message: e.to_string(),
            })?;
            merged.layers.extend(tile.layers);
        }
        Ok(Bytes::from(merged.encode_to_vec()))
    }

    fn is_valid(&self, payload: &[u8]) -> bool {
        Tile::decode(payload).is_ok()
    }
}
