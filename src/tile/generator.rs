//! Tile content generation.
//!
//! A single-layer tile is one feature query streamed through the writer of
//! the tile's format. A multi-layer tile is the merge of its single-layer
//! tiles, where a failed layer is left out and reported instead of failing
//! the whole tile.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;

use super::Tile;
use crate::error::{QueryError, TileError};
use crate::feature::{FeatureQuery, FeatureSource};
use crate::format::{EncodingContext, FormatRegistry, TileFormat};
use crate::tms::{TileCoordinateTransformer, TileMatrixSet};

/// Request options that shape the features of a tile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Properties to keep; `None` keeps all of them.
    pub properties: Option<Vec<String>>,
    /// Attribute equality filter.
    pub filter: BTreeMap<String, String>,
}

impl QueryOptions {
    /// Tiles generated with a projection or filter are not the canonical
    /// content of their key and must not be cached.
    pub fn is_temporary(&self) -> bool {
        self.properties.is_some() || !self.filter.is_empty()
    }
}

/// Result of merging the layers of a multi-layer tile.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiLayerOutcome {
    pub data: Bytes,
    /// Collections whose layer could not be generated, in tile order.
    pub failed: Vec<String>,
}

impl MultiLayerOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Produces encoded tile payloads from a feature source.
pub struct TileGenerator {
    source: Arc<dyn FeatureSource>,
    formats: Arc<FormatRegistry>,
    transformer: TileCoordinateTransformer,
    query_timeout: Option<Duration>,
}

impl TileGenerator {
    pub fn new(
        source: Arc<dyn FeatureSource>,
        formats: Arc<FormatRegistry>,
        transformer: TileCoordinateTransformer,
    ) -> Self {
        Self {
            source,
            formats,
            transformer,
            query_timeout: None,
        }
    }

    /// Abort a feature query, including streaming its results, after `timeout`.
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn formats(&self) -> &FormatRegistry {
        &self.formats
    }

    pub fn transformer(&self) -> &TileCoordinateTransformer {
        &self.transformer
    }

    /// Encode the features of a single-layer tile.
    ///
    /// A tile without features yields the empty document of its format,
    /// which is a valid result.
    pub async fn generate_single_layer(
        &self,
        tms: &TileMatrixSet,
        tile: &Tile,
        options: &QueryOptions,
    ) -> Result<Bytes, TileError> {
        let collection = match tile.collections() {
            [collection] => collection.clone(),
            _ => {
                return Err(TileError::InvalidParameter {
                    name: "collections".to_string(),
                    message: format!("{tile} is not a single-layer tile"),
                })
            }
        };

        let extension = self.formats.get(tile.format())?;
        let crs = extension.query_crs(tms);
        let (level, row, col) = (tile.level(), tile.row(), tile.col());
        let bbox = self
            .transformer
            .tile_bounding_box(tms, level, row, col, crs)?;
        let max_allowable_offset = self
            .transformer
            .max_allowable_offset(tms, level, row, col, crs)?;

        let query = FeatureQuery {
            collection: collection.clone(),
            bbox,
            crs,
            max_allowable_offset,
            properties: options.properties.clone(),
            filter: options.filter.clone(),
        };

        let mut writer = extension.writer(EncodingContext {
            layer: collection.clone(),
            tile_bounds: bbox,
        });

        let run = async {
            let mut features = self.source.query(&query).await?;
            while let Some(feature) = features.next().await {
                writer.write_feature(&feature?)?;
            }
            Ok::<_, TileError>(())
        };

        match self.query_timeout {
            Some(timeout) => tokio::time::timeout(timeout, run).await.map_err(|_| {
                QueryError::Timeout {
                    collection: collection.clone(),
                    seconds: timeout.as_secs(),
                }
            })??,
            None => run.await?,
        }

        debug!(
            tile = %tile,
            features = writer.feature_count(),
            "Generated single-layer tile"
        );
        Ok(writer.finish()?)
    }

    /// Merge per-collection results into one multi-layer payload.
    ///
    /// Layers keep the order of `layers`. Failed layers are dropped and
    /// listed in the outcome; if no layer succeeded the merge fails.
    pub fn generate_multi_layer(
        &self,
        format: TileFormat,
        layers: Vec<(String, Result<Bytes, TileError>)>,
    ) -> Result<MultiLayerOutcome, TileError> {
        let extension = self.formats.get(format)?;
        if !extension.can_multi_layer() {
            return Err(TileError::UnsupportedFormat {
                format: format.to_string(),
            });
        }

        let mut succeeded = Vec::with_capacity(layers.len());
        let mut failed = Vec::new();
        for (collection, result) in layers {
            match result {
                Ok(data) => succeeded.push((collection, data)),
                Err(e) => {
                    debug!(collection = %collection, error = %e, "Layer left out of multi-layer tile");
                    failed.push(collection);
                }
            }
        }

        if succeeded.is_empty() {
            return Err(TileError::AllLayersFailed { failed });
        }

        let data = extension.merge_layers(&succeeded)?;
        Ok(MultiLayerOutcome { data, failed })
    }
}
