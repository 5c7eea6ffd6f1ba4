use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::crs::BoundingBox;
use crate::format::TileFormat;
use crate::tile::TileService;
use crate::tms::{MinMax, TileMatrixSet, TileMatrixSetLimits};

/// What a plan entry seeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedingTarget {
    /// Dataset tiles with one layer per participating collection.
    MultiLayer,
    /// Single-layer tiles of one collection.
    Collection(String),
}

impl fmt::Display for SeedingTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeedingTarget::MultiLayer => f.write_str("multi-layer"),
            SeedingTarget::Collection(id) => f.write_str(id),
        }
    }
}

/// The tiles of one target, format and tile matrix set.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub target: SeedingTarget,
    pub tile_matrix_set: Arc<TileMatrixSet>,
    pub format: TileFormat,
    pub levels: MinMax,
    /// One range per level, lowest level first.
    pub limits: Vec<TileMatrixSetLimits>,
}

impl PlanEntry {
    pub fn tile_count(&self) -> u64 {
        self.limits.iter().map(TileMatrixSetLimits::tile_count).sum()
    }
}

/// Everything a seeding run walks, multi-layer entries first.
#[derive(Debug, Clone, Default)]
pub struct SeedingPlan {
    entries: Vec<PlanEntry>,
}

impl SeedingPlan {
    /// Plan the seeding configured in the service's dataset.
    ///
    /// Multi-layer entries cover the union of the extents of the
    /// collections taking part. Entries whose extent is unknown, or whose
    /// limits cannot be computed, are left out with a warning.
    pub fn build(service: &TileService) -> Self {
        let dataset = service.dataset();
        let mut multi_layer = Vec::new();
        let mut single_layer = Vec::new();

        for tms in service.tile_matrix_sets().iter() {
            if let Some(levels) = dataset.multi_layer_seeding(tms) {
                for &format in &dataset.tiles.formats {
                    let multi = service
                        .formats()
                        .get(format)
                        .map(|f| f.can_multi_layer())
                        .unwrap_or(false);
                    if !multi {
                        continue;
                    }
                    let ids: Vec<String> = levels
                        .levels()
                        .flat_map(|level| dataset.multi_layer_collections(tms, level, format))
                        .collect();
                    let extent = dataset.extent_of(ids.iter().map(String::as_str));
                    let target = SeedingTarget::MultiLayer;
                    if let Some(entry) = entry(service, target, tms, format, levels, extent) {
                        multi_layer.push(entry);
                    }
                }
            }

            for collection in dataset.tiled_collections() {
                let Some(levels) = collection.seeding(tms) else {
                    continue;
                };
                for &format in &collection.tiles.formats {
                    let target = SeedingTarget::Collection(collection.id.clone());
                    let extent = collection.extent();
                    if let Some(entry) = entry(service, target, tms, format, levels, extent) {
                        single_layer.push(entry);
                    }
                }
            }
        }

        multi_layer.extend(single_layer);
        Self {
            entries: multi_layer,
        }
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tile_count(&self) -> u64 {
        self.entries.iter().map(PlanEntry::tile_count).sum()
    }
}

fn entry(
    service: &TileService,
    target: SeedingTarget,
    tms: &Arc<TileMatrixSet>,
    format: TileFormat,
    levels: MinMax,
    extent: Option<BoundingBox>,
) -> Option<PlanEntry> {
    let Some(extent) = extent else {
        warn!(seeding = %target, tms = tms.id(), "No extent, not seeding");
        return None;
    };
    match service.walker().limits_for_levels(tms, levels, &extent) {
        Ok(limits) => {
            let entry = PlanEntry {
                target,
                tile_matrix_set: tms.clone(),
                format,
                levels,
                limits,
            };
            debug!(
                seeding = %entry.target,
                tms = tms.id(),
                format = %format,
                tiles = entry.tile_count(),
                "Planned seeding"
            );
            Some(entry)
        }
        Err(e) => {
            warn!(seeding = %target, tms = tms.id(), error = %e, "Cannot compute seeding limits");
            None
        }
    }
}
