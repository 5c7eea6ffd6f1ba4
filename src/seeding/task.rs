use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::plan::{PlanEntry, SeedingPlan, SeedingTarget};
use crate::tile::{SeedOutcome, Tile, TileService};
use crate::tms::TileMatrixSet;

/// Default number of consecutive failed tiles after which seeding gives up.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 50;

/// Lifecycle of a seeding task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

impl TaskState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Stopped | TaskState::Failed
        )
    }
}

/// Progress of a seeding run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedingProgress {
    pub total_tile_count: u64,
    pub completed_count: f64,
    pub status_message: String,
    pub stopped: bool,
    pub state: TaskState,
    pub generated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl SeedingProgress {
    fn new(total_tile_count: u64) -> Self {
        Self {
            total_tile_count,
            completed_count: 0.0,
            status_message: "idle".to_string(),
            stopped: false,
            state: TaskState::Idle,
            generated: 0,
            skipped: 0,
            failed: 0,
        }
    }

    /// Completed share of the plan, between 0 and 1.
    pub fn fraction(&self) -> f64 {
        if self.total_tile_count == 0 {
            return 1.0;
        }
        (self.completed_count / self.total_tile_count as f64).min(1.0)
    }
}

/// Seeding settings.
#[derive(Debug, Clone)]
pub struct SeedingConfig {
    /// Consecutive failed tiles that turn the run into [`TaskState::Failed`]. `0` never gives up.
    pub max_consecutive_failures: u32,
    /// Extra attempts for a tile whose query timed out.
    pub timeout_retries: u32,
}

impl Default for SeedingConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            timeout_retries: 1,
        }
    }
}

/// Why the walk ended early.
enum Abort {
    Stopped,
    Failed(String),
}

/// A cancellable walk over a [`SeedingPlan`].
///
/// Tiles are processed one at a time. The stop signal is checked before
/// each tile, so a tile in progress always completes. Tiles already in the
/// cache are skipped, which makes a restarted run resume where the
/// previous one stopped.
pub struct SeedingTask {
    service: Arc<TileService>,
    plan: SeedingPlan,
    config: SeedingConfig,
    cancel: CancellationToken,
    running: AtomicBool,
    progress: RwLock<SeedingProgress>,
}

impl SeedingTask {
    pub fn new(service: Arc<TileService>, plan: SeedingPlan, config: SeedingConfig) -> Self {
        let total = plan.tile_count();
        Self {
            service,
            plan,
            config,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
            progress: RwLock::new(SeedingProgress::new(total)),
        }
    }

    /// Walk the plan until it is exhausted, stopped, or fails.
    ///
    /// A task runs once; calling `run` again returns the final state.
    pub async fn run(&self) -> TaskState {
        {
            let mut progress = self.progress.write().await;
            if progress.state != TaskState::Idle {
                return progress.state;
            }
            progress.state = TaskState::Running;
            progress.status_message = "starting".to_string();
        }
        self.running.store(true, Ordering::SeqCst);

        info!(
            entries = self.plan.entries().len(),
            tiles = self.plan.tile_count(),
            "Seeding started"
        );

        let result = self.walk().await;

        let mut progress = self.progress.write().await;
        match result {
            Ok(()) => {
                progress.state = TaskState::Completed;
                progress.status_message = format!(
                    "completed: {} generated, {} skipped, {} failed",
                    progress.generated, progress.skipped, progress.failed
                );
                info!(
                    generated = progress.generated,
                    skipped = progress.skipped,
                    failed = progress.failed,
                    "Seeding completed"
                );
            }
            Err(Abort::Stopped) => {
                progress.state = TaskState::Stopped;
                progress.stopped = true;
                progress.status_message = format!(
                    "stopped after {} of {} tiles",
                    progress.completed_count, progress.total_tile_count
                );
                info!(completed = progress.completed_count, "Seeding stopped");
            }
            Err(Abort::Failed(reason)) => {
                progress.state = TaskState::Failed;
                progress.status_message = format!("failed: {reason}");
                error!(reason = %reason, "Seeding failed");
            }
        }
        self.running.store(false, Ordering::SeqCst);
        progress.state
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the task to stop before its next tile.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn progress(&self) -> SeedingProgress {
        self.progress.read().await.clone()
    }

    pub fn plan(&self) -> &SeedingPlan {
        &self.plan
    }

    async fn walk(&self) -> Result<(), Abort> {
        let mut consecutive_failures = 0u32;

        for entry in self.plan.entries() {
            let tms = &entry.tile_matrix_set;
            for limits in &entry.limits {
                for (row, col) in limits.tiles() {
                    if self.is_stop_requested() {
                        return Err(Abort::Stopped);
                    }
                    self.set_status(entry, limits.level, row, col).await;

                    let succeeded = match self.tile(entry, limits.level, row, col) {
                        Some(tile) => self.seed(tms, &tile).await?,
                        // no collection at this level
                        None => {
                            self.progress.write().await.skipped += 1;
                            true
                        }
                    };

                    if succeeded {
                        consecutive_failures = 0;
                    } else {
                        consecutive_failures += 1;
                    }
                    self.progress.write().await.completed_count += 1.0;

                    let limit = self.config.max_consecutive_failures;
                    if limit > 0 && consecutive_failures >= limit {
                        return Err(Abort::Failed(format!(
                            "{consecutive_failures} consecutive tiles failed"
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// The tile to seed at a position, `None` if a multi-layer tile has no layers there.
    fn tile(&self, entry: &PlanEntry, level: u8, row: u32, col: u32) -> Option<Tile> {
        let tms = &entry.tile_matrix_set;
        let collections = match &entry.target {
            SeedingTarget::Collection(id) => vec![id.clone()],
            SeedingTarget::MultiLayer => {
                self.service
                    .dataset()
                    .multi_layer_collections(tms, level, entry.format)
            }
        };
        if collections.is_empty() {
            return None;
        }
        match Tile::new(tms, level, row, col, collections, entry.format) {
            Ok(tile) => Some(tile),
            Err(e) => {
                warn!(error = %e, "Skipping invalid seeding tile");
                None
            }
        }
    }

    /// Seed one tile. Returns whether it succeeded; a fatal error aborts the run.
    async fn seed(&self, tms: &TileMatrixSet, tile: &Tile) -> Result<bool, Abort> {
        let mut attempt = 0;
        let result = loop {
            match self.service.seed_tile(tms, tile).await {
                Err(e) if e.is_retryable() && attempt < self.config.timeout_retries => {
                    attempt += 1;
                    debug!(tile = %tile, attempt, error = %e, "Retrying tile");
                }
                result => break result,
            }
        };

        let mut progress = self.progress.write().await;
        match result {
            Ok(SeedOutcome::Generated) => {
                progress.generated += 1;
                Ok(true)
            }
            Ok(SeedOutcome::Skipped) => {
                progress.skipped += 1;
                Ok(true)
            }
            Ok(SeedOutcome::Partial { failed }) => {
                warn!(tile = %tile, failed = ?failed, "Seeded tile is missing layers");
                progress.failed += 1;
                Ok(false)
            }
            Err(e) if e.is_fatal() => Err(Abort::Failed(e.to_string())),
            Err(e) => {
                warn!(tile = %tile, error = %e, "Failed to seed tile");
                progress.failed += 1;
                Ok(false)
            }
        }
    }

    async fn set_status(&self, entry: &PlanEntry, level: u8, row: u32, col: u32) {
        let message = format!(
            "currently processing -> {}, {}/{}/{}/{}, {}",
            entry.target,
            entry.tile_matrix_set.id(),
            level,
            row,
            col,
            entry.format.extension()
        );
        self.progress.write().await.status_message = message;
    }
}
