//! Background tile seeding.
//!
//! Seeding pre-generates the tiles configured in the dataset so that
//! requests are served from the cache.
//!
//! # State Machine
//!
//! ```text
//! Idle --run()--> Running --plan exhausted--> Completed
//!                    |
//!                    +--stop()--> Stopped      (checked before each tile)
//!                    +--cache error or too many failures--> Failed
//! ```
//!
//! The [`SeedingPlan`] lists multi-layer entries before single-layer ones.
//! Generating a multi-layer tile caches its single-layer tiles too, so the
//! single-layer pass mostly finds them cached and skips them.
//!
//! # Components
//!
//! - [`SeedingPlan`]: Tile ranges per target, format and tile matrix set, from the grid walker
//! - [`SeedingTask`]: Walks a plan one tile at a time and tracks [`SeedingProgress`]
//! - [`SeedingSupervisor`]: Task registry keyed by [`TaskId`]

mod plan;
mod supervisor;
mod task;

pub use plan::{PlanEntry, SeedingPlan, SeedingTarget};
pub use supervisor::{SeedingSupervisor, TaskId};
pub use task::{
    SeedingConfig, SeedingProgress, SeedingTask, TaskState, DEFAULT_MAX_CONSECUTIVE_FAILURES,
};
