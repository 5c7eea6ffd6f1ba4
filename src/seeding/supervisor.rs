use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::task::{SeedingProgress, SeedingTask, TaskState};

/// Identifier of a seeding task within a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct TaskEntry {
    task: Arc<SeedingTask>,
    handle: Option<JoinHandle<TaskState>>,
}

/// Owns the seeding tasks of a process, keyed by task id.
#[derive(Default)]
pub struct SeedingSupervisor {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
}

impl SeedingSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a task in the background.
    ///
    /// Tasks that already finished are dropped along with their progress.
    pub async fn spawn(&self, task: SeedingTask) -> TaskId {
        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = Arc::new(task);
        let runner = task.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        info!(task = %id, tiles = task.plan().tile_count(), "Spawned seeding task");
        let mut tasks = self.tasks.lock().await;
        let mut finished = Vec::new();
        for (old, entry) in tasks.iter() {
            if entry.task.progress().await.state.is_finished() {
                finished.push(*old);
            }
        }
        for old in finished {
            debug!(task = %old, "Dropping finished seeding task");
            tasks.remove(&old);
        }
        tasks.insert(
            id,
            TaskEntry {
                task,
                handle: Some(handle),
            },
        );
        id
    }

    pub async fn task(&self, id: TaskId) -> Option<Arc<SeedingTask>> {
        self.tasks.lock().await.get(&id).map(|e| e.task.clone())
    }

    /// The most recently spawned task.
    pub async fn latest(&self) -> Option<(TaskId, Arc<SeedingTask>)> {
        self.tasks
            .lock()
            .await
            .iter()
            .max_by_key(|(id, _)| **id)
            .map(|(id, e)| (*id, e.task.clone()))
    }

    pub async fn progress(&self, id: TaskId) -> Option<SeedingProgress> {
        let task = self.task(id).await?;
        Some(task.progress().await)
    }

    pub async fn is_running(&self, id: TaskId) -> bool {
        match self.task(id).await {
            Some(task) => task.is_running(),
            None => false,
        }
    }

    /// Signal a task to stop. Returns `false` for an unknown id.
    pub async fn stop(&self, id: TaskId) -> bool {
        match self.task(id).await {
            Some(task) => {
                task.stop();
                true
            }
            None => false,
        }
    }

    /// Signal every task to stop.
    pub async fn stop_all(&self) {
        for entry in self.tasks.lock().await.values() {
            entry.task.stop();
        }
    }

    /// Wait for a task to finish and return its final state.
    pub async fn wait(&self, id: TaskId) -> Option<TaskState> {
        let (task, handle) = {
            let mut tasks = self.tasks.lock().await;
            let entry = tasks.get_mut(&id)?;
            (entry.task.clone(), entry.handle.take())
        };
        match handle {
            Some(handle) => match handle.await {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!(task = %id, error = %e, "Seeding task panicked");
                    Some(TaskState::Failed)
                }
            },
            // already awaited elsewhere
            None => Some(task.progress().await.state),
        }
    }

    /// Stop every task and wait for all of them.
    pub async fn shutdown(&self) {
        self.stop_all().await;
        let ids: Vec<TaskId> = self.tasks.lock().await.keys().copied().collect();
        for id in ids {
            self.wait(id).await;
        }
    }
}
