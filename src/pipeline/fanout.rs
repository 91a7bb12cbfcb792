//! Per-item task fan-out with a structured join.

use std::future::Future;

use tokio::task::JoinSet;

use super::error::StageError;

/// Set of tasks spawned by one stage invocation.
///
/// Every task is joined by [`FanOut::join`], so a stage that joins before
/// returning never closes its output while work is still in flight.
pub struct FanOut {
    stage: &'static str,
    tasks: JoinSet<Result<(), StageError>>,
    launched: usize,
}

impl FanOut {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            tasks: JoinSet::new(),
            launched: 0,
        }
    }

    /// Spawn one unit of work onto the runtime.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = Result<(), StageError>> + Send + 'static,
    {
        self.launched += 1;
        self.tasks.spawn(task);
    }

    /// Tasks spawned so far.
    pub fn launched(&self) -> usize {
        self.launched
    }

    /// Wait for every spawned task.
    ///
    /// All tasks are joined even after a failure; the first error wins.
    pub async fn join(mut self) -> Result<(), StageError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            let outcome = match joined {
                Ok(result) => result,
                Err(err) => Err(StageError::from_join(self.stage, err)),
            };
            if let Err(err) = outcome {
                tracing::error!(stage = self.stage, error = %err, "fan-out task failed");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
