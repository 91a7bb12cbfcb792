//! Pipeline and stage error types.
//!
//! Per-item collaborator failures never show up here: they are dropped and
//! reported inside the stage. These errors are the catastrophic cases that
//! end a run.

use thiserror::Error;
use tokio::task::JoinError;

/// Fatal failure inside one stage's own control flow.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Stage {stage}: downstream channel closed")]
    DownstreamClosed { stage: &'static str },

    #[error("Stage {stage}: worker task panicked: {message}")]
    TaskPanicked { stage: &'static str, message: String },

    #[error("Stage {stage}: worker task was aborted")]
    TaskAborted { stage: &'static str },

    #[error("Stage {stage}: quota pool closed")]
    QuotaClosed { stage: &'static str },
}

impl StageError {
    /// Convert a failed join of a stage-owned task.
    pub(crate) fn from_join(stage: &'static str, err: JoinError) -> Self {
        if err.is_panic() {
            Self::TaskPanicked {
                stage,
                message: panic_message(err),
            }
        } else {
            Self::TaskAborted { stage }
        }
    }
}

/// Errors returned by [`PipelineRunner::run`](super::PipelineRunner::run).
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage {stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: StageError,
    },

    #[error("Stage {stage} panicked: {message}")]
    StagePanicked { stage: &'static str, message: String },

    #[error("Input source panicked: {0}")]
    SourcePanicked(String),
}

impl PipelineError {
    /// Name of the stage that ended the run, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } | Self::StagePanicked { stage, .. } => Some(stage),
            Self::SourcePanicked(_) => None,
        }
    }
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(err: JoinError) -> String {
    if !err.is_panic() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
