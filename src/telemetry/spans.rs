//! Span helpers for pipeline runs and stages.

use tracing::{info_span, Span};
use uuid::Uuid;

/// Extension trait for recording outcomes into spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Span covering one whole pipeline run.
pub struct PipelineSpan;

impl PipelineSpan {
    /// Fields: `run_id`, `stages`, and `status` / `error.message` filled
    /// in by [`SpanExt::record_result`].
    pub fn new(run_id: &Uuid, stages: usize) -> Span {
        info_span!(
            "pipeline_run",
            run_id = %run_id,
            stages,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}

/// Span covering one stage task.
pub struct StageSpan;

impl StageSpan {
    pub fn new(run_id: &Uuid, stage: &'static str) -> Span {
        info_span!("stage", run_id = %run_id, stage)
    }
}
