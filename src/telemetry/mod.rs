//! Telemetry for spamflow.
//!
//! Structured logging through `tracing`, run and stage spans, and counters
//! through the `metrics` facade. Installing a metrics recorder is left to
//! the embedding application.

mod logging;
mod metrics;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    init_metrics, record_batch_size, record_item_failed, record_item_filtered,
    record_item_forwarded, record_pipeline_run, record_quota_in_flight, record_stage_completed,
};
pub use spans::{PipelineSpan, SpanExt, StageSpan};
