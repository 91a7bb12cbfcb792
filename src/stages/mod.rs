//! Spam pipeline stages.
//!
//! Identifier resolution with dedup, batched message resolution,
//! quota-limited classification, and final ordering.

mod batch;
mod collect;
mod dedup;
mod quota;

pub use batch::{BatchAccumulator, BatchConfig, BatchFanoutStage, RecordBatch};
pub use collect::{order_results, CollectAndSortStage};
pub use dedup::{DedupFanoutStage, DedupIndex};
pub use quota::{QuotaConfig, QuotaFanoutStage, QuotaGuard, QuotaPool};
