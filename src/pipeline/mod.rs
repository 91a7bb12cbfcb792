//! Generic staged pipeline.
//!
//! Stages are connected by typed bounded channels, started as independent
//! tasks, and joined together. Backpressure comes from the channels: a slow
//! stage stalls its producers.

mod error;
mod fanout;
mod runner;
mod stage;

pub use error::{PipelineError, StageError};
pub use fanout::FanOut;
pub use runner::{PipelineRun, PipelineRunner};
pub use stage::{FnStage, Stage, StageProbe, StageReport, StageState};
