//! Spamflow
//!
//! A concurrent, multi-stage spam classification pipeline. Stages run as
//! independent tasks connected by bounded channels; each stage fans its
//! input out over per-item tasks and closes its output only after all of
//! them have finished.
//!
//! # Stages
//!
//! - **dedup**: resolve identifiers to user records, dropping duplicates
//! - **batch**: resolve records to message ids in bounded batches
//! - **classify**: ask the classifier about each message under a quota
//! - **collect**: sort verdicts (spam first, then by id) into result lines
//!
//! Collaborator failures drop the affected items and are logged; they
//! never abort a run.

pub mod collaborators;
pub mod config;
pub mod model;
pub mod pipeline;
pub mod stages;
pub mod telemetry;

use std::sync::Arc;

use collaborators::{IdentifierResolver, MessageResolver, SpamClassifier};
use model::{Identifier, ResultLine};
use pipeline::{PipelineError, PipelineRun, PipelineRunner};
use stages::{
    BatchConfig, BatchFanoutStage, CollectAndSortStage, DedupFanoutStage, QuotaConfig,
    QuotaFanoutStage,
};

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct SpamPipelineConfig {
    /// Slots per inter-stage channel.
    pub channel_capacity: usize,
    pub batch: BatchConfig,
    pub quota: QuotaConfig,
}

impl Default for SpamPipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1,
            batch: BatchConfig::default(),
            quota: QuotaConfig::default(),
        }
    }
}

/// The assembled four-stage classification pipeline.
#[derive(Clone)]
pub struct SpamPipeline {
    config: SpamPipelineConfig,
    resolver: Arc<dyn IdentifierResolver>,
    messages: Arc<dyn MessageResolver>,
    classifier: Arc<dyn SpamClassifier>,
}

impl SpamPipeline {
    pub fn new(
        config: SpamPipelineConfig,
        resolver: Arc<dyn IdentifierResolver>,
        messages: Arc<dyn MessageResolver>,
        classifier: Arc<dyn SpamClassifier>,
    ) -> Self {
        Self {
            config,
            resolver,
            messages,
            classifier,
        }
    }

    /// Build a pipeline whose three collaborators are one backend.
    pub fn with_backend<B>(config: SpamPipelineConfig, backend: Arc<B>) -> Self
    where
        B: IdentifierResolver + MessageResolver + SpamClassifier + 'static,
    {
        Self::new(config, backend.clone(), backend.clone(), backend)
    }

    pub fn config(&self) -> &SpamPipelineConfig {
        &self.config
    }

    /// Wire a fresh stage chain. Each call yields an independent runner.
    pub fn runner(&self) -> PipelineRunner<Identifier, ResultLine> {
        PipelineRunner::new(self.config.channel_capacity)
            .stage(DedupFanoutStage::new(Arc::clone(&self.resolver)))
            .stage(BatchFanoutStage::new(
                Arc::clone(&self.messages),
                self.config.batch.clone(),
            ))
            .stage(QuotaFanoutStage::new(
                Arc::clone(&self.classifier),
                self.config.quota.clone(),
            ))
            .stage(CollectAndSortStage::new())
    }

    /// Classify the mailboxes behind `identifiers`.
    pub async fn run<It>(&self, identifiers: It) -> Result<PipelineRun<ResultLine>, PipelineError>
    where
        It: IntoIterator<Item = Identifier>,
        It::IntoIter: Send + 'static,
    {
        self.runner().run_iter(identifiers).await
    }
}
