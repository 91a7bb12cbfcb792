//! Record batching and concurrent batch resolution.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::collaborators::MessageResolver;
use crate::model::{MessageId, Record};
use crate::pipeline::{FanOut, Stage, StageError, StageProbe, StageState};
use crate::telemetry;

/// Configuration for batch resolution.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_batch_size: 2 }
    }
}

/// A batch of records resolved together.
#[derive(Debug, Default)]
pub struct RecordBatch {
    pub records: Vec<Record>,
}

impl RecordBatch {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Move the filled batch out, leaving this one empty.
    pub fn take(&mut self) -> RecordBatch {
        std::mem::take(self)
    }
}

/// Fills batches up to the configured size.
pub struct BatchAccumulator {
    config: BatchConfig,
}

impl BatchAccumulator {
    pub fn new(config: BatchConfig) -> Self {
        let max_batch_size = config.max_batch_size.max(1);
        Self {
            config: BatchConfig { max_batch_size },
        }
    }

    pub fn max_batch_size(&self) -> usize {
        self.config.max_batch_size
    }

    /// Check if another record fits in the batch.
    pub fn can_add(&self, batch: &RecordBatch) -> bool {
        batch.len() < self.config.max_batch_size
    }

    /// Split an already collected list into full batches plus a remainder.
    pub fn split(&self, records: Vec<Record>) -> Vec<RecordBatch> {
        let mut batches = Vec::new();
        let mut current = RecordBatch::new();

        for record in records {
            if !self.can_add(&current) {
                batches.push(current.take());
            }
            current.push(record);
        }

        if !current.is_empty() {
            batches.push(current);
        }

        batches
    }

    /// Read the next batch from `input`.
    ///
    /// Waits for the first record, then keeps reading until the batch is
    /// full or the channel closes. Returns `None` once the input is closed
    /// and empty.
    pub async fn next_batch(&self, input: &mut mpsc::Receiver<Record>) -> Option<RecordBatch> {
        let first = input.recv().await?;
        let mut batch = RecordBatch::new();
        batch.push(first);

        while self.can_add(&batch) {
            match input.recv().await {
                Some(record) => batch.push(record),
                None => break,
            }
        }
        Some(batch)
    }
}

/// Resolves records to message ids in bounded batches.
///
/// Each full batch is dispatched on its own task and the next batch starts
/// filling immediately. Message ids from different batches interleave in
/// no particular order.
pub struct BatchFanoutStage {
    resolver: Arc<dyn MessageResolver>,
    accumulator: BatchAccumulator,
}

impl BatchFanoutStage {
    pub const NAME: &'static str = "batch";

    pub fn new(resolver: Arc<dyn MessageResolver>, config: BatchConfig) -> Self {
        Self {
            resolver,
            accumulator: BatchAccumulator::new(config),
        }
    }
}

#[async_trait]
impl Stage for BatchFanoutStage {
    type Input = Record;
    type Output = MessageId;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        self,
        mut input: mpsc::Receiver<Record>,
        output: mpsc::Sender<MessageId>,
        probe: StageProbe,
    ) -> Result<(), StageError> {
        let stage = Self::NAME;
        let mut dispatched = FanOut::new(stage);

        while let Some(batch) = self.accumulator.next_batch(&mut input).await {
            probe.received_many(batch.len() as u64);
            telemetry::record_batch_size(batch.len());

            let resolver = Arc::clone(&self.resolver);
            let output = output.clone();
            let probe = probe.clone();

            dispatched.spawn(async move {
                let size = batch.len() as u64;
                let ids = match resolver.resolve_batch(&batch.records).await {
                    Ok(ids) => ids,
                    Err(err) => {
                        tracing::warn!(size, error = %err, "batch resolution failed, dropping batch");
                        probe.failed(size, err.reason());
                        return Ok(());
                    }
                };
                for id in ids {
                    output
                        .send(id)
                        .await
                        .map_err(|_| StageError::DownstreamClosed { stage })?;
                    probe.forwarded();
                }
                Ok::<(), StageError>(())
            });
        }

        probe.transition(StageState::AwaitingInFlight);
        tracing::debug!(batches = dispatched.launched(), "input drained, awaiting batches");
        dispatched.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(n: u64) -> Vec<Record> {
        (1..=n).map(|i| Record::new(i, format!("u{i}@x"))).collect()
    }

    #[test]
    fn split_respects_size_limit() {
        let accumulator = BatchAccumulator::new(BatchConfig { max_batch_size: 2 });
        let batches = accumulator.split(records(5));
        let sizes: Vec<usize> = batches.iter().map(RecordBatch::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[test]
    fn zero_size_is_raised_to_one() {
        let accumulator = BatchAccumulator::new(BatchConfig { max_batch_size: 0 });
        assert_eq!(accumulator.max_batch_size(), 1);
        assert_eq!(accumulator.split(records(3)).len(), 3);
    }

    #[test]
    fn take_leaves_batch_empty() {
        let mut batch = RecordBatch::new();
        batch.push(Record::new(1, "a@x"));
        let taken = batch.take();
        assert_eq!(taken.len(), 1);
        assert!(batch.is_empty());
    }

    #[test]
    fn split_of_nothing_is_empty() {
        let accumulator = BatchAccumulator::new(BatchConfig::default());
        assert!(accumulator.split(Vec::new()).is_empty());
    }

    #[tokio::test]
    async fn next_batch_flushes_remainder_on_close() {
        let accumulator = BatchAccumulator::new(BatchConfig { max_batch_size: 2 });
        let (tx, mut rx) = mpsc::channel(8);
        for record in records(3) {
            tx.send(record).await.unwrap();
        }
        drop(tx);

        assert_eq!(accumulator.next_batch(&mut rx).await.unwrap().len(), 2);
        assert_eq!(accumulator.next_batch(&mut rx).await.unwrap().len(), 1);
        assert!(accumulator.next_batch(&mut rx).await.is_none());
    }
}
