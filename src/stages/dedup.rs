//! Identifier resolution with first-writer-wins deduplication.
//!
//! Every identifier gets its own lookup task; there is no bound on lookups
//! in flight; the caller bounds volume through the input it feeds. Records
//! are deduplicated on their key field, so aliases of the same user are
//! collapsed too.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::collaborators::IdentifierResolver;
use crate::model::{Identifier, Record};
use crate::pipeline::{FanOut, Stage, StageError, StageProbe, StageState};

/// Keys already emitted during one stage invocation.
#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashSet<Identifier>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `key`. Returns `true` only the first time a key is seen.
    pub fn first_sighting(&mut self, key: &Identifier) -> bool {
        self.seen.insert(key.clone())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Resolves identifiers to unique records.
pub struct DedupFanoutStage {
    resolver: Arc<dyn IdentifierResolver>,
}

impl DedupFanoutStage {
    pub const NAME: &'static str = "dedup";

    pub fn new(resolver: Arc<dyn IdentifierResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Stage for DedupFanoutStage {
    type Input = Identifier;
    type Output = Record;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        self,
        mut input: mpsc::Receiver<Identifier>,
        output: mpsc::Sender<Record>,
        probe: StageProbe,
    ) -> Result<(), StageError> {
        let stage = Self::NAME;
        // Owned by this invocation, shared only with the tasks it spawns.
        let index = Arc::new(Mutex::new(DedupIndex::new()));
        let mut lookups = FanOut::new(stage);

        while let Some(identifier) = input.recv().await {
            probe.received();
            let resolver = Arc::clone(&self.resolver);
            let index = Arc::clone(&index);
            let output = output.clone();
            let probe = probe.clone();

            lookups.spawn(async move {
                let record = match resolver.resolve(&identifier).await {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(%identifier, error = %err, "lookup failed, dropping identifier");
                        probe.failed(1, err.reason());
                        return Ok(());
                    }
                };

                // Check, insert and emit under one lock so two lookups
                // resolving to the same key cannot both forward.
                let mut index = index.lock().await;
                if !index.first_sighting(record.key()) {
                    tracing::debug!(%identifier, key = %record.key(), "duplicate record dropped");
                    probe.filtered();
                    return Ok(());
                }
                output
                    .send(record)
                    .await
                    .map_err(|_| StageError::DownstreamClosed { stage })?;
                probe.forwarded();
                Ok::<(), StageError>(())
            });
        }

        probe.transition(StageState::AwaitingInFlight);
        tracing::debug!(lookups = lookups.launched(), "input drained, awaiting lookups");
        lookups.join().await?;

        let unique = index.lock().await.len();
        tracing::debug!(unique, "dedup stage complete");
        Ok(())
    }
}
