//! Final ordering stage.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::model::{ClassifiedMessage, ResultLine};
use crate::pipeline::{Stage, StageError, StageProbe, StageState};

/// Drains all classified messages, sorts them, and emits result lines.
///
/// Nothing is emitted until the input is closed: the order spans the whole
/// set. Sorting is stable, spam first, then ascending message id.
#[derive(Debug, Default)]
pub struct CollectAndSortStage;

impl CollectAndSortStage {
    pub const NAME: &'static str = "collect";

    pub fn new() -> Self {
        Self
    }
}

/// Sort `messages` into result order and render them.
pub fn order_results(mut messages: Vec<ClassifiedMessage>) -> Vec<ResultLine> {
    messages.sort();
    messages.into_iter().map(ResultLine::from).collect()
}

#[async_trait]
impl Stage for CollectAndSortStage {
    type Input = ClassifiedMessage;
    type Output = ResultLine;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        self,
        mut input: mpsc::Receiver<ClassifiedMessage>,
        output: mpsc::Sender<ResultLine>,
        probe: StageProbe,
    ) -> Result<(), StageError> {
        let mut messages = Vec::new();
        while let Some(message) = input.recv().await {
            probe.received();
            messages.push(message);
        }
        probe.transition(StageState::AwaitingInFlight);

        for line in order_results(messages) {
            output
                .send(line)
                .await
                .map_err(|_| StageError::DownstreamClosed { stage: Self::NAME })?;
            probe.forwarded();
        }
        Ok(())
    }
}
