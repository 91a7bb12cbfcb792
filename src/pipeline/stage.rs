//! Stage contract and per-stage lifecycle tracking.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::error::StageError;
use crate::telemetry;

/// One concurrent processing unit between two typed channels.
///
/// `run` owns the output sender. Returning drops it, which is what closes
/// the channel for the next stage, so a stage must not return before all
/// of its in-flight work has finished.
#[async_trait]
pub trait Stage: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Stable name used in logs, metrics and reports.
    fn name(&self) -> &'static str;

    async fn run(
        self,
        input: mpsc::Receiver<Self::Input>,
        output: mpsc::Sender<Self::Output>,
        probe: StageProbe,
    ) -> Result<(), StageError>;
}

/// Adapts a plain async function into a [`Stage`].
pub struct FnStage<I, O, F> {
    name: &'static str,
    func: F,
    _payload: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnStage<I, O, F> {
    pub fn new(name: &'static str, func: F) -> Self {
        Self {
            name,
            func,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F, Fut> Stage for FnStage<I, O, F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: FnOnce(mpsc::Receiver<I>, mpsc::Sender<O>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(
        self,
        input: mpsc::Receiver<I>,
        output: mpsc::Sender<O>,
        _probe: StageProbe,
    ) -> Result<(), StageError> {
        (self.func)(input, output).await
    }
}

/// Stage lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StageState {
    Idle = 0,
    DrainingInput = 1,
    AwaitingInFlight = 2,
    Closed = 3,
}

impl StageState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::DrainingInput,
            2 => Self::AwaitingInFlight,
            _ => Self::Closed,
        }
    }
}

/// Item accounting for one stage after a run.
///
/// `filtered` counts items dropped on purpose (duplicates), `failed` counts
/// items lost to collaborator errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub state: StageState,
    pub received: u64,
    pub forwarded: u64,
    pub filtered: u64,
    pub failed: u64,
}

struct ProbeInner {
    state: AtomicU8,
    received: AtomicU64,
    forwarded: AtomicU64,
    filtered: AtomicU64,
    failed: AtomicU64,
}

/// Shared handle a stage uses to report progress.
///
/// Cheap to clone into per-item tasks. The runner keeps its own clone and
/// builds the [`StageReport`] once the stage is joined.
#[derive(Clone)]
pub struct StageProbe {
    stage: &'static str,
    inner: Arc<ProbeInner>,
}

impl StageProbe {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            inner: Arc::new(ProbeInner {
                state: AtomicU8::new(StageState::Idle as u8),
                received: AtomicU64::new(0),
                forwarded: AtomicU64::new(0),
                filtered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
            }),
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn state(&self) -> StageState {
        StageState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Move to `next`. Transitions only go forward.
    pub fn transition(&self, next: StageState) {
        let prev = self.inner.state.fetch_max(next as u8, Ordering::AcqRel);
        if prev < next as u8 {
            tracing::debug!(
                stage = self.stage,
                from = ?StageState::from_u8(prev),
                to = ?next,
                "stage transition"
            );
        }
    }

    pub fn received(&self) {
        self.received_many(1);
    }

    pub fn received_many(&self, count: u64) {
        self.inner.received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn forwarded(&self) {
        self.inner.forwarded.fetch_add(1, Ordering::Relaxed);
        telemetry::record_item_forwarded(self.stage);
    }

    pub fn filtered(&self) {
        self.inner.filtered.fetch_add(1, Ordering::Relaxed);
        telemetry::record_item_filtered(self.stage);
    }

    /// Record `count` items lost to a collaborator error.
    pub fn failed(&self, count: u64, reason: &'static str) {
        self.inner.failed.fetch_add(count, Ordering::Relaxed);
        telemetry::record_item_failed(self.stage, reason, count);
    }

    pub fn report(&self) -> StageReport {
        StageReport {
            stage: self.stage.to_string(),
            state: self.state(),
            received: self.inner.received.load(Ordering::Relaxed),
            forwarded: self.inner.forwarded.load(Ordering::Relaxed),
            filtered: self.inner.filtered.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for StageProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProbe")
            .field("stage", &self.stage)
            .field("state", &self.state())
            .finish()
    }
}
