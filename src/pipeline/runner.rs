//! Pipeline runner: wires stages into a chain of bounded channels.
//!
//! N stages get N+1 channels. The first is fed from the caller's source,
//! the last is drained into the run result. Every stage runs as its own
//! task and the runner joins all of them before returning.

use std::time::Instant;

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::error::{panic_message, PipelineError, StageError};
use super::stage::{Stage, StageProbe, StageReport, StageState};
use crate::telemetry::{self, PipelineSpan, SpanExt, StageSpan};

type Launch = Box<dyn FnOnce(Uuid) -> LaunchedStage + Send>;

struct LaunchedStage {
    name: &'static str,
    probe: StageProbe,
    handle: JoinHandle<Result<(), StageError>>,
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineRun<T> {
    pub run_id: Uuid,
    /// Items taken from the source.
    pub fed: u64,
    /// Items read from the last channel, in arrival order.
    pub items: Vec<T>,
    /// One report per stage, in chain order.
    pub reports: Vec<StageReport>,
}

impl<T> PipelineRun<T> {
    /// Report for the named stage.
    pub fn report(&self, stage: &str) -> Option<&StageReport> {
        self.reports.iter().find(|r| r.stage == stage)
    }

    /// Items lost to collaborator failures across all stages.
    pub fn total_failed(&self) -> u64 {
        self.reports.iter().map(|r| r.failed).sum()
    }
}

/// Typed chain of stages.
///
/// `I` is the type fed into the first channel, `O` the type of the last.
/// [`PipelineRunner::stage`] only accepts a stage whose input matches the
/// current tail, so a mis-wired chain does not compile.
pub struct PipelineRunner<I, O> {
    channel_capacity: usize,
    input: mpsc::Sender<I>,
    tail: mpsc::Receiver<O>,
    launches: Vec<Launch>,
    stage_names: Vec<&'static str>,
}

impl<I: Send + 'static> PipelineRunner<I, I> {
    /// Start an empty chain. A capacity of 1 is the closest tokio gets to
    /// an unbuffered hand-off; 0 is raised to 1.
    pub fn new(channel_capacity: usize) -> Self {
        let channel_capacity = channel_capacity.max(1);
        let (input, tail) = mpsc::channel(channel_capacity);
        Self {
            channel_capacity,
            input,
            tail,
            launches: Vec::new(),
            stage_names: Vec::new(),
        }
    }
}

impl<I, O> PipelineRunner<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Append a stage reading from the current tail channel.
    pub fn stage<S>(self, stage: S) -> PipelineRunner<I, S::Output>
    where
        S: Stage<Input = O>,
    {
        let Self {
            channel_capacity,
            input,
            tail,
            mut launches,
            mut stage_names,
        } = self;

        let (output, next_tail) = mpsc::channel(channel_capacity);
        stage_names.push(stage.name());
        launches.push(Box::new(move |run_id| launch(stage, tail, output, run_id)));

        PipelineRunner {
            channel_capacity,
            input,
            tail: next_tail,
            launches,
            stage_names,
        }
    }

    /// Channels in the chain, including the external input and output.
    pub fn channel_count(&self) -> usize {
        self.stage_names.len() + 1
    }

    pub fn stage_names(&self) -> &[&'static str] {
        &self.stage_names
    }

    /// Run the chain over `items`.
    pub async fn run_iter<It>(self, items: It) -> Result<PipelineRun<O>, PipelineError>
    where
        It: IntoIterator<Item = I>,
        It::IntoIter: Send + 'static,
    {
        self.run(stream::iter(items)).await
    }

    /// Run the chain over `source` and wait for every stage to finish.
    ///
    /// The first channel is closed once the source is exhausted. A stage
    /// error or panic fails the run, but only after all stages have been
    /// joined.
    pub async fn run<S>(self, source: S) -> Result<PipelineRun<O>, PipelineError>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        let run_id = Uuid::new_v4();
        let span = PipelineSpan::new(&run_id, self.stage_names.len());
        let result = self.run_inner(run_id, source).instrument(span.clone()).await;
        span.record_result(&result);
        result
    }

    async fn run_inner<S>(self, run_id: Uuid, source: S) -> Result<PipelineRun<O>, PipelineError>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        let started = Instant::now();
        let Self {
            input,
            mut tail,
            launches,
            ..
        } = self;

        let stages: Vec<LaunchedStage> = launches.into_iter().map(|launch| launch(run_id)).collect();
        let feeder = tokio::spawn(feed(source, input).in_current_span());

        let mut items = Vec::new();
        while let Some(item) = tail.recv().await {
            items.push(item);
        }

        let mut errors = Vec::new();
        let mut reports = Vec::with_capacity(stages.len());
        for stage in stages {
            let outcome = stage.handle.await;
            reports.push(stage.probe.report());
            let err = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(source)) => PipelineError::Stage {
                    stage: stage.name,
                    source,
                },
                Err(join) => PipelineError::StagePanicked {
                    stage: stage.name,
                    message: panic_message(join),
                },
            };
            tracing::error!(stage = stage.name, error = %err, "stage failed");
            errors.push(err);
        }

        let fed = match feeder.await {
            Ok(fed) => fed,
            Err(join) => {
                errors.push(PipelineError::SourcePanicked(panic_message(join)));
                0
            }
        };

        if let Some(err) = root_cause(errors) {
            return Err(err);
        }

        let elapsed = started.elapsed();
        telemetry::record_pipeline_run(items.len(), elapsed);
        tracing::info!(
            %run_id,
            fed,
            emitted = items.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline run complete"
        );

        Ok(PipelineRun {
            run_id,
            fed,
            items,
            reports,
        })
    }
}

/// A failing stage makes its upstream neighbours fail with
/// `DownstreamClosed`; report the stage that actually broke.
fn root_cause(mut errors: Vec<PipelineError>) -> Option<PipelineError> {
    let primary = errors.iter().position(|err| {
        !matches!(
            err,
            PipelineError::Stage {
                source: StageError::DownstreamClosed { .. },
                ..
            }
        )
    });
    match primary {
        Some(index) => Some(errors.swap_remove(index)),
        None => errors.into_iter().next(),
    }
}

fn launch<S: Stage>(
    stage: S,
    input: mpsc::Receiver<S::Input>,
    output: mpsc::Sender<S::Output>,
    run_id: Uuid,
) -> LaunchedStage {
    let name = stage.name();
    let probe = StageProbe::new(name);
    let worker_probe = probe.clone();

    let handle = tokio::spawn(
        async move {
            worker_probe.transition(StageState::DrainingInput);
            let started = Instant::now();
            let result = stage.run(input, output, worker_probe.clone()).await;
            worker_probe.transition(StageState::Closed);
            telemetry::record_stage_completed(name, started.elapsed());
            result
        }
        .instrument(StageSpan::new(&run_id, name)),
    );

    LaunchedStage {
        name,
        probe,
        handle,
    }
}

async fn feed<S, I>(source: S, input: mpsc::Sender<I>) -> u64
where
    S: Stream<Item = I>,
{
    let mut source = Box::pin(source);
    let mut fed = 0;
    while let Some(item) = source.next().await {
        if input.send(item).await.is_err() {
            tracing::warn!(fed, "first stage stopped accepting input");
            break;
        }
        fed += 1;
    }
    fed
}
