//! Quota-limited classification.
//!
//! Every message id gets its own task, but a task must hold a token from
//! the [`QuotaPool`] while it calls the classifier, so at most
//! `max_in_flight` classifications are outstanding at any instant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, AcquireError, OwnedSemaphorePermit, Semaphore};

use crate::collaborators::SpamClassifier;
use crate::model::{ClassifiedMessage, MessageId};
use crate::pipeline::{FanOut, Stage, StageError, StageProbe, StageState};
use crate::telemetry;

/// Configuration for the classification quota.
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Maximum concurrent classifier calls.
    pub max_in_flight: usize,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self { max_in_flight: 3 }
    }
}

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

/// Fixed-capacity token pool.
#[derive(Debug, Clone)]
pub struct QuotaPool {
    inner: Arc<PoolInner>,
}

impl QuotaPool {
    /// Create a pool with `capacity` tokens (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a token.
    pub async fn acquire(&self) -> Result<QuotaGuard, AcquireError> {
        let permit = Arc::clone(&self.inner.semaphore).acquire_owned().await?;
        let current = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(current, Ordering::SeqCst);
        telemetry::record_quota_in_flight(current);
        Ok(QuotaGuard {
            _permit: permit,
            inner: Arc::clone(&self.inner),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Tokens currently held.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Most tokens ever held at once.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    /// Stop handing out tokens. Pending and future `acquire` calls fail;
    /// tokens already held stay valid until dropped.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }
}

/// RAII token; returned to the pool on drop.
#[derive(Debug)]
pub struct QuotaGuard {
    _permit: OwnedSemaphorePermit,
    inner: Arc<PoolInner>,
}

impl Drop for QuotaGuard {
    fn drop(&mut self) {
        let current = self.inner.in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
        telemetry::record_quota_in_flight(current);
    }
}

/// Classifies message ids under a concurrency quota.
pub struct QuotaFanoutStage {
    classifier: Arc<dyn SpamClassifier>,
    pool: QuotaPool,
}

impl QuotaFanoutStage {
    pub const NAME: &'static str = "classify";

    pub fn new(classifier: Arc<dyn SpamClassifier>, config: QuotaConfig) -> Self {
        Self {
            classifier,
            pool: QuotaPool::new(config.max_in_flight),
        }
    }

    /// Handle on the stage's token pool, for observing usage.
    pub fn pool(&self) -> QuotaPool {
        self.pool.clone()
    }
}

#[async_trait]
impl Stage for QuotaFanoutStage {
    type Input = MessageId;
    type Output = ClassifiedMessage;

    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn run(
        self,
        mut input: mpsc::Receiver<MessageId>,
        output: mpsc::Sender<ClassifiedMessage>,
        probe: StageProbe,
    ) -> Result<(), StageError> {
        let stage = Self::NAME;
        let mut checks = FanOut::new(stage);

        while let Some(id) = input.recv().await {
            probe.received();
            let classifier = Arc::clone(&self.classifier);
            let pool = self.pool.clone();
            let output = output.clone();
            let probe = probe.clone();

            checks.spawn(async move {
                let token = pool
                    .acquire()
                    .await
                    .map_err(|_| StageError::QuotaClosed { stage })?;
                let verdict = classifier.classify(id).await;
                drop(token);

                let spam = match verdict {
                    Ok(spam) => spam,
                    Err(err) => {
                        tracing::warn!(%id, error = %err, "classification failed, dropping message");
                        probe.failed(1, err.reason());
                        return Ok(());
                    }
                };
                output
                    .send(ClassifiedMessage { id, spam })
                    .await
                    .map_err(|_| StageError::DownstreamClosed { stage })?;
                probe.forwarded();
                Ok::<(), StageError>(())
            });
        }

        probe.transition(StageState::AwaitingInFlight);
        tracing::debug!(checks = checks.launched(), "input drained, awaiting classifications");
        checks.join().await?;

        tracing::debug!(peak = self.pool.peak(), capacity = self.pool.capacity(), "quota stage complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    #[tokio::test]
    async fn guard_release_returns_token() {
        let pool = QuotaPool::new(2);
        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.in_flight(), 2);
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.in_flight(), 1);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.in_flight(), 0);
        assert_eq!(pool.peak(), 2);
    }

    #[tokio::test]
    async fn acquire_waits_while_exhausted() {
        let pool = QuotaPool::new(1);
        let held = pool.acquire().await.unwrap();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let guard = assert_ready!(waiter.poll()).unwrap();
        assert_eq!(pool.in_flight(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn close_fails_waiters_but_keeps_held_tokens() {
        let pool = QuotaPool::new(1);
        let held = pool.acquire().await.unwrap();

        let mut waiter = task::spawn(pool.acquire());
        assert_pending!(waiter.poll());

        pool.close();
        assert!(pool.is_closed());
        assert!(assert_ready!(waiter.poll()).is_err());
        assert_eq!(pool.in_flight(), 1);

        drop(held);
        assert_eq!(pool.in_flight(), 0);
        assert!(pool.acquire().await.is_err());
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(QuotaPool::new(0).capacity(), 1);
    }
}
