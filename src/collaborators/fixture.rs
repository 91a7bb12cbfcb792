//! In-memory collaborator backend driven by a TOML fixture.
//!
//! Models the user directory, mailboxes and spam verdicts of a small
//! deployment, including email aliases and injected failures. The backend
//! enforces its own batch-size and concurrency limits the way the real
//! services do, and records what it observed so callers can verify the
//! pipeline stayed within them.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use thiserror::Error;

use super::{
    BatchError, ClassifyError, IdentifierResolver, LookupError, MessageResolver, SpamClassifier,
};
use crate::model::{Identifier, MessageId, Record};

/// Record id handed out for identifiers missing from the directory.
pub const UNKNOWN_USER_ID: u64 = 0;

/// Errors loading a fixture.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Invalid fixture: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Identifier {0} is claimed by more than one user")]
    DuplicateIdentifier(String),
}

/// A user in the fixture directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureUser {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub messages: Vec<u64>,
    #[serde(default)]
    pub fail_lookup: bool,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// A message verdict in the fixture.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureMessage {
    pub id: u64,
    #[serde(default)]
    pub spam: bool,
    #[serde(default)]
    pub fail: bool,
}

/// Declarative fixture contents.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureSpec {
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
    /// Any batch containing one of these user ids fails.
    #[serde(default)]
    pub fail_batches_containing: Vec<u64>,
    /// Reject identifiers missing from the directory instead of
    /// resolving them to an empty synthetic record.
    #[serde(default)]
    pub strict_directory: bool,
    #[serde(default)]
    pub users: Vec<FixtureUser>,
    #[serde(default)]
    pub messages: Vec<FixtureMessage>,
}

fn default_max_batch_size() -> usize {
    2
}

fn default_max_concurrent_checks() -> usize {
    3
}

impl Default for FixtureSpec {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_concurrent_checks: default_max_concurrent_checks(),
            latency_ms: 0,
            jitter_ms: 0,
            fail_batches_containing: Vec::new(),
            strict_directory: false,
            users: Vec::new(),
            messages: Vec::new(),
        }
    }
}

struct DirectoryEntry {
    record: Record,
    fail_lookup: bool,
}

/// Collaborator backend implementing all three pipeline boundaries.
pub struct FixtureBackend {
    /// Email and every alias map to the canonical entry.
    directory: DashMap<Identifier, DirectoryEntry>,
    mailboxes: HashMap<Identifier, Vec<MessageId>>,
    verdicts: HashMap<MessageId, FixtureMessage>,
    failing_users: HashSet<u64>,
    strict_directory: bool,
    max_batch_size: usize,
    max_concurrent_checks: usize,
    latency: Duration,
    jitter_ms: u64,
    observed_batches: Mutex<Vec<usize>>,
    lookups: AtomicUsize,
    checks_in_flight: AtomicUsize,
    peak_checks: AtomicUsize,
}

impl FixtureBackend {
    /// Build a backend from a parsed fixture.
    pub fn new(spec: FixtureSpec) -> Result<Self, FixtureError> {
        let directory = DashMap::new();
        let mut mailboxes = HashMap::new();

        for user in spec.users {
            let email = Identifier::new(user.email.clone());
            let mut record = Record::new(user.id, email.clone());
            record.attributes = user.attributes;

            for name in std::iter::once(&user.email).chain(user.aliases.iter()) {
                let entry = DirectoryEntry {
                    record: record.clone(),
                    fail_lookup: user.fail_lookup,
                };
                if directory.insert(Identifier::new(name.clone()), entry).is_some() {
                    return Err(FixtureError::DuplicateIdentifier(name.clone()));
                }
            }
            let messages = user.messages.into_iter().map(MessageId).collect();
            mailboxes.insert(email, messages);
        }

        let verdicts = spec
            .messages
            .into_iter()
            .map(|m| (MessageId(m.id), m))
            .collect();

        Ok(Self {
            directory,
            mailboxes,
            verdicts,
            failing_users: spec.fail_batches_containing.into_iter().collect(),
            strict_directory: spec.strict_directory,
            max_batch_size: spec.max_batch_size.max(1),
            max_concurrent_checks: spec.max_concurrent_checks.max(1),
            latency: Duration::from_millis(spec.latency_ms),
            jitter_ms: spec.jitter_ms,
            observed_batches: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            checks_in_flight: AtomicUsize::new(0),
            peak_checks: AtomicUsize::new(0),
        })
    }

    /// Parse a TOML fixture document.
    pub fn from_toml_str(source: &str) -> Result<Self, FixtureError> {
        let spec: FixtureSpec = toml::from_str(source)?;
        Self::new(spec)
    }

    /// Override latency settings (milliseconds).
    pub fn with_latency(mut self, latency_ms: u64, jitter_ms: u64) -> Self {
        self.latency = Duration::from_millis(latency_ms);
        self.jitter_ms = jitter_ms;
        self
    }

    /// Sizes of every batch `resolve_batch` was called with, in call order.
    pub fn observed_batches(&self) -> Vec<usize> {
        self.observed_batches.lock().clone()
    }

    /// Highest number of simultaneous `classify` calls seen.
    pub fn peak_concurrent_checks(&self) -> usize {
        self.peak_checks.load(Ordering::SeqCst)
    }

    /// Total `resolve` calls served.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let extra = if self.jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        };
        let delay = self.latency + Duration::from_millis(extra);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl IdentifierResolver for FixtureBackend {
    async fn resolve(&self, identifier: &Identifier) -> Result<Record, LookupError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let Some(entry) = self.directory.get(identifier) else {
            if self.strict_directory {
                return Err(LookupError::NotFound(identifier.clone()));
            }
            return Ok(Record::new(UNKNOWN_USER_ID, identifier.clone()));
        };
        if entry.fail_lookup {
            return Err(LookupError::Backend {
                identifier: identifier.clone(),
                reason: "directory unavailable".to_string(),
            });
        }
        Ok(entry.record.clone())
    }
}

#[async_trait]
impl MessageResolver for FixtureBackend {
    async fn resolve_batch(&self, records: &[Record]) -> Result<Vec<MessageId>, BatchError> {
        self.observed_batches.lock().push(records.len());

        if records.len() > self.max_batch_size {
            return Err(BatchError::TooLarge {
                size: records.len(),
                max: self.max_batch_size,
            });
        }
        self.simulate_latency().await;

        if let Some(bad) = records.iter().find(|r| self.failing_users.contains(&r.id)) {
            return Err(BatchError::Backend(format!(
                "mailbox for user {} unavailable",
                bad.id
            )));
        }

        let ids = records
            .iter()
            .filter_map(|r| self.mailboxes.get(r.key()))
            .flat_map(|mailbox| mailbox.iter().copied())
            .collect();
        Ok(ids)
    }
}

/// Decrements the in-flight counter when a classify call ends.
struct CheckSlot<'a>(&'a AtomicUsize);

impl Drop for CheckSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpamClassifier for FixtureBackend {
    async fn classify(&self, id: MessageId) -> Result<bool, ClassifyError> {
        let current = self.checks_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _slot = CheckSlot(&self.checks_in_flight);
        self.peak_checks.fetch_max(current, Ordering::SeqCst);

        if current > self.max_concurrent_checks {
            return Err(ClassifyError::QuotaExceeded {
                current,
                max: self.max_concurrent_checks,
            });
        }
        self.simulate_latency().await;

        match self.verdicts.get(&id) {
            Some(message) if message.fail => Err(ClassifyError::Backend {
                id,
                reason: "classifier unavailable".to_string(),
            }),
            Some(message) => Ok(message.spam),
            None => Ok(false),
        }
    }
}
