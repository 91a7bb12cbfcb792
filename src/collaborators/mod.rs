//! External collaborators consumed by the pipeline stages.
//!
//! The pipeline treats these as slow, fallible black boxes. Stages hold
//! them as `Arc<dyn _>` and call them from spawned tasks.

mod error;
pub mod fixture;

use async_trait::async_trait;

use crate::model::{Identifier, MessageId, Record};

pub use error::{BatchError, ClassifyError, LookupError};
pub use fixture::{FixtureBackend, FixtureError, FixtureSpec};

/// Resolves a single identifier to its canonical record.
#[async_trait]
pub trait IdentifierResolver: Send + Sync {
    async fn resolve(&self, identifier: &Identifier) -> Result<Record, LookupError>;
}

/// Resolves a batch of records to the ids of their messages.
#[async_trait]
pub trait MessageResolver: Send + Sync {
    async fn resolve_batch(&self, records: &[Record]) -> Result<Vec<MessageId>, BatchError>;
}

/// Classifies a single message.
#[async_trait]
pub trait SpamClassifier: Send + Sync {
    /// Returns `true` if the message is spam.
    async fn classify(&self, id: MessageId) -> Result<bool, ClassifyError>;
}
