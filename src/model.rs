//! Pipeline payload types.
//!
//! Each channel boundary carries exactly one of these types, so a stage
//! can never receive a payload meant for another boundary.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque user identifier (an email address in practice).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A resolved user.
///
/// `email` is the canonical key: several identifiers (aliases) may resolve
/// to the same record, and the dedup stage keys on this field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: u64,
    pub email: Identifier,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Record {
    pub fn new(id: u64, email: impl Into<Identifier>) -> Self {
        Self {
            id,
            email: email.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a payload attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Dedup key.
    pub fn key(&self) -> &Identifier {
        &self.email
    }
}

/// Handle of a single message.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for MessageId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A message paired with its spam verdict.
///
/// Ordering is the pipeline's result order: spam first, then ascending id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassifiedMessage {
    pub id: MessageId,
    pub spam: bool,
}

impl ClassifiedMessage {
    pub fn new(id: impl Into<MessageId>, spam: bool) -> Self {
        Self { id: id.into(), spam }
    }

    /// Render as the externally visible result line.
    pub fn to_line(&self) -> ResultLine {
        ResultLine(format!("{} {}", self.spam, self.id))
    }
}

impl Ord for ClassifiedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        // `true` must sort first, so compare the flags reversed.
        other
            .spam
            .cmp(&self.spam)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ClassifiedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Final output line: `"<spam-bool> <message-id>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultLine(String);

impl ResultLine {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ClassifiedMessage> for ResultLine {
    fn from(message: ClassifiedMessage) -> Self {
        message.to_line()
    }
}

impl PartialEq<&str> for ResultLine {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spam_sorts_before_ham() {
        let spam = ClassifiedMessage::new(99, true);
        let ham = ClassifiedMessage::new(1, false);
        assert!(spam < ham);
    }

    #[test]
    fn ids_ascend_within_group() {
        let mut messages = vec![
            ClassifiedMessage::new(7, false),
            ClassifiedMessage::new(3, true),
            ClassifiedMessage::new(2, false),
            ClassifiedMessage::new(1, true),
        ];
        messages.sort();
        let ids: Vec<u64> = messages.iter().map(|m| m.id.0).collect();
        assert_eq!(ids, vec![1, 3, 2, 7]);
    }

    #[test]
    fn line_format_matches_contract() {
        assert_eq!(ClassifiedMessage::new(10, true).to_line(), "true 10");
        assert_eq!(ClassifiedMessage::new(11, false).to_line(), "false 11");
    }

    #[test]
    fn record_key_is_email() {
        let record = Record::new(4, "a@x").with_attribute("name", "Ann");
        assert_eq!(record.key(), &Identifier::from("a@x"));
        assert_eq!(record.attributes.get("name").map(String::as_str), Some("Ann"));
    }

    #[test]
    fn record_serializes_without_empty_attributes() {
        let json = serde_json::to_string(&Record::new(1, "a@x")).unwrap();
        assert_eq!(json, r#"{"id":1,"email":"a@x"}"#);
    }
}
