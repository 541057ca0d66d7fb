//! Core data types shared by every stage of the allocation pipeline.

use serde::{Deserialize, Serialize};

/// Namespace that scopes an independent allocation state.
///
/// Two namespaces never share capacity, state, or locks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub guard_name: String,
    pub environment: String,
}

impl Namespace {
    pub fn new(guard_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            guard_name: guard_name.into(),
            environment: environment.into(),
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.guard_name, self.environment)
    }
}

/// A single key/value tag attached to a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Looks up a tag value by key.
pub(crate) fn find_tag<'a>(tags: &'a [Tag], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|t| t.key == key)
        .map(|t| t.value.as_str())
}

/// An admission or update request for one stream.
///
/// Weights are signed on the wire so that negative input can be reported as a
/// validation error instead of failing to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub stream_id: String,
    pub min_weight: i64,
    pub max_weight: i64,

    /// Higher is more important.
    #[serde(default)]
    pub priority: i32,

    /// Ordered tags; keys must be unique.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

impl StreamRequest {
    pub fn new(stream_id: impl Into<String>, min_weight: i64, max_weight: i64) -> Self {
        Self {
            stream_id: stream_id.into(),
            min_weight,
            max_weight,
            priority: 0,
            tags: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(key, value));
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }
}

/// A committed, admitted stream.
///
/// Only the allocation store hands these out; every instance satisfies
/// `min_weight <= current_weight <= max_weight`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStream {
    pub stream_id: String,
    pub current_weight: u64,
    pub min_weight: u64,
    pub max_weight: u64,
    pub priority: i32,
    pub tags: Vec<Tag>,

    /// Sequence number of the stream's first admission in its namespace.
    pub admitted_seq: u64,
}

impl ActiveStream {
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }
}

/// Key of a group of streams sharing a grouping-tag value.
///
/// Ordering is lexical on the tag value, with the ungrouped bucket last.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// Streams carrying the grouping tag with this value.
    Tagged(String),
    /// Streams without the grouping tag.
    Ungrouped,
}

impl GroupKey {
    /// Derives the group key of a stream from its tags.
    pub fn from_tags(tags: &[Tag], grouping_tag_key: &str) -> Self {
        match find_tag(tags, grouping_tag_key) {
            Some(value) => Self::Tagged(value.to_string()),
            None => Self::Ungrouped,
        }
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tagged(value) => write!(f, "{value}"),
            Self::Ungrouped => write!(f, "<ungrouped>"),
        }
    }
}

/// Outcome for a single stream after a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationStatus {
    /// The stream holds a weight within its bounds.
    Admitted,
    /// A new candidate could not be admitted.
    Rejected,
    /// A previously admitted stream lost its admission.
    Demoted,
}

/// Per-stream entry of an `UpdateStreams` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamAllocation {
    pub stream_id: String,

    /// Zero unless `status` is `Admitted`.
    pub allocated_weight: u64,

    pub status: AllocationStatus,
}

impl StreamAllocation {
    pub fn is_admitted(&self) -> bool {
        self.status == AllocationStatus::Admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_key_from_tags() {
        let tags = vec![Tag::new("region", "eu"), Tag::new("customer_id", "c1")];

        assert_eq!(
            GroupKey::from_tags(&tags, "customer_id"),
            GroupKey::Tagged("c1".to_string())
        );
        assert_eq!(GroupKey::from_tags(&tags, "tenant"), GroupKey::Ungrouped);
    }

    #[test]
    fn test_group_key_ordering_puts_ungrouped_last() {
        let mut keys = vec![
            GroupKey::Ungrouped,
            GroupKey::Tagged("b".to_string()),
            GroupKey::Tagged("a".to_string()),
        ];
        keys.sort();

        assert_eq!(keys[0], GroupKey::Tagged("a".to_string()));
        assert_eq!(keys[2], GroupKey::Ungrouped);
    }

    #[test]
    fn test_stream_request_defaults_from_json() {
        let req: StreamRequest =
            serde_json::from_str(r#"{"stream_id":"s1","min_weight":1,"max_weight":20}"#)
                .expect("decode");

        assert_eq!(req.priority, 0);
        assert!(req.tags.is_empty());
    }

    #[test]
    fn test_allocation_status_serializes_snake_case() {
        let json = serde_json::to_string(&AllocationStatus::Demoted).expect("encode");
        assert_eq!(json, r#""demoted""#);
    }
}
