//! Request validation and merging against committed state.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::{EngineError, EngineResult, FieldViolation};
use crate::store::Allocation;
use crate::types::{StreamRequest, Tag};

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Already admitted before this call.
    Incumbent { admitted_seq: u64, previous_weight: u64 },
    /// First requested in this call.
    Newcomer { request_index: usize },
}

/// A stream competing for weight in the current call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub stream_id: String,
    pub min_weight: u64,
    pub max_weight: u64,
    pub priority: i32,
    pub tags: Vec<Tag>,
    pub origin: Origin,
}

impl Candidate {
    pub fn is_incumbent(&self) -> bool {
        matches!(self.origin, Origin::Incumbent { .. })
    }

    /// Position among candidates of the same kind: admission sequence for
    /// incumbents, request index for newcomers.
    pub fn arrival(&self) -> u64 {
        match self.origin {
            Origin::Incumbent { admitted_seq, .. } => admitted_seq,
            Origin::Newcomer { request_index } => request_index as u64,
        }
    }

    pub fn previous_weight(&self) -> Option<u64> {
        match self.origin {
            Origin::Incumbent { previous_weight, .. } => Some(previous_weight),
            Origin::Newcomer { .. } => None,
        }
    }
}

/// Candidates for one call, incumbents first (by admission sequence), then
/// newcomers in request order.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    pub candidates: Vec<Candidate>,

    /// Requested stream ids in request order.
    pub requested: Vec<String>,

    /// Terminated ids that were actually active.
    pub removed: Vec<String>,
}

impl WorkingSet {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Validates a batch of requests, collecting every violation.
pub fn validate_requests(requests: &[StreamRequest]) -> EngineResult<()> {
    let mut violations = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();

    for (i, req) in requests.iter().enumerate() {
        if req.stream_id.is_empty() {
            violations.push(FieldViolation::new(
                format!("requests[{i}].stream_id"),
                "must not be empty",
            ));
        } else if let Some(first) = seen.insert(req.stream_id.as_str(), i) {
            // Keep pointing at the first occurrence.
            seen.insert(req.stream_id.as_str(), first);
            violations.push(FieldViolation::new(
                format!("requests[{i}].stream_id"),
                format!(
                    "duplicate stream_id '{}' (first seen at requests[{first}])",
                    req.stream_id
                ),
            ));
        }

        if req.min_weight < 0 {
            violations.push(FieldViolation::new(
                format!("requests[{i}].min_weight"),
                "must not be negative",
            ));
        }
        if req.max_weight < 0 {
            violations.push(FieldViolation::new(
                format!("requests[{i}].max_weight"),
                "must not be negative",
            ));
        } else if req.max_weight < req.min_weight {
            violations.push(FieldViolation::new(
                format!("requests[{i}].max_weight"),
                format!(
                    "must be greater than or equal to min_weight ({})",
                    req.min_weight
                ),
            ));
        }

        let mut keys = HashSet::new();
        for (k, tag) in req.tags.iter().enumerate() {
            if tag.key.is_empty() {
                violations.push(FieldViolation::new(
                    format!("requests[{i}].tags[{k}].key"),
                    "must not be empty",
                ));
            } else if !keys.insert(tag.key.as_str()) {
                violations.push(FieldViolation::new(
                    format!("requests[{i}].tags[{k}].key"),
                    format!("duplicate tag key '{}'", tag.key),
                ));
            }
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation { violations })
    }
}

/// Validates the batch and merges it with the committed allocation.
///
/// Terminations are applied first, so an id that is both ended and requested
/// re-enters as a newcomer. Unknown terminations are ignored.
pub fn build_working_set(
    current: &Allocation,
    requests: &[StreamRequest],
    ended: &[String],
) -> EngineResult<WorkingSet> {
    validate_requests(requests)?;

    let mut active = current.streams.clone();
    let mut removed = Vec::new();
    for id in ended {
        if active.remove(id).is_some() {
            removed.push(id.clone());
        }
    }

    let mut candidates = Vec::with_capacity(active.len() + requests.len());
    let mut newcomers = Vec::new();

    for (request_index, req) in requests.iter().enumerate() {
        // Weights were validated as non-negative above.
        let min_weight = req.min_weight as u64;
        let max_weight = req.max_weight as u64;

        match active.remove(&req.stream_id) {
            Some(existing) => candidates.push(Candidate {
                stream_id: existing.stream_id,
                min_weight,
                max_weight,
                priority: req.priority,
                tags: req.tags.clone(),
                origin: Origin::Incumbent {
                    admitted_seq: existing.admitted_seq,
                    previous_weight: existing.current_weight,
                },
            }),
            None => newcomers.push(Candidate {
                stream_id: req.stream_id.clone(),
                min_weight,
                max_weight,
                priority: req.priority,
                tags: req.tags.clone(),
                origin: Origin::Newcomer { request_index },
            }),
        }
    }

    candidates.extend(active.into_values().map(|existing| Candidate {
        origin: Origin::Incumbent {
            admitted_seq: existing.admitted_seq,
            previous_weight: existing.current_weight,
        },
        stream_id: existing.stream_id,
        min_weight: existing.min_weight,
        max_weight: existing.max_weight,
        priority: existing.priority,
        tags: existing.tags,
    }));
    candidates.sort_by_key(Candidate::arrival);
    candidates.extend(newcomers);

    debug!(
        candidates = candidates.len(),
        requested = requests.len(),
        removed = removed.len(),
        "Built working set"
    );

    Ok(WorkingSet {
        candidates,
        requested: requests.iter().map(|r| r.stream_id.clone()).collect(),
        removed,
    })
}
