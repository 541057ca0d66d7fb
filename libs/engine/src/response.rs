//! Assembly of the externally visible result and the next committed state.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::ingest::{Candidate, Origin};
use crate::store::StagedAllocation;
use crate::types::{ActiveStream, AllocationStatus, StreamAllocation};

/// Final decision for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub candidate: Candidate,

    /// Committed weight, or `None` if the candidate was not admitted.
    pub weight: Option<u64>,
}

/// Result of an `UpdateStreams` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStreamsResponse {
    /// Version of the namespace state after the call.
    pub version: u64,

    /// Requested streams in request order, then every other affected
    /// stream ordered by id.
    pub results: Vec<StreamAllocation>,

    /// Sum of committed weights in the namespace.
    pub total_weight: u64,
}

impl UpdateStreamsResponse {
    pub fn get(&self, stream_id: &str) -> Option<&StreamAllocation> {
        self.results.iter().find(|r| r.stream_id == stream_id)
    }

    /// Allocated weight of a stream, zero if it is unknown or not admitted.
    pub fn weight_of(&self, stream_id: &str) -> u64 {
        self.get(stream_id).map_or(0, |r| r.allocated_weight)
    }
}

fn status_of(decision: &Decision) -> StreamAllocation {
    let (allocated_weight, status) = match (decision.weight, decision.candidate.origin) {
        (Some(weight), _) => (weight, AllocationStatus::Admitted),
        (None, Origin::Incumbent { .. }) => (0, AllocationStatus::Demoted),
        (None, Origin::Newcomer { .. }) => (0, AllocationStatus::Rejected),
    };
    StreamAllocation {
        stream_id: decision.candidate.stream_id.clone(),
        allocated_weight,
        status,
    }
}

/// Builds the per-stream results and the stream set to commit.
///
/// Newly admitted streams get admission sequence numbers in request order,
/// starting at `next_seq`.
pub fn build_response(
    requested: &[String],
    decisions: Vec<Decision>,
    next_seq: u64,
) -> (StagedAllocation, Vec<StreamAllocation>) {
    let mut by_id: HashMap<&str, &Decision> = decisions
        .iter()
        .map(|d| (d.candidate.stream_id.as_str(), d))
        .collect();

    let mut results = Vec::with_capacity(decisions.len());
    for id in requested {
        if let Some(decision) = by_id.remove(id.as_str()) {
            results.push(status_of(decision));
        }
    }

    let mut rest: Vec<&Decision> = by_id.into_values().collect();
    rest.sort_by(|a, b| a.candidate.stream_id.cmp(&b.candidate.stream_id));
    results.extend(rest.into_iter().map(status_of));

    let mut admitted: Vec<(&Decision, u64)> = decisions
        .iter()
        .filter_map(|d| d.weight.map(|weight| (d, weight)))
        .collect();
    admitted.sort_by_key(|(d, _)| match d.candidate.origin {
        Origin::Incumbent { .. } => (0, 0),
        Origin::Newcomer { request_index } => (1, request_index),
    });

    let mut seq = next_seq;
    let mut streams = BTreeMap::new();
    for (decision, weight) in admitted {
        let candidate = &decision.candidate;
        let admitted_seq = match candidate.origin {
            Origin::Incumbent { admitted_seq, .. } => admitted_seq,
            Origin::Newcomer { .. } => {
                seq += 1;
                seq - 1
            }
        };
        streams.insert(
            candidate.stream_id.clone(),
            ActiveStream {
                stream_id: candidate.stream_id.clone(),
                current_weight: weight,
                min_weight: candidate.min_weight,
                max_weight: candidate.max_weight,
                priority: candidate.priority,
                tags: candidate.tags.clone(),
                admitted_seq,
            },
        );
    }

    (
        StagedAllocation {
            streams,
            next_seq: seq,
        },
        results,
    )
}
