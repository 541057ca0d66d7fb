//! Partitioning of candidates into groups by grouping-tag value.

use std::collections::BTreeMap;

use crate::ingest::Candidate;
use crate::types::GroupKey;

/// Candidates sharing a grouping-tag value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub key: GroupKey,

    /// Members in working-set order.
    pub members: Vec<Candidate>,

    /// Sum of member minimum weights.
    pub demand_min: u64,

    /// Sum of member maximum weights.
    pub demand_max: u64,
}

impl Group {
    fn new(key: GroupKey) -> Self {
        Self {
            key,
            members: Vec::new(),
            demand_min: 0,
            demand_max: 0,
        }
    }

    fn push(&mut self, candidate: Candidate) {
        self.demand_min = self.demand_min.saturating_add(candidate.min_weight);
        self.demand_max = self.demand_max.saturating_add(candidate.max_weight);
        self.members.push(candidate);
    }

    /// Largest quota this group can use under a per-group capacity.
    pub fn ceiling(&self, group_capacity: u64) -> u64 {
        self.demand_max.min(group_capacity)
    }

    /// Keeps the members whose flag in `keep` is set, refreshes the demand
    /// totals and returns the members that were dropped.
    ///
    /// `keep` is index-aligned with `members`; missing flags drop.
    pub fn retain_flagged(&mut self, keep: &[bool]) -> Vec<Candidate> {
        let members = std::mem::take(&mut self.members);
        self.demand_min = 0;
        self.demand_max = 0;

        let mut dropped = Vec::new();
        for (i, member) in members.into_iter().enumerate() {
            if keep.get(i).copied().unwrap_or(false) {
                self.push(member);
            } else {
                dropped.push(member);
            }
        }
        dropped
    }
}

/// Buckets candidates by the value of `grouping_tag_key`.
///
/// Candidates without the tag share the ungrouped bucket. Groups come back
/// ordered by key.
pub fn aggregate<I>(candidates: I, grouping_tag_key: &str) -> Vec<Group>
where
    I: IntoIterator<Item = Candidate>,
{
    let mut groups: BTreeMap<GroupKey, Group> = BTreeMap::new();
    for candidate in candidates {
        let key = GroupKey::from_tags(&candidate.tags, grouping_tag_key);
        groups
            .entry(key.clone())
            .or_insert_with(|| Group::new(key))
            .push(candidate);
    }
    groups.into_values().collect()
}
