//! Admission and weight distribution within a single group.
//!
//! Admission walks the members in one sequence: incumbents first, highest
//! priority first, then newcomers in priority order. Each member is kept
//! while its minimum still fits in the quota. The first member that does
//! not fit closes admission for itself and everyone after it, so a demoted
//! incumbent also turns away every later incumbent and every newcomer.
//! Within a priority level admission sequence or request order decides.
//!
//! The quota left after every admitted minimum is water-filled in
//! proportion to each stream's remaining headroom, never above its
//! maximum. Integer rounding leftovers go to the highest-ranked streams
//! among those next in line.

use std::cmp::{Ordering, Reverse};

use tracing::debug;

use crate::ingest::Candidate;

/// Result of allocating one group's quota.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAllocation {
    pub quota: u64,

    /// Final weight per member, index-aligned with the input. `None` means
    /// the member was not admitted.
    pub weights: Vec<Option<u64>>,
}

impl GroupAllocation {
    /// Sum of admitted weights.
    pub fn allocated(&self) -> u64 {
        self.weights.iter().flatten().sum()
    }

    pub fn admitted_count(&self) -> usize {
        self.weights.iter().filter(|w| w.is_some()).count()
    }

    pub fn has_rejections(&self) -> bool {
        self.weights.iter().any(Option::is_none)
    }
}

/// Ranking key: priority descending, incumbents first, then arrival.
fn rank(candidate: &Candidate) -> (Reverse<i32>, bool, u64) {
    (
        Reverse(candidate.priority),
        !candidate.is_incumbent(),
        candidate.arrival(),
    )
}

/// Decides admission and weights for the members of one group.
pub fn allocate_group(quota: u64, members: &[Candidate]) -> GroupAllocation {
    let mut incumbents: Vec<usize> = (0..members.len())
        .filter(|&i| members[i].is_incumbent())
        .collect();
    let mut newcomers: Vec<usize> = (0..members.len())
        .filter(|&i| !members[i].is_incumbent())
        .collect();
    incumbents.sort_by_key(|&i| rank(&members[i]));
    newcomers.sort_by_key(|&i| rank(&members[i]));
    let sequence: Vec<usize> = incumbents.into_iter().chain(newcomers).collect();

    let mut admitted = Vec::with_capacity(members.len());
    let mut reserved: u64 = 0;

    for (pos, &i) in sequence.iter().enumerate() {
        let next = reserved.saturating_add(members[i].min_weight);
        if next > quota {
            debug!(
                stream_id = %members[i].stream_id,
                incumbent = members[i].is_incumbent(),
                min_weight = members[i].min_weight,
                quota,
                turned_away = sequence.len() - pos,
                "Admission closed, minimum does not fit"
            );
            break;
        }
        reserved = next;
        admitted.push(i);
    }

    admitted.sort_by_key(|&i| rank(&members[i]));

    let caps: Vec<u64> = admitted.iter().map(|&i| members[i].max_weight).collect();
    let mut levels: Vec<u64> = admitted.iter().map(|&i| members[i].min_weight).collect();
    water_fill(&mut levels, &caps, quota - reserved);

    let mut weights = vec![None; members.len()];
    for (&i, level) in admitted.iter().zip(levels) {
        weights[i] = Some(level);
    }

    GroupAllocation { quota, weights }
}

/// Raises `levels` toward `caps` by up to `surplus` units in total.
///
/// Every stream is filled to the same fraction `f` of its headroom, rounded
/// down, with `f` as large as the surplus allows. Units left over are the
/// ones that would complete the next step; they go to the earliest entries
/// among the streams that step would raise. Slices are in rank order.
///
/// A larger surplus, or fewer streams, never lowers any level.
fn water_fill(levels: &mut [u64], caps: &[u64], surplus: u64) {
    let headroom: Vec<u64> = levels
        .iter()
        .zip(caps)
        .map(|(level, cap)| cap - level)
        .collect();
    let total: u128 = headroom.iter().map(|&h| u128::from(h)).sum();
    if surplus == 0 || total == 0 {
        return;
    }
    if u128::from(surplus) >= total {
        levels.copy_from_slice(caps);
        return;
    }

    // Start at f = surplus / total, which always fits.
    let mut filled: Vec<u64> = headroom
        .iter()
        .map(|&h| (u128::from(surplus) * u128::from(h) / total) as u64)
        .collect();
    let mut remaining = surplus - filled.iter().sum::<u64>();

    // Each step raises f to the next breakpoint (filled + 1) / headroom.
    while remaining > 0 {
        let mut step: Vec<usize> = Vec::new();
        for i in 0..headroom.len() {
            if filled[i] >= headroom[i] {
                continue;
            }
            match step.first() {
                None => step.push(i),
                Some(&j) => match next_breakpoint_cmp(filled[i], headroom[i], filled[j], headroom[j]) {
                    Ordering::Less => {
                        step.clear();
                        step.push(i);
                    }
                    Ordering::Equal => step.push(i),
                    Ordering::Greater => {}
                },
            }
        }
        if step.is_empty() {
            break;
        }

        let width = step.len() as u64;
        let take = width.min(remaining) as usize;
        for &i in &step[..take] {
            filled[i] += 1;
        }
        remaining -= take as u64;
    }

    for (level, add) in levels.iter_mut().zip(filled) {
        *level += add;
    }
}

/// Compares `(fa + 1) / ha` with `(fb + 1) / hb`.
fn next_breakpoint_cmp(fa: u64, ha: u64, fb: u64, hb: u64) -> Ordering {
    let lhs = u128::from(fa + 1) * u128::from(hb);
    let rhs = u128::from(fb + 1) * u128::from(ha);
    lhs.cmp(&rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Origin;

    fn newcomer(id: &str, min: u64, max: u64, priority: i32, index: usize) -> Candidate {
        Candidate {
            stream_id: id.to_string(),
            min_weight: min,
            max_weight: max,
            priority,
            tags: Vec::new(),
            origin: Origin::Newcomer {
                request_index: index,
            },
        }
    }

    fn incumbent(id: &str, min: u64, max: u64, priority: i32, seq: u64) -> Candidate {
        Candidate {
            origin: Origin::Incumbent {
                admitted_seq: seq,
                previous_weight: min,
            },
            ..newcomer(id, min, max, priority, 0)
        }
    }

    #[test]
    fn test_single_stream_takes_whole_quota() {
        let alloc = allocate_group(15, &[newcomer("s1", 1, 20, 0, 0)]);
        assert_eq!(alloc.weights, vec![Some(15)]);
    }

    #[test]
    fn test_equal_streams_split_evenly() {
        let alloc = allocate_group(
            15,
            &[incumbent("s1", 1, 20, 0, 0), newcomer("s2", 1, 20, 0, 0)],
        );

        // Surplus 13 splits 6/6, the odd unit goes to the incumbent.
        assert_eq!(alloc.weights, vec![Some(8), Some(7)]);
        assert_eq!(alloc.allocated(), 15);
    }

    #[test]
    fn test_incumbent_keeps_minimum_against_higher_priority_newcomers() {
        let members = vec![
            incumbent("s1", 1, 20, 0, 0),
            newcomer("p5", 5, 20, 5, 0),
            newcomer("p4", 5, 20, 4, 1),
            newcomer("p3", 5, 20, 3, 2),
        ];

        let alloc = allocate_group(15, &members);

        assert!(alloc.weights[0].is_some());
        assert!(alloc.weights[1].is_some());
        assert!(alloc.weights[2].is_some());
        assert_eq!(alloc.weights[3], None);
        assert_eq!(alloc.allocated(), 15);
        // Surplus 4 over headroom 19/15/15: s1 reaches 3/19 first.
        assert_eq!(alloc.weights, vec![Some(3), Some(6), Some(6), None]);
    }

    #[test]
    fn test_first_newcomer_that_does_not_fit_closes_admission() {
        let members = vec![
            newcomer("big", 10, 10, 2, 0),
            newcomer("huge", 8, 8, 1, 1),
            newcomer("small", 1, 1, 0, 2),
        ];

        let alloc = allocate_group(12, &members);

        assert_eq!(alloc.weights, vec![Some(10), None, None]);
        assert!(alloc.has_rejections());
    }

    #[test]
    fn test_incumbents_demoted_when_quota_shrinks() {
        let members = vec![
            incumbent("low", 6, 10, 0, 0),
            incumbent("high", 6, 10, 5, 1),
            incumbent("tiny", 2, 10, 0, 2),
        ];

        let alloc = allocate_group(10, &members);

        // high fits first; low does not, which also closes admission for tiny.
        assert_eq!(alloc.weights, vec![None, Some(10), None]);
        assert_eq!(alloc.allocated(), 10);
    }

    #[test]
    fn test_demoted_incumbent_turns_newcomers_away() {
        let members = vec![
            incumbent("kept", 4, 4, 0, 0),
            incumbent("dropped", 5, 5, 0, 1),
            newcomer("small", 1, 1, 3, 0),
        ];

        let alloc = allocate_group(6, &members);

        // small outranks both by priority but newcomers queue behind incumbents.
        assert_eq!(alloc.weights, vec![Some(4), None, None]);
    }

    #[test]
    fn test_streams_capped_at_max() {
        let alloc = allocate_group(
            100,
            &[newcomer("a", 1, 5, 0, 0), newcomer("b", 2, 7, 0, 1)],
        );

        assert_eq!(alloc.weights, vec![Some(5), Some(7)]);
        assert_eq!(alloc.allocated(), 12);
    }

    #[test]
    fn test_surplus_proportional_to_headroom() {
        let alloc = allocate_group(
            15,
            &[newcomer("wide", 1, 20, 0, 0), newcomer("narrow", 1, 5, 0, 1)],
        );

        // Headroom 19 and 4: 13 * 19 / 23 = 10, 13 * 4 / 23 = 2; wide's next
        // step (11/19) comes before narrow's (3/4).
        assert_eq!(alloc.weights, vec![Some(12), Some(3)]);
    }

    #[test]
    fn test_leftover_units_go_to_highest_priority() {
        let members = vec![
            newcomer("a", 0, 10, 0, 0),
            newcomer("b", 0, 10, 0, 1),
            newcomer("c", 0, 10, 7, 2),
        ];

        let alloc = allocate_group(5, &members);

        // 5 * 10 / 30 = 1 each; the next step ties, so c then a.
        assert_eq!(alloc.weights, vec![Some(2), Some(1), Some(2)]);
    }

    #[test]
    fn test_zero_quota_admits_only_zero_minimums() {
        let alloc = allocate_group(
            0,
            &[newcomer("free", 0, 5, 0, 0), newcomer("paid", 1, 5, 0, 1)],
        );

        assert_eq!(alloc.weights, vec![Some(0), None]);
    }

    #[test]
    fn test_more_surplus_never_lowers_a_level() {
        let caps = [7, 12, 30, 4];
        let mut previous = vec![0; caps.len()];
        for surplus in 0..=53 {
            let mut levels = vec![0; caps.len()];
            water_fill(&mut levels, &caps, surplus);

            assert_eq!(levels.iter().sum::<u64>(), surplus);
            for (now, before) in levels.iter().zip(&previous) {
                assert!(now >= before, "surplus {surplus}: {levels:?} vs {previous:?}");
            }
            previous = levels;
        }
    }

    #[test]
    fn test_water_fill_respects_caps() {
        let mut levels = vec![0, 0, 0];
        water_fill(&mut levels, &[1, 1, 100], 50);
        assert_eq!(levels.iter().sum::<u64>(), 50);
        assert!(levels[0] <= 1 && levels[1] <= 1);
    }
}
