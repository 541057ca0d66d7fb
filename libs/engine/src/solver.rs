//! Max-min fair division of a namespace's capacity across groups.
//!
//! Each group asks for a ceiling (its `demand_max`, capped at the per-group
//! capacity). When the ceilings fit, every group gets its ceiling. Otherwise
//! the pool is filled progressively: the remaining capacity is split evenly
//! across the open groups, groups whose ceiling fits within the even share
//! are fixed at their ceiling, and their unused share flows back to the
//! rest. Every round either fixes at least one group or hands out the whole
//! pool, so the loop runs at most once per group.
//!
//! Groups are visited in ascending order of ceiling. Integer remainders of
//! the final even split go one unit each to the open groups in key order,
//! so lowering one group's ceiling never takes a unit from another group.

use tracing::debug;

use crate::types::GroupKey;

/// Input to the solver for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDemand {
    pub key: GroupKey,
    pub ceiling: u64,
}

impl GroupDemand {
    pub fn new(key: GroupKey, ceiling: u64) -> Self {
        Self { key, ceiling }
    }
}

/// Computes each group's quota; the result is index-aligned with `demands`.
///
/// Every quota is at most its ceiling and the quotas sum to at most
/// `capacity`.
pub fn solve(demands: &[GroupDemand], capacity: u64) -> Vec<u64> {
    let total: u128 = demands.iter().map(|d| u128::from(d.ceiling)).sum();
    if total <= u128::from(capacity) {
        return demands.iter().map(|d| d.ceiling).collect();
    }

    let mut order: Vec<usize> = (0..demands.len()).collect();
    order.sort_by(|&a, &b| {
        demands[a]
            .ceiling
            .cmp(&demands[b].ceiling)
            .then_with(|| demands[a].key.cmp(&demands[b].key))
    });

    let mut quotas = vec![0; demands.len()];
    let mut pool = capacity;
    let mut open = order.as_slice();
    let mut rounds = 0;

    while !open.is_empty() && pool > 0 {
        rounds += 1;
        let width = open.len() as u64;
        let share = pool / width;

        // Ceilings ascend, so the groups satisfied by this share are a prefix.
        let fixed = open
            .iter()
            .take_while(|&&i| demands[i].ceiling <= share)
            .count();

        if fixed == 0 {
            let remainder = (pool % width) as usize;
            let mut by_key = open.to_vec();
            by_key.sort_by(|&a, &b| demands[a].key.cmp(&demands[b].key));
            for (pos, &i) in by_key.iter().enumerate() {
                quotas[i] = share + u64::from(pos < remainder);
            }
            pool = 0;
            break;
        }

        for &i in &open[..fixed] {
            quotas[i] = demands[i].ceiling;
            pool -= demands[i].ceiling;
        }
        open = &open[fixed..];
    }

    debug!(
        groups = demands.len(),
        capacity,
        unallocated = pool,
        rounds,
        "Progressive filling complete"
    );

    quotas
}
