//! The stream balancer: one all-or-nothing recomputation per call.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::allocator::{allocate_group, GroupAllocation};
use crate::config::{GlobalConfig, GuardConfigs};
use crate::error::{EngineError, EngineResult};
use crate::group::{aggregate, Group};
use crate::ingest::{build_working_set, Candidate};
use crate::response::{build_response, Decision, UpdateStreamsResponse};
use crate::solver::{solve, GroupDemand};
use crate::store::{Allocation, AllocationStore};
use crate::types::{GroupKey, Namespace, StreamRequest};

/// Allocates weight to streams across every namespace it serves.
///
/// Calls on the same namespace are serialized; calls on different
/// namespaces run independently. Readers never block writers.
pub struct StreamBalancer {
    configs: GuardConfigs,
    store: AllocationStore,
}

impl StreamBalancer {
    /// Creates a balancer after validating every configuration.
    pub fn new(configs: GuardConfigs) -> EngineResult<Self> {
        configs.validate()?;
        Ok(Self {
            configs,
            store: AllocationStore::new(),
        })
    }

    /// Configuration in force for a namespace.
    pub fn config_for(&self, namespace: &Namespace) -> &GlobalConfig {
        self.configs.get(namespace)
    }

    /// Last committed allocation of a namespace.
    pub fn streams(&self, namespace: &Namespace) -> Arc<Allocation> {
        self.store.snapshot(namespace)
    }

    /// Namespaces that have committed state.
    pub fn namespaces(&self) -> Vec<Namespace> {
        self.store.namespaces()
    }

    /// Applies a batch of admissions/updates and terminations, recomputes
    /// the namespace's allocation and commits it.
    ///
    /// On any error the committed state is left untouched.
    #[instrument(
        skip(self, namespace, requests, ended),
        fields(namespace = %namespace, requests = requests.len(), ended = ended.len())
    )]
    pub fn update_streams(
        &self,
        namespace: &Namespace,
        requests: &[StreamRequest],
        ended: &[String],
    ) -> EngineResult<UpdateStreamsResponse> {
        let config = self.configs.get(namespace);

        let result = self.store.transact(namespace, |current| {
            let working = build_working_set(current, requests, ended)?;
            let decisions = recompute(config, working.candidates)?;
            verify(config, &decisions)?;
            Ok(build_response(&working.requested, decisions, current.next_seq))
        });

        let (committed, results) = match result {
            Ok(ok) => ok,
            Err(e) => {
                if !e.is_validation() {
                    warn!(error = %e, "Allocation failed, state unchanged");
                }
                return Err(e);
            }
        };

        let total_weight = committed.total_weight();
        info!(
            version = committed.version,
            active_streams = committed.len(),
            total_weight,
            overall_capacity = config.overall_capacity,
            "Allocation committed"
        );

        Ok(UpdateStreamsResponse {
            version: committed.version,
            results,
            total_weight,
        })
    }
}

/// Solves and allocates until no group drops a member.
///
/// A group that rejects or demotes members cannot use the part of its
/// quota those members asked for, so they are removed and the quotas are
/// solved again, letting that capacity flow to other groups. Lowering a
/// ceiling never lowers another group's quota, so every member admitted in
/// one round still fits in the next and the second round settles.
fn recompute(config: &GlobalConfig, candidates: Vec<Candidate>) -> EngineResult<Vec<Decision>> {
    let group_capacity = config.group_capacity();
    let max_rounds = candidates.len() + 1;

    let mut groups = aggregate(candidates, &config.grouping_tag_key);
    let mut decisions = Vec::new();

    for round in 1..=max_rounds {
        let demands: Vec<GroupDemand> = groups
            .iter()
            .map(|g| GroupDemand::new(g.key.clone(), g.ceiling(group_capacity)))
            .collect();
        let quotas = solve(&demands, config.overall_capacity);

        let allocations: Vec<GroupAllocation> = groups
            .iter()
            .zip(&quotas)
            .map(|(group, &quota)| allocate_group(quota, &group.members))
            .collect();

        if !allocations.iter().any(GroupAllocation::has_rejections) {
            for (group, allocation) in groups.into_iter().zip(allocations) {
                log_group(&group, &allocation, round);
                decisions.extend(
                    group
                        .members
                        .into_iter()
                        .zip(allocation.weights)
                        .map(|(candidate, weight)| Decision { candidate, weight }),
                );
            }
            return Ok(decisions);
        }

        for (group, allocation) in groups.iter_mut().zip(&allocations) {
            let keep: Vec<bool> = allocation.weights.iter().map(Option::is_some).collect();
            decisions.extend(
                group
                    .retain_flagged(&keep)
                    .into_iter()
                    .map(|candidate| Decision {
                        candidate,
                        weight: None,
                    }),
            );
        }
        groups.retain(|g| !g.members.is_empty());
    }

    Err(EngineError::Internal(format!(
        "allocation did not settle within {max_rounds} rounds"
    )))
}

fn log_group(group: &Group, allocation: &GroupAllocation, round: usize) {
    debug!(
        group = %group.key,
        members = group.members.len(),
        demand_min = group.demand_min,
        demand_max = group.demand_max,
        quota = allocation.quota,
        allocated = allocation.allocated(),
        round,
        "Group allocated"
    );
}

/// Checks the committed-state invariants on a candidate result.
fn verify(config: &GlobalConfig, decisions: &[Decision]) -> EngineResult<()> {
    let mut total: u64 = 0;
    let mut per_group: BTreeMap<GroupKey, u64> = BTreeMap::new();

    for decision in decisions {
        let Some(weight) = decision.weight else {
            continue;
        };
        let candidate = &decision.candidate;
        if weight < candidate.min_weight || weight > candidate.max_weight {
            return Err(EngineError::Internal(format!(
                "stream {} weight {weight} outside [{}, {}]",
                candidate.stream_id, candidate.min_weight, candidate.max_weight
            )));
        }

        total = total.saturating_add(weight);
        let key = GroupKey::from_tags(&candidate.tags, &config.grouping_tag_key);
        let group_total = per_group.entry(key).or_default();
        *group_total = group_total.saturating_add(weight);
    }

    if total > config.overall_capacity {
        return Err(EngineError::Internal(format!(
            "total weight {total} exceeds overall capacity {}",
            config.overall_capacity
        )));
    }

    let group_capacity = config.group_capacity();
    if let Some((key, group_total)) = per_group.iter().find(|(_, t)| **t > group_capacity) {
        return Err(EngineError::Internal(format!(
            "group {key} weight {group_total} exceeds group capacity {group_capacity}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Origin;
    use crate::types::{AllocationStatus, Tag};

    fn balancer() -> StreamBalancer {
        StreamBalancer::new(GuardConfigs::new(GlobalConfig::default())).expect("balancer")
    }

    fn ns() -> Namespace {
        Namespace::new("Stream Balancer Quota", "sb_quota")
    }

    fn req(id: &str, min: i64, max: i64, customer: &str) -> StreamRequest {
        StreamRequest::new(id, min, max).with_tag("customer_id", customer)
    }

    fn decision(id: &str, weight: u64, customer: &str) -> Decision {
        Decision {
            candidate: Candidate {
                stream_id: id.to_string(),
                min_weight: 1,
                max_weight: 20,
                priority: 0,
                tags: vec![Tag::new("customer_id", customer)],
                origin: Origin::Newcomer { request_index: 0 },
            },
            weight: Some(weight),
        }
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let result = StreamBalancer::new(GuardConfigs::new(GlobalConfig::new(10, 5, "")));
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[test]
    fn test_validation_error_leaves_state() {
        let balancer = balancer();
        balancer
            .update_streams(&ns(), &[req("s1", 1, 20, "c1")], &[])
            .expect("update");

        let err = balancer
            .update_streams(
                &ns(),
                &[req("s2", 1, 20, "c1"), req("s2", 1, 20, "c1")],
                &["s1".to_string()],
            )
            .unwrap_err();

        assert!(err.is_validation());
        let snap = balancer.streams(&ns());
        assert_eq!(snap.version, 1);
        assert_eq!(snap.get("s1").map(|s| s.current_weight), Some(15));
    }

    #[test]
    fn test_reclaimed_quota_flows_to_other_groups() {
        let balancer = StreamBalancer::new(GuardConfigs::new(GlobalConfig::new(
            30,
            20,
            "customer_id",
        )))
        .expect("balancer");

        // c2 would get 15 but cannot admit a stream with minimum 16.
        let resp = balancer
            .update_streams(&ns(), &[req("a", 1, 20, "c1"), req("b", 16, 20, "c2")], &[])
            .expect("update");

        assert_eq!(resp.get("b").map(|r| r.status), Some(AllocationStatus::Rejected));
        assert_eq!(resp.weight_of("a"), 20);
    }

    #[test]
    fn test_reclaiming_keeps_first_round_admissions() {
        let balancer = StreamBalancer::new(GuardConfigs::new(GlobalConfig::new(
            49,
            15,
            "customer_id",
        )))
        .expect("balancer");

        // Round one: a 13, b 12 (by rejected), c 12, d 12. Dropping by lowers
        // b's ceiling to 13, which must not cost a its odd unit.
        let resp = balancer
            .update_streams(
                &ns(),
                &[
                    req("sa", 13, 15, "a"),
                    req("bx", 10, 13, "b"),
                    req("by", 3, 3, "b"),
                    req("sc", 1, 15, "c"),
                    req("sd", 1, 15, "d"),
                ],
                &[],
            )
            .expect("update");

        assert_eq!(resp.get("by").map(|r| r.status), Some(AllocationStatus::Rejected));
        assert_eq!(resp.weight_of("sa"), 13);
        assert_eq!(resp.weight_of("bx"), 12);
        assert_eq!(resp.total_weight, 49);

        let again = balancer.update_streams(&ns(), &[], &[]).expect("update");
        assert_eq!(again.version, resp.version);
        assert_eq!(again.weight_of("sa"), 13);
    }

    #[test]
    fn test_terminated_stream_is_not_reported() {
        let balancer = balancer();
        balancer
            .update_streams(&ns(), &[req("s1", 1, 20, "c1")], &[])
            .expect("update");

        let resp = balancer
            .update_streams(&ns(), &[], &["s1".to_string()])
            .expect("update");

        assert!(resp.results.is_empty());
        assert_eq!(resp.total_weight, 0);
        assert!(balancer.streams(&ns()).is_empty());
    }

    #[test]
    fn test_verify_catches_group_overrun() {
        let config = GlobalConfig::default();
        let decisions = vec![decision("a", 10, "c1"), decision("b", 10, "c1")];

        let err = verify(&config, &decisions).unwrap_err();
        assert!(matches!(err, EngineError::Internal(msg) if msg.contains("group c1")));
    }

    #[test]
    fn test_verify_catches_overall_overrun() {
        let config = GlobalConfig::new(20, 15, "customer_id");
        let decisions = vec![decision("a", 12, "c1"), decision("b", 12, "c2")];

        assert!(verify(&config, &decisions).is_err());
    }

    #[test]
    fn test_verify_catches_bound_violation() {
        let config = GlobalConfig::default();
        let decisions = vec![decision("a", 0, "c1")];

        assert!(verify(&config, &decisions).is_err());
    }
}
