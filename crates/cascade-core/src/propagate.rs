//! Follow-up rate propagation.
//!
//! Demand drained from a queue re-appears downstream, scaled by each
//! edge's relative production rate. The traversal walks the subgraph
//! reachable from the origin in topological order, so a queue reached by
//! several paths receives the sum of every path's contribution and is
//! expanded only once its full inflow is known.

use std::collections::{BTreeMap, VecDeque};

use crate::error::{PlanError, PlanResult};
use crate::topology::Topology;

/// Queue name → demand rate in messages per minute.
pub type RateVector = BTreeMap<String, f64>;

/// Demand induced on every queue downstream of `origin` when `origin_rate`
/// messages per minute are drained from it.
///
/// The origin itself is not part of the result. Queues without a binding
/// receive their share but are not expanded further.
pub fn propagate(topology: &Topology, origin: &str, origin_rate: f64) -> PlanResult<RateVector> {
    let mut result = RateVector::new();
    if topology.binding(origin).is_none() {
        return Ok(result);
    }

    // In-degrees restricted to edges inside the reachable subgraph.
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::from([(origin, 0)]);
    let mut pending: VecDeque<&str> = VecDeque::from([origin]);
    while let Some(queue) = pending.pop_front() {
        let Some(binding) = topology.binding(queue) else {
            continue;
        };
        for target in binding.produces.keys() {
            let target = target.as_str();
            let first_visit = !in_degree.contains_key(target);
            *in_degree.entry(target).or_insert(0) += 1;
            if first_visit {
                pending.push_back(target);
            }
        }
    }

    if in_degree.get(origin).copied().unwrap_or(0) > 0 {
        return Err(PlanError::Cycle(origin.to_string()));
    }

    let mut inflow: BTreeMap<&str, f64> = BTreeMap::from([(origin, origin_rate)]);
    let mut ready: VecDeque<&str> = VecDeque::from([origin]);
    let mut expanded = 0usize;

    while let Some(queue) = ready.pop_front() {
        expanded += 1;
        let rate = inflow.get(queue).copied().unwrap_or(0.0);
        let Some(binding) = topology.binding(queue) else {
            continue;
        };

        for (target, relative) in &binding.produces {
            let target = target.as_str();
            let contribution = relative * rate;
            *result.entry(target.to_string()).or_insert(0.0) += contribution;
            *inflow.entry(target).or_insert(0.0) += contribution;

            if let Some(degree) = in_degree.get_mut(target) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push_back(target);
                }
            }
        }
    }

    if expanded < in_degree.len() {
        return Err(PlanError::Cycle(origin.to_string()));
    }
    Ok(result)
}

/// Add every entry of `other` into `into`, summing shared keys.
pub fn add_rates(into: &mut RateVector, other: &RateVector) {
    for (queue, rate) in other {
        *into.entry(queue.clone()).or_insert(0.0) += rate;
    }
}
