//! Demand → replica conversion.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::error::PlanResult;
use crate::propagate::RateVector;
use crate::topology::Topology;

/// Service name → required replica count.
pub type ReplicaDemand = BTreeMap<String, u32>;

/// Fraction of a single replica below which demand is treated as noise.
pub const NEGLIGIBLE_REPLICA_FRACTION: f64 = 0.25;

/// Consumption rates below this are clamped up to it.
pub const MIN_CONSUMPTION_RATE: f64 = 1.0;

/// Replicas of `service` needed to drain `demand_rate` messages per minute
/// from `queue`.
///
/// Demand below a quarter replica rounds to zero; anything above rounds up.
pub fn required_replicas(
    topology: &Topology,
    queue: &str,
    service: &str,
    demand_rate: f64,
) -> PlanResult<u32> {
    let mut capacity = topology.consumption_rate(queue, service)?;
    if capacity < MIN_CONSUMPTION_RATE {
        warn!(
            %service,
            %queue,
            consumption_rate = capacity,
            "consumption rate below 1 message/minute, calculating with 1 instead"
        );
        capacity = MIN_CONSUMPTION_RATE;
    }

    let raw = demand_rate / capacity;
    if raw.is_nan() || raw < NEGLIGIBLE_REPLICA_FRACTION {
        return Ok(0);
    }
    // Float → int casts saturate, so absurd demand lands on u32::MAX.
    Ok(raw.ceil() as u32)
}

/// Required replicas per service for a vector of per-queue demand.
///
/// A service fed by several queues gets the maximum of its per-queue
/// requirements. Queues without a consumer are ignored.
pub fn replica_demand(topology: &Topology, rates: &RateVector) -> PlanResult<ReplicaDemand> {
    let mut demand = ReplicaDemand::new();

    for (queue, rate) in rates {
        let Some(binding) = topology.binding(queue) else {
            continue;
        };
        if !binding.has_consumer() {
            continue;
        }
        let service = binding.service.as_str();
        let replicas = required_replicas(topology, queue, service, *rate)?;
        debug!(%service, %queue, rate, replicas, "replicas required for queue");

        let entry = demand.entry(service.to_string()).or_insert(0);
        *entry = (*entry).max(replicas);
    }

    Ok(demand)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ConsumerBinding;

    fn topology(entries: Vec<(&str, ConsumerBinding)>) -> Topology {
        Topology::new(
            entries
                .into_iter()
                .map(|(q, b)| (q.to_string(), b))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn rounds_up() {
        let t = topology(vec![("A", ConsumerBinding::new("s1", 10.0))]);
        assert_eq!(required_replicas(&t, "A", "s1", 100.0), Ok(10));
        assert_eq!(required_replicas(&t, "A", "s1", 101.0), Ok(11));
        assert_eq!(required_replicas(&t, "A", "s1", 2.5), Ok(1));
    }

    #[test]
    fn below_quarter_replica_is_zero() {
        let t = topology(vec![("A", ConsumerBinding::new("s1", 10.0))]);
        assert_eq!(required_replicas(&t, "A", "s1", 2.0), Ok(0));
        assert_eq!(required_replicas(&t, "A", "s1", 0.0), Ok(0));
    }

    #[test]
    fn degenerate_capacity_is_clamped() {
        let t = topology(vec![("A", ConsumerBinding::new("s1", 0.5))]);
        // 3 / max(0.5, 1) = 3
        assert_eq!(required_replicas(&t, "A", "s1", 3.0), Ok(3));
    }

    #[test]
    fn wrong_service_is_reported() {
        let t = topology(vec![("A", ConsumerBinding::new("s1", 10.0))]);
        assert!(required_replicas(&t, "A", "other", 100.0).is_err());
    }

    #[test]
    fn aggregates_with_max_not_sum() {
        let t = topology(vec![
            ("C", ConsumerBinding::new("s3", 10.0)),
            ("D", ConsumerBinding::new("s3", 10.0)),
        ]);
        let rates = RateVector::from([("C".to_string(), 20.0), ("D".to_string(), 50.0)]);
        let demand = replica_demand(&t, &rates).unwrap();
        assert_eq!(demand, ReplicaDemand::from([("s3".to_string(), 5)]));
    }

    #[test]
    fn skips_terminal_and_unknown_queues() {
        let t = topology(vec![
            ("A", ConsumerBinding::new("s1", 10.0)),
            ("OUT", ConsumerBinding::terminal()),
        ]);
        let rates = RateVector::from([
            ("A".to_string(), 0.0),
            ("OUT".to_string(), 500.0),
            ("ELSEWHERE".to_string(), 500.0),
        ]);
        let demand = replica_demand(&t, &rates).unwrap();
        assert_eq!(demand, ReplicaDemand::from([("s1".to_string(), 0)]));
    }
}
