//! Pipeline topology: which service drains which queue, and where the
//! drained messages go next.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;

use crate::error::{ConfigError, ConfigResult, PlanError, PlanResult};

/// The consumer side of a queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsumerBinding {
    /// Service draining the queue. Empty for terminal queues.
    pub service: String,
    /// Messages per minute a single replica consumes.
    pub consumption_rate: f64,
    /// Downstream queue → messages emitted per consumed message.
    pub produces: BTreeMap<String, f64>,
}

impl ConsumerBinding {
    /// Binding for a queue drained by `service`.
    pub fn new(service: impl Into<String>, consumption_rate: f64) -> Self {
        Self {
            service: service.into(),
            consumption_rate,
            produces: BTreeMap::new(),
        }
    }

    /// Binding for a queue nobody scales for, which may still forward load.
    pub fn terminal() -> Self {
        Self::new("", 0.0)
    }

    /// Add a downstream queue.
    pub fn producing(mut self, queue: impl Into<String>, relative_rate: f64) -> Self {
        self.produces.insert(queue.into(), relative_rate);
        self
    }

    /// Whether a service is configured to consume this queue.
    pub fn has_consumer(&self) -> bool {
        !self.service.trim().is_empty()
    }
}

/// Immutable queue → consumer graph. Guaranteed acyclic once built.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Topology {
    queues: BTreeMap<String, ConsumerBinding>,
}

impl Topology {
    /// Build a topology, rejecting invalid rates and cycles.
    pub fn new(queues: BTreeMap<String, ConsumerBinding>) -> ConfigResult<Self> {
        for (queue, binding) in &queues {
            if binding.has_consumer()
                && (!binding.consumption_rate.is_finite() || binding.consumption_rate <= 0.0)
            {
                return Err(ConfigError::InvalidValue {
                    field: format!("queues.{queue}.consumption_rate"),
                    reason: format!("must be positive, got {}", binding.consumption_rate),
                });
            }
            for (target, rate) in &binding.produces {
                if !rate.is_finite() || *rate < 0.0 {
                    return Err(ConfigError::InvalidValue {
                        field: format!("queues.{queue}.produces.{target}"),
                        reason: format!("must be a non-negative number, got {rate}"),
                    });
                }
            }
        }

        let topology = Self { queues };
        if let Some(queue) = topology.find_cycle() {
            return Err(ConfigError::Cycle(queue));
        }
        Ok(topology)
    }

    /// Consumer binding for a queue, if the queue is managed.
    pub fn binding(&self, queue: &str) -> Option<&ConsumerBinding> {
        self.queues.get(queue)
    }

    /// All managed queue names, in sorted order.
    pub fn queues(&self) -> impl Iterator<Item = &str> {
        self.queues.keys().map(String::as_str)
    }

    /// All (queue, binding) pairs.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &ConsumerBinding)> {
        self.queues.iter().map(|(q, b)| (q.as_str(), b))
    }

    /// Queues that have a consuming service.
    pub fn consumed_queues(&self) -> impl Iterator<Item = (&str, &ConsumerBinding)> {
        self.bindings().filter(|(_, b)| b.has_consumer())
    }

    /// Every service referenced by the topology.
    pub fn services(&self) -> BTreeSet<&str> {
        self.consumed_queues()
            .map(|(_, b)| b.service.as_str())
            .collect()
    }

    /// Number of managed queues.
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Configured per-replica consumption rate of `service` on `queue`.
    ///
    /// Asking for a service other than the queue's configured consumer is a
    /// contract violation and returns an error.
    pub fn consumption_rate(&self, queue: &str, service: &str) -> PlanResult<f64> {
        let binding = self
            .binding(queue)
            .ok_or_else(|| PlanError::UnknownQueue(queue.to_string()))?;
        if binding.service != service {
            return Err(PlanError::ConsumerMismatch {
                queue: queue.to_string(),
                configured: binding.service.clone(),
                requested: service.to_string(),
            });
        }
        Ok(binding.consumption_rate)
    }

    /// Queues reachable from `queue` through production edges, excluding
    /// `queue` itself.
    pub fn downstream_of(&self, queue: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut pending: VecDeque<&str> = VecDeque::from([queue]);

        while let Some(current) = pending.pop_front() {
            let Some(binding) = self.queues.get(current) else {
                continue;
            };
            for target in binding.produces.keys() {
                if target != queue && seen.insert(target.clone()) {
                    pending.push_back(target);
                }
            }
        }
        seen
    }

    /// Iterative three-colour DFS; returns a queue on the first cycle found.
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

        for start in self.queues.keys() {
            if marks.contains_key(start.as_str()) {
                continue;
            }
            // (queue, index of the next edge to explore)
            let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
            marks.insert(start.as_str(), Mark::Visiting);

            while let Some((queue, next_edge)) = stack.pop() {
                let edges = self.queues.get(queue).map(|b| &b.produces);
                let next = edges.and_then(|e| e.keys().nth(next_edge));

                let Some(target) = next else {
                    marks.insert(queue, Mark::Done);
                    continue;
                };
                stack.push((queue, next_edge + 1));

                match marks.get(target.as_str()) {
                    Some(Mark::Visiting) => return Some(target.clone()),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(target.as_str(), Mark::Visiting);
                        stack.push((target.as_str(), 0));
                    }
                }
            }
        }
        None
    }
}
