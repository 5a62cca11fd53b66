//! The periodic reconciliation loop.
//!
//! Each tick takes one consistent snapshot of queue depths, derives the
//! replica demand per service from it, compares that against the
//! orchestrator's replica counts, and issues scale commands. Nothing but
//! the scale-up timestamps in [`ScalingState`] carries over between ticks.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use cascade_core::{
    DEFAULT_APPLICATION, RateVector, ReplicaDemand, StrategyConfig, Topology, add_rates,
    propagate, replica_demand,
};
use cascade_metrics::GaugeCache;

use crate::collaborators::{QueueDepthProvider, ReplicaStateProvider, ScaleSink};
use crate::decision::{ScaleDecision, decide};
use crate::state::ScalingState;

const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything one tick saw and decided.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// Unix timestamp (seconds) at which the tick started.
    pub started_at: u64,
    pub scaling_enabled: bool,
    pub depths: BTreeMap<String, u64>,
    /// Queue → reason its depth could not be sampled.
    pub failed_queues: BTreeMap<String, String>,
    pub origin_rates: RateVector,
    pub follow_up_rates: RateVector,
    pub total_rates: RateVector,
    pub replica_demand: ReplicaDemand,
    pub current_replicas: BTreeMap<String, u32>,
    pub decisions: BTreeMap<String, ScaleDecision>,
    /// Service → reason it was left out of this tick's decisions.
    pub skipped_services: BTreeMap<String, String>,
    /// Service → replica count successfully applied.
    pub applied: BTreeMap<String, u32>,
    /// Service → reason the scale command failed.
    pub failed_commands: BTreeMap<String, String>,
}

/// Read-only view of the autoscaler for status reporting.
#[derive(Clone)]
pub struct StatusHandle {
    pub state: ScalingState,
    pub gauges: GaugeCache,
    last_report: Arc<RwLock<Option<TickReport>>>,
}

impl StatusHandle {
    /// Report of the most recently completed tick.
    pub async fn last_report(&self) -> Option<TickReport> {
        self.last_report.read().await.clone()
    }
}

/// The autoscaler reconciles service replica counts against queue demand.
pub struct Autoscaler {
    topology: Arc<Topology>,
    strategy: StrategyConfig,
    queues: Arc<dyn QueueDepthProvider>,
    replicas: Arc<dyn ReplicaStateProvider>,
    sink: Arc<dyn ScaleSink>,
    gauges: GaugeCache,
    state: ScalingState,
    /// Upper bound for every external call.
    call_timeout: Duration,
    last_report: Arc<RwLock<Option<TickReport>>>,
    /// Held for the duration of a tick; ticks never interleave.
    tick_guard: Mutex<()>,
}

impl Autoscaler {
    /// Create a new autoscaler.
    pub fn new(
        topology: Topology,
        strategy: StrategyConfig,
        queues: Arc<dyn QueueDepthProvider>,
        replicas: Arc<dyn ReplicaStateProvider>,
        sink: Arc<dyn ScaleSink>,
    ) -> Self {
        Self {
            topology: Arc::new(topology),
            strategy,
            queues,
            replicas,
            sink,
            gauges: GaugeCache::new(DEFAULT_APPLICATION),
            state: ScalingState::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            last_report: Arc::new(RwLock::new(None)),
            tick_guard: Mutex::new(()),
        }
    }

    /// Publish depth gauges into an existing cache.
    pub fn with_gauges(mut self, gauges: GaugeCache) -> Self {
        self.gauges = gauges;
        self
    }

    /// Start from existing scaling state.
    pub fn with_state(mut self, state: ScalingState) -> Self {
        self.state = state;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn state(&self) -> &ScalingState {
        &self.state
    }

    pub fn gauges(&self) -> &GaugeCache {
        &self.gauges
    }

    /// Cloneable handle for status endpoints.
    pub fn status(&self) -> StatusHandle {
        StatusHandle {
            state: self.state.clone(),
            gauges: self.gauges.clone(),
            last_report: Arc::clone(&self.last_report),
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Returns `None` without doing anything if another tick is still in
    /// progress.
    pub async fn tick(&self) -> Option<TickReport> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            debug!("previous tick still running, skipping");
            return None;
        };

        let report = self.reconcile().await;
        *self.last_report.write().await = Some(report.clone());
        Some(report)
    }

    async fn reconcile(&self) -> TickReport {
        let strategy = &self.strategy;
        let mut report = TickReport {
            started_at: epoch_secs(),
            scaling_enabled: strategy.scaling_enabled,
            ..TickReport::default()
        };

        debug!("tick started");

        // 1. One depth sample per queue, written through to the gauges.
        self.sample_depths(&mut report).await;

        // 2. Metrics are published even with scaling off.
        if !strategy.scaling_enabled {
            info!("scaling is disabled");
            return report;
        }

        // 3. Origin rates from the snapshot.
        for (queue, _) in self.topology.consumed_queues() {
            if let Some(depth) = report.depths.get(queue) {
                let rate = *depth as f64 * strategy.queue_decrease_per_minute;
                report.origin_rates.insert(queue.to_string(), rate);
            }
        }
        info!(rates = ?report.origin_rates, "origin rates");

        // 4. Follow-up rates.
        if strategy.follow_up_scaling_enabled {
            for (queue, rate) in &report.origin_rates {
                match propagate(&self.topology, queue, *rate) {
                    Ok(rates) => add_rates(&mut report.follow_up_rates, &rates),
                    Err(e) => error!(%queue, error = %e, "rate propagation failed"),
                }
            }
            info!(rates = ?report.follow_up_rates, "follow-up rates");
        } else {
            debug!("follow-up scaling disabled");
        }

        // 5. Total rates.
        report.total_rates = report.origin_rates.clone();
        add_rates(&mut report.total_rates, &report.follow_up_rates);
        info!(rates = ?report.total_rates, "total rates");

        // 6. Replica demand.
        report.replica_demand = match replica_demand(&self.topology, &report.total_rates) {
            Ok(demand) => demand,
            Err(e) => {
                error!(error = %e, "replica demand calculation failed");
                return report;
            }
        };

        let blind = self.services_missing_input(&report.failed_queues);
        for service in &blind {
            report.skipped_services.insert(
                service.clone(),
                "input queue depth unavailable".to_string(),
            );
        }

        // 7. Current replica counts.
        let current = match tokio::time::timeout(self.call_timeout, self.replicas.replica_counts())
            .await
        {
            Ok(Ok(current)) => current,
            Ok(Err(e)) => {
                warn!(error = %e, "replica listing failed");
                return report;
            }
            Err(_) => {
                warn!(timeout_secs = self.call_timeout.as_secs(), "replica listing timed out");
                return report;
            }
        };
        report.current_replicas = current;

        // 8. Decide, all before applying anything.
        let now = SystemTime::now();
        for (service, required) in &report.replica_demand {
            if blind.contains(service) {
                debug!(%service, "skipping service with unavailable input queue");
                continue;
            }
            let Some(current) = report.current_replicas.get(service).copied() else {
                warn!(%service, "service not found in replica listing");
                report.skipped_services.insert(
                    service.clone(),
                    "not found in replica listing".to_string(),
                );
                continue;
            };

            let since = self.state.since_last_scale_up(service, now).await;
            let decision = decide(
                current,
                *required,
                strategy.max_number_of_pods,
                since,
                strategy.down_scale_stabilization(),
            );

            if let ScaleDecision::Stabilizing { remaining_secs, .. } = &decision {
                info!(
                    %service,
                    current,
                    required,
                    since_scale_up_secs = since.unwrap_or_default().as_secs(),
                    stabilization_secs = strategy.down_scale_stabilization_seconds,
                    remaining_secs,
                    "ignoring scale-down, last scale-up too recent"
                );
            }
            report.decisions.insert(service.clone(), decision);
        }

        // 9. Apply.
        self.apply(&mut report).await;

        info!(
            decisions = report.decisions.len(),
            applied = report.applied.len(),
            "tick finished"
        );
        report
    }

    /// Query every queue concurrently and record the depths.
    async fn sample_depths(&self, report: &mut TickReport) {
        let mut queries = JoinSet::new();
        for queue in self.topology.queues() {
            let provider = Arc::clone(&self.queues);
            let queue = queue.to_string();
            let timeout = self.call_timeout;
            queries.spawn(async move {
                let result = tokio::time::timeout(timeout, provider.depth(&queue)).await;
                (queue, result)
            });
        }

        while let Some(joined) = queries.join_next().await {
            match joined {
                Ok((queue, Ok(Ok(depth)))) => {
                    self.gauges.set(&queue, depth).await;
                    report.depths.insert(queue, depth);
                }
                Ok((queue, Ok(Err(e)))) => {
                    warn!(%queue, error = %e, "queue depth query failed");
                    report.failed_queues.insert(queue, e.to_string());
                }
                Ok((queue, Err(_))) => {
                    warn!(%queue, timeout_secs = self.call_timeout.as_secs(), "queue depth query timed out");
                    report.failed_queues.insert(queue, "timed out".to_string());
                }
                Err(e) => error!(error = %e, "queue depth task failed"),
            }
        }

        // Tasks that died without reporting.
        for queue in self.topology.queues() {
            if !report.depths.contains_key(queue) && !report.failed_queues.contains_key(queue) {
                report
                    .failed_queues
                    .insert(queue.to_string(), "query task aborted".to_string());
            }
        }
    }

    /// Services whose demand could be understated because a queue feeding
    /// them, directly or through follow-up propagation, was not sampled.
    fn services_missing_input(&self, failed_queues: &BTreeMap<String, String>) -> BTreeSet<String> {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        for queue in failed_queues.keys() {
            affected.insert(queue.clone());
            if self.strategy.follow_up_scaling_enabled {
                affected.extend(self.topology.downstream_of(queue));
            }
        }

        affected
            .iter()
            .filter_map(|queue| self.topology.binding(queue))
            .filter(|binding| binding.has_consumer())
            .map(|binding| binding.service.clone())
            .collect()
    }

    /// Issue every decided scale command concurrently.
    async fn apply(&self, report: &mut TickReport) {
        let mut commands = JoinSet::new();
        for (service, decision) in &report.decisions {
            let Some(target) = decision.target() else {
                continue;
            };
            let sink = Arc::clone(&self.sink);
            let service = service.clone();
            let decision = decision.clone();
            let timeout = self.call_timeout;
            commands.spawn(async move {
                let result = tokio::time::timeout(timeout, sink.scale(&service, target)).await;
                (service, decision, result)
            });
        }

        while let Some(joined) = commands.join_next().await {
            let (service, decision, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "scale command task failed");
                    continue;
                }
            };

            let failure = match result {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(_) => Some("timed out".to_string()),
            };
            if let Some(reason) = failure {
                warn!(%service, error = %reason, "scaling action failed");
                report.failed_commands.insert(service, reason);
                continue;
            }

            match decision {
                ScaleDecision::ScaleUp { from, to } => {
                    self.state.record_scale_up(&service, SystemTime::now()).await;
                    if to > from {
                        info!(%service, from, to, "scaled up");
                    } else {
                        info!(%service, from, to, "demand exceeds replica ceiling, holding at max");
                    }
                    report.applied.insert(service, to);
                }
                ScaleDecision::ScaleDown { from, to } => {
                    info!(%service, from, to, "scaled down");
                    report.applied.insert(service, to);
                }
                ScaleDecision::Stabilizing { .. } | ScaleDecision::NoChange => {}
            }
        }
    }

    /// Run the autoscaler loop until the shutdown signal fires.
    ///
    /// Ticks run inline, so a slow tick delays the next one instead of
    /// overlapping it; missed timer ticks are dropped. A tick in progress
    /// when shutdown arrives completes first.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            queues = self.topology.len(),
            services = self.topology.services().len(),
            "autoscaler started"
        );

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
