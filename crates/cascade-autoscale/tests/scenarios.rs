//! End-to-end reconciliation scenarios against in-memory collaborators.
//!
//! The base topology is a two-stage pipeline: queue A is drained by s1 at
//! 10 msg/min and every message s1 handles produces one on queue B, which
//! s2 drains at 5 msg/min.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use cascade_autoscale::{
    Autoscaler, InMemoryCluster, ScaleDecision, ScalingState, StaticQueueDepths,
};
use cascade_core::{CascadeConfig, ConsumerBinding, StrategyConfig, Topology};

fn strategy() -> StrategyConfig {
    StrategyConfig {
        export_metrics: true,
        scaling_enabled: true,
        follow_up_scaling_enabled: true,
        queue_decrease_per_minute: 1.0,
        down_scale_stabilization_seconds: 0,
        max_number_of_pods: 10,
    }
}

fn pipeline() -> Topology {
    Topology::new(BTreeMap::from([
        (
            "A".to_string(),
            ConsumerBinding::new("s1", 10.0).producing("B", 1.0),
        ),
        ("B".to_string(), ConsumerBinding::new("s2", 5.0)),
    ]))
    .unwrap()
}

struct Harness {
    queues: StaticQueueDepths,
    cluster: InMemoryCluster,
    scaler: Autoscaler,
}

fn harness(topology: Topology, strategy: StrategyConfig, replicas: &[(&str, u32)]) -> Harness {
    let queues = StaticQueueDepths::new();
    let cluster = InMemoryCluster::with_replicas(replicas.iter().copied());
    let scaler = Autoscaler::new(
        topology,
        strategy,
        Arc::new(queues.clone()),
        Arc::new(cluster.clone()),
        Arc::new(cluster.clone()),
    );
    Harness {
        queues,
        cluster,
        scaler,
    }
}

#[tokio::test]
async fn backlog_scales_pipeline_up_to_ceiling() {
    let h = harness(pipeline(), strategy(), &[("s1", 1), ("s2", 1)]);
    h.queues.set_depth("A", 100).await;

    let report = h.scaler.tick().await.unwrap();

    assert_eq!(report.origin_rates["A"], 100.0);
    assert_eq!(report.follow_up_rates["B"], 100.0);
    assert_eq!(report.replica_demand["s1"], 10);
    assert_eq!(report.replica_demand["s2"], 20);
    assert_eq!(
        report.decisions["s2"],
        ScaleDecision::ScaleUp { from: 1, to: 10 }
    );
    assert_eq!(h.cluster.commands_for("s1").await, vec![10]);
    assert_eq!(h.cluster.commands_for("s2").await, vec![10]);
}

#[tokio::test]
async fn empty_queues_scale_down_to_one() {
    let h = harness(pipeline(), strategy(), &[("s1", 3), ("s2", 1)]);

    let report = h.scaler.tick().await.unwrap();

    assert_eq!(
        report.decisions["s1"],
        ScaleDecision::ScaleDown { from: 3, to: 1 }
    );
    assert_eq!(report.decisions["s2"], ScaleDecision::NoChange);
    assert_eq!(h.cluster.commands().await, vec![("s1".to_string(), 1)]);
}

#[tokio::test]
async fn recent_scale_up_blocks_scale_down() {
    let mut s = strategy();
    s.down_scale_stabilization_seconds = 300;

    let state = ScalingState::new();
    state
        .record_scale_up("s1", SystemTime::now() - Duration::from_secs(10))
        .await;

    let mut h = harness(pipeline(), s, &[("s1", 3), ("s2", 1)]);
    h.scaler = h.scaler.with_state(state);

    let report = h.scaler.tick().await.unwrap();

    assert!(matches!(
        report.decisions["s1"],
        ScaleDecision::Stabilizing { current: 3, .. }
    ));
    assert!(h.cluster.commands().await.is_empty());
}

#[tokio::test]
async fn scale_down_after_window_expires() {
    let mut s = strategy();
    s.down_scale_stabilization_seconds = 300;

    let state = ScalingState::new();
    state
        .record_scale_up("s1", SystemTime::now() - Duration::from_secs(301))
        .await;

    let mut h = harness(pipeline(), s, &[("s1", 3), ("s2", 1)]);
    h.scaler = h.scaler.with_state(state);

    h.scaler.tick().await.unwrap();
    assert_eq!(h.cluster.commands_for("s1").await, vec![1]);
}

#[tokio::test]
async fn sustained_overload_at_ceiling_keeps_window_armed() {
    let mut s = strategy();
    s.down_scale_stabilization_seconds = 300;

    let state = ScalingState::new();
    let long_ago = SystemTime::now() - Duration::from_secs(1000);
    state.record_scale_up("s1", long_ago).await;

    let mut h = harness(pipeline(), s, &[("s1", 10), ("s2", 10)]);
    h.scaler = h.scaler.with_state(state);

    // Needs 50 replicas, already at the ceiling of 10.
    h.queues.set_depth("A", 500).await;
    let report = h.scaler.tick().await.unwrap();
    assert_eq!(
        report.decisions["s1"],
        ScaleDecision::ScaleUp { from: 10, to: 10 }
    );
    assert_eq!(h.cluster.commands_for("s1").await, vec![10]);
    let refreshed = h.scaler.state().last_scale_up("s1").await.unwrap();
    assert!(refreshed > long_ago);

    // Overload ends: the scale-down still waits out the window.
    h.queues.set_depth("A", 0).await;
    let report = h.scaler.tick().await.unwrap();
    assert!(matches!(
        report.decisions["s1"],
        ScaleDecision::Stabilizing { current: 10, .. }
    ));
    assert_eq!(h.cluster.commands_for("s1").await, vec![10]);
}

#[tokio::test]
async fn service_above_ceiling_is_capped_under_load() {
    let h = harness(pipeline(), strategy(), &[("s1", 14), ("s2", 1)]);
    h.queues.set_depth("A", 500).await;

    let report = h.scaler.tick().await.unwrap();

    assert_eq!(
        report.decisions["s1"],
        ScaleDecision::ScaleUp { from: 14, to: 10 }
    );
    assert_eq!(h.cluster.replicas("s1").await, Some(10));
}

#[tokio::test]
async fn service_fed_by_two_queues_takes_maximum() {
    let topology = Topology::new(BTreeMap::from([
        ("C".to_string(), ConsumerBinding::new("s3", 10.0)),
        ("D".to_string(), ConsumerBinding::new("s3", 10.0)),
    ]))
    .unwrap();
    let h = harness(topology, strategy(), &[("s3", 1)]);
    h.queues.set_depth("C", 20).await;
    h.queues.set_depth("D", 50).await;

    let report = h.scaler.tick().await.unwrap();

    assert_eq!(report.replica_demand["s3"], 5);
    assert_eq!(h.cluster.commands_for("s3").await, vec![5]);
}

#[tokio::test]
async fn negligible_demand_needs_no_replicas() {
    let h = harness(pipeline(), strategy(), &[("s1", 2), ("s2", 1)]);
    // 2 msg/min against 10 msg/min capacity is a fifth of a replica.
    h.queues.set_depth("A", 2).await;

    let report = h.scaler.tick().await.unwrap();

    assert_eq!(report.replica_demand["s1"], 0);
    assert_eq!(
        report.decisions["s1"],
        ScaleDecision::ScaleDown { from: 2, to: 1 }
    );
}

#[tokio::test]
async fn repeated_ticks_converge() {
    let h = harness(pipeline(), strategy(), &[("s1", 1), ("s2", 1)]);
    h.queues.set_depth("A", 40).await;

    h.scaler.tick().await.unwrap();
    let report = h.scaler.tick().await.unwrap();

    // Second tick sees the applied counts and does nothing.
    assert!(report.applied.is_empty());
    assert_eq!(h.cluster.commands_for("s1").await, vec![4]);
    assert_eq!(h.cluster.commands_for("s2").await, vec![8]);

    // Demand drops: excess capacity is kept until the queue empties.
    h.queues.set_depth("A", 10).await;
    let report = h.scaler.tick().await.unwrap();
    assert!(report.applied.is_empty());

    h.queues.set_depth("A", 0).await;
    let report = h.scaler.tick().await.unwrap();
    assert_eq!(report.applied.get("s1"), Some(&1));
    assert_eq!(report.applied.get("s2"), Some(&1));
}

#[tokio::test]
async fn gauges_follow_depth_samples() {
    let h = harness(pipeline(), strategy(), &[("s1", 1), ("s2", 1)]);
    h.queues.set_depth("A", 7).await;
    h.queues.set_depth("B", 3).await;

    h.scaler.tick().await.unwrap();

    let rendered = h.scaler.gauges().render().await;
    assert!(rendered.contains("queue=\"A\""));
    assert!(rendered.contains("} 7"));
    assert!(rendered.contains("} 3"));
}

#[tokio::test]
async fn config_file_drives_the_loop() {
    let config = CascadeConfig::from_str(
        r#"
[strategy]
scaling_enabled = true
follow_up_scaling_enabled = true
queue_decrease_per_minute = 0.5
down_scale_stabilization_seconds = 0
max_number_of_pods = 8

[queues.orders]
service = "order-service"
consumption_rate = 20.0
produces = { invoices = 2.0 }

[queues.invoices]
service = "invoice-service"
consumption_rate = 40.0
"#,
    )
    .unwrap();

    let h = harness(
        config.topology,
        config.strategy,
        &[("order-service", 1), ("invoice-service", 1)],
    );
    h.queues.set_depth("orders", 200).await;

    let report = h.scaler.tick().await.unwrap();

    // 200 * 0.5 = 100/min on orders, 200/min follow-up on invoices.
    assert_eq!(report.replica_demand["order-service"], 5);
    assert_eq!(report.replica_demand["invoice-service"], 5);
    assert_eq!(report.applied.get("order-service"), Some(&5));
}
