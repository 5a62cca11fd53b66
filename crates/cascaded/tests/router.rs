//! Router regression tests.
//!
//! Drives a real autoscaler tick against in-memory collaborators, then
//! checks what the status and metrics endpoints expose.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use cascade_api::build_router;
use cascade_autoscale::{Autoscaler, InMemoryCluster, StaticQueueDepths};
use cascade_core::{ConsumerBinding, StrategyConfig, Topology};
use cascade_metrics::GaugeCache;

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

async fn ticked_autoscaler() -> Autoscaler {
    let topology = Topology::new(BTreeMap::from([
        (
            "A".to_string(),
            ConsumerBinding::new("s1", 10.0).producing("B", 1.0),
        ),
        ("B".to_string(), ConsumerBinding::new("s2", 5.0)),
    ]))
    .unwrap();

    let queues = StaticQueueDepths::new();
    queues.set_depth("A", 100).await;
    let cluster = InMemoryCluster::with_replicas([("s1", 1), ("s2", 1)]);

    let autoscaler = Autoscaler::new(
        topology,
        strategy(),
        Arc::new(queues),
        Arc::new(cluster.clone()),
        Arc::new(cluster),
    )
    .with_gauges(GaugeCache::new("cup"));
    autoscaler.tick().await.unwrap();
    autoscaler
}

async fn get(router: axum::Router, uri: &str) -> (StatusCode, String) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = router.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn healthz_is_ok() {
    let autoscaler = ticked_autoscaler().await;
    let (status, body) = get(build_router(autoscaler.status(), true), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn metrics_expose_queue_gauges() {
    let autoscaler = ticked_autoscaler().await;
    let (status, body) = get(build_router(autoscaler.status(), true), "/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("# TYPE cascade_messages_in_queue gauge"));
    assert!(body.contains("cascade_messages_in_queue{queue=\"A\",application=\"cup\"} 100"));
    assert!(body.contains("cascade_messages_in_queue{queue=\"B\",application=\"cup\"} 0"));
}

#[tokio::test]
async fn metrics_not_mounted_when_export_disabled() {
    let autoscaler = ticked_autoscaler().await;
    let (status, _) = get(build_router(autoscaler.status(), false), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_reports_last_tick() {
    let autoscaler = ticked_autoscaler().await;
    let (status, body) = get(build_router(autoscaler.status(), true), "/status").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["success"], true);

    let data = &json["data"];
    assert_eq!(data["application"], "cup");
    assert!(data["last_scale_up"]["s1"].as_u64().is_some());

    let tick = &data["last_tick"];
    assert_eq!(tick["total_rates"]["B"], 100.0);
    assert_eq!(tick["replica_demand"]["s2"], 20);
    assert_eq!(tick["decisions"]["s2"]["action"], "scale_up");
    assert_eq!(tick["decisions"]["s2"]["to"], 10);
    assert_eq!(tick["applied"]["s1"], 10);
}

#[tokio::test]
async fn status_before_first_tick() {
    let topology = Topology::new(BTreeMap::new()).unwrap();
    let cluster = InMemoryCluster::new();
    let autoscaler = Autoscaler::new(
        topology,
        strategy(),
        Arc::new(StaticQueueDepths::new()),
        Arc::new(cluster.clone()),
        Arc::new(cluster),
    );

    let (status, body) = get(build_router(autoscaler.status(), true), "/status").await;
    assert_eq!(status, StatusCode::OK);

    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(json["data"]["last_tick"].is_null());
    assert_eq!(json["data"]["queues"], serde_json::json!([]));
}
