//! Route handlers. All reads go through the autoscaler's [`StatusHandle`].

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use cascade_autoscale::TickReport;
use cascade_metrics::QueueGauge;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    data: T,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

#[derive(Serialize)]
pub struct StatusView {
    pub application: String,
    /// Service → unix timestamp of its last scale-up.
    pub last_scale_up: BTreeMap<String, u64>,
    pub queues: Vec<QueueGauge>,
    pub last_tick: Option<TickReport>,
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// GET /status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let view = StatusView {
        application: state.status.gauges.application().to_string(),
        last_scale_up: state.status.state.snapshot().await,
        queues: state.status.gauges.snapshot().await,
        last_tick: state.status.last_report().await,
    };
    ApiResponse::ok(view)
}

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let body = state.status.gauges.render().await;
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
