//! cascade-api — HTTP surface of the autoscaler daemon.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/status` | Last tick report and scale-up timestamps |
//! | GET | `/metrics` | Prometheus exposition (only when metrics export is on) |

pub mod handlers;

use axum::Router;
use axum::routing::get;
use cascade_autoscale::StatusHandle;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub status: StatusHandle,
}

/// Build the daemon router.
pub fn build_router(status: StatusHandle, export_metrics: bool) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/status", get(handlers::status));
    if export_metrics {
        router = router.route("/metrics", get(handlers::prometheus_metrics));
    }
    router.with_state(ApiState { status })
}
