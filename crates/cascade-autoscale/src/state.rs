//! Scaling state: the only data that survives between ticks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

/// Last scale-up time per service.
///
/// Written by the control loop after a scale-up command succeeds and read
/// on every tick to evaluate the downscale stabilization window. Entries
/// are never removed. Cloning shares the underlying map, which lets the
/// status endpoint read it while the loop runs.
#[derive(Clone, Default)]
pub struct ScalingState {
    last_scale_up: Arc<RwLock<HashMap<String, SystemTime>>>,
}

impl ScalingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_scale_up(&self, service: &str, at: SystemTime) {
        self.last_scale_up
            .write()
            .await
            .insert(service.to_string(), at);
    }

    pub async fn last_scale_up(&self, service: &str) -> Option<SystemTime> {
        self.last_scale_up.read().await.get(service).copied()
    }

    /// Time since the last scale-up of `service`, or `None` if it was never
    /// scaled up by this process. A clock that went backwards reads as zero.
    pub async fn since_last_scale_up(&self, service: &str, now: SystemTime) -> Option<Duration> {
        self.last_scale_up(service)
            .await
            .map(|at| now.duration_since(at).unwrap_or_default())
    }

    /// Service → unix timestamp (seconds) of the last scale-up.
    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        self.last_scale_up
            .read()
            .await
            .iter()
            .map(|(service, at)| {
                let secs = at.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
                (service.clone(), secs)
            })
            .collect()
    }
}
