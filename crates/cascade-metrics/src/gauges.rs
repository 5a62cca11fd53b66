//! Queue depth gauges.
//!
//! The control loop samples every queue once per tick and writes the
//! result here. Readers (the rate computation, the `/metrics` endpoint)
//! only ever see values that came from such a sample.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Last sampled depth of one queue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueGauge {
    pub queue: String,
    /// Approximate number of undelivered messages.
    pub value: u64,
    /// Unix timestamp (seconds) of the sample.
    pub updated_at: u64,
}

/// Shared, cloneable gauge cache keyed by queue name.
#[derive(Clone)]
pub struct GaugeCache {
    /// Value of the `application` label on exported series.
    application: String,
    gauges: Arc<RwLock<BTreeMap<String, QueueGauge>>>,
}

impl GaugeCache {
    /// Create an empty cache whose series carry the given application label.
    pub fn new(application: impl Into<String>) -> Self {
        Self {
            application: application.into(),
            gauges: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Create or update the gauge for a queue.
    pub async fn set(&self, queue: &str, value: u64) {
        let gauge = QueueGauge {
            queue: queue.to_string(),
            value,
            updated_at: epoch_secs(),
        };
        self.gauges.write().await.insert(queue.to_string(), gauge);
        debug!(%queue, value, "queue depth gauge set");
    }

    /// Last value written for a queue.
    pub async fn get(&self, queue: &str) -> Option<u64> {
        self.gauges.read().await.get(queue).map(|g| g.value)
    }

    /// All gauges, sorted by queue name.
    pub async fn snapshot(&self) -> Vec<QueueGauge> {
        self.gauges.read().await.values().cloned().collect()
    }

    /// Render the current gauges in Prometheus text format.
    pub async fn render(&self) -> String {
        crate::prometheus::render_prometheus(&self.application, &self.snapshot().await)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_queue_has_no_value() {
        let cache = GaugeCache::new("cascade");
        assert_eq!(cache.get("A").await, None);
        assert!(cache.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn set_then_get() {
        let cache = GaugeCache::new("cascade");
        cache.set("A", 42).await;
        assert_eq!(cache.get("A").await, Some(42));

        cache.set("A", 7).await;
        assert_eq!(cache.get("A").await, Some(7));
        assert_eq!(cache.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let cache = GaugeCache::new("cascade");
        let reader = cache.clone();
        cache.set("B", 3).await;
        cache.set("A", 1).await;

        let rows = reader.snapshot().await;
        let names: Vec<_> = rows.iter().map(|g| g.queue.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert!(rows.iter().all(|g| g.updated_at > 0));
    }

    #[tokio::test]
    async fn render_uses_application_label() {
        let cache = GaugeCache::new("maha");
        cache.set("TRIGGER", 12).await;
        let text = cache.render().await;
        assert!(text.contains(
            "cascade_messages_in_queue{queue=\"TRIGGER\",application=\"maha\"} 12"
        ));
    }
}
