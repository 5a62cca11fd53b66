//! External systems the autoscaler talks to.
//!
//! The control loop only depends on these traits. Real adapters live in
//! `cascade-adapters`; the in-memory implementations here back tests and
//! local dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

/// Boxed future returned by collaborator calls.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Reports how many messages are waiting in a queue.
pub trait QueueDepthProvider: Send + Sync {
    /// Approximate number of undelivered messages. May be eventually consistent.
    fn depth<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, anyhow::Result<u64>>;
}

/// Reports the current replica count of every deployed service.
pub trait ReplicaStateProvider: Send + Sync {
    fn replica_counts(&self) -> BoxFuture<'_, anyhow::Result<BTreeMap<String, u32>>>;
}

/// Applies a replica count to a service. Must be idempotent.
pub trait ScaleSink: Send + Sync {
    fn scale<'a>(&'a self, service: &'a str, replicas: u32) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Fixed queue depths. Queues never set report zero.
#[derive(Clone, Default)]
pub struct StaticQueueDepths {
    depths: Arc<RwLock<HashMap<String, u64>>>,
    failing: Arc<RwLock<HashSet<String>>>,
}

impl StaticQueueDepths {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_depth(&self, queue: &str, depth: u64) {
        self.depths.write().await.insert(queue.to_string(), depth);
    }

    /// Make every depth query for `queue` fail until cleared.
    pub async fn fail_queue(&self, queue: &str) {
        self.failing.write().await.insert(queue.to_string());
    }

    pub async fn clear_failures(&self) {
        self.failing.write().await.clear();
    }
}

impl QueueDepthProvider for StaticQueueDepths {
    fn depth<'a>(&'a self, queue: &'a str) -> BoxFuture<'a, anyhow::Result<u64>> {
        Box::pin(async move {
            if self.failing.read().await.contains(queue) {
                anyhow::bail!("queue {queue} unavailable");
            }
            Ok(self.depths.read().await.get(queue).copied().unwrap_or(0))
        })
    }
}

#[derive(Default)]
struct ClusterInner {
    replicas: BTreeMap<String, u32>,
    commands: Vec<(String, u32)>,
    failing_services: HashSet<String>,
    listing_fails: bool,
}

/// In-memory orchestrator: answers replica listings and records scale
/// commands, applying them to its own replica table.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    inner: Arc<RwLock<ClusterInner>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster with the given services already deployed.
    pub fn with_replicas<'a>(replicas: impl IntoIterator<Item = (&'a str, u32)>) -> Self {
        let inner = ClusterInner {
            replicas: replicas
                .into_iter()
                .map(|(s, n)| (s.to_string(), n))
                .collect(),
            ..ClusterInner::default()
        };
        Self {
            inner: Arc::new(RwLock::new(inner)),
        }
    }

    pub async fn set_replicas(&self, service: &str, replicas: u32) {
        self.inner
            .write()
            .await
            .replicas
            .insert(service.to_string(), replicas);
    }

    pub async fn replicas(&self, service: &str) -> Option<u32> {
        self.inner.read().await.replicas.get(service).copied()
    }

    /// Every scale command received, in arrival order.
    pub async fn commands(&self) -> Vec<(String, u32)> {
        self.inner.read().await.commands.clone()
    }

    /// Commands received for one service.
    pub async fn commands_for(&self, service: &str) -> Vec<u32> {
        self.inner
            .read()
            .await
            .commands
            .iter()
            .filter(|(s, _)| s == service)
            .map(|(_, n)| *n)
            .collect()
    }

    /// Reject scale commands for `service`.
    pub async fn fail_scaling(&self, service: &str) {
        self.inner
            .write()
            .await
            .failing_services
            .insert(service.to_string());
    }

    /// Make replica listings fail (or succeed again).
    pub async fn fail_listing(&self, fail: bool) {
        self.inner.write().await.listing_fails = fail;
    }
}

impl ReplicaStateProvider for InMemoryCluster {
    fn replica_counts(&self) -> BoxFuture<'_, anyhow::Result<BTreeMap<String, u32>>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            if inner.listing_fails {
                anyhow::bail!("replica listing unavailable");
            }
            Ok(inner.replicas.clone())
        })
    }
}

impl ScaleSink for InMemoryCluster {
    fn scale<'a>(&'a self, service: &'a str, replicas: u32) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.write().await;
            if inner.failing_services.contains(service) {
                anyhow::bail!("scaling {service} rejected");
            }
            inner.commands.push((service.to_string(), replicas));
            inner.replicas.insert(service.to_string(), replicas);
            Ok(())
        })
    }
}

/// Scale sink that only logs. Used for dry runs against a live cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingScaleSink;

impl ScaleSink for LoggingScaleSink {
    fn scale<'a>(&'a self, service: &'a str, replicas: u32) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(%service, replicas, "dry run: scale command not sent");
            Ok(())
        })
    }
}
