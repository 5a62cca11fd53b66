//! Kubernetes deployments as the replica state provider and scale sink.
//!
//! Talks to the apps/v1 API over plain HTTP, which in practice means
//! `kubectl proxy` or an equivalent authenticating sidecar. Services map
//! one-to-one onto deployments of the same name in a single namespace.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use http::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use cascade_autoscale::{BoxFuture, ReplicaStateProvider, ScaleSink};
use cascade_core::KubernetesConfig;

use crate::transport;

const JSON_PATCH: &str = "application/json-patch+json";

/// Replica count Kubernetes assumes when a deployment omits `spec.replicas`.
const DEFAULT_REPLICAS: u32 = 1;

#[derive(Debug, Deserialize)]
struct DeploymentList {
    items: Vec<Deployment>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DeploymentSpec,
}

#[derive(Debug, Deserialize)]
struct ObjectMeta {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct DeploymentSpec {
    replicas: Option<u32>,
}

/// Client for the deployments of one namespace.
#[derive(Debug, Clone)]
pub struct KubernetesClient {
    api_url: String,
    namespace: String,
    timeout: Duration,
}

impl KubernetesClient {
    pub fn new(config: &KubernetesConfig, timeout: Duration) -> Self {
        Self {
            api_url: config.api_url.trim_end_matches('/').to_string(),
            namespace: config.namespace.clone(),
            timeout,
        }
    }

    fn deployments_url(&self) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/deployments",
            self.api_url, self.namespace
        )
    }

    /// Desired replica count of every deployment in the namespace.
    pub async fn list_deployments(&self) -> anyhow::Result<BTreeMap<String, u32>> {
        let response = transport::send(
            Method::GET,
            &self.deployments_url(),
            &[("accept", "application/json")],
            Bytes::new(),
            self.timeout,
        )
        .await?
        .error_for_status("list deployments")?;

        let list: DeploymentList =
            serde_json::from_slice(&response.body).context("parse deployment list")?;

        let replicas: BTreeMap<String, u32> = list
            .items
            .into_iter()
            .map(|d| (d.metadata.name, d.spec.replicas.unwrap_or(DEFAULT_REPLICAS)))
            .collect();
        debug!(namespace = %self.namespace, deployments = replicas.len(), "listed deployments");
        Ok(replicas)
    }

    /// Set `spec.replicas` of a deployment. Replacing the value is
    /// idempotent, so retries are harmless.
    pub async fn scale_deployment(&self, name: &str, replicas: u32) -> anyhow::Result<()> {
        let patch = json!([
            { "op": "replace", "path": "/spec/replicas", "value": replicas }
        ]);
        let body = serde_json::to_vec(&patch).context("encode scale patch")?;

        transport::send(
            Method::PATCH,
            &format!("{}/{name}", self.deployments_url()),
            &[("content-type", JSON_PATCH), ("accept", "application/json")],
            Bytes::from(body),
            self.timeout,
        )
        .await?
        .error_for_status(&format!("scale deployment {name}"))?;

        info!(namespace = %self.namespace, deployment = %name, replicas, "deployment scaled");
        Ok(())
    }
}

impl ReplicaStateProvider for KubernetesClient {
    fn replica_counts(&self) -> BoxFuture<'_, anyhow::Result<BTreeMap<String, u32>>> {
        Box::pin(self.list_deployments())
    }
}

impl ScaleSink for KubernetesClient {
    fn scale<'a>(&'a self, service: &'a str, replicas: u32) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(self.scale_deployment(service, replicas))
    }
}
