//! cascade.toml configuration parser.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::topology::{ConsumerBinding, Topology};

/// `application` label used when the config does not name one.
pub const DEFAULT_APPLICATION: &str = "cascade";

/// Raw file layout. Validated into [`CascadeConfig`] by [`CascadeConfig::from_str`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "default_application")]
    application: String,
    strategy: StrategyConfig,
    #[serde(default)]
    control_loop: ControlLoopConfig,
    kubernetes: Option<KubernetesConfig>,
    sqs: Option<SqsConfig>,
    #[serde(default)]
    queues: BTreeMap<String, RawQueueConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawQueueConfig {
    #[serde(default)]
    service: String,
    consumption_rate: Option<f64>,
    #[serde(default)]
    produces: BTreeMap<String, f64>,
}

/// How aggressively to scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    #[serde(default = "default_true")]
    pub export_metrics: bool,
    pub scaling_enabled: bool,
    pub follow_up_scaling_enabled: bool,
    /// Fraction of a queue's current depth to drain per minute.
    pub queue_decrease_per_minute: f64,
    pub down_scale_stabilization_seconds: u64,
    pub max_number_of_pods: u32,
}

impl StrategyConfig {
    pub fn down_scale_stabilization(&self) -> Duration {
        Duration::from_secs(self.down_scale_stabilization_seconds)
    }
}

/// Timer and timeout settings for the reconciliation loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlLoopConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Upper bound on any single depth query, replica listing or scale call.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl ControlLoopConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }
}

impl Default for ControlLoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

/// Kubernetes API access, through `kubectl proxy` or an equivalent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesConfig {
    #[serde(default = "default_kube_api_url")]
    pub api_url: String,
    pub namespace: String,
}

/// SQS-compatible queue endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqsConfig {
    /// Prepended to the queue name to form the queue URL.
    pub queue_url_prefix: String,
}

/// Fully validated autoscaler configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CascadeConfig {
    /// Value of the `application` label on exported gauges.
    pub application: String,
    pub strategy: StrategyConfig,
    pub control_loop: ControlLoopConfig,
    pub kubernetes: Option<KubernetesConfig>,
    pub sqs: Option<SqsConfig>,
    pub topology: Topology,
}

impl CascadeConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_str(&content)
    }

    /// Parse and validate a TOML document.
    ///
    /// Duplicate queue tables are rejected by the TOML parser itself.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> ConfigResult<Self> {
        let raw: RawConfig = toml::from_str(content)?;
        validate_strategy(&raw.strategy)?;
        validate_control_loop(&raw.control_loop)?;
        let application = raw.application.trim().to_string();
        if application.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "application".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        let mut bindings = BTreeMap::new();
        for (queue, q) in raw.queues {
            let has_consumer = !q.service.trim().is_empty();
            let consumption_rate = match (q.consumption_rate, has_consumer) {
                (Some(rate), _) => rate,
                (None, false) => 0.0,
                (None, true) => {
                    return Err(ConfigError::MissingField {
                        queue,
                        field: "consumption_rate",
                    });
                }
            };
            bindings.insert(
                queue,
                ConsumerBinding {
                    service: q.service.trim().to_string(),
                    consumption_rate,
                    produces: q.produces,
                },
            );
        }

        Ok(Self {
            application,
            strategy: raw.strategy,
            control_loop: raw.control_loop,
            kubernetes: raw.kubernetes,
            sqs: raw.sqs,
            topology: Topology::new(bindings)?,
        })
    }
}

fn validate_strategy(strategy: &StrategyConfig) -> ConfigResult<()> {
    let decrease = strategy.queue_decrease_per_minute;
    if !decrease.is_finite() || decrease < 0.0 {
        return Err(ConfigError::InvalidValue {
            field: "strategy.queue_decrease_per_minute".to_string(),
            reason: format!("must be a non-negative number, got {decrease}"),
        });
    }
    if strategy.max_number_of_pods == 0 {
        return Err(ConfigError::InvalidValue {
            field: "strategy.max_number_of_pods".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn validate_control_loop(control_loop: &ControlLoopConfig) -> ConfigResult<()> {
    if control_loop.interval_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "control_loop.interval_secs".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    if control_loop.call_timeout_secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: "control_loop.call_timeout_secs".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(())
}

fn default_application() -> String {
    DEFAULT_APPLICATION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    1
}

fn default_call_timeout_secs() -> u64 {
    5
}

fn default_kube_api_url() -> String {
    "http://127.0.0.1:8001".to_string()
}
