//! cascade-core — the planning half of the Cascade autoscaler.
//!
//! Loads the pipeline topology and scaling strategy from `cascade.toml`,
//! projects queue drain demand through the topology, and converts that
//! demand into replica counts per service. Everything here is pure and
//! synchronous; the control loop lives in `cascade-autoscale`.
//!
//! # Planning pipeline
//!
//! ```text
//! depth(queue) * queue_decrease_per_minute   → origin rates
//! propagate(origin, rate) for every origin   → follow-up rates
//! origin + follow-up                         → total rates
//! max over queues of ceil(rate / capacity)   → replica demand per service
//! ```

pub mod config;
pub mod error;
pub mod propagate;
pub mod replicas;
pub mod topology;

pub use config::{
    CascadeConfig, ControlLoopConfig, DEFAULT_APPLICATION, KubernetesConfig, SqsConfig,
    StrategyConfig,
};
pub use error::{ConfigError, ConfigResult, PlanError, PlanResult};
pub use propagate::{RateVector, add_rates, propagate};
pub use replicas::{ReplicaDemand, replica_demand, required_replicas};
pub use topology::{ConsumerBinding, Topology};
