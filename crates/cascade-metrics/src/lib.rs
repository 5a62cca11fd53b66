//! cascade-metrics — observability for the Cascade autoscaler.
//!
//! Holds the queue-depth gauges written once per control-loop tick and
//! renders them in the Prometheus text exposition format.
//!
//! # Architecture
//!
//! ```text
//! GaugeCache
//!   ├── set() ← called once per queue per tick with the sampled depth
//!   ├── get() → depth seen by the current tick (never re-queried)
//!   └── snapshot() → rows for exposition and the status endpoint
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod gauges;
pub mod prometheus;

pub use gauges::{GaugeCache, QueueGauge};
pub use prometheus::render_prometheus;
