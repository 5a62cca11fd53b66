//! cascade-autoscale — queue-depth driven instance scaling.
//!
//! Samples every queue in the topology, projects the drain demand through
//! the pipeline, and reconciles the replica count of each consuming
//! service against it. Scale-downs wait out a stabilization window after
//! the most recent scale-up.
//!
//! # Scaling Algorithm
//!
//! ```text
//! required = max over the service's queues of ceil(rate / consumption_rate)
//!
//! if current < required:
//!     ScaleUp(min(required, max_number_of_pods))
//!
//! if current > 1 and required == 0:
//!     if now - last_scale_up >= down_scale_stabilization:
//!         ScaleDown(1)          // never to zero
//!     else:
//!         Stabilizing
//!
//! otherwise: NoChange          // excess capacity is kept
//! ```
//!
//! Every tick recomputes the full desired state from a fresh snapshot, so
//! a failed call is simply retried on the next tick.

pub mod collaborators;
pub mod decision;
pub mod scaler;
pub mod state;

pub use collaborators::{
    BoxFuture, InMemoryCluster, LoggingScaleSink, QueueDepthProvider, ReplicaStateProvider,
    ScaleSink, StaticQueueDepths,
};
pub use decision::{ScaleDecision, decide};
pub use scaler::{Autoscaler, StatusHandle, TickReport};
pub use state::ScalingState;
