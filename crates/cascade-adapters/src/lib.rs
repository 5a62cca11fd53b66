//! Cascade adapters — real collaborators for the autoscaler.
//!
//! Both adapters speak plain HTTP/1.1 through hyper:
//!
//! - [`KubernetesClient`] lists deployment replica counts and scales
//!   deployments with a JSON patch, usually through `kubectl proxy`.
//! - [`SqsQueueDepths`] reads `ApproximateNumberOfMessages` from an
//!   SQS-compatible endpoint.

pub mod transport;
pub mod kubernetes;
pub mod sqs;

pub use kubernetes::KubernetesClient;
pub use sqs::SqsQueueDepths;
