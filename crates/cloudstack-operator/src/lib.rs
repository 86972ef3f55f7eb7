//! Kubernetes cloud controller for Apache CloudStack
//!
//! Reconciles Services of type LoadBalancer into CloudStack public IPs,
//! load balancer rules, perimeter rules, and backend assignments, and
//! resolves node instance metadata.

#![deny(missing_docs)]

pub mod controller;
pub mod instances;
pub mod loadbalancer;

pub use controller::{error_policy, reconcile, Context};
pub use loadbalancer::CloudStackCloud;

pub use cloudstack_common::{CloudConfig, Error, Result};
