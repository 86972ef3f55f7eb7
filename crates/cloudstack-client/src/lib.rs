//! Typed client for the Apache CloudStack management API
//!
//! The [`CloudStackApi`] trait is the seam the reconciliation engine is
//! written against; [`HttpCloudStackClient`] is the production
//! implementation with request signing and async-job resolution.

#![deny(missing_docs)]

pub mod client;
pub mod types;

pub use client::{CloudStackApi, HttpCloudStackClient};
#[cfg(any(test, feature = "mocks"))]
pub use client::MockCloudStackApi;
pub use types::{
    AssociateIpAddressParams, AssociateScope, CreateFirewallRuleParams,
    CreateLoadBalancerRuleParams, CreateNetworkAclParams, FirewallRule, LoadBalancerRule,
    ManagementServer, Network, NetworkAclList, NetworkAclRule, NetworkServiceCapability, Nic,
    PublicIpAddress, UpdateLoadBalancerRuleParams, VirtualMachine,
};
