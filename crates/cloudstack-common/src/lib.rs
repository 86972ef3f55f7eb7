//! Common types for the CloudStack cloud controller: errors, protocol and
//! CIDR handling, naming, configuration

#![deny(missing_docs)]

pub mod annotations;
pub mod cidr;
pub mod config;
pub mod error;
pub mod names;
pub mod protocol;
pub mod provider_id;
pub mod telemetry;
pub mod version;

pub use config::CloudConfig;
pub use error::Error;
pub use protocol::LoadBalancerProtocol;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
