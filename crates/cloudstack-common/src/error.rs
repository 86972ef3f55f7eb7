//! Error types for the CloudStack cloud controller
//!
//! Errors carry structured context (rule names, IP addresses, port numbers)
//! so a failed reconciliation is diagnosable from the message alone.

use thiserror::Error;

/// Main error type for controller operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A CloudStack API call failed
    #[error("cloudstack error [{op}]: {message}")]
    CloudStack {
        /// The API operation that failed (e.g. "listLoadBalancerRules")
        op: &'static str,
        /// Description of what failed
        message: String,
    },

    /// The Service requests a session affinity the provider cannot express
    #[error("unsupported load balancer affinity: {affinity}")]
    UnsupportedAffinity {
        /// The affinity value from the Service spec
        affinity: String,
    },

    /// The Service port carries a protocol the provider cannot express
    #[error("unsupported load balancer protocol: {protocol}")]
    UnsupportedProtocol {
        /// The protocol value from the Service port
        protocol: String,
    },

    /// A source-range entry failed CIDR validation
    #[error("invalid CIDR {entry:?} in allowed source ranges")]
    InvalidCidr {
        /// The offending entry, whitespace-trimmed
        entry: String,
    },

    /// An explicitly requested load balancer IP does not exist
    #[error("could not find IP address {address}")]
    IpNotFound {
        /// The requested address
        address: String,
    },

    /// An explicitly requested load balancer IP matched more than one record
    #[error("IP address {address} is ambiguous ({count} matches)")]
    IpAmbiguous {
        /// The requested address
        address: String,
        /// Number of records returned by the lookup
        count: usize,
    },

    /// Allocating a new public IP failed
    #[error("error associating new IP address on {scope}: {message}")]
    AssociateFailed {
        /// The network or VPC the association targeted
        scope: String,
        /// Description of what failed
        message: String,
    },

    /// The Service's nodes resolve to VMs on more than one network
    #[error("found hosts on different networks: {first}, {second}")]
    MultipleNetworks {
        /// First network ID seen
        first: String,
        /// The conflicting network ID
        second: String,
    },

    /// No CloudStack VM matched any of the Service's nodes
    #[error("no virtual machine matched the given nodes")]
    NoMatchingHost,

    /// Creating a firewall or ACL rule failed
    #[error("error creating perimeter rule for IP {ip_id} port {port}: {message}")]
    PerimeterCreate {
        /// Public IP the rule targeted
        ip_id: String,
        /// Public port the rule targeted
        port: i32,
        /// Description of what failed
        message: String,
    },

    /// A VM lookup by node name or provider ID came back empty
    #[error("instance not found: {name}")]
    InstanceNotFound {
        /// The node name or provider ID that failed to resolve
        name: String,
    },

    /// A provider ID string does not match any accepted format
    #[error("provider ID {provider_id:?} didn't match expected format \"external-cloudstack://region/InstanceID\"")]
    InvalidProviderId {
        /// The malformed provider ID
        provider_id: String,
    },

    /// The Service object itself is not a valid load balancer request
    #[error("invalid service: {message}")]
    InvalidService {
        /// Description of what is wrong
        message: String,
    },

    /// Cloud provider configuration is missing or malformed
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong
        message: String,
    },

    /// The operation was cancelled before completion
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Create a CloudStack error for the given API operation
    pub fn cloudstack(op: &'static str, msg: impl ToString) -> Self {
        Self::CloudStack {
            op,
            message: msg.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Spec validation failures require the user to fix the Service and are
    /// not retried. Upstream and Kubernetes failures are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::CloudStack { .. } => true,
            Error::AssociateFailed { .. } => true,
            Error::PerimeterCreate { .. } => true,
            Error::NoMatchingHost => true,
            Error::InstanceNotFound { .. } => true,
            Error::Cancelled => true,
            Error::UnsupportedAffinity { .. } => false,
            Error::UnsupportedProtocol { .. } => false,
            Error::InvalidCidr { .. } => false,
            Error::IpNotFound { .. } => false,
            Error::IpAmbiguous { .. } => false,
            Error::MultipleNetworks { .. } => false,
            Error::InvalidProviderId { .. } => false,
            Error::InvalidService { .. } => false,
            Error::Config { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloudstack_errors_name_the_operation() {
        let err = Error::cloudstack("listLoadBalancerRules", "connection refused");
        assert!(err.to_string().contains("listLoadBalancerRules"));
        assert!(err.to_string().contains("connection refused"));
        assert!(err.is_retryable());
    }

    #[test]
    fn validation_errors_are_not_retryable() {
        assert!(!Error::UnsupportedAffinity {
            affinity: "ClientIPWithTimeout".into()
        }
        .is_retryable());
        assert!(!Error::InvalidCidr {
            entry: "not-a-cidr".into()
        }
        .is_retryable());
        assert!(!Error::config("missing api-url").is_retryable());
    }

    #[test]
    fn ip_resolution_errors_carry_the_address() {
        let err = Error::IpNotFound {
            address: "10.0.0.10".into(),
        };
        assert!(err.to_string().contains("10.0.0.10"));

        let err = Error::IpAmbiguous {
            address: "10.0.0.10".into(),
            count: 2,
        };
        assert!(err.to_string().contains("2 matches"));
    }

    #[test]
    fn perimeter_create_carries_ip_and_port() {
        let err = Error::PerimeterCreate {
            ip_id: "ip-1".into(),
            port: 443,
            message: "rule conflict".into(),
        };
        let text = err.to_string();
        assert!(text.contains("ip-1"));
        assert!(text.contains("443"));
    }
}
