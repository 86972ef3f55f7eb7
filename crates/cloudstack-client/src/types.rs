//! Wire types for the CloudStack management API
//!
//! Plain records deserialized from the JSON responses. CloudStack spells
//! every field in flat lowercase and is inconsistent about numeric types
//! between APIs: load balancer rules and ACL entries carry their ports as
//! strings, firewall rules as numbers. The types mirror that faithfully so
//! comparisons happen exactly where the reconciler expects them.

use serde::Deserialize;

/// A load balancer rule binding a public IP and port to a backend port
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoadBalancerRule {
    /// Opaque rule ID
    pub id: String,
    /// Rule name; the controller's lookup key
    pub name: String,
    /// Balancing algorithm (`roundrobin` or `source`)
    pub algorithm: String,
    /// Comma-joined allowed source CIDRs
    #[serde(default, rename = "cidrlist")]
    pub cidr_list: String,
    /// Load balancer protocol (`tcp`, `udp`, `tcp-proxy`)
    #[serde(default)]
    pub protocol: String,
    /// Public IP address the rule listens on
    #[serde(rename = "publicip")]
    pub public_ip: String,
    /// ID of that public IP
    #[serde(rename = "publicipid")]
    pub public_ip_id: String,
    /// Frontend port, as returned by the API
    #[serde(rename = "publicport")]
    pub public_port: String,
    /// Backend (node) port, as returned by the API
    #[serde(rename = "privateport")]
    pub private_port: String,
    /// Network the rule was created on
    #[serde(default, rename = "networkid")]
    pub network_id: String,
}

/// A public IPv4 address managed by CloudStack
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PublicIpAddress {
    /// Opaque address ID
    pub id: String,
    /// Dotted-quad address
    #[serde(rename = "ipaddress")]
    pub ip_address: String,
    /// Allocation timestamp; present once the address is account-allocated
    #[serde(default)]
    pub allocated: Option<String>,
}

/// A named service capability on a network ("Firewall", "NetworkACL", ...)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkServiceCapability {
    /// Capability name
    pub name: String,
}

/// A CloudStack guest network
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Network {
    /// Opaque network ID
    pub id: String,
    /// VPC the network belongs to, when any
    #[serde(default, rename = "vpcid")]
    pub vpc_id: Option<String>,
    /// ACL list attached to the network, when any
    #[serde(default, rename = "aclid")]
    pub acl_id: Option<String>,
    /// Provider-side capabilities enabled on this network
    #[serde(default, rename = "service")]
    pub services: Vec<NetworkServiceCapability>,
}

impl Network {
    /// The VPC ID, treating the empty string the API sometimes returns as
    /// absent
    pub fn vpc(&self) -> Option<&str> {
        self.vpc_id.as_deref().filter(|v| !v.is_empty())
    }

    /// Whether the given capability is enabled on this network
    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }
}

/// A stateless perimeter rule on a public IP in a non-VPC network
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FirewallRule {
    /// Opaque rule ID
    pub id: String,
    /// Public IP the rule applies to
    #[serde(rename = "ipaddressid")]
    pub ip_address_id: String,
    /// IP protocol (`tcp` or `udp`)
    pub protocol: String,
    /// First port of the range
    #[serde(default, rename = "startport")]
    pub start_port: i32,
    /// Last port of the range
    #[serde(default, rename = "endport")]
    pub end_port: i32,
    /// Comma-joined allowed source CIDRs
    #[serde(default, rename = "cidrlist")]
    pub cidr_list: String,
}

/// An ACL list attached to a VPC network
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkAclList {
    /// Opaque list ID
    pub id: String,
    /// List name; `default_allow` and `default_deny` are CloudStack-managed
    pub name: String,
}

/// A single entry in a network ACL list
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NetworkAclRule {
    /// Opaque entry ID
    pub id: String,
    /// IP protocol (`tcp` or `udp`)
    pub protocol: String,
    /// First port, as the string the ACL API returns
    #[serde(default, rename = "startport")]
    pub start_port: String,
    /// Last port, as the string the ACL API returns
    #[serde(default, rename = "endport")]
    pub end_port: String,
    /// Comma-joined source CIDRs
    #[serde(default, rename = "cidrlist")]
    pub cidr_list: String,
    /// `Allow` or `Deny`
    #[serde(default)]
    pub action: String,
    /// `Ingress` or `Egress`
    #[serde(default, rename = "traffictype")]
    pub traffic_type: String,
}

/// A NIC on a virtual machine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Nic {
    /// Opaque NIC ID
    #[serde(default)]
    pub id: String,
    /// Network the NIC is attached to
    #[serde(rename = "networkid")]
    pub network_id: String,
    /// Guest IP address
    #[serde(default, rename = "ipaddress")]
    pub ip_address: String,
}

/// A CloudStack virtual machine
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VirtualMachine {
    /// Opaque VM ID (the UUID encoded in provider IDs)
    pub id: String,
    /// VM name, matched case-insensitively against node names
    pub name: String,
    /// Guest hostname when the agent reports one
    #[serde(default)]
    pub hostname: Option<String>,
    /// Name of the compute offering
    #[serde(default, rename = "serviceofferingname")]
    pub service_offering_name: String,
    /// NICs, first is the primary
    #[serde(default, rename = "nic")]
    pub nics: Vec<Nic>,
    /// Static-NAT public IP when one is attached
    #[serde(default, rename = "publicip")]
    pub public_ip: Option<String>,
}

/// One management server, as returned by the metrics listing
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManagementServer {
    /// Four-component CloudStack version string
    pub version: String,
}

/// Inputs for creating a load balancer rule
#[derive(Debug, Clone)]
pub struct CreateLoadBalancerRuleParams {
    /// Rule name
    pub name: String,
    /// Balancing algorithm
    pub algorithm: String,
    /// Load balancer protocol name
    pub protocol: String,
    /// Frontend port
    pub public_port: i32,
    /// Backend (node) port
    pub private_port: i32,
    /// Public IP to listen on
    pub public_ip_id: String,
    /// Network to create the rule on
    pub network_id: String,
    /// Allowed source CIDRs
    pub cidr_list: Vec<String>,
    /// Let CloudStack open the firewall implicitly; the controller always
    /// passes false and manages the perimeter itself
    pub open_firewall: bool,
}

/// Fields of a load balancer rule that can change in place
///
/// Only fields that are `Some` are submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateLoadBalancerRuleParams {
    /// New balancing algorithm
    pub algorithm: Option<String>,
    /// New protocol name
    pub protocol: Option<String>,
    /// New allowed source CIDRs (CloudStack 4.22 and later)
    pub cidr_list: Option<Vec<String>>,
}

impl UpdateLoadBalancerRuleParams {
    /// Whether this update would submit anything at all
    pub fn is_empty(&self) -> bool {
        self.algorithm.is_none() && self.protocol.is_none() && self.cidr_list.is_none()
    }
}

/// Inputs for creating a firewall rule
#[derive(Debug, Clone)]
pub struct CreateFirewallRuleParams {
    /// Public IP the rule protects
    pub ip_address_id: String,
    /// IP protocol
    pub protocol: String,
    /// First port of the range
    pub start_port: i32,
    /// Last port of the range
    pub end_port: i32,
    /// Allowed source CIDRs
    pub cidr_list: Vec<String>,
}

/// Inputs for creating a network ACL entry
#[derive(Debug, Clone)]
pub struct CreateNetworkAclParams {
    /// ACL list to add the entry to
    pub acl_list_id: String,
    /// IP protocol
    pub protocol: String,
    /// First port of the range
    pub start_port: i32,
    /// Last port of the range
    pub end_port: i32,
    /// Comma-joined source CIDRs
    pub cidr_list: String,
    /// `Allow` or `Deny`
    pub action: String,
    /// `Ingress` or `Egress`
    pub traffic_type: String,
}

/// Where a new public IP gets associated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociateScope {
    /// Associate directly with an isolated network
    Network(String),
    /// Associate with a VPC; required when the target network belongs to one
    Vpc(String),
}

/// Inputs for acquiring a public IP
#[derive(Debug, Clone)]
pub struct AssociateIpAddressParams {
    /// Network or VPC to associate with
    pub scope: AssociateScope,
    /// Specific address to allocate; CloudStack picks one when absent
    pub ip_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_balancer_rule_deserializes_cloudstack_spelling() {
        let rule: LoadBalancerRule = serde_json::from_str(
            r#"{
                "id": "lb-1",
                "name": "a1b2-tcp-80",
                "algorithm": "roundrobin",
                "cidrlist": "0.0.0.0/0",
                "protocol": "tcp",
                "publicip": "192.0.2.10",
                "publicipid": "ip-1",
                "publicport": "80",
                "privateport": "30080",
                "networkid": "net-1"
            }"#,
        )
        .unwrap();

        assert_eq!(rule.public_port, "80");
        assert_eq!(rule.private_port, "30080");
        assert_eq!(rule.public_ip, "192.0.2.10");
    }

    #[test]
    fn network_reports_vpc_and_capabilities() {
        let network: Network = serde_json::from_str(
            r#"{
                "id": "net-1",
                "vpcid": "vpc-1",
                "aclid": "acl-1",
                "service": [{"name": "NetworkACL"}, {"name": "Dhcp"}]
            }"#,
        )
        .unwrap();

        assert_eq!(network.vpc(), Some("vpc-1"));
        assert!(network.has_service("NetworkACL"));
        assert!(!network.has_service("Firewall"));
    }

    #[test]
    fn empty_vpc_id_counts_as_absent() {
        let network: Network =
            serde_json::from_str(r#"{"id": "net-1", "vpcid": ""}"#).unwrap();
        assert_eq!(network.vpc(), None);
    }

    #[test]
    fn firewall_ports_are_numeric_acl_ports_are_strings() {
        let fw: FirewallRule = serde_json::from_str(
            r#"{"id": "fw-1", "ipaddressid": "ip-1", "protocol": "tcp",
                "startport": 80, "endport": 80, "cidrlist": "0.0.0.0/0"}"#,
        )
        .unwrap();
        assert_eq!(fw.start_port, 80);

        let acl: NetworkAclRule = serde_json::from_str(
            r#"{"id": "acl-rule-1", "protocol": "tcp",
                "startport": "80", "endport": "80"}"#,
        )
        .unwrap();
        assert_eq!(acl.start_port, "80");
    }

    #[test]
    fn vm_nics_use_the_singular_wire_name() {
        let vm: VirtualMachine = serde_json::from_str(
            r#"{"id": "vm-1", "name": "Node1",
                "nic": [{"id": "nic-1", "networkid": "net-1", "ipaddress": "10.1.1.4"}]}"#,
        )
        .unwrap();
        assert_eq!(vm.nics.len(), 1);
        assert_eq!(vm.nics[0].network_id, "net-1");
    }
}
