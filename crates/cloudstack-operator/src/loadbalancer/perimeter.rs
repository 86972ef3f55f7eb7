//! Perimeter rule reconciliation
//!
//! Reaching a load balancer from outside takes more than the rule itself:
//! flat networks filter traffic with per-IP firewall rules, VPC networks
//! with entries on the network's ACL list. Exactly one of the two applies
//! to any network; the mode is picked once per reconciliation from the
//! network's capability set and dispatched through [`Perimeter`].

use tracing::{debug, info, warn};

use cloudstack_client::{
    CloudStackApi, CreateFirewallRuleParams, CreateNetworkAclParams, FirewallRule, NetworkAclList,
};
use cloudstack_common::cidr::{cidr_lists_equal, split_cidr_list, DEFAULT_ALLOWED_CIDR};
use cloudstack_common::{Error, LoadBalancerProtocol, Result};

/// Network capability names CloudStack reports in `Network.services`
const SERVICE_FIREWALL: &str = "Firewall";
const SERVICE_NETWORK_ACL: &str = "NetworkACL";

/// ACL lists CloudStack manages itself; entries on them are left alone
const DEFAULT_ACL_LISTS: [&str; 2] = ["default_allow", "default_deny"];

/// The perimeter mode for one network, selected once per reconciliation
#[derive(Debug, Clone)]
pub enum Perimeter {
    /// Per-IP firewall rules on a flat network
    Firewall,
    /// Entries on a VPC network's ACL list; `list` is `None` when the
    /// network uses a CloudStack-managed default list, which is never
    /// touched
    Acl {
        /// The resolved, operator-managed ACL list
        list: Option<NetworkAclList>,
    },
    /// The network supports neither mechanism
    Unsupported,
}

impl Perimeter {
    /// Pick the perimeter mode for a network
    pub async fn select(api: &dyn CloudStackApi, network_id: &str) -> Result<Self> {
        let network = api.get_network(network_id).await?.ok_or_else(|| {
            Error::cloudstack("listNetworks", format!("could not find network {}", network_id))
        })?;

        if network.vpc().is_some() && network.has_service(SERVICE_NETWORK_ACL) {
            let Some(acl_id) = network.acl_id.as_deref().filter(|id| !id.is_empty()) else {
                warn!(network = %network_id, "VPC network has no ACL list attached");
                return Ok(Self::Unsupported);
            };

            let list = api.get_network_acl_list(acl_id).await?.ok_or_else(|| {
                Error::cloudstack(
                    "listNetworkACLLists",
                    format!("could not find ACL list {}", acl_id),
                )
            })?;

            if DEFAULT_ACL_LISTS.contains(&list.name.as_str()) {
                debug!(acl_list = %list.name, "network uses a CloudStack-managed ACL list");
                return Ok(Self::Acl { list: None });
            }

            return Ok(Self::Acl { list: Some(list) });
        }

        if network.vpc().is_none() && network.has_service(SERVICE_FIREWALL) {
            return Ok(Self::Firewall);
        }

        Ok(Self::Unsupported)
    }

    /// Converge the perimeter for one `(public IP, port, protocol)` to the
    /// allowed CIDR set
    pub async fn reconcile(
        &self,
        api: &dyn CloudStackApi,
        ip_id: &str,
        public_port: i32,
        protocol: LoadBalancerProtocol,
        allowed: &[String],
    ) -> Result<()> {
        match self {
            Self::Firewall => {
                reconcile_firewall(api, ip_id, public_port, protocol, allowed).await
            }
            Self::Acl { list: Some(list) } => {
                reconcile_acl(api, list, public_port, protocol).await
            }
            Self::Acl { list: None } => Ok(()),
            Self::Unsupported => {
                warn!(
                    ip = %ip_id,
                    port = public_port,
                    "network supports neither firewall rules nor ACLs, leaving perimeter open"
                );
                Ok(())
            }
        }
    }

    /// Remove the perimeter rules for one `(public IP, port, protocol)`
    ///
    /// Best-effort; individual delete failures are logged and the next
    /// reconciliation retries them.
    pub async fn delete(
        &self,
        api: &dyn CloudStackApi,
        ip_id: &str,
        public_port: i32,
        protocol: LoadBalancerProtocol,
    ) -> Result<()> {
        match self {
            Self::Firewall => delete_firewall(api, ip_id, public_port, protocol).await,
            Self::Acl { list: Some(list) } => {
                delete_acl(api, list, public_port, protocol).await
            }
            Self::Acl { list: None } => Ok(()),
            Self::Unsupported => Ok(()),
        }
    }

    /// Human-readable mode, for log lines
    pub fn describe(&self) -> String {
        match self {
            Self::Firewall => "firewall".to_string(),
            Self::Acl { list: Some(list) } => format!("network ACL list {}", list.name),
            Self::Acl { list: None } => "CloudStack-managed ACL list".to_string(),
            Self::Unsupported => "unsupported".to_string(),
        }
    }
}

/// Firewall rules matching our `(protocol, port)` slot on this IP
fn matching_firewall_rules(
    rules: Vec<FirewallRule>,
    public_port: i32,
    protocol: LoadBalancerProtocol,
) -> Vec<FirewallRule> {
    rules
        .into_iter()
        .filter(|rule| {
            rule.protocol == protocol.ip_protocol()
                && rule.start_port == public_port
                && rule.end_port == public_port
        })
        .collect()
}

async fn reconcile_firewall(
    api: &dyn CloudStackApi,
    ip_id: &str,
    public_port: i32,
    protocol: LoadBalancerProtocol,
    allowed: &[String],
) -> Result<()> {
    let allowed: Vec<String> = if allowed.is_empty() {
        vec![DEFAULT_ALLOWED_CIDR.to_string()]
    } else {
        allowed.to_vec()
    };

    let rules = api.list_firewall_rules(ip_id).await?;
    let filtered = matching_firewall_rules(rules, public_port, protocol);

    let matched = filtered
        .iter()
        .position(|rule| cidr_lists_equal(&split_cidr_list(&rule.cidr_list), &allowed));

    // Delete conflicting rules first; CloudStack rejects a new rule whose
    // port overlaps an existing one on the same IP.
    for (index, rule) in filtered.iter().enumerate() {
        if Some(index) == matched {
            continue;
        }
        debug!(rule = %rule.id, ip = %ip_id, "deleting conflicting firewall rule");
        if let Err(error) = api.delete_firewall_rule(&rule.id).await {
            warn!(rule = %rule.id, %error, "could not delete old firewall rule");
        }
    }

    if matched.is_none() {
        info!(ip = %ip_id, port = public_port, cidrs = ?allowed, "creating firewall rule");
        api.create_firewall_rule(CreateFirewallRuleParams {
            ip_address_id: ip_id.to_string(),
            protocol: protocol.ip_protocol().to_string(),
            start_port: public_port,
            end_port: public_port,
            cidr_list: allowed.clone(),
        })
        .await
        .map_err(|e| Error::PerimeterCreate {
            ip_id: ip_id.to_string(),
            port: public_port,
            message: e.to_string(),
        })?;
    }

    Ok(())
}

async fn delete_firewall(
    api: &dyn CloudStackApi,
    ip_id: &str,
    public_port: i32,
    protocol: LoadBalancerProtocol,
) -> Result<()> {
    let rules = api.list_firewall_rules(ip_id).await?;

    for rule in matching_firewall_rules(rules, public_port, protocol) {
        if let Err(error) = api.delete_firewall_rule(&rule.id).await {
            warn!(rule = %rule.id, %error, "could not delete firewall rule");
        }
    }

    Ok(())
}

async fn reconcile_acl(
    api: &dyn CloudStackApi,
    list: &NetworkAclList,
    public_port: i32,
    protocol: LoadBalancerProtocol,
) -> Result<()> {
    let port = public_port.to_string();
    let rules = api.list_network_acl_rules(&list.id).await?;

    let exists = rules.iter().any(|rule| {
        rule.protocol == protocol.ip_protocol() && rule.start_port == port && rule.end_port == port
    });
    if exists {
        debug!(acl_list = %list.name, port = public_port, "ACL entry already present");
        return Ok(());
    }

    info!(acl_list = %list.name, port = public_port, "creating ACL entry");
    api.create_network_acl_rule(CreateNetworkAclParams {
        acl_list_id: list.id.clone(),
        protocol: protocol.ip_protocol().to_string(),
        start_port: public_port,
        end_port: public_port,
        cidr_list: DEFAULT_ALLOWED_CIDR.to_string(),
        action: "Allow".to_string(),
        traffic_type: "Ingress".to_string(),
    })
    .await
    .map_err(|e| Error::PerimeterCreate {
        ip_id: list.id.clone(),
        port: public_port,
        message: e.to_string(),
    })?;

    Ok(())
}

async fn delete_acl(
    api: &dyn CloudStackApi,
    list: &NetworkAclList,
    public_port: i32,
    protocol: LoadBalancerProtocol,
) -> Result<()> {
    let port = public_port.to_string();
    let rules = api.list_network_acl_rules(&list.id).await?;

    let matched = rules.iter().find(|rule| {
        rule.protocol == protocol.ip_protocol() && rule.start_port == port && rule.end_port == port
    });

    if let Some(rule) = matched {
        if let Err(error) = api.delete_network_acl_rule(&rule.id).await {
            warn!(rule = %rule.id, %error, "could not delete ACL entry");
        }
    }

    Ok(())
}
