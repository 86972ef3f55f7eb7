//! Load balancer reconciliation engine
//!
//! Translates a Kubernetes Service of type LoadBalancer into CloudStack
//! state: a public IP, one load balancer rule per port, perimeter rules to
//! let traffic in, and the node VMs assigned as backends. Every entry point
//! rebuilds its view from CloudStack first, so repeated runs converge from
//! any intermediate state.

pub mod ip;
pub mod membership;
pub mod nodes;
pub mod perimeter;
pub mod rules;

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Node, Service, ServicePort,
};
use semver::Version;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cloudstack_client::{
    CloudStackApi, CreateLoadBalancerRuleParams, LoadBalancerRule,
};
use cloudstack_common::annotations::{get_string_annotation, ANNOTATION_HOSTNAME};
use cloudstack_common::cidr::{source_cidrs, DEFAULT_ALLOWED_CIDR};
use cloudstack_common::names::{load_balancer_name, rule_name};
use cloudstack_common::version::supports_cidr_update;
use cloudstack_common::{Error, LoadBalancerProtocol, Result};

use perimeter::Perimeter;
use rules::{plan_rule, DesiredRule, RuleAction};

/// The load balancer engine
///
/// Holds the CloudStack client and the lazily fetched management server
/// version. Cheap to share; all per-Service state lives in [`LoadBalancer`]
/// and is rebuilt on every call.
pub struct CloudStackCloud {
    api: Arc<dyn CloudStackApi>,
    version: OnceCell<Version>,
}

/// Working state for one Service, reconstructed per call
struct LoadBalancer {
    /// Sanitized cluster-wide-unique base name
    name: String,
    /// Balancing algorithm derived from session affinity
    algorithm: String,
    /// Resolved backend VM IDs
    host_ids: Vec<String>,
    /// Network all backends share
    network_id: String,
    /// Public IP address serving this Service
    ip_addr: String,
    /// ID of that address
    ip_addr_id: String,
    /// Rules observed upstream, keyed by name; entries are removed as
    /// desired ports claim them, leftovers are obsolete
    rules: HashMap<String, LoadBalancerRule>,
}

impl LoadBalancer {
    fn has_ip(&self) -> bool {
        !self.ip_addr.is_empty() && !self.ip_addr_id.is_empty()
    }
}

impl CloudStackCloud {
    /// Create an engine over the given client
    pub fn new(api: Arc<dyn CloudStackApi>) -> Self {
        Self {
            api,
            version: OnceCell::new(),
        }
    }

    /// The management server version, fetched once and cached
    async fn upstream_version(&self) -> Result<&Version> {
        self.version
            .get_or_try_init(|| async { self.api.management_server_version().await })
            .await
    }

    /// Report the current status of a Service's load balancer
    ///
    /// `None` when no rules exist for it.
    pub async fn get_load_balancer(
        &self,
        service: &Service,
    ) -> Result<Option<LoadBalancerStatus>> {
        let lb = self.load_state(service).await?;

        if lb.rules.is_empty() {
            return Ok(None);
        }

        debug!(service = %lb.name, ip = %lb.ip_addr, "found existing load balancer");
        Ok(Some(ingress_status(&lb.ip_addr, "")))
    }

    /// Create or converge the load balancer for a Service
    pub async fn ensure_load_balancer(
        &self,
        service: &Service,
        node_list: &[Node],
        token: &CancellationToken,
    ) -> Result<LoadBalancerStatus> {
        let ports = service_ports(service)?;

        let mut lb = self.load_state(service).await?;
        lb.algorithm = algorithm_for(service)?;

        let (host_ids, network_id) = nodes::resolve_nodes(self.api.as_ref(), node_list).await?;
        lb.host_ids = host_ids;
        lb.network_id = network_id;

        let desired_ip = service
            .spec
            .as_ref()
            .and_then(|s| s.load_balancer_ip.as_deref())
            .unwrap_or("");

        let mut release_on_failure = false;
        if !lb.has_ip() {
            let acquired = ip::acquire(
                self.api.as_ref(),
                &lb.network_id,
                Some(desired_ip).filter(|d| !d.is_empty()),
            )
            .await?;

            // An address this Ensure allocated itself must not leak if the
            // rest of the reconciliation fails; adopted and Service-named
            // addresses are left alone.
            release_on_failure = acquired.associated_by_controller;

            lb.ip_addr = acquired.address;
            lb.ip_addr_id = acquired.id;
        }

        info!(service = %lb.name, ip = %lb.ip_addr, "reconciling load balancer");

        match self.reconcile_rules(&mut lb, service, &ports, token).await {
            Ok(()) => Ok(ingress_status(
                &lb.ip_addr,
                &get_string_annotation(service, ANNOTATION_HOSTNAME, ""),
            )),
            Err(err) => {
                if release_on_failure {
                    warn!(service = %lb.name, ip = %lb.ip_addr, "releasing IP after failed reconciliation");
                    if let Err(release_err) = ip::release(self.api.as_ref(), &lb.ip_addr_id).await
                    {
                        error!(%release_err, "could not release load balancer IP");
                    }
                }
                Err(err)
            }
        }
    }

    /// Reconcile backend membership after the node set changed
    pub async fn update_load_balancer(
        &self,
        service: &Service,
        node_list: &[Node],
        token: &CancellationToken,
    ) -> Result<()> {
        let lb = self.load_state(service).await?;
        let (host_ids, _) = nodes::resolve_nodes(self.api.as_ref(), node_list).await?;

        for rule in lb.rules.values() {
            let instances = self.api.list_load_balancer_rule_instances(&rule.id).await?;
            let (assign, remove) = membership::symmetric_difference(&host_ids, &instances);

            if !assign.is_empty() {
                debug!(rule = %rule.name, hosts = ?assign, "assigning new hosts");
                check_cancelled(token)?;
                self.api.assign_to_load_balancer_rule(&rule.id, &assign).await?;
            }

            if !remove.is_empty() {
                debug!(rule = %rule.name, hosts = ?remove, "removing old hosts");
                check_cancelled(token)?;
                self.api
                    .remove_from_load_balancer_rule(&rule.id, &remove)
                    .await?;
            }
        }

        Ok(())
    }

    /// Tear down a Service's load balancer
    ///
    /// A no-op when nothing is left; an address the Service did not name is
    /// released.
    pub async fn ensure_load_balancer_deleted(
        &self,
        service: &Service,
        token: &CancellationToken,
    ) -> Result<()> {
        let lb = self.load_state(service).await?;

        for rule in lb.rules.values() {
            let protocol = LoadBalancerProtocol::from_cs_name(&rule.protocol);
            if protocol == LoadBalancerProtocol::Invalid {
                error!(rule = %rule.name, protocol = %rule.protocol, "unparseable protocol on rule, leaving it in place");
                continue;
            }

            match rule.public_port.parse::<i32>() {
                Ok(port) => {
                    debug!(rule = %rule.name, "deleting perimeter rules");
                    let perimeter = self.perimeter_for(&rule.network_id).await?;
                    perimeter
                        .delete(self.api.as_ref(), &rule.public_ip_id, port, protocol)
                        .await?;
                }
                Err(_) => {
                    error!(rule = %rule.name, port = %rule.public_port, "unparseable public port on rule");
                }
            }

            info!(rule = %rule.name, "deleting load balancer rule");
            check_cancelled(token)?;
            self.api.delete_load_balancer_rule(&rule.id).await?;
        }

        let desired_ip = service
            .spec
            .as_ref()
            .and_then(|s| s.load_balancer_ip.as_deref())
            .unwrap_or("");

        // Ownership does not survive between calls; an address the Service
        // did not name is treated as controller-allocated.
        if !lb.ip_addr.is_empty() && lb.ip_addr != desired_ip {
            info!(ip = %lb.ip_addr, "releasing load balancer IP");
            check_cancelled(token)?;
            ip::release(self.api.as_ref(), &lb.ip_addr_id).await?;
        }

        Ok(())
    }

    /// Rebuild the per-Service state from the current CloudStack rules
    async fn load_state(&self, service: &Service) -> Result<LoadBalancer> {
        let name = load_balancer_name(service);

        let mut lb = LoadBalancer {
            name: name.clone(),
            algorithm: String::new(),
            host_ids: Vec::new(),
            network_id: String::new(),
            ip_addr: String::new(),
            ip_addr_id: String::new(),
            rules: HashMap::new(),
        };

        for rule in self.api.list_load_balancer_rules(&name).await? {
            if !lb.ip_addr.is_empty() && lb.ip_addr != rule.public_ip {
                warn!(
                    service = %name,
                    first = %lb.ip_addr,
                    second = %rule.public_ip,
                    "load balancer rules are associated with different IPs"
                );
            }

            lb.ip_addr = rule.public_ip.clone();
            lb.ip_addr_id = rule.public_ip_id.clone();
            lb.rules.insert(rule.name.clone(), rule);
        }

        debug!(service = %name, rules = lb.rules.len(), "loaded load balancer state");
        Ok(lb)
    }

    /// Walk the desired ports, then clean up whatever rules are left over
    async fn reconcile_rules(
        &self,
        lb: &mut LoadBalancer,
        service: &Service,
        ports: &[ServicePort],
        token: &CancellationToken,
    ) -> Result<()> {
        let cidrs = source_cidrs(service)?;
        // The rule itself never carries an empty allow-list.
        let rule_cidrs = if cidrs.is_empty() {
            vec![DEFAULT_ALLOWED_CIDR.to_string()]
        } else {
            cidrs.clone()
        };

        let perimeter = self.perimeter_for(&lb.network_id).await?;
        let cidr_updates = supports_cidr_update(self.upstream_version().await?);

        for port in ports {
            let protocol = LoadBalancerProtocol::from_service_port(port, service);
            if protocol == LoadBalancerProtocol::Invalid {
                return Err(Error::UnsupportedProtocol {
                    protocol: port.protocol.clone().unwrap_or_default(),
                });
            }

            let node_port = port.node_port.filter(|p| *p != 0).ok_or_else(|| {
                Error::InvalidService {
                    message: format!("port {} has no node port allocated", port.port),
                }
            })?;

            let desired = DesiredRule {
                name: rule_name(&lb.name, protocol, port.port),
                algorithm: lb.algorithm.clone(),
                protocol,
                public_ip: lb.ip_addr.clone(),
                public_ip_id: lb.ip_addr_id.clone(),
                network_id: lb.network_id.clone(),
                public_port: port.port,
                private_port: node_port,
                cidr_list: rule_cidrs.clone(),
            };

            self.apply_rule_action(lb, &desired, cidr_updates, token).await?;

            perimeter
                .reconcile(
                    self.api.as_ref(),
                    &lb.ip_addr_id,
                    port.port,
                    protocol,
                    &cidrs,
                )
                .await?;
        }

        self.cleanup_obsolete_rules(lb, &perimeter, token).await
    }

    /// Carry out the planned action for one desired rule
    async fn apply_rule_action(
        &self,
        lb: &mut LoadBalancer,
        desired: &DesiredRule,
        cidr_updates: bool,
        token: &CancellationToken,
    ) -> Result<()> {
        let action = plan_rule(lb.rules.get(&desired.name), desired, cidr_updates);

        match action {
            RuleAction::Keep => {
                debug!(rule = %desired.name, "rule is up to date");
                lb.rules.remove(&desired.name);
            }
            RuleAction::UpdateInPlace(update) => {
                info!(rule = %desired.name, "updating load balancer rule");
                let rule = lb.rules.remove(&desired.name).ok_or_else(|| {
                    Error::cloudstack("updateLoadBalancerRule", "rule vanished from state")
                })?;
                check_cancelled(token)?;
                self.api.update_load_balancer_rule(&rule.id, update).await?;
            }
            RuleAction::Recreate => {
                info!(rule = %desired.name, "recreating load balancer rule");
                if let Some(rule) = lb.rules.remove(&desired.name) {
                    check_cancelled(token)?;
                    self.api.delete_load_balancer_rule(&rule.id).await?;
                }
                self.create_rule(lb, desired, token).await?;
            }
            RuleAction::Create => {
                info!(rule = %desired.name, "creating load balancer rule");
                self.create_rule(lb, desired, token).await?;
            }
        }

        Ok(())
    }

    /// Create one rule and assign the backend hosts to it
    async fn create_rule(
        &self,
        lb: &LoadBalancer,
        desired: &DesiredRule,
        token: &CancellationToken,
    ) -> Result<()> {
        check_cancelled(token)?;
        let rule = self
            .api
            .create_load_balancer_rule(CreateLoadBalancerRuleParams {
                name: desired.name.clone(),
                algorithm: desired.algorithm.clone(),
                protocol: desired.protocol.cs_protocol().to_string(),
                public_port: desired.public_port,
                private_port: desired.private_port,
                public_ip_id: desired.public_ip_id.clone(),
                network_id: desired.network_id.clone(),
                cidr_list: desired.cidr_list.clone(),
                // The perimeter is managed explicitly.
                open_firewall: false,
            })
            .await?;

        debug!(rule = %desired.name, hosts = ?lb.host_ids, "assigning hosts");
        check_cancelled(token)?;
        self.api
            .assign_to_load_balancer_rule(&rule.id, &lb.host_ids)
            .await?;

        Ok(())
    }

    /// Delete rules no desired port claimed, perimeter first
    async fn cleanup_obsolete_rules(
        &self,
        lb: &mut LoadBalancer,
        perimeter: &Perimeter,
        token: &CancellationToken,
    ) -> Result<()> {
        let obsolete: Vec<LoadBalancerRule> = lb.rules.drain().map(|(_, rule)| rule).collect();

        for rule in obsolete {
            let protocol = LoadBalancerProtocol::from_cs_name(&rule.protocol);
            if protocol == LoadBalancerProtocol::Invalid {
                return Err(Error::UnsupportedProtocol {
                    protocol: rule.protocol.clone(),
                });
            }
            let port: i32 = rule.public_port.parse().map_err(|_| {
                Error::cloudstack(
                    "listLoadBalancerRules",
                    format!("unparseable public port {:?} on rule {}", rule.public_port, rule.name),
                )
            })?;

            debug!(rule = %rule.name, "deleting perimeter rules for obsolete rule");
            perimeter
                .delete(self.api.as_ref(), &rule.public_ip_id, port, protocol)
                .await?;

            info!(rule = %rule.name, "deleting obsolete load balancer rule");
            check_cancelled(token)?;
            self.api.delete_load_balancer_rule(&rule.id).await?;
        }

        Ok(())
    }

    /// Perimeter mode for a network, tolerating rules without one
    async fn perimeter_for(&self, network_id: &str) -> Result<Perimeter> {
        if network_id.is_empty() {
            warn!("rule carries no network ID, skipping perimeter management");
            return Ok(Perimeter::Unsupported);
        }
        Perimeter::select(self.api.as_ref(), network_id).await
    }
}

/// The Service's ports; a load balancer without any is malformed
fn service_ports(service: &Service) -> Result<Vec<ServicePort>> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.clone())
        .unwrap_or_default();

    if ports.is_empty() {
        return Err(Error::InvalidService {
            message: "requested load balancer with no ports".to_string(),
        });
    }

    Ok(ports)
}

/// Map session affinity onto a CloudStack balancing algorithm
fn algorithm_for(service: &Service) -> Result<String> {
    match service
        .spec
        .as_ref()
        .and_then(|s| s.session_affinity.as_deref())
    {
        None | Some("None") => Ok("roundrobin".to_string()),
        Some("ClientIP") => Ok("source".to_string()),
        Some(other) => Err(Error::UnsupportedAffinity {
            affinity: other.to_string(),
        }),
    }
}

/// Build the ingress status: the hostname annotation wins over the IP
fn ingress_status(ip: &str, hostname: &str) -> LoadBalancerStatus {
    let ingress = if hostname.is_empty() {
        LoadBalancerIngress {
            ip: Some(ip.to_string()),
            ..Default::default()
        }
    } else {
        LoadBalancerIngress {
            hostname: Some(hostname.to_string()),
            ..Default::default()
        }
    };

    LoadBalancerStatus {
        ingress: Some(vec![ingress]),
    }
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
