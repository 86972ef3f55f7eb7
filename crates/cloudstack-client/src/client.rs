//! Typed CloudStack API client
//!
//! Provides a trait-based abstraction over the CloudStack management API,
//! allowing tests to mock provider interactions while production code uses
//! the signed HTTP implementation.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use hmac::{Hmac, Mac};
use semver::Version;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha1::Sha1;
use tracing::{debug, warn};

#[cfg(any(test, feature = "mocks"))]
use mockall::automock;

use cloudstack_common::version::parse_cloudstack_version;
use cloudstack_common::{CloudConfig, Error, Result};

use crate::types::{
    AssociateIpAddressParams, AssociateScope, CreateFirewallRuleParams,
    CreateLoadBalancerRuleParams, CreateNetworkAclParams, FirewallRule, LoadBalancerRule,
    ManagementServer, Network, NetworkAclList, NetworkAclRule, PublicIpAddress,
    UpdateLoadBalancerRuleParams, VirtualMachine,
};

/// How long to wait for an asynchronous CloudStack job before giving up
const ASYNC_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Poll interval while waiting on an asynchronous job
const ASYNC_JOB_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Trait abstracting the CloudStack operations the controller consumes
///
/// The configured project scope is applied inside the implementation, so
/// callers never thread it through. All errors surface as
/// [`Error::CloudStack`] carrying the API command name.
#[cfg_attr(any(test, feature = "mocks"), automock)]
#[async_trait]
pub trait CloudStackApi: Send + Sync {
    /// List load balancer rules whose name contains `keyword`
    async fn list_load_balancer_rules(&self, keyword: &str) -> Result<Vec<LoadBalancerRule>>;

    /// Create a load balancer rule
    async fn create_load_balancer_rule(
        &self,
        params: CreateLoadBalancerRuleParams,
    ) -> Result<LoadBalancerRule>;

    /// Update the mutable fields of a load balancer rule in place
    async fn update_load_balancer_rule(
        &self,
        id: &str,
        params: UpdateLoadBalancerRuleParams,
    ) -> Result<()>;

    /// Delete a load balancer rule
    async fn delete_load_balancer_rule(&self, id: &str) -> Result<()>;

    /// Assign VMs to a load balancer rule
    async fn assign_to_load_balancer_rule(&self, id: &str, vm_ids: &[String]) -> Result<()>;

    /// Remove VMs from a load balancer rule
    async fn remove_from_load_balancer_rule(&self, id: &str, vm_ids: &[String]) -> Result<()>;

    /// List the VMs currently assigned to a load balancer rule
    async fn list_load_balancer_rule_instances(&self, id: &str) -> Result<Vec<VirtualMachine>>;

    /// List public IP addresses, optionally filtered to one address
    async fn list_public_ip_addresses(
        &self,
        address: Option<String>,
    ) -> Result<Vec<PublicIpAddress>>;

    /// Acquire a public IP on a network or VPC
    async fn associate_ip_address(
        &self,
        params: AssociateIpAddressParams,
    ) -> Result<PublicIpAddress>;

    /// Release a public IP
    async fn disassociate_ip_address(&self, id: &str) -> Result<()>;

    /// List firewall rules on a public IP
    async fn list_firewall_rules(&self, ip_address_id: &str) -> Result<Vec<FirewallRule>>;

    /// Create a firewall rule
    async fn create_firewall_rule(&self, params: CreateFirewallRuleParams) -> Result<()>;

    /// Delete a firewall rule
    async fn delete_firewall_rule(&self, id: &str) -> Result<()>;

    /// Fetch a network by ID
    async fn get_network(&self, id: &str) -> Result<Option<Network>>;

    /// Fetch an ACL list by ID
    async fn get_network_acl_list(&self, id: &str) -> Result<Option<NetworkAclList>>;

    /// List the entries of an ACL list
    async fn list_network_acl_rules(&self, acl_list_id: &str) -> Result<Vec<NetworkAclRule>>;

    /// Create an ACL entry
    async fn create_network_acl_rule(&self, params: CreateNetworkAclParams) -> Result<()>;

    /// Delete an ACL entry
    async fn delete_network_acl_rule(&self, id: &str) -> Result<()>;

    /// List all VMs visible to the controller
    async fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>>;

    /// Look up a single VM by name
    async fn get_virtual_machine_by_name(&self, name: &str) -> Result<Option<VirtualMachine>>;

    /// Look up a single VM by ID
    async fn get_virtual_machine_by_id(&self, id: &str) -> Result<Option<VirtualMachine>>;

    /// The management server's version, for capability gating
    async fn management_server_version(&self) -> Result<Version>;
}

/// Signed HTTP implementation of [`CloudStackApi`]
pub struct HttpCloudStackClient {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    secret_key: String,
    project_id: Option<String>,
}

impl HttpCloudStackClient {
    /// Build a client from the cloud provider configuration
    pub fn new(config: &CloudConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.ssl_no_verify)
            .build()
            .map_err(|e| Error::config(format!("could not build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            project_id: config.project_id.clone(),
        })
    }

    /// Issue one API command and return the response envelope's payload
    async fn call(&self, command: &'static str, mut params: Vec<(String, String)>) -> Result<Value> {
        if let Some(project) = &self.project_id {
            params.push(("projectid".into(), project.clone()));
        }

        debug!(command, "calling CloudStack API");
        let payload = self.execute(command, command, params).await?;
        self.resolve_async_job(command, payload).await
    }

    /// Sign and send a single GET; errors are attributed to `op`
    async fn execute(
        &self,
        op: &'static str,
        command: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<Value> {
        params.push(("command".into(), command.to_string()));
        params.push(("response".into(), "json".to_string()));
        params.push(("apikey".into(), self.api_key.clone()));

        let query = canonical_query(&params);
        let signature = sign_query(&query, &self.secret_key).map_err(|e| Error::cloudstack(op, e))?;
        let url = format!(
            "{}?{}&signature={}",
            self.api_url,
            query,
            urlencoding::encode(&signature)
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::cloudstack(op, e))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| Error::cloudstack(op, e))?;

        let payload = unwrap_envelope(&body);
        if let Some(text) = payload.get("errortext").and_then(Value::as_str) {
            return Err(Error::cloudstack(op, text));
        }
        if !status.is_success() {
            return Err(Error::cloudstack(op, format!("HTTP {}", status)));
        }

        Ok(payload)
    }

    /// Wait for an asynchronous job to finish and return its result
    ///
    /// Synchronous responses pass through untouched.
    async fn resolve_async_job(&self, command: &'static str, payload: Value) -> Result<Value> {
        let job_id = match payload.get("jobid").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => return Ok(payload),
        };

        let deadline = tokio::time::Instant::now() + ASYNC_JOB_TIMEOUT;
        loop {
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::cloudstack(
                    command,
                    format!("async job {} did not finish in time", job_id),
                ));
            }
            tokio::time::sleep(ASYNC_JOB_POLL_INTERVAL).await;

            let job = self
                .execute(
                    command,
                    "queryAsyncJobResult",
                    vec![("jobid".to_string(), job_id.clone())],
                )
                .await?;

            match job.get("jobstatus").and_then(Value::as_i64) {
                Some(0) | None => continue,
                Some(1) => {
                    return Ok(job.get("jobresult").cloned().unwrap_or(Value::Null));
                }
                Some(_) => {
                    let text = job
                        .get("jobresult")
                        .and_then(|r| r.get("errortext"))
                        .and_then(Value::as_str)
                        .unwrap_or("async job failed");
                    return Err(Error::cloudstack(command, text));
                }
            }
        }
    }

    /// Extract and deserialize a list from a payload, tolerating absence
    fn list_of<T: DeserializeOwned>(
        command: &'static str,
        payload: &Value,
        key: &str,
    ) -> Result<Vec<T>> {
        match payload.get(key) {
            Some(list) => serde_json::from_value(list.clone())
                .map_err(|e| Error::cloudstack(command, e)),
            None => Ok(Vec::new()),
        }
    }

    /// Extract a single object from a list payload; `None` when the listing
    /// is empty, an error when it is ambiguous
    fn single_of<T: DeserializeOwned>(
        command: &'static str,
        payload: &Value,
        key: &str,
    ) -> Result<Option<T>> {
        let mut items: Vec<T> = Self::list_of(command, payload, key)?;
        match items.len() {
            0 | 1 => Ok(items.pop()),
            n => Err(Error::cloudstack(
                command,
                format!("{} matches, expected one", n),
            )),
        }
    }
}

#[async_trait]
impl CloudStackApi for HttpCloudStackClient {
    async fn list_load_balancer_rules(&self, keyword: &str) -> Result<Vec<LoadBalancerRule>> {
        let payload = self
            .call(
                "listLoadBalancerRules",
                vec![
                    ("keyword".into(), keyword.to_string()),
                    ("listall".into(), "true".to_string()),
                ],
            )
            .await?;
        Self::list_of("listLoadBalancerRules", &payload, "loadbalancerrule")
    }

    async fn create_load_balancer_rule(
        &self,
        params: CreateLoadBalancerRuleParams,
    ) -> Result<LoadBalancerRule> {
        let payload = self
            .call(
                "createLoadBalancerRule",
                vec![
                    ("name".into(), params.name.clone()),
                    ("algorithm".into(), params.algorithm),
                    ("protocol".into(), params.protocol),
                    ("publicport".into(), params.public_port.to_string()),
                    ("privateport".into(), params.private_port.to_string()),
                    ("publicipid".into(), params.public_ip_id),
                    ("networkid".into(), params.network_id),
                    ("cidrlist".into(), params.cidr_list.join(",")),
                    ("openfirewall".into(), params.open_firewall.to_string()),
                ],
            )
            .await?;

        let rule = payload
            .get("loadbalancer")
            .cloned()
            .unwrap_or_else(|| payload.clone());
        serde_json::from_value(rule).map_err(|e| Error::cloudstack("createLoadBalancerRule", e))
    }

    async fn update_load_balancer_rule(
        &self,
        id: &str,
        params: UpdateLoadBalancerRuleParams,
    ) -> Result<()> {
        let mut call_params = vec![("id".to_string(), id.to_string())];
        if let Some(algorithm) = params.algorithm {
            call_params.push(("algorithm".into(), algorithm));
        }
        if let Some(protocol) = params.protocol {
            call_params.push(("protocol".into(), protocol));
        }
        if let Some(cidr_list) = params.cidr_list {
            call_params.push(("cidrlist".into(), cidr_list.join(",")));
        }
        self.call("updateLoadBalancerRule", call_params).await?;
        Ok(())
    }

    async fn delete_load_balancer_rule(&self, id: &str) -> Result<()> {
        self.call(
            "deleteLoadBalancerRule",
            vec![("id".into(), id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn assign_to_load_balancer_rule(&self, id: &str, vm_ids: &[String]) -> Result<()> {
        self.call(
            "assignToLoadBalancerRule",
            vec![
                ("id".into(), id.to_string()),
                ("virtualmachineids".into(), vm_ids.join(",")),
            ],
        )
        .await?;
        Ok(())
    }

    async fn remove_from_load_balancer_rule(&self, id: &str, vm_ids: &[String]) -> Result<()> {
        self.call(
            "removeFromLoadBalancerRule",
            vec![
                ("id".into(), id.to_string()),
                ("virtualmachineids".into(), vm_ids.join(",")),
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_load_balancer_rule_instances(&self, id: &str) -> Result<Vec<VirtualMachine>> {
        let payload = self
            .call(
                "listLoadBalancerRuleInstances",
                vec![("id".into(), id.to_string())],
            )
            .await?;
        Self::list_of(
            "listLoadBalancerRuleInstances",
            &payload,
            "loadbalancerruleinstance",
        )
    }

    async fn list_public_ip_addresses(
        &self,
        address: Option<String>,
    ) -> Result<Vec<PublicIpAddress>> {
        let mut params = vec![("listall".to_string(), "true".to_string())];
        if let Some(address) = address {
            params.push(("ipaddress".into(), address));
        }
        let payload = self.call("listPublicIpAddresses", params).await?;
        Self::list_of("listPublicIpAddresses", &payload, "publicipaddress")
    }

    async fn associate_ip_address(
        &self,
        params: AssociateIpAddressParams,
    ) -> Result<PublicIpAddress> {
        let mut call_params = match params.scope {
            AssociateScope::Network(id) => vec![("networkid".to_string(), id)],
            AssociateScope::Vpc(id) => vec![("vpcid".to_string(), id)],
        };
        if let Some(address) = params.ip_address {
            call_params.push(("ipaddress".into(), address));
        }
        let payload = self.call("associateIpAddress", call_params).await?;
        let ip = payload
            .get("ipaddress")
            .cloned()
            .unwrap_or_else(|| payload.clone());
        serde_json::from_value(ip).map_err(|e| Error::cloudstack("associateIpAddress", e))
    }

    async fn disassociate_ip_address(&self, id: &str) -> Result<()> {
        self.call(
            "disassociateIpAddress",
            vec![("id".into(), id.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn list_firewall_rules(&self, ip_address_id: &str) -> Result<Vec<FirewallRule>> {
        let payload = self
            .call(
                "listFirewallRules",
                vec![
                    ("ipaddressid".into(), ip_address_id.to_string()),
                    ("listall".into(), "true".to_string()),
                ],
            )
            .await?;
        Self::list_of("listFirewallRules", &payload, "firewallrule")
    }

    async fn create_firewall_rule(&self, params: CreateFirewallRuleParams) -> Result<()> {
        self.call(
            "createFirewallRule",
            vec![
                ("ipaddressid".into(), params.ip_address_id),
                ("protocol".into(), params.protocol),
                ("startport".into(), params.start_port.to_string()),
                ("endport".into(), params.end_port.to_string()),
                ("cidrlist".into(), params.cidr_list.join(",")),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_firewall_rule(&self, id: &str) -> Result<()> {
        self.call("deleteFirewallRule", vec![("id".into(), id.to_string())])
            .await?;
        Ok(())
    }

    async fn get_network(&self, id: &str) -> Result<Option<Network>> {
        let payload = self
            .call("listNetworks", vec![("id".into(), id.to_string())])
            .await?;
        Self::single_of("listNetworks", &payload, "network")
    }

    async fn get_network_acl_list(&self, id: &str) -> Result<Option<NetworkAclList>> {
        let payload = self
            .call("listNetworkACLLists", vec![("id".into(), id.to_string())])
            .await?;
        Self::single_of("listNetworkACLLists", &payload, "networkacllist")
    }

    async fn list_network_acl_rules(&self, acl_list_id: &str) -> Result<Vec<NetworkAclRule>> {
        let payload = self
            .call(
                "listNetworkACLs",
                vec![("aclid".into(), acl_list_id.to_string())],
            )
            .await?;
        Self::list_of("listNetworkACLs", &payload, "networkacl")
    }

    async fn create_network_acl_rule(&self, params: CreateNetworkAclParams) -> Result<()> {
        self.call(
            "createNetworkACL",
            vec![
                ("aclid".into(), params.acl_list_id),
                ("protocol".into(), params.protocol),
                ("startport".into(), params.start_port.to_string()),
                ("endport".into(), params.end_port.to_string()),
                ("cidrlist".into(), params.cidr_list),
                ("action".into(), params.action),
                ("traffictype".into(), params.traffic_type),
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_network_acl_rule(&self, id: &str) -> Result<()> {
        self.call("deleteNetworkACL", vec![("id".into(), id.to_string())])
            .await?;
        Ok(())
    }

    async fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>> {
        let payload = self
            .call(
                "listVirtualMachines",
                vec![("listall".into(), "true".to_string())],
            )
            .await?;
        Self::list_of("listVirtualMachines", &payload, "virtualmachine")
    }

    async fn get_virtual_machine_by_name(&self, name: &str) -> Result<Option<VirtualMachine>> {
        let payload = self
            .call(
                "listVirtualMachines",
                vec![
                    ("name".into(), name.to_string()),
                    ("listall".into(), "true".to_string()),
                ],
            )
            .await?;
        Self::single_of("listVirtualMachines", &payload, "virtualmachine")
    }

    async fn get_virtual_machine_by_id(&self, id: &str) -> Result<Option<VirtualMachine>> {
        let payload = self
            .call("listVirtualMachines", vec![("id".into(), id.to_string())])
            .await?;
        Self::single_of("listVirtualMachines", &payload, "virtualmachine")
    }

    async fn management_server_version(&self) -> Result<Version> {
        let payload = self
            .call("listManagementServersMetrics", Vec::new())
            .await?;
        let servers: Vec<ManagementServer> = Self::list_of(
            "listManagementServersMetrics",
            &payload,
            "managementserver",
        )?;

        let server = servers.first().ok_or_else(|| {
            Error::cloudstack("listManagementServersMetrics", "no management server listed")
        })?;
        if servers.len() > 1 {
            warn!(
                count = servers.len(),
                "multiple management servers listed, using the first"
            );
        }
        parse_cloudstack_version(&server.version)
    }
}

/// Build the sorted, URL-encoded query string CloudStack expects
fn canonical_query(params: &[(String, String)]) -> String {
    let mut pairs: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| {
            (
                k.to_lowercase(),
                urlencoding::encode(v).replace('+', "%20"),
            )
        })
        .collect();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the request signature: HMAC-SHA1 over the lowercased query,
/// base64-encoded
fn sign_query(query: &str, secret: &str) -> std::result::Result<String, String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("invalid secret key: {}", e))?;
    mac.update(query.to_lowercase().as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// Peel the single `...response` wrapper CloudStack puts around every payload
fn unwrap_envelope(body: &Value) -> Value {
    if let Some(object) = body.as_object() {
        if object.len() == 1 {
            if let Some((key, inner)) = object.iter().next() {
                if key.ends_with("response") {
                    return inner.clone();
                }
            }
        }
    }
    body.clone()
}
