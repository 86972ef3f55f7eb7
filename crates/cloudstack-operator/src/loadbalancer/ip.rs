//! Public IP acquisition and release
//!
//! A Service either names the IP it wants or leaves the choice to the
//! controller. Only addresses the controller allocated itself are released
//! when the Service goes away.

use tracing::{debug, info};

use cloudstack_client::{AssociateIpAddressParams, AssociateScope, CloudStackApi};
use cloudstack_common::{Error, Result};

/// A public IP the engine settled on for one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquiredIp {
    /// Dotted-quad address
    pub address: String,
    /// CloudStack address ID
    pub id: String,
    /// Whether this controller allocated the address itself
    pub associated_by_controller: bool,
}

/// Acquire the public IP for a load balancer
///
/// With a desired address: it must resolve to exactly one record; an already
/// allocated record is adopted without ownership, an unallocated one is
/// associated on the Service's network (or its VPC). Without a desired
/// address a fresh IP is allocated and marked controller-owned.
pub async fn acquire(
    api: &dyn CloudStackApi,
    network_id: &str,
    desired: Option<&str>,
) -> Result<AcquiredIp> {
    match desired.filter(|d| !d.is_empty()) {
        Some(address) => acquire_named(api, network_id, address).await,
        None => {
            let scope = associate_scope(api, network_id).await?;
            let ip = associate(api, scope, None).await?;
            info!(ip = %ip.address, "allocated new load balancer IP");
            Ok(AcquiredIp {
                associated_by_controller: true,
                ..ip
            })
        }
    }
}

/// Release a public IP by ID
pub async fn release(api: &dyn CloudStackApi, ip_id: &str) -> Result<()> {
    api.disassociate_ip_address(ip_id).await
}

async fn acquire_named(
    api: &dyn CloudStackApi,
    network_id: &str,
    address: &str,
) -> Result<AcquiredIp> {
    debug!(ip = %address, "resolving requested load balancer IP");

    let mut matches = api.list_public_ip_addresses(Some(address.to_string())).await?;

    match matches.len() {
        0 => Err(Error::IpNotFound {
            address: address.to_string(),
        }),
        1 => {
            let record = matches.remove(0);
            if record.allocated.is_some() {
                return Ok(AcquiredIp {
                    address: record.ip_address,
                    id: record.id,
                    associated_by_controller: false,
                });
            }

            // Discovered but not yet account-allocated; claim it. The
            // Service named this address, so the controller still does not
            // own it.
            let scope = associate_scope(api, network_id).await?;
            let ip = associate(api, scope, Some(address.to_string())).await?;
            Ok(ip)
        }
        count => Err(Error::IpAmbiguous {
            address: address.to_string(),
            count,
        }),
    }
}

/// Decide whether the IP belongs on the network or its enclosing VPC
async fn associate_scope(api: &dyn CloudStackApi, network_id: &str) -> Result<AssociateScope> {
    let network = api
        .get_network(network_id)
        .await?
        .ok_or_else(|| Error::cloudstack("listNetworks", format!("could not find network {}", network_id)))?;

    Ok(match network.vpc() {
        Some(vpc_id) => AssociateScope::Vpc(vpc_id.to_string()),
        None => AssociateScope::Network(network_id.to_string()),
    })
}

async fn associate(
    api: &dyn CloudStackApi,
    scope: AssociateScope,
    ip_address: Option<String>,
) -> Result<AcquiredIp> {
    let scope_label = match &scope {
        AssociateScope::Network(id) => format!("network {}", id),
        AssociateScope::Vpc(id) => format!("VPC {}", id),
    };

    let record = api
        .associate_ip_address(AssociateIpAddressParams { scope, ip_address })
        .await
        .map_err(|e| Error::AssociateFailed {
            scope: scope_label,
            message: e.to_string(),
        })?;

    Ok(AcquiredIp {
        address: record.ip_address,
        id: record.id,
        associated_by_controller: false,
    })
}
