//! Node-to-VM resolution
//!
//! Kubernetes hands the engine Node objects; CloudStack wants VM IDs. Nodes
//! are matched by name against the project-scoped VM listing, and all
//! matched VMs must sit on one network, since a load balancer rule binds to
//! exactly one.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::Node;
use tracing::debug;

use cloudstack_client::CloudStackApi;
use cloudstack_common::{Error, Result};

/// Resolve nodes to `(vm_ids, network_id)`
///
/// A node named with an FQDN is reduced to its host part before matching,
/// and matching is case-insensitive. The primary NIC decides each VM's
/// network.
pub async fn resolve_nodes(
    api: &dyn CloudStackApi,
    nodes: &[Node],
) -> Result<(Vec<String>, String)> {
    let wanted: HashSet<String> = nodes
        .iter()
        .filter_map(|node| node.metadata.name.as_deref())
        .map(host_part)
        .collect();

    let vms = api.list_virtual_machines().await?;

    let mut host_ids = Vec::new();
    let mut network_id = String::new();

    for vm in &vms {
        if !wanted.contains(&vm.name.to_lowercase()) {
            continue;
        }

        let Some(nic) = vm.nics.first() else {
            debug!(vm = %vm.name, "matched VM has no NICs, skipping");
            continue;
        };

        if !network_id.is_empty() && network_id != nic.network_id {
            return Err(Error::MultipleNetworks {
                first: network_id,
                second: nic.network_id.clone(),
            });
        }

        network_id = nic.network_id.clone();
        host_ids.push(vm.id.clone());
    }

    if host_ids.is_empty() {
        return Err(Error::NoMatchingHost);
    }

    Ok((host_ids, network_id))
}

/// Lowercased host part of a node name; `<host>.<domain>` reduces to `<host>`
fn host_part(name: &str) -> String {
    name.split('.').next().unwrap_or(name).to_lowercase()
}
