//! Node instance metadata
//!
//! Resolves Kubernetes nodes to their CloudStack VMs for the instance side
//! of the cloud provider contract: addresses, instance IDs, instance types,
//! and existence checks by provider ID.

use k8s_openapi::api::core::v1::NodeAddress;

use cloudstack_client::{CloudStackApi, VirtualMachine};
use cloudstack_common::names::sanitize_label;
use cloudstack_common::provider_id::{instance_id_from_provider_id, provider_id_from_instance};
use cloudstack_common::{Error, Result};

/// Addresses of the VM backing the named node
pub async fn node_addresses(api: &dyn CloudStackApi, name: &str) -> Result<Vec<NodeAddress>> {
    let vm = vm_by_name(api, name).await?;
    addresses_of(&vm)
}

/// Addresses of the VM encoded in a provider ID
pub async fn node_addresses_by_provider_id(
    api: &dyn CloudStackApi,
    provider_id: &str,
) -> Result<Vec<NodeAddress>> {
    let vm = vm_by_provider_id(api, provider_id).await?;
    addresses_of(&vm)
}

/// The provider ID for the named node
pub async fn instance_id(api: &dyn CloudStackApi, name: &str) -> Result<String> {
    let vm = vm_by_name(api, name).await?;
    Ok(provider_id_from_instance(&vm.id))
}

/// The instance type (compute offering) of the named node, as a label value
pub async fn instance_type(api: &dyn CloudStackApi, name: &str) -> Result<String> {
    let vm = vm_by_name(api, name).await?;
    Ok(sanitize_label(&vm.service_offering_name))
}

/// The instance type of the VM encoded in a provider ID
pub async fn instance_type_by_provider_id(
    api: &dyn CloudStackApi,
    provider_id: &str,
) -> Result<String> {
    let vm = vm_by_provider_id(api, provider_id).await?;
    Ok(sanitize_label(&vm.service_offering_name))
}

/// Whether the VM encoded in a provider ID still exists
pub async fn instance_exists_by_provider_id(
    api: &dyn CloudStackApi,
    provider_id: &str,
) -> Result<bool> {
    let (id, _region) = instance_id_from_provider_id(provider_id)?;
    Ok(api.get_virtual_machine_by_id(&id).await?.is_some())
}

async fn vm_by_name(api: &dyn CloudStackApi, name: &str) -> Result<VirtualMachine> {
    api.get_virtual_machine_by_name(name)
        .await?
        .ok_or_else(|| Error::InstanceNotFound {
            name: name.to_string(),
        })
}

async fn vm_by_provider_id(api: &dyn CloudStackApi, provider_id: &str) -> Result<VirtualMachine> {
    let (id, _region) = instance_id_from_provider_id(provider_id)?;
    api.get_virtual_machine_by_id(&id)
        .await?
        .ok_or_else(|| Error::InstanceNotFound {
            name: provider_id.to_string(),
        })
}

/// Internal IP from the primary NIC, plus hostname and public IP when known
fn addresses_of(vm: &VirtualMachine) -> Result<Vec<NodeAddress>> {
    let Some(nic) = vm.nics.first() else {
        return Err(Error::InstanceNotFound {
            name: format!("{} has no internal IP", vm.name),
        });
    };

    let mut addresses = vec![NodeAddress {
        type_: "InternalIP".to_string(),
        address: nic.ip_address.clone(),
    }];

    if let Some(hostname) = vm.hostname.as_deref().filter(|h| !h.is_empty()) {
        addresses.push(NodeAddress {
            type_: "Hostname".to_string(),
            address: hostname.to_string(),
        });
    }

    if let Some(public_ip) = vm.public_ip.as_deref().filter(|ip| !ip.is_empty()) {
        addresses.push(NodeAddress {
            type_: "ExternalIP".to_string(),
            address: public_ip.to_string(),
        });
    }

    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudstack_client::{MockCloudStackApi, Nic};
    use mockall::predicate::eq;

    fn vm(id: &str, name: &str) -> VirtualMachine {
        VirtualMachine {
            id: id.to_string(),
            name: name.to_string(),
            service_offering_name: "Small Instance".to_string(),
            nics: vec![Nic {
                id: "nic-1".to_string(),
                network_id: "net-1".to_string(),
                ip_address: "10.1.1.4".to_string(),
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn addresses_include_internal_ip_hostname_and_public_ip() {
        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_name()
            .with(eq("node1"))
            .returning(|_| {
                let mut machine = vm("vm-1", "node1");
                machine.hostname = Some("node1.internal".to_string());
                machine.public_ip = Some("198.51.100.4".to_string());
                Ok(Some(machine))
            });

        let addresses = node_addresses(&api, "node1").await.unwrap();
        assert_eq!(addresses.len(), 3);
        assert_eq!(addresses[0].type_, "InternalIP");
        assert_eq!(addresses[0].address, "10.1.1.4");
        assert_eq!(addresses[1].type_, "Hostname");
        assert_eq!(addresses[2].type_, "ExternalIP");
    }

    #[tokio::test]
    async fn vm_without_nics_has_no_addresses() {
        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_name().returning(|_| {
            let mut machine = vm("vm-1", "node1");
            machine.nics.clear();
            Ok(Some(machine))
        });

        assert!(node_addresses(&api, "node1").await.is_err());
    }

    #[tokio::test]
    async fn missing_vm_is_instance_not_found() {
        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_name()
            .returning(|_| Ok(None));

        let err = node_addresses(&api, "node1").await.unwrap_err();
        assert!(matches!(err, Error::InstanceNotFound { .. }));
    }

    #[tokio::test]
    async fn instance_id_encodes_the_vm_uuid() {
        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_name()
            .returning(|_| Ok(Some(vm("7f4a9c72", "node1"))));

        let id = instance_id(&api, "node1").await.unwrap();
        assert_eq!(id, "external-cloudstack:///7f4a9c72");
    }

    #[tokio::test]
    async fn instance_type_is_sanitized() {
        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_name()
            .returning(|_| Ok(Some(vm("vm-1", "node1"))));

        let offering = instance_type(&api, "node1").await.unwrap();
        assert_eq!(offering, "Small_Instance");
    }

    #[tokio::test]
    async fn existence_check_accepts_legacy_provider_ids() {
        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_id()
            .with(eq("7f4a9c72"))
            .returning(|_| Ok(Some(vm("7f4a9c72", "node1"))));

        assert!(instance_exists_by_provider_id(&api, "7f4a9c72").await.unwrap());

        let mut api = MockCloudStackApi::new();
        api.expect_get_virtual_machine_by_id()
            .returning(|_| Ok(None));
        assert!(!instance_exists_by_provider_id(&api, "external-cloudstack:///gone")
            .await
            .unwrap());
    }
}
