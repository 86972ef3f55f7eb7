//! Service controller
//!
//! Watches Services and drives the load balancer engine. The kube runtime
//! serializes reconciliations per object, so the engine never sees two
//! concurrent calls for the same Service.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cloudstack_common::{Error, Result};

use crate::loadbalancer::CloudStackCloud;

/// Finalizer guarding provider-side cleanup
pub const FINALIZER: &str = "cloudstack.apache.org/load-balancer";

/// Field manager for our patches
const FIELD_MANAGER: &str = "cloudstack-operator";

const REQUEUE_STEADY: Duration = Duration::from_secs(300);
const REQUEUE_RETRY: Duration = Duration::from_secs(30);

/// Controller context shared by all reconciliations
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// The load balancer engine
    pub cloud: CloudStackCloud,
    /// Cancelled on shutdown; propagated into every engine call
    pub shutdown: CancellationToken,
}

/// Reconcile one Service
pub async fn reconcile(service: Arc<Service>, ctx: Arc<Context>) -> Result<Action> {
    let name = service.name_any();
    let namespace = service.namespace().unwrap_or_else(|| "default".to_string());

    if service.metadata.deletion_timestamp.is_some() {
        info!(service = %name, "service deleted, tearing down load balancer");
        ctx.cloud
            .ensure_load_balancer_deleted(&service, &ctx.shutdown)
            .await?;
        remove_finalizer(&ctx.client, &namespace, &service).await?;
        return Ok(Action::await_change());
    }

    if !wants_load_balancer(&service) {
        // The type may have changed away from LoadBalancer; clean up what
        // we still hold a finalizer for.
        if has_finalizer(&service) {
            info!(service = %name, "service no longer wants a load balancer, cleaning up");
            ctx.cloud
                .ensure_load_balancer_deleted(&service, &ctx.shutdown)
                .await?;
            remove_finalizer(&ctx.client, &namespace, &service).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&service) {
        add_finalizer(&ctx.client, &namespace, &service).await?;
    }

    let nodes = list_nodes(&ctx.client).await?;
    debug!(service = %name, nodes = nodes.len(), "reconciling load balancer");

    let status = ctx
        .cloud
        .ensure_load_balancer(&service, &nodes, &ctx.shutdown)
        .await?;

    let api: Api<Service> = Api::namespaced(ctx.client.clone(), &namespace);
    api.patch_status(
        &name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "status": { "loadBalancer": status } })),
    )
    .await?;

    Ok(Action::requeue(REQUEUE_STEADY))
}

/// Requeue policy on reconcile errors
pub fn error_policy(service: Arc<Service>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(service = %service.name_any(), %error, "reconcile failed");
    if error.is_retryable() {
        Action::requeue(REQUEUE_RETRY)
    } else {
        // The Service spec has to change for this to make progress.
        Action::requeue(REQUEUE_STEADY)
    }
}

/// Whether the Service asks for a load balancer at all
pub fn wants_load_balancer(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_deref())
        .is_some_and(|t| t == "LoadBalancer")
}

fn has_finalizer(service: &Service) -> bool {
    service
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == FINALIZER))
}

async fn add_finalizer(client: &Client, namespace: &str, service: &Service) -> Result<()> {
    let mut finalizers = service.metadata.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    patch_finalizers(client, namespace, &service.name_any(), finalizers).await
}

async fn remove_finalizer(client: &Client, namespace: &str, service: &Service) -> Result<()> {
    let Some(finalizers) = service.metadata.finalizers.clone() else {
        return Ok(());
    };
    let finalizers: Vec<String> = finalizers.into_iter().filter(|f| f != FINALIZER).collect();
    patch_finalizers(client, namespace, &service.name_any(), finalizers).await
}

async fn patch_finalizers(
    client: &Client,
    namespace: &str,
    name: &str,
    finalizers: Vec<String>,
) -> Result<()> {
    let api: Api<Service> = Api::namespaced(client.clone(), namespace);
    api.patch_metadata(
        name,
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(serde_json::json!({ "metadata": { "finalizers": finalizers } })),
    )
    .await?;
    Ok(())
}

async fn list_nodes(client: &Client) -> Result<Vec<Node>> {
    let api: Api<Node> = Api::all(client.clone());
    let nodes = api.list(&ListParams::default()).await?;
    Ok(nodes.items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(type_: Option<&str>, finalizers: Option<Vec<&str>>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc".into()),
                namespace: Some("default".into()),
                finalizers: finalizers
                    .map(|f| f.into_iter().map(String::from).collect()),
                ..Default::default()
            },
            spec: type_.map(|t| ServiceSpec {
                type_: Some(t.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn only_load_balancer_services_are_reconciled() {
        assert!(wants_load_balancer(&service(Some("LoadBalancer"), None)));
        assert!(!wants_load_balancer(&service(Some("ClusterIP"), None)));
        assert!(!wants_load_balancer(&service(Some("NodePort"), None)));
        assert!(!wants_load_balancer(&service(None, None)));
    }

    #[test]
    fn finalizer_detection_matches_exactly() {
        assert!(has_finalizer(&service(
            Some("LoadBalancer"),
            Some(vec![FINALIZER])
        )));
        assert!(!has_finalizer(&service(
            Some("LoadBalancer"),
            Some(vec!["other.io/finalizer"])
        )));
        assert!(!has_finalizer(&service(Some("LoadBalancer"), None)));
    }

    #[test]
    fn retryable_errors_requeue_quickly() {
        let ctx_error = Error::cloudstack("listLoadBalancerRules", "connection refused");
        assert!(ctx_error.is_retryable());

        let spec_error = Error::UnsupportedAffinity {
            affinity: "ClientIPWithTimeout".into(),
        };
        assert!(!spec_error.is_retryable());
    }
}
