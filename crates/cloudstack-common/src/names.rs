//! Deterministic naming for provider-side objects
//!
//! Rule names are the identity under which reconciliation looks up existing
//! state, so they must be stable across runs and unique across the cluster.

use k8s_openapi::api::core::v1::Service;
use sha2::{Digest, Sha256};

use crate::protocol::LoadBalancerProtocol;

/// Maximum length of a Kubernetes label value, which CloudStack names also
/// have to fit when reflected back into node labels
const MAX_LABEL_LENGTH: usize = 63;

/// Derive the cluster-wide-unique base name for a Service's load balancer
///
/// The name hashes `namespace/name` so renamed or recreated Services with
/// the same key keep finding their rules, and Services in different
/// namespaces never collide.
pub fn load_balancer_name(service: &Service) -> String {
    let namespace = service.metadata.namespace.as_deref().unwrap_or("default");
    let name = service.metadata.name.as_deref().unwrap_or("");

    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"/");
    hasher.update(name.as_bytes());
    let digest = hex::encode(hasher.finalize());

    // "a" prefix keeps the name starting with a letter whatever the digest.
    format!("a{}", &digest[..31])
}

/// Canonical name for the rule serving one Service port
pub fn rule_name(base: &str, protocol: LoadBalancerProtocol, public_port: i32) -> String {
    format!("{}-{}-{}", base, protocol, public_port)
}

/// Sanitize a value so it complies with the Kubernetes label syntax
///
/// Anything outside `[-A-Za-z0-9_.]` becomes `_`; the result is trimmed to
/// start and end with an alphanumeric character and capped at 63 characters,
/// re-trimming after truncation so no separator is left dangling.
pub fn sanitize_label(value: &str) -> String {
    let mapped: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut trimmed = mapped.trim_matches(|c| c == '-' || c == '_' || c == '.');

    if trimmed.len() > MAX_LABEL_LENGTH {
        trimmed = &trimmed[..MAX_LABEL_LENGTH];
    }

    trimmed
        .trim_matches(|c| c == '-' || c == '_' || c == '.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(namespace: &str, name: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some(namespace.into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn base_name_is_deterministic() {
        let a = load_balancer_name(&service("default", "svc-a"));
        let b = load_balancer_name(&service("default", "svc-a"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.starts_with('a'));
    }

    #[test]
    fn base_name_distinguishes_namespaces() {
        let a = load_balancer_name(&service("default", "svc"));
        let b = load_balancer_name(&service("prod", "svc"));
        assert_ne!(a, b);
    }

    #[test]
    fn rule_names_embed_protocol_and_port() {
        let name = rule_name("abc123", LoadBalancerProtocol::Tcp, 80);
        assert_eq!(name, "abc123-tcp-80");
        let name = rule_name("abc123", LoadBalancerProtocol::TcpProxy, 443);
        assert_eq!(name, "abc123-tcp-proxy-443");
    }

    #[test]
    fn rule_name_is_stable_across_runs() {
        let svc = service("default", "web");
        let base = load_balancer_name(&svc);
        assert_eq!(
            rule_name(&base, LoadBalancerProtocol::Udp, 53),
            rule_name(&load_balancer_name(&svc), LoadBalancerProtocol::Udp, 53)
        );
    }

    #[test]
    fn sanitize_replaces_forbidden_characters() {
        assert_eq!(sanitize_label("Small Instance"), "Small_Instance");
        assert_eq!(sanitize_label("a/b:c"), "a_b_c");
    }

    #[test]
    fn sanitize_trims_separators_after_truncation() {
        let value = format!("{}-x", "a".repeat(62));
        let cleaned = sanitize_label(&value);
        assert_eq!(cleaned, "a".repeat(62));

        assert_eq!(sanitize_label("--name--"), "name");
    }
}
