//! Service annotation access
//!
//! All knobs this controller recognizes are `service.beta.kubernetes.io`
//! annotations on the Service object.

use k8s_openapi::api::core::v1::Service;
use tracing::debug;

/// Enables the HAProxy PROXY protocol on TCP rules when set to `"true"`
pub const ANNOTATION_PROXY_PROTOCOL: &str =
    "service.beta.kubernetes.io/cloudstack-load-balancer-proxy-protocol";

/// Comma-separated CIDR allow-list; overrides `Spec.loadBalancerSourceRanges`
pub const ANNOTATION_SOURCE_CIDRS: &str =
    "service.beta.kubernetes.io/cloudstack-load-balancer-source-cidrs";

/// When non-empty, reported as the ingress hostname instead of the IP
pub const ANNOTATION_HOSTNAME: &str =
    "service.beta.kubernetes.io/cloudstack-load-balancer-hostname";

/// Read a string annotation, falling back to `default` when absent
///
/// A present-but-empty annotation returns the empty string, not the default;
/// some callers treat empty as a meaningful value.
pub fn get_string_annotation(service: &Service, key: &str, default: &str) -> String {
    match service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
    {
        Some(value) => value.clone(),
        None => default.to_string(),
    }
}

/// Read a boolean annotation, falling back to `default` when absent or
/// unparseable
///
/// Only the exact strings `"true"` and `"false"` are recognized.
pub fn get_bool_annotation(service: &Service, key: &str, default: bool) -> bool {
    match service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
    {
        Some(value) => match value.as_str() {
            "true" => true,
            "false" => false,
            other => {
                debug!(annotation = %key, value = %other, "unparseable boolean annotation, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn service(annotations: Option<&[(&str, &str)]>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("test-service".into()),
                namespace: Some("default".into()),
                annotations: annotations.map(|pairs| {
                    pairs
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>()
                }),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn string_annotation_present() {
        let svc = service(Some(&[("key1", "value1")]));
        assert_eq!(get_string_annotation(&svc, "key1", "default"), "value1");
    }

    #[test]
    fn string_annotation_absent_uses_default() {
        let svc = service(Some(&[("other", "value")]));
        assert_eq!(get_string_annotation(&svc, "key1", "default"), "default");
        let svc = service(None);
        assert_eq!(get_string_annotation(&svc, "key1", "default"), "default");
    }

    #[test]
    fn string_annotation_present_but_empty_returns_empty() {
        let svc = service(Some(&[("key1", "")]));
        assert_eq!(get_string_annotation(&svc, "key1", "default"), "");
    }

    #[test]
    fn bool_annotation_exact_strings_only() {
        let svc = service(Some(&[("key1", "true")]));
        assert!(get_bool_annotation(&svc, "key1", false));

        let svc = service(Some(&[("key1", "false")]));
        assert!(!get_bool_annotation(&svc, "key1", true));

        // "yes", "1", empty and friends fall back to the default.
        for bad in ["yes", "1", "True", ""] {
            let svc = service(Some(&[("key1", bad)]));
            assert!(get_bool_annotation(&svc, "key1", true), "value {bad:?}");
            assert!(!get_bool_annotation(&svc, "key1", false), "value {bad:?}");
        }
    }

    #[test]
    fn bool_annotation_absent_uses_default() {
        let svc = service(None);
        assert!(get_bool_annotation(&svc, "key1", true));
        assert!(!get_bool_annotation(&svc, "key1", false));
    }
}
