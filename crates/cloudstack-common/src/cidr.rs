//! Allowed-source CIDR handling
//!
//! The allow-list for a load balancer comes from the source-cidrs annotation
//! when present, else from the Service's `loadBalancerSourceRanges`, else it
//! is wide open.

use std::collections::HashMap;
use std::str::FromStr;

use ipnet::IpNet;
use k8s_openapi::api::core::v1::Service;

use crate::annotations::ANNOTATION_SOURCE_CIDRS;
use crate::{Error, Result};

/// The network range allowed on the perimeter when no explicit list is given
pub const DEFAULT_ALLOWED_CIDR: &str = "0.0.0.0/0";

/// Resolve the allowed-source CIDR list for a Service
///
/// Each entry is whitespace-trimmed and validated. An annotation that is
/// present but empty yields an empty list; callers that need a non-empty
/// perimeter substitute [`DEFAULT_ALLOWED_CIDR`] themselves.
pub fn source_cidrs(service: &Service) -> Result<Vec<String>> {
    let raw = match service
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_SOURCE_CIDRS))
    {
        Some(annotation) => {
            if annotation.is_empty() {
                return Ok(Vec::new());
            }
            annotation
                .split(',')
                .map(|s| s.trim().to_string())
                .collect::<Vec<_>>()
        }
        None => service
            .spec
            .as_ref()
            .and_then(|s| s.load_balancer_source_ranges.clone())
            .unwrap_or_else(|| vec![DEFAULT_ALLOWED_CIDR.to_string()]),
    };

    for entry in &raw {
        validate_cidr(entry)?;
    }

    Ok(raw)
}

/// Validate a single CIDR entry
pub fn validate_cidr(entry: &str) -> Result<()> {
    IpNet::from_str(entry).map_err(|_| Error::InvalidCidr {
        entry: entry.to_string(),
    })?;
    Ok(())
}

/// Compare two CIDR lists as multisets
///
/// Equal if and only if both contain the same number of every unique
/// element; ordering is irrelevant, multiplicity is not.
pub fn cidr_lists_equal<A: AsRef<str>, B: AsRef<str>>(a: &[A], b: &[B]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff: HashMap<&str, i64> = HashMap::with_capacity(a.len());
    for x in a {
        *diff.entry(x.as_ref()).or_insert(0) += 1;
    }
    for y in b {
        match diff.get_mut(y.as_ref()) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    diff.remove(y.as_ref());
                }
            }
            None => return false,
        }
    }

    diff.is_empty()
}

/// Split a comma-joined CloudStack CIDR list into trimmed entries
pub fn split_cidr_list(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(',').map(|s| s.trim().to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use std::collections::BTreeMap;

    fn service(annotation: Option<&str>, ranges: Option<Vec<&str>>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc".into()),
                namespace: Some("default".into()),
                annotations: annotation.map(|v| {
                    let mut map = BTreeMap::new();
                    map.insert(ANNOTATION_SOURCE_CIDRS.to_string(), v.to_string());
                    map
                }),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                load_balancer_source_ranges: ranges
                    .map(|r| r.into_iter().map(String::from).collect()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_to_allow_all_when_nothing_is_set() {
        let cidrs = source_cidrs(&service(None, None)).unwrap();
        assert_eq!(cidrs, vec![DEFAULT_ALLOWED_CIDR.to_string()]);
    }

    #[test]
    fn trims_and_splits_annotation_entries() {
        let cidrs = source_cidrs(&service(Some("10.0.0.0/8, 192.168.0.0/16"), None)).unwrap();
        assert_eq!(cidrs, vec!["10.0.0.0/8", "192.168.0.0/16"]);
    }

    #[test]
    fn annotation_overrides_spec_source_ranges() {
        let cidrs =
            source_cidrs(&service(Some("10.0.0.0/8"), Some(vec!["172.16.0.0/12"]))).unwrap();
        assert_eq!(cidrs, vec!["10.0.0.0/8"]);
    }

    #[test]
    fn spec_source_ranges_used_without_annotation() {
        let cidrs = source_cidrs(&service(None, Some(vec!["172.16.0.0/12"]))).unwrap();
        assert_eq!(cidrs, vec!["172.16.0.0/12"]);
    }

    #[test]
    fn empty_annotation_yields_empty_list() {
        let cidrs = source_cidrs(&service(Some(""), Some(vec!["172.16.0.0/12"]))).unwrap();
        assert!(cidrs.is_empty());
    }

    #[test]
    fn invalid_entry_is_rejected() {
        let err = source_cidrs(&service(Some("invalid-cidr"), None)).unwrap_err();
        assert!(matches!(err, Error::InvalidCidr { entry } if entry == "invalid-cidr"));
    }

    #[test]
    fn multiset_equality_ignores_order() {
        assert!(cidr_lists_equal(
            &["10.0.0.0/8", "192.168.0.0/16"],
            &["192.168.0.0/16", "10.0.0.0/8"]
        ));
    }

    #[test]
    fn multiset_equality_respects_multiplicity() {
        assert!(!cidr_lists_equal(
            &["10.0.0.0/8", "10.0.0.0/8"],
            &["10.0.0.0/8", "192.168.0.0/16"]
        ));
        assert!(cidr_lists_equal(
            &["10.0.0.0/8", "10.0.0.0/8"],
            &["10.0.0.0/8", "10.0.0.0/8"]
        ));
        assert!(!cidr_lists_equal(&["10.0.0.0/8"], &[] as &[&str]));
    }

    #[test]
    fn split_handles_empty_and_joined_lists() {
        assert!(split_cidr_list("").is_empty());
        assert_eq!(
            split_cidr_list("0.0.0.0/0,10.0.0.0/8"),
            vec!["0.0.0.0/0", "10.0.0.0/8"]
        );
    }
}
