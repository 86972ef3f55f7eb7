//! Load balancer protocol selection
//!
//! CloudStack distinguishes the protocol a load balancer rule speaks
//! (`tcp`, `udp`, `tcp-proxy`) from the IP protocol its perimeter rules
//! filter on (`tcp`, `udp`). Both views live here.

use k8s_openapi::api::core::v1::{Service, ServicePort};

use crate::annotations::{get_bool_annotation, ANNOTATION_PROXY_PROTOCOL};

/// A network protocol supported by the CloudStack load balancer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadBalancerProtocol {
    /// Plain TCP
    Tcp,
    /// UDP (CloudStack 4.6 and later)
    Udp,
    /// TCP with the HAProxy PROXY protocol prepended (CloudStack 4.6 and later)
    TcpProxy,
    /// Anything the load balancer cannot express
    Invalid,
}

impl LoadBalancerProtocol {
    /// The full CloudStack protocol name, as used on load balancer rules
    ///
    /// Returns `""` for [`LoadBalancerProtocol::Invalid`].
    pub fn cs_protocol(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::TcpProxy => "tcp-proxy",
            Self::Invalid => "",
        }
    }

    /// The standard IP protocol name, as used on firewall and ACL rules
    ///
    /// PROXY is an application-layer framing on top of TCP, so it collapses
    /// to `tcp` here. Returns `""` for [`LoadBalancerProtocol::Invalid`].
    pub fn ip_protocol(&self) -> &'static str {
        match self {
            Self::Tcp | Self::TcpProxy => "tcp",
            Self::Udp => "udp",
            Self::Invalid => "",
        }
    }

    /// Select a protocol for a Service port, honoring the proxy-protocol
    /// annotation
    ///
    /// TCP ports become `tcp-proxy` when the annotation is `"true"`. UDP
    /// ports ignore the annotation. SCTP and anything else is invalid.
    pub fn from_service_port(port: &ServicePort, service: &Service) -> Self {
        let proxy = get_bool_annotation(service, ANNOTATION_PROXY_PROTOCOL, false);
        match port.protocol.as_deref() {
            Some("TCP") | None => {
                if proxy {
                    Self::TcpProxy
                } else {
                    Self::Tcp
                }
            }
            Some("UDP") => Self::Udp,
            _ => Self::Invalid,
        }
    }

    /// Parse a CloudStack load balancer protocol name
    ///
    /// Only the exact lowercase forms CloudStack returns in list responses
    /// are accepted.
    pub fn from_cs_name(protocol: &str) -> Self {
        match protocol {
            "tcp" => Self::Tcp,
            "udp" => Self::Udp,
            "tcp-proxy" => Self::TcpProxy,
            _ => Self::Invalid,
        }
    }
}

impl std::fmt::Display for LoadBalancerProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.cs_protocol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn service_with_annotations(annotations: &[(&str, &str)]) -> Service {
        let map: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Service {
            metadata: ObjectMeta {
                name: Some("svc".into()),
                namespace: Some("default".into()),
                annotations: Some(map),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn port(protocol: &str) -> ServicePort {
        ServicePort {
            port: 80,
            protocol: Some(protocol.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn tcp_without_annotation_is_tcp() {
        let svc = service_with_annotations(&[]);
        assert_eq!(
            LoadBalancerProtocol::from_service_port(&port("TCP"), &svc),
            LoadBalancerProtocol::Tcp
        );
    }

    #[test]
    fn tcp_with_proxy_annotation_is_tcp_proxy() {
        let svc = service_with_annotations(&[(ANNOTATION_PROXY_PROTOCOL, "true")]);
        assert_eq!(
            LoadBalancerProtocol::from_service_port(&port("TCP"), &svc),
            LoadBalancerProtocol::TcpProxy
        );
    }

    #[test]
    fn explicit_false_annotation_forces_plain_tcp() {
        let svc = service_with_annotations(&[(ANNOTATION_PROXY_PROTOCOL, "false")]);
        assert_eq!(
            LoadBalancerProtocol::from_service_port(&port("TCP"), &svc),
            LoadBalancerProtocol::Tcp
        );
    }

    #[test]
    fn udp_ignores_proxy_annotation() {
        let svc = service_with_annotations(&[(ANNOTATION_PROXY_PROTOCOL, "true")]);
        assert_eq!(
            LoadBalancerProtocol::from_service_port(&port("UDP"), &svc),
            LoadBalancerProtocol::Udp
        );
    }

    #[test]
    fn sctp_is_invalid() {
        let svc = service_with_annotations(&[]);
        assert_eq!(
            LoadBalancerProtocol::from_service_port(&port("SCTP"), &svc),
            LoadBalancerProtocol::Invalid
        );
    }

    #[test]
    fn proxy_collapses_to_tcp_for_perimeter_rules() {
        assert_eq!(LoadBalancerProtocol::TcpProxy.ip_protocol(), "tcp");
        assert_eq!(LoadBalancerProtocol::TcpProxy.cs_protocol(), "tcp-proxy");
    }

    #[test]
    fn cs_names_round_trip_only_in_lowercase() {
        assert_eq!(
            LoadBalancerProtocol::from_cs_name("tcp"),
            LoadBalancerProtocol::Tcp
        );
        assert_eq!(
            LoadBalancerProtocol::from_cs_name("udp"),
            LoadBalancerProtocol::Udp
        );
        assert_eq!(
            LoadBalancerProtocol::from_cs_name("tcp-proxy"),
            LoadBalancerProtocol::TcpProxy
        );
        // CloudStack never returns uppercase names; reject them.
        assert_eq!(
            LoadBalancerProtocol::from_cs_name("TCP"),
            LoadBalancerProtocol::Invalid
        );
        assert_eq!(
            LoadBalancerProtocol::from_cs_name(""),
            LoadBalancerProtocol::Invalid
        );
    }
}
