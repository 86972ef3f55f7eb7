//! Per-rule reconciliation planning
//!
//! For every desired port the engine decides between leaving the observed
//! rule alone, patching it in place, or tearing it down and recreating it.
//! Public IP and both ports are immutable on a CloudStack rule, so changes
//! to those always force recreation. The CIDR list became mutable in 4.22;
//! on older servers a CIDR change also forces recreation.

use cloudstack_client::{LoadBalancerRule, UpdateLoadBalancerRuleParams};
use cloudstack_common::cidr::{cidr_lists_equal, split_cidr_list};
use cloudstack_common::LoadBalancerProtocol;

/// The desired shape of one rule, fully resolved
#[derive(Debug, Clone)]
pub struct DesiredRule {
    /// Canonical rule name
    pub name: String,
    /// Balancing algorithm
    pub algorithm: String,
    /// Load balancer protocol
    pub protocol: LoadBalancerProtocol,
    /// Public IP address the rule must listen on
    pub public_ip: String,
    /// ID of that public IP
    pub public_ip_id: String,
    /// Network the rule lives on
    pub network_id: String,
    /// Frontend port
    pub public_port: i32,
    /// Backend (node) port
    pub private_port: i32,
    /// Allowed source CIDRs, already normalized to be non-empty
    pub cidr_list: Vec<String>,
}

/// What to do about one desired rule
#[derive(Debug, Clone, PartialEq)]
pub enum RuleAction {
    /// No observed rule; create it
    Create,
    /// Observed rule matches; leave it alone
    Keep,
    /// Patch the listed fields on the existing rule
    UpdateInPlace(UpdateLoadBalancerRuleParams),
    /// An immutable field changed; delete and recreate
    Recreate,
}

/// Decide how to reconcile one desired rule against what CloudStack has
pub fn plan_rule(
    observed: Option<&LoadBalancerRule>,
    desired: &DesiredRule,
    cidr_update_supported: bool,
) -> RuleAction {
    let Some(rule) = observed else {
        return RuleAction::Create;
    };

    if rule.public_ip != desired.public_ip
        || rule.public_port != desired.public_port.to_string()
        || rule.private_port != desired.private_port.to_string()
    {
        return RuleAction::Recreate;
    }

    let mut update = UpdateLoadBalancerRuleParams::default();
    if rule.algorithm != desired.algorithm {
        update.algorithm = Some(desired.algorithm.clone());
    }
    if rule.protocol != desired.protocol.cs_protocol() {
        update.protocol = Some(desired.protocol.cs_protocol().to_string());
    }

    let cidr_drifted = !cidr_lists_equal(&split_cidr_list(&rule.cidr_list), &desired.cidr_list);
    if cidr_drifted {
        if cidr_update_supported {
            update.cidr_list = Some(desired.cidr_list.clone());
        } else if update.is_empty() {
            // Nothing else to patch and the server cannot mutate CIDRs on
            // an existing rule.
            return RuleAction::Recreate;
        }
    }

    if update.is_empty() {
        RuleAction::Keep
    } else {
        RuleAction::UpdateInPlace(update)
    }
}
