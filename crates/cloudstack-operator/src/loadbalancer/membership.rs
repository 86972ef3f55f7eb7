//! Backend membership diffing

use std::collections::HashSet;

use cloudstack_client::VirtualMachine;

/// Compute the minimal assign/remove sets for a load balancer rule
///
/// `desired` is the resolved VM ID set for the current nodes; `observed` is
/// what CloudStack reports as currently assigned. Returns
/// `(assign, remove)`, either possibly empty, order unspecified.
pub fn symmetric_difference(
    desired: &[String],
    observed: &[VirtualMachine],
) -> (Vec<String>, Vec<String>) {
    let mut wanted: HashSet<&str> = desired.iter().map(String::as_str).collect();

    let mut remove = Vec::new();
    for instance in observed {
        if !wanted.remove(instance.id.as_str()) {
            remove.push(instance.id.clone());
        }
    }

    let assign = wanted.into_iter().map(String::from).collect();
    (assign, remove)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(id: &str) -> VirtualMachine {
        VirtualMachine {
            id: id.to_string(),
            name: id.to_string(),
            ..Default::default()
        }
    }

    fn sorted(mut v: Vec<String>) -> Vec<String> {
        v.sort();
        v
    }

    #[test]
    fn disjoint_sets_swap_entirely() {
        let desired = vec!["vm4".to_string()];
        let observed = vec![vm("vm1")];
        let (assign, remove) = symmetric_difference(&desired, &observed);
        assert_eq!(assign, vec!["vm4"]);
        assert_eq!(remove, vec!["vm1"]);
    }

    #[test]
    fn node_replacement_touches_only_the_difference() {
        let desired = vec!["vm2".to_string(), "vm3".to_string(), "vm4".to_string()];
        let observed = vec![vm("vm1"), vm("vm2"), vm("vm3")];
        let (assign, remove) = symmetric_difference(&desired, &observed);
        assert_eq!(sorted(assign), vec!["vm4"]);
        assert_eq!(sorted(remove), vec!["vm1"]);
    }

    #[test]
    fn identical_sets_need_nothing() {
        let desired = vec!["vm1".to_string(), "vm2".to_string()];
        let observed = vec![vm("vm2"), vm("vm1")];
        let (assign, remove) = symmetric_difference(&desired, &observed);
        assert!(assign.is_empty());
        assert!(remove.is_empty());
    }

    #[test]
    fn empty_observed_assigns_everything() {
        let desired = vec!["vm1".to_string(), "vm2".to_string()];
        let (assign, remove) = symmetric_difference(&desired, &[]);
        assert_eq!(sorted(assign), vec!["vm1", "vm2"]);
        assert!(remove.is_empty());
    }

    #[test]
    fn empty_desired_removes_everything() {
        let (assign, remove) = symmetric_difference(&[], &[vm("vm1"), vm("vm2")]);
        assert!(assign.is_empty());
        assert_eq!(sorted(remove), vec!["vm1", "vm2"]);
    }
}
