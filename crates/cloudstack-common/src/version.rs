//! Management-server version capability
//!
//! The one version-dependent behavior in this controller is whether a load
//! balancer rule's CIDR list can be updated in place. The threshold lives
//! here so the check never spreads through the reconciler.

use semver::Version;

use crate::{Error, Result};

/// First CloudStack release able to update the CIDR list on an existing
/// load balancer rule
pub fn min_cidr_update_version() -> Version {
    Version::new(4, 22, 0)
}

/// Whether the given management server can mutate CIDRs in place
pub fn supports_cidr_update(version: &Version) -> bool {
    *version >= min_cidr_update_version()
}

/// Parse a CloudStack version string leniently
///
/// Management servers report four-component versions with qualifiers
/// (`"4.22.0.0-SNAPSHOT"`); only the first three dotted components matter.
pub fn parse_cloudstack_version(raw: &str) -> Result<Version> {
    let stripped = raw.split('-').next().unwrap_or(raw);
    let components: Vec<u64> = stripped
        .split('.')
        .take(3)
        .map(|p| p.parse::<u64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| {
            Error::cloudstack(
                "listManagementServersMetrics",
                format!("unparseable version {raw:?}"),
            )
        })?;

    if components.len() < 3 {
        return Err(Error::cloudstack(
            "listManagementServersMetrics",
            format!("unparseable version {raw:?}"),
        ));
    }

    Ok(Version::new(components[0], components[1], components[2]))
}
