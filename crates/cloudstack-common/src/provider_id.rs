//! Provider ID encoding
//!
//! Kubernetes identifies a node's cloud instance through an opaque provider
//! ID. Ours encodes the CloudStack VM UUID with an empty region slot:
//! `external-cloudstack:///<uuid>`.

use crate::{Error, Result};

/// The provider name this controller registers under
pub const PROVIDER_NAME: &str = "external-cloudstack";

/// Build the provider ID for a VM UUID
pub fn provider_id_from_instance(instance_id: &str) -> String {
    format!("{}:///{}", PROVIDER_NAME, instance_id)
}

/// Extract `(instance_id, region)` from a provider ID
///
/// Accepts the canonical `external-cloudstack:///<uuid>` form, the reserved
/// regioned form `external-cloudstack://<region>/<uuid>`, and the legacy
/// bare `<uuid>` written by older deployments.
pub fn instance_id_from_provider_id(provider_id: &str) -> Result<(String, String)> {
    // Legacy IDs predate the scheme entirely.
    let qualified = if !provider_id.is_empty() && !provider_id.contains("://") {
        format!("{}://{}", PROVIDER_NAME, provider_id)
    } else {
        provider_id.to_string()
    };

    let rest = qualified
        .strip_prefix(PROVIDER_NAME)
        .and_then(|r| r.strip_prefix("://"))
        .ok_or_else(|| Error::InvalidProviderId {
            provider_id: provider_id.to_string(),
        })?;

    let (region, instance) = match rest.split_once('/') {
        Some((region, instance)) => (region, instance),
        None => ("", rest),
    };

    if instance.is_empty() || instance.contains('/') {
        return Err(Error::InvalidProviderId {
            provider_id: provider_id.to_string(),
        });
    }

    Ok((instance.to_string(), region.to_string()))
}
