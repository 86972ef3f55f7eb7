//! Cloud provider configuration
//!
//! Loaded from a YAML file handed to the binary with `--config`. Keys match
//! the documented option names of the CloudStack provider.

use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

/// Connection and scoping options for the CloudStack management server
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CloudConfig {
    /// Base URL of the CloudStack API endpoint
    pub api_url: String,
    /// API key of the controller's account
    pub api_key: String,
    /// Secret key used to sign requests
    pub secret_key: String,
    /// Skip TLS certificate verification
    #[serde(default)]
    pub ssl_no_verify: bool,
    /// Scope every operation to this project
    #[serde(default)]
    pub project_id: Option<String>,
    /// Default zone for resources that need one
    #[serde(default)]
    pub zone: Option<String>,
}

impl CloudConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::config(format!(
                "could not read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: CloudConfig = serde_yaml::from_str(&raw)
            .map_err(|e| Error::config(format!("could not parse cloud provider config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the fields required to reach the API are present
    pub fn validate(&self) -> Result<()> {
        if self.api_url.is_empty() {
            return Err(Error::config("api-url is required"));
        }
        if self.api_key.is_empty() || self.secret_key.is_empty() {
            return Err(Error::config("api-key and secret-key are required"));
        }
        Ok(())
    }

    /// The configured project ID, if any, as a borrowed option
    pub fn project(&self) -> Option<&str> {
        self.project_id.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_keys() {
        let config: CloudConfig = serde_yaml::from_str(
            r#"
api-url: https://cloud.example.com/client/api
api-key: AKIAFOO
secret-key: s3cr3t
ssl-no-verify: true
project-id: proj-1
zone: ch-gva-2
"#,
        )
        .unwrap();

        assert_eq!(config.api_url, "https://cloud.example.com/client/api");
        assert!(config.ssl_no_verify);
        assert_eq!(config.project(), Some("proj-1"));
        assert_eq!(config.zone.as_deref(), Some("ch-gva-2"));
        config.validate().unwrap();
    }

    #[test]
    fn optional_keys_default() {
        let config: CloudConfig = serde_yaml::from_str(
            r#"
api-url: https://cloud.example.com/client/api
api-key: AKIAFOO
secret-key: s3cr3t
"#,
        )
        .unwrap();

        assert!(!config.ssl_no_verify);
        assert_eq!(config.project(), None);
        assert_eq!(config.zone, None);
    }

    #[test]
    fn missing_credentials_fail_validation() {
        let config: CloudConfig = serde_yaml::from_str(
            r#"
api-url: https://cloud.example.com/client/api
api-key: ""
secret-key: ""
"#,
        )
        .unwrap();

        assert!(config.validate().is_err());
    }
}
