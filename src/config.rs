use serde_json::{Map, Value};

use crate::error::ProvisionError;

pub const SBG_ENDPOINTS: &[(&str, &str)] = &[
    ("cavatica", "https://cavatica-api.sbgenomics.com/v2"),
    ("cgc", "https://cavatica-api.sbgenomics.com/v2"),
    ("sevenbridges", "https://api.sbgenomics.com/v2"),
];

pub const TOWER_ENDPOINTS: &[(&str, &str)] = &[
    ("tower.nf", "https://tower.nf/api"),
    ("sage", "https://tower.sagebionetworks.org/api"),
    ("sage-dev", "https://tower-dev.sagebionetworks.org/api"),
];

pub const SYNAPSE_ENDPOINT: &str = "https://repo-prod.prod.sagebase.org/repo/v1";

#[derive(Debug, Clone)]
pub struct ClientArgs {
    pub endpoint: String,
    pub auth_token: String,
    pub extra: Map<String, Value>,
}

impl ClientArgs {
    pub fn new(endpoint: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            auth_token: auth_token.into(),
            extra: Map::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// An explicit endpoint wins over a platform short name; one of the two must
/// resolve to a non-empty endpoint.
pub fn bundle_client_args(
    auth_token: &str,
    platform: Option<&str>,
    endpoint: Option<&str>,
    endpoints: &[(&str, &str)],
) -> Result<ClientArgs, ProvisionError> {
    let resolved = match (endpoint, platform) {
        (Some(url), _) => url.to_string(),
        (None, Some(name)) => endpoints
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, url)| url.to_string())
            .ok_or_else(|| {
                let valid: Vec<&str> = endpoints.iter().map(|(key, _)| *key).collect();
                ProvisionError::Configuration(format!(
                    "unknown platform `{name}`; valid platforms are {valid:?}"
                ))
            })?,
        (None, None) => {
            return Err(ProvisionError::Configuration(
                "either a platform short name or an explicit endpoint is required".to_string(),
            ));
        }
    };
    if auth_token.trim().is_empty() {
        return Err(ProvisionError::Configuration(
            "an authentication token is required".to_string(),
        ));
    }
    Ok(ClientArgs::new(resolved, auth_token))
}
