//! Configuration sourced from the KServe ConfigMap.
//!
//! Each config lives as a JSON document under its own key of the ConfigMap.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{OAUTH_PROXY_CONFIG_KEY, ROUTER_CONFIG_KEY};
use crate::error::{GraphError, GraphResult};
use crate::quantity;

/// The key of the router headers config listing headers to propagate.
pub const PROPAGATE_HEADERS_KEY: &str = "propagate";

/// Config of the graph router.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    pub image: String,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub memory_request: String,
    #[serde(default)]
    pub memory_limit: String,
    /// Header lists keyed by purpose, e.g. `propagate`.
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
}

/// Config of the oauth proxy sidecar.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OauthConfig {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub cpu_request: String,
    #[serde(default)]
    pub cpu_limit: String,
    #[serde(default)]
    pub memory_request: String,
    #[serde(default)]
    pub memory_limit: String,
}

impl RouterConfig {
    /// Load the router config from the given ConfigMap.
    pub fn from_config_map(cm: &ConfigMap) -> GraphResult<Self> {
        let config: Self = decode_key(cm, ROUTER_CONFIG_KEY)?;
        if config.image.trim().is_empty() {
            return Err(GraphError::Configuration("router config has no image".into()));
        }
        Ok(config)
    }

    /// The headers the router should propagate, if configured.
    pub fn propagate_headers(&self) -> Option<&[String]> {
        self.headers.get(PROPAGATE_HEADERS_KEY).map(Vec::as_slice)
    }

    /// The default resource requirements of router containers.
    pub fn resources(&self) -> GraphResult<ResourceRequirements> {
        build_resources(&self.cpu_request, &self.cpu_limit, &self.memory_request, &self.memory_limit, ROUTER_CONFIG_KEY)
    }
}

impl OauthConfig {
    /// Load the oauth proxy config from the given ConfigMap.
    ///
    /// Every field is required.
    pub fn from_config_map(cm: &ConfigMap) -> GraphResult<Self> {
        let config: Self = decode_key(cm, OAUTH_PROXY_CONFIG_KEY)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that no field is blank.
    pub fn validate(&self) -> GraphResult<()> {
        let fields = [
            ("image", &self.image),
            ("cpuRequest", &self.cpu_request),
            ("cpuLimit", &self.cpu_limit),
            ("memoryRequest", &self.memory_request),
            ("memoryLimit", &self.memory_limit),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, val)| val.trim().is_empty()) {
            return Err(GraphError::Configuration(format!("oauth proxy config field {} is empty", name)));
        }
        Ok(())
    }

    /// The resource requirements of the oauth proxy container.
    pub fn resources(&self) -> GraphResult<ResourceRequirements> {
        build_resources(&self.cpu_request, &self.cpu_limit, &self.memory_request, &self.memory_limit, OAUTH_PROXY_CONFIG_KEY)
    }
}

fn decode_key<T: DeserializeOwned>(cm: &ConfigMap, key: &str) -> GraphResult<T> {
    let raw = cm
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|val| val.trim())
        .filter(|val| !val.is_empty())
        .ok_or_else(|| GraphError::Configuration(format!("config key {} not found in ConfigMap", key)))?;
    serde_json::from_str(raw).map_err(|err| GraphError::Configuration(format!("error decoding config key {}: {}", key, err)))
}

/// Build requests & limits for cpu & memory, skipping blank values.
fn build_resources(cpu_request: &str, cpu_limit: &str, memory_request: &str, memory_limit: &str, key: &str) -> GraphResult<ResourceRequirements> {
    let parse = |val: &str| -> GraphResult<Option<Quantity>> {
        if val.trim().is_empty() {
            return Ok(None);
        }
        quantity::validate(val)
            .map(Some)
            .map_err(|err| GraphError::Configuration(format!("invalid quantity in config key {}: {}", key, err)))
    };
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(q) = parse(cpu_request)? {
        requests.insert("cpu".to_string(), q);
    }
    if let Some(q) = parse(memory_request)? {
        requests.insert("memory".to_string(), q);
    }
    if let Some(q) = parse(cpu_limit)? {
        limits.insert("cpu".to_string(), q);
    }
    if let Some(q) = parse(memory_limit)? {
        limits.insert("memory".to_string(), q);
    }
    Ok(ResourceRequirements {
        requests: Some(requests).filter(|r| !r.is_empty()),
        limits: Some(limits).filter(|l| !l.is_empty()),
    })
}
