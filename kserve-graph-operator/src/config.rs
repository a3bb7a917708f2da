//! Runtime configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

use kserve_graph_core::crd::DeploymentMode;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    pub rust_log: String,
    /// The port used for healthchecks & metrics.
    #[serde(default = "Config::default_http_port")]
    pub http_port: u16,

    /// The namespace holding the KServe ConfigMap.
    #[serde(default = "Config::default_kserve_namespace")]
    pub kserve_namespace: String,
    /// The name of the KServe ConfigMap.
    #[serde(default = "Config::default_config_map_name")]
    pub config_map_name: String,
    /// The namespace to watch, all namespaces when not set.
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// The deployment mode of graphs which do not request one.
    #[serde(default = "Config::default_deployment_mode")]
    pub default_deployment_mode: DeploymentMode,
    /// Whether graph routers serve TLS.
    #[serde(default = "Config::default_router_tls")]
    pub router_tls: bool,
    /// How the Available condition of a Deployment maps onto the Ready condition of a graph.
    #[serde(default)]
    pub status_propagation: StatusPropagation,
}

/// How the Available condition of a Deployment is propagated.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StatusPropagation {
    /// Any Available condition marks the owner Ready.
    Presence,
    /// The owner's Ready status mirrors the status of the Available condition.
    Status,
}

impl Default for StatusPropagation {
    fn default() -> Self {
        Self::Presence
    }
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    fn default_http_port() -> u16 {
        8081
    }

    fn default_kserve_namespace() -> String {
        "kserve".into()
    }

    fn default_config_map_name() -> String {
        "inferenceservice-config".into()
    }

    fn default_deployment_mode() -> DeploymentMode {
        DeploymentMode::RawDeployment
    }

    fn default_router_tls() -> bool {
        true
    }

    /// Create a config for use in tests.
    #[cfg(test)]
    pub fn new_test() -> Self {
        Self {
            rust_log: "".into(),
            http_port: Self::default_http_port(),
            kserve_namespace: Self::default_kserve_namespace(),
            config_map_name: Self::default_config_map_name(),
            watch_namespace: None,
            default_deployment_mode: Self::default_deployment_mode(),
            router_tls: Self::default_router_tls(),
            status_propagation: StatusPropagation::Presence,
        }
    }
}
