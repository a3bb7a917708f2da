//! Raw deployment mode.
//!
//! Components are served by plain Deployments & Services rather than Knative. The pipeline for a
//! component runs pod spec synthesis, defaulting, multi-node augmentation & sidecar injection to
//! build the desired Deployments, which are then converged against the cluster along with the
//! Service & HorizontalPodAutoscaler fronting them.

mod auth;
mod defaults;
mod deployment;
mod graph;
#[cfg(test)]
mod graph_test;
mod hpa;
mod multinode;
mod oauth;
mod podspec;
#[cfg(test)]
mod podspec_test;
mod service;
mod status;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;

use kserve_graph_core::configmap::{OauthConfig, RouterConfig};
use kserve_graph_core::crd::ResourceType;
use kserve_graph_core::{GraphError, GraphResult};

use crate::config::Config;
use crate::k8s::ClusterApi;

pub use deployment::{ComponentSpec, DeploymentReconciler};
pub use graph::{cleanup_graph, reconcile_graph};
pub use hpa::HpaReconciler;
pub use service::ServiceReconciler;

/// Reconciles the Deployments & Service of one component.
#[derive(Clone, Debug)]
pub struct RawReconciler {
    deployment: DeploymentReconciler,
    service: ServiceReconciler,
    hpa: HpaReconciler,
    url: String,
}

impl RawReconciler {
    /// Create a new instance, loading the oauth proxy config when the component needs it.
    pub async fn new(client: &dyn ClusterApi, config: &Config, component: &ComponentSpec) -> GraphResult<Self> {
        let oauth = if component.needs_oauth_proxy() {
            Some(load_oauth_config(client, config).await?)
        } else {
            None
        };
        Ok(Self {
            deployment: DeploymentReconciler::new(component, oauth.as_ref())?,
            service: ServiceReconciler::new(component),
            hpa: HpaReconciler::new(component),
            url: component_url(component),
        })
    }

    /// The URL at which the component is reachable within the cluster.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Converge the Deployments, the Service & then the HPA, returning the live Deployments.
    #[tracing::instrument(level = "debug", skip(self, client), fields(url = %self.url))]
    pub async fn reconcile(&self, client: &dyn ClusterApi) -> GraphResult<Vec<Deployment>> {
        let deployments = self.deployment.reconcile(client).await?;
        self.service.reconcile(client).await?;
        self.hpa.reconcile(client).await?;
        Ok(deployments)
    }
}

/// The cluster-local URL of a component.
pub fn component_url(component: &ComponentSpec) -> String {
    let secure = match component.resource_type {
        ResourceType::InferenceGraph => component.serving_cert,
        ResourceType::InferenceService => component.auth_enabled(),
    };
    let scheme = if secure { "https" } else { "http" };
    format!(
        "{}://{}.{}.svc.cluster.local",
        scheme,
        component.meta.name.as_deref().unwrap_or_default(),
        component.meta.namespace.as_deref().unwrap_or_default(),
    )
}

/// Load the router config from the KServe ConfigMap.
pub async fn load_router_config(client: &dyn ClusterApi, config: &Config) -> GraphResult<RouterConfig> {
    RouterConfig::from_config_map(&fetch_config_map(client, config).await?)
}

/// Load the oauth proxy config from the KServe ConfigMap.
pub async fn load_oauth_config(client: &dyn ClusterApi, config: &Config) -> GraphResult<OauthConfig> {
    OauthConfig::from_config_map(&fetch_config_map(client, config).await?)
}

async fn fetch_config_map(client: &dyn ClusterApi, config: &Config) -> GraphResult<ConfigMap> {
    client
        .get_config_map(&config.kserve_namespace, &config.config_map_name)
        .await?
        .ok_or_else(|| GraphError::Configuration(format!("ConfigMap {}/{} not found", config.kserve_namespace, config.config_map_name)))
}
