//! The cluster API seam used by the reconcilers.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2beta2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::client::Client;
use serde::de::DeserializeOwned;
use serde_json::json;

use kserve_graph_core::constants::CONTROLLER_NAME;
use kserve_graph_core::crd::{InferenceGraph, InferenceGraphStatus};
use kserve_graph_core::{GraphError, GraphResult};

/// Cluster operations needed to reconcile graphs.
///
/// A missing object is reported as `Ok(None)` by getters and tolerated by deletes.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn get_deployment(&self, namespace: &str, name: &str) -> GraphResult<Option<Deployment>>;
    async fn create_deployment(&self, deployment: &Deployment) -> GraphResult<Deployment>;
    /// Submit the given Deployment as an update without persisting it, returning the object as
    /// defaulted by the server.
    async fn dry_run_update_deployment(&self, deployment: &Deployment) -> GraphResult<Deployment>;
    /// Apply a strategic merge patch to the named Deployment.
    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> GraphResult<Deployment>;
    async fn delete_deployment(&self, namespace: &str, name: &str) -> GraphResult<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> GraphResult<Option<Service>>;
    async fn create_service(&self, service: &Service) -> GraphResult<Service>;
    /// Apply a strategic merge patch to the named Service.
    async fn patch_service(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> GraphResult<Service>;
    async fn delete_service(&self, namespace: &str, name: &str) -> GraphResult<()>;

    async fn get_hpa(&self, namespace: &str, name: &str) -> GraphResult<Option<HorizontalPodAutoscaler>>;
    async fn create_hpa(&self, hpa: &HorizontalPodAutoscaler) -> GraphResult<HorizontalPodAutoscaler>;
    /// Apply a strategic merge patch to the named HorizontalPodAutoscaler.
    async fn patch_hpa(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> GraphResult<HorizontalPodAutoscaler>;
    async fn delete_hpa(&self, namespace: &str, name: &str) -> GraphResult<()>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> GraphResult<Option<ConfigMap>>;

    /// Server-side apply the given ServiceAccount.
    async fn apply_service_account(&self, account: &ServiceAccount) -> GraphResult<()>;
    async fn delete_service_account(&self, namespace: &str, name: &str) -> GraphResult<()>;

    async fn get_cluster_role_binding(&self, name: &str) -> GraphResult<Option<ClusterRoleBinding>>;
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> GraphResult<()>;
    async fn replace_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> GraphResult<()>;

    /// Merge the given status into the status subresource of the named graph.
    async fn patch_graph_status(&self, namespace: &str, name: &str, status: &InferenceGraphStatus) -> GraphResult<()>;
}

/// The `ClusterApi` backed by a live K8s cluster.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn post_params() -> PostParams {
        PostParams {
            dry_run: false,
            field_manager: Some(CONTROLLER_NAME.into()),
        }
    }

    fn patch_params() -> PatchParams {
        PatchParams {
            field_manager: Some(CONTROLLER_NAME.into()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> GraphResult<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name, "fetching deployment").await
    }

    #[tracing::instrument(level = "debug", skip(self, deployment))]
    async fn create_deployment(&self, deployment: &Deployment) -> GraphResult<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), deployment.metadata.namespace.as_deref().unwrap_or_default());
        api.create(&Self::post_params(), deployment)
            .await
            .map_err(GraphError::cluster_api("creating deployment"))
    }

    #[tracing::instrument(level = "debug", skip(self, deployment))]
    async fn dry_run_update_deployment(&self, deployment: &Deployment) -> GraphResult<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), deployment.metadata.namespace.as_deref().unwrap_or_default());
        let params = PostParams {
            dry_run: true,
            ..Self::post_params()
        };
        let name = deployment.metadata.name.as_deref().unwrap_or_default();
        api.replace(name, &params, deployment)
            .await
            .map_err(GraphError::cluster_api("performing dry-run update of deployment"))
    }

    #[tracing::instrument(level = "debug", skip(self, patch))]
    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> GraphResult<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &Self::patch_params(), &Patch::Strategic(patch))
            .await
            .map_err(GraphError::cluster_api("patching deployment"))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_deployment(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        delete_opt(&api, name, "deleting deployment").await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_service(&self, namespace: &str, name: &str) -> GraphResult<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name, "fetching service").await
    }

    #[tracing::instrument(level = "debug", skip(self, service))]
    async fn create_service(&self, service: &Service) -> GraphResult<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), service.metadata.namespace.as_deref().unwrap_or_default());
        api.create(&Self::post_params(), service)
            .await
            .map_err(GraphError::cluster_api("creating service"))
    }

    #[tracing::instrument(level = "debug", skip(self, patch))]
    async fn patch_service(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> GraphResult<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &Self::patch_params(), &Patch::Strategic(patch))
            .await
            .map_err(GraphError::cluster_api("patching service"))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_service(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        delete_opt(&api, name, "deleting service").await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_hpa(&self, namespace: &str, name: &str) -> GraphResult<Option<HorizontalPodAutoscaler>> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name, "fetching hpa").await
    }

    #[tracing::instrument(level = "debug", skip(self, hpa))]
    async fn create_hpa(&self, hpa: &HorizontalPodAutoscaler) -> GraphResult<HorizontalPodAutoscaler> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), hpa.metadata.namespace.as_deref().unwrap_or_default());
        api.create(&Self::post_params(), hpa)
            .await
            .map_err(GraphError::cluster_api("creating hpa"))
    }

    #[tracing::instrument(level = "debug", skip(self, patch))]
    async fn patch_hpa(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> GraphResult<HorizontalPodAutoscaler> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        api.patch(name, &Self::patch_params(), &Patch::Strategic(patch))
            .await
            .map_err(GraphError::cluster_api("patching hpa"))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_hpa(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let api: Api<HorizontalPodAutoscaler> = Api::namespaced(self.client.clone(), namespace);
        delete_opt(&api, name, "deleting hpa").await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_config_map(&self, namespace: &str, name: &str) -> GraphResult<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        get_opt(&api, name, "fetching config map").await
    }

    #[tracing::instrument(level = "debug", skip(self, account))]
    async fn apply_service_account(&self, account: &ServiceAccount) -> GraphResult<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), account.metadata.namespace.as_deref().unwrap_or_default());
        let mut params = PatchParams::apply(CONTROLLER_NAME);
        params.force = true;
        let name = account.metadata.name.as_deref().unwrap_or_default();
        api.patch(name, &params, &Patch::Apply(account))
            .await
            .map(|_| ())
            .map_err(GraphError::cluster_api("applying service account"))
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_service_account(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        delete_opt(&api, name, "deleting service account").await
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_cluster_role_binding(&self, name: &str) -> GraphResult<Option<ClusterRoleBinding>> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        get_opt(&api, name, "fetching cluster role binding").await
    }

    #[tracing::instrument(level = "debug", skip(self, binding))]
    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> GraphResult<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        api.create(&Self::post_params(), binding)
            .await
            .map(|_| ())
            .map_err(GraphError::cluster_api("creating cluster role binding"))
    }

    #[tracing::instrument(level = "debug", skip(self, binding))]
    async fn replace_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> GraphResult<()> {
        let api: Api<ClusterRoleBinding> = Api::all(self.client.clone());
        let name = binding.metadata.name.as_deref().unwrap_or_default();
        api.replace(name, &Self::post_params(), binding)
            .await
            .map(|_| ())
            .map_err(GraphError::cluster_api("updating cluster role binding"))
    }

    #[tracing::instrument(level = "debug", skip(self, status))]
    async fn patch_graph_status(&self, namespace: &str, name: &str, status: &InferenceGraphStatus) -> GraphResult<()> {
        let api: Api<InferenceGraph> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &Self::patch_params(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(GraphError::cluster_api("updating inference graph status"))
    }
}

/// Check if the given error is a 404 from the K8s API.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == http::StatusCode::NOT_FOUND)
}

async fn get_opt<K>(api: &Api<K>, name: &str, action: &str) -> GraphResult<Option<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(err) if is_not_found(&err) => Ok(None),
        Err(err) => Err(GraphError::cluster_api(action)(err)),
    }
}

async fn delete_opt<K>(api: &Api<K>, name: &str, action: &str) -> GraphResult<()>
where
    K: Clone + DeserializeOwned + Debug,
{
    tracing::info!(name, "{}", action);
    match api.delete(name, &Default::default()).await {
        Ok(_val) => Ok(()),
        Err(err) if is_not_found(&err) => Ok(()),
        Err(err) => Err(GraphError::cluster_api(action)(err)),
    }
}
