//! The convergence engine for raw Deployments.
//!
//! Each desired Deployment is either created, left alone, or brought in line with a strategic
//! merge patch. Desired objects are first run through a dry-run update so that server defaults
//! do not show up as differences.
//!
//! Replica counts belong to the autoscaler unless the autoscaler class is `external`, so in all
//! other cases they are neither compared nor patched. Patches replace `spec` & the labels and
//! annotations outright, so whatever the desired object drops is removed from the cluster too.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;
use serde_json::{json, Value};

use kserve_graph_core::configmap::OauthConfig;
use kserve_graph_core::constants::{
    raw_service_label, raw_worker_service_label, APP_LABEL, AUTOSCALER_CLASS_ANNOTATION, ENABLE_AUTH_ANNOTATION, INFERENCE_SERVICE_CONTAINER_NAME,
    WORKER_CONTAINER_NAME,
};
use kserve_graph_core::crd::{AutoscalerClass, ComponentExtensionSpec, ResourceType};
use kserve_graph_core::diff::diff;
use kserve_graph_core::patch::{PathSegment, StrategicPatch};
use kserve_graph_core::{GraphError, GraphResult};

use crate::k8s::ClusterApi;
use crate::raw::defaults::{is_rolling_update, set_default_deployment_spec, set_default_pod_spec};
use crate::raw::multinode::{self, ReplicaFallback};
use crate::raw::oauth::{add_oauth_container, mount_serving_secret_volume, remove_cookie_secret_arg};

const WORKER_MAX_UNAVAILABLE: &str = "0%";
const WORKER_MAX_SURGE: &str = "100%";
const REPLICAS_FIELD: &str = "replicas";
/// Annotations the deployment controller & kubectl write onto Deployments.
const SERVER_ANNOTATION_PREFIXES: &[&str] = &["deployment.kubernetes.io/", "kubectl.kubernetes.io/"];

/// Everything needed to build the Deployments of one component.
#[derive(Clone, Debug)]
pub struct ComponentSpec {
    pub resource_type: ResourceType,
    /// Metadata of the head Deployment, owner references included.
    pub meta: ObjectMeta,
    pub extension: ComponentExtensionSpec,
    pub pod_spec: PodSpec,
    /// The worker half of a multi-node component.
    pub worker: Option<WorkerComponent>,
    /// Whether the serving certificate is mounted into graph routers.
    pub serving_cert: bool,
}

/// The worker half of a multi-node component.
#[derive(Clone, Debug)]
pub struct WorkerComponent {
    pub meta: ObjectMeta,
    pub pod_spec: PodSpec,
}

impl ComponentSpec {
    /// Whether auth has been requested for this component.
    pub fn auth_enabled(&self) -> bool {
        meta_annotation(&self.meta, ENABLE_AUTH_ANNOTATION)
            .map(|val| val.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// Whether the head Deployment gets the oauth proxy sidecar. Graph routers verify auth themselves.
    pub fn needs_oauth_proxy(&self) -> bool {
        self.auth_enabled() && self.resource_type != ResourceType::InferenceGraph
    }

    fn mounts_serving_cert(&self) -> bool {
        match self.resource_type {
            ResourceType::InferenceGraph => self.serving_cert,
            ResourceType::InferenceService => self.auth_enabled(),
        }
    }
}

/// The outcome of comparing a desired Deployment with the cluster.
enum CheckResult {
    /// The Deployment does not exist.
    Create,
    /// The Deployment exists & matches.
    Existed(Deployment),
    /// The Deployment exists & differs from the server-defaulted desired object.
    Update { live: Deployment, desired: Deployment },
}

/// Reconciles the head & worker Deployments of a component.
#[derive(Clone, Debug)]
pub struct DeploymentReconciler {
    deployments: Vec<Deployment>,
}

impl DeploymentReconciler {
    /// Create a new instance.
    ///
    /// The oauth config is required when the component needs the proxy sidecar.
    pub fn new(component: &ComponentSpec, oauth: Option<&OauthConfig>) -> GraphResult<Self> {
        Ok(Self {
            deployments: build_deployments(component, oauth)?,
        })
    }

    /// Converge every desired Deployment in order, returning the resulting live objects.
    ///
    /// The first failure aborts the pass.
    #[tracing::instrument(level = "debug", skip(self, client))]
    pub async fn reconcile(&self, client: &dyn ClusterApi) -> GraphResult<Vec<Deployment>> {
        let mut live = Vec::with_capacity(self.deployments.len());
        for desired in self.deployments.iter() {
            let name = desired.metadata.name.as_deref().unwrap_or_default();
            let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
            let deployment = match check_deployment(client, desired).await? {
                CheckResult::Create => {
                    tracing::info!(deployment = name, namespace, "creating deployment");
                    client.create_deployment(desired).await?
                }
                CheckResult::Existed(existing) => {
                    tracing::debug!(deployment = name, namespace, "deployment unchanged");
                    existing
                }
                CheckResult::Update { live, desired } => {
                    let patch = build_patch(&live, &desired)?;
                    if patch.is_empty() {
                        tracing::debug!(deployment = name, namespace, "deployment differs only in fields which are never patched");
                        live
                    } else {
                        tracing::info!(deployment = name, namespace, "patching deployment");
                        client.patch_deployment(namespace, name, &patch.into_value()).await?
                    }
                }
            };
            live.push(deployment);
        }
        Ok(live)
    }
}

//////////////////////////////////////////////////////////////////////////////
// Construction //////////////////////////////////////////////////////////////

/// Build the desired Deployments of a component, head first.
pub fn build_deployments(component: &ComponentSpec, oauth: Option<&OauthConfig>) -> GraphResult<Vec<Deployment>> {
    let head_name = component.meta.name.as_deref().unwrap_or_default();
    let mut head = build_head_deployment(&component.meta, &component.extension, component.pod_spec.clone());
    let mut deployments = vec![];
    let mut worker_deployment = None;
    if let Some(worker) = component.worker.as_ref() {
        let workers = multinode::worker_replicas(&component.pod_spec);
        match &workers.fallback {
            Some(ReplicaFallback::Unset) => {
                tracing::warn!(deployment = head_name, "pipeline parallel size not set on {}, using 0 workers", INFERENCE_SERVICE_CONTAINER_NAME)
            }
            Some(ReplicaFallback::Unparseable(val)) => {
                tracing::warn!(deployment = head_name, value = %val, "pipeline parallel size is not an integer, using 0 workers")
            }
            None => (),
        }
        let tensor_parallel_size = multinode::tensor_parallel_size(&component.pod_spec);
        multinode::add_gpu_resource(&mut head, INFERENCE_SERVICE_CONTAINER_NAME, &tensor_parallel_size)?;
        let mut deployment = build_worker_deployment(&worker.meta, &component.extension, worker.pod_spec.clone(), head_name, workers.replicas);
        multinode::add_gpu_resource(&mut deployment, WORKER_CONTAINER_NAME, &tensor_parallel_size)?;
        worker_deployment = Some(deployment);
    }

    // Only the head Deployment is fronted by the proxy & serves the certificate.
    if component.needs_oauth_proxy() {
        let oauth = oauth.ok_or_else(|| GraphError::Configuration("oauth proxy config is required when auth is enabled".into()))?;
        add_oauth_container(&mut head, &component.meta, &component.extension, oauth)?;
    }
    if component.mounts_serving_cert() {
        mount_serving_secret_volume(&mut head, &component.meta, component.resource_type);
    }
    deployments.push(head);
    deployments.extend(worker_deployment);
    Ok(deployments)
}

fn build_head_deployment(meta: &ObjectMeta, ext: &ComponentExtensionSpec, pod: PodSpec) -> Deployment {
    let app = raw_service_label(meta.name.as_deref().unwrap_or_default());
    let mut deployment = build_deployment(meta, ext, pod, app);
    let external = AutoscalerClass::from_annotation(meta_annotation(meta, AUTOSCALER_CLASS_ANNOTATION)).is_external();
    if let (true, Some(spec)) = (external, deployment.spec.as_mut()) {
        spec.replicas = ext.min_replicas;
    }
    deployment
}

fn build_worker_deployment(meta: &ObjectMeta, ext: &ComponentExtensionSpec, pod: PodSpec, head_name: &str, replicas: i32) -> Deployment {
    let mut deployment = build_deployment(meta, ext, pod, raw_worker_service_label(head_name));
    if let Some(spec) = deployment.spec.as_mut() {
        // Keep the old pods of a multi-node group until the new group is fully up.
        if is_rolling_update(spec) {
            if let Some(strategy) = spec.strategy.as_mut() {
                strategy.rolling_update = Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::String(WORKER_MAX_UNAVAILABLE.into())),
                    max_surge: Some(IntOrString::String(WORKER_MAX_SURGE.into())),
                });
            }
        }
        spec.replicas = Some(replicas);
    }
    deployment
}

fn build_deployment(meta: &ObjectMeta, ext: &ComponentExtensionSpec, mut pod: PodSpec, app: String) -> Deployment {
    let mut meta = meta.clone();
    meta.labels.get_or_insert_with(BTreeMap::new).insert(APP_LABEL.into(), app.clone());
    set_default_pod_spec(&mut pod);
    let mut spec = DeploymentSpec {
        selector: LabelSelector {
            match_labels: Some(btreemap! { APP_LABEL.to_string() => app }),
            match_expressions: None,
        },
        template: PodTemplateSpec {
            metadata: Some(ObjectMeta {
                labels: meta.labels.clone(),
                annotations: meta.annotations.clone(),
                ..Default::default()
            }),
            spec: Some(pod),
        },
        strategy: ext.deployment_strategy.clone(),
        ..Default::default()
    };
    set_default_deployment_spec(&mut spec);
    Deployment {
        metadata: meta,
        spec: Some(spec),
        status: None,
    }
}

//////////////////////////////////////////////////////////////////////////////
// Check & Patch /////////////////////////////////////////////////////////////

/// Compare the live Deployment with the server-defaulted desired one.
///
/// The live autoscaler class annotation decides whether replica counts are compared, while
/// `build_patch` uses the desired annotation to decide whether replicas are patched.
async fn check_deployment(client: &dyn ClusterApi, desired: &Deployment) -> GraphResult<CheckResult> {
    let name = desired.metadata.name.as_deref().unwrap_or_default();
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    let live = match client.get_deployment(namespace, name).await? {
        Some(live) => live,
        None => return Ok(CheckResult::Create),
    };

    let defaulted = client.dry_run_update_deployment(desired).await?;
    let live_spec = serde_json::to_value(&remove_cookie_secret_arg(&live).spec)?;
    let desired_spec = serde_json::to_value(&remove_cookie_secret_arg(&defaulted).spec)?;
    let replicas_owned = AutoscalerClass::from_annotation(meta_annotation(&live.metadata, AUTOSCALER_CLASS_ANNOTATION)).is_external();
    let ignore: &[&str] = if replicas_owned { &[] } else { &[REPLICAS_FIELD] };
    let paths = diff(&live_spec, &desired_spec, ignore);
    if paths.is_empty() {
        return Ok(CheckResult::Existed(live));
    }
    tracing::info!(deployment = name, namespace, diff = ?paths, "deployment updated");
    Ok(CheckResult::Update { live, desired: defaulted })
}

/// Build the patch bringing `live` in line with `desired`.
///
/// Labels, annotations, owner references & `spec` are replaced, so anything the desired object
/// drops is removed from the live one. Annotations maintained by the deployment controller are
/// left alone, and replicas are only patched when the desired autoscaler class is `external`.
pub fn build_patch(live: &Deployment, desired: &Deployment) -> GraphResult<StrategicPatch> {
    let mut live_view = patch_view(live)?;
    remove_replicas(&mut live_view);
    remove_server_annotations(&mut live_view);
    let mut desired_view = patch_view(desired)?;
    if !AutoscalerClass::from_annotation(meta_annotation(&desired.metadata, AUTOSCALER_CLASS_ANNOTATION)).is_external() {
        remove_replicas(&mut desired_view);
    }
    let mut patch = StrategicPatch::replace(&live_view, &desired_view)?;

    let pod_path = [PathSegment::field("spec"), PathSegment::field("template"), PathSegment::field("spec")];
    let (live_pod, desired_pod) = match (pod_spec(live), pod_spec(desired)) {
        (Some(live_pod), Some(desired_pod)) => (live_pod, desired_pod),
        _ => return Ok(patch),
    };
    for container in desired_pod.containers.iter() {
        let live_container = match live_pod.containers.iter().find(|live| live.name == container.name) {
            Some(live_container) => live_container,
            None => continue,
        };
        let mut container_path = pod_path.to_vec();
        container_path.push(PathSegment::item("containers", "name", container.name.as_str()));
        for env in envs_to_remove(container, live_container) {
            patch.remove_list_item(&container_path, "env", "name", env)?;
        }
    }

    let desired_secrets: Vec<&str> = desired_pod
        .image_pull_secrets
        .iter()
        .flatten()
        .filter_map(|secret| secret.name.as_deref())
        .collect();
    let stale_secrets = live_pod
        .image_pull_secrets
        .iter()
        .flatten()
        .filter_map(|secret| secret.name.as_deref())
        .filter(|name| !desired_secrets.contains(name));
    for secret in stale_secrets {
        patch.remove_list_item(&pod_path, "imagePullSecrets", "name", secret)?;
    }
    Ok(patch)
}

/// The names of env vars set on the live container which the desired container drops.
fn envs_to_remove<'a>(desired: &Container, live: &'a Container) -> Vec<&'a str> {
    let desired_env = desired.env.as_deref().unwrap_or_default();
    live.env
        .iter()
        .flatten()
        .map(|env| env.name.as_str())
        .filter(|name| !desired_env.iter().any(|env| env.name == *name))
        .collect()
}

fn patch_view(deployment: &Deployment) -> GraphResult<Value> {
    let meta = &deployment.metadata;
    Ok(json!({
        "metadata": {
            "labels": meta.labels,
            "annotations": meta.annotations,
            "ownerReferences": meta.owner_references,
        },
        "spec": serde_json::to_value(&deployment.spec)?,
    }))
}

fn remove_replicas(view: &mut Value) {
    if let Some(spec) = view.get_mut("spec").and_then(Value::as_object_mut) {
        spec.remove(REPLICAS_FIELD);
    }
}

fn remove_server_annotations(view: &mut Value) {
    if let Some(annotations) = view.pointer_mut("/metadata/annotations").and_then(Value::as_object_mut) {
        annotations.retain(|key, _| !SERVER_ANNOTATION_PREFIXES.iter().any(|prefix| key.starts_with(prefix)));
    }
}

fn pod_spec(deployment: &Deployment) -> Option<&PodSpec> {
    deployment.spec.as_ref().and_then(|spec| spec.template.spec.as_ref())
}

/// The value of the given annotation, if present.
pub fn meta_annotation<'a>(meta: &'a ObjectMeta, key: &str) -> Option<&'a str> {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}
