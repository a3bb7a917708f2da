//! Reconciliation of InferenceGraphs in raw deployment mode.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

use kserve_graph_core::constants::INFERENCE_GRAPH_LABEL;
use kserve_graph_core::crd::{
    ComponentExtensionSpec, Condition, DeploymentMode, InferenceGraph, InferenceGraphStatus, RequiredMetadata, ResourceType, CONDITION_READY,
};
use kserve_graph_core::GraphResult;

use crate::config::Config;
use crate::k8s::ClusterApi;
use crate::raw::auth::{reconcile_auth_resources, remove_auth_resources};
use crate::raw::podspec::create_graph_pod_spec;
use crate::raw::status::{propagate_raw_status, set_condition_now};
use crate::raw::{load_router_config, ComponentSpec, RawReconciler};

/// The condition type reporting whether a graph's workload is stopped.
pub const CONDITION_STOPPED: &str = "Stopped";
pub const REASON_STOPPED: &str = "Stopped";
pub const REASON_SERVERLESS_REJECTED: &str = "ServerlessModeRejected";

/// Build the component metadata & scaling spec of a graph's router.
///
/// The graph's labels & annotations carry over, along with a label naming the graph.
pub fn construct_for_raw_deployment(graph: &InferenceGraph) -> (ObjectMeta, ComponentExtensionSpec) {
    let meta = graph.meta();
    let mut labels = meta.labels.clone().unwrap_or_else(BTreeMap::new);
    labels.insert(INFERENCE_GRAPH_LABEL.into(), graph.name().into());
    let object_meta = ObjectMeta {
        name: Some(graph.name().into()),
        namespace: Some(graph.namespace().into()),
        labels: Some(labels),
        annotations: Some(meta.annotations.clone().unwrap_or_else(BTreeMap::new)),
        ..Default::default()
    };
    let ext = ComponentExtensionSpec {
        min_replicas: graph.spec.min_replicas,
        max_replicas: graph.spec.max_replicas,
        scale_metric: graph.spec.scale_metric,
        scale_target: graph.spec.scale_target,
        ..Default::default()
    };
    (object_meta, ext)
}

/// Build the router component of a graph.
pub fn graph_component(graph: &InferenceGraph, config: &Config, pod_spec: PodSpec) -> ComponentSpec {
    let (mut meta, extension) = construct_for_raw_deployment(graph);
    meta.owner_references = graph.owner_reference().map(|owner| vec![owner]);
    ComponentSpec {
        resource_type: ResourceType::InferenceGraph,
        meta,
        extension,
        pod_spec,
        worker: None,
        serving_cert: config.router_tls,
    }
}

/// Reconcile a graph & publish its status.
///
/// The status subresource is only written when the status changed. The new status is returned.
#[tracing::instrument(level = "debug", skip(client, config, graph), fields(graph = graph.name(), namespace = graph.namespace()))]
pub async fn reconcile_graph(client: &dyn ClusterApi, config: &Config, graph: &InferenceGraph) -> GraphResult<InferenceGraphStatus> {
    let mut status = graph.status.clone().unwrap_or_default();
    match graph.deployment_mode(config.default_deployment_mode) {
        DeploymentMode::Serverless => {
            tracing::info!("graph requests serverless mode, which is served elsewhere");
            set_condition_now(
                &mut status,
                Condition {
                    type_: CONDITION_READY.into(),
                    status: "False".into(),
                    reason: Some(REASON_SERVERLESS_REJECTED.into()),
                    message: Some(format!("{} mode is not reconciled by this controller", DeploymentMode::Serverless)),
                    ..Default::default()
                },
            );
        }
        DeploymentMode::RawDeployment if graph.stopped() => {
            tracing::info!("graph is stopped, removing its workload");
            client.delete_deployment(graph.namespace(), graph.name()).await?;
            client.delete_service(graph.namespace(), graph.name()).await?;
            client.delete_hpa(graph.namespace(), graph.name()).await?;
            set_stopped(&mut status, true);
            set_condition_now(
                &mut status,
                Condition {
                    type_: CONDITION_READY.into(),
                    status: "False".into(),
                    reason: Some(REASON_STOPPED.into()),
                    message: Some("the graph has been stopped".into()),
                    ..Default::default()
                },
            );
        }
        DeploymentMode::RawDeployment => {
            let router_config = load_router_config(client, config).await?;
            reconcile_auth_resources(
                client,
                graph.namespace(),
                graph.name(),
                graph.auth_enabled(),
                graph.owner_reference(),
            )
            .await?;
            let pod_spec = create_graph_pod_spec(graph, &router_config, config.router_tls)?;
            let component = graph_component(graph, config, pod_spec);
            let reconciler = RawReconciler::new(client, config, &component).await?;
            let deployments = reconciler.reconcile(client).await?;
            set_stopped(&mut status, false);
            // Graphs only ever have a head Deployment.
            if let Some(head) = deployments.first() {
                propagate_raw_status(&mut status, head, reconciler.url(), config.status_propagation);
            }
        }
    }

    if graph.status.as_ref() != Some(&status) {
        tracing::info!("updating graph status");
        client.patch_graph_status(graph.namespace(), graph.name(), &status).await?;
    }
    Ok(status)
}

/// Clean up the cluster-scoped & unowned resources of a deleted graph.
///
/// Deployments & Services are garbage collected through their owner references.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn cleanup_graph(client: &dyn ClusterApi, namespace: &str, name: &str) -> GraphResult<()> {
    remove_auth_resources(client, namespace, name).await
}

fn set_stopped(status: &mut InferenceGraphStatus, stopped: bool) {
    set_condition_now(
        status,
        Condition {
            type_: CONDITION_STOPPED.into(),
            status: if stopped { "True" } else { "False" }.into(),
            ..Default::default()
        },
    );
}
