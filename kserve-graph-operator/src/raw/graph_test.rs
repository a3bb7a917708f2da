use anyhow::Result;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use kserve_graph_core::constants::{
    DEPLOYMENT_MODE_ANNOTATION, ENABLE_AUTH_ANNOTATION, GRAPH_AUTH_CRB_NAME, INFERENCE_GRAPH_LABEL, OPENSHIFT_SERVING_CERT_ANNOTATION, STOP_ANNOTATION,
    TLS_VOLUME_NAME,
};
use kserve_graph_core::crd::{InferenceGraph, InferenceGraphStatus, CONDITION_READY};
use kserve_graph_core::GraphError;

use crate::config::Config;
use crate::fixtures::{self, FakeCluster, NAMESPACE};
use crate::raw::graph::{construct_for_raw_deployment, CONDITION_STOPPED, REASON_SERVERLESS_REJECTED, REASON_STOPPED};
use crate::raw::{cleanup_graph, reconcile_graph};

fn condition_status(status: &InferenceGraphStatus, type_: &str) -> Option<String> {
    status.condition(type_).map(|cond| cond.status.clone())
}

fn with_status(mut graph: InferenceGraph, status: InferenceGraphStatus) -> InferenceGraph {
    graph.status = Some(status);
    graph
}

#[test]
fn raw_component_carries_graph_metadata() {
    let mut graph = fixtures::annotate(fixtures::graph("dag"), "team", "search");
    graph.metadata.labels = Some(maplit::btreemap! { "tier".to_string() => "gold".to_string() });
    graph.spec.min_replicas = Some(2);
    graph.spec.max_replicas = Some(4);

    let (meta, ext) = construct_for_raw_deployment(&graph);

    assert_eq!(meta.name.as_deref(), Some("dag"));
    assert_eq!(meta.namespace.as_deref(), Some(NAMESPACE));
    let labels = meta.labels.unwrap_or_default();
    assert_eq!(labels.get("tier").map(String::as_str), Some("gold"));
    assert_eq!(labels.get(INFERENCE_GRAPH_LABEL).map(String::as_str), Some("dag"));
    assert_eq!(meta.annotations.unwrap_or_default().get("team").map(String::as_str), Some("search"));
    assert_eq!((ext.min_replicas, ext.max_replicas), (Some(2), Some(4)));
}

#[tokio::test]
async fn graph_reconcile_creates_router_workload() -> Result<()> {
    let cluster = FakeCluster::new();
    let config = Config::new_test();
    let graph = fixtures::graph("dag");

    let status = reconcile_graph(&cluster, &config, &graph).await?;

    let deployment = cluster.deployment(NAMESPACE, "dag").unwrap_or_default();
    let owners = deployment.metadata.owner_references.clone().unwrap_or_default();
    assert!(owners.len() == 1, "expected a single owner got {:?}", owners);
    assert_eq!(owners[0].uid, "uid-graph-dag");
    assert_eq!(owners[0].controller, Some(true));
    assert_eq!(owners[0].block_owner_deletion, Some(true));
    assert_eq!(owners[0].kind, "InferenceGraph");
    assert_eq!(owners[0].api_version, "serving.kserve.io/v1alpha1");
    assert_eq!(owners[0].name, "dag");
    let pod = deployment.spec.and_then(|spec| spec.template.spec).unwrap_or_default();
    assert_eq!(pod.containers[0].name, "dag");
    let volumes: Vec<String> = pod.volumes.iter().flatten().map(|volume| volume.name.clone()).collect();
    assert_eq!(volumes, vec![TLS_VOLUME_NAME.to_string()]);

    let service = cluster.service(NAMESPACE, "dag").unwrap_or_default();
    let annotation = service.metadata.annotations.as_ref().and_then(|ann| ann.get(OPENSHIFT_SERVING_CERT_ANNOTATION)).cloned();
    assert_eq!(annotation.as_deref(), Some("dag-serving-cert"));
    let port = service.spec.and_then(|spec| spec.ports).unwrap_or_default().pop().unwrap_or_default();
    assert_eq!((port.port, port.target_port), (443, Some(IntOrString::Int(8080))));

    assert_eq!(condition_status(&status, CONDITION_STOPPED).as_deref(), Some("False"));
    assert!(status.condition(CONDITION_READY).is_none(), "expected no Ready condition before rollout got {:?}", status);
    let statuses = cluster.with_state(|state| state.statuses.clone());
    assert!(statuses.len() == 1, "expected a single status update got {:?}", statuses);
    Ok(())
}

#[tokio::test]
async fn graph_reconcile_is_idempotent() -> Result<()> {
    let cluster = FakeCluster::new();
    let config = Config::new_test();
    let graph = fixtures::graph("dag");
    let status = reconcile_graph(&cluster, &config, &graph).await?;
    cluster.take_writes();

    let again = reconcile_graph(&cluster, &config, &with_status(graph, status.clone())).await?;

    let writes = cluster.take_writes();
    assert!(writes.is_empty(), "expected no writes on second pass got {:?}", writes);
    assert_eq!(again, status);
    Ok(())
}

#[tokio::test]
async fn graph_becomes_ready_once_available() -> Result<()> {
    let cluster = FakeCluster::new();
    let config = Config::new_test();
    let graph = fixtures::graph("dag");
    let status = reconcile_graph(&cluster, &config, &graph).await?;
    cluster.set_available(NAMESPACE, "dag", "True");

    let status = reconcile_graph(&cluster, &config, &with_status(graph, status)).await?;

    assert_eq!(condition_status(&status, CONDITION_READY).as_deref(), Some("True"));
    assert_eq!(status.url.as_deref(), Some("https://dag.models.svc.cluster.local"));
    assert_eq!(status.observed_generation, Some(1));
    Ok(())
}

#[tokio::test]
async fn graph_without_router_tls_serves_http() -> Result<()> {
    let cluster = FakeCluster::new();
    let mut config = Config::new_test();
    config.router_tls = false;
    let graph = fixtures::graph("dag");
    reconcile_graph(&cluster, &config, &graph).await?;
    cluster.set_available(NAMESPACE, "dag", "True");

    let status = reconcile_graph(&cluster, &config, &graph).await?;

    assert_eq!(status.url.as_deref(), Some("http://dag.models.svc.cluster.local"));
    let pod = cluster
        .deployment(NAMESPACE, "dag")
        .and_then(|deployment| deployment.spec)
        .and_then(|spec| spec.template.spec)
        .unwrap_or_default();
    assert!(pod.volumes.is_none(), "expected no serving cert volume got {:?}", pod.volumes);
    Ok(())
}

#[tokio::test]
async fn stopped_graph_has_its_workload_removed() -> Result<()> {
    let cluster = FakeCluster::new();
    let config = Config::new_test();
    let graph = fixtures::graph("dag");
    let status = reconcile_graph(&cluster, &config, &graph).await?;
    assert!(cluster.hpa(NAMESPACE, "dag").is_some(), "expected an hpa for the running graph");
    let stopped = fixtures::annotate(with_status(graph, status), STOP_ANNOTATION, "true");

    let status = reconcile_graph(&cluster, &config, &stopped).await?;

    assert!(cluster.deployment(NAMESPACE, "dag").is_none(), "expected the deployment to be deleted");
    assert!(cluster.service(NAMESPACE, "dag").is_none(), "expected the service to be deleted");
    assert!(cluster.hpa(NAMESPACE, "dag").is_none(), "expected the hpa to be deleted");
    assert_eq!(condition_status(&status, CONDITION_STOPPED).as_deref(), Some("True"));
    let ready = status.condition(CONDITION_READY).cloned().unwrap_or_default();
    assert_eq!((ready.status.as_str(), ready.reason.as_deref()), ("False", Some(REASON_STOPPED)));
    Ok(())
}

#[tokio::test]
async fn serverless_graph_is_rejected() -> Result<()> {
    let cluster = FakeCluster::new();
    let graph = fixtures::annotate(fixtures::graph("dag"), DEPLOYMENT_MODE_ANNOTATION, "Serverless");

    let status = reconcile_graph(&cluster, &Config::new_test(), &graph).await?;

    assert!(cluster.deployment(NAMESPACE, "dag").is_none(), "expected no deployment for a serverless graph");
    let ready = status.condition(CONDITION_READY).cloned().unwrap_or_default();
    assert_eq!((ready.status.as_str(), ready.reason.as_deref()), ("False", Some(REASON_SERVERLESS_REJECTED)));
    Ok(())
}

#[tokio::test]
async fn missing_config_map_is_a_configuration_error() {
    let cluster = FakeCluster::default();

    let res = reconcile_graph(&cluster, &Config::new_test(), &fixtures::graph("dag")).await;

    assert!(matches!(res, Err(GraphError::Configuration(_))), "expected a configuration error got {:?}", res);
    assert!(cluster.deployment(NAMESPACE, "dag").is_none(), "expected no deployment without config");
}

#[tokio::test]
async fn auth_binds_and_unbinds_graph_service_accounts() -> Result<()> {
    let cluster = FakeCluster::new();
    let config = Config::new_test();
    let first = fixtures::annotate(fixtures::graph("dag"), ENABLE_AUTH_ANNOTATION, "true");
    let second = fixtures::annotate(fixtures::graph("ensemble"), ENABLE_AUTH_ANNOTATION, "true");

    reconcile_graph(&cluster, &config, &first).await?;
    reconcile_graph(&cluster, &config, &second).await?;

    let subjects = |cluster: &FakeCluster| -> Vec<String> {
        cluster
            .binding(GRAPH_AUTH_CRB_NAME)
            .and_then(|binding| binding.subjects)
            .unwrap_or_default()
            .into_iter()
            .map(|subject| subject.name)
            .collect()
    };
    assert_eq!(subjects(&cluster), vec!["dag-auth-verifier".to_string(), "ensemble-auth-verifier".to_string()]);
    assert!(cluster.has_service_account(NAMESPACE, "dag-auth-verifier"), "expected the graph service account");
    let role = cluster.binding(GRAPH_AUTH_CRB_NAME).map(|binding| binding.role_ref.name);
    assert_eq!(role.as_deref(), Some("system:auth-delegator"));

    cleanup_graph(&cluster, NAMESPACE, "dag").await?;

    assert_eq!(subjects(&cluster), vec!["ensemble-auth-verifier".to_string()]);
    assert!(!cluster.has_service_account(NAMESPACE, "dag-auth-verifier"), "expected the service account to be deleted");
    Ok(())
}

#[tokio::test]
async fn disabling_auth_removes_privileges() -> Result<()> {
    let cluster = FakeCluster::new();
    let config = Config::new_test();
    let graph = fixtures::annotate(fixtures::graph("dag"), ENABLE_AUTH_ANNOTATION, "true");
    reconcile_graph(&cluster, &config, &graph).await?;

    let disabled = fixtures::annotate(graph, ENABLE_AUTH_ANNOTATION, "false");
    reconcile_graph(&cluster, &config, &disabled).await?;

    let subjects = cluster.binding(GRAPH_AUTH_CRB_NAME).and_then(|binding| binding.subjects).unwrap_or_default();
    assert!(subjects.is_empty(), "expected no subjects got {:?}", subjects);
    let pod = cluster
        .deployment(NAMESPACE, "dag")
        .and_then(|deployment| deployment.spec)
        .and_then(|spec| spec.template.spec)
        .unwrap_or_default();
    assert_eq!(pod.service_account_name.as_deref(), Some("default"));
    Ok(())
}
