use std::collections::BTreeMap;

use anyhow::Result;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use maplit::btreemap;

use kserve_graph_core::configmap::RouterConfig;
use kserve_graph_core::constants::{ENABLE_AUTH_ANNOTATION, ROUTER_HEADERS_PROPAGATE_ENV};
use kserve_graph_core::GraphError;

use crate::fixtures;
use crate::raw::podspec::{create_graph_pod_spec, ARG_ENABLE_AUTH, ARG_ENABLE_TLS, ARG_GRAPH_JSON, ARG_GRAPH_NAME};

fn router_config() -> Result<RouterConfig> {
    Ok(RouterConfig::from_config_map(&fixtures::kserve_config_map(false))?)
}

#[test]
fn router_pod_spec_carries_graph_json() -> Result<()> {
    let graph = fixtures::graph("dag");
    let config = router_config()?;

    let spec = create_graph_pod_spec(&graph, &config, true)?;

    assert!(spec.containers.len() == 1, "expected 1 container got {}", spec.containers.len());
    let router = &spec.containers[0];
    assert_eq!(router.name, "dag");
    assert_eq!(router.image.as_deref(), Some(fixtures::ROUTER_IMAGE));
    let args = router.args.clone().unwrap_or_default();
    let expected_json = serde_json::to_string(&graph.spec)?;
    assert_eq!(args, vec![ARG_ENABLE_TLS.to_string(), ARG_GRAPH_JSON.to_string(), expected_json]);
    assert_eq!(spec.automount_service_account_token, Some(false));
    assert_eq!(spec.service_account_name.as_deref(), Some("default"));

    let env = router.env.clone().unwrap_or_default();
    assert!(
        env.iter()
            .any(|var| var.name == ROUTER_HEADERS_PROPAGATE_ENV && var.value.as_deref() == Some("Authorization,X-Request-Id")),
        "expected propagated headers env got {:?}",
        env
    );

    let scheme = router
        .readiness_probe
        .as_ref()
        .and_then(|probe| probe.http_get.as_ref())
        .and_then(|get| get.scheme.clone());
    assert_eq!(scheme.as_deref(), Some("HTTPS"));
    Ok(())
}

#[test]
fn router_pod_spec_without_tls_probes_plain_http() -> Result<()> {
    let graph = fixtures::graph("dag");

    let spec = create_graph_pod_spec(&graph, &router_config()?, false)?;

    let router = &spec.containers[0];
    let args = router.args.clone().unwrap_or_default();
    assert!(!args.iter().any(|arg| arg == ARG_ENABLE_TLS), "expected no tls arg got {:?}", args);
    let scheme = router
        .readiness_probe
        .as_ref()
        .and_then(|probe| probe.http_get.as_ref())
        .and_then(|get| get.scheme.clone());
    assert_eq!(scheme.as_deref(), Some("HTTP"));
    Ok(())
}

#[test]
fn router_pod_spec_with_auth_uses_verifier_account() -> Result<()> {
    let graph = fixtures::annotate(fixtures::graph("dag"), ENABLE_AUTH_ANNOTATION, "true");

    let spec = create_graph_pod_spec(&graph, &router_config()?, true)?;

    let args = spec.containers[0].args.clone().unwrap_or_default();
    assert!(
        args.ends_with(&[ARG_ENABLE_AUTH.to_string(), ARG_GRAPH_NAME.to_string(), "dag".to_string()]),
        "expected auth args at the end got {:?}",
        args
    );
    assert_eq!(spec.automount_service_account_token, Some(true));
    assert_eq!(spec.service_account_name.as_deref(), Some("dag-auth-verifier"));
    Ok(())
}

#[test]
fn router_pod_spec_defaults_resources_from_config() -> Result<()> {
    let graph = fixtures::graph("dag");

    let spec = create_graph_pod_spec(&graph, &router_config()?, true)?;

    let resources = spec.containers[0].resources.clone().unwrap_or_default();
    let limits = resources.limits.unwrap_or_default();
    assert_eq!(limits.get("cpu"), Some(&Quantity("1".into())));
    assert_eq!(limits.get("memory"), Some(&Quantity("1Gi".into())));
    Ok(())
}

#[test]
fn router_pod_spec_prefers_graph_resources() -> Result<()> {
    let mut graph = fixtures::graph("dag");
    let limits: BTreeMap<String, Quantity> = btreemap! { "cpu".to_string() => Quantity("2".into()) };
    graph.spec.resources = Some(ResourceRequirements {
        limits: Some(limits.clone()),
        requests: None,
    });

    let spec = create_graph_pod_spec(&graph, &router_config()?, true)?;

    let resources = spec.containers[0].resources.clone().unwrap_or_default();
    assert_eq!(resources.limits, Some(limits));
    assert!(resources.requests.is_none(), "expected no requests got {:?}", resources.requests);
    Ok(())
}

#[test]
fn router_pod_spec_rejects_invalid_quantities() -> Result<()> {
    let mut graph = fixtures::graph("dag");
    graph.spec.resources = Some(ResourceRequirements {
        limits: Some(btreemap! { "memory".to_string() => Quantity("lots".into()) }),
        requests: None,
    });

    let res = create_graph_pod_spec(&graph, &router_config()?, true);

    assert!(matches!(res, Err(GraphError::Serialization(_))), "expected a serialization error got {:?}", res);
    Ok(())
}
