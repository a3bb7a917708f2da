//! Router pod spec synthesis.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Capabilities, Container, EnvVar, HTTPGetAction, PodSpec, Probe, ResourceRequirements, SecurityContext};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use kserve_graph_core::configmap::RouterConfig;
use kserve_graph_core::constants::{graph_auth_service_account, DEFAULT_HTTP_PORT, ROUTER_HEADERS_PROPAGATE_ENV};
use kserve_graph_core::crd::{InferenceGraph, RequiredMetadata};
use kserve_graph_core::quantity;
use kserve_graph_core::{GraphError, GraphResult};

use crate::raw::oauth::DEFAULT_SERVICE_ACCOUNT;

pub const ARG_ENABLE_TLS: &str = "--enable-tls";
pub const ARG_GRAPH_JSON: &str = "--graph-json";
pub const ARG_ENABLE_AUTH: &str = "--enable-auth";
pub const ARG_GRAPH_NAME: &str = "--inferencegraph-name";
const ROUTER_READINESS_PATH: &str = "/readyz";

/// Build the pod spec of the router serving the given graph.
///
/// The graph spec is handed to the router as JSON. Quantities of the graph's own resources are
/// validated first, since they would otherwise be rejected by the API server.
pub fn create_graph_pod_spec(graph: &InferenceGraph, config: &RouterConfig, enable_tls: bool) -> GraphResult<PodSpec> {
    let graph_json = serde_json::to_string(&graph.spec)?;
    let resources = match graph.spec.resources.as_ref().filter(|res| res.requests.is_some() || res.limits.is_some()) {
        Some(resources) => {
            validate_quantities(resources)?;
            resources.clone()
        }
        None => config.resources()?,
    };

    let mut args = vec![];
    if enable_tls {
        args.push(ARG_ENABLE_TLS.to_string());
    }
    args.push(ARG_GRAPH_JSON.into());
    args.push(graph_json);

    let env = config.propagate_headers().map(|headers| {
        vec![EnvVar {
            name: ROUTER_HEADERS_PROPAGATE_ENV.into(),
            value: Some(headers.join(",")),
            value_from: None,
        }]
    });

    let mut spec = PodSpec {
        containers: vec![Container {
            name: graph.name().into(),
            image: Some(config.image.clone()),
            args: Some(args),
            env,
            resources: Some(resources),
            readiness_probe: Some(router_readiness_probe(enable_tls)),
            security_context: Some(SecurityContext {
                privileged: Some(false),
                run_as_non_root: Some(true),
                read_only_root_filesystem: Some(true),
                allow_privilege_escalation: Some(false),
                capabilities: Some(Capabilities {
                    add: None,
                    drop: Some(vec!["ALL".into()]),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }],
        affinity: graph.spec.affinity.clone(),
        tolerations: graph.spec.tolerations.clone(),
        service_account_name: Some(DEFAULT_SERVICE_ACCOUNT.into()),
        // The router only needs API access to review tokens.
        automount_service_account_token: Some(false),
        ..Default::default()
    };

    if graph.auth_enabled() {
        if let Some(args) = spec.containers[0].args.as_mut() {
            args.extend([ARG_ENABLE_AUTH.to_string(), ARG_GRAPH_NAME.to_string(), graph.name().to_string()]);
        }
        spec.automount_service_account_token = Some(true);
        spec.service_account_name = Some(graph_auth_service_account(graph.name()));
    }
    Ok(spec)
}

fn router_readiness_probe(enable_tls: bool) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(ROUTER_READINESS_PATH.into()),
            port: IntOrString::Int(DEFAULT_HTTP_PORT),
            scheme: Some(if enable_tls { "HTTPS" } else { "HTTP" }.into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(5),
        timeout_seconds: Some(2),
        period_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn validate_quantities(resources: &ResourceRequirements) -> GraphResult<()> {
    let lists: [Option<&BTreeMap<String, Quantity>>; 2] = [resources.requests.as_ref(), resources.limits.as_ref()];
    for (name, qty) in lists.iter().flatten().flat_map(|list| list.iter()) {
        quantity::parse(qty).map_err(|err| GraphError::Serialization(format!("invalid quantity {:?} for resource {}: {}", qty.0, name, err)))?;
    }
    Ok(())
}
