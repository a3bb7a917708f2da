//! Defaulting of pod & deployment specs.
//!
//! The API server fills in these values when a Deployment is written. Applying them up front keeps
//! the desired objects comparable with their live counterparts. Every function here only fills
//! fields which are unset, so applying them twice changes nothing.

use k8s_openapi::api::apps::v1::{DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{Container, PodSecurityContext, PodSpec, Probe, TCPSocketAction};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use kserve_graph_core::constants::{DEFAULT_HTTP_PORT, INFERENCE_SERVICE_CONTAINER_NAME, TRANSFORMER_CONTAINER_NAME};

pub const DNS_CLUSTER_FIRST: &str = "ClusterFirst";
pub const RESTART_POLICY_ALWAYS: &str = "Always";
pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS: i64 = 30;
pub const DEFAULT_SCHEDULER_NAME: &str = "default-scheduler";
pub const TERMINATION_MESSAGE_PATH: &str = "/dev/termination-log";
pub const TERMINATION_MESSAGE_READ_FILE: &str = "File";
pub const PULL_IF_NOT_PRESENT: &str = "IfNotPresent";
pub const ROLLING_UPDATE_STRATEGY: &str = "RollingUpdate";
pub const DEFAULT_REVISION_HISTORY_LIMIT: i32 = 10;
pub const DEFAULT_PROGRESS_DEADLINE_SECONDS: i32 = 600;
const DEFAULT_MAX_SURGE: &str = "25%";
const DEFAULT_MAX_UNAVAILABLE: &str = "25%";

/// Apply pod-level & container-level defaults to the given pod spec.
pub fn set_default_pod_spec(spec: &mut PodSpec) {
    spec.dns_policy.get_or_insert_with(|| DNS_CLUSTER_FIRST.into());
    spec.restart_policy.get_or_insert_with(|| RESTART_POLICY_ALWAYS.into());
    spec.termination_grace_period_seconds.get_or_insert(DEFAULT_TERMINATION_GRACE_PERIOD_SECONDS);
    spec.security_context.get_or_insert_with(PodSecurityContext::default);
    spec.scheduler_name.get_or_insert_with(|| DEFAULT_SCHEDULER_NAME.into());
    for container in spec.containers.iter_mut() {
        set_default_container(container);
    }
}

fn set_default_container(container: &mut Container) {
    container.termination_message_path.get_or_insert_with(|| TERMINATION_MESSAGE_PATH.into());
    container
        .termination_message_policy
        .get_or_insert_with(|| TERMINATION_MESSAGE_READ_FILE.into());
    container.image_pull_policy.get_or_insert_with(|| PULL_IF_NOT_PRESENT.into());

    // Model servers & collocated transformers get a TCP readiness probe on their serving port.
    let is_serving = container.name == INFERENCE_SERVICE_CONTAINER_NAME || container.name == TRANSFORMER_CONTAINER_NAME;
    if is_serving && container.readiness_probe.is_none() {
        let port = container
            .ports
            .as_ref()
            .and_then(|ports| ports.first())
            .map(|port| port.container_port)
            .unwrap_or(DEFAULT_HTTP_PORT);
        container.readiness_probe = Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(port),
                host: None,
            }),
            timeout_seconds: Some(1),
            period_seconds: Some(10),
            success_threshold: Some(1),
            failure_threshold: Some(3),
            ..Default::default()
        });
    }
}

/// Apply rollout defaults to the given deployment spec.
pub fn set_default_deployment_spec(spec: &mut DeploymentSpec) {
    let strategy = spec.strategy.get_or_insert_with(DeploymentStrategy::default);
    let is_rolling = strategy.type_.get_or_insert_with(|| ROLLING_UPDATE_STRATEGY.into()).as_str() == ROLLING_UPDATE_STRATEGY;
    if is_rolling && strategy.rolling_update.is_none() {
        strategy.rolling_update = Some(RollingUpdateDeployment {
            max_unavailable: Some(IntOrString::String(DEFAULT_MAX_UNAVAILABLE.into())),
            max_surge: Some(IntOrString::String(DEFAULT_MAX_SURGE.into())),
        });
    }
    spec.revision_history_limit.get_or_insert(DEFAULT_REVISION_HISTORY_LIMIT);
    spec.progress_deadline_seconds.get_or_insert(DEFAULT_PROGRESS_DEADLINE_SECONDS);
}

/// Check if the given deployment spec rolls out with a rolling update.
pub fn is_rolling_update(spec: &DeploymentSpec) -> bool {
    spec.strategy
        .as_ref()
        .and_then(|strategy| strategy.type_.as_deref())
        .map(|type_| type_ == ROLLING_UPDATE_STRATEGY)
        .unwrap_or(false)
}
