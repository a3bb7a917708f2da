//! The authenticating proxy sidecar & the serving certificate volume.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, HTTPGetAction, PodSpec, Probe, SecretVolumeSource, Volume, VolumeMount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use rand::RngCore;

use kserve_graph_core::configmap::OauthConfig;
use kserve_graph_core::constants::{
    serving_cert_secret, DEFAULT_AGENT_PORT, DEFAULT_HTTP_PORT, INFERENCE_SERVICE_CONTAINER_NAME, INFERENCE_SERVICE_LABEL, OAUTH_PROXY_CONTAINER_NAME,
    OAUTH_PROXY_PORT, TLS_MOUNT_PATH, TLS_VOLUME_NAME, TRANSFORMER_CONTAINER_NAME,
};
use kserve_graph_core::crd::{ComponentExtensionSpec, ResourceType};
use kserve_graph_core::GraphResult;

/// The prefix of the proxy arg carrying the random cookie secret.
pub const COOKIE_SECRET_ARG_PREFIX: &str = "--cookie-secret=";
/// The service account used when a pod spec names none.
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";
const OAUTH_HEALTH_PATH: &str = "/oauth/healthz";
const HTTPS_SCHEME: &str = "HTTPS";
const SECRET_DEFAULT_MODE: i32 = 420;
const COOKIE_SECRET_LEN: usize = 32;

/// The port the proxy forwards authenticated requests to.
///
/// The agent sits in front of the model server when batching or logging is configured.
pub fn upstream_port(ext: &ComponentExtensionSpec, pod: &PodSpec) -> i32 {
    if ext.batcher.is_some() || ext.logger.is_some() {
        return DEFAULT_AGENT_PORT;
    }
    let first_port = |name: &str| {
        pod.containers
            .iter()
            .find(|container| container.name == name)
            .and_then(|container| container.ports.as_ref())
            .and_then(|ports| ports.first())
            .map(|port| port.container_port)
    };
    first_port(TRANSFORMER_CONTAINER_NAME)
        .or_else(|| first_port(INFERENCE_SERVICE_CONTAINER_NAME))
        .unwrap_or(DEFAULT_HTTP_PORT)
}

/// Generate a random, base64 encoded cookie secret.
pub fn generate_cookie_secret() -> String {
    let mut secret = [0u8; COOKIE_SECRET_LEN];
    rand::thread_rng().fill_bytes(&mut secret);
    base64::encode(secret)
}

/// Build the proxy sidecar guarding the named InferenceService.
pub fn build_oauth_proxy_container(config: &OauthConfig, isvc: &str, namespace: &str, upstream_port: i32, service_account: &str) -> GraphResult<Container> {
    config.validate()?;
    let resources = config.resources()?;
    let review = format!(
        r#"{{"namespace": "{}", "resource": "inferenceservices", "group": "serving.kserve.io", "name": "{}", "verb": "get"}}"#,
        namespace, isvc
    );
    let health_probe = |initial_delay_seconds: i32| Probe {
        http_get: Some(HTTPGetAction {
            path: Some(OAUTH_HEALTH_PATH.into()),
            port: IntOrString::Int(OAUTH_PROXY_PORT),
            scheme: Some(HTTPS_SCHEME.into()),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        timeout_seconds: Some(1),
        period_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(3),
        ..Default::default()
    };
    Ok(Container {
        name: OAUTH_PROXY_CONTAINER_NAME.into(),
        image: Some(config.image.clone()),
        args: Some(vec![
            format!("--https-address=:{}", OAUTH_PROXY_PORT),
            "--provider=openshift".into(),
            "--skip-provider-button".into(),
            format!("--openshift-service-account={}", service_account),
            format!("--upstream=http://localhost:{}", upstream_port),
            format!("--tls-cert={}/tls.crt", TLS_MOUNT_PATH),
            format!("--tls-key={}/tls.key", TLS_MOUNT_PATH),
            format!("{}{}", COOKIE_SECRET_ARG_PREFIX, generate_cookie_secret()),
            format!(r#"--openshift-delegate-urls={{"/": {}}}"#, review),
            format!("--openshift-sar={}", review),
        ]),
        ports: Some(vec![ContainerPort {
            container_port: OAUTH_PROXY_PORT,
            name: Some("https".into()),
            ..Default::default()
        }]),
        liveness_probe: Some(health_probe(30)),
        readiness_probe: Some(health_probe(5)),
        resources: Some(resources),
        volume_mounts: Some(vec![tls_volume_mount()]),
        ..Default::default()
    })
}

/// Append the proxy sidecar to the pod template of the given deployment.
///
/// Token automount is enabled, as the proxy reviews tokens against the API.
pub fn add_oauth_container(deployment: &mut Deployment, meta: &ObjectMeta, ext: &ComponentExtensionSpec, config: &OauthConfig) -> GraphResult<()> {
    let isvc = meta
        .labels
        .as_ref()
        .and_then(|labels| labels.get(INFERENCE_SERVICE_LABEL))
        .or_else(|| meta.name.as_ref())
        .map(String::as_str)
        .unwrap_or_default();
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let pod = match deployment.spec.as_mut().and_then(|spec| spec.template.spec.as_mut()) {
        Some(pod) => pod,
        None => return Ok(()),
    };
    let service_account = pod
        .service_account_name
        .as_deref()
        .filter(|sa| !sa.is_empty())
        .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
        .to_string();
    let container = build_oauth_proxy_container(config, isvc, namespace, upstream_port(ext, pod), &service_account)?;
    pod.automount_service_account_token = Some(true);
    pod.containers.push(container);
    Ok(())
}

/// Add the serving certificate volume to the given deployment & mount it into the serving container.
///
/// The serving container of a graph is the router, named after the graph.
pub fn mount_serving_secret_volume(deployment: &mut Deployment, meta: &ObjectMeta, resource_type: ResourceType) {
    let name = meta.name.as_deref().unwrap_or_default();
    let target = match resource_type {
        ResourceType::InferenceGraph => name,
        ResourceType::InferenceService => INFERENCE_SERVICE_CONTAINER_NAME,
    };
    let pod = match deployment.spec.as_mut().and_then(|spec| spec.template.spec.as_mut()) {
        Some(pod) => pod,
        None => return,
    };
    pod.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: TLS_VOLUME_NAME.into(),
        secret: Some(SecretVolumeSource {
            secret_name: Some(serving_cert_secret(name)),
            default_mode: Some(SECRET_DEFAULT_MODE),
            ..Default::default()
        }),
        ..Default::default()
    });
    for container in pod.containers.iter_mut().filter(|container| container.name == target) {
        container.volume_mounts.get_or_insert_with(Vec::new).push(tls_volume_mount());
    }
}

/// A copy of the given deployment without cookie secret args.
///
/// The secret is regenerated on every build, so it is never compared.
pub fn remove_cookie_secret_arg(deployment: &Deployment) -> Deployment {
    let mut stripped = deployment.clone();
    let containers = stripped
        .spec
        .as_mut()
        .and_then(|spec| spec.template.spec.as_mut())
        .map(|pod| pod.containers.iter_mut());
    for container in containers.into_iter().flatten() {
        if let Some(args) = container.args.as_mut() {
            args.retain(|arg| !arg.starts_with(COOKIE_SECRET_ARG_PREFIX));
        }
    }
    stripped
}

fn tls_volume_mount() -> VolumeMount {
    VolumeMount {
        name: TLS_VOLUME_NAME.into(),
        mount_path: TLS_MOUNT_PATH.into(),
        ..Default::default()
    }
}
