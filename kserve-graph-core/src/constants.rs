//! Canonical annotation, label & naming constants shared by the operator.

/// Annotation selecting the deployment mode of a graph or service.
pub const DEPLOYMENT_MODE_ANNOTATION: &str = "serving.kserve.io/deploymentMode";
/// Annotation enabling authentication on raw deployments.
pub const ENABLE_AUTH_ANNOTATION: &str = "security.opendatahub.io/enable-auth";
/// Annotation naming the autoscaler class in charge of replicas.
pub const AUTOSCALER_CLASS_ANNOTATION: &str = "serving.kserve.io/autoscalerClass";
/// Annotation listing additional GPU resource names, comma separated.
pub const CUSTOM_GPU_RESOURCE_TYPES_ANNOTATION: &str = "serving.kserve.io/gpu-resource-types";
/// Annotation which, when `true`, stops the workload of a graph.
pub const STOP_ANNOTATION: &str = "serving.kserve.io/stop";
/// Annotation asking OpenShift to mint a serving certificate secret for a Service.
pub const OPENSHIFT_SERVING_CERT_ANNOTATION: &str = "service.beta.openshift.io/serving-cert-secret-name";

/// Label carrying the name of the owning InferenceGraph.
pub const INFERENCE_GRAPH_LABEL: &str = "serving.kserve.io/inferencegraph";
/// Label carrying the name of the owning InferenceService.
pub const INFERENCE_SERVICE_LABEL: &str = "serving.kserve.io/inferenceservice";

/// Label selecting the pods of a component.
pub const APP_LABEL: &str = "app";

/// The name of the model server container.
pub const INFERENCE_SERVICE_CONTAINER_NAME: &str = "kserve-container";
/// The name of the transformer container.
pub const TRANSFORMER_CONTAINER_NAME: &str = "transformer-container";
/// The name of the multi-node worker container.
pub const WORKER_CONTAINER_NAME: &str = "worker-container";
/// The name of the authenticating proxy sidecar.
pub const OAUTH_PROXY_CONTAINER_NAME: &str = "oauth-proxy";

/// Env var holding the pipeline parallel size of a multi-node deployment.
pub const PIPELINE_PARALLEL_SIZE_ENV: &str = "PIPELINE_PARALLEL_SIZE";
/// Env var holding the tensor parallel size (GPU count per pod).
pub const TENSOR_PARALLEL_SIZE_ENV: &str = "TENSOR_PARALLEL_SIZE";
/// Tensor parallel size used when the env var is absent.
pub const DEFAULT_TENSOR_PARALLEL_SIZE: &str = "1";
/// Env var through which the router learns which headers to propagate.
pub const ROUTER_HEADERS_PROPAGATE_ENV: &str = "PROPAGATE_HEADERS";

/// The GPU resource name used when no other type is configured on a container.
pub const NVIDIA_GPU_RESOURCE_TYPE: &str = "nvidia.com/gpu";
/// GPU resource names recognized out of the box.
pub const DEFAULT_GPU_RESOURCE_TYPES: &[&str] = &[NVIDIA_GPU_RESOURCE_TYPE, "amd.com/gpu", "gpu.intel.com/i915", "habana.ai/gaudi"];

/// The ConfigMap key holding the router config.
pub const ROUTER_CONFIG_KEY: &str = "router";
/// The ConfigMap key holding the oauth proxy config.
pub const OAUTH_PROXY_CONFIG_KEY: &str = "oauthProxy";

/// The port the router & model servers listen on.
pub const DEFAULT_HTTP_PORT: i32 = 8080;
/// The port of the KServe agent (batcher & logger).
pub const DEFAULT_AGENT_PORT: i32 = 9081;
/// The HTTPS port of the oauth proxy sidecar.
pub const OAUTH_PROXY_PORT: i32 = 8443;
/// The port exposed by graph Services.
pub const GRAPH_SERVICE_PORT: i32 = 443;

/// Suffix of the secret holding a serving certificate.
pub const SERVING_CERT_SECRET_SUFFIX: &str = "-serving-cert";
/// Name of the volume carrying the serving certificate.
pub const TLS_VOLUME_NAME: &str = "proxy-tls";
/// Mount path of the serving certificate.
pub const TLS_MOUNT_PATH: &str = "/etc/tls/private";

/// The ClusterRoleBinding granting token review rights to graph service accounts.
pub const GRAPH_AUTH_CRB_NAME: &str = "kserve-inferencegraph-auth-verifiers";
/// The field manager used for all writes of this controller.
pub const CONTROLLER_NAME: &str = "inferencegraph-controller";

/// The name of the Service pods of a component are selected by.
pub fn raw_service_label(name: &str) -> String {
    format!("isvc.{}", name)
}

/// The `app` label of the worker pods of a component.
pub fn raw_worker_service_label(name: &str) -> String {
    format!("isvc.{}-worker", name)
}

/// The service account used by an auth-enabled graph.
pub fn graph_auth_service_account(graph: &str) -> String {
    format!("{}-auth-verifier", graph)
}

/// The name of the serving certificate secret of a component.
pub fn serving_cert_secret(name: &str) -> String {
    format!("{}{}", name, SERVING_CERT_SECRET_SUFFIX)
}
