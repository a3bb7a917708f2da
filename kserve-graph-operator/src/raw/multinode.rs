//! Multi-node topology: worker replica derivation & GPU resource injection.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, PodSpec, ResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use kserve_graph_core::constants::{
    CUSTOM_GPU_RESOURCE_TYPES_ANNOTATION, DEFAULT_GPU_RESOURCE_TYPES, DEFAULT_TENSOR_PARALLEL_SIZE, INFERENCE_SERVICE_CONTAINER_NAME,
    NVIDIA_GPU_RESOURCE_TYPE, PIPELINE_PARALLEL_SIZE_ENV, TENSOR_PARALLEL_SIZE_ENV,
};
use kserve_graph_core::quantity;
use kserve_graph_core::{GraphError, GraphResult};

/// The GPU resource names recognized for one deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct GpuResourceTypes(Vec<String>);

impl GpuResourceTypes {
    /// The default GPU types followed by the given comma separated custom types.
    pub fn new(custom: Option<&str>) -> Self {
        let mut types: Vec<String> = DEFAULT_GPU_RESOURCE_TYPES.iter().map(|gpu| gpu.to_string()).collect();
        let custom = custom.unwrap_or_default().split(',').map(str::trim).filter(|gpu| !gpu.is_empty());
        for gpu in custom {
            if !types.iter().any(|known| known == gpu) {
                types.push(gpu.to_string());
            }
        }
        Self(types)
    }

    /// Build the GPU types of an object from its annotations.
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        Self::new(annotations.and_then(|annotations| annotations.get(CUSTOM_GPU_RESOURCE_TYPES_ANNOTATION)).map(String::as_str))
    }

    /// The GPU resource name to use for a container with the given resources.
    ///
    /// A type already carrying a non-zero limit or request wins, checked in order of this list.
    /// Falls back to `nvidia.com/gpu`.
    pub fn select(&self, resources: Option<&ResourceRequirements>) -> &str {
        let limits = resources.and_then(|res| res.limits.as_ref());
        let requests = resources.and_then(|res| res.requests.as_ref());
        let has_non_zero = |list: Option<&BTreeMap<String, Quantity>>, gpu: &str| list.and_then(|list| list.get(gpu)).map(quantity::is_non_zero).unwrap_or(false);
        self.0
            .iter()
            .map(String::as_str)
            .find(|gpu| has_non_zero(limits, *gpu) || has_non_zero(requests, *gpu))
            .unwrap_or(NVIDIA_GPU_RESOURCE_TYPE)
    }
}

/// Why the worker replica count fell back to zero.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplicaFallback {
    /// The pipeline parallel size is not set on the model server container.
    Unset,
    /// The pipeline parallel size is not an integer.
    Unparseable(String),
}

/// The worker replica count of a multi-node deployment.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerReplicas {
    pub replicas: i32,
    /// Set when `replicas` is a fallback rather than derived.
    pub fallback: Option<ReplicaFallback>,
}

/// Derive the worker replica count from the pipeline parallel size of the head pod spec.
///
/// The head counts as one pipeline stage, so workers are `pipelineParallelSize - 1`.
pub fn worker_replicas(head: &PodSpec) -> WorkerReplicas {
    let value = model_container(head).and_then(|container| env_var_value(container, PIPELINE_PARALLEL_SIZE_ENV));
    match value.map(|val| (val, val.trim().parse::<i32>())) {
        Some((_, Ok(size))) => WorkerReplicas {
            replicas: size.saturating_sub(1).max(0),
            fallback: None,
        },
        Some((val, Err(_))) => WorkerReplicas {
            replicas: 0,
            fallback: Some(ReplicaFallback::Unparseable(val.to_string())),
        },
        None => WorkerReplicas {
            replicas: 0,
            fallback: Some(ReplicaFallback::Unset),
        },
    }
}

/// The tensor parallel size of the head pod spec, which is the GPU count of every pod.
pub fn tensor_parallel_size(head: &PodSpec) -> String {
    model_container(head)
        .and_then(|container| env_var_value(container, TENSOR_PARALLEL_SIZE_ENV))
        .unwrap_or(DEFAULT_TENSOR_PARALLEL_SIZE)
        .to_string()
}

/// Set the GPU request & limit of the named container to the tensor parallel size.
pub fn add_gpu_resource(deployment: &mut Deployment, container_name: &str, tensor_parallel_size: &str) -> GraphResult<()> {
    let count = quantity::validate(tensor_parallel_size)
        .map_err(|err| GraphError::Configuration(format!("invalid {} {:?}: {}", TENSOR_PARALLEL_SIZE_ENV, tensor_parallel_size, err)))?;
    let gpu_types = GpuResourceTypes::from_annotations(deployment.metadata.annotations.as_ref());
    let containers = match deployment.spec.as_mut().and_then(|spec| spec.template.spec.as_mut()) {
        Some(pod) => &mut pod.containers,
        None => return Ok(()),
    };
    let container = match containers.iter_mut().find(|container| container.name == container_name) {
        Some(container) => container,
        None => return Ok(()),
    };
    let gpu = gpu_types.select(container.resources.as_ref()).to_string();
    let resources = container.resources.get_or_insert_with(Default::default);
    resources.limits.get_or_insert_with(Default::default).insert(gpu.clone(), count.clone());
    resources.requests.get_or_insert_with(Default::default).insert(gpu, count);
    Ok(())
}

/// The value of the named env var of a container, if set.
pub fn env_var_value<'a>(container: &'a Container, name: &str) -> Option<&'a str> {
    container
        .env
        .as_ref()?
        .iter()
        .find(|env| env.name == name)
        .map(|env| env.value.as_deref().unwrap_or_default())
}

fn model_container(spec: &PodSpec) -> Option<&Container> {
    spec.containers.iter().find(|container| container.name == INFERENCE_SERVICE_CONTAINER_NAME)
}
