//! KServe CRDs & component specs.
//!
//! References:
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/
//! - https://kubernetes.io/docs/tasks/extend-kubernetes/custom-resources/custom-resource-definitions/#additional-printer-columns

mod component;
mod graph;

use kube::Resource;

pub use component::{AutoscalerClass, Batcher, ComponentExtensionSpec, DeploymentMode, LoggerSpec, ResourceType, ScaleMetric};
pub use graph::{
    Condition, InferenceGraph, InferenceGraphSpec, InferenceGraphStatus, InferenceRouter, InferenceRouterType, InferenceStep, InferenceTarget,
    StepDependency, CONDITION_READY, GRAPH_ROOT_NODE_NAME,
};

/// A convenience trait built around the fact that all implementors
/// must have the following attributes.
pub trait RequiredMetadata {
    /// The namespace of this object.
    fn namespace(&self) -> &str;

    /// The name of this object.
    fn name(&self) -> &str;

    /// The value of the given annotation, if present.
    fn annotation(&self, key: &str) -> Option<&str>;
}

impl RequiredMetadata for InferenceGraph {
    fn namespace(&self) -> &str {
        self.meta().namespace.as_deref().unwrap_or_default()
    }

    fn name(&self) -> &str {
        self.meta().name.as_deref().unwrap_or_default()
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.meta()
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }
}
