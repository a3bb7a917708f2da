//! Component-level specs shared by the resources reconciled into raw Deployments.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::apps::v1::DeploymentStrategy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::GraphError;

/// Scaling & extension parameters of a component.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentExtensionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_metric: Option<ScaleMetric>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_target: Option<i32>,
    /// The rollout strategy of the component's Deployment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_strategy: Option<DeploymentStrategy>,
    /// Request batching performed by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batcher: Option<Batcher>,
    /// Request logging performed by the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logger: Option<LoggerSpec>,
}

/// Batching performed by the KServe agent.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Batcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_latency: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
}

/// Request logging performed by the KServe agent.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggerSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// The metric on which a component is scaled.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScaleMetric {
    Cpu,
    Memory,
    Concurrency,
    Rps,
}

/// The kind of resource owning a set of raw Deployments.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceType {
    InferenceService,
    InferenceGraph,
}

/// How a resource is deployed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum DeploymentMode {
    /// Knative Serving.
    Serverless,
    /// Plain Deployments & Services.
    RawDeployment,
}

impl FromStr for DeploymentMode {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Serverless" => Ok(Self::Serverless),
            "RawDeployment" => Ok(Self::RawDeployment),
            _ => Err(GraphError::Configuration(format!("unknown deployment mode {:?}", s))),
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serverless => f.write_str("Serverless"),
            Self::RawDeployment => f.write_str("RawDeployment"),
        }
    }
}

/// The autoscaler in charge of a component's replicas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AutoscalerClass {
    /// Horizontal pod autoscaler, the default.
    Hpa,
    /// Replicas are managed by something outside of KServe & applied as given.
    External,
    /// Any other class.
    Other(String),
}

impl AutoscalerClass {
    /// Resolve the class from the value of the autoscaler class annotation.
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value {
            None | Some("") | Some("hpa") => Self::Hpa,
            Some("external") => Self::External,
            Some(other) => Self::Other(other.to_string()),
        }
    }

    /// Whether the desired replica count is authoritative.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External)
    }
}
