//! InferenceGraph CRD.
//!
//! The code here is used to generate the actual CRD used in K8s. See examples/crd.rs.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, ResourceRequirements, Toleration};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants::{DEPLOYMENT_MODE_ANNOTATION, ENABLE_AUTH_ANNOTATION, STOP_ANNOTATION};
use crate::crd::{DeploymentMode, RequiredMetadata, ScaleMetric};

/// The name of the node at which every graph starts.
pub const GRAPH_ROOT_NODE_NAME: &str = "root";
/// The condition type summarizing the readiness of a graph.
pub const CONDITION_READY: &str = "Ready";

/// CRD spec for the InferenceGraph resource.
///
/// A graph is a set of named router nodes. Requests enter at the `root` node and are routed
/// through steps which either target a serving endpoint or another node of the graph.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    status = "InferenceGraphStatus",
    group = "serving.kserve.io",
    version = "v1alpha1",
    kind = "InferenceGraph",
    namespaced,
    derive = "PartialEq",
    shortname = "ig",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.url"}"#,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InferenceGraphSpec {
    /// The router nodes of this graph, keyed by node name.
    pub nodes: BTreeMap<String, InferenceRouter>,
    /// Compute resources of the router pods.
    ///
    /// When unset, the defaults of the router config are used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Affinity of the router pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
    /// Tolerations of the router pods.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    /// Request timeout of the router in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
    /// Minimum number of router replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    /// Maximum number of router replicas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    /// The target value of the scale metric.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_target: Option<i32>,
    /// The metric the router is scaled on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_metric: Option<ScaleMetric>,
}

/// A router node of the graph.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRouter {
    /// How the steps of this node are chained.
    pub router_type: InferenceRouterType,
    /// The steps of this node.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<InferenceStep>,
}

/// The routing behavior of a node.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum InferenceRouterType {
    /// Call steps one after the other, feeding each step the previous response.
    Sequence,
    /// Send each request to one step, picked by weight.
    Splitter,
    /// Call all steps in parallel and merge the responses.
    Ensemble,
    /// Call the first step whose condition matches.
    Switch,
}

impl Default for InferenceRouterType {
    fn default() -> Self {
        Self::Sequence
    }
}

/// A step of a router node.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceStep {
    /// Unique name of the step within its node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// The target of this step.
    #[serde(flatten)]
    pub target: InferenceTarget,
    /// Which data to pass to the step, `$request` or `$response`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Traffic weight of this step, for splitter nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    /// GJSON condition selecting this step, for switch nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Whether a failure of this step fails the whole request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<StepDependency>,
}

/// The target of a step: another node, a named InferenceService, or a URL.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceTarget {
    /// The name of another node of this graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// The name of an InferenceService in the namespace of the graph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// An absolute URL to call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
}

/// Failure semantics of a step.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, JsonSchema)]
pub enum StepDependency {
    Soft,
    Hard,
}

/// CRD status object.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InferenceGraphStatus {
    /// The URL at which the graph accepts requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// The conditions of this graph.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// The generation of the workload last observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/// A status condition.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    /// One of `True`, `False` or `Unknown`.
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl InferenceGraphStatus {
    /// Get the condition of the given type.
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|cond| cond.type_ == type_)
    }

    /// Set the given condition, replacing any condition of the same type.
    ///
    /// The transition time of an existing condition is kept when its status is unchanged, so
    /// that setting the same condition twice leaves the status untouched.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|cond| cond.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time.clone();
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

impl InferenceGraph {
    /// The deployment mode of this graph, falling back to the given default.
    pub fn deployment_mode(&self, default: DeploymentMode) -> DeploymentMode {
        self.annotation(DEPLOYMENT_MODE_ANNOTATION)
            .and_then(|val| val.parse().ok())
            .unwrap_or(default)
    }

    /// Whether auth has been requested for this graph.
    pub fn auth_enabled(&self) -> bool {
        self.annotation(ENABLE_AUTH_ANNOTATION) == Some("true")
    }

    /// Whether the workload of this graph has been stopped.
    pub fn stopped(&self) -> bool {
        self.annotation(STOP_ANNOTATION)
            .map(|val| val.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }

    /// A controller owner reference to this graph, for the objects it owns.
    ///
    /// Returns `None` until the graph has been assigned a uid.
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        let meta = self.meta();
        Some(OwnerReference {
            api_version: <Self as Resource>::api_version(&()).into_owned(),
            kind: <Self as Resource>::kind(&()).into_owned(),
            name: meta.name.clone()?,
            uid: meta.uid.clone()?,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}
