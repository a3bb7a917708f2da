//! Test fixtures: an in-memory cluster & object builders.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition, DeploymentStatus};
use k8s_openapi::api::autoscaling::v2beta2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use maplit::btreemap;
use serde_json::{json, Value};

use kserve_graph_core::constants::{OAUTH_PROXY_CONFIG_KEY, ROUTER_CONFIG_KEY};
use kserve_graph_core::crd::{InferenceGraph, InferenceGraphSpec, InferenceGraphStatus, InferenceRouter, InferenceStep, InferenceTarget, GRAPH_ROOT_NODE_NAME};
use kserve_graph_core::patch;
use kserve_graph_core::{GraphError, GraphResult};

use crate::config::Config;
use crate::k8s::ClusterApi;

pub const NAMESPACE: &str = "models";
pub const ROUTER_IMAGE: &str = "kserve/router:v0.14.0";
pub const FAKE_CLUSTER_IP: &str = "10.96.0.12";

/// The objects held by a `FakeCluster`, keyed by `namespace/name`.
#[derive(Default)]
pub struct FakeState {
    pub deployments: BTreeMap<String, Deployment>,
    pub services: BTreeMap<String, Service>,
    pub hpas: BTreeMap<String, HorizontalPodAutoscaler>,
    pub config_maps: BTreeMap<String, ConfigMap>,
    pub service_accounts: BTreeMap<String, ServiceAccount>,
    pub bindings: BTreeMap<String, ClusterRoleBinding>,
    /// Every status published, in order.
    pub statuses: Vec<(String, InferenceGraphStatus)>,
    /// A log of every write which changed the cluster.
    pub writes: Vec<String>,
    resource_version: u64,
}

/// An in-memory `ClusterApi` which defaults & patches objects the way the API server does.
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl FakeCluster {
    /// A cluster holding the KServe ConfigMap with router & oauth proxy config.
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.insert_config_map(kserve_config_map(true));
        cluster
    }

    /// Run the given closure against the state of this cluster.
    pub fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().expect("fake cluster lock poisoned");
        f(&mut state)
    }

    pub fn insert_config_map(&self, cm: ConfigMap) {
        let key = key_of(&cm.metadata);
        self.with_state(|state| state.config_maps.insert(key, cm));
    }

    /// Store the given Deployment as is, bypassing defaulting & the write log.
    pub fn insert_deployment(&self, deployment: Deployment) {
        let key = key_of(&deployment.metadata);
        self.with_state(|state| state.deployments.insert(key, deployment));
    }

    pub fn insert_binding(&self, binding: ClusterRoleBinding) {
        let key = binding.metadata.name.clone().unwrap_or_default();
        self.with_state(|state| state.bindings.insert(key, binding));
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.with_state(|state| state.deployments.get(&key(namespace, name)).cloned())
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.with_state(|state| state.services.get(&key(namespace, name)).cloned())
    }

    pub fn hpa(&self, namespace: &str, name: &str) -> Option<HorizontalPodAutoscaler> {
        self.with_state(|state| state.hpas.get(&key(namespace, name)).cloned())
    }

    pub fn binding(&self, name: &str) -> Option<ClusterRoleBinding> {
        self.with_state(|state| state.bindings.get(name).cloned())
    }

    pub fn has_service_account(&self, namespace: &str, name: &str) -> bool {
        self.with_state(|state| state.service_accounts.contains_key(&key(namespace, name)))
    }

    /// Drain the write log.
    pub fn take_writes(&self) -> Vec<String> {
        self.with_state(|state| std::mem::take(&mut state.writes))
    }

    /// Report the named Deployment as rolled out, with the given Available status.
    pub fn set_available(&self, namespace: &str, name: &str, available: &str) {
        self.with_state(|state| {
            if let Some(deployment) = state.deployments.get_mut(&key(namespace, name)) {
                deployment.status = Some(DeploymentStatus {
                    observed_generation: deployment.metadata.generation,
                    conditions: Some(vec![DeploymentCondition {
                        type_: "Available".into(),
                        status: available.into(),
                        reason: Some("MinimumReplicasAvailable".into()),
                        ..Default::default()
                    }]),
                    ..Default::default()
                });
            }
        });
    }

    fn not_found(kind: &str, name: &str) -> GraphError {
        GraphError::Configuration(format!("{} {} not found", kind, name))
    }
}

impl FakeState {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn default_deployment(&mut self, deployment: &mut Deployment, generation: i64) {
        let meta = &mut deployment.metadata;
        let uid = format!("uid-{}", meta.name.as_deref().unwrap_or_default());
        meta.uid.get_or_insert(uid);
        meta.generation = Some(generation);
        meta.resource_version = Some(self.next_version());
        if let Some(spec) = deployment.spec.as_mut() {
            spec.replicas.get_or_insert(1);
        }
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_deployment(&self, namespace: &str, name: &str) -> GraphResult<Option<Deployment>> {
        Ok(self.deployment(namespace, name))
    }

    async fn create_deployment(&self, deployment: &Deployment) -> GraphResult<Deployment> {
        let key = key_of(&deployment.metadata);
        self.with_state(|state| {
            let mut created = deployment.clone();
            state.default_deployment(&mut created, 1);
            state.deployments.insert(key.clone(), created.clone());
            state.writes.push(format!("create deployment {}", key));
            Ok(created)
        })
    }

    async fn dry_run_update_deployment(&self, deployment: &Deployment) -> GraphResult<Deployment> {
        let key = key_of(&deployment.metadata);
        self.with_state(|state| {
            let live = state.deployments.get(&key).cloned().ok_or_else(|| Self::not_found("deployment", &key))?;
            let mut defaulted = deployment.clone();
            defaulted.metadata.uid = live.metadata.uid.clone();
            let generation = live.metadata.generation.unwrap_or(1);
            state.default_deployment(&mut defaulted, generation);
            Ok(defaulted)
        })
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &Value) -> GraphResult<Deployment> {
        let key = key(namespace, name);
        self.with_state(|state| {
            let live = state.deployments.get(&key).cloned().ok_or_else(|| Self::not_found("deployment", &key))?;
            let mut patched: Deployment = serde_json::from_value(patch::apply(&serde_json::to_value(&live)?, patch)?)?;
            let generation = live.metadata.generation.unwrap_or(1) + if patched.spec != live.spec { 1 } else { 0 };
            state.default_deployment(&mut patched, generation);
            state.deployments.insert(key.clone(), patched.clone());
            state.writes.push(format!("patch deployment {} {}", key, patch));
            Ok(patched)
        })
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let key = key(namespace, name);
        self.with_state(|state| {
            if state.deployments.remove(&key).is_some() {
                state.writes.push(format!("delete deployment {}", key));
            }
        });
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> GraphResult<Option<Service>> {
        Ok(self.service(namespace, name))
    }

    async fn create_service(&self, service: &Service) -> GraphResult<Service> {
        let key = key_of(&service.metadata);
        self.with_state(|state| {
            let mut created = service.clone();
            created.metadata.resource_version = Some(state.next_version());
            if let Some(spec) = created.spec.as_mut() {
                spec.cluster_ip.get_or_insert_with(|| FAKE_CLUSTER_IP.into());
                spec.type_.get_or_insert_with(|| "ClusterIP".into());
                spec.session_affinity.get_or_insert_with(|| "None".into());
            }
            state.services.insert(key.clone(), created.clone());
            state.writes.push(format!("create service {}", key));
            Ok(created)
        })
    }

    async fn patch_service(&self, namespace: &str, name: &str, patch: &Value) -> GraphResult<Service> {
        let key = key(namespace, name);
        self.with_state(|state| {
            let live = state.services.get(&key).cloned().ok_or_else(|| Self::not_found("service", &key))?;
            let mut patched: Service = serde_json::from_value(patch::apply(&serde_json::to_value(&live)?, patch)?)?;
            patched.metadata.resource_version = Some(state.next_version());
            state.services.insert(key.clone(), patched.clone());
            state.writes.push(format!("patch service {} {}", key, patch));
            Ok(patched)
        })
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let key = key(namespace, name);
        self.with_state(|state| {
            if state.services.remove(&key).is_some() {
                state.writes.push(format!("delete service {}", key));
            }
        });
        Ok(())
    }

    async fn get_hpa(&self, namespace: &str, name: &str) -> GraphResult<Option<HorizontalPodAutoscaler>> {
        Ok(self.hpa(namespace, name))
    }

    async fn create_hpa(&self, hpa: &HorizontalPodAutoscaler) -> GraphResult<HorizontalPodAutoscaler> {
        let key = key_of(&hpa.metadata);
        self.with_state(|state| {
            let mut created = hpa.clone();
            created.metadata.resource_version = Some(state.next_version());
            state.hpas.insert(key.clone(), created.clone());
            state.writes.push(format!("create hpa {}", key));
            Ok(created)
        })
    }

    async fn patch_hpa(&self, namespace: &str, name: &str, patch: &Value) -> GraphResult<HorizontalPodAutoscaler> {
        let key = key(namespace, name);
        self.with_state(|state| {
            let live = state.hpas.get(&key).cloned().ok_or_else(|| Self::not_found("hpa", &key))?;
            let mut patched: HorizontalPodAutoscaler = serde_json::from_value(patch::apply(&serde_json::to_value(&live)?, patch)?)?;
            patched.metadata.resource_version = Some(state.next_version());
            state.hpas.insert(key.clone(), patched.clone());
            state.writes.push(format!("patch hpa {} {}", key, patch));
            Ok(patched)
        })
    }

    async fn delete_hpa(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let key = key(namespace, name);
        self.with_state(|state| {
            if state.hpas.remove(&key).is_some() {
                state.writes.push(format!("delete hpa {}", key));
            }
        });
        Ok(())
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> GraphResult<Option<ConfigMap>> {
        Ok(self.with_state(|state| state.config_maps.get(&key(namespace, name)).cloned()))
    }

    async fn apply_service_account(&self, account: &ServiceAccount) -> GraphResult<()> {
        let key = key_of(&account.metadata);
        self.with_state(|state| {
            if state.service_accounts.get(&key) != Some(account) {
                state.service_accounts.insert(key.clone(), account.clone());
                state.writes.push(format!("apply service account {}", key));
            }
        });
        Ok(())
    }

    async fn delete_service_account(&self, namespace: &str, name: &str) -> GraphResult<()> {
        let key = key(namespace, name);
        self.with_state(|state| {
            if state.service_accounts.remove(&key).is_some() {
                state.writes.push(format!("delete service account {}", key));
            }
        });
        Ok(())
    }

    async fn get_cluster_role_binding(&self, name: &str) -> GraphResult<Option<ClusterRoleBinding>> {
        Ok(self.binding(name))
    }

    async fn create_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> GraphResult<()> {
        let name = binding.metadata.name.clone().unwrap_or_default();
        self.with_state(|state| {
            state.bindings.insert(name.clone(), binding.clone());
            state.writes.push(format!("create cluster role binding {}", name));
        });
        Ok(())
    }

    async fn replace_cluster_role_binding(&self, binding: &ClusterRoleBinding) -> GraphResult<()> {
        let name = binding.metadata.name.clone().unwrap_or_default();
        self.with_state(|state| {
            state.bindings.insert(name.clone(), binding.clone());
            state.writes.push(format!("replace cluster role binding {}", name));
        });
        Ok(())
    }

    async fn patch_graph_status(&self, namespace: &str, name: &str, status: &InferenceGraphStatus) -> GraphResult<()> {
        let key = key(namespace, name);
        self.with_state(|state| {
            state.statuses.push((key.clone(), status.clone()));
            state.writes.push(format!("patch status {}", key));
        });
        Ok(())
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

fn key_of(meta: &ObjectMeta) -> String {
    key(meta.namespace.as_deref().unwrap_or_default(), meta.name.as_deref().unwrap_or_default())
}

//////////////////////////////////////////////////////////////////////////////
// Builders //////////////////////////////////////////////////////////////////

/// The KServe ConfigMap, with or without the oauth proxy config.
pub fn kserve_config_map(with_oauth: bool) -> ConfigMap {
    let config = Config::new_test();
    let mut data = btreemap! {
        ROUTER_CONFIG_KEY.to_string() => json!({
            "image": ROUTER_IMAGE,
            "cpuRequest": "100m",
            "cpuLimit": "1",
            "memoryRequest": "100Mi",
            "memoryLimit": "1Gi",
            "headers": {"propagate": ["Authorization", "X-Request-Id"]},
        })
        .to_string(),
    };
    if with_oauth {
        data.insert(
            OAUTH_PROXY_CONFIG_KEY.into(),
            json!({
                "image": "quay.io/openshift/origin-oauth-proxy:4.14",
                "cpuRequest": "100m",
                "cpuLimit": "200m",
                "memoryRequest": "64Mi",
                "memoryLimit": "128Mi",
            })
            .to_string(),
        );
    }
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(config.config_map_name),
            namespace: Some(config.kserve_namespace),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// A graph with a single sequence node calling one service.
pub fn graph(name: &str) -> InferenceGraph {
    let mut spec = InferenceGraphSpec::default();
    spec.nodes.insert(
        GRAPH_ROOT_NODE_NAME.into(),
        InferenceRouter {
            steps: vec![InferenceStep {
                name: Some("classifier".into()),
                target: InferenceTarget {
                    service_name: Some("classifier".into()),
                    ..Default::default()
                },
                ..Default::default()
            }],
            ..Default::default()
        },
    );
    let mut graph = InferenceGraph::new(name, spec);
    graph.metadata.namespace = Some(NAMESPACE.into());
    graph.metadata.uid = Some(format!("uid-graph-{}", name));
    graph
}

/// Set an annotation on the given graph.
pub fn annotate(mut graph: InferenceGraph, key: &str, value: &str) -> InferenceGraph {
    graph.metadata.annotations.get_or_insert_with(BTreeMap::new).insert(key.into(), value.into());
    graph
}
