use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::watcher::Event;
use kube::Resource;

use crate::k8s::scheduler::SchedulerTask;
use crate::k8s::{object_key, Controller, EventResult, METRIC_WATCHER_ERRORS};
use kserve_graph_core::constants::INFERENCE_GRAPH_LABEL;
use kserve_graph_core::crd::InferenceGraph;

//////////////////////////////////////////////////////////////////////////////
// InferenceGraph Events /////////////////////////////////////////////////////
impl Controller {
    /// Handle `InferenceGraph` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_graph_event(&mut self, res: EventResult<InferenceGraph>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from InferenceGraph k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "kind" => "InferenceGraph");
                tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.graph_applied(obj).await,
            Event::Deleted(obj) => self.graph_deleted(obj).await,
            Event::Restarted(objs) => self.graph_restarted(objs).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, graph))]
    async fn graph_applied(&mut self, graph: InferenceGraph) {
        let key_str = match object_key(graph.meta()) {
            Some(key_str) => key_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let key = match self.graphs.get_key_value(&key_str) {
            Some((key, old)) => {
                if old == &graph {
                    return;
                }
                Arc::clone(key) // No additional alloc.
            }
            None => Arc::new(key_str),
        };
        self.graphs.insert(key.clone(), graph);
        self.spawn_scheduler_task(SchedulerTask::GraphUpdated(key), false);
    }

    #[tracing::instrument(level = "debug", skip(self, graph))]
    async fn graph_deleted(&mut self, graph: InferenceGraph) {
        let key_str = match object_key(graph.meta()) {
            Some(key_str) => key_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let (key, _graph) = match self.graphs.remove_entry(&key_str) {
            Some((key, graph)) => (key, graph),
            None => return,
        };
        self.spawn_scheduler_task(SchedulerTask::GraphDeleted(key, graph), false);
    }

    #[tracing::instrument(level = "debug", skip(self, graphs))]
    async fn graph_restarted(&mut self, graphs: Vec<InferenceGraph>) {
        for graph in graphs {
            self.graph_applied(graph).await;
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// Deployment Events /////////////////////////////////////////////////////////
impl Controller {
    /// Handle `Deployment` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_deployment_event(&mut self, res: EventResult<Deployment>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from Deployment k8s watcher");
                metrics::increment_counter!(METRIC_WATCHER_ERRORS, "kind" => "Deployment");
                tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.deployment_applied(obj).await,
            Event::Deleted(obj) => self.deployment_deleted(obj).await,
            Event::Restarted(objs) => self.deployment_restarted(objs).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, deployment))]
    async fn deployment_applied(&mut self, deployment: Deployment) {
        let key_str = match object_key(deployment.meta()) {
            Some(key_str) => key_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let key = match self.deployments.get_key_value(&key_str) {
            Some((key, old)) => {
                if old == &deployment {
                    return;
                }
                Arc::clone(key) // No additional alloc.
            }
            None => Arc::new(key_str),
        };
        let owner = self.owning_graph(&deployment);
        self.deployments.insert(key, deployment);
        if let Some(owner) = owner {
            self.spawn_scheduler_task(SchedulerTask::GraphUpdated(owner), false);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, deployment))]
    async fn deployment_deleted(&mut self, deployment: Deployment) {
        let key_str = match object_key(deployment.meta()) {
            Some(key_str) => key_str,
            None => return, // Not actually possible as K8s requires name.
        };
        if self.deployments.remove(&key_str).is_none() {
            return;
        }
        // Recreate the workload of graphs which still exist.
        if let Some(owner) = self.owning_graph(&deployment) {
            self.spawn_scheduler_task(SchedulerTask::GraphUpdated(owner), false);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, deployments))]
    async fn deployment_restarted(&mut self, deployments: Vec<Deployment>) {
        for deployment in deployments {
            self.deployment_applied(deployment).await;
        }
    }

    /// The cache key of the known graph owning the given Deployment, if any.
    fn owning_graph(&self, deployment: &Deployment) -> Option<Arc<String>> {
        let meta = deployment.meta();
        let graph = meta.labels.as_ref()?.get(INFERENCE_GRAPH_LABEL)?;
        let key = format!("{}/{}", meta.namespace.as_deref().unwrap_or_default(), graph);
        self.graphs.get_key_value(&key).map(|(key, _)| Arc::clone(key))
    }
}
