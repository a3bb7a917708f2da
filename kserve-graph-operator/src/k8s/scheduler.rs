//! Scheduling of graph reconciliation.
//!
//! All scheduler tasks are broken up into "updated" & "deleted" tasks. Updated tasks reconcile the
//! cached graph in full, so that a missed event is repaired by the next one. Reconciliation only
//! writes what differs from the live state, so redundant tasks are cheap. Failed tasks are
//! rescheduled after a delay as long as a retry may succeed.

use std::sync::Arc;

use kube::Resource;

use kserve_graph_core::crd::{InferenceGraph, RequiredMetadata};

use crate::k8s::{Controller, METRIC_RECONCILES};
use crate::raw::{cleanup_graph, reconcile_graph};

const GRAPH_KIND: &str = "InferenceGraph";
const OUTCOME_SUCCESS: &str = "success";
const OUTCOME_ERROR: &str = "error";

/// A scheduling task to be performed.
#[derive(Debug)]
#[allow(clippy::large_enum_variant)] // Arcs vs graphs.
pub enum SchedulerTask {
    GraphUpdated(Arc<String>),
    GraphDeleted(Arc<String>, InferenceGraph),
}

impl Controller {
    /// Handle scheduler tasks.
    pub(super) async fn handle_scheduler_task(&mut self, task: SchedulerTask) {
        match task {
            SchedulerTask::GraphUpdated(key) => self.scheduler_graph_updated(key).await,
            SchedulerTask::GraphDeleted(key, graph) => self.scheduler_graph_deleted(key, graph).await,
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// InferenceGraph Reconciliation /////////////////////////////////////////////
impl Controller {
    #[tracing::instrument(level = "debug", skip(self, key), fields(graph = %key))]
    async fn scheduler_graph_updated(&self, key: Arc<String>) {
        tracing::debug!("handling scheduler graph updated");
        let graph = match self.graphs.get(&key) {
            Some(graph) => graph,
            None => return, // Deleted since the task was scheduled.
        };
        if graph.meta().deletion_timestamp.is_some() {
            return;
        }

        let res = reconcile_graph(self.cluster.as_ref(), &self.config, graph).await;
        let outcome = if res.is_ok() { OUTCOME_SUCCESS } else { OUTCOME_ERROR };
        metrics::increment_counter!(METRIC_RECONCILES, "kind" => GRAPH_KIND, "task" => "reconcile", "outcome" => outcome);
        match res {
            Ok(status) => tracing::debug!(url = ?status.url, "graph reconciled"),
            Err(err) if err.is_retryable() => {
                tracing::error!(error = ?err, "error reconciling graph, will retry");
                self.spawn_scheduler_task(SchedulerTask::GraphUpdated(key), true);
            }
            Err(err) => tracing::error!(error = ?err, "error reconciling graph, waiting for the graph to change"),
        }
    }

    #[tracing::instrument(level = "debug", skip(self, key, graph), fields(graph = %key))]
    async fn scheduler_graph_deleted(&mut self, key: Arc<String>, graph: InferenceGraph) {
        tracing::debug!("handling scheduler graph deleted");
        // A graph recreated under the same name keeps its auth resources.
        if self.graphs.contains_key(&key) {
            return;
        }
        let res = cleanup_graph(self.cluster.as_ref(), graph.namespace(), graph.name()).await;
        let outcome = if res.is_ok() { OUTCOME_SUCCESS } else { OUTCOME_ERROR };
        metrics::increment_counter!(METRIC_RECONCILES, "kind" => GRAPH_KIND, "task" => "cleanup", "outcome" => outcome);
        if let Err(err) = res {
            tracing::error!(error = ?err, "error cleaning up graph resources, will retry");
            self.spawn_scheduler_task(SchedulerTask::GraphDeleted(key, graph), true);
        }
    }
}
