//! Kubernetes controller.
//!
//! This controller observes InferenceGraphs & the Deployments created for them, caches what it
//! sees, and spawns scheduler tasks which converge each graph towards its desired state. Changes
//! to a graph's Deployments, including status changes, are fed back as updates of the graph so
//! that its status tracks its workload.

mod client;
mod data;
mod scheduler;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::prelude::*;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams};
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};

use crate::config::Config;
use crate::k8s::scheduler::SchedulerTask;
use kserve_graph_core::crd::InferenceGraph;
use kserve_graph_core::INFERENCE_GRAPH_LABEL_SELECTOR;

pub use client::{ClusterApi, KubeClusterApi};

/// The timeout duration used before rescheduling a scheduler task.
const RESCHEDULE_TIMEOUT: Duration = Duration::from_secs(5);

const METRIC_RECONCILES: &str = "kserve_graph_reconciles";
const METRIC_RECONCILE_REQUEUES: &str = "kserve_graph_reconcile_requeues";
const METRIC_WATCHER_ERRORS: &str = "kserve_graph_watcher_errors";

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// Kubernetes controller for watching InferenceGraphs.
pub struct Controller {
    /// K8s client.
    client: Client,
    /// The cluster API used by reconcilers.
    cluster: Arc<dyn ClusterApi>,
    /// Runtime config.
    config: Arc<Config>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// A channel of scheduler tasks.
    scheduler_tasks_tx: mpsc::Sender<SchedulerTask>,
    /// A channel of scheduler tasks.
    scheduler_tasks_rx: ReceiverStream<SchedulerTask>,

    /// All known graphs, keyed by `namespace/name`.
    graphs: HashMap<Arc<String>, InferenceGraph>,
    /// All known Deployments owned by a graph, keyed by `namespace/name`.
    deployments: HashMap<Arc<String>, Deployment>,
}

impl Controller {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Self {
        metrics::register_counter!(METRIC_RECONCILES, metrics::Unit::Count, "scheduler tasks run, by resource kind, task & outcome");
        metrics::register_counter!(METRIC_RECONCILE_REQUEUES, metrics::Unit::Count, "failed scheduler tasks rescheduled for a retry");
        metrics::register_counter!(METRIC_WATCHER_ERRORS, metrics::Unit::Count, "k8s watcher errors, by resource kind");
        let (scheduler_tasks_tx, scheduler_tasks_rx) = mpsc::channel(1000);
        Self {
            cluster: Arc::new(KubeClusterApi::new(client.clone())),
            client,
            config,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            scheduler_tasks_tx,
            scheduler_tasks_rx: ReceiverStream::new(scheduler_tasks_rx),
            graphs: Default::default(),
            deployments: Default::default(),
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        // Build watcher streams.
        let params_labels = ListParams {
            label_selector: Some(INFERENCE_GRAPH_LABEL_SELECTOR.into()),
            ..Default::default()
        };
        let graphs_watcher = watcher(self.api::<InferenceGraph>(), ListParams::default());
        let deployments_watcher = watcher(self.api::<Deployment>(), params_labels);
        tokio::pin!(graphs_watcher, deployments_watcher);

        tracing::info!(namespace = ?self.config.watch_namespace, "k8s controller initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = graphs_watcher.next() => self.handle_graph_event(k8s_event_res).await,
                Some(k8s_event_res) = deployments_watcher.next() => self.handle_deployment_event(k8s_event_res).await,
                Some(scheduler_task) = self.scheduler_tasks_rx.next() => self.handle_scheduler_task(scheduler_task).await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!("k8s controller shutdown");
        Ok(())
    }

    /// An API handle scoped to the watched namespace, or to all namespaces when none is configured.
    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<DynamicType = ()>,
    {
        match self.config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Spawn a task which emits a new scheduler tasks.
    ///
    /// This indirection is used to ensure that we don't use an unlimited amount of memory with an
    /// unbounded queue, and also so that we do not block the controller from making progress and
    /// dead-locking when we hit the scheduler task queue cap.
    fn spawn_scheduler_task(&self, task: SchedulerTask, is_retry: bool) {
        let tx = self.scheduler_tasks_tx.clone();
        if is_retry {
            metrics::increment_counter!(METRIC_RECONCILE_REQUEUES);
        }
        tokio::spawn(async move {
            if is_retry {
                tokio::time::sleep(RESCHEDULE_TIMEOUT).await;
            }
            let _res = tx.send(task).await;
        });
    }
}

/// The cache key of an object, `namespace/name`.
///
/// Returns `None` for objects without a name, which K8s never hands out.
fn object_key(meta: &ObjectMeta) -> Option<String> {
    let name = meta.name.as_deref()?;
    Some(format!("{}/{}", meta.namespace.as_deref().unwrap_or_default(), name))
}
