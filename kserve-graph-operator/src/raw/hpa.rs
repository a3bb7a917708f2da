//! HorizontalPodAutoscaler synthesis & reconciliation.
//!
//! Components left to the default `hpa` autoscaler class get an HPA scaling their head Deployment.
//! Under any other class the HPA is removed, as replicas are owned elsewhere.

use k8s_openapi::api::autoscaling::v2beta2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec, MetricSpec, MetricTarget, ResourceMetricSource,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{json, Value};

use kserve_graph_core::constants::AUTOSCALER_CLASS_ANNOTATION;
use kserve_graph_core::crd::{AutoscalerClass, ComponentExtensionSpec, ScaleMetric};
use kserve_graph_core::patch::StrategicPatch;
use kserve_graph_core::GraphResult;

use crate::k8s::ClusterApi;
use crate::raw::deployment::{meta_annotation, ComponentSpec};

pub const DEFAULT_MIN_REPLICAS: i32 = 1;
pub const DEFAULT_UTILIZATION_TARGET: i32 = 80;
const RESOURCE_METRIC: &str = "Resource";
const UTILIZATION_TARGET: &str = "Utilization";

/// Reconciles the HorizontalPodAutoscaler of a component.
#[derive(Clone, Debug)]
pub struct HpaReconciler {
    hpa: HorizontalPodAutoscaler,
    class: AutoscalerClass,
}

impl HpaReconciler {
    /// Create a new instance.
    pub fn new(component: &ComponentSpec) -> Self {
        Self {
            hpa: build_hpa(&component.meta, &component.extension),
            class: AutoscalerClass::from_annotation(meta_annotation(&component.meta, AUTOSCALER_CLASS_ANNOTATION)),
        }
    }

    /// Create or patch the HPA, or delete it when the component is scaled by another autoscaler.
    #[tracing::instrument(level = "debug", skip(self, client))]
    pub async fn reconcile(&self, client: &dyn ClusterApi) -> GraphResult<Option<HorizontalPodAutoscaler>> {
        let name = self.hpa.metadata.name.as_deref().unwrap_or_default();
        let namespace = self.hpa.metadata.namespace.as_deref().unwrap_or_default();
        if self.class != AutoscalerClass::Hpa {
            tracing::debug!(hpa = name, namespace, class = ?self.class, "component is not scaled by an hpa");
            client.delete_hpa(namespace, name).await?;
            return Ok(None);
        }
        let live = match client.get_hpa(namespace, name).await? {
            Some(live) => live,
            None => {
                tracing::info!(hpa = name, namespace, "creating hpa");
                return client.create_hpa(&self.hpa).await.map(Some);
            }
        };

        let patch = StrategicPatch::replace(&patch_view(&live)?, &patch_view(&self.hpa)?)?;
        if patch.is_empty() {
            tracing::debug!(hpa = name, namespace, "hpa unchanged");
            return Ok(Some(live));
        }
        tracing::info!(hpa = name, namespace, "patching hpa");
        client.patch_hpa(namespace, name, &patch.into_value()).await.map(Some)
    }
}

/// Build the HPA scaling the head Deployment of a component.
///
/// `maxReplicas` never drops below `minReplicas`. Concurrency & RPS are served by Knative
/// autoscaling, so raw components asking for them are scaled on CPU instead.
pub fn build_hpa(meta: &ObjectMeta, ext: &ComponentExtensionSpec) -> HorizontalPodAutoscaler {
    let name = meta.name.clone().unwrap_or_default();
    let min_replicas = ext.min_replicas.filter(|min| *min > 0).unwrap_or(DEFAULT_MIN_REPLICAS);
    let max_replicas = ext.max_replicas.unwrap_or(min_replicas).max(min_replicas);
    let resource = match ext.scale_metric {
        None | Some(ScaleMetric::Cpu) => "cpu",
        Some(ScaleMetric::Memory) => "memory",
        Some(metric) => {
            tracing::warn!(hpa = %name, ?metric, "metric is not supported by the hpa, scaling on cpu");
            "cpu"
        }
    };
    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: meta.namespace.clone(),
            labels: meta.labels.clone(),
            owner_references: meta.owner_references.clone(),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".into()),
                kind: "Deployment".into(),
                name,
            },
            min_replicas: Some(min_replicas),
            max_replicas,
            metrics: Some(vec![MetricSpec {
                type_: RESOURCE_METRIC.into(),
                resource: Some(ResourceMetricSource {
                    name: resource.into(),
                    target: MetricTarget {
                        type_: UTILIZATION_TARGET.into(),
                        average_utilization: Some(ext.scale_target.unwrap_or(DEFAULT_UTILIZATION_TARGET)),
                        ..Default::default()
                    },
                }),
                ..Default::default()
            }]),
            behavior: None,
        }),
        status: None,
    }
}

fn patch_view(hpa: &HorizontalPodAutoscaler) -> GraphResult<Value> {
    let meta = &hpa.metadata;
    Ok(json!({
        "metadata": {
            "labels": meta.labels,
            "ownerReferences": meta.owner_references,
        },
        "spec": serde_json::to_value(&hpa.spec)?,
    }))
}
