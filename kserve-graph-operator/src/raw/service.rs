//! Service synthesis & reconciliation.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use maplit::btreemap;
use serde_json::{json, Value};

use kserve_graph_core::constants::{
    raw_service_label, serving_cert_secret, APP_LABEL, DEFAULT_HTTP_PORT, GRAPH_SERVICE_PORT, INFERENCE_SERVICE_CONTAINER_NAME,
    OPENSHIFT_SERVING_CERT_ANNOTATION,
};
use kserve_graph_core::crd::ResourceType;
use kserve_graph_core::patch::StrategicPatch;
use kserve_graph_core::GraphResult;

use crate::k8s::ClusterApi;
use crate::raw::deployment::ComponentSpec;

const HTTP_SERVICE_PORT: i32 = 80;
const TCP: &str = "TCP";

/// Reconciles the Service fronting the head Deployment of a component.
#[derive(Clone, Debug)]
pub struct ServiceReconciler {
    service: Service,
}

impl ServiceReconciler {
    /// Create a new instance.
    pub fn new(component: &ComponentSpec) -> Self {
        Self {
            service: build_service(component),
        }
    }

    /// Create the Service, or patch the fields which differ from the live object.
    #[tracing::instrument(level = "debug", skip(self, client))]
    pub async fn reconcile(&self, client: &dyn ClusterApi) -> GraphResult<Service> {
        let name = self.service.metadata.name.as_deref().unwrap_or_default();
        let namespace = self.service.metadata.namespace.as_deref().unwrap_or_default();
        let live = match client.get_service(namespace, name).await? {
            Some(live) => live,
            None => {
                tracing::info!(service = name, namespace, "creating service");
                return client.create_service(&self.service).await;
            }
        };

        let patch = StrategicPatch::diff(&patch_view(&live)?, &patch_view(&self.service)?)?;
        if patch.is_empty() {
            tracing::debug!(service = name, namespace, "service unchanged");
            return Ok(live);
        }
        tracing::info!(service = name, namespace, "patching service");
        client.patch_service(namespace, name, &patch.into_value()).await
    }
}

/// Build the Service of a component.
///
/// Graph Services expose the router over HTTPS with a serving certificate minted for them.
pub fn build_service(component: &ComponentSpec) -> Service {
    let meta = &component.meta;
    let name = meta.name.as_deref().unwrap_or_default();
    let app = raw_service_label(name);
    let mut labels = meta.labels.clone().unwrap_or_default();
    labels.insert(APP_LABEL.into(), app.clone());
    let mut annotations: BTreeMap<String, String> = meta.annotations.clone().unwrap_or_default();

    let port = match component.resource_type {
        ResourceType::InferenceGraph => {
            annotations.insert(OPENSHIFT_SERVING_CERT_ANNOTATION.into(), serving_cert_secret(name));
            ServicePort {
                name: Some("https".into()),
                port: GRAPH_SERVICE_PORT,
                target_port: Some(IntOrString::Int(DEFAULT_HTTP_PORT)),
                protocol: Some(TCP.into()),
                ..Default::default()
            }
        }
        ResourceType::InferenceService => {
            let target = component
                .pod_spec
                .containers
                .iter()
                .find(|container| container.name == INFERENCE_SERVICE_CONTAINER_NAME)
                .and_then(|container| container.ports.as_ref())
                .and_then(|ports| ports.first())
                .map(|port| port.container_port)
                .unwrap_or(DEFAULT_HTTP_PORT);
            ServicePort {
                name: Some("http".into()),
                port: HTTP_SERVICE_PORT,
                target_port: Some(IntOrString::Int(target)),
                protocol: Some(TCP.into()),
                ..Default::default()
            }
        }
    };

    Service {
        metadata: ObjectMeta {
            name: meta.name.clone(),
            namespace: meta.namespace.clone(),
            labels: Some(labels),
            annotations: Some(annotations),
            owner_references: meta.owner_references.clone(),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(btreemap! { APP_LABEL.to_string() => app }),
            ports: Some(vec![port]),
            ..Default::default()
        }),
        status: None,
    }
}

fn patch_view(service: &Service) -> GraphResult<Value> {
    let meta = &service.metadata;
    Ok(json!({
        "metadata": {
            "labels": meta.labels,
            "annotations": meta.annotations,
            "ownerReferences": meta.owner_references,
        },
        "spec": serde_json::to_value(&service.spec)?,
    }))
}
