//! Auth resources of graphs: the token reviewing ServiceAccount & its ClusterRoleBinding.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use kserve_graph_core::constants::{graph_auth_service_account, GRAPH_AUTH_CRB_NAME};
use kserve_graph_core::GraphResult;

use crate::k8s::ClusterApi;

const AUTH_DELEGATOR_ROLE: &str = "system:auth-delegator";
const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const KIND_CLUSTER_ROLE: &str = "ClusterRole";
const KIND_SERVICE_ACCOUNT: &str = "ServiceAccount";

/// Converge the auth resources of a graph.
///
/// With auth enabled the graph's ServiceAccount is applied & bound to the auth delegator role.
/// Otherwise both are removed.
#[tracing::instrument(level = "debug", skip(client, owner))]
pub async fn reconcile_auth_resources(client: &dyn ClusterApi, namespace: &str, graph: &str, enabled: bool, owner: Option<OwnerReference>) -> GraphResult<()> {
    if !enabled {
        return remove_auth_resources(client, namespace, graph).await;
    }
    let account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(graph_auth_service_account(graph)),
            namespace: Some(namespace.into()),
            owner_references: owner.map(|owner| vec![owner]),
            ..Default::default()
        },
        ..Default::default()
    };
    client.apply_service_account(&account).await?;
    add_auth_privileges(client, namespace, graph).await
}

/// Remove the auth resources of a graph, tolerating their absence.
#[tracing::instrument(level = "debug", skip(client))]
pub async fn remove_auth_resources(client: &dyn ClusterApi, namespace: &str, graph: &str) -> GraphResult<()> {
    remove_auth_privileges(client, namespace, graph).await?;
    client.delete_service_account(namespace, &graph_auth_service_account(graph)).await
}

async fn add_auth_privileges(client: &dyn ClusterApi, namespace: &str, graph: &str) -> GraphResult<()> {
    let subject = service_account_subject(namespace, graph);
    let mut binding = match client.get_cluster_role_binding(GRAPH_AUTH_CRB_NAME).await? {
        Some(binding) => binding,
        None => {
            tracing::info!(binding = GRAPH_AUTH_CRB_NAME, "creating auth cluster role binding");
            return client.create_cluster_role_binding(&auth_cluster_role_binding(vec![subject])).await;
        }
    };
    let subjects = binding.subjects.get_or_insert_with(Vec::new);
    if subjects.iter().any(|existing| is_same_subject(existing, &subject)) {
        return Ok(());
    }
    subjects.push(subject);
    tracing::info!(binding = GRAPH_AUTH_CRB_NAME, namespace, graph, "binding auth privileges to graph service account");
    client.replace_cluster_role_binding(&binding).await
}

async fn remove_auth_privileges(client: &dyn ClusterApi, namespace: &str, graph: &str) -> GraphResult<()> {
    let mut binding = match client.get_cluster_role_binding(GRAPH_AUTH_CRB_NAME).await? {
        Some(binding) => binding,
        None => return Ok(()),
    };
    let subject = service_account_subject(namespace, graph);
    let subjects = binding.subjects.get_or_insert_with(Vec::new);
    let pos = match subjects.iter().position(|existing| is_same_subject(existing, &subject)) {
        Some(pos) => pos,
        None => return Ok(()),
    };
    subjects.swap_remove(pos);
    tracing::info!(binding = GRAPH_AUTH_CRB_NAME, namespace, graph, "removing auth privileges from graph service account");
    client.replace_cluster_role_binding(&binding).await
}

/// The ClusterRoleBinding granting token review rights to the given subjects.
pub fn auth_cluster_role_binding(subjects: Vec<Subject>) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(GRAPH_AUTH_CRB_NAME.into()),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.into(),
            kind: KIND_CLUSTER_ROLE.into(),
            name: AUTH_DELEGATOR_ROLE.into(),
        },
        subjects: Some(subjects),
    }
}

fn service_account_subject(namespace: &str, graph: &str) -> Subject {
    Subject {
        api_group: None,
        kind: KIND_SERVICE_ACCOUNT.into(),
        name: graph_auth_service_account(graph),
        namespace: Some(namespace.into()),
    }
}

fn is_same_subject(a: &Subject, b: &Subject) -> bool {
    a.kind == b.kind && a.name == b.name && a.namespace == b.namespace
}
