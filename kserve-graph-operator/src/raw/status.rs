//! Propagation of Deployment status onto graph status.

use derive_more::Display;
use k8s_openapi::api::apps::v1::Deployment;

use kserve_graph_core::crd::{Condition, InferenceGraphStatus, CONDITION_READY};

use crate::config::StatusPropagation;

/// The type of a Deployment condition.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum DeploymentConditionKind {
    Available,
    Progressing,
    ReplicaFailure,
    #[display(fmt = "{}", _0)]
    Other(String),
}

impl From<&str> for DeploymentConditionKind {
    fn from(val: &str) -> Self {
        match val {
            "Available" => Self::Available,
            "Progressing" => Self::Progressing,
            "ReplicaFailure" => Self::ReplicaFailure,
            other => Self::Other(other.into()),
        }
    }
}

/// The status of a condition.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl From<&str> for ConditionStatus {
    fn from(val: &str) -> Self {
        match val {
            "True" => Self::True,
            "False" => Self::False,
            _ => Self::Unknown,
        }
    }
}

/// A typed Deployment condition.
#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentCondition {
    pub kind: DeploymentConditionKind,
    pub status: ConditionStatus,
    pub reason: Option<String>,
    pub message: Option<String>,
}

/// The conditions reported by the given Deployment.
pub fn deployment_conditions(deployment: &Deployment) -> Vec<DeploymentCondition> {
    deployment
        .status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .map(|cond| DeploymentCondition {
                    kind: cond.type_.as_str().into(),
                    status: cond.status.as_str().into(),
                    reason: cond.reason.clone(),
                    message: cond.message.clone(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Propagate the status of a graph's Deployment onto the graph's status.
///
/// Nothing but the observed generation changes until the Deployment reports an Available
/// condition. With `StatusPropagation::Presence` the graph is then Ready no matter the status of
/// that condition, with `StatusPropagation::Status` Ready mirrors it.
pub fn propagate_raw_status(status: &mut InferenceGraphStatus, deployment: &Deployment, url: &str, mode: StatusPropagation) {
    let available = deployment_conditions(deployment)
        .into_iter()
        .find(|cond| cond.kind == DeploymentConditionKind::Available);
    if let Some(available) = available {
        status.url = Some(url.into());
        let healthy = available.status == ConditionStatus::True;
        let ready = match mode {
            StatusPropagation::Presence => Condition {
                type_: CONDITION_READY.into(),
                status: ConditionStatus::True.to_string(),
                ..Default::default()
            },
            StatusPropagation::Status => Condition {
                type_: CONDITION_READY.into(),
                status: available.status.to_string(),
                reason: available.reason.filter(|_| !healthy),
                message: available.message.filter(|_| !healthy),
                ..Default::default()
            },
        };
        set_condition_now(status, ready);
    }
    status.observed_generation = deployment.status.as_ref().and_then(|status| status.observed_generation);
}

/// Set the given condition, stamping it with the current time when its status changes.
pub fn set_condition_now(status: &mut InferenceGraphStatus, mut condition: Condition) {
    condition.last_transition_time = Some(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true));
    status.set_condition(condition);
}

#[cfg(test)]
mod test {
    use k8s_openapi::api::apps::v1::{DeploymentCondition as K8sCondition, DeploymentStatus};

    use super::*;

    fn deployment_with(conditions: Vec<(&str, &str)>, generation: i64) -> Deployment {
        Deployment {
            status: Some(DeploymentStatus {
                observed_generation: Some(generation),
                conditions: Some(
                    conditions
                        .into_iter()
                        .map(|(type_, status)| K8sCondition {
                            type_: type_.into(),
                            status: status.into(),
                            reason: Some("MinimumReplicasUnavailable".into()),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn available_presence_marks_graph_ready() {
        let mut status = InferenceGraphStatus::default();
        let deployment = deployment_with(vec![("Progressing", "True"), ("Available", "False")], 3);

        propagate_raw_status(&mut status, &deployment, "https://g.ns.svc.cluster.local", StatusPropagation::Presence);

        let ready = status.condition(CONDITION_READY).map(|cond| cond.status.as_str());
        assert!(ready == Some("True"), "expected Ready=True got {:?}", ready);
        assert_eq!(status.url.as_deref(), Some("https://g.ns.svc.cluster.local"));
        assert_eq!(status.observed_generation, Some(3));
    }

    #[test]
    fn available_status_is_mirrored_when_requested() {
        let mut status = InferenceGraphStatus::default();
        let deployment = deployment_with(vec![("Available", "False")], 1);

        propagate_raw_status(&mut status, &deployment, "https://g.ns.svc.cluster.local", StatusPropagation::Status);

        let ready = status.condition(CONDITION_READY);
        assert!(ready.map(|cond| cond.status.as_str()) == Some("False"), "expected Ready=False got {:?}", ready);
        assert_eq!(ready.and_then(|cond| cond.reason.as_deref()), Some("MinimumReplicasUnavailable"));
    }

    #[test]
    fn missing_available_only_copies_generation() {
        let mut status = InferenceGraphStatus::default();
        let deployment = deployment_with(vec![("Progressing", "True")], 7);

        propagate_raw_status(&mut status, &deployment, "https://g.ns.svc.cluster.local", StatusPropagation::Presence);

        assert!(status.conditions.is_empty(), "expected no conditions got {:?}", status.conditions);
        assert!(status.url.is_none(), "expected no url got {:?}", status.url);
        assert_eq!(status.observed_generation, Some(7));
    }

    #[test]
    fn condition_kinds_parse_and_display() {
        assert_eq!(DeploymentConditionKind::from("Available"), DeploymentConditionKind::Available);
        assert_eq!(DeploymentConditionKind::from("Paused").to_string(), "Paused");
        assert_eq!(ConditionStatus::from("bogus"), ConditionStatus::Unknown);
    }
}
