//! InferenceGraph error abstractions.

use thiserror::Error;

/// A result type where the error is a `GraphError`.
pub type GraphResult<T> = ::std::result::Result<T, GraphError>;

/// Error variants surfaced by graph synthesis & reconciliation.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The graph spec could not be encoded for the router.
    ///
    /// Not retryable until the graph spec is corrected.
    #[error("error serializing graph spec: {0}")]
    Serialization(String),
    /// External configuration is missing or malformed.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// A call against the cluster control plane failed.
    #[error("cluster API error while {action}: {source}")]
    ClusterApi {
        /// What was being attempted.
        action: String,
        #[source]
        source: kube::Error,
    },
    /// A patch document did not have the expected shape.
    #[error("error constructing patch: {0}")]
    PatchConstruction(String),
}

impl GraphError {
    /// Build a closure mapping a client error into a `ClusterApi` error for the given action.
    pub fn cluster_api(action: impl Into<String>) -> impl FnOnce(kube::Error) -> Self {
        let action = action.into();
        move |source| Self::ClusterApi { action, source }
    }

    /// Whether a reconcile which failed with this error may succeed when simply retried.
    ///
    /// Config errors clear once the ConfigMap is fixed, so they count as retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::ClusterApi { .. })
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
