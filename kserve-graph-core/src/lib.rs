pub mod configmap;
pub mod constants;
pub mod crd;
pub mod diff;
pub mod error;
pub mod patch;
pub mod quantity;

pub use error::{GraphError, GraphResult};

/// Label selector matching every Deployment & Service owned by an InferenceGraph.
pub const INFERENCE_GRAPH_LABEL_SELECTOR: &str = constants::INFERENCE_GRAPH_LABEL;
