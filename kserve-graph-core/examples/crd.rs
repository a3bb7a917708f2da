//! A script used to generate the InferenceGraph CRD.
//!
//! Any time the CRD spec changes, this script can be run to ensure that the CRD is up-to-date and
//! ready to be synced with the cluster.

use anyhow::{Context, Result};
use kserve_graph_core::crd::InferenceGraph;
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("deploy").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating CRD dir {:?}", &crds_path))?;

    let graph = InferenceGraph::crd();
    let graph_yaml = serde_yaml::to_string(&graph).context("error serializing InferenceGraph CRD to yaml")?;
    std::fs::write(crds_path.join("inferencegraph.yaml"), &graph_yaml).with_context(|| format!("error writing InferenceGraph CRD to {:?}", &crds_path))?;
    println!("InferenceGraph CRD written to {:?}", &crds_path);

    Ok(())
}
