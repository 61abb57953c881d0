//! Deployment topology: model, discovery and change detection

pub mod cluster;
pub mod detector;
pub mod node;
pub mod sentinel;
pub mod static_discovery;

use std::sync::Arc;

pub use cluster::ClusterDiscoverer;
pub use detector::{ChangeDetector, ChangeEvent, ChangeReport, ChangeType, TopologySnapshot};
pub use node::{ActiveNode, Instance, Node, Role, Topology};
pub use sentinel::SentinelDiscoverer;
pub use static_discovery::StaticDiscoverer;

use crate::client::NodeConnector;
use crate::config::{DeploymentConfig, DeploymentMode};
use crate::utils::{Result, TopologyError};

/// A strategy that produces a fresh topology on every call
pub trait Discoverer: Send {
    fn mode(&self) -> DeploymentMode;

    fn discover(&mut self) -> Result<Topology>;

    /// Release any long-lived seed connection
    fn close(&mut self) {}
}

/// Pick the discoverer for a deployment
///
/// `nodes` connects to data nodes, `sentinels` to sentinel processes.
pub fn discoverer_for(
    config: &DeploymentConfig,
    nodes: Arc<dyn NodeConnector>,
    sentinels: Arc<dyn NodeConnector>,
) -> Result<Box<dyn Discoverer>> {
    match config.mode {
        DeploymentMode::Cluster => {
            if config.hosts.is_empty() {
                return Err(TopologyError::NoHosts("cluster").into());
            }
            Ok(Box::new(ClusterDiscoverer::new(config.hosts.clone(), nodes)))
        }
        DeploymentMode::Sentinel => {
            let sentinel = config
                .sentinel
                .as_ref()
                .filter(|s| !s.hosts.is_empty())
                .ok_or(TopologyError::NoHosts("sentinel"))?;
            Ok(Box::new(SentinelDiscoverer::new(
                sentinel.hosts.clone(),
                &sentinel.master_name,
                sentinels,
            )))
        }
        DeploymentMode::Standalone | DeploymentMode::MasterSlave => {
            if config.hosts.is_empty() {
                return Err(TopologyError::NoHosts("static").into());
            }
            Ok(Box::new(StaticDiscoverer::new(config.mode, config.hosts.clone())))
        }
    }
}
