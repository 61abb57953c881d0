//! Static topology from configured addresses

use super::node::{Instance, Node, Topology};
use super::Discoverer;
use crate::config::DeploymentMode;
use crate::utils::{Result, TopologyError};

/// First address is the master, the rest are replicas. Nothing is probed.
pub struct StaticDiscoverer {
    mode: DeploymentMode,
    hosts: Vec<String>,
}

impl StaticDiscoverer {
    pub fn new(mode: DeploymentMode, hosts: Vec<String>) -> Self {
        Self { mode, hosts }
    }
}

impl Discoverer for StaticDiscoverer {
    fn mode(&self) -> DeploymentMode {
        self.mode
    }

    fn discover(&mut self) -> Result<Topology> {
        let (master, replicas) = self
            .hosts
            .split_first()
            .ok_or(TopologyError::NoHosts("static"))?;
        let replicas = replicas.iter().map(|addr| Node::replica(addr)).collect();
        Ok(Topology::new(
            self.mode,
            vec![Instance::new(Node::master(master), replicas)],
        ))
    }
}
