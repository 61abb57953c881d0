//! Topology model: nodes, instances and the deployment-wide topology

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use tracing::{debug, warn};

use super::detector::TopologySnapshot;
use crate::client::{ControlPlane, NodeConnector};
use crate::config::DeploymentMode;
use crate::utils::ConnectionError;

/// Node role within an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Replica,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "replica",
        }
    }
}

/// One Redis server. Identity is the address.
pub struct Node {
    pub role: Role,
    pub address: String,
    pub host: String,
    /// Cluster node id, sentinel runid, or the address when neither is known
    pub id: String,
    client: Option<Box<dyn ControlPlane>>,
}

impl Node {
    pub fn new(role: Role, address: &str, id: Option<&str>) -> Self {
        let host = match address.rsplit_once(':') {
            Some((host, _)) => host.trim_start_matches('[').trim_end_matches(']').to_string(),
            None => address.to_string(),
        };
        Self {
            role,
            address: address.to_string(),
            host,
            id: id.filter(|s| !s.is_empty()).unwrap_or(address).to_string(),
            client: None,
        }
    }

    pub fn master(address: &str) -> Self {
        Self::new(Role::Master, address, None)
    }

    pub fn replica(address: &str) -> Self {
        Self::new(Role::Replica, address, None)
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Open the node's connection if it is not already open
    pub fn connect(&mut self, connector: &dyn NodeConnector) -> Result<(), ConnectionError> {
        if self.client.is_none() {
            self.client = Some(connector.connect(&self.address)?);
        }
        Ok(())
    }

    pub fn attach(&mut self, client: Box<dyn ControlPlane>) {
        self.close();
        self.client = Some(client);
    }

    pub fn client_mut(&mut self) -> Option<&mut (dyn ControlPlane + 'static)> {
        self.client.as_deref_mut()
    }

    /// Close the connection; later calls are no-ops
    pub fn close(&mut self) {
        if let Some(mut client) = self.client.take() {
            if let Err(e) = client.close() {
                debug!("closing {} failed: {}", self.address, e);
            }
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("role", &self.role)
            .field("address", &self.address)
            .field("id", &self.id)
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// Which node of an instance a collection pass talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveNode {
    Master,
    Replica(usize),
}

/// A master plus its ordered replicas
#[derive(Debug)]
pub struct Instance {
    pub master: Node,
    pub replicas: Vec<Node>,
    active: Option<ActiveNode>,
}

impl Instance {
    pub fn new(master: Node, replicas: Vec<Node>) -> Self {
        Self {
            master,
            replicas,
            active: None,
        }
    }

    /// Select the node for the current pass; out-of-range replicas are rejected
    pub fn select(&mut self, active: ActiveNode) -> bool {
        if let ActiveNode::Replica(idx) = active {
            if idx >= self.replicas.len() {
                return false;
            }
        }
        self.active = Some(active);
        true
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<ActiveNode> {
        self.active
    }

    pub fn active_node(&self) -> Option<&Node> {
        match self.active? {
            ActiveNode::Master => Some(&self.master),
            ActiveNode::Replica(idx) => self.replicas.get(idx),
        }
    }

    fn active_node_mut(&mut self) -> Option<&mut Node> {
        match self.active? {
            ActiveNode::Master => Some(&mut self.master),
            ActiveNode::Replica(idx) => self.replicas.get_mut(idx),
        }
    }

    pub fn active_client_mut(&mut self) -> Option<&mut (dyn ControlPlane + 'static)> {
        self.active_node_mut()?.client_mut()
    }

    /// Dial the active node again if its connection was dropped
    pub fn connect_active(&mut self, connector: &dyn NodeConnector) -> Result<(), ConnectionError> {
        match self.active_node_mut() {
            Some(node) => node.connect(connector),
            None => Ok(()),
        }
    }

    /// Close the active node's connection; the next `connect_active` dials anew
    pub fn drop_active_client(&mut self) {
        if let Some(node) = self.active_node_mut() {
            node.close();
        }
    }

    /// Connect master and replicas; an unreachable replica is left unconnected
    pub fn connect_all(&mut self, connector: &dyn NodeConnector) -> Result<(), ConnectionError> {
        self.master.connect(connector)?;
        for replica in &mut self.replicas {
            if let Err(e) = replica.connect(connector) {
                warn!("replica {} unreachable, ignored: {}", replica.address, e);
            }
        }
        Ok(())
    }

    pub fn close_all(&mut self) {
        self.active = None;
        self.master.close();
        for replica in &mut self.replicas {
            replica.close();
        }
    }

    pub fn replica_addresses(&self) -> BTreeSet<String> {
        self.replicas.iter().map(|r| r.address.clone()).collect()
    }
}

/// Every instance of one deployment
#[derive(Debug)]
pub struct Topology {
    pub mode: DeploymentMode,
    pub instances: Vec<Instance>,
}

impl Topology {
    /// Build a topology, dropping instances whose master address repeats
    pub fn new(mode: DeploymentMode, instances: Vec<Instance>) -> Self {
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(instances.len());
        for mut instance in instances {
            if seen.insert(instance.master.address.clone()) {
                kept.push(instance);
            } else {
                warn!("duplicate master {} dropped", instance.master.address);
                instance.close_all();
            }
        }
        Self {
            mode,
            instances: kept,
        }
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let masters: BTreeMap<String, BTreeSet<String>> = self
            .instances
            .iter()
            .map(|i| (i.master.address.clone(), i.replica_addresses()))
            .collect();
        TopologySnapshot {
            mode: self.mode,
            masters,
        }
    }

    /// Connect every instance; instances whose master is unreachable are dropped
    pub fn connect_all(&mut self, connector: &dyn NodeConnector) -> usize {
        let mut connected = 0;
        self.instances.retain_mut(|instance| match instance.connect_all(connector) {
            Ok(()) => {
                connected += 1;
                true
            }
            Err(e) => {
                warn!("master {} unreachable, instance skipped: {}", instance.master.address, e);
                instance.close_all();
                false
            }
        });
        connected
    }

    pub fn close_all(&mut self) {
        for instance in &mut self.instances {
            instance.close_all();
        }
    }

    pub fn master_count(&self) -> usize {
        self.instances.len()
    }
}
