//! Cluster topology discovery
//!
//! Masters come from CLUSTER NODES on the seed client. Each master is then
//! asked for its own id and its replicas are listed with CLUSTER REPLICAS
//! (CLUSTER SLAVES on servers that predate it).

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::node::{Instance, Node, Role, Topology};
use super::Discoverer;
use crate::client::{ClusterConnection, ControlPlane, ControlPlaneExt, NodeConnector};
use crate::config::DeploymentMode;
use crate::utils::{RespValue, Result, TopologyError};

/// One parsed line of CLUSTER NODES / CLUSTER REPLICAS output
///
/// Format: `<id> <ip:port@cport> <flags> <master> <ping-sent> <pong-recv> <config-epoch> <link-state> [<slot> ...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterNodeLine {
    pub id: String,
    pub address: String,
    pub flags: Vec<String>,
    pub link_state: String,
}

impl ClusterNodeLine {
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    /// A master that is neither failed nor missing an address
    pub fn is_live_master(&self) -> bool {
        self.has_flag("master") && !self.has_flag("fail") && !self.has_flag("noaddr")
    }
}

/// Parse a CLUSTER NODES line (8 or more fields)
pub fn parse_cluster_node_line(line: &str) -> Option<ClusterNodeLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 8 {
        return None;
    }
    build_line(&parts)
}

/// Parse a CLUSTER REPLICAS line, which carries exactly 8 fields
pub fn parse_replica_line(line: &str) -> Option<ClusterNodeLine> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 8 {
        return None;
    }
    build_line(&parts)
}

fn build_line(parts: &[&str]) -> Option<ClusterNodeLine> {
    let address = node_address(parts[1])?;
    Some(ClusterNodeLine {
        id: parts[0].to_string(),
        address,
        flags: parts[2].split(',').map(String::from).collect(),
        link_state: parts[7].to_string(),
    })
}

/// "host:port@cport" or "host:port@cport,hostname" -> "host:port"
fn node_address(field: &str) -> Option<String> {
    let field = field.split(',').next().unwrap_or(field);
    let host_port = field.split('@').next().unwrap_or(field);
    let (host, port) = host_port.rsplit_once(':')?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return None;
    }
    Some(host_port.to_string())
}

pub struct ClusterDiscoverer {
    client: ClusterConnection,
    connector: Arc<dyn NodeConnector>,
}

impl ClusterDiscoverer {
    pub fn new(seeds: Vec<String>, connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            client: ClusterConnection::new(seeds, connector.clone()),
            connector,
        }
    }

    fn reported_masters(&mut self) -> Result<Vec<String>> {
        let payload = self.client.cluster_nodes()?;
        let mut masters = Vec::new();
        for line in payload.lines().filter(|l| !l.trim().is_empty()) {
            match parse_cluster_node_line(line) {
                Some(node) if node.is_live_master() => masters.push(node.address),
                Some(_) => {}
                None => warn!("malformed CLUSTER NODES line dropped: {:?}", line),
            }
        }
        Ok(masters)
    }

    fn check_cluster_state(&mut self) {
        match self.client.cluster_info() {
            Ok(info) => {
                let state = info
                    .lines()
                    .find_map(|l| l.trim().strip_prefix("cluster_state:"))
                    .unwrap_or("unknown");
                if state != "ok" {
                    warn!("cluster_state is {} on {}", state, self.client.address());
                }
            }
            Err(e) => warn!("CLUSTER INFO failed: {}", e),
        }
    }

    fn replicas_of(&self, master: &str) -> Vec<Node> {
        let mut conn = match self.connector.connect(master) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("master {} unreachable, kept without replicas: {}", master, e);
                return Vec::new();
            }
        };
        let replicas = match own_node_id(conn.as_mut(), master) {
            Some(id) => list_replicas(conn.as_mut(), &id),
            None => {
                warn!("node id of master {} not found, kept without replicas", master);
                Vec::new()
            }
        };
        conn.close().ok();
        replicas
    }
}

fn own_node_id(conn: &mut dyn ControlPlane, master: &str) -> Option<String> {
    let payload = match conn.cluster_nodes() {
        Ok(p) => p,
        Err(e) => {
            warn!("CLUSTER NODES on {} failed: {}", master, e);
            return None;
        }
    };
    payload
        .lines()
        .filter(|l| l.contains("myself"))
        .filter_map(parse_cluster_node_line)
        .find(|n| n.address == master)
        .map(|n| n.id)
}

fn list_replicas(conn: &mut dyn ControlPlane, master_id: &str) -> Vec<Node> {
    let reply = match conn.execute(&["CLUSTER", "REPLICAS", master_id]) {
        Ok(reply) if !reply.is_error() => reply,
        _ => {
            debug!("CLUSTER REPLICAS {} unavailable, trying CLUSTER SLAVES", master_id);
            match conn.execute(&["CLUSTER", "SLAVES", master_id]) {
                Ok(reply) if !reply.is_error() => reply,
                Ok(reply) => {
                    warn!("CLUSTER SLAVES {} failed: {}", master_id, reply.describe());
                    return Vec::new();
                }
                Err(e) => {
                    warn!("CLUSTER SLAVES {} failed: {}", master_id, e);
                    return Vec::new();
                }
            }
        }
    };

    let lines: Vec<String> = match &reply {
        RespValue::Array(items) => items.iter().filter_map(RespValue::to_text).collect(),
        other => other
            .to_text()
            .map(|t| t.lines().map(String::from).collect())
            .unwrap_or_default(),
    };

    lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|line| match parse_replica_line(line) {
            Some(r) => Some(Node::new(Role::Replica, &r.address, Some(&r.id))),
            None => {
                warn!("malformed replica line dropped: {:?}", line);
                None
            }
        })
        .collect()
}

impl Discoverer for ClusterDiscoverer {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Cluster
    }

    fn discover(&mut self) -> Result<Topology> {
        let masters = self.reported_masters()?;
        self.check_cluster_state();
        if masters.is_empty() {
            return Err(TopologyError::NoMasters.into());
        }

        let instances = masters
            .iter()
            .map(|addr| Instance::new(Node::master(addr), self.replicas_of(addr)))
            .collect();
        let topology = Topology::new(DeploymentMode::Cluster, instances);
        info!(
            "cluster discovery found {} masters via {}",
            topology.master_count(),
            self.client.address()
        );
        Ok(topology)
    }

    fn close(&mut self) {
        self.client.close().ok();
    }
}
