//! Topology change detection
//!
//! The detector re-runs discovery and compares the candidate against a
//! snapshot of the live topology. It never touches the live topology itself;
//! the supervisor decides what to do with a changed candidate.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::{debug, info};

use super::node::Topology;
use super::Discoverer;
use crate::config::DeploymentMode;
use crate::utils::Result;

/// Master address -> replica addresses, compared by set equality
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub mode: DeploymentMode,
    pub masters: BTreeMap<String, BTreeSet<String>>,
}

impl TopologySnapshot {
    pub fn master_set(&self) -> BTreeSet<String> {
        self.masters.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    MasterCountChanged,
    MasterNodesChanged,
    ReplicaCountChanged,
    ReplicaNodesChanged,
    MasterFailover,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::MasterCountChanged => "master_count_changed",
            ChangeType::MasterNodesChanged => "master_nodes_changed",
            ChangeType::ReplicaCountChanged => "replica_count_changed",
            ChangeType::ReplicaNodesChanged => "replica_nodes_changed",
            ChangeType::MasterFailover => "master_failover",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub message: String,
    pub mode: DeploymentMode,
    pub change_type: ChangeType,
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl ChangeEvent {
    fn between(
        mode: DeploymentMode,
        change_type: ChangeType,
        message: String,
        old: &BTreeSet<String>,
        new: &BTreeSet<String>,
    ) -> Self {
        Self {
            message,
            mode,
            change_type,
            added: new.difference(old).cloned().collect(),
            removed: old.difference(new).cloned().collect(),
        }
    }
}

/// Outcome of one detector tick
#[derive(Debug)]
pub struct ChangeReport {
    pub changed: bool,
    pub event: Option<ChangeEvent>,
    /// Freshly discovered topology, unconnected; present only when changed
    pub candidate: Option<Topology>,
}

/// First difference between two snapshots, if any
pub fn diff(old: &TopologySnapshot, new: &TopologySnapshot) -> Option<ChangeEvent> {
    match new.mode {
        DeploymentMode::Cluster => diff_cluster(old, new),
        DeploymentMode::Sentinel => diff_sentinel(old, new),
        DeploymentMode::Standalone | DeploymentMode::MasterSlave => None,
    }
}

fn diff_cluster(old: &TopologySnapshot, new: &TopologySnapshot) -> Option<ChangeEvent> {
    let mode = DeploymentMode::Cluster;
    let (old_masters, new_masters) = (old.master_set(), new.master_set());

    if old_masters.len() != new_masters.len() {
        return Some(ChangeEvent::between(
            mode,
            ChangeType::MasterCountChanged,
            format!(
                "cluster master count changed from {} to {}",
                old_masters.len(),
                new_masters.len()
            ),
            &old_masters,
            &new_masters,
        ));
    }
    if old_masters != new_masters {
        return Some(ChangeEvent::between(
            mode,
            ChangeType::MasterNodesChanged,
            "cluster master nodes changed".to_string(),
            &old_masters,
            &new_masters,
        ));
    }
    diff_replicas(mode, old, new)
}

fn diff_sentinel(old: &TopologySnapshot, new: &TopologySnapshot) -> Option<ChangeEvent> {
    let mode = DeploymentMode::Sentinel;
    let (old_masters, new_masters) = (old.master_set(), new.master_set());

    if old_masters != new_masters {
        let from = old_masters.iter().next().map(String::as_str).unwrap_or("none");
        let to = new_masters.iter().next().map(String::as_str).unwrap_or("none");
        return Some(ChangeEvent::between(
            mode,
            ChangeType::MasterFailover,
            format!("master failover from {} to {}", from, to),
            &old_masters,
            &new_masters,
        ));
    }
    diff_replicas(mode, old, new)
}

/// Replica comparison over masters present in both snapshots, in address order
fn diff_replicas(
    mode: DeploymentMode,
    old: &TopologySnapshot,
    new: &TopologySnapshot,
) -> Option<ChangeEvent> {
    if let Some((addr, old_r, new_r)) = shared_masters(old, new).find(|(_, o, n)| o.len() != n.len()) {
        return Some(ChangeEvent::between(
            mode,
            ChangeType::ReplicaCountChanged,
            format!(
                "replica count of master {} changed from {} to {}",
                addr,
                old_r.len(),
                new_r.len()
            ),
            old_r,
            new_r,
        ));
    }
    if let Some((addr, old_r, new_r)) = shared_masters(old, new).find(|(_, o, n)| o != n) {
        return Some(ChangeEvent::between(
            mode,
            ChangeType::ReplicaNodesChanged,
            format!("replica nodes of master {} changed", addr),
            old_r,
            new_r,
        ));
    }
    None
}

fn shared_masters<'a>(
    old: &'a TopologySnapshot,
    new: &'a TopologySnapshot,
) -> impl Iterator<Item = (&'a String, &'a BTreeSet<String>, &'a BTreeSet<String>)> + 'a {
    old.masters
        .iter()
        .filter_map(move |(addr, old_r)| new.masters.get(addr).map(|new_r| (addr, old_r, new_r)))
}

pub struct ChangeDetector {
    discoverer: Box<dyn Discoverer>,
}

impl ChangeDetector {
    pub fn new(discoverer: Box<dyn Discoverer>) -> Self {
        Self { discoverer }
    }

    pub fn mode(&self) -> DeploymentMode {
        self.discoverer.mode()
    }

    /// Run discovery for a fresh topology (used for setup as well as ticks)
    pub fn discover(&mut self) -> Result<Topology> {
        self.discoverer.discover()
    }

    /// One tick: discover and compare against the live snapshot
    pub fn check(&mut self, live: &TopologySnapshot) -> Result<ChangeReport> {
        let candidate = self.discoverer.discover()?;
        match diff(live, &candidate.snapshot()) {
            Some(event) => {
                info!(
                    "topology change detected ({}): {}",
                    event.change_type, event.message
                );
                Ok(ChangeReport {
                    changed: true,
                    event: Some(event),
                    candidate: Some(candidate),
                })
            }
            None => {
                debug!("{} topology unchanged", self.mode());
                Ok(ChangeReport {
                    changed: false,
                    event: None,
                    candidate: None,
                })
            }
        }
    }

    pub fn close(&mut self) {
        self.discoverer.close();
    }
}
