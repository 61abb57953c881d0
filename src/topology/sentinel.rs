//! Sentinel topology discovery

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::node::{Instance, Node, Role, Topology};
use super::Discoverer;
use crate::client::{ControlPlane, NodeConnector};
use crate::config::DeploymentMode;
use crate::utils::{ProtocolError, RespValue, Result, TopologyError};

pub struct SentinelDiscoverer {
    sentinels: Vec<String>,
    master_name: String,
    connector: Arc<dyn NodeConnector>,
}

impl SentinelDiscoverer {
    pub fn new(sentinels: Vec<String>, master_name: &str, connector: Arc<dyn NodeConnector>) -> Self {
        Self {
            sentinels,
            master_name: master_name.to_string(),
            connector,
        }
    }

    fn first_reachable(&self) -> Result<Box<dyn ControlPlane>> {
        for addr in &self.sentinels {
            match self.connector.connect(addr) {
                Ok(conn) => return Ok(conn),
                Err(e) => warn!("sentinel {} unreachable: {}", addr, e),
            }
        }
        Err(TopologyError::NoSentinel(self.sentinels.clone()).into())
    }

    fn master_address(&self, conn: &mut dyn ControlPlane) -> Result<String> {
        let reply = conn.execute(&["SENTINEL", "get-master-addr-by-name", &self.master_name])?;
        let parts = match &reply {
            RespValue::Array(parts) if parts.len() == 2 => parts,
            RespValue::Null => {
                return Err(TopologyError::MasterUnresolved(self.master_name.clone()).into())
            }
            RespValue::Error(e) => return Err(ProtocolError::ServerError(e.clone()).into()),
            other => {
                return Err(ProtocolError::UnexpectedResponse {
                    command: "SENTINEL get-master-addr-by-name".to_string(),
                    actual: other.describe(),
                }
                .into())
            }
        };
        match (parts[0].to_text(), parts[1].to_text()) {
            (Some(ip), Some(port)) => Ok(format!("{}:{}", ip, port)),
            _ => Err(TopologyError::MasterUnresolved(self.master_name.clone()).into()),
        }
    }

    fn replicas(&self, conn: &mut dyn ControlPlane) -> Vec<Node> {
        let reply = match conn.execute(&["SENTINEL", "replicas", &self.master_name]) {
            Ok(reply) if !reply.is_error() => reply,
            _ => {
                debug!("SENTINEL replicas unavailable, trying SENTINEL slaves");
                match conn.execute(&["SENTINEL", "slaves", &self.master_name]) {
                    Ok(reply) if !reply.is_error() => reply,
                    Ok(reply) => {
                        warn!("SENTINEL slaves {} failed: {}", self.master_name, reply.describe());
                        return Vec::new();
                    }
                    Err(e) => {
                        warn!("SENTINEL slaves {} failed: {}", self.master_name, e);
                        return Vec::new();
                    }
                }
            }
        };

        let rows = match reply.as_array() {
            Some(rows) => rows,
            None => {
                warn!("unexpected SENTINEL replicas reply: {}", reply.describe());
                return Vec::new();
            }
        };
        rows.iter().filter_map(replica_from_row).collect()
    }
}

/// Flat [name, value, name, value, ...] row -> map
fn row_fields(row: &RespValue) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    if let Some(items) = row.as_array() {
        for pair in items.chunks(2) {
            if let [name, value] = pair {
                if let (Some(name), Some(value)) = (name.to_text(), value.to_text()) {
                    fields.insert(name, value);
                }
            }
        }
    }
    fields
}

/// Keep a replica row only when ip, port and flags are present and the flags carry no "down"
pub fn replica_from_row(row: &RespValue) -> Option<Node> {
    let fields = row_fields(row);
    let (ip, port, flags) = match (fields.get("ip"), fields.get("port"), fields.get("flags")) {
        (Some(ip), Some(port), Some(flags)) => (ip, port, flags),
        _ => {
            warn!("incomplete sentinel replica row dropped: {:?}", fields);
            return None;
        }
    };
    if flags.contains("down") {
        debug!("replica {}:{} is down ({}), skipped", ip, port, flags);
        return None;
    }
    let address = format!("{}:{}", ip, port);
    Some(Node::new(
        Role::Replica,
        &address,
        fields.get("runid").map(String::as_str),
    ))
}

impl Discoverer for SentinelDiscoverer {
    fn mode(&self) -> DeploymentMode {
        DeploymentMode::Sentinel
    }

    fn discover(&mut self) -> Result<Topology> {
        let mut conn = self.first_reachable()?;
        let result = self
            .master_address(conn.as_mut())
            .map(|master| (self.replicas(conn.as_mut()), master));
        conn.close().ok();

        let (replicas, master) = result?;
        info!(
            "sentinel resolved {} to master {} with {} replicas",
            self.master_name,
            master,
            replicas.len()
        );
        Ok(Topology::new(
            DeploymentMode::Sentinel,
            vec![Instance::new(Node::master(&master), replicas)],
        ))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::{FakeConnector, ScriptedNode};
    use crate::utils::MonitorError;

    pub(crate) fn bulk(s: &str) -> RespValue {
        RespValue::BulkString(s.as_bytes().to_vec())
    }

    pub(crate) fn row(pairs: &[(&str, &str)]) -> RespValue {
        RespValue::Array(
            pairs
                .iter()
                .flat_map(|(k, v)| [bulk(k), bulk(v)])
                .collect(),
        )
    }

    pub(crate) fn sentinel_node(master_ip: &str, rows: Vec<RespValue>) -> ScriptedNode {
        ScriptedNode::new("10.0.0.100:26379")
            .reply(
                "SENTINEL get-master-addr-by-name mymaster",
                RespValue::Array(vec![bulk(master_ip), bulk("6379")]),
            )
            .reply("SENTINEL replicas mymaster", RespValue::Array(rows))
    }

    fn discoverer(connector: FakeConnector) -> SentinelDiscoverer {
        SentinelDiscoverer::new(
            vec!["10.0.0.99:26379".to_string(), "10.0.0.100:26379".to_string()],
            "mymaster",
            Arc::new(connector),
        )
    }

    #[test]
    fn test_down_replica_excluded_empty_flags_included() {
        let rows = vec![
            row(&[("ip", "10.0.0.2"), ("port", "6379"), ("flags", "slave,s_down"), ("runid", "r2")]),
            row(&[("ip", "10.0.0.3"), ("port", "6379"), ("flags", ""), ("runid", "r3")]),
        ];
        let connector = FakeConnector::new().with_node(sentinel_node("10.0.0.1", rows));
        let topo = discoverer(connector).discover().unwrap();

        assert_eq!(topo.instances.len(), 1);
        let inst = &topo.instances[0];
        assert_eq!(inst.master.address, "10.0.0.1:6379");
        assert_eq!(inst.replicas.len(), 1);
        assert_eq!(inst.replicas[0].address, "10.0.0.3:6379");
        assert_eq!(inst.replicas[0].id, "r3");
    }

    #[test]
    fn test_incomplete_row_dropped() {
        let rows = vec![
            row(&[("ip", "10.0.0.2"), ("flags", "slave")]),
            row(&[("ip", "10.0.0.4"), ("port", "6380"), ("flags", "slave")]),
        ];
        let connector = FakeConnector::new().with_node(sentinel_node("10.0.0.1", rows));
        let topo = discoverer(connector).discover().unwrap();
        let replicas = &topo.instances[0].replicas;
        assert_eq!(replicas.len(), 1);
        assert_eq!(replicas[0].id, "10.0.0.4:6380");
    }

    #[test]
    fn test_falls_back_to_sentinel_slaves() {
        let node = ScriptedNode::new("10.0.0.100:26379")
            .reply(
                "SENTINEL get-master-addr-by-name mymaster",
                RespValue::Array(vec![bulk("10.0.0.1"), bulk("6379")]),
            )
            .reply(
                "SENTINEL replicas mymaster",
                RespValue::Error("ERR Unknown sentinel subcommand 'replicas'".to_string()),
            )
            .reply(
                "SENTINEL slaves mymaster",
                RespValue::Array(vec![row(&[("ip", "10.0.0.2"), ("port", "6379"), ("flags", "slave")])]),
            );
        let connector = FakeConnector::new().with_node(node.clone());
        let topo = discoverer(connector).discover().unwrap();
        assert_eq!(topo.instances[0].replicas.len(), 1);
        assert_eq!(node.close_count(), 1);
    }

    #[test]
    fn test_unknown_master_name() {
        let node = ScriptedNode::new("10.0.0.100:26379")
            .reply("SENTINEL get-master-addr-by-name mymaster", RespValue::Null);
        let connector = FakeConnector::new().with_node(node);
        let err = discoverer(connector).discover().unwrap_err();
        assert!(err.to_string().contains("mymaster"));
    }

    #[test]
    fn test_no_reachable_sentinel() {
        let err = discoverer(FakeConnector::new()).discover().unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Topology(TopologyError::NoSentinel(ref hosts)) if hosts.len() == 2
        ));
    }
}
