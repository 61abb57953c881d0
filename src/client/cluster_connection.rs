//! Cluster-aware backend
//!
//! Holds the cluster seed list and talks to one seed at a time. A transport
//! error drops the current seed connection and the next call moves on to the
//! next seed, so one dead seed never stalls cluster-wide commands such as
//! CLUSTER NODES or CLUSTER INFO. There is no slot routing here.

use std::io;
use std::sync::Arc;

use tracing::{debug, warn};

use super::control_plane::{ControlPlane, NodeConnector};
use crate::utils::RespValue;

pub struct ClusterConnection {
    seeds: Vec<String>,
    connector: Arc<dyn NodeConnector>,
    current: Option<Box<dyn ControlPlane>>,
    next_seed: usize,
    label: String,
}

impl ClusterConnection {
    pub fn new(seeds: Vec<String>, connector: Arc<dyn NodeConnector>) -> Self {
        let label = seeds.join(",");
        Self {
            seeds,
            connector,
            current: None,
            next_seed: 0,
            label,
        }
    }

    /// Seed address currently in use, if connected
    pub fn active_seed(&self) -> Option<&str> {
        self.current.as_ref().map(|c| c.address())
    }

    fn ensure_connected(&mut self) -> io::Result<&mut Box<dyn ControlPlane>> {
        if self.current.is_none() {
            let mut last_err = None;
            for _ in 0..self.seeds.len() {
                let seed = &self.seeds[self.next_seed % self.seeds.len()];
                self.next_seed = (self.next_seed + 1) % self.seeds.len();
                match self.connector.connect(seed) {
                    Ok(conn) => {
                        debug!("cluster client using seed {}", seed);
                        self.current = Some(conn);
                        break;
                    }
                    Err(e) => {
                        warn!("cluster seed {} unreachable: {}", seed, e);
                        last_err = Some(e);
                    }
                }
            }
            if self.current.is_none() {
                let msg = match last_err {
                    Some(e) => format!("no reachable cluster seed: {}", e),
                    None => "no cluster seeds configured".to_string(),
                };
                return Err(io::Error::new(io::ErrorKind::NotConnected, msg));
            }
        }
        self.current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no cluster seed"))
    }

    fn drop_current(&mut self) {
        if let Some(mut conn) = self.current.take() {
            conn.close().ok();
        }
    }
}

impl ControlPlane for ClusterConnection {
    fn address(&self) -> &str {
        self.active_seed().unwrap_or(self.label.as_str())
    }

    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue> {
        let result = self.ensure_connected()?.execute(args);
        if result.is_err() {
            self.drop_current();
        }
        result
    }

    fn execute_pipeline(&mut self, commands: &[Vec<Vec<u8>>]) -> io::Result<Vec<RespValue>> {
        let result = self.ensure_connected()?.execute_pipeline(commands);
        if result.is_err() {
            self.drop_current();
        }
        result
    }

    fn close(&mut self) -> io::Result<()> {
        match self.current.take() {
            Some(mut conn) => conn.close(),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ControlPlaneExt;
    use crate::testing::{FakeConnector, ScriptedNode};

    #[test]
    fn test_skips_unreachable_seed() {
        let connector = FakeConnector::new().with_node(ScriptedNode::new("10.0.0.2:7000"));
        let mut conn = ClusterConnection::new(
            vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()],
            Arc::new(connector),
        );

        assert!(conn.ping().unwrap());
        assert_eq!(conn.active_seed(), Some("10.0.0.2:7000"));
    }

    #[test]
    fn test_transport_error_rotates_seed() {
        let first = ScriptedNode::new("10.0.0.1:7000").fail("CLUSTER INFO", io::ErrorKind::BrokenPipe);
        let second = ScriptedNode::new("10.0.0.2:7000").reply(
            "CLUSTER INFO",
            RespValue::BulkString(b"cluster_state:ok\r\n".to_vec()),
        );
        let connector = FakeConnector::new().with_node(first.clone()).with_node(second);
        let mut conn = ClusterConnection::new(
            vec!["10.0.0.1:7000".to_string(), "10.0.0.2:7000".to_string()],
            Arc::new(connector),
        );

        assert!(conn.cluster_info().is_err());
        assert_eq!(first.close_count(), 1);
        assert!(conn.cluster_info().unwrap().contains("cluster_state:ok"));
        assert_eq!(conn.active_seed(), Some("10.0.0.2:7000"));
    }

    #[test]
    fn test_no_seeds_is_not_connected() {
        let mut conn = ClusterConnection::new(vec![], Arc::new(FakeConnector::new()));
        let err = conn.execute(&["PING"]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert_eq!(conn.address(), "");
    }
}
