//! In-memory fakes for unit tests
//!
//! `ScriptedNode` answers commands from an exact-match script first and then
//! from a small keyspace model (SCAN, TYPE, OBJECT FREQ, MEMORY USAGE and the
//! length probes). Clones share state, so a test can keep a handle to a node
//! it handed to a connector and rescript it between calls. A scripted
//! transport failure breaks the node the way a dead socket would: every later
//! call fails until `FakeConnector` dials it again.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::client::{ControlPlane, NodeConnector};
use crate::utils::{ConnectionError, RespValue};

#[derive(Clone)]
enum Scripted {
    Value(RespValue),
    Fail(io::ErrorKind),
}

#[derive(Debug, Clone)]
pub struct FakeKey {
    pub key_type: &'static str,
    pub len: i64,
    pub mem: i64,
    pub freq: i64,
}

impl FakeKey {
    pub fn new(key_type: &'static str, len: i64, mem: i64, freq: i64) -> Self {
        Self {
            key_type,
            len,
            mem,
            freq,
        }
    }
}

#[derive(Default)]
struct NodeState {
    script: HashMap<String, VecDeque<Scripted>>,
    keys: BTreeMap<Vec<u8>, FakeKey>,
    policy: Option<String>,
    calls: Vec<Vec<Vec<u8>>>,
    pipeline_round_trips: usize,
    closed: usize,
    broken: bool,
}

#[derive(Clone)]
pub struct ScriptedNode {
    address: String,
    state: Arc<Mutex<NodeState>>,
}

impl ScriptedNode {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            state: Arc::new(Mutex::new(NodeState::default())),
        }
    }

    /// Queue a reply for an exact command line; the last queued reply repeats
    pub fn reply(self, command: &str, value: RespValue) -> Self {
        self.push(command, Scripted::Value(value));
        self
    }

    /// Fail the next call of an exact command line and break the connection
    pub fn fail(self, command: &str, kind: io::ErrorKind) -> Self {
        self.push(command, Scripted::Fail(kind));
        self
    }

    /// Replace whatever is scripted for a command
    pub fn set_reply(&self, command: &str, value: RespValue) {
        let mut state = self.state.lock();
        state
            .script
            .insert(command.to_string(), VecDeque::from([Scripted::Value(value)]));
    }

    pub fn with_key(self, key: impl AsRef<[u8]>, fake: FakeKey) -> Self {
        self.state.lock().keys.insert(key.as_ref().to_vec(), fake);
        self
    }

    pub fn with_policy(self, policy: &str) -> Self {
        self.state.lock().policy = Some(policy.to_string());
        self
    }

    /// Every command seen so far, arguments joined by spaces (lossy)
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.iter().map(|c| line_of(c)).collect()
    }

    pub fn raw_calls(&self) -> Vec<Vec<Vec<u8>>> {
        self.state.lock().calls.clone()
    }

    pub fn pipeline_round_trips(&self) -> usize {
        self.state.lock().pipeline_round_trips
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().closed
    }

    fn push(&self, command: &str, entry: Scripted) {
        self.state
            .lock()
            .script
            .entry(command.to_string())
            .or_default()
            .push_back(entry);
    }

    fn respond(state: &mut NodeState, args: &[Vec<u8>]) -> io::Result<RespValue> {
        if state.broken {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection broken"));
        }
        let line = line_of(args);
        state.calls.push(args.to_vec());

        if let Some(queue) = state.script.get_mut(&line) {
            // failures fire once, the last queued value repeats
            let failing = matches!(queue.front(), Some(Scripted::Fail(_)));
            let entry = if failing || queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if queue.is_empty() {
                state.script.remove(&line);
            }
            match entry {
                Some(Scripted::Value(v)) => return Ok(v),
                Some(Scripted::Fail(kind)) => {
                    state.broken = true;
                    return Err(io::Error::new(kind, "scripted failure"));
                }
                None => {}
            }
        }

        let upper: Vec<String> = args
            .iter()
            .map(|a| String::from_utf8_lossy(a).to_ascii_uppercase())
            .collect();
        let text = |i: usize| args.get(i).map(|a| String::from_utf8_lossy(a).into_owned());
        let key_at = |i: usize| args.get(i).and_then(|k| state.keys.get(k)).cloned();

        let value = match upper.first().map(String::as_str) {
            Some("PING") => RespValue::SimpleString("PONG".to_string()),
            Some("SELECT") => RespValue::SimpleString("OK".to_string()),
            Some("CONFIG") if upper.get(2).map(String::as_str) == Some("MAXMEMORY-POLICY") => {
                match &state.policy {
                    Some(p) => RespValue::Array(vec![
                        RespValue::BulkString(b"maxmemory-policy".to_vec()),
                        RespValue::BulkString(p.clone().into_bytes()),
                    ]),
                    None => RespValue::Array(vec![]),
                }
            }
            Some("SCAN") => {
                let cursor: usize = text(1).and_then(|c| c.parse().ok()).unwrap_or(0);
                let count = upper
                    .iter()
                    .position(|a| a == "COUNT")
                    .and_then(|i| text(i + 1))
                    .and_then(|c| c.parse().ok())
                    .unwrap_or(10usize);
                let all: Vec<&Vec<u8>> = state.keys.keys().collect();
                let end = (cursor + count).min(all.len());
                let batch = all[cursor.min(all.len())..end]
                    .iter()
                    .map(|k| RespValue::BulkString(k.to_vec()))
                    .collect();
                let next = if end >= all.len() { 0 } else { end };
                RespValue::Array(vec![
                    RespValue::BulkString(next.to_string().into_bytes()),
                    RespValue::Array(batch),
                ])
            }
            Some("TYPE") => RespValue::SimpleString(
                key_at(1).map(|k| k.key_type).unwrap_or("none").to_string(),
            ),
            Some("OBJECT") => match key_at(2) {
                Some(k) => RespValue::Integer(k.freq),
                None => RespValue::Error("ERR no such key".to_string()),
            },
            Some("MEMORY") => match key_at(2) {
                Some(k) => RespValue::Integer(k.mem),
                None => RespValue::Null,
            },
            Some("STRLEN") | Some("LLEN") | Some("HLEN") | Some("SCARD") | Some("ZCARD") => {
                RespValue::Integer(key_at(1).map(|k| k.len).unwrap_or(0))
            }
            _ => RespValue::Error(format!("ERR unknown command '{}'", line)),
        };
        Ok(value)
    }
}

fn line_of(args: &[Vec<u8>]) -> String {
    args.iter()
        .map(|a| String::from_utf8_lossy(a))
        .collect::<Vec<_>>()
        .join(" ")
}

impl ControlPlane for ScriptedNode {
    fn address(&self) -> &str {
        &self.address
    }

    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue> {
        let owned: Vec<Vec<u8>> = args.iter().map(|s| s.as_bytes().to_vec()).collect();
        let mut state = self.state.lock();
        Self::respond(&mut state, &owned)
    }

    fn execute_pipeline(&mut self, commands: &[Vec<Vec<u8>>]) -> io::Result<Vec<RespValue>> {
        let mut state = self.state.lock();
        state.pipeline_round_trips += 1;
        commands
            .iter()
            .map(|cmd| Self::respond(&mut state, cmd))
            .collect()
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed += 1;
        Ok(())
    }
}

/// Connector over a fixed set of scripted nodes; unknown addresses are unreachable
#[derive(Default)]
pub struct FakeConnector {
    nodes: Mutex<HashMap<String, ScriptedNode>>,
    dials: Mutex<HashMap<String, usize>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_node(self, node: ScriptedNode) -> Self {
        self.add(node);
        self
    }

    pub fn add(&self, node: ScriptedNode) {
        self.nodes.lock().insert(node.address.clone(), node);
    }

    pub fn remove(&self, address: &str) {
        self.nodes.lock().remove(address);
    }

    pub fn node(&self, address: &str) -> Option<ScriptedNode> {
        self.nodes.lock().get(address).cloned()
    }

    /// Successful connects to an address
    pub fn dial_count(&self, address: &str) -> usize {
        self.dials.lock().get(address).copied().unwrap_or(0)
    }
}

impl NodeConnector for FakeConnector {
    fn connect(&self, address: &str) -> Result<Box<dyn ControlPlane>, ConnectionError> {
        match self.nodes.lock().get(address) {
            Some(node) => {
                node.state.lock().broken = false;
                *self.dials.lock().entry(address.to_string()).or_default() += 1;
                Ok(Box::new(node.clone()))
            }
            None => Err(ConnectionError::ConnectFailed {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "unreachable"),
            }),
        }
    }
}
