//! Command capability for one Redis node
//!
//! `ControlPlane` is the narrow surface every backend implements: single
//! commands, pipelined batches, and close. Everything the monitor needs on
//! top of that (INFO, CONFIG GET, SCAN, ...) lives in `ControlPlaneExt`, which
//! every backend gets for free, so callers never branch on the concrete type.

use std::collections::HashMap;
use std::io;

use super::pipeline::Pipeline;
use crate::utils::{ConnectionError, RespValue};

/// Control plane operations trait
///
/// Transport failures surface as `io::Error`. Error replies from the server
/// are returned as `RespValue::Error` and left to the caller.
pub trait ControlPlane: Send {
    /// Address (host:port) this handle talks to
    fn address(&self) -> &str;

    /// Execute a command with string arguments
    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue>;

    /// Send every command in one write and read the replies back in order
    ///
    /// Arguments are raw bytes so binary key names survive unchanged.
    fn execute_pipeline(&mut self, commands: &[Vec<Vec<u8>>]) -> io::Result<Vec<RespValue>>;

    /// Release the underlying connection
    fn close(&mut self) -> io::Result<()>;
}

/// Opens a capability handle for one node address
///
/// Implemented by `ConnectionFactory`; tests inject in-memory fakes.
pub trait NodeConnector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Box<dyn ControlPlane>, ConnectionError>;
}

fn server_error(e: String) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e)
}

fn unexpected(command: &str, other: &RespValue) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("Unexpected {} response: {}", command, other.describe()),
    )
}

fn text_reply(command: &str, response: RespValue) -> io::Result<String> {
    match response {
        RespValue::BulkString(data) => String::from_utf8(data).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidData, format!("Invalid UTF-8: {}", e))
        }),
        RespValue::SimpleString(s) => Ok(s),
        RespValue::Error(e) => Err(server_error(e)),
        other => Err(unexpected(command, &other)),
    }
}

/// Extension trait with the monitor's node operations
pub trait ControlPlaneExt: ControlPlane {
    /// Send PING and verify PONG response
    fn ping(&mut self) -> io::Result<bool> {
        match self.execute(&["PING"])? {
            RespValue::SimpleString(s) => Ok(s == "PONG"),
            RespValue::Error(e) => Err(server_error(e)),
            _ => Ok(false),
        }
    }

    /// INFO payload for one section (empty string returns the default sections)
    fn info(&mut self, section: &str) -> io::Result<String> {
        let response = if section.is_empty() {
            self.execute(&["INFO"])?
        } else {
            self.execute(&["INFO", section])?
        };
        text_reply("INFO", response)
    }

    /// Raw CLIENT LIST payload
    fn client_list(&mut self) -> io::Result<String> {
        let response = self.execute(&["CLIENT", "LIST"])?;
        text_reply("CLIENT LIST", response)
    }

    /// CONFIG GET as a name -> value map
    fn config_get(&mut self, pattern: &str) -> io::Result<HashMap<String, String>> {
        match self.execute(&["CONFIG", "GET", pattern])? {
            RespValue::Array(items) => {
                let mut out = HashMap::with_capacity(items.len() / 2);
                for pair in items.chunks(2) {
                    if let [name, value] = pair {
                        if let (Some(name), Some(value)) = (name.to_text(), value.to_text()) {
                            out.insert(name, value);
                        }
                    }
                }
                Ok(out)
            }
            RespValue::Error(e) => Err(server_error(e)),
            other => Err(unexpected("CONFIG GET", &other)),
        }
    }

    /// Raw CLUSTER INFO payload
    fn cluster_info(&mut self) -> io::Result<String> {
        let response = self.execute(&["CLUSTER", "INFO"])?;
        text_reply("CLUSTER INFO", response)
    }

    /// Raw CLUSTER NODES payload
    fn cluster_nodes(&mut self) -> io::Result<String> {
        let response = self.execute(&["CLUSTER", "NODES"])?;
        text_reply("CLUSTER NODES", response)
    }

    /// One SCAN step: returns the batch of raw key names and the next cursor
    fn scan_keys(
        &mut self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> io::Result<(Vec<Vec<u8>>, u64)> {
        let cursor_str = cursor.to_string();
        let count_str = count.to_string();
        let response = self.execute(&["SCAN", &cursor_str, "MATCH", pattern, "COUNT", &count_str])?;

        match response {
            RespValue::Array(parts) if parts.len() == 2 => {
                let next = parts[0]
                    .as_u64_lenient()
                    .ok_or_else(|| unexpected("SCAN cursor", &parts[0]))?;
                let keys = parts[1]
                    .as_array()
                    .ok_or_else(|| unexpected("SCAN keys", &parts[1]))?
                    .iter()
                    .filter_map(RespValue::to_bytes)
                    .collect();
                Ok((keys, next))
            }
            RespValue::Error(e) => Err(server_error(e)),
            other => Err(unexpected("SCAN", &other)),
        }
    }

    /// Send SELECT command
    fn select_db(&mut self, db: i64) -> io::Result<()> {
        let db_str = db.to_string();
        match self.execute(&["SELECT", &db_str])? {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(server_error(e)),
            other => Err(unexpected("SELECT", &other)),
        }
    }

    /// Start an empty pipeline bound to nothing; run it with `Pipeline::exec`
    fn pipeline(&self) -> Pipeline {
        Pipeline::new()
    }
}

impl<T: ControlPlane + ?Sized> ControlPlaneExt for T {}
