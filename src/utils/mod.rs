//! Utility modules

pub mod cancel;
pub mod error;
pub mod resp;

pub use cancel::CancelToken;
pub use error::{ConnectionError, MonitorError, ProtocolError, Result, TopologyError};
pub use resp::{RespDecoder, RespEncoder, RespValue};
