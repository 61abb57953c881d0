//! Single-node backend over a raw TCP (or TLS) connection
//!
//! One connection per monitored node, opened at setup. Pipelines are written
//! in one flush and their replies read back in order. Any transport error
//! closes the stream: unread replies may still be in flight, so the socket can
//! never be trusted again. Later calls fail with `NotConnected` until the
//! owner dials a fresh connection.

use std::io::{self, BufReader, BufWriter, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use super::control_plane::{ControlPlane, ControlPlaneExt, NodeConnector};
use crate::config::{ServerAddress, TlsConfig};
use crate::utils::{ConnectionError, RespDecoder, RespEncoder, RespValue};

enum Stream {
    Tcp {
        writer: BufWriter<TcpStream>,
        reader: BufReader<TcpStream>,
    },
    #[cfg(feature = "native-tls-backend")]
    NativeTls {
        stream: BufReader<native_tls::TlsStream<TcpStream>>,
    },
    Closed,
}

/// Raw connection to one node
pub struct RawConnection {
    address: String,
    stream: Stream,
    encoder: RespEncoder,
}

fn connect_socket(
    address: &ServerAddress,
    connect_timeout: Duration,
) -> Result<TcpStream, ConnectionError> {
    let addr_str = address.to_string();
    let failed = |source: io::Error| ConnectionError::ConnectFailed {
        address: addr_str.clone(),
        source,
    };

    let addr = addr_str
        .to_socket_addrs()
        .map_err(failed)?
        .next()
        .ok_or_else(|| failed(io::Error::new(io::ErrorKind::NotFound, "No addresses found")))?;

    let stream = TcpStream::connect_timeout(&addr, connect_timeout).map_err(failed)?;
    stream.set_nodelay(true).ok();
    Ok(stream)
}

impl RawConnection {
    /// Create new TCP connection
    pub fn connect_tcp(
        address: &ServerAddress,
        connect_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let stream = connect_socket(address, connect_timeout)?;
        let writer = BufWriter::with_capacity(
            16 * 1024,
            stream.try_clone().map_err(|e| ConnectionError::ConnectFailed {
                address: address.to_string(),
                source: e,
            })?,
        );
        let reader = BufReader::with_capacity(64 * 1024, stream);

        Ok(Self {
            address: address.to_string(),
            stream: Stream::Tcp { writer, reader },
            encoder: RespEncoder::with_capacity(4096),
        })
    }

    /// Create new TLS connection
    #[cfg(feature = "native-tls-backend")]
    pub fn connect_tls(
        address: &ServerAddress,
        connect_timeout: Duration,
        tls_config: &TlsConfig,
    ) -> Result<Self, ConnectionError> {
        use native_tls::{Certificate, Identity, TlsConnector};

        let tls_err = |what: &str, e: &dyn std::fmt::Display| {
            ConnectionError::TlsFailed(format!("{} for {}: {}", what, address, e))
        };

        let mut builder = TlsConnector::builder();
        if tls_config.insecure {
            warn!("certificate checks disabled for {}", address);
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }

        if let Some(ca_path) = &tls_config.ca_file {
            let pem = std::fs::read(ca_path).map_err(|e| tls_err("read CA bundle", &e))?;
            let cert = Certificate::from_pem(&pem).map_err(|e| tls_err("parse CA bundle", &e))?;
            builder.add_root_certificate(cert);
        }

        let identity = tls_config
            .client_identity()
            .map_err(|e| tls_err("client identity", &e))?;
        if let Some((cert_path, key_path)) = identity {
            let cert = std::fs::read(cert_path).map_err(|e| tls_err("read client cert", &e))?;
            let key = std::fs::read(key_path).map_err(|e| tls_err("read client key", &e))?;
            let identity =
                Identity::from_pkcs8(&cert, &key).map_err(|e| tls_err("load client identity", &e))?;
            builder.identity(identity);
        }

        let connector = builder
            .build()
            .map_err(|e| tls_err("build connector", &e))?;

        let tcp_stream = connect_socket(address, connect_timeout)?;
        let tls_stream = connector
            .connect(tls_config.server_name(&address.host), tcp_stream)
            .map_err(|e| tls_err("handshake", &e))?;

        Ok(Self {
            address: address.to_string(),
            stream: Stream::NativeTls {
                stream: BufReader::with_capacity(64 * 1024, tls_stream),
            },
            encoder: RespEncoder::with_capacity(4096),
        })
    }

    fn write_encoded(&mut self) -> io::Result<()> {
        let bytes = self.encoder.as_bytes();
        match &mut self.stream {
            Stream::Tcp { writer, .. } => {
                writer.write_all(bytes)?;
                writer.flush()
            }
            #[cfg(feature = "native-tls-backend")]
            Stream::NativeTls { stream } => {
                stream.get_mut().write_all(bytes)?;
                stream.get_mut().flush()
            }
            Stream::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed")),
        }
    }

    fn read_responses(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        match &mut self.stream {
            Stream::Tcp { reader, .. } => RespDecoder::new(reader).decode_pipeline(count),
            #[cfg(feature = "native-tls-backend")]
            Stream::NativeTls { stream } => RespDecoder::new(stream).decode_pipeline(count),
            Stream::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed")),
        }
    }

    /// Write the encoded request and read `count` replies
    fn round_trip(&mut self, count: usize) -> io::Result<Vec<RespValue>> {
        let result = self
            .write_encoded()
            .and_then(|()| self.read_responses(count));
        if let Err(e) = &result {
            if e.kind() != io::ErrorKind::NotConnected {
                warn!("connection to {} dropped: {}", self.address, e);
                self.close().ok();
            }
        }
        result
    }

    pub fn is_open(&self) -> bool {
        !matches!(self.stream, Stream::Closed)
    }

    /// Set read and write timeouts on the underlying socket
    pub fn set_timeouts(&mut self, read: Duration, write: Duration) -> io::Result<()> {
        match &mut self.stream {
            Stream::Tcp { reader, .. } => {
                reader.get_ref().set_read_timeout(Some(read))?;
                reader.get_ref().set_write_timeout(Some(write))
            }
            #[cfg(feature = "native-tls-backend")]
            Stream::NativeTls { stream } => {
                stream.get_ref().get_ref().set_read_timeout(Some(read))?;
                stream.get_ref().get_ref().set_write_timeout(Some(write))
            }
            Stream::Closed => Ok(()),
        }
    }

    /// Send AUTH command
    pub fn authenticate(
        &mut self,
        password: &str,
        username: Option<&str>,
    ) -> Result<(), ConnectionError> {
        let response = match username {
            Some(user) => self.execute(&["AUTH", user, password]),
            None => self.execute(&["AUTH", password]),
        }
        .map_err(|e| ConnectionError::AuthFailed(format!("IO error: {}", e)))?;

        match response {
            RespValue::SimpleString(s) if s == "OK" => Ok(()),
            RespValue::Error(e) => Err(ConnectionError::AuthFailed(e)),
            other => Err(ConnectionError::AuthFailed(format!(
                "Unexpected response: {}",
                other.describe()
            ))),
        }
    }
}

impl ControlPlane for RawConnection {
    fn address(&self) -> &str {
        &self.address
    }

    fn execute(&mut self, args: &[&str]) -> io::Result<RespValue> {
        self.encoder.clear();
        self.encoder.encode_command(args);
        self.round_trip(1)?
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "missing reply"))
    }

    fn execute_pipeline(&mut self, commands: &[Vec<Vec<u8>>]) -> io::Result<Vec<RespValue>> {
        self.encoder.clear();
        self.encoder.encode_pipeline(commands);
        self.round_trip(commands.len())
    }

    fn close(&mut self) -> io::Result<()> {
        let stream = std::mem::replace(&mut self.stream, Stream::Closed);
        match stream {
            Stream::Tcp { reader, .. } => {
                debug!("closing connection to {}", self.address);
                reader.get_ref().shutdown(std::net::Shutdown::Both)
            }
            #[cfg(feature = "native-tls-backend")]
            Stream::NativeTls { mut stream } => stream.get_mut().shutdown(),
            Stream::Closed => Ok(()),
        }
    }
}

/// Connection factory for creating connections with common config
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub tls_config: Option<TlsConfig>,
    pub auth_password: Option<String>,
    pub auth_username: Option<String>,
}

impl ConnectionFactory {
    /// Create a new connection and verify it answers PING
    pub fn create(&self, address: &ServerAddress) -> Result<RawConnection, ConnectionError> {
        let mut conn = match &self.tls_config {
            #[cfg(feature = "native-tls-backend")]
            Some(tls) => RawConnection::connect_tls(address, self.connect_timeout, tls)?,
            #[cfg(not(feature = "native-tls-backend"))]
            Some(_) => {
                return Err(ConnectionError::TlsFailed(
                    "TLS support not compiled in".to_string(),
                ));
            }
            None => RawConnection::connect_tcp(address, self.connect_timeout)?,
        };

        conn.set_timeouts(self.read_timeout, self.write_timeout).ok();

        if let Some(ref password) = self.auth_password {
            conn.authenticate(password, self.auth_username.as_deref())?;
        }

        match conn.ping() {
            Ok(true) => Ok(conn),
            Ok(false) => Err(ConnectionError::ConnectFailed {
                address: address.to_string(),
                source: io::Error::new(io::ErrorKind::InvalidData, "PING did not return PONG"),
            }),
            Err(e) => {
                warn!("failed to create client on {}: {}", address, e);
                conn.close().ok();
                Err(ConnectionError::ConnectFailed {
                    address: address.to_string(),
                    source: e,
                })
            }
        }
    }
}

impl NodeConnector for ConnectionFactory {
    fn connect(&self, address: &str) -> Result<Box<dyn ControlPlane>, ConnectionError> {
        let parsed = ServerAddress::parse(address).ok_or_else(|| ConnectionError::ConnectFailed {
            address: address.to_string(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "expected host:port"),
        })?;
        Ok(Box::new(self.create(&parsed)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> ConnectionFactory {
        ConnectionFactory {
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            tls_config: None,
            auth_password: None,
            auth_username: None,
        }
    }

    #[test]
    fn test_connect_rejects_malformed_address() {
        let err = factory().connect("no-port-here").err().unwrap();
        assert!(matches!(err, ConnectionError::ConnectFailed { .. }));
    }

    #[cfg(not(feature = "native-tls-backend"))]
    #[test]
    fn test_tls_without_feature_fails_fast() {
        let mut f = factory();
        f.tls_config = Some(TlsConfig::default());
        let err = f.create(&ServerAddress::new("127.0.0.1", 6379)).err().unwrap();
        assert!(matches!(err, ConnectionError::TlsFailed(_)));
    }

    /// Accepts one connection and runs `serve` on it
    fn one_shot_server(serve: impl FnOnce(TcpStream) + Send + 'static) -> ServerAddress {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                serve(stream);
            }
        });
        ServerAddress::new("127.0.0.1", port)
    }

    #[test]
    fn test_read_timeout_closes_connection() {
        use std::io::{BufRead, Read};

        let address = one_shot_server(|stream| {
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            let mut line = String::new();
            // PING from the factory, answered at once
            for _ in 0..3 {
                reader.read_line(&mut line).unwrap();
            }
            writer.write_all(b"+PONG\r\n").unwrap();
            // TYPE slow, answered after the client gave up
            let mut request = [0u8; 64];
            let _ = reader.read(&mut request);
            std::thread::sleep(Duration::from_millis(400));
            let _ = writer.write_all(b"+string\r\n");
            std::thread::sleep(Duration::from_millis(200));
        });

        let mut f = factory();
        f.read_timeout = Duration::from_millis(100);
        let mut conn = f.create(&address).unwrap();
        assert!(conn.is_open());

        assert!(conn.execute(&["TYPE", "slow"]).is_err());
        assert!(!conn.is_open());
        std::thread::sleep(Duration::from_millis(500));

        // the late reply is never read as the answer to the next command
        let err = conn.execute(&["PING"]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_server_hangup_closes_connection() {
        let address = one_shot_server(|mut stream| {
            let mut request = [0u8; 64];
            let _ = std::io::Read::read(&mut stream, &mut request);
            stream.write_all(b"+PONG\r\n").unwrap();
        });

        let mut conn = factory().create(&address).unwrap();
        assert!(conn.execute(&["PING"]).is_err());
        assert!(!conn.is_open());
        assert_eq!(
            conn.execute(&["PING"]).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
    }

    // Requires a running server on localhost
    #[test]
    #[ignore]
    fn test_tcp_connection_ping_and_scan() {
        let mut conn = factory()
            .create(&ServerAddress::new("127.0.0.1", 6379))
            .expect("Failed to connect");
        assert!(conn.ping().expect("Ping failed"));
        let (_, _cursor) = conn.scan_keys(0, "*", 10).expect("SCAN failed");
        conn.close().expect("close failed");
    }
}
