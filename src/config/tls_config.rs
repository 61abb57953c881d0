//! TLS settings for node and sentinel connections

use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM bundle added to the trust roots
    pub ca_file: Option<PathBuf>,
    /// Client certificate (PEM) for mutual TLS
    pub cert_file: Option<PathBuf>,
    /// PKCS#8 key matching `cert_file`
    pub key_file: Option<PathBuf>,
    /// Name checked against the server certificate, defaults to the node host
    pub server_name: Option<String>,
    /// Accept any certificate and host name
    pub insecure: bool,
}

impl TlsConfig {
    /// Certificate and key paths for mutual TLS; one without the other is an error
    pub fn client_identity(&self) -> Result<Option<(&Path, &Path)>, String> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Ok(Some((cert.as_path(), key.as_path()))),
            (None, None) => Ok(None),
            (Some(_), None) => Err("tls.cert_file is set without tls.key_file".to_string()),
            (None, Some(_)) => Err("tls.key_file is set without tls.cert_file".to_string()),
        }
    }

    pub fn server_name<'a>(&'a self, host: &'a str) -> &'a str {
        self.server_name.as_deref().unwrap_or(host)
    }
}
