// Copyright 2023 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use log::info;
use tonic::transport::Certificate;
use tonic::transport::Channel;
use tonic::transport::ClientTlsConfig;
use tonic::transport::Endpoint;
use tonic::transport::Identity;

use crate::internal_err;
use crate::Result;

fn strip_http_scheme(addr: &str) -> &str {
    let addr = addr.trim_start();
    if let Some(stripped) = addr.strip_prefix("http://") {
        return stripped;
    }
    if let Some(stripped) = addr.strip_prefix("https://") {
        return stripped;
    }
    addr
}

fn load_pem_file(tag: &str, path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path)
        .map_err(|e| internal_err!("failed to open {} to load {}: {:?}", path.display(), tag, e))?;
    let mut pem = vec![];
    file.read_to_end(&mut pem).map_err(|e| {
        internal_err!(
            "failed to load {} from path {}: {:?}",
            tag,
            path.display(),
            e
        )
    })?;
    Ok(pem)
}

/// Manages the TLS protocol for every outgoing connection.
///
/// With no certificate material loaded, plaintext connections are used.
pub struct SecurityManager {
    /// The PEM encoding of the cluster CA certificates.
    ca: Vec<u8>,
    /// The PEM encoding of this client's certificate chain.
    cert: Vec<u8>,
    /// The path to the PEM encoding of this client's private key.
    key: PathBuf,
}

impl Default for SecurityManager {
    fn default() -> Self {
        Self {
            ca: Vec::new(),
            cert: Vec::new(),
            key: PathBuf::new(),
        }
    }
}

impl SecurityManager {
    /// Load TLS configuration from files.
    pub fn load(
        ca_path: impl AsRef<Path>,
        cert_path: impl AsRef<Path>,
        key_path: impl Into<PathBuf>,
    ) -> Result<SecurityManager> {
        let key_path = key_path.into();
        // The key is re-read at connect time; only check it exists here.
        File::open(&key_path).map_err(|e| {
            internal_err!(
                "failed to open {} to load private key: {:?}",
                key_path.display(),
                e
            )
        })?;
        Ok(SecurityManager {
            ca: load_pem_file("ca", ca_path.as_ref())?,
            cert: load_pem_file("certificate", cert_path.as_ref())?,
            key: key_path,
        })
    }

    /// Connect to a gRPC server, bounding the dial by `connect_timeout` and
    /// using TLS when certificates were loaded.
    pub async fn connect<Factory, Client>(
        &self,
        addr: &str,
        connect_timeout: Duration,
        factory: Factory,
    ) -> Result<Client>
    where
        Factory: FnOnce(Channel) -> Client,
    {
        info!("connect to rpc server at endpoint: {:?}", addr);
        let endpoint = if !self.ca.is_empty() {
            self.tls_endpoint(addr)?
        } else {
            self.default_endpoint(addr)?
        };
        let channel = endpoint.connect_timeout(connect_timeout).connect().await?;
        Ok(factory(channel))
    }

    fn tls_endpoint(&self, addr: &str) -> Result<Endpoint> {
        let addr = format!("https://{}", strip_http_scheme(addr));
        let tls = ClientTlsConfig::new()
            .ca_certificate(Certificate::from_pem(&self.ca))
            .identity(Identity::from_pem(
                &self.cert,
                load_pem_file("private key", &self.key)?,
            ));
        Ok(self.endpoint(addr)?.tls_config(tls)?)
    }

    fn default_endpoint(&self, addr: &str) -> Result<Endpoint> {
        self.endpoint(format!("http://{}", strip_http_scheme(addr)))
    }

    fn endpoint(&self, addr: String) -> Result<Endpoint> {
        let endpoint = Channel::from_shared(addr)?.tcp_keepalive(Some(Duration::from_secs(10)));
        Ok(endpoint)
    }
}
