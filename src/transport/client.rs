//! The client side of the transport layer.

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_rustls::{rustls, webpki::DNSNameRef, TlsConnector};

use super::{pem, Connection, Error, TlsConfig, TlsError};

/// A connector for sessions with one server, holding the client's TLS
/// configuration so repeated connections share it.
pub struct ConnClient {
    tls: Option<TlsConnector>,
}

impl ConnClient {
    /// Build a connector. TLS material is loaded and validated here, so
    /// per-file failures surface before any socket is touched.
    pub fn new(config: &TlsConfig) -> Result<Self, Error> {
        if !config.enabled() {
            return Ok(ConnClient { tls: None });
        }

        let mut tls_config = rustls::ClientConfig::new();
        tls_config
            .root_store
            .add_server_trust_anchors(&webpki_roots::TLS_SERVER_ROOTS);

        if let Some(ca) = &config.ca_certificate {
            for certificate in pem::read_certificates(ca).map_err(TlsError::CaFail)? {
                tls_config
                    .root_store
                    .add(&certificate)
                    .map_err(|e| TlsError::ContextFail(format!("bad CA certificate: {:?}", e)))?;
            }
        }

        if let Some((cert, key)) = config.identity() {
            let certificates = pem::read_certificates(cert).map_err(TlsError::CertFail)?;
            let private_key = pem::read_private_key(key).map_err(TlsError::KeyFail)?;
            tls_config
                .set_single_client_cert(certificates, private_key)
                .map_err(|e| TlsError::ContextFail(e.to_string()))?;
        }

        Ok(ConnClient {
            tls: Some(TlsConnector::from(Arc::new(tls_config))),
        })
    }

    /// Connect to `host:port`, completing the TLS handshake when
    /// configured. Either returns a fully established [`Connection`] or
    /// fails with a typed error.
    pub async fn connect(&self, host: &str, port: u16) -> Result<Connection, Error> {
        if port == 0 {
            return Err(Error::PortError(port));
        }

        // Resolve the host and try each address until one accepts.
        let addresses = tokio::net::lookup_host((host, port))
            .await
            .map_err(|_| Error::ServerAddError(host.to_string()))?;

        let mut connection_error = None;
        let mut tcp_stream = None;
        for address in addresses {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    tcp_stream = Some(stream);
                    break;
                }
                Err(e) => connection_error = Some(e),
            }
        }
        let tcp_stream = match tcp_stream {
            Some(stream) => stream,
            None => {
                return Err(match connection_error {
                    Some(e) => Error::ConnectionError(e),
                    None => Error::ServerAddError(host.to_string()),
                })
            }
        };
        // Frames are often small; send them immediately.
        tcp_stream
            .set_nodelay(true)
            .map_err(Error::ConnectionError)?;

        match &self.tls {
            None => Ok(Connection::new(tcp_stream)),
            Some(connector) => {
                let domain = DNSNameRef::try_from_ascii_str(host).map_err(|e| {
                    TlsError::ConnectFail(std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("invalid DNS name {:?}: {}", host, e),
                    ))
                })?;
                let tls_stream = connector
                    .connect(domain, tcp_stream)
                    .await
                    .map_err(TlsError::ConnectFail)?;
                Ok(Connection::new(tls_stream))
            }
        }
    }

    /// One-shot convenience: build a connector and connect once.
    pub async fn open(host: &str, port: u16, config: &TlsConfig) -> Result<Connection, Error> {
        ConnClient::new(config)?.connect(host, port).await
    }
}
