//! The server side of the transport layer.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio_rustls::{rustls, TlsAcceptor};
use tracing::error;

use super::{pem, Connection, Error, TlsConfig, TlsError};
use crate::defaults;

/// A listening socket producing established [`Connection`]s.
///
/// When TLS is configured the handshake happens inside
/// [`accept`](ConnServer::accept); a failed handshake fails that accept
/// only and leaves the listener usable.
pub struct ConnServer {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

impl ConnServer {
    /// Bind and listen on IPv4 `port`.
    pub fn new(port: u16, config: &TlsConfig) -> Result<Self, Error> {
        if port == 0 {
            return Err(Error::PortError(port));
        }

        let socket = TcpSocket::new_v4().map_err(Error::SocketFail)?;
        socket.set_reuseaddr(true).map_err(Error::SocketFail)?;
        socket
            .bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
            .map_err(Error::BindFail)?;
        let listener = socket
            .listen(defaults::MAX_CONN_QUEUE)
            .map_err(Error::ListenFail)?;

        let acceptor = match config.identity() {
            None => None,
            Some((cert, key)) => {
                let verifier = match &config.ca_certificate {
                    // A CA bundle means clients must authenticate.
                    Some(ca) => {
                        let roots = pem::read_root_store(ca).map_err(TlsError::CaFail)?;
                        rustls::AllowAnyAuthenticatedClient::new(roots)
                    }
                    None => rustls::NoClientAuth::new(),
                };
                let mut tls_config = rustls::ServerConfig::new(verifier);
                let certificates = pem::read_certificates(cert).map_err(TlsError::CertFail)?;
                let private_key = pem::read_private_key(key).map_err(TlsError::KeyFail)?;
                tls_config
                    .set_single_cert(certificates, private_key)
                    .map_err(|e| TlsError::ContextFail(e.to_string()))?;
                Some(TlsAcceptor::from(Arc::new(tls_config)))
            }
        };

        Ok(ConnServer { listener, acceptor })
    }

    /// Block until a client connects, returning the established
    /// connection with any TLS handshake already completed.
    pub async fn accept(&self) -> Result<Connection, Error> {
        let (tcp_stream, addr) = self
            .listener
            .accept()
            .await
            .map_err(Error::ConnectionError)?;
        tcp_stream.set_nodelay(true).map_err(Error::SocketFail)?;

        match &self.acceptor {
            None => Ok(Connection::new(tcp_stream)),
            Some(acceptor) => match acceptor.accept(tcp_stream).await {
                Ok(tls_stream) => Ok(Connection::new(tls_stream)),
                Err(e) => {
                    error!("TLS handshake failed [{}]: {}", addr, e);
                    Err(TlsError::AcceptFail(e).into())
                }
            },
        }
    }

    /// The bound address (useful when logging which port we serve on).
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        self.listener.local_addr().map_err(Error::SocketFail)
    }
}
