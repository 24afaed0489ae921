//! The length-framed TCP transport shared by client and server.
//!
//! A message on the wire is a little-endian `u32` length followed by
//! exactly that many payload bytes. Connections may optionally run the
//! frames through TLS, with mutual authentication when a CA bundle is
//! configured.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub mod client;
pub mod connection;
pub mod io_stream;
pub mod pem;
pub mod server;

pub use client::ConnClient;
pub use connection::{Connection, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
pub use server::ConnServer;

/// TLS material for one side of a connection, all optional.
///
/// A side enables TLS when any path is set: `certificate` and
/// `private_key` form its own identity, and `ca_certificate` extends the
/// set of trusted peers. A server given a CA bundle requires clients to
/// present a certificate signed by it.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub certificate: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub ca_certificate: Option<PathBuf>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.certificate.is_some() || self.private_key.is_some() || self.ca_certificate.is_some()
    }

    /// Both halves of an identity, when configured.
    pub(crate) fn identity(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.certificate, &self.private_key) {
            (Some(cert), Some(key)) => Some((cert, key)),
            _ => None,
        }
    }
}

/// Everything that can go wrong between two connection endpoints.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to create socket: {0}")]
    SocketFail(#[source] io::Error),
    #[error("failed to bind port: {0}")]
    BindFail(#[source] io::Error),
    #[error("failed to listen on socket: {0}")]
    ListenFail(#[source] io::Error),
    #[error("connection failed: {0}")]
    ConnectionError(#[source] io::Error),
    #[error("connection shut down by peer")]
    ConnectionShutDown,
    #[error("write failed: {0}")]
    WriteFail(#[source] io::Error),
    #[error("read failed: {0}")]
    ReadFail(#[source] io::Error),
    #[error("invalid message size: {0}")]
    InvalidMessageSize(u64),
    #[error("port {0} is out of range")]
    PortError(u16),
    #[error("could not resolve server address: {0}")]
    ServerAddError(String),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

/// TLS setup and handshake failures, named after the stage that failed.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("SSL_CONTEXT_FAIL: {0}")]
    ContextFail(String),
    #[error("SSL_CERT_FAIL: {0}")]
    CertFail(#[source] io::Error),
    #[error("SSL_KEY_FAIL: {0}")]
    KeyFail(#[source] io::Error),
    #[error("SSL_CA_FAIL: {0}")]
    CaFail(#[source] io::Error),
    #[error("SSL_SET_FD_FAIL: {0}")]
    SetFdFail(#[source] io::Error),
    #[error("SSL_CONNECT_FAIL: {0}")]
    ConnectFail(#[source] io::Error),
    #[error("SSL_ACCEPT_FAIL: {0}")]
    AcceptFail(#[source] io::Error),
}
