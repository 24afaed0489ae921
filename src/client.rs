//! Client library: one connection to a server, exchanging query
//! envelopes.

use thiserror::Error;

use crate::transport::{self, ConnClient, Connection, TlsConfig};
use crate::wire::{BadEnvelope, Envelope};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] transport::Error),
    #[error(transparent)]
    Envelope(#[from] BadEnvelope),
}

/// A query response: the JSON response array plus any returned blobs
/// (retrieved images, videos, descriptors), in match order.
#[derive(Debug)]
pub struct Response {
    pub json: String,
    pub blobs: Vec<Vec<u8>>,
}

/// A connected client. Queries on one client are serialized in send
/// order, matching the server's per-connection ordering guarantee.
pub struct Client {
    connection: Connection,
}

impl Client {
    /// Connect (including the TLS handshake, when configured).
    pub async fn connect(host: &str, port: u16, tls: &TlsConfig) -> Result<Self, ClientError> {
        Ok(Client {
            connection: ConnClient::open(host, port, tls).await?,
        })
    }

    /// Execute one query: a JSON array of commands plus blobs consumed
    /// positionally by the blob-accepting commands.
    pub async fn query(
        &mut self,
        json: impl Into<String>,
        blobs: Vec<Vec<u8>>,
    ) -> Result<Response, ClientError> {
        let request = Envelope::new(json, blobs).encode()?;
        self.connection.send_message(&request).await?;

        let raw = self.connection.recv_message().await?;
        let response = Envelope::decode(raw)?;
        Ok(Response {
            json: response.json,
            blobs: response.blobs,
        })
    }

    /// Orderly shutdown of the underlying connection.
    pub async fn shutdown(mut self) -> Result<(), ClientError> {
        self.connection.shutdown().await?;
        Ok(())
    }
}
