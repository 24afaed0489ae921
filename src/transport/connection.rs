//! An established connection and the wire framing both sides speak.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::io_stream::IoStream;
use super::Error;

/// Initial ceiling on a single frame. Grows on demand, up to
/// [`MAX_BUFFER_SIZE`].
pub const DEFAULT_BUFFER_SIZE: u32 = 32 * 1024 * 1024;

/// Hard upper bound on a single frame; a declared length beyond this is
/// rejected outright.
pub const MAX_BUFFER_SIZE: u32 = 1024 * 1024 * 1024;

/// One end of an established session, owning the socket and (if
/// configured) the TLS state on top of it.
///
/// `Connection` is move-only; dropping it closes the socket. Call
/// [`shutdown`](Connection::shutdown) first for an orderly close that
/// sends the TLS close-notify.
pub struct Connection {
    stream: IoStream,
    buffer: Vec<u8>,
    buffer_size_limit: u32,
}

impl Connection {
    pub(crate) fn new(stream: impl Into<IoStream>) -> Self {
        Connection {
            stream: stream.into(),
            buffer: Vec::new(),
            buffer_size_limit: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Raise the per-frame ceiling, clamped between [`DEFAULT_BUFFER_SIZE`]
    /// and [`MAX_BUFFER_SIZE`].
    pub fn set_buffer_size_limit(&mut self, buffer_size_limit: u32) {
        self.buffer_size_limit = buffer_size_limit
            .max(DEFAULT_BUFFER_SIZE)
            .min(MAX_BUFFER_SIZE);
    }

    pub fn peer_addr(&self) -> Option<std::net::SocketAddr> {
        self.stream.peer_addr().ok()
    }

    /// Send one frame: length, then the payload until fully written.
    pub async fn send_message(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.is_empty() || data.len() as u64 > MAX_BUFFER_SIZE as u64 {
            return Err(Error::InvalidMessageSize(data.len() as u64));
        }
        let size = data.len() as u32;
        if size > self.buffer_size_limit {
            self.set_buffer_size_limit(size);
        }

        self.stream
            .write_all(&size.to_le_bytes())
            .await
            .map_err(Error::WriteFail)?;
        self.stream.write_all(data).await.map_err(Error::WriteFail)?;
        self.stream.flush().await.map_err(Error::WriteFail)?;
        Ok(())
    }

    /// Receive one frame into the connection's buffer.
    ///
    /// The returned slice is valid until the next receive on this
    /// connection. An orderly peer shutdown mid-frame (or before the
    /// length) is reported as [`Error::ConnectionShutDown`].
    pub async fn recv_message(&mut self) -> Result<&[u8], Error> {
        let mut size_bytes = [0u8; 4];
        read_exact(&mut self.stream, &mut size_bytes).await?;
        let size = u32::from_le_bytes(size_bytes);

        if size == 0 || size > MAX_BUFFER_SIZE {
            return Err(Error::InvalidMessageSize(size as u64));
        }
        if size > self.buffer_size_limit {
            self.set_buffer_size_limit(size);
        }

        self.buffer.resize(size as usize, 0);
        read_exact(&mut self.stream, &mut self.buffer).await?;
        Ok(&self.buffer)
    }

    /// Orderly close: flush, send TLS close-notify when applicable, and
    /// shut the socket down for writing.
    pub async fn shutdown(&mut self) -> Result<(), Error> {
        self.stream.shutdown().await.map_err(Error::WriteFail)
    }
}

async fn read_exact(stream: &mut IoStream, buf: &mut [u8]) -> Result<(), Error> {
    stream.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionShutDown
        } else {
            Error::ReadFail(e)
        }
    })?;
    Ok(())
}
