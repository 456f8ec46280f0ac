//! Tokio TCP implementation of [`Socket`].

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::trace;

use crate::domain::TransportError;
use crate::ports::Socket;
use crate::service::stop_requested;

/// Accepted TCP stream.
///
/// `close` wakes any pending read or write, which then fails with
/// [`TransportError::Closed`]; the half in use is dropped when it returns.
pub struct TokioSocket {
    remote: SocketAddr,
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    closed: watch::Sender<bool>,
}

impl TokioSocket {
    /// Wrap an accepted stream.
    pub fn new(stream: TcpStream, remote: SocketAddr) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();
        let (closed, _) = watch::channel(false);
        Self {
            remote,
            reader: Mutex::new(Some(read_half)),
            writer: Mutex::new(Some(write_half)),
            closed,
        }
    }
}

#[async_trait]
impl Socket for TokioSocket {
    fn remote_endpoint(&self) -> SocketAddr {
        self.remote
    }

    async fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut closed = self.closed.subscribe();
        let mut reader = self.reader.lock().await;
        let Some(half) = reader.as_mut() else {
            return Err(TransportError::Closed);
        };

        let result = tokio::select! {
            biased;
            _ = stop_requested(&mut closed) => Err(TransportError::Closed),
            read = half.read(buf) => match read {
                Ok(0) => Err(TransportError::Closed),
                Ok(n) => Ok(n),
                Err(err) => Err(TransportError::from(err)),
            },
        };

        if result.is_err() {
            reader.take();
            self.closed.send_replace(true);
        }
        result
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut closed = self.closed.subscribe();
        let mut writer = self.writer.lock().await;
        let Some(half) = writer.as_mut() else {
            return Err(TransportError::Closed);
        };

        let result = tokio::select! {
            biased;
            _ = stop_requested(&mut closed) => Err(TransportError::Closed),
            written = half.write_all(bytes) => written.map_err(TransportError::from),
        };

        if result.is_err() {
            writer.take();
            self.closed.send_replace(true);
        }
        result
    }

    fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        trace!(remote = %self.remote, "Closing socket");
        // Halves not in use are dropped now; busy ones on return.
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl std::fmt::Debug for TokioSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioSocket")
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}
