//! Downloads a file from a peer's transfer server.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use rdv_core::message::{DownloadFailure, DownloadRequest, FileChunk};
use rdv_core::wire::{Envelope, ProtocolError};
use rdv_core::{RequestCounter, TransferMethod};

use crate::file_root::{FileRoot, FileRootError};
use crate::framing::{read_envelope, write_envelope, FrameError};
use crate::reassembly::ChunkBuffer;

/// How long a transfer may sit idle before it is abandoned.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// How far a chunk number may run ahead of the chunks received so far.
/// Servers send in order, so anything past this is a misbehaving peer.
pub const MAX_CHUNK_LEAD: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transfer I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("peer reported DOWNLOAD-ERROR: {reason}")]
    Remote { reason: String },
    #[error("connection closed after {received} chunks, {missing} missing")]
    Incomplete { received: usize, missing: u64 },
    #[error("chunk {chunk} is out of range after {received} chunks")]
    ChunkOutOfRange { chunk: u64, received: usize },
    #[error("unexpected message {0:?} on transfer connection")]
    UnexpectedMessage(String),
}

impl From<FrameError> for TransferError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => TransferError::Io(e),
            FrameError::Protocol(e) => TransferError::Protocol(e),
        }
    }
}

pub struct TransferClient {
    counter: RequestCounter,
    idle_timeout: Duration,
}

impl TransferClient {
    /// `counter` is normally shared with the peer's control client.
    pub fn new(counter: RequestCounter) -> Self {
        Self {
            counter,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Fetch `file_name` from the transfer server at `addr` and return its text.
    pub async fn download(&self, addr: SocketAddr, file_name: &str) -> Result<String, TransferError> {
        let stream = TcpStream::connect(addr).await?;
        tracing::debug!(peer = %addr, file = %file_name, "transfer connection open");
        self.download_over(stream, file_name).await
    }

    /// Like [`download`](Self::download), then write `<dir>/<file_name>`.
    /// Nothing is written unless every chunk arrived.
    pub async fn download_to(
        &self,
        addr: SocketAddr,
        file_name: &str,
        dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        let target = FileRoot::new(dir).resolve(file_name).map_err(|e| match e {
            FileRootError::InvalidName(name) => TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("refusing to write {name:?}"),
            )),
            other => TransferError::Io(std::io::Error::other(other.to_string())),
        })?;

        let text = self.download(addr, file_name).await?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(&target, text.as_bytes()).await?;
        tracing::info!(path = %target.display(), bytes = text.len(), "download saved");
        Ok(target)
    }

    /// Run the download exchange over an already-open stream.
    pub async fn download_over<S>(&self, mut stream: S, file_name: &str) -> Result<String, TransferError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let request = DownloadRequest {
            request_id: self.counter.next(),
            file_name: file_name.to_string(),
        };
        write_envelope(&mut stream, TransferMethod::Download.method(), &request).await?;

        let mut buffer = ChunkBuffer::new();
        loop {
            let next = tokio::time::timeout(self.idle_timeout, read_envelope(&mut stream))
                .await
                .map_err(|_| {
                    std::io::Error::new(std::io::ErrorKind::TimedOut, "transfer went idle")
                })??;
            let Some(envelope) = next else {
                break;
            };

            match TransferMethod::from_method(&envelope.start_line) {
                Some(method @ (TransferMethod::File | TransferMethod::FileEnd)) => {
                    let chunk: FileChunk = body_of(envelope)?;
                    if chunk.request_id != request.request_id {
                        tracing::debug!(
                            expected = request.request_id,
                            got = chunk.request_id,
                            "chunk for another request, discarding"
                        );
                        continue;
                    }
                    tracing::trace!(chunk = chunk.chunk_number, "chunk received");
                    if chunk.chunk_number > buffer.received() as u64 + MAX_CHUNK_LEAD {
                        return Err(TransferError::ChunkOutOfRange {
                            chunk: chunk.chunk_number,
                            received: buffer.received(),
                        });
                    }
                    if method == TransferMethod::FileEnd {
                        buffer.insert_terminal(chunk.chunk_number, chunk.text);
                    } else {
                        buffer.insert(chunk.chunk_number, chunk.text);
                    }
                    if let Some(text) = buffer.assemble() {
                        tracing::debug!(file = %file_name, chunks = buffer.received(), "download complete");
                        return Ok(text);
                    }
                }
                Some(TransferMethod::DownloadError) => {
                    let failure: DownloadFailure = body_of(envelope)?;
                    return Err(TransferError::Remote {
                        reason: failure.reason,
                    });
                }
                _ => return Err(TransferError::UnexpectedMessage(envelope.start_line)),
            }
        }

        Err(TransferError::Incomplete {
            received: buffer.received(),
            missing: buffer.missing(),
        })
    }
}

fn body_of<T: serde::de::DeserializeOwned>(envelope: Envelope) -> Result<T, ProtocolError> {
    serde_json::from_value(envelope.body).map_err(|e| ProtocolError::Json(e.to_string()))
}
