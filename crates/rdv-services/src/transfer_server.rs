//! Per-peer TCP transfer server.
//!
//! One DOWNLOAD request per connection. The file is streamed as FILE
//! chunks, the last one sent as FILE-END, and the connection is closed.
//! Any failure to produce the file text is reported with a single
//! DOWNLOAD-ERROR message instead.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use rdv_core::message::{DownloadFailure, DownloadRequest, FileChunk};
use rdv_core::wire::ProtocolError;
use rdv_core::TransferMethod;

use crate::chunking::ChunkReader;
use crate::file_root::FileRoot;
use crate::framing::{read_envelope, write_envelope, FrameError};

/// How long a new connection may take to send its DOWNLOAD request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TransferServer {
    listener: TcpListener,
    root: Arc<FileRoot>,
    chunk_chars: usize,
    request_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl TransferServer {
    pub async fn bind(
        addr: SocketAddr,
        root: FileRoot,
        chunk_chars: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            root: Arc::new(root),
            chunk_chars,
            request_timeout: REQUEST_TIMEOUT,
            shutdown,
        })
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> std::io::Result<()> {
        tracing::info!(
            addr = %self.listener.local_addr()?,
            root = %self.root.path().display(),
            "transfer server listening"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("transfer server shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let root = self.root.clone();
                    let chunk_chars = self.chunk_chars;
                    let request_timeout = self.request_timeout;
                    tokio::spawn(async move {
                        if let Err(e) = serve_download(stream, &root, chunk_chars, request_timeout).await {
                            tracing::warn!(peer = %peer, error = %e, "transfer connection failed");
                        }
                    });
                }
            }
        }
    }
}

enum StreamFailure {
    /// The file text could not be produced; reported to the peer.
    Source(String),
    /// The connection itself failed.
    Frame(FrameError),
}

impl From<FrameError> for StreamFailure {
    fn from(e: FrameError) -> Self {
        StreamFailure::Frame(e)
    }
}

/// Answer one DOWNLOAD request on `stream`, then close it. A peer that
/// sends nothing within `request_timeout` is dropped.
pub async fn serve_download<S>(
    mut stream: S,
    root: &FileRoot,
    chunk_chars: usize,
    request_timeout: Duration,
) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = tokio::time::timeout(request_timeout, read_envelope(&mut stream))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "no DOWNLOAD request"))?;
    let Some(envelope) = first? else {
        return Ok(());
    };
    if TransferMethod::from_method(&envelope.start_line) != Some(TransferMethod::Download) {
        return Err(ProtocolError::UnexpectedMethod(envelope.start_line).into());
    }
    let request: DownloadRequest = serde_json::from_value(envelope.body)
        .map_err(|e| ProtocolError::Json(e.to_string()))?;

    match stream_file(&mut stream, root, &request, chunk_chars).await {
        Ok(chunks) => {
            tracing::info!(
                request_id = request.request_id,
                file = %request.file_name,
                chunks,
                "download served"
            );
        }
        Err(StreamFailure::Source(reason)) => {
            tracing::warn!(
                request_id = request.request_id,
                file = %request.file_name,
                reason = %reason,
                "download failed"
            );
            let failure = DownloadFailure::new(request.request_id, reason);
            write_envelope(&mut stream, TransferMethod::DownloadError.method(), &failure).await?;
        }
        Err(StreamFailure::Frame(e)) => return Err(e),
    }

    stream.shutdown().await?;
    Ok(())
}

/// Send the file as FILE / FILE-END chunks. Returns the chunk count.
async fn stream_file<S>(
    stream: &mut S,
    root: &FileRoot,
    request: &DownloadRequest,
    chunk_chars: usize,
) -> Result<u64, StreamFailure>
where
    S: AsyncWrite + Unpin,
{
    let file = root
        .open_for_read(&request.file_name)
        .await
        .map_err(|e| StreamFailure::Source(e.to_string()))?;
    let mut reader = ChunkReader::new(file, chunk_chars);

    let mut chunk_number = 0u64;
    loop {
        let text = reader
            .next_chunk()
            .await
            .map_err(|e| StreamFailure::Source(format!("cannot read {}: {e}", request.file_name)))?;
        let last = reader.is_terminal(&text);
        let method = if last {
            TransferMethod::FileEnd
        } else {
            TransferMethod::File
        };

        let chunk = FileChunk {
            request_id: request.request_id,
            file_name: request.file_name.clone(),
            chunk_number,
            text,
        };
        write_envelope(stream, method.method(), &chunk).await?;
        tracing::trace!(request_id = request.request_id, chunk = chunk_number, "chunk sent");

        chunk_number += 1;
        if last {
            return Ok(chunk_number);
        }
    }
}
