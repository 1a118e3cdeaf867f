//! Rendezvous UDP loop.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::dispatch::{ControlDispatcher, Outcome};

pub struct ControlServer {
    socket: Arc<UdpSocket>,
    dispatcher: Arc<ControlDispatcher>,
    recv_buffer: usize,
    shutdown: broadcast::Receiver<()>,
}

impl ControlServer {
    pub async fn bind(
        addr: SocketAddr,
        dispatcher: Arc<ControlDispatcher>,
        recv_buffer: usize,
        shutdown: broadcast::Receiver<()>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            dispatcher,
            recv_buffer,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve until the shutdown channel fires. Each datagram is handled on
    /// its own task so a slow directory write never stalls the receiver.
    pub async fn run(mut self) -> std::io::Result<()> {
        let mut buf = vec![0u8; self.recv_buffer];
        tracing::info!(addr = %self.socket.local_addr()?, "control server listening");

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("control server shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, source) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    tracing::trace!(peer = %source, len, "datagram received");

                    let datagram = buf[..len].to_vec();
                    let socket = self.socket.clone();
                    let dispatcher = self.dispatcher.clone();
                    tokio::spawn(async move {
                        handle_datagram(socket, dispatcher, datagram, source).await;
                    });
                }
            }
        }
    }
}

async fn handle_datagram(
    socket: Arc<UdpSocket>,
    dispatcher: Arc<ControlDispatcher>,
    datagram: Vec<u8>,
    source: SocketAddr,
) {
    let outcome =
        match tokio::task::spawn_blocking(move || dispatcher.handle(&datagram, source)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(peer = %source, error = %e, "request handler panicked");
                return;
            }
        };

    let bytes = match outcome {
        Outcome::Reply(bytes) | Outcome::Replay(bytes) => bytes,
        Outcome::Drop => return,
    };
    if let Err(e) = socket.send_to(&bytes, source).await {
        tracing::warn!(peer = %source, error = %e, "failed to send response");
    }
}
