//! Control-plane client with bounded retry.
//!
//! Each call gets a fresh request id and is sent up to `attempts` times,
//! byte-for-byte identical, waiting `timeout` per attempt. Responses with
//! another request id, from another address, or that fail to decode are
//! discarded without restarting the attempt's clock.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::time::Instant;

use rdv_core::config::{DEFAULT_MAX_ATTEMPTS, DEFAULT_REQUEST_TIMEOUT_MS};
use rdv_core::message::{
    keys, ContactPayload, FilesPayload, InfoPayload, NamePayload, RegisterPayload, SearchPayload,
};
use rdv_core::wire::{self, ProtocolError};
use rdv_core::{Action, RequestCounter, Response};

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("no response from {server} after {attempts} attempts")]
    NoResponse { server: SocketAddr, attempts: u32 },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("control socket I/O failed: {0}")]
    Io(#[from] std::io::Error),
    /// The id matched but the status belongs to another action, which means
    /// the server answered from its cache of an earlier request.
    #[error("{action} request {request_id} answered with {status}")]
    UnexpectedStatus {
        action: Action,
        request_id: u64,
        status: String,
    },
}

pub struct ControlClient {
    socket: Mutex<UdpSocket>,
    server_addr: SocketAddr,
    counter: RequestCounter,
    timeout: Duration,
    attempts: u32,
}

impl ControlClient {
    /// Bind a local UDP socket (port 0 for an ephemeral one).
    pub async fn bind(
        local: SocketAddr,
        server_addr: SocketAddr,
        counter: RequestCounter,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        Ok(Self {
            socket: Mutex::new(socket),
            server_addr,
            counter,
            timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }

    pub fn with_timing(mut self, timeout: Duration, attempts: u32) -> Self {
        self.timeout = timeout;
        self.attempts = attempts.max(1);
        self
    }

    pub async fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.lock().await.local_addr()
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn counter(&self) -> &RequestCounter {
        &self.counter
    }

    /// Send `payload` as `action` and wait for the matching response.
    ///
    /// `RQ#` and `ACTION` are filled in here; `payload` must serialize to
    /// a JSON object.
    pub async fn call<P>(&self, action: Action, payload: &P) -> Result<Response, ControlError>
    where
        P: Serialize + ?Sized,
    {
        let mut body = match serde_json::to_value(payload) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(ProtocolError::BodyNotObject.into()),
            Err(e) => return Err(ProtocolError::Json(e.to_string()).into()),
        };
        let request_id = self.counter.next();
        body.insert(keys::REQUEST_ID.into(), Value::from(request_id));
        body.insert(keys::ACTION.into(), Value::from(action.method()));
        let request = wire::encode(action.method(), &body)?;

        let socket = self.socket.lock().await;
        let mut buf = vec![0u8; 65_536];

        for attempt in 1..=self.attempts {
            socket.send_to(&request, self.server_addr).await?;
            tracing::debug!(request_id, %action, attempt, server = %self.server_addr, "request sent");

            let deadline = Instant::now() + self.timeout;
            loop {
                let (len, from) =
                    match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                        Err(_) => {
                            tracing::debug!(request_id, attempt, "no response before deadline");
                            break;
                        }
                        Ok(Err(e)) if is_transient(&e) => {
                            tracing::debug!(request_id, error = %e, "transient receive error");
                            continue;
                        }
                        Ok(Err(e)) => return Err(e.into()),
                        Ok(Ok(r)) => r,
                    };

                if from != self.server_addr {
                    tracing::debug!(from = %from, "datagram from unexpected address, discarding");
                    continue;
                }
                let response = match wire::decode(&buf[..len])
                    .and_then(|env| Response::from_envelope(&env))
                {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::debug!(error = %e, "undecodable response, discarding");
                        continue;
                    }
                };
                if response.request_id != request_id {
                    tracing::debug!(
                        expected = request_id,
                        got = response.request_id,
                        "stale response, discarding"
                    );
                    continue;
                }
                if !action.accepts_status(&response.status) {
                    tracing::warn!(request_id, %action, status = %response.status, "response is for another action");
                    return Err(ControlError::UnexpectedStatus {
                        action,
                        request_id,
                        status: response.status,
                    });
                }
                return Ok(response);
            }
        }

        tracing::warn!(request_id, %action, attempts = self.attempts, "request went unanswered");
        Err(ControlError::NoResponse {
            server: self.server_addr,
            attempts: self.attempts,
        })
    }

    // ── Typed calls ───────────────────────────────────────────────────────────

    /// `udp_port = None` lets the server record this socket's source port.
    pub async fn register(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: Option<u16>,
        tcp_port: u16,
    ) -> Result<Response, ControlError> {
        let payload = RegisterPayload {
            name: name.to_string(),
            ip,
            udp_port,
            tcp_port,
        };
        self.call(Action::Register, &payload).await
    }

    pub async fn deregister(&self, name: &str) -> Result<Response, ControlError> {
        self.call(Action::DeRegister, &name_payload(name)).await
    }

    pub async fn publish(&self, name: &str, files: &[String]) -> Result<Response, ControlError> {
        self.call(Action::Publish, &files_payload(name, files)).await
    }

    pub async fn remove(&self, name: &str, files: &[String]) -> Result<Response, ControlError> {
        self.call(Action::Remove, &files_payload(name, files)).await
    }

    pub async fn retrieve_all(&self, name: &str) -> Result<Response, ControlError> {
        self.call(Action::RetrieveAll, &name_payload(name)).await
    }

    pub async fn retrieve_info(&self, name: &str, target: &str) -> Result<Response, ControlError> {
        let payload = InfoPayload {
            name: name.to_string(),
            target: target.to_string(),
        };
        self.call(Action::RetrieveInfo, &payload).await
    }

    pub async fn search_file(&self, name: &str, file_name: &str) -> Result<Response, ControlError> {
        let payload = SearchPayload {
            name: name.to_string(),
            file_name: file_name.to_string(),
        };
        self.call(Action::SearchFile, &payload).await
    }

    pub async fn update_contact(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<Response, ControlError> {
        let payload = ContactPayload {
            name: name.to_string(),
            ip,
            udp_port,
            tcp_port,
        };
        self.call(Action::UpdateContact, &payload).await
    }
}

fn name_payload(name: &str) -> NamePayload {
    NamePayload {
        name: name.to_string(),
    }
}

fn files_payload(name: &str, files: &[String]) -> FilesPayload {
    FilesPayload {
        name: name.to_string(),
        files: files.to_vec(),
    }
}

/// ICMP errors surfaced on some platforms for unconnected UDP sockets.
fn is_transient(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
    )
}
