//! Control-plane request handling.
//!
//! One datagram in, at most one datagram out. The dispatcher decodes the
//! envelope, consults the dedup ledger, performs exactly one directory
//! operation and encodes the response. It is synchronous; the UDP loop
//! runs it on the blocking pool.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

use rdv_core::message::{
    self, keys, ContactPayload, FilesPayload, InfoPayload, NamePayload, RegisterPayload,
    SearchPayload,
};
use rdv_core::wire::{self, Envelope};
use rdv_core::{Action, Response};

use crate::directory::Directory;
use crate::ledger::{LedgerEntry, RequestLedger};

/// What the network loop should do with a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send this freshly produced response.
    Reply(Bytes),
    /// Resend the response cached for a duplicate request.
    Replay(Bytes),
    /// Send nothing.
    Drop,
}

/// Largest UDP payload over IPv4.
pub const MAX_DATAGRAM_RESPONSE: usize = 65_507;

/// Result field attached to a successful response.
type ResultField = Option<(&'static str, Value)>;

pub struct ControlDispatcher {
    directory: Arc<dyn Directory>,
    ledger: Arc<dyn RequestLedger>,
    replay_duplicates: bool,
    max_response_len: usize,
}

impl ControlDispatcher {
    pub fn new(directory: Arc<dyn Directory>, ledger: Arc<dyn RequestLedger>) -> Self {
        Self {
            directory,
            ledger,
            replay_duplicates: true,
            max_response_len: MAX_DATAGRAM_RESPONSE,
        }
    }

    /// Whether answered duplicates get their cached response resent.
    pub fn replay_duplicates(mut self, replay: bool) -> Self {
        self.replay_duplicates = replay;
        self
    }

    /// Responses that encode larger than `len` bytes are replaced by a
    /// failure response.
    pub fn max_response_len(mut self, len: usize) -> Self {
        self.max_response_len = len;
        self
    }

    pub fn handle(&self, datagram: &[u8], source: SocketAddr) -> Outcome {
        let envelope = match wire::decode(datagram) {
            Ok(env) => env,
            Err(e) => {
                tracing::debug!(peer = %source, error = %e, "undecodable datagram, discarding");
                return Outcome::Drop;
            }
        };
        let request_id = match message::request_id(&envelope.body) {
            Ok(id) => id,
            Err(e) => {
                tracing::debug!(peer = %source, error = %e, "request without id, discarding");
                return Outcome::Drop;
            }
        };

        match self.ledger.begin(source, request_id) {
            LedgerEntry::Fresh => {}
            LedgerEntry::InFlight => {
                tracing::debug!(peer = %source, request_id, "duplicate of in-flight request, dropping");
                return Outcome::Drop;
            }
            LedgerEntry::Answered(cached) if self.replay_duplicates => {
                tracing::debug!(peer = %source, request_id, "duplicate request, replaying response");
                return Outcome::Replay(cached);
            }
            LedgerEntry::Answered(_) => {
                tracing::debug!(peer = %source, request_id, "duplicate request, ignoring");
                return Outcome::Drop;
            }
        }

        let response = self.respond(&envelope, request_id, source);
        tracing::info!(
            peer = %source,
            request_id,
            action = %envelope.start_line,
            status = %response.status,
            "request handled"
        );

        match self.encode(&envelope, response) {
            Some(encoded) => {
                self.ledger.complete(source, request_id, encoded.clone());
                Outcome::Reply(encoded)
            }
            None => {
                // Forget the id so a retransmission is dispatched afresh.
                self.ledger.abandon(source, request_id);
                Outcome::Drop
            }
        }
    }

    /// Encode `response`, falling back to a failure response with the same
    /// id when it cannot be encoded or would not fit in one datagram.
    fn encode(&self, envelope: &Envelope, response: Response) -> Option<Bytes> {
        let problem = match response.encode() {
            Ok(encoded) if encoded.len() <= self.max_response_len => return Some(Bytes::from(encoded)),
            Ok(encoded) => format!("response of {} bytes exceeds one datagram", encoded.len()),
            Err(e) => format!("response could not be encoded: {e}"),
        };
        tracing::warn!(request_id = response.request_id, %problem, "sending failure instead");

        let fallback = match Action::from_method(&envelope.start_line) {
            Some(action) => Response::denied(response.request_id, action, problem),
            None => Response::invalid(response.request_id),
        };
        match fallback.encode() {
            Ok(encoded) => Some(Bytes::from(encoded)),
            Err(e) => {
                tracing::warn!(request_id = response.request_id, error = %e, "failed to encode response");
                None
            }
        }
    }

    fn respond(&self, envelope: &Envelope, request_id: u64, source: SocketAddr) -> Response {
        let Some(action) = Action::from_method(&envelope.start_line) else {
            return Response::invalid(request_id);
        };
        match self.perform(action, &envelope.body, source) {
            Ok(Some((key, value))) => Response::confirmed(request_id, action).with(key, value),
            Ok(None) => Response::confirmed(request_id, action),
            Err(reason) => Response::denied(request_id, action, reason),
        }
    }

    /// Run the one directory operation behind `action`.
    fn perform(&self, action: Action, body: &Value, source: SocketAddr) -> Result<ResultField, String> {
        let dir = &self.directory;
        match action {
            Action::Register => {
                let p: RegisterPayload = parse(action, body)?;
                let udp_port = p.udp_port.unwrap_or(source.port());
                dir.register(&p.name, p.ip, udp_port, p.tcp_port)
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
            Action::DeRegister => {
                let p: NamePayload = parse(action, body)?;
                dir.deregister(&p.name).map_err(|e| e.to_string())?;
                Ok(None)
            }
            Action::Publish => {
                let p: FilesPayload = parse(action, body)?;
                dir.publish(&p.name, &p.files).map_err(|e| e.to_string())?;
                Ok(None)
            }
            Action::Remove => {
                let p: FilesPayload = parse(action, body)?;
                dir.remove(&p.name, &p.files).map_err(|e| e.to_string())?;
                Ok(None)
            }
            Action::RetrieveAll => {
                let p: NamePayload = parse(action, body)?;
                let peers = dir.list_all(&p.name).map_err(|e| e.to_string())?;
                Ok(Some((keys::PEERS, to_value(&peers)?)))
            }
            Action::RetrieveInfo => {
                let p: InfoPayload = parse(action, body)?;
                let peer = dir.lookup(&p.name, &p.target).map_err(|e| e.to_string())?;
                Ok(Some((keys::PEER, to_value(&peer)?)))
            }
            Action::SearchFile => {
                let p: SearchPayload = parse(action, body)?;
                let peers = dir
                    .find_file(&p.name, &p.file_name)
                    .map_err(|e| e.to_string())?;
                Ok(Some((keys::PEERS, to_value(&peers)?)))
            }
            Action::UpdateContact => {
                let p: ContactPayload = parse(action, body)?;
                dir.update_contact(&p.name, p.ip, p.udp_port, p.tcp_port)
                    .map_err(|e| e.to_string())?;
                Ok(None)
            }
        }
    }
}

fn parse<T: DeserializeOwned>(action: Action, body: &Value) -> Result<T, String> {
    serde_json::from_value(body.clone()).map_err(|e| format!("malformed {action} request: {e}"))
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}
