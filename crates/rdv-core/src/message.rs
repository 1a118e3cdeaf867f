//! Protocol vocabulary: actions, statuses, and typed bodies.
//!
//! Bodies travel as JSON objects keyed by the upper-case names in [`keys`].
//! Requests always carry `RQ#`; responses echo it back so the sender can
//! correlate them.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::wire::{self, Envelope, ProtocolError};

/// Body keys as they appear on the wire.
pub mod keys {
    pub const REQUEST_ID: &str = "RQ#";
    pub const ACTION: &str = "ACTION";
    pub const NAME: &str = "NAME";
    pub const TARGET: &str = "TARGET";
    pub const IP_ADDRESS: &str = "IP_ADDRESS";
    pub const UDP_SOCKET: &str = "UDP_SOCKET";
    pub const TCP_SOCKET: &str = "TCP_SOCKET";
    pub const LIST_OF_FILES: &str = "LIST_OF_FILES";
    pub const FILE_NAME: &str = "FILE_NAME";
    pub const CHUNK: &str = "CHUNK#";
    pub const TEXT: &str = "TEXT";
    pub const STATUS: &str = "STATUS";
    pub const REASON: &str = "REASON";
    pub const PEERS: &str = "PEERS";
    pub const PEER: &str = "PEER";
}

// ── Actions ───────────────────────────────────────────────────────────────────

/// Control-plane operations understood by the rendezvous server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Register,
    DeRegister,
    Publish,
    Remove,
    RetrieveAll,
    RetrieveInfo,
    SearchFile,
    UpdateContact,
}

impl Action {
    pub const ALL: [Action; 8] = [
        Action::Register,
        Action::DeRegister,
        Action::Publish,
        Action::Remove,
        Action::RetrieveAll,
        Action::RetrieveInfo,
        Action::SearchFile,
        Action::UpdateContact,
    ];

    /// Start-line spelling.
    pub fn method(&self) -> &'static str {
        match self {
            Action::Register => "REGISTER",
            Action::DeRegister => "DE-REGISTER",
            Action::Publish => "PUBLISH",
            Action::Remove => "REMOVE",
            Action::RetrieveAll => "RETRIEVE-ALL",
            Action::RetrieveInfo => "RETRIEVE-INFO",
            Action::SearchFile => "SEARCH-FILE",
            Action::UpdateContact => "UPDATE-CONTACT",
        }
    }

    /// Resolve a method in any casing / separator style.
    pub fn from_method(raw: &str) -> Option<Self> {
        let canonical = wire::normalize_method(raw);
        Self::ALL
            .into_iter()
            .find(|a| wire::normalize_method(a.method()) == canonical)
    }

    /// `STATUS` value of a successful response.
    pub fn confirmed_status(&self) -> &'static str {
        match self {
            Action::Register => "REGISTERED",
            Action::DeRegister => "DE-REGISTERED",
            Action::Publish => "PUBLISHED",
            Action::Remove => "REMOVED",
            Action::RetrieveAll => "RETRIEVE",
            Action::RetrieveInfo => "RETRIEVE-INFO",
            Action::SearchFile => "SEARCH-FILE",
            Action::UpdateContact => "UPDATE-CONFIRMED",
        }
    }

    /// Whether `status` can answer this action: its confirmed or denied
    /// status, or the generic invalid-request status.
    pub fn accepts_status(&self, status: &str) -> bool {
        status == self.confirmed_status() || status == self.denied_status() || status == INVALID_STATUS
    }

    /// `STATUS` value of a failed response.
    pub fn denied_status(&self) -> &'static str {
        match self {
            Action::Register => "REGISTER-DENIED",
            Action::DeRegister => "DE-REGISTER-DENIED",
            Action::Publish => "PUBLISH-DENIED",
            Action::Remove => "REMOVE-DENIED",
            Action::RetrieveAll | Action::RetrieveInfo => "RETRIEVE-ERROR",
            Action::SearchFile => "SEARCH-ERROR",
            Action::UpdateContact => "UPDATE-DENIED",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.method())
    }
}

/// Transfer-plane message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Download,
    File,
    FileEnd,
    DownloadError,
}

impl TransferMethod {
    pub fn method(&self) -> &'static str {
        match self {
            TransferMethod::Download => "DOWNLOAD",
            TransferMethod::File => "FILE",
            TransferMethod::FileEnd => "FILE-END",
            TransferMethod::DownloadError => "DOWNLOAD-ERROR",
        }
    }

    pub fn from_method(raw: &str) -> Option<Self> {
        match wire::normalize_method(raw).as_str() {
            "download" => Some(TransferMethod::Download),
            "file" => Some(TransferMethod::File),
            "file_end" => Some(TransferMethod::FileEnd),
            "download_error" => Some(TransferMethod::DownloadError),
            _ => None,
        }
    }
}

/// Status of a request no handler recognises.
pub const INVALID_STATUS: &str = "ERROR";
pub const INVALID_REASON: &str = "invalid request";

// ── Status codes ──────────────────────────────────────────────────────────────

/// Response status line codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok = 200,
    BadRequest = 400,
    Unauthorized = 401,
    Forbidden = 403,
    NotFound = 404,
    InternalServerError = 500,
    BadGateway = 502,
    ServiceUnavailable = 503,
}

impl StatusCode {
    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            StatusCode::Ok => "OK",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::Unauthorized => "Unauthorized",
            StatusCode::Forbidden => "Forbidden",
            StatusCode::NotFound => "Not Found",
            StatusCode::InternalServerError => "Internal Server Error",
            StatusCode::BadGateway => "Bad Gateway",
            StatusCode::ServiceUnavailable => "Service Unavailable",
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            200 => Some(StatusCode::Ok),
            400 => Some(StatusCode::BadRequest),
            401 => Some(StatusCode::Unauthorized),
            403 => Some(StatusCode::Forbidden),
            404 => Some(StatusCode::NotFound),
            500 => Some(StatusCode::InternalServerError),
            502 => Some(StatusCode::BadGateway),
            503 => Some(StatusCode::ServiceUnavailable),
            _ => None,
        }
    }

    /// `"200 OK"`, `"500 Internal Server Error"`, ...
    pub fn start_line(&self) -> String {
        format!("{} {}", self.code(), self.phrase())
    }

    /// Parse the numeric prefix of a response start line.
    pub fn parse_start_line(line: &str) -> Option<Self> {
        line.split_whitespace()
            .next()
            .and_then(|c| c.parse().ok())
            .and_then(Self::from_code)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.code())
    }
}

// ── Request ids ───────────────────────────────────────────────────────────────

/// Per-process request number source. Never reuses a value.
///
/// A long-running peer starts at 0. A one-shot process that reuses a
/// fixed local port across runs must start past every id it sent before;
/// see [`crate::request_ids::RequestIdStore`].
///
/// Cloning shares the counter, so the control client and the transfer
/// client of one peer draw from the same sequence.
#[derive(Debug, Clone, Default)]
pub struct RequestCounter(Arc<AtomicU64>);

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(first: u64) -> Self {
        Self(Arc::new(AtomicU64::new(first)))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }

    /// The value the next call to [`next`](Self::next) will return.
    pub fn peek(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Extract `RQ#` from a decoded body.
pub fn request_id(body: &Value) -> Result<u64, ProtocolError> {
    body.get(keys::REQUEST_ID)
        .and_then(Value::as_u64)
        .ok_or(ProtocolError::MissingField(keys::REQUEST_ID))
}

// ── Directory records ─────────────────────────────────────────────────────────

/// A registered peer, as the directory stores it and the wire reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "IP_ADDRESS")]
    pub ip: IpAddr,
    #[serde(rename = "UDP_SOCKET")]
    pub udp_port: u16,
    #[serde(rename = "TCP_SOCKET")]
    pub tcp_port: u16,
    #[serde(rename = "LIST_OF_FILES", default)]
    pub files: BTreeSet<String>,
}

// ── Request payloads ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterPayload {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "IP_ADDRESS")]
    pub ip: IpAddr,
    /// Absent or null: the server uses the datagram's source port.
    #[serde(rename = "UDP_SOCKET", default)]
    pub udp_port: Option<u16>,
    #[serde(rename = "TCP_SOCKET")]
    pub tcp_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePayload {
    #[serde(rename = "NAME")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesPayload {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "LIST_OF_FILES")]
    pub files: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoPayload {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "TARGET")]
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPayload {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "FILE_NAME")]
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPayload {
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "IP_ADDRESS")]
    pub ip: IpAddr,
    #[serde(rename = "UDP_SOCKET")]
    pub udp_port: u16,
    #[serde(rename = "TCP_SOCKET")]
    pub tcp_port: u16,
}

// ── Transfer payloads ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    #[serde(rename = "RQ#")]
    pub request_id: u64,
    #[serde(rename = "FILE_NAME")]
    pub file_name: String,
}

/// One slice of file text. The last one travels as `FILE-END`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    #[serde(rename = "RQ#")]
    pub request_id: u64,
    #[serde(rename = "FILE_NAME")]
    pub file_name: String,
    #[serde(rename = "CHUNK#")]
    pub chunk_number: u64,
    #[serde(rename = "TEXT")]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadFailure {
    #[serde(rename = "RQ#")]
    pub request_id: u64,
    #[serde(rename = "STATUS")]
    pub status: String,
    #[serde(rename = "REASON")]
    pub reason: String,
}

impl DownloadFailure {
    pub fn new(request_id: u64, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            status: TransferMethod::DownloadError.method().to_string(),
            reason: reason.into(),
        }
    }
}

// ── Responses ─────────────────────────────────────────────────────────────────

/// A control-plane response.
///
/// `fields` holds action-specific results (`PEERS`, `PEER`) alongside the
/// fixed `RQ#` / `STATUS` / `REASON` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub code: StatusCode,
    pub request_id: u64,
    pub status: String,
    pub reason: Option<String>,
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn confirmed(request_id: u64, action: Action) -> Self {
        Self {
            code: StatusCode::Ok,
            request_id,
            status: action.confirmed_status().to_string(),
            reason: None,
            fields: Map::new(),
        }
    }

    pub fn denied(request_id: u64, action: Action, reason: impl Into<String>) -> Self {
        Self::failure(request_id, action.denied_status(), reason)
    }

    pub fn invalid(request_id: u64) -> Self {
        Self::failure(request_id, INVALID_STATUS, INVALID_REASON)
    }

    pub fn failure(request_id: u64, status: &str, reason: impl Into<String>) -> Self {
        Self {
            code: StatusCode::InternalServerError,
            request_id,
            status: status.to_string(),
            reason: Some(reason.into()),
            fields: Map::new(),
        }
    }

    /// Attach a result field.
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }

    /// The JSON body as sent on the wire.
    pub fn body(&self) -> Value {
        let mut body = self.fields.clone();
        body.insert(keys::REQUEST_ID.into(), Value::from(self.request_id));
        body.insert(keys::STATUS.into(), Value::from(self.status.clone()));
        if let Some(reason) = &self.reason {
            body.insert(keys::REASON.into(), Value::from(reason.clone()));
        }
        Value::Object(body)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        wire::encode(&self.code.start_line(), &self.body())
    }

    pub fn from_envelope(env: &Envelope) -> Result<Self, ProtocolError> {
        let code = StatusCode::parse_start_line(&env.start_line)
            .ok_or_else(|| ProtocolError::InvalidStartLine(env.start_line.clone()))?;
        let mut fields = env
            .body
            .as_object()
            .cloned()
            .ok_or(ProtocolError::BodyNotObject)?;

        let request_id = fields
            .remove(keys::REQUEST_ID)
            .and_then(|v| v.as_u64())
            .ok_or(ProtocolError::MissingField(keys::REQUEST_ID))?;
        let status = match fields.remove(keys::STATUS) {
            Some(Value::String(s)) => s,
            _ => return Err(ProtocolError::MissingField(keys::STATUS)),
        };
        let reason = match fields.remove(keys::REASON) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };

        Ok(Self {
            code,
            request_id,
            status,
            reason,
            fields,
        })
    }

    /// `PEERS` result of RETRIEVE-ALL and SEARCH-FILE.
    pub fn peers(&self) -> Result<Vec<PeerRecord>, ProtocolError> {
        let value = self
            .fields
            .get(keys::PEERS)
            .ok_or(ProtocolError::MissingField(keys::PEERS))?;
        serde_json::from_value(value.clone()).map_err(|e| ProtocolError::Json(e.to_string()))
    }

    /// `PEER` result of RETRIEVE-INFO.
    pub fn peer(&self) -> Result<PeerRecord, ProtocolError> {
        let value = self
            .fields
            .get(keys::PEER)
            .ok_or(ProtocolError::MissingField(keys::PEER))?;
        serde_json::from_value(value.clone()).map_err(|e| ProtocolError::Json(e.to_string()))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
