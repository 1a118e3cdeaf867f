//! Rendezvous wire format: the envelope shared by the UDP control plane
//! and the TCP transfer plane.
//!
//! Every message is a fixed-width header block followed by a JSON body:
//!
//! ```text
//! REGISTER                 \r\n
//! Content-Length: 57        \r\n
//! Content-Type: text/json\r\n
//! Content-Encoding: utf-8 \r\n
//! \r\n
//! {"RQ#":0,"ACTION":"REGISTER",...}
//! ```
//!
//! The header block is always exactly [`HEADER_SIZE`] bytes so a stream
//! reader can take it in one bounded read before it knows the body length.
//! Changing any width here breaks every deployed peer.

use serde::Serialize;
use serde_json::Value;
use static_assertions::const_assert_eq;

// ── Field widths ──────────────────────────────────────────────────────────────

/// Column width of the method / status line (padded or truncated).
pub const METHOD_WIDTH: usize = 25;

/// Column width of the Content-Length value.
pub const LENGTH_WIDTH: usize = 10;

/// Column width of the Content-Type value.
pub const TYPE_WIDTH: usize = 9;

/// Column width of the Content-Encoding value.
pub const ENCODING_WIDTH: usize = 6;

const LENGTH_PREFIX: &str = "Content-Length: ";
const TYPE_PREFIX: &str = "Content-Type: ";
const ENCODING_PREFIX: &str = "Content-Encoding: ";
const CRLF: &str = "\r\n";

/// Bytes of fixed text around the variable columns: four CRLF line ends,
/// three header-name prefixes, and the blank separator line.
const FRAMING_OVERHEAD: usize =
    4 * CRLF.len() + LENGTH_PREFIX.len() + TYPE_PREFIX.len() + ENCODING_PREFIX.len() + CRLF.len();

/// Total size of the header block, separator included.
pub const HEADER_SIZE: usize =
    METHOD_WIDTH + LENGTH_WIDTH + TYPE_WIDTH + ENCODING_WIDTH + FRAMING_OVERHEAD;

// If either of these fails the wire format has silently changed.
const_assert_eq!(FRAMING_OVERHEAD, 58);
const_assert_eq!(HEADER_SIZE, 108);

/// Largest body the length column can describe.
pub const MAX_CONTENT_LENGTH: usize = 9_999_999_999;

// ── Header values ─────────────────────────────────────────────────────────────

/// Body media type. JSON is the only one the protocol speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Json,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Json => "text/json",
        }
    }
}

impl std::str::FromStr for ContentType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text/json" => Ok(ContentType::Json),
            other => Err(ProtocolError::UnsupportedContentType(other.to_string())),
        }
    }
}

/// Body character encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Utf8,
}

impl ContentEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Utf8 => "utf-8",
        }
    }
}

impl std::str::FromStr for ContentEncoding {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("utf-8") || s.eq_ignore_ascii_case("utf8") {
            Ok(ContentEncoding::Utf8)
        } else {
            Err(ProtocolError::UnsupportedEncoding(s.to_string()))
        }
    }
}

/// The three header lines that follow the start line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Headers {
    pub content_length: usize,
    pub content_type: ContentType,
    pub content_encoding: ContentEncoding,
}

/// A fully decoded message.
///
/// `start_line` is the method (`REGISTER`, `FILE-END`, ...) for requests and
/// transfer messages, or `<code> <phrase>` for control-plane responses.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub start_line: String,
    pub headers: Headers,
    pub body: Value,
}

impl Envelope {
    /// The start line in canonical action form (see [`normalize_method`]).
    pub fn action(&self) -> String {
        normalize_method(&self.start_line)
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Serialize `body` as compact JSON behind a fixed-width header block.
///
/// The start line must be ASCII; longer lines are truncated to
/// [`METHOD_WIDTH`] columns.
pub fn encode<T: Serialize + ?Sized>(start_line: &str, body: &T) -> Result<Vec<u8>, ProtocolError> {
    if !start_line.is_ascii() || start_line.contains(['\r', '\n']) {
        return Err(ProtocolError::InvalidStartLine(start_line.to_string()));
    }
    let start_line = &start_line[..start_line.len().min(METHOD_WIDTH)];

    let body = serde_json::to_vec(body).map_err(|e| ProtocolError::Json(e.to_string()))?;
    if body.len() > MAX_CONTENT_LENGTH {
        return Err(ProtocolError::BodyTooLarge(body.len()));
    }

    let header = format!(
        "{start_line:<mw$}{CRLF}{LENGTH_PREFIX}{len:<lw$}{CRLF}{TYPE_PREFIX}{ct:<tw$}{CRLF}{ENCODING_PREFIX}{ce:<ew$}{CRLF}{CRLF}",
        len = body.len(),
        ct = ContentType::Json.as_str(),
        ce = ContentEncoding::Utf8.as_str(),
        mw = METHOD_WIDTH,
        lw = LENGTH_WIDTH,
        tw = TYPE_WIDTH,
        ew = ENCODING_WIDTH,
    );
    debug_assert_eq!(header.len(), HEADER_SIZE);

    let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Canonical action identifier: trimmed, lower-cased, hyphens folded to `_`.
///
/// `"DE-REGISTER   "` becomes `"de_register"`.
pub fn normalize_method(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('-', "_")
}

/// The raw start line with its padding trimmed.
pub fn decode_start_line(bytes: &[u8]) -> Result<String, ProtocolError> {
    let header = header_block(bytes)?;
    let line = header
        .split(CRLF)
        .next()
        .ok_or(ProtocolError::MalformedHeader("missing start line"))?;
    let line = line.trim();
    if line.is_empty() {
        return Err(ProtocolError::MalformedHeader("empty start line"));
    }
    Ok(line.to_string())
}

/// Read the start line and normalize it to an action identifier.
pub fn decode_method(bytes: &[u8]) -> Result<String, ProtocolError> {
    decode_start_line(bytes).map(|line| normalize_method(&line))
}

/// Parse the three fixed header lines.
pub fn decode_headers(bytes: &[u8]) -> Result<Headers, ProtocolError> {
    let header = header_block(bytes)?;
    if !header.ends_with("\r\n\r\n") {
        return Err(ProtocolError::MalformedHeader("missing header terminator"));
    }

    let mut lines = header.split(CRLF).skip(1);
    let length = header_value(lines.next(), LENGTH_PREFIX)?;
    let content_type = header_value(lines.next(), TYPE_PREFIX)?;
    let encoding = header_value(lines.next(), ENCODING_PREFIX)?;

    let content_length = length
        .parse::<usize>()
        .map_err(|_| ProtocolError::InvalidContentLength(length.to_string()))?;

    Ok(Headers {
        content_length,
        content_type: content_type.parse()?,
        content_encoding: encoding.parse()?,
    })
}

/// Parse exactly `content_length` bytes of `body` as a JSON object.
pub fn decode_body(body: &[u8], content_length: usize) -> Result<Value, ProtocolError> {
    if body.len() < content_length {
        return Err(ProtocolError::Truncated {
            expected: content_length,
            actual: body.len(),
        });
    }
    let value: Value = serde_json::from_slice(&body[..content_length])
        .map_err(|e| ProtocolError::Json(e.to_string()))?;
    if !value.is_object() {
        return Err(ProtocolError::BodyNotObject);
    }
    Ok(value)
}

/// Decode a complete message held in one buffer (a UDP datagram).
///
/// The buffer must contain exactly the header block plus `Content-Length`
/// body bytes.
pub fn decode(bytes: &[u8]) -> Result<Envelope, ProtocolError> {
    let start_line = decode_start_line(bytes)?;
    let headers = decode_headers(bytes)?;
    let body_bytes = &bytes[HEADER_SIZE..];
    if body_bytes.len() > headers.content_length {
        return Err(ProtocolError::TrailingBytes(
            body_bytes.len() - headers.content_length,
        ));
    }
    let body = decode_body(body_bytes, headers.content_length)?;
    Ok(Envelope {
        start_line,
        headers,
        body,
    })
}

fn header_block(bytes: &[u8]) -> Result<&str, ProtocolError> {
    if bytes.len() < HEADER_SIZE {
        return Err(ProtocolError::Truncated {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    std::str::from_utf8(&bytes[..HEADER_SIZE])
        .map_err(|_| ProtocolError::MalformedHeader("header block is not UTF-8"))
}

fn header_value<'a>(line: Option<&'a str>, prefix: &str) -> Result<&'a str, ProtocolError> {
    let line = line.ok_or(ProtocolError::MalformedHeader("missing header line"))?;
    let name = prefix.trim_end();
    match line.split_once(':') {
        Some((key, value)) if key.trim().eq_ignore_ascii_case(name.trim_end_matches(':')) => {
            Ok(value.trim())
        }
        _ => Err(ProtocolError::MalformedHeader("unexpected header line")),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A message that cannot be interpreted. The datagram or connection that
/// carried it is unusable; there is no partial recovery.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("message truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("{0} unexpected bytes after body")]
    TrailingBytes(usize),

    #[error("malformed header: {0}")]
    MalformedHeader(&'static str),

    #[error("invalid start line: {0:?}")]
    InvalidStartLine(String),

    #[error("invalid content length: {0:?}")]
    InvalidContentLength(String),

    #[error("unsupported content type: {0:?}")]
    UnsupportedContentType(String),

    #[error("unsupported content encoding: {0:?}")]
    UnsupportedEncoding(String),

    #[error("body of {0} bytes exceeds the length field")]
    BodyTooLarge(usize),

    #[error("invalid JSON body: {0}")]
    Json(String),

    #[error("body is not a JSON object")]
    BodyNotObject,

    #[error("missing or invalid field {0}")]
    MissingField(&'static str),

    #[error("unexpected message {0:?}")]
    UnexpectedMethod(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
