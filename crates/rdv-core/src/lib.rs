//! rdv-core: wire codec, protocol vocabulary, and configuration.
//! All other rendezvous crates depend on this one.

pub mod config;
pub mod message;
pub mod request_ids;
pub mod wire;

pub use message::{Action, PeerRecord, RequestCounter, Response, StatusCode, TransferMethod};
pub use request_ids::{IdStoreError, RequestIdStore};
pub use wire::{Envelope, ProtocolError, HEADER_SIZE};
