//! Request de-duplication ledger.
//!
//! Remembers which request ids each peer endpoint has already sent, so a
//! retransmitted datagram is recognised and never dispatched twice. The
//! encoded response is kept alongside the id so it can be replayed when
//! the original reply was lost.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;

/// What the ledger knows about a (peer, request id) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// First sighting. The id is now recorded and the caller must dispatch.
    Fresh,
    /// Seen before, still being handled.
    InFlight,
    /// Seen before and answered with these bytes.
    Answered(Bytes),
}

/// Store of request ids already seen per peer endpoint.
pub trait RequestLedger: Send + Sync {
    /// Atomically check for `request_id` and record it if absent.
    fn begin(&self, peer: SocketAddr, request_id: u64) -> LedgerEntry;

    /// Attach the encoded response to a recorded request.
    fn complete(&self, peer: SocketAddr, request_id: u64, response: Bytes);

    /// Forget a recorded request that could not be answered.
    fn abandon(&self, peer: SocketAddr, request_id: u64);

    /// Number of request ids currently remembered.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Request ids of one peer endpoint, oldest first.
#[derive(Default)]
struct PeerHistory {
    order: VecDeque<u64>,
    responses: HashMap<u64, Option<Bytes>>,
}

/// In-memory ledger keyed by peer endpoint.
///
/// Unbounded ledgers never forget an id. Bounded ledgers keep the most
/// recent `capacity` ids per endpoint and evict the oldest first.
#[derive(Clone)]
pub struct DedupLedger {
    peers: Arc<DashMap<SocketAddr, PeerHistory>>,
    capacity: Option<NonZeroUsize>,
}

impl DedupLedger {
    pub fn unbounded() -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            capacity: None,
        }
    }

    pub fn bounded(capacity: NonZeroUsize) -> Self {
        Self {
            peers: Arc::new(DashMap::new()),
            capacity: Some(capacity),
        }
    }

    /// `0` selects an unbounded ledger.
    pub fn with_capacity(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(c) => Self::bounded(c),
            None => Self::unbounded(),
        }
    }
}

impl RequestLedger for DedupLedger {
    fn begin(&self, peer: SocketAddr, request_id: u64) -> LedgerEntry {
        // The entry guard holds the shard lock for the whole check-then-record.
        let mut history = self.peers.entry(peer).or_default();

        match history.responses.get(&request_id) {
            Some(Some(response)) => return LedgerEntry::Answered(response.clone()),
            Some(None) => return LedgerEntry::InFlight,
            None => {}
        }

        if let Some(capacity) = self.capacity {
            while history.order.len() >= capacity.get() {
                if let Some(evicted) = history.order.pop_front() {
                    history.responses.remove(&evicted);
                }
            }
        }
        history.order.push_back(request_id);
        history.responses.insert(request_id, None);
        LedgerEntry::Fresh
    }

    fn complete(&self, peer: SocketAddr, request_id: u64, response: Bytes) {
        if let Some(mut history) = self.peers.get_mut(&peer) {
            if let Some(slot) = history.responses.get_mut(&request_id) {
                *slot = Some(response);
            }
        }
    }

    fn abandon(&self, peer: SocketAddr, request_id: u64) {
        if let Some(mut history) = self.peers.get_mut(&peer) {
            if history.responses.remove(&request_id).is_some() {
                history.order.retain(|id| *id != request_id);
            }
        }
    }

    fn len(&self) -> usize {
        self.peers.iter().map(|h| h.order.len()).sum()
    }
}
