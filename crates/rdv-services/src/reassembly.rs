//! Client-side chunk reassembly.
//!
//! Chunks are keyed by number, so arrival order does not matter and a
//! repeated chunk simply overwrites its earlier copy.

use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: BTreeMap<u64, String>,
    terminal: Option<u64>,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk_number: u64, text: String) {
        self.chunks.insert(chunk_number, text);
    }

    /// Record `chunk_number` as the terminal chunk and store its text.
    pub fn insert_terminal(&mut self, chunk_number: u64, text: String) {
        self.terminal = Some(chunk_number);
        self.insert(chunk_number, text);
    }

    pub fn terminal(&self) -> Option<u64> {
        self.terminal
    }

    pub fn received(&self) -> usize {
        self.chunks.len()
    }

    /// Every chunk `0..=terminal` is present.
    pub fn is_complete(&self) -> bool {
        match self.terminal {
            Some(last) => self.present_through(last) > last,
            None => false,
        }
    }

    /// How many chunk numbers up to the terminal (or the highest seen) have
    /// not arrived. Counted, not listed, since the terminal number comes
    /// from the peer.
    pub fn missing(&self) -> u64 {
        let Some(last) = self
            .terminal
            .or_else(|| self.chunks.keys().next_back().copied())
        else {
            return 0;
        };
        let present = self.present_through(last);
        if present > last {
            0
        } else {
            last - present + 1
        }
    }

    fn present_through(&self, last: u64) -> u64 {
        self.chunks.range(..=last).count() as u64
    }

    /// Concatenate chunks in number order. `None` until complete.
    pub fn assemble(&self) -> Option<String> {
        let last = self.terminal?;
        if !self.is_complete() {
            return None;
        }
        Some(
            self.chunks
                .range(..=last)
                .map(|(_, text)| text.as_str())
                .collect(),
        )
    }
}
