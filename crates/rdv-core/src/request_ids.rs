//! Request-id high-water mark kept on disk.
//!
//! The server de-duplicates on `(source address, RQ#)`. A CLI that binds the
//! same control port on every run would otherwise restart at `RQ# 0` and have
//! its new requests answered from the server's cache of an earlier run.

use std::path::{Path, PathBuf};

use crate::config::data_dir;
use crate::message::RequestCounter;

/// Ids handed out per reservation.
pub const RESERVE_BLOCK: u64 = 64;

#[derive(Debug, thiserror::Error)]
pub enum IdStoreError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("{0} does not hold a request id: {1:?}")]
    Corrupt(PathBuf, String),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
}

/// File holding the lowest request id no earlier run has used.
pub struct RequestIdStore {
    path: PathBuf,
}

impl RequestIdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$XDG_DATA_HOME/rendezvous/next-request-id-<port>`.
    pub fn for_control_port(port: u16) -> Self {
        Self::new(data_dir().join(format!("next-request-id-{port}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored mark, 0 when the file does not exist yet.
    pub fn load(&self) -> Result<u64, IdStoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(IdStoreError::ReadFailed(self.path.clone(), e)),
        };
        text.trim()
            .parse()
            .map_err(|_| IdStoreError::Corrupt(self.path.clone(), text.trim().to_string()))
    }

    /// Counter starting at the stored mark. The mark moves ahead by
    /// [`RESERVE_BLOCK`] before any id is used, so a run that dies early
    /// still never hands its ids to the next one.
    pub fn reserve(&self) -> Result<RequestCounter, IdStoreError> {
        let first = self.load()?;
        self.store(first.saturating_add(RESERVE_BLOCK))?;
        Ok(RequestCounter::starting_at(first))
    }

    /// Persist `counter`'s position if it ran past the reservation.
    pub fn commit(&self, counter: &RequestCounter) -> Result<(), IdStoreError> {
        if counter.peek() > self.load()? {
            self.store(counter.peek())?;
        }
        Ok(())
    }

    fn store(&self, next: u64) -> Result<(), IdStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| IdStoreError::WriteFailed(self.path.clone(), e))?;
        }
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, format!("{next}\n"))
            .and_then(|_| std::fs::rename(&tmp, &self.path))
            .map_err(|e| IdStoreError::WriteFailed(self.path.clone(), e))
    }
}
