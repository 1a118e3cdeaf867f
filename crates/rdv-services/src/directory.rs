//! Peer directory: the authoritative record of registered peers and the
//! files they publish.
//!
//! The control-plane dispatcher calls exactly one directory operation per
//! request. Implementations own their locking: writes to a record are
//! exclusive, reads may run concurrently with each other.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use rdv_core::PeerRecord;

/// Business-rule failures reported by a directory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("duplicate name: {0} is already registered")]
    AlreadyExists(String),

    #[error("name {0} is not registered")]
    NotRegistered(String),

    #[error("files not published by this peer: {}", .0.join(", "))]
    FilesNotFound(Vec<String>),

    #[error("no peer publishes {0}")]
    NoSuchFile(String),

    #[error("directory storage failure: {0}")]
    Storage(String),
}

/// Operations the control plane needs from the directory.
pub trait Directory: Send + Sync {
    fn register(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<(), DirectoryError>;

    /// Remove the peer and every file it published, atomically.
    fn deregister(&self, name: &str) -> Result<(), DirectoryError>;

    fn publish(&self, name: &str, files: &[String]) -> Result<(), DirectoryError>;

    /// Fails without removing anything if any file is not published by `name`.
    fn remove(&self, name: &str, files: &[String]) -> Result<(), DirectoryError>;

    fn list_all(&self, requester: &str) -> Result<Vec<PeerRecord>, DirectoryError>;

    fn lookup(&self, requester: &str, target: &str) -> Result<PeerRecord, DirectoryError>;

    fn update_contact(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<(), DirectoryError>;

    fn find_file(&self, requester: &str, file: &str) -> Result<Vec<PeerRecord>, DirectoryError>;
}

// ── In-memory directory ───────────────────────────────────────────────────────

/// Directory held in process memory, ordered by peer name.
#[derive(Default)]
pub struct MemoryDirectory {
    peers: RwLock<BTreeMap<String, PeerRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, PeerRecord>>, DirectoryError> {
        self.peers
            .read()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<String, PeerRecord>>, DirectoryError> {
        self.peers
            .write()
            .map_err(|_| DirectoryError::Storage("directory lock poisoned".into()))
    }
}

fn require_registered(
    peers: &BTreeMap<String, PeerRecord>,
    name: &str,
) -> Result<(), DirectoryError> {
    if peers.contains_key(name) {
        Ok(())
    } else {
        Err(DirectoryError::NotRegistered(name.to_string()))
    }
}

impl Directory for MemoryDirectory {
    fn register(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<(), DirectoryError> {
        let mut peers = self.write()?;
        if peers.contains_key(name) {
            return Err(DirectoryError::AlreadyExists(name.to_string()));
        }
        peers.insert(
            name.to_string(),
            PeerRecord {
                name: name.to_string(),
                ip,
                udp_port,
                tcp_port,
                files: Default::default(),
            },
        );
        Ok(())
    }

    fn deregister(&self, name: &str) -> Result<(), DirectoryError> {
        self.write()?
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| DirectoryError::NotRegistered(name.to_string()))
    }

    fn publish(&self, name: &str, files: &[String]) -> Result<(), DirectoryError> {
        let mut peers = self.write()?;
        let record = peers
            .get_mut(name)
            .ok_or_else(|| DirectoryError::NotRegistered(name.to_string()))?;
        record.files.extend(files.iter().cloned());
        Ok(())
    }

    fn remove(&self, name: &str, files: &[String]) -> Result<(), DirectoryError> {
        let mut peers = self.write()?;
        let record = peers
            .get_mut(name)
            .ok_or_else(|| DirectoryError::NotRegistered(name.to_string()))?;

        let missing: Vec<String> = files
            .iter()
            .filter(|f| !record.files.contains(*f))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(DirectoryError::FilesNotFound(missing));
        }

        for file in files {
            record.files.remove(file);
        }
        Ok(())
    }

    fn list_all(&self, requester: &str) -> Result<Vec<PeerRecord>, DirectoryError> {
        let peers = self.read()?;
        require_registered(&peers, requester)?;
        Ok(peers.values().cloned().collect())
    }

    fn lookup(&self, requester: &str, target: &str) -> Result<PeerRecord, DirectoryError> {
        let peers = self.read()?;
        require_registered(&peers, requester)?;
        peers
            .get(target)
            .cloned()
            .ok_or_else(|| DirectoryError::NotRegistered(target.to_string()))
    }

    fn update_contact(
        &self,
        name: &str,
        ip: IpAddr,
        udp_port: u16,
        tcp_port: u16,
    ) -> Result<(), DirectoryError> {
        let mut peers = self.write()?;
        let record = peers
            .get_mut(name)
            .ok_or_else(|| DirectoryError::NotRegistered(name.to_string()))?;
        record.ip = ip;
        record.udp_port = udp_port;
        record.tcp_port = tcp_port;
        Ok(())
    }

    fn find_file(&self, requester: &str, file: &str) -> Result<Vec<PeerRecord>, DirectoryError> {
        let peers = self.read()?;
        require_registered(&peers, requester)?;
        let holders: Vec<PeerRecord> = peers
            .values()
            .filter(|p| p.files.contains(file))
            .cloned()
            .collect();
        if holders.is_empty() {
            return Err(DirectoryError::NoSuchFile(file.to_string()));
        }
        Ok(holders)
    }
}
