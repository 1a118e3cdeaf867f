//! Configuration system for rendezvous.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $RDV_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/rendezvous/config.toml
//!   3. ~/.config/rendezvous/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the rendezvous daemon and the peer CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    pub server: ServerConfig,
    pub peer: PeerConfig,
    pub timing: TimingConfig,
    pub transfer: TransferConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP address the rendezvous server listens on.
    pub bind: SocketAddr,
    /// Largest datagram accepted, in bytes.
    pub recv_buffer: usize,
    /// SQLite directory file. Empty = in-memory directory.
    pub database_path: PathBuf,
    /// Request ids remembered per peer endpoint. 0 = unbounded.
    pub ledger_capacity: usize,
    /// Resend the cached response when a duplicate request arrives.
    pub replay_duplicates: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Name this peer registers under.
    pub name: String,
    /// Rendezvous server address.
    pub server_addr: SocketAddr,
    /// Address advertised to other peers. None = detect from the route to the server.
    pub advertise_ip: Option<IpAddr>,
    /// Local UDP port for control-plane calls, also registered as the
    /// peer's UDP port. 0 = OS-assigned per run, so the registered port
    /// stops answering once the CLI exits.
    pub control_port: u16,
    /// TCP port the transfer server listens on. 0 = OS-assigned.
    pub transfer_port: u16,
    /// Directory whose files are offered to other peers.
    pub shared_dir: PathBuf,
    /// Directory downloads are written to.
    pub downloads_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Per-attempt wait for a control-plane response.
    pub request_timeout_ms: u64,
    /// Attempts per call, the first send included.
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Characters per FILE chunk.
    pub chunk_chars: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

/// Well-known rendezvous port.
pub const DEFAULT_SERVER_PORT: u16 = 65341;

/// Default per-attempt control-plane timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default attempts per control-plane call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default chunk size, in characters.
pub const DEFAULT_CHUNK_CHARS: usize = 200;

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_SERVER_PORT)),
            recv_buffer: 65_536,
            database_path: PathBuf::new(),
            ledger_capacity: 1024,
            replay_duplicates: true,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            name: std::env::var("HOSTNAME").unwrap_or_else(|_| "peer".to_string()),
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_SERVER_PORT)),
            advertise_ip: None,
            control_port: 0,
            transfer_port: 0,
            shared_dir: data_dir().join("shared"),
            downloads_dir: data_dir().join("downloads"),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl TimingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_chars: DEFAULT_CHUNK_CHARS,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

pub fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("rendezvous")
}

pub fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".local").join("share"))
        .join("rendezvous")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RendezvousConfig {
    /// Read the config file at the standard location, then apply `RDV_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a specific file, falling back to defaults when it does not exist.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("RDV_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Create the config file with defaults unless one is already present.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&RendezvousConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply RDV_* overrides. Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("RDV_SERVER__BIND").and_then(|v| v.parse().ok()) {
            self.server.bind = v;
        }
        if let Some(v) = var("RDV_SERVER__DATABASE_PATH") {
            self.server.database_path = PathBuf::from(v);
        }
        if let Some(v) = var("RDV_SERVER__REPLAY_DUPLICATES") {
            self.server.replay_duplicates = v == "true" || v == "1";
        }
        if let Some(v) = var("RDV_PEER__NAME") {
            self.peer.name = v;
        }
        if let Some(v) = var("RDV_PEER__SERVER_ADDR").and_then(|v| v.parse().ok()) {
            self.peer.server_addr = v;
        }
        if let Some(v) = var("RDV_PEER__CONTROL_PORT").and_then(|v| v.parse().ok()) {
            self.peer.control_port = v;
        }
        if let Some(v) = var("RDV_PEER__TRANSFER_PORT").and_then(|v| v.parse().ok()) {
            self.peer.transfer_port = v;
        }
        if let Some(v) = var("RDV_TIMING__REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.timing.request_timeout_ms = v;
        }
    }
}
