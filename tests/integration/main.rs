//! Rendezvous integration test harness.
//!
//! Every test runs servers and clients in-process over loopback with
//! OS-assigned ports, so tests can run in parallel without coordination.
//!
//!   cargo test --test integration
//!
//! Each test owns the servers and temporary directories it creates.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use rdv_core::RequestCounter;
use rdv_services::{
    ControlClient, ControlDispatcher, ControlServer, DedupLedger, Directory, FileRoot,
    MemoryDirectory, TransferServer,
};

mod control;
mod dedup;
mod end_to_end;
mod transfer;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Per-attempt timeout used by test clients.
pub const TEST_TIMEOUT: Duration = Duration::from_millis(200);

/// A rendezvous server running on a background task.
pub struct Rendezvous {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Rendezvous {
    pub async fn start(directory: Arc<dyn Directory>, replay_duplicates: bool) -> Result<Self> {
        let dispatcher = Arc::new(
            ControlDispatcher::new(directory, Arc::new(DedupLedger::with_capacity(1024)))
                .replay_duplicates(replay_duplicates),
        );
        let (shutdown, rx) = broadcast::channel(1);
        let server = ControlServer::bind("127.0.0.1:0".parse()?, dispatcher, 65_536, rx)
            .await
            .context("failed to bind control server")?;
        let addr = server.local_addr()?;
        let task = tokio::spawn(server.run());
        Ok(Self { addr, shutdown, task })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::start(Arc::new(MemoryDirectory::new()), true).await
    }

    /// A control client with short timing.
    pub async fn client(&self) -> Result<ControlClient> {
        Ok(
            ControlClient::bind("127.0.0.1:0".parse()?, self.addr, RequestCounter::new())
                .await?
                .with_timing(TEST_TIMEOUT, 3),
        )
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .context("control server did not stop")???;
        Ok(())
    }
}

/// A transfer server sharing one directory.
pub struct Sharer {
    pub addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Sharer {
    pub async fn start(root: PathBuf, chunk_chars: usize) -> Result<Self> {
        let (shutdown, rx) = broadcast::channel(1);
        let server = TransferServer::bind("127.0.0.1:0".parse()?, FileRoot::new(root), chunk_chars, rx)
            .await
            .context("failed to bind transfer server")?;
        let addr = server.local_addr()?;
        let task = tokio::spawn(server.run());
        Ok(Self { addr, shutdown, task })
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        tokio::time::timeout(Duration::from_secs(2), self.task)
            .await
            .context("transfer server did not stop")???;
        Ok(())
    }
}

/// Fresh temporary directory for one test.
pub fn tmp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rdv-it-{}-{}", std::process::id(), tag));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

pub fn names(files: &[&str]) -> Vec<String> {
    files.iter().map(|f| f.to_string()).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// The harness can bring both servers up and down cleanly.
#[tokio::test]
async fn test_harness_starts_and_stops() {
    let rdv = Rendezvous::in_memory().await.unwrap();
    let dir = tmp_dir("harness");
    let sharer = Sharer::start(dir.clone(), 200).await.unwrap();

    assert_ne!(rdv.addr.port(), 0);
    assert_ne!(sharer.addr.port(), 0);

    rdv.stop().await.unwrap();
    sharer.stop().await.unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
