//! Transfer-plane commands.

use std::net::SocketAddr;

use anyhow::{Context, Result};

use rdv_services::{FileRoot, TransferClient, TransferServer};

use super::Peer;

async fn resolve(addr: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(addr)
        .await
        .with_context(|| format!("cannot resolve {addr}"))?
        .next()
        .with_context(|| format!("{addr} resolved to no address"))
}

pub async fn cmd_download(peer: &Peer, addr: &str, file_name: &str) -> Result<()> {
    let addr = resolve(addr).await?;
    let client = TransferClient::new(peer.counter.clone());
    let path = client
        .download_to(addr, file_name, &peer.config.peer.downloads_dir)
        .await
        .with_context(|| format!("download of {file_name} from {addr} failed"))?;
    println!("Saved {}", path.display());
    Ok(())
}

/// Share `peer.shared_dir` until ctrl-c.
pub async fn cmd_serve(peer: &Peer) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    let bind = SocketAddr::from(([0, 0, 0, 0], peer.config.peer.transfer_port));
    let root = FileRoot::new(&peer.config.peer.shared_dir);
    let server = TransferServer::bind(bind, root, peer.config.transfer.chunk_chars, shutdown_rx)
        .await
        .with_context(|| format!("failed to bind transfer port {bind}"))?;
    println!(
        "Serving {} on {}",
        peer.config.peer.shared_dir.display(),
        server.local_addr()?
    );
    server.run().await.context("transfer server failed")
}
