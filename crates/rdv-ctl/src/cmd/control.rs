//! Control-plane commands.

use std::net::IpAddr;

use anyhow::{bail, Context, Result};

use rdv_core::{PeerRecord, Response};
use rdv_services::FileRoot;

use super::Peer;

/// Print the outcome line; a denial becomes an error.
fn report(resp: &Response) -> Result<()> {
    if resp.is_success() {
        println!("{} (RQ# {})", resp.status, resp.request_id);
        Ok(())
    } else {
        bail!(
            "{}: {}",
            resp.status,
            resp.reason.as_deref().unwrap_or("no reason given")
        )
    }
}

fn print_peers(peers: &[PeerRecord]) {
    if peers.is_empty() {
        println!("No peers.");
        return;
    }
    for p in peers {
        print_peer(p);
    }
}

fn print_peer(p: &PeerRecord) {
    println!("  ┌─ {}", p.name);
    println!("  │  address  : {}", p.ip);
    println!("  │  udp port : {}", p.udp_port);
    println!("  │  tcp port : {}", p.tcp_port);
    if p.files.is_empty() {
        println!("  └─ files    : (none)");
    } else {
        let files: Vec<&str> = p.files.iter().map(String::as_str).collect();
        println!("  └─ files    : {}", files.join(", "));
    }
}

pub async fn cmd_register(peer: &Peer) -> Result<()> {
    let ip = peer.advertise_ip()?;
    let client = peer.control_client().await?;
    let resp = client
        .register(peer.name(), ip, peer.control_port(), peer.config.peer.transfer_port)
        .await
        .context("register failed")?;
    report(&resp)
}

pub async fn cmd_deregister(peer: &Peer) -> Result<()> {
    let client = peer.control_client().await?;
    let resp = client.deregister(peer.name()).await.context("de-register failed")?;
    report(&resp)
}

pub async fn cmd_publish(peer: &Peer, files: &[&str], all: bool) -> Result<()> {
    let files: Vec<String> = if all {
        let root = FileRoot::new(&peer.config.peer.shared_dir);
        root.list()
            .await
            .with_context(|| format!("failed to list {}", root.path().display()))?
    } else {
        files.iter().map(|f| f.to_string()).collect()
    };
    if files.is_empty() {
        bail!("nothing to publish");
    }

    let client = peer.control_client().await?;
    let resp = client.publish(peer.name(), &files).await.context("publish failed")?;
    report(&resp)?;
    println!("  {} file(s): {}", files.len(), files.join(", "));
    Ok(())
}

pub async fn cmd_remove(peer: &Peer, files: &[&str]) -> Result<()> {
    if files.is_empty() {
        bail!("remove needs at least one file name");
    }
    let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
    let client = peer.control_client().await?;
    let resp = client.remove(peer.name(), &files).await.context("remove failed")?;
    report(&resp)
}

pub async fn cmd_list(peer: &Peer) -> Result<()> {
    let client = peer.control_client().await?;
    let resp = client.retrieve_all(peer.name()).await.context("retrieve failed")?;
    report(&resp)?;
    print_peers(&resp.peers()?);
    Ok(())
}

pub async fn cmd_info(peer: &Peer, target: &str) -> Result<()> {
    let client = peer.control_client().await?;
    let resp = client
        .retrieve_info(peer.name(), target)
        .await
        .context("retrieve-info failed")?;
    report(&resp)?;
    print_peer(&resp.peer()?);
    Ok(())
}

pub async fn cmd_search(peer: &Peer, file_name: &str) -> Result<()> {
    let client = peer.control_client().await?;
    let resp = client
        .search_file(peer.name(), file_name)
        .await
        .context("search failed")?;
    report(&resp)?;
    print_peers(&resp.peers()?);
    Ok(())
}

pub async fn cmd_update_contact(peer: &Peer, ip: &str, udp: &str, tcp: &str) -> Result<()> {
    let ip: IpAddr = ip.parse().context("invalid IP address")?;
    let udp: u16 = udp.parse().context("UDP port must be a number")?;
    let tcp: u16 = tcp.parse().context("TCP port must be a number")?;

    let client = peer.control_client().await?;
    let resp = client
        .update_contact(peer.name(), ip, udp, tcp)
        .await
        .context("update-contact failed")?;
    report(&resp)
}
