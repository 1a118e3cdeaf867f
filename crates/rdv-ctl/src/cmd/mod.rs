//! CLI command modules.

pub mod control;
pub mod transfer;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use anyhow::{Context, Result};

use rdv_core::config::RendezvousConfig;
use rdv_core::{RequestCounter, RequestIdStore};
use rdv_services::ControlClient;

/// Everything a command needs to act as this peer.
pub struct Peer {
    pub config: RendezvousConfig,
    /// Shared by the control and transfer clients of this process.
    pub counter: RequestCounter,
    ids: RequestIdStore,
}

impl Peer {
    /// Resume request ids where the last run on this control port stopped.
    pub fn new(config: RendezvousConfig) -> Result<Self> {
        let ids = RequestIdStore::for_control_port(config.peer.control_port);
        Self::with_id_store(config, ids)
    }

    pub fn with_id_store(config: RendezvousConfig, ids: RequestIdStore) -> Result<Self> {
        let counter = ids
            .reserve()
            .with_context(|| format!("cannot reserve request ids in {}", ids.path().display()))?;
        Ok(Self {
            config,
            counter,
            ids,
        })
    }

    /// Record how far this run advanced the request ids.
    pub fn finish(&self) -> Result<()> {
        self.ids.commit(&self.counter)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.config.peer.name
    }

    pub async fn control_client(&self) -> Result<ControlClient> {
        let server = self.config.peer.server_addr;
        let unspecified = if server.is_ipv4() {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            IpAddr::V6(Ipv6Addr::UNSPECIFIED)
        };
        let local = SocketAddr::new(unspecified, self.config.peer.control_port);
        let client = ControlClient::bind(local, server, self.counter.clone())
            .await
            .with_context(|| format!("failed to bind control socket on {local}"))?;
        Ok(client.with_timing(
            self.config.timing.request_timeout(),
            self.config.timing.max_attempts,
        ))
    }

    /// Address other peers should use to reach us.
    ///
    /// Without an explicit `advertise_ip`, this is the local address of
    /// the route towards the rendezvous server.
    pub fn advertise_ip(&self) -> Result<IpAddr> {
        if let Some(ip) = self.config.peer.advertise_ip {
            return Ok(ip);
        }
        let server = self.config.peer.server_addr;
        let bind = if server.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let probe = std::net::UdpSocket::bind(bind).context("failed to open probe socket")?;
        probe
            .connect(server)
            .with_context(|| format!("no route to {server}"))?;
        Ok(probe.local_addr()?.ip())
    }

    /// UDP port to register. `None` lets the server take the source port,
    /// which stops being reachable once this process exits.
    pub fn control_port(&self) -> Option<u16> {
        match self.config.peer.control_port {
            0 => None,
            port => Some(port),
        }
    }
}
