//! rdvd: rendezvous server daemon.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use rdv_core::config::RendezvousConfig;
use rdv_services::{
    ControlDispatcher, ControlServer, DedupLedger, Directory, MemoryDirectory, SqliteDirectory,
};

fn print_usage() {
    println!("Usage: rdvd [--bind <addr:port>] [--db <path>]");
    println!();
    println!("Options:");
    println!("  --bind <addr:port>   UDP address to listen on (default: 0.0.0.0:65341)");
    println!("  --db <path>          Keep the directory in a SQLite file instead of memory");
}

/// Apply command-line overrides on top of the loaded config.
fn apply_args(config: &mut RendezvousConfig, args: &[String]) -> Result<bool> {
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" => {
                i += 1;
                config.server.bind = args
                    .get(i)
                    .context("--bind requires a value")?
                    .parse::<SocketAddr>()
                    .context("--bind must be an address like 0.0.0.0:65341")?;
            }
            "--db" => {
                i += 1;
                config.server.database_path =
                    PathBuf::from(args.get(i).context("--db requires a value")?);
            }
            "help" | "--help" | "-h" => return Ok(false),
            other => anyhow::bail!("unknown argument: {other}"),
        }
        i += 1;
    }
    Ok(true)
}

fn open_directory(config: &RendezvousConfig) -> Result<Arc<dyn Directory>> {
    let path = &config.server.database_path;
    if path.as_os_str().is_empty() {
        tracing::info!("using in-memory directory");
        return Ok(Arc::new(MemoryDirectory::new()));
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let directory = SqliteDirectory::open(path)
        .with_context(|| format!("failed to open directory database {}", path.display()))?;
    tracing::info!(path = %path.display(), "using SQLite directory");
    Ok(Arc::new(directory))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = RendezvousConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = RendezvousConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RendezvousConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !apply_args(&mut config, &args)? {
        print_usage();
        return Ok(());
    }

    let directory = open_directory(&config)?;
    let ledger = Arc::new(DedupLedger::with_capacity(config.server.ledger_capacity));
    let dispatcher = Arc::new(
        ControlDispatcher::new(directory, ledger)
            .replay_duplicates(config.server.replay_duplicates),
    );
    tracing::info!(
        ledger_capacity = config.server.ledger_capacity,
        replay_duplicates = config.server.replay_duplicates,
        "rdvd starting"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let server = ControlServer::bind(
        config.server.bind,
        dispatcher,
        config.server.recv_buffer,
        shutdown_tx.subscribe(),
    )
    .await
    .with_context(|| format!("failed to bind {}", config.server.bind))?;

    server.run().await.context("control server failed")?;
    tracing::info!("rdvd stopped");
    Ok(())
}
