//! rdv-ctl: peer command-line interface for the rendezvous system.

use std::net::SocketAddr;

use anyhow::{Context, Result};

use rdv_core::config::{RendezvousConfig, DEFAULT_SERVER_PORT};

mod cmd;

use cmd::control::*;
use cmd::transfer::*;
use cmd::Peer;

fn print_usage() {
    println!("Usage: rdv-ctl [--server <addr:port>] [--name <name>] [--control-port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  register                      Register this peer with the rendezvous server");
    println!("  deregister                    Remove this peer and everything it published");
    println!("  publish <file>... | --all     Advertise files (--all: every file in the shared dir)");
    println!("  remove <file>...              Stop advertising files");
    println!("  list                          List every registered peer");
    println!("  info <peer>                   Show one peer's contact details and files");
    println!("  search <file>                 Find peers publishing a file");
    println!("  update-contact <ip> <udp> <tcp>");
    println!("                                Change the advertised address and ports");
    println!("  download <host:port> <file>   Fetch a file from a peer's transfer server");
    println!("  serve                         Share the shared dir over TCP until ctrl-c");
    println!();
    println!("Options:");
    println!(
        "  --server <addr:port>   Rendezvous server (default: 127.0.0.1:{})",
        DEFAULT_SERVER_PORT
    );
    println!("  --name <name>          Peer name (default: $RDV_PEER__NAME or hostname)");
    println!("  --control-port <port>  Local UDP port for control calls, registered as the");
    println!("                         peer's UDP_SOCKET. With 0 (default) the server records");
    println!("                         a short-lived ephemeral port that closes when rdv-ctl exits.");
}

/// Strip global options into `config`; returns the command words.
fn parse_globals(args: &[String], config: &mut RendezvousConfig) -> Result<Vec<String>> {
    let mut remaining = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--server" => {
                i += 1;
                config.peer.server_addr = args
                    .get(i)
                    .context("--server requires a value")?
                    .parse::<SocketAddr>()
                    .context("--server must be an address like 127.0.0.1:65341")?;
            }
            "--name" => {
                i += 1;
                config.peer.name = args.get(i).context("--name requires a value")?.clone();
            }
            "--control-port" => {
                i += 1;
                config.peer.control_port = args
                    .get(i)
                    .context("--control-port requires a value")?
                    .parse()
                    .context("--control-port must be a port number")?;
            }
            _ => remaining.push(args[i].clone()),
        }
        i += 1;
    }
    Ok(remaining)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut config = RendezvousConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        RendezvousConfig::default()
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    let remaining = parse_globals(&args, &mut config)?;
    let words: Vec<&str> = remaining.iter().map(String::as_str).collect();
    let peer = Peer::new(config)?;

    let result = match words.as_slice() {
        ["register"]                            => cmd_register(&peer).await,
        ["deregister"] | ["de-register"]        => cmd_deregister(&peer).await,
        ["publish", "--all"]                    => cmd_publish(&peer, &[], true).await,
        ["publish", files @ ..]                 => cmd_publish(&peer, files, false).await,
        ["remove", files @ ..]                  => cmd_remove(&peer, files).await,
        ["list"]                                => cmd_list(&peer).await,
        ["info", target]                        => cmd_info(&peer, target).await,
        ["search", file]                        => cmd_search(&peer, file).await,
        ["update-contact", ip, udp, tcp]        => cmd_update_contact(&peer, ip, udp, tcp).await,
        ["download", addr, file]                => cmd_download(&peer, addr, file).await,
        ["serve"]                               => cmd_serve(&peer).await,
        ["help"] | ["--help"] | ["-h"] | []     => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };
    if let Err(e) = peer.finish() {
        tracing::warn!(error = %e, "failed to record request ids");
    }
    result
}
