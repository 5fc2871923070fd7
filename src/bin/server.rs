//! Voice relay server
//!
//! Accepts voice clients and relays each one's frames to all the others.

use std::io::BufRead;
use std::net::IpAddr;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use lan_voice::{config::AppConfig, events, logging::init_tracing, VoiceEvent, VoiceServer};
use lan_voice::constants::EVENT_CHANNEL_CAPACITY;

/// LAN voice relay server
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// IP address to bind to (IPv4 or IPv6)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Maximum simultaneous peers (overrides the config file)
    #[arg(long)]
    max_peers: Option<usize>,

    /// Config file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let app_config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&app_config.logging.level);

    let mut config = app_config.server_config()?;
    config.bind_address = args.bind;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_peers) = args.max_peers {
        config.max_peers = max_peers;
    }
    config.validate().context("invalid server settings")?;

    let (sink, stream) = events::channel(EVENT_CHANNEL_CAPACITY);
    let mut server = match VoiceServer::start(config, sink) {
        Ok(server) => server,
        Err(e) => {
            let hint = e.kind().remediation().hint();
            return Err(anyhow::Error::new(e).context(format!("starting server ({hint})")));
        }
    };

    thread::Builder::new().name("events".into()).spawn(move || {
        for event in stream {
            match event {
                VoiceEvent::ConnectionError { kind, detail, remediation } => {
                    tracing::warn!(%kind, hint = remediation.hint(), "{}", detail);
                }
                other => tracing::debug!(?other, "event"),
            }
        }
    })?;

    println!("Voice server listening on {}", server.local_addr());
    println!("Commands: s = status, q = quit");

    let mut quit = false;
    for line in std::io::stdin().lock().lines() {
        match line?.trim() {
            "s" => {
                let status = server.status();
                println!(
                    "running={} addr={} peers={} relayed={}",
                    status.running, status.local_addr, status.peer_count, status.frames_relayed
                );
                for peer in status.peers {
                    println!(
                        "  #{} {} connected {:.0?} sent {}",
                        peer.id, peer.addr, peer.connected_for, peer.frames_sent
                    );
                }
            }
            "q" => {
                quit = true;
                break;
            }
            "" => {}
            other => println!("unknown command: {other}"),
        }
    }

    // stdin closed without `q`: keep serving until the process is killed
    if !quit {
        loop {
            thread::park();
        }
    }

    server.shutdown();
    Ok(())
}
