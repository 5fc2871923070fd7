//! Voice client
//!
//! Streams the microphone to a relay server and plays what the other peers
//! send. Reads simple commands from stdin.

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;

use lan_voice::audio::{list_devices, CpalCapture, CpalPlayback};
use lan_voice::config::{AppConfig, CompressionSetting};
use lan_voice::constants::EVENT_CHANNEL_CAPACITY;
use lan_voice::profile::ProfileChoice;
use lan_voice::{events, logging::init_tracing, VoiceClient, VoiceEvent};

/// LAN voice client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server host name or address
    #[arg(required_unless_present = "list_devices")]
    host: Option<String>,

    /// Server port (overrides the config file)
    #[arg(short, long)]
    port: Option<u16>,

    /// Audio profile: auto, ultra_low_latency, low_latency, quality, bandwidth_saving
    #[arg(long)]
    profile: Option<ProfileChoice>,

    /// Latency budget in ms for automatic profile selection
    #[arg(long)]
    latency_ms: Option<f32>,

    /// Enable voice-activated transmission
    #[arg(long)]
    vox: bool,

    /// VOX threshold in dBFS (-60..=0)
    #[arg(long, allow_negative_numbers = true)]
    threshold: Option<f32>,

    /// Send raw PCM
    #[arg(long)]
    no_compression: bool,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Config file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let app_config = AppConfig::load(args.config.as_deref()).context("loading configuration")?;
    init_tracing(&app_config.logging.level);

    if args.list_devices {
        print_devices();
        return Ok(());
    }
    let host = args.host.as_deref().context("missing server host")?;

    let mut config = app_config.client_config(host)?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(profile) = args.profile {
        config.profile = profile;
    }
    if args.latency_ms.is_some() {
        config.latency_target_ms = args.latency_ms;
    }
    if args.vox {
        config.vox.enabled = true;
    }
    if let Some(threshold) = args.threshold {
        config.vox.threshold_db = threshold;
    }
    if args.no_compression {
        config.compression = CompressionSetting::Disabled;
    }
    config.validate().context("invalid client settings")?;

    let profile = config.profile.resolve(config.latency_target_ms);
    println!(
        "Profile {} ({} frames, ~{:.1} ms, {:.0} kbps raw)",
        profile.name,
        profile.buffer_frames,
        profile.estimated_latency_ms,
        profile.bandwidth_kbps()
    );

    let capture = CpalCapture::open(app_config.audio.input_device.as_deref(), profile)?;
    let playback = CpalPlayback::open(app_config.audio.output_device.as_deref(), profile)?;

    let (sink, stream) = events::channel(EVENT_CHANNEL_CAPACITY);
    let connected = VoiceClient::connect(config, Box::new(capture), Box::new(playback), sink);
    let mut client = match connected {
        Ok(client) => client,
        Err(e) => {
            let hint = e.kind().remediation().hint();
            return Err(anyhow::Error::new(e).context(format!("connecting to {host} ({hint})")));
        }
    };

    thread::Builder::new().name("events".into()).spawn(move || {
        for event in stream {
            match event {
                VoiceEvent::ConnectionError { kind, detail, remediation } => {
                    eprintln!("error [{kind}]: {detail} ({})", remediation.hint());
                }
                VoiceEvent::PeerJoined { sender_id } => println!("peer #{sender_id} joined"),
                VoiceEvent::PeerLeft { sender_id } => println!("peer #{sender_id} left"),
                VoiceEvent::VoxChanged { transmitting } => {
                    tracing::debug!(transmitting, "vox");
                }
                VoiceEvent::StateChanged(state) => tracing::info!(?state, "connection state"),
                VoiceEvent::LevelMeter { db } => tracing::trace!(db, "level"),
                VoiceEvent::ProfileAnnounced { sender_id, profile } => {
                    println!("peer #{sender_id} uses {profile}");
                }
            }
        }
    })?;

    println!("Connected as #{}", client.sender_id());
    println!("Commands: m = mute, l = listen, v <dB> = vox threshold, s = status, q = quit");

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("m"), _) => {
                let muted = !client.is_muted();
                client.set_muted(muted);
                println!("microphone {}", if muted { "muted" } else { "live" });
            }
            (Some("l"), _) => {
                let listening = !client.is_listening();
                client.set_listening(listening);
                println!("listening {}", if listening { "on" } else { "off" });
            }
            (Some("v"), Some(value)) => match value.parse::<f32>() {
                Ok(db) => match client.set_vox_threshold(db) {
                    Ok(()) => {
                        client.set_vox_enabled(true);
                        println!("vox threshold {db} dB");
                    }
                    Err(e) => println!("{e}"),
                },
                Err(_) => println!("not a number: {value}"),
            },
            (Some("s"), _) => println!("{:#?}", client.status()),
            (Some("q"), _) => break,
            (None, _) => {}
            (Some(other), _) => println!("unknown command: {other}"),
        }
    }

    client.disconnect();
    Ok(())
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
}
