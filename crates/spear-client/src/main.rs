use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use spear_client::audio::{mix_into, peak, FRAME_DURATION};
use spear_client::{AudioCodec, RawPcmCodec, ToneGenerator, Transport, TransportConfig, FRAME_SIZE};
use spear_common::SpearConfig;
use spear_crypto::encode_public_key;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "spear", version, about = "Encrypted peer-to-peer audio over UDP")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, env = "SPEAR_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Send a sine tone at this frequency instead of silence
    #[arg(long)]
    tone: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    spear_common::init_tracing_with_default(&args.log_level);

    info!("Starting spear v{}", env!("CARGO_PKG_VERSION"));

    let config = SpearConfig::load(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    let transport = Transport::initialize(TransportConfig::from_config(&config)?)
        .await
        .context("failed to start transport")?;

    info!("public key: {}", encode_public_key(transport.public_key()));
    for peer in transport.peers().iter() {
        info!("peer {}", peer.display_name());
    }

    let mut tone = args.tone.map(ToneGenerator::new);
    let mut encoder = RawPcmCodec::new();

    let mut audio_tick = time::interval(FRAME_DURATION);
    audio_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_tick = time::interval(STATUS_INTERVAL);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("shutdown requested");
                break;
            }
            _ = audio_tick.tick() => {
                let frame = match tone.as_mut() {
                    Some(tone) => tone.next_frame(),
                    None => vec![0.0; FRAME_SIZE],
                };
                let compressed = encoder.compress(&frame)?;

                let mut mix = vec![0.0f32; FRAME_SIZE];
                for peer in transport.peers().iter() {
                    if let Err(e) = transport.send_audio(peer, &compressed).await {
                        warn!("send to {} failed: {}", peer.display_name(), e);
                    }
                    match peer.next_audio_frame() {
                        Ok(Some(pcm)) => mix_into(&mut mix, &pcm, peer.volume()),
                        Ok(None) => {}
                        Err(e) => debug!("bad audio frame from {}: {}", peer.display_name(), e),
                    }
                }
                trace!(peak = peak(&mix), "mixed frame");
            }
            _ = status_tick.tick() => {
                for peer in transport.peers().iter() {
                    info!(
                        buffered = peer.buffered(),
                        "{}: {}",
                        peer.display_name(),
                        peer.status()
                    );
                }
            }
        }
    }

    transport.shutdown().await;
    Ok(())
}
