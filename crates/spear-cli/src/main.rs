//! Spear CLI tools: key generation and configuration checks.

#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use spear_common::{Key, SpearConfig};
use spear_crypto::{encode_public_key, PacketCodec, PublicKey, StaticIdentity};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "spear-keys")]
#[command(about = "Spear key and configuration tools")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new X25519 keypair
    Keygen {
        /// Also write a configuration skeleton to this path
        #[arg(long)]
        config_out: Option<PathBuf>,

        /// Local candidate addresses for the skeleton
        #[arg(long = "candidate", default_value = "0.0.0.0:15124")]
        candidates: Vec<SocketAddr>,

        /// Overwrite an existing file
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Print the public key for a base64 secret key
    Pubkey {
        /// Base64 secret key
        #[arg(long, env = "SPEAR_SECRET_KEY", hide_env_values = true)]
        secret: String,
    },

    /// Validate a configuration file and list its peers
    Check {
        #[arg(long, env = "SPEAR_CONFIG", default_value = "config.json")]
        config: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    spear_common::init_tracing_with_default("warn");

    let args = Args::parse();

    match args.command {
        Command::Keygen {
            config_out,
            candidates,
            force,
        } => {
            let identity = StaticIdentity::generate();
            println!("Secret key: {}", identity.secret_base64().as_str());
            println!("Public key: {}", encode_public_key(identity.public_key()));

            if let Some(path) = config_out {
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                let config = SpearConfig {
                    sk: Key::from_bytes(*identity.secret_bytes()),
                    candidates,
                    peers: Vec::new(),
                    buffer: Default::default(),
                    admit_unknown_addresses: false,
                };
                std::fs::write(&path, config.to_json_pretty()?)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("wrote {}", path.display());
                println!("Config:     {}", path.display());
            }
        }
        Command::Pubkey { secret } => {
            let identity = StaticIdentity::from_base64(&secret).context("invalid secret key")?;
            println!("{}", encode_public_key(identity.public_key()));
        }
        Command::Check { config } => {
            let loaded = SpearConfig::load(&config)
                .with_context(|| format!("failed to load {}", config.display()))?;
            let identity = StaticIdentity::from_bytes(*loaded.sk.as_bytes());

            println!("Public key: {}", encode_public_key(identity.public_key()));
            println!("Candidates: {}", loaded.candidates.len());
            for peer in &loaded.peers {
                let name = peer.name.clone().unwrap_or_else(|| peer.pk.to_base64());
                PacketCodec::new(&identity, &PublicKey::from(*peer.pk.as_bytes()))
                    .with_context(|| format!("unusable key for peer {}", name))?;
                println!("  {} via {} candidate(s)", name, peer.candidates.len());
            }
        }
        Command::Version => {
            println!("spear-keys v{}", env!("CARGO_PKG_VERSION"));
            println!("Key agreement: X25519");
            println!("Packet AEAD: ChaCha20-Poly1305, keys rotated every 30s");
        }
    }

    Ok(())
}
