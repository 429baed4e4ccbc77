/// onionlink - operator tooling for the onion transport
///
/// - Generates and lists onion service keys
/// - Checks onion addresses
/// - Writes a default transport configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};

use onionlink_common::TransportConfig;
use onionlink_core::{address, KeyStore, OnionKey};

#[derive(Parser)]
#[command(name = "onionlink")]
#[command(about = "Onion service transport tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate onion service keys
    Keygen {
        /// Directory to write `.onion_key` files to
        #[arg(default_value = "keys")]
        dir: PathBuf,

        /// Number of keys to generate
        #[arg(short = 'n', long, default_value = "1")]
        count: usize,

        /// Virtual port to print addresses for
        #[arg(short, long, default_value = "4003")]
        port: u16,
    },

    /// List the keys in a key directory
    Keys {
        /// Key directory
        #[arg(default_value = "keys")]
        dir: PathBuf,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Validate onion addresses
    Check {
        /// Addresses, as `host:port` or `/onion/host:port`
        #[arg(required = true)]
        addresses: Vec<String>,
    },

    /// Write a default configuration file
    InitConfig {
        /// Output path
        #[arg(default_value = "onionlink.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Serialize)]
struct KeyInfo {
    service_id: String,
    hostname: String,
    fingerprint: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Keygen { dir, count, port } => keygen(&dir, count, port),
        Commands::Keys { dir, json } => list_keys(&dir, json),
        Commands::Check { addresses } => check(&addresses),
        Commands::InitConfig { path, force } => init_config(&path, force),
    }
}

fn keygen(dir: &Path, count: usize, port: u16) -> Result<()> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {:?}", dir))?;

    for _ in 0..count {
        let key = OnionKey::generate()?;
        let path = key.write_to_dir(dir)?;
        let addr = key.onion_addr(port)?;

        info!("Wrote {:?}", path);
        println!("{}", addr.to_multiaddr());
    }

    Ok(())
}

fn list_keys(dir: &Path, json: bool) -> Result<()> {
    let store = KeyStore::load(dir)?;

    let mut infos = Vec::with_capacity(store.len());
    for id in store.identities() {
        let Some(key) = store.lookup(id) else {
            continue;
        };
        infos.push(KeyInfo {
            service_id: key.service_id().to_string(),
            hostname: format!("{}.onion", key.service_id()),
            fingerprint: key.fingerprint()?,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if infos.is_empty() {
        warn!("No keys found in {:?}", dir);
        return Ok(());
    }

    println!("{:<24} FINGERPRINT", "HOSTNAME");
    for info in &infos {
        println!("{:<24} {}", info.hostname, info.fingerprint);
    }

    Ok(())
}

fn check(addresses: &[String]) -> Result<()> {
    let mut invalid = 0;

    for addr in addresses {
        match address::parse(addr) {
            Ok((host, port)) => println!("ok       {} (host {}, port {})", addr, host, port),
            Err(e) => {
                invalid += 1;
                println!("invalid  {} ({})", addr, e);
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} address(es) invalid", invalid, addresses.len());
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }

    TransportConfig::default().to_file(path)?;
    info!("Saved default configuration to {:?}", path);
    Ok(())
}
