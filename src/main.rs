use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tumbler::blindsig::BlindSigner;
use tumbler::chain::BitcoindRpc;
use tumbler::config::CoordinatorConfig;
use tumbler::coordinator::RoundCoordinator;
use tumbler::keystore;
use tumbler::metrics::Metrics;
use tumbler::notify::Notifier;
use tumbler::rpc::RpcServer;
use tumbler::store::Store;

/// Passphrase for sealing the signing key at rest. Optional; without it the
/// key is stored as plain DER.
const PASSPHRASE_ENV: &str = "TUMBLER_KEY_PASSPHRASE";

#[derive(Parser)]
#[command(name = "tumbler")]
#[command(about = "Chaumian CoinJoin round coordinator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator daemon
    Daemon {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
        /// Override the RPC port from the config file
        #[arg(long)]
        rpc_port: Option<u16>,
    },

    /// Generate the coordinator signing key ahead of first start
    Keygen {
        #[arg(long, default_value = "./data")]
        data_dir: PathBuf,
        /// Replace an existing key (invalidates outstanding signatures!)
        #[arg(long)]
        force: bool,
    },

    /// Query a running coordinator for its status
    Status {
        #[arg(long, default_value = "37127")]
        rpc_port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tumbler=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Daemon { data_dir, rpc_port } => run_daemon(data_dir, rpc_port).await,
        Command::Keygen { data_dir, force } => keygen(data_dir, force),
        Command::Status { rpc_port } => show_status(rpc_port).await,
    }
}

async fn run_daemon(data_dir: PathBuf, rpc_port_override: Option<u16>) -> Result<()> {
    std::fs::create_dir_all(&data_dir)?;
    let mut config = CoordinatorConfig::load_or_init(&data_dir.join("config.json"))?;
    if let Some(port) = rpc_port_override {
        config.rpc_port = port;
    }

    let store = Arc::new(Store::open(data_dir.join("db"))?);
    let signer = load_or_create_signer(&store, config.rsa_key_bits)?;
    let chain = Arc::new(BitcoindRpc::new(
        config.bitcoind_url.clone(),
        config.bitcoind_auth(),
    ));

    let metrics = Metrics::new();
    let rpc_port = config.rpc_port;
    let coordinator = Arc::new(RoundCoordinator::new(
        config,
        signer,
        chain,
        store,
        Notifier::new(),
        metrics.clone(),
    )?);

    coordinator.spawn_deadline_watcher();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            metrics.report();
        }
    });

    RpcServer::new(rpc_port).run(coordinator).await
}

fn load_or_create_signer(store: &Store, key_bits: usize) -> Result<BlindSigner> {
    let passphrase = std::env::var(PASSPHRASE_ENV).ok();

    match store.load_signing_key()? {
        Some(blob) => {
            let der = match &passphrase {
                Some(p) => keystore::open(&blob, p.as_bytes())?,
                None => blob,
            };
            let signer = BlindSigner::from_der(&der)?;
            tracing::info!("Loaded coordinator signing key");
            Ok(signer)
        }
        None => {
            tracing::info!("No signing key found, generating {}-bit RSA key", key_bits);
            let signer = BlindSigner::generate(key_bits)?;
            let der = signer.secret_der()?;
            let blob = match &passphrase {
                Some(p) => keystore::seal(&der, p.as_bytes())?,
                None => der,
            };
            store.save_signing_key(&blob)?;
            Ok(signer)
        }
    }
}

fn keygen(data_dir: PathBuf, force: bool) -> Result<()> {
    std::fs::create_dir_all(&data_dir)?;
    let config = CoordinatorConfig::load_or_init(&data_dir.join("config.json"))?;
    let store = Store::open(data_dir.join("db"))?;

    if store.load_signing_key()?.is_some() && !force {
        bail!("a signing key already exists; pass --force to replace it");
    }

    let signer = BlindSigner::generate(config.rsa_key_bits)?;
    let der = signer.secret_der()?;
    let blob = match std::env::var(PASSPHRASE_ENV).ok() {
        Some(p) => keystore::seal(&der, p.as_bytes())?,
        None => der,
    };
    store.save_signing_key(&blob)?;

    println!("public key: {}", hex::encode(signer.public_der()?));
    Ok(())
}

async fn show_status(rpc_port: u16) -> Result<()> {
    let resp: serde_json::Value = reqwest::get(format!("http://127.0.0.1:{}/status", rpc_port))
        .await?
        .json()
        .await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}
