use anyhow::{Context, Result};
use attestation::Keystore;
use clap::{Parser, Subcommand};
use operator::{OperatorConfig, OperatorNode};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "downtime-operator")]
#[command(about = "Threshold downtime attestation operator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the operator
    Run {
        /// Path to the TOML config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate a signing key and print its roster entry
    Keygen {
        /// Operator id
        #[arg(long)]
        id: String,

        /// Where to write the hex-encoded secret key
        #[arg(short, long)]
        out: PathBuf,

        /// Base URL other operators reach this one at
        #[arg(short, long, default_value = "http://127.0.0.1:5001")]
        socket: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Run { config } => {
            info!("Loading config from {}", config.display());
            let config = OperatorConfig::from_file(&config)
                .with_context(|| format!("loading {}", config.display()))?;
            let node = OperatorNode::from_config(config)?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl-C, shutting down");
                    let _ = shutdown_tx.send(true);
                }
            });

            node.run(shutdown_rx).await?;
        }

        Commands::Keygen { id, out, socket } => {
            let keystore = Keystore::generate(id.as_str())?;
            keystore
                .write_to_file(&out)
                .with_context(|| format!("writing {}", out.display()))?;
            info!("Wrote secret key for {} to {}", id, out.display());

            println!("[[roster]]");
            println!("id = \"{}\"", id);
            println!("socket = \"{}\"", socket);
            println!("public_key = \"{}\"", keystore.public_key().to_hex());
            println!("pop = \"{}\"", keystore.proof_of_possession().to_hex());
        }
    }

    Ok(())
}
