//! Ledger node CLI application
//!
//! Runs a peer-to-peer node over the in-memory ledger.

use clap::{Parser, Subcommand};
use ledger_node::cli;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ledger-node")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "Peer-to-peer ledger node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until interrupted
    ///
    /// Without --config the node runs a private chain around a throwaway
    /// validator key. Its genesis block matches no other node, so --seed
    /// requires --config.
    Start {
        /// Settings file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Port to listen on, overriding the settings file
        #[arg(short, long)]
        port: Option<u16>,

        /// Extra seed peer (host:port); may be repeated
        #[arg(short, long = "seed")]
        seeds: Vec<String>,
    },

    /// Print default settings with a fresh validator key
    Config {
        /// Write the settings here instead of printing them
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a validator key pair
    Keygen,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config,
            port,
            seeds,
        } => {
            let settings = cli::load_settings(config.as_deref(), port, &seeds)?;
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_start(settings))?;
        }
        Commands::Config { output } => cli::cmd_config(output.as_deref())?,
        Commands::Keygen => cli::cmd_keygen()?,
    }

    Ok(())
}
