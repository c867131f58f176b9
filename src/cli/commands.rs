//! CLI commands for the node
//!
//! Implements the command handlers behind the `ledger-node` binary.

use crate::config::Settings;
use crate::core::{spawn_importer, Blockchain, ChainSettings, Ledger, Mempool};
use crate::crypto::KeyPair;
use crate::network::{
    LocalNode, NodeIdentity, PeerSet, ProtocolHandler, TcpPeerFactory, TcpPeerListener,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Blocks and headers queued for the importer
const UPDATE_QUEUE_SIZE: usize = 256;

/// Settings from `config` (or a throwaway single-validator chain when no
/// file is given) with command-line overrides applied.
///
/// The genesis block depends on the standby validators, so a throwaway
/// chain cannot sync with anyone and seeds require a settings file.
pub fn load_settings(
    config: Option<&Path>,
    port: Option<u16>,
    seeds: &[String],
) -> CliResult<Settings> {
    let mut settings = match config {
        Some(path) => Settings::load(path)?,
        None if !seeds.is_empty() => {
            return Err("--seed needs --config: nodes only sync with a shared genesis".into());
        }
        None => {
            let key = KeyPair::generate();
            log::warn!(
                "No configuration given, using an ephemeral validator {}",
                key.validator_key()
            );
            Settings::new(ChainSettings::new(vec![key.validator_key()]))
        }
    };

    if let Some(port) = port {
        settings.network.port = port;
    }
    settings.network.seeds.extend(seeds.iter().cloned());
    settings.validate()?;
    Ok(settings)
}

/// Run a node until Ctrl-C
pub async fn cmd_start(settings: Settings) -> CliResult<()> {
    let network = settings.network;

    let blockchain = Arc::new(RwLock::new(Blockchain::new(settings.chain)));
    let mempool = Arc::new(RwLock::new(Mempool::new()));
    let (updates_tx, updates_rx) = mpsc::channel(UPDATE_QUEUE_SIZE);
    let importer = spawn_importer(blockchain.clone(), mempool.clone(), updates_rx);

    let identity = Arc::new(NodeIdentity::new(
        network.port,
        network.user_agent.clone(),
        network.relay,
    ));
    let peers = Arc::new(PeerSet::with_capacity(network.max_connections));
    let handler = ProtocolHandler::new(identity.clone(), peers.clone())
        .with_ledger(blockchain.clone(), mempool)
        .with_updates(updates_tx);

    let node = LocalNode::builder(network.clone())
        .identity(identity)
        .peers(peers)
        .ledger(blockchain.clone())
        .handler(Arc::new(handler))
        .peer_factory(Arc::new(TcpPeerFactory::new(network.connect_timeout())))
        .listener(Arc::new(TcpPeerListener::new(network.port)))
        .build()?;

    {
        let chain = blockchain.read().await;
        println!("🌐 Starting node on port {}...", network.port);
        println!("   ├─ Genesis: {}", chain.get_block_hash(0)?);
        println!("   ├─ Validators: {}", chain.get_validators().len());
        println!("   └─ Seeds: {}", network.seeds.len());
    }

    node.start().await?;

    tokio::signal::ctrl_c().await?;
    println!("\n📴 Shutting down node...");

    let status = node.status().await;
    node.stop().await;
    importer.abort();

    println!(
        "   └─ Stopped at height {} with {} peers",
        status.height.unwrap_or(0),
        status.peers
    );
    Ok(())
}

/// Print default settings around a fresh validator key, or write them to `output`
pub fn cmd_config(output: Option<&Path>) -> CliResult<()> {
    let key = KeyPair::generate();
    let settings = Settings::new(ChainSettings::new(vec![key.validator_key()]));

    match output {
        Some(path) => {
            settings.save(path)?;
            println!("✅ Configuration written to {:?}", path);
        }
        None => println!("{}", serde_json::to_string_pretty(&settings)?),
    }
    println!("🔑 Validator private key (keep it secret): {}", key.private_key_hex());
    Ok(())
}

/// Print a new validator key pair
pub fn cmd_keygen() -> CliResult<()> {
    let key = KeyPair::generate();

    println!("🔑 New validator key");
    println!("   ├─ Public key: {}", key.validator_key());
    println!("   ├─ Address: {}", key.address());
    println!("   └─ Private key: {}", key.private_key_hex());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_overrides_applied() {
        let file = NamedTempFile::new().unwrap();
        Settings::new(ChainSettings::new(vec![KeyPair::generate().validator_key()]))
            .save(file.path())
            .unwrap();

        let settings = load_settings(
            Some(file.path()),
            Some(30333),
            &["127.0.0.1:20333".to_string()],
        )
        .unwrap();
        assert_eq!(settings.network.port, 30333);
        assert_eq!(settings.network.seeds, vec!["127.0.0.1:20333".to_string()]);
    }

    #[test]
    fn test_ephemeral_settings_without_file() {
        let settings = load_settings(None, None, &[]).unwrap();
        assert_eq!(settings.chain.standby_validators.len(), 1);
        assert_eq!(settings.network.port, crate::config::DEFAULT_PORT);
    }

    #[test]
    fn test_seeds_require_settings_file() {
        assert!(load_settings(None, None, &["127.0.0.1:20333".to_string()]).is_err());
    }

    #[test]
    fn test_bad_seed_override_rejected() {
        let file = NamedTempFile::new().unwrap();
        Settings::new(ChainSettings::new(vec![KeyPair::generate().validator_key()]))
            .save(file.path())
            .unwrap();
        assert!(load_settings(Some(file.path()), None, &["nowhere".to_string()]).is_err());
    }
}
