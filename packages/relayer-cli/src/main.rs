use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relayer_core::{
    chain_client::{ChainClient, JsonRpcClient},
    store::{Namespace, RetryStore},
    Config, SyncService,
};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{settings::Style, Table, Tabled};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use unicode_width::UnicodeWidthStr;

const KEY_COLUMN_WIDTH: usize = 48;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and summarize a config file
    ValidateConfig {
        /// Config file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Run the relayer until Ctrl-C
    Start {
        /// Config file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// List the records of one retry store table
    Inspect {
        /// Config file path
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// pending, deferred or failed
        #[arg(short, long, default_value = "deferred")]
        namespace: String,
    },
}

#[derive(Tabled)]
struct RecordRow {
    direction: String,
    height: u32,
    key: String,
    tx: String,
    note: String,
}

fn clip(s: &str) -> String {
    if s.width() <= KEY_COLUMN_WIDTH {
        return s.to_string();
    }
    let mut out = String::new();
    for c in s.chars() {
        if out.width() + 3 >= KEY_COLUMN_WIDTH {
            break;
        }
        out.push(c);
    }
    out.push_str("...");
    out
}

fn validate_config(path: PathBuf) -> Result<()> {
    info!("Validating config file: {:?}", path);
    let config = Config::load(&path)?;
    println!("Config file is valid.");
    println!("- Chains:");
    for chain in &config.chains {
        println!("  - {} ({}): {}", chain.name, chain.id, chain.rpc_url);
        println!("    header sync: {}, cross chain: {}", chain.contracts.header_sync, chain.contracts.cross_chain);
    }
    println!("- Directions:");
    for direction in &config.directions {
        println!("  - {}", direction);
    }
    println!("- Account: {}", config.account.address);
    println!("- Relayer:");
    println!("  - scan interval: {}s", config.relayer.scan_interval);
    println!("  - retry interval: {}s", config.relayer.retry_interval);
    println!("  - retry window: {} blocks", config.relayer.retry_window);
    println!("- Store: {}", config.store.path.display());
    Ok(())
}

async fn start(path: PathBuf) -> Result<()> {
    info!("Starting relayer with config file: {:?}", path);
    let config = Config::load(&path)?;

    let store = RetryStore::open(&config.store.path, config.relayer.list_limit)
        .with_context(|| format!("opening retry store {}", config.store.path.display()))?;

    let mut clients: Vec<Arc<dyn ChainClient>> = Vec::with_capacity(config.chains.len());
    for chain in &config.chains {
        clients.push(Arc::new(JsonRpcClient::new(chain.clone())?));
    }

    let service = SyncService::new(&config, clients, Arc::new(store)).await?;
    let handles = service.start().await?;
    info!("Relayer running, press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }
    service.shutdown();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Relay task ended abnormally: {}", e);
        }
    }
    for status in service.status().await {
        info!("chain {} synced heights: {:?}", status.chain_id, status.sync_heights);
    }
    Ok(())
}

fn inspect(path: PathBuf, namespace: &str) -> Result<()> {
    let config = Config::load(&path)?;
    let namespace: Namespace = namespace.parse()?;
    let store = RetryStore::open(&config.store.path, config.relayer.list_limit)?;

    let rows: Vec<RecordRow> = match namespace {
        Namespace::Pending => store
            .list_pending()?
            .into_iter()
            .map(|e| RecordRow {
                direction: e.direction.to_string(),
                height: e.record.height,
                key: clip(&e.record.key),
                tx: hex::encode(&e.tx_hash),
                note: format!("request tx {}", hex::encode(&e.record.tx_hash)),
            })
            .collect(),
        Namespace::Deferred => store
            .list_deferred()?
            .into_iter()
            .map(|e| RecordRow {
                direction: e.direction.to_string(),
                height: e.record.height,
                key: clip(&e.record.key),
                tx: hex::encode(&e.record.tx_hash),
                note: String::new(),
            })
            .collect(),
        Namespace::Failed => store
            .list_failed()?
            .into_iter()
            .map(|e| RecordRow {
                direction: e.direction.to_string(),
                height: e.record.height,
                key: clip(&e.record.key),
                tx: hex::encode(&e.record.tx_hash),
                note: e.reason,
            })
            .collect(),
    };

    let total = store.count(namespace)?;
    let shown = rows.len();
    let mut table = Table::new(rows);
    table.with(Style::modern());
    println!("{}", table);
    println!("{} of {} records shown", shown, total);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig { config } => validate_config(config),
        Commands::Start { config } => start(config).await,
        Commands::Inspect { config, namespace } => inspect(config, &namespace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_inspect_args() {
        let cli = Cli::parse_from(["relayer", "inspect", "-c", "relayer.toml", "--namespace", "failed"]);
        match cli.command {
            Commands::Inspect { namespace, .. } => assert_eq!(namespace, "failed"),
            _ => panic!("expected inspect"),
        }
    }

    #[test]
    fn test_clip_long_keys() {
        assert_eq!(clip("abc123"), "abc123");
        let clipped = clip(&"ab".repeat(40));
        assert!(clipped.ends_with("..."));
        assert!(clipped.width() <= KEY_COLUMN_WIDTH);
    }
}
