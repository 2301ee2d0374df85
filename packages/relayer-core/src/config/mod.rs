use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::{
    types::{Account, ChainId, Direction},
    Error,
};

/// Error substrings a destination returns when the relayer's fee account has
/// run out of spendable outputs.
pub const DEFAULT_TRANSIENT_ERRORS: &[&str] = &["current utxo is not enough", "insufficient"];

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ContractAddresses {
    pub header_sync: String,
    pub cross_chain: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub id: ChainId,
    pub name: String,
    pub rpc_url: String,
    pub contracts: ContractAddresses,
    /// Notify name that marks a cross-chain request.
    pub request_event: String,
    /// Notify name that announces a validator/config epoch change, if the
    /// chain reports it as an event rather than in the block header.
    #[serde(default)]
    pub epoch_event: Option<String>,
    #[serde(default = "default_transient_errors")]
    pub transient_errors: Vec<String>,
}

fn default_transient_errors() -> Vec<String> {
    DEFAULT_TRANSIENT_ERRORS.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    #[serde(default = "default_one")]
    pub scan_interval: u64,
    #[serde(default = "default_one")]
    pub retry_interval: u64,
    /// Deferred records older than this many source blocks are dropped.
    #[serde(default = "default_retry_window")]
    pub retry_window: u32,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
    #[serde(default = "default_header_poll_interval_ms")]
    pub header_poll_interval_ms: u64,
    #[serde(default = "default_header_poll_attempts")]
    pub header_poll_attempts: u32,
    #[serde(default = "default_block_wait_timeout")]
    pub block_wait_timeout: u64,
    #[serde(default = "default_min_confirmations")]
    pub min_confirmations: u32,
}

fn default_one() -> u64 {
    1
}

fn default_min_confirmations() -> u32 {
    3
}

fn default_retry_window() -> u32 {
    50
}

fn default_list_limit() -> usize {
    1000
}

fn default_header_poll_interval_ms() -> u64 {
    1000
}

fn default_header_poll_attempts() -> u32 {
    60
}

fn default_block_wait_timeout() -> u64 {
    90
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            scan_interval: default_one(),
            retry_interval: default_one(),
            retry_window: default_retry_window(),
            list_limit: default_list_limit(),
            header_poll_interval_ms: default_header_poll_interval_ms(),
            header_poll_attempts: default_header_poll_attempts(),
            block_wait_timeout: default_block_wait_timeout(),
            min_confirmations: default_min_confirmations(),
        }
    }
}

impl RelayerConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval)
    }

    pub fn header_poll_interval(&self) -> Duration {
        Duration::from_millis(self.header_poll_interval_ms)
    }

    pub fn block_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.block_wait_timeout)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("relayer.redb"),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    pub directions: Vec<Direction>,
    pub account: Account,
    #[serde(default)]
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
            _ => serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.chains.is_empty() {
            return Err(Error::Config("At least one chain must be configured".to_string()));
        }
        let mut chain_ids = HashSet::new();
        for chain in &self.chains {
            if !chain_ids.insert(chain.id) {
                return Err(Error::Config(format!("Duplicate chain id: {}", chain.id)));
            }
            if chain.rpc_url.is_empty() {
                return Err(Error::Config(format!("Chain {} has an empty rpc_url", chain.id)));
            }
            if chain.request_event.is_empty() {
                return Err(Error::Config(format!("Chain {} has an empty request_event", chain.id)));
            }
        }

        if self.directions.is_empty() {
            return Err(Error::Config("At least one relay direction must be configured".to_string()));
        }
        let mut seen = HashSet::new();
        for direction in &self.directions {
            if direction.source == direction.dest {
                return Err(Error::Config(format!("Direction {} relays a chain to itself", direction)));
            }
            for id in [direction.source, direction.dest] {
                if !chain_ids.contains(&id) {
                    return Err(Error::Config(format!("Invalid chain ID in direction {}: {}", direction, id)));
                }
            }
            if !seen.insert(*direction) {
                return Err(Error::Config(format!("Duplicate direction: {}", direction)));
            }
        }

        if self.account.address.is_empty() {
            return Err(Error::Config("Account address must not be empty".to_string()));
        }

        if self.relayer.scan_interval == 0 {
            return Err(Error::Config("Relayer scan interval must be greater than 0".to_string()));
        }
        if self.relayer.retry_window == 0 {
            return Err(Error::Config("Relayer retry window must be greater than 0".to_string()));
        }
        if self.relayer.list_limit == 0 {
            return Err(Error::Config("Relayer list limit must be greater than 0".to_string()));
        }
        if self.relayer.header_poll_interval_ms == 0 || self.relayer.header_poll_attempts == 0 {
            return Err(Error::Config("Header poll interval and attempts must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn get_chain_config(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.id == chain_id)
    }
}
