use log::warn;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use crate::{
    chain_client::ChainClient,
    config::ContractAddresses,
    types::{ChainId, Direction},
    Error,
};

/// One monitored chain.
pub struct SideChainEndpoint {
    pub chain_id: ChainId,
    pub client: Arc<dyn ChainClient>,
    pub contracts: ContractAddresses,
    /// Next height to scan, per source chain relaying into this one.
    sync_heights: HashMap<ChainId, u32>,
}

impl SideChainEndpoint {
    pub fn new(client: Arc<dyn ChainClient>, contracts: ContractAddresses) -> Self {
        Self {
            chain_id: client.chain_id(),
            client,
            contracts,
            sync_heights: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointStatus {
    pub chain_id: ChainId,
    /// `(source chain, next height)` pairs, ordered by source.
    pub sync_heights: Vec<(ChainId, u32)>,
}

/// Shared chain id -> endpoint map. Every accessor holds the lock only for
/// the access itself; callers get clones, never the map.
#[derive(Default)]
pub struct SideChainRegistry {
    endpoints: RwLock<HashMap<ChainId, SideChainEndpoint>>,
}

impl SideChainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, endpoint: SideChainEndpoint) {
        self.endpoints.write().await.insert(endpoint.chain_id, endpoint);
    }

    pub async fn client(&self, chain_id: ChainId) -> Result<Arc<dyn ChainClient>, Error> {
        self.endpoints
            .read()
            .await
            .get(&chain_id)
            .map(|e| e.client.clone())
            .ok_or(Error::UnknownChain(chain_id))
    }

    pub async fn contracts(&self, chain_id: ChainId) -> Result<ContractAddresses, Error> {
        self.endpoints
            .read()
            .await
            .get(&chain_id)
            .map(|e| e.contracts.clone())
            .ok_or(Error::UnknownChain(chain_id))
    }

    pub async fn sync_height(&self, direction: Direction) -> Option<u32> {
        self.endpoints
            .read()
            .await
            .get(&direction.dest)
            .and_then(|e| e.sync_heights.get(&direction.source).copied())
    }

    /// Records the cursor of `direction`. A height below the stored one is
    /// ignored, cursors only move forward.
    pub async fn set_sync_height(&self, direction: Direction, height: u32) -> Result<(), Error> {
        let mut endpoints = self.endpoints.write().await;
        let endpoint = endpoints
            .get_mut(&direction.dest)
            .ok_or(Error::UnknownChain(direction.dest))?;
        let current = endpoint.sync_heights.entry(direction.source).or_insert(height);
        if height < *current {
            warn!("[{}] ignoring cursor regression {} -> {}", direction, *current, height);
        } else {
            *current = height;
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<EndpointStatus> {
        let endpoints = self.endpoints.read().await;
        let ordered: BTreeMap<_, _> = endpoints.iter().collect();
        ordered
            .into_iter()
            .map(|(id, e)| {
                let mut sync_heights: Vec<_> = e.sync_heights.iter().map(|(s, h)| (*s, *h)).collect();
                sync_heights.sort_unstable();
                EndpointStatus {
                    chain_id: *id,
                    sync_heights,
                }
            })
            .collect()
    }
}
