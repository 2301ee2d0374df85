//! Relay engine.
//!
//! One scanner task per configured [`Direction`] walks the source chain and
//! forwards headers and proofs to the destination; one reconciliation task
//! settles what the scanners left in the [`RetryStore`]. Tasks share nothing
//! but the store, the registry and the chains' own state.

use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use crate::{
    chain_client::{current_height_key, decode_sync_height, ChainClient},
    config::{Config, RelayerConfig},
    store::RetryStore,
    types::{Account, ChainCursor, Direction},
    Error, Result,
};

pub mod registry;
mod header;
mod proof;
mod reconcile;
mod scanner;

pub use proof::ProofOutcome;
pub use reconcile::ReconcileReport;
pub use registry::{EndpointStatus, SideChainEndpoint, SideChainRegistry};

/// State shared by every relay task.
pub struct Relayer {
    registry: SideChainRegistry,
    store: Arc<RetryStore>,
    account: Account,
    settings: RelayerConfig,
    directions: Vec<Direction>,
    cancel: CancellationToken,
}

impl Relayer {
    pub fn new(
        registry: SideChainRegistry,
        store: Arc<RetryStore>,
        account: Account,
        settings: RelayerConfig,
        directions: Vec<Direction>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            store,
            account,
            settings,
            directions,
            cancel,
        }
    }

    pub fn registry(&self) -> &SideChainRegistry {
        &self.registry
    }

    pub fn store(&self) -> &RetryStore {
        &self.store
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    /// Sleeps for `duration` unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: std::time::Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    /// Reads the destination's synced height of the source chain.
    pub async fn initial_cursor(&self, direction: Direction) -> Result<ChainCursor> {
        let dest = self.registry.client(direction.dest).await?;
        let contracts = self.registry.contracts(direction.dest).await?;
        let value = dest
            .read_storage(&contracts.header_sync, &current_height_key(direction.source))
            .await?;
        let height = decode_sync_height(&value)?;
        Ok(ChainCursor::new(direction, height))
    }
}

/// Supervisor owning the relay tasks.
pub struct SyncService {
    relayer: Arc<Relayer>,
    cancel: CancellationToken,
}

impl SyncService {
    /// Builds the registry from `config`, pairing every configured chain with
    /// the client serving it.
    pub async fn new(
        config: &Config,
        clients: Vec<Arc<dyn ChainClient>>,
        store: Arc<RetryStore>,
    ) -> Result<Self> {
        let registry = SideChainRegistry::new();
        for chain in &config.chains {
            let client = clients
                .iter()
                .find(|c| c.chain_id() == chain.id)
                .cloned()
                .ok_or(Error::UnknownChain(chain.id))?;
            registry
                .insert(SideChainEndpoint::new(client, chain.contracts.clone()))
                .await;
        }

        let cancel = CancellationToken::new();
        let relayer = Relayer::new(
            registry,
            store,
            config.account.clone(),
            config.relayer.clone(),
            config.directions.clone(),
            cancel.clone(),
        );
        Ok(Self {
            relayer: Arc::new(relayer),
            cancel,
        })
    }

    pub fn relayer(&self) -> &Arc<Relayer> {
        &self.relayer
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Resolves every direction's starting height, then spawns the scanners
    /// and the reconciliation task. A cursor that cannot be read is fatal.
    pub async fn start(&self) -> Result<Vec<JoinHandle<()>>> {
        info!("Starting relayer for {} directions...", self.relayer.directions.len());

        let mut cursors = Vec::with_capacity(self.relayer.directions.len());
        for direction in &self.relayer.directions {
            let cursor = self.relayer.initial_cursor(*direction).await.map_err(|e| {
                error!("[{}] failed to read initial sync height: {}", direction, e);
                e
            })?;
            info!("[{}] starting at height {}", direction, cursor.height);
            self.relayer
                .registry
                .set_sync_height(*direction, cursor.height)
                .await?;
            cursors.push(cursor);
        }

        let mut handles = Vec::with_capacity(cursors.len() + 1);
        for cursor in cursors {
            let relayer = self.relayer.clone();
            handles.push(tokio::spawn(async move {
                relayer.run_scanner(cursor).await;
            }));
        }
        let relayer = self.relayer.clone();
        handles.push(tokio::spawn(async move {
            relayer.run_reconciliation().await;
        }));

        Ok(handles)
    }

    pub fn shutdown(&self) {
        info!("Stopping relayer");
        self.cancel.cancel();
    }

    pub async fn status(&self) -> Vec<EndpointStatus> {
        self.relayer.registry.snapshot().await
    }
}
