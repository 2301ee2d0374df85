use log::{debug, info, warn};
use std::sync::Arc;
use crate::{
    chain_client::{header_index_key, ChainClient},
    types::{Direction, RelayCall},
    Error, Result,
};
use super::Relayer;

impl Relayer {
    /// Makes sure the destination holds the source header at `height`.
    ///
    /// Returns `Ok(false)` without submitting when the header index is already
    /// set. After a submission the header index is polled for a bounded time;
    /// running out of attempts is logged and not treated as an error.
    pub async fn relay_header(&self, direction: Direction, height: u32) -> Result<bool> {
        let dest = self.registry.client(direction.dest).await?;
        let contracts = self.registry.contracts(direction.dest).await?;
        let key = header_index_key(direction.source, height);

        if !dest.read_storage(&contracts.header_sync, &key).await?.is_empty() {
            debug!("[{}] header {} already synced", direction, height);
            return Ok(false);
        }

        let source = self.registry.client(direction.source).await?;
        let block = source.block_by_height(height).await?;
        let call = RelayCall::SyncBlockHeader {
            source_chain: direction.source,
            headers: vec![block.header],
        };
        let tx_hash = dest.submit(&call, &self.account).await?;
        info!("[{}] header {} submitted, tx {}", direction, height, hex::encode(&tx_hash));

        self.wait_for_header(&dest, &contracts.header_sync, direction, height, &key)
            .await?;
        Ok(true)
    }

    async fn wait_for_header(
        &self,
        dest: &Arc<dyn ChainClient>,
        contract: &str,
        direction: Direction,
        height: u32,
        key: &[u8],
    ) -> Result<()> {
        let confirmation = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            r = dest.wait_for_confirmation(self.settings.block_wait_timeout(), self.settings.min_confirmations) => r,
        };
        if let Err(e) = confirmation {
            warn!("[{}] waiting for blocks after header {}: {}", direction, height, e);
        }

        for _ in 0..self.settings.header_poll_attempts {
            match dest.read_storage(contract, key).await {
                Ok(v) if !v.is_empty() => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    warn!("[{}] polling header {}: {}", direction, height, e);
                    return Ok(());
                }
            }
            if !self.pause(self.settings.header_poll_interval()).await {
                return Err(Error::Cancelled);
            }
        }

        warn!(
            "[{}] header {} not visible after {} attempts, continuing",
            direction, height, self.settings.header_poll_attempts
        );
        Ok(())
    }
}
