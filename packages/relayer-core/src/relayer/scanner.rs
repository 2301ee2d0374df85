use log::{debug, error, info, warn};
use crate::{
    types::{ChainCursor, ChainEvent, Direction, RelayRequest},
    Error, Result,
};
use super::{ProofOutcome, Relayer};

impl Relayer {
    /// Long-running scan loop of one direction. Returns once cancelled.
    pub async fn run_scanner(&self, mut cursor: ChainCursor) {
        let direction = cursor.direction;
        info!("[{}] scanner started at height {}", direction, cursor.height);

        loop {
            if let Err(e) = self.scan(&mut cursor).await {
                if matches!(e, Error::Cancelled) {
                    break;
                }
                error!("[{}] scan stopped at height {}: {}", direction, cursor.height, e);
            }
            if !self.pause(self.settings.scan_interval()).await {
                break;
            }
        }

        info!("[{}] scanner stopped at height {}", direction, cursor.height);
    }

    /// Walks `[cursor, tip)` of the source chain. The tip is left for the next
    /// pass because a request at height `h` needs the header at `h + 1`.
    ///
    /// On error the cursor stays on the failed height.
    pub async fn scan(&self, cursor: &mut ChainCursor) -> Result<()> {
        let direction = cursor.direction;
        let source = self.registry.client(direction.source).await?;
        let tip = source.current_height().await?;

        while cursor.height < tip {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.scan_height(direction, cursor.height).await?;
            cursor.advance();
            self.registry.set_sync_height(direction, cursor.height).await?;
        }
        Ok(())
    }

    async fn scan_height(&self, direction: Direction, height: u32) -> Result<()> {
        debug!("[{}] parsing block {}", direction, height);
        let source = self.registry.client(direction.source).await?;

        let block = source.block_by_height(height).await?;
        let mut epoch_synced = false;
        if block.epoch_change {
            self.relay_header(direction, height).await?;
            epoch_synced = true;
        }

        let events = source.events_by_block(height).await?;
        for event in events {
            match event {
                ChainEvent::HeaderEpochChange => {
                    if !epoch_synced {
                        self.relay_header(direction, height).await?;
                        epoch_synced = true;
                    }
                }
                ChainEvent::CrossChainRequest {
                    tx_hash,
                    to_chain,
                    request_id,
                    key,
                } => {
                    if to_chain != direction.dest {
                        debug!("[{}] request at {} targets chain {}, skipped", direction, height, to_chain);
                        continue;
                    }
                    let request = RelayRequest {
                        direction,
                        request_id,
                        tx_hash,
                        height,
                        key,
                    };
                    self.relay_request(&request).await?;
                }
                ChainEvent::Other { .. } => {}
            }
        }
        Ok(())
    }

    async fn relay_request(&self, request: &RelayRequest) -> Result<()> {
        let direction = request.direction;
        self.relay_header(direction, request.height + 1).await?;

        match self.relay_proof(request).await {
            Ok(ProofOutcome::Submitted(_)) | Ok(ProofOutcome::Deferred) => Ok(()),
            Err(e) if e.is_transport() || matches!(e, Error::Storage(_) | Error::Cancelled) => Err(e),
            Err(e) => {
                // already dead-lettered, the height moves on
                warn!(
                    "[{}] request {} at height {} key {} dropped: {}",
                    direction,
                    hex::encode(&request.request_id),
                    request.height,
                    request.key,
                    e
                );
                Ok(())
            }
        }
    }
}
