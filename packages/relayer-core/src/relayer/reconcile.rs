use log::{debug, error, info, warn};
use std::collections::HashMap;
use crate::{
    types::{Direction, TxOutcome},
    Error, Result,
};
use super::Relayer;

/// What one reconciliation cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub demoted: usize,
    pub still_pending: usize,
    pub resubmitted: usize,
    pub expired: usize,
    pub dropped: usize,
}

impl ReconcileReport {
    pub fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

impl Relayer {
    /// Runs reconciliation cycles every `scan_interval` until cancelled.
    pub async fn run_reconciliation(&self) {
        info!("reconciliation started");
        loop {
            match self.reconcile_once().await {
                Ok(report) if report.is_idle() => debug!("reconciliation cycle idle"),
                Ok(report) => info!("reconciliation cycle: {:?}", report),
                Err(Error::Cancelled) => break,
                Err(e) => error!("reconciliation cycle aborted: {}", e),
            }
            if !self.pause(self.settings.scan_interval()).await {
                break;
            }
        }
        info!("reconciliation stopped");
    }

    /// Settles pending submissions, drops expired deferred records, then
    /// resubmits the deferred records still inside the retry window.
    pub async fn reconcile_once(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        self.check_pending(&mut report).await?;

        let mut heights = HashMap::new();
        for direction in &self.directions {
            match self.source_height(direction.source).await {
                Ok(height) => {
                    heights.insert(direction.source, height);
                    report.expired += self
                        .store
                        .purge_expired(*direction, height, self.settings.retry_window)?;
                }
                Err(e) => warn!("[{}] skipping expiry, source height unavailable: {}", direction, e),
            }
        }

        self.retry_deferred(&heights, &mut report).await?;
        Ok(report)
    }

    async fn source_height(&self, source: u64) -> Result<u32> {
        self.registry.client(source).await?.current_height().await
    }

    async fn check_pending(&self, report: &mut ReconcileReport) -> Result<()> {
        for entry in self.store.list_pending()? {
            let direction = entry.direction;
            let tx = hex::encode(&entry.tx_hash);
            let dest = match self.registry.client(direction.dest).await {
                Ok(dest) => dest,
                Err(e) => {
                    warn!("[{}] pending tx {}: {}", direction, tx, e);
                    report.still_pending += 1;
                    continue;
                }
            };

            match dest.tx_outcome(&entry.tx_hash).await {
                Ok(None) => report.still_pending += 1,
                Ok(Some(TxOutcome::Success)) => {
                    self.store.delete_pending(direction, &entry.tx_hash)?;
                    info!(
                        "[{}] proof tx {} for height {} key {} confirmed",
                        direction, tx, entry.record.height, entry.record.key
                    );
                    report.confirmed += 1;
                }
                Ok(Some(TxOutcome::Failed)) => {
                    if self.store.demote(direction, &entry.tx_hash)? {
                        warn!(
                            "[{}] proof tx {} for height {} key {} failed on chain, deferred",
                            direction, tx, entry.record.height, entry.record.key
                        );
                        report.demoted += 1;
                    }
                }
                Err(e) => {
                    warn!("[{}] outcome of tx {} unavailable: {}", direction, tx, e);
                    report.still_pending += 1;
                }
            }
        }
        Ok(())
    }

    async fn retry_deferred(&self, heights: &HashMap<u64, u32>, report: &mut ReconcileReport) -> Result<()> {
        let window = self.settings.retry_window;
        let mut first = true;

        for entry in self.store.list_deferred()? {
            let Direction { source, .. } = entry.direction;
            let record = entry.record;
            // unknown source height means the direction is unconfigured or unreachable
            match heights.get(&source) {
                Some(current) if current.saturating_sub(record.height) <= window => {}
                _ => continue,
            }

            if !first && !self.pause(self.settings.retry_interval()).await {
                return Err(Error::Cancelled);
            }
            first = false;

            match self.submit_proof(entry.direction, &record).await {
                Ok(tx_hash) => {
                    self.store.promote(entry.direction, &record, &tx_hash)?;
                    info!(
                        "[{}] deferred proof for height {} key {} resubmitted, tx {}",
                        entry.direction,
                        record.height,
                        record.key,
                        hex::encode(&tx_hash)
                    );
                    report.resubmitted += 1;
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if e.is_transient() || e.is_transport() => {
                    debug!(
                        "[{}] deferred proof for height {} key {} still blocked: {}",
                        entry.direction, record.height, record.key, e
                    );
                }
                Err(e) => {
                    self.store.delete_deferred(entry.direction, &record)?;
                    self.dead_letter(entry.direction, &record, &e);
                    report.dropped += 1;
                }
            }
        }
        Ok(())
    }
}
