use log::{error, info};
use crate::{
    types::{Direction, RelayCall, RelayRequest, RetryRecord, TxHash},
    Error, Result,
};
use super::Relayer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProofOutcome {
    /// Accepted by the destination, tracked as pending until its outcome shows up.
    Submitted(TxHash),
    /// Rejected for a transient reason and parked in the deferred table.
    Deferred,
}

impl Relayer {
    /// Fetches the inclusion proof of `request` and submits it to the destination.
    ///
    /// Transient rejections are absorbed into a deferred record. Transport
    /// errors, including a source node failing the proof query, are returned
    /// untouched so the caller can retry the height. Any other failure is
    /// dead-lettered before being returned.
    pub async fn relay_proof(&self, request: &RelayRequest) -> Result<ProofOutcome> {
        let direction = request.direction;
        let record = request.record();

        match self.submit_proof(direction, &record).await {
            Ok(tx_hash) => {
                // also clears a deferred copy left by an earlier pass over this height
                self.store.promote(direction, &record, &tx_hash)?;
                info!(
                    "[{}] proof for height {} key {} submitted, tx {}",
                    direction,
                    record.height,
                    record.key,
                    hex::encode(&tx_hash)
                );
                Ok(ProofOutcome::Submitted(tx_hash))
            }
            Err(e) if e.is_transient() => {
                info!(
                    "[{}] proof for height {} key {} deferred: {}",
                    direction, record.height, record.key, e
                );
                self.store.put_deferred(direction, &record)?;
                Ok(ProofOutcome::Deferred)
            }
            Err(e) if e.is_transport() || matches!(e, Error::Cancelled) => Err(e),
            Err(e) => {
                self.dead_letter(direction, &record, &e);
                Err(e)
            }
        }
    }

    /// The submission step alone, shared by first attempts and retries.
    pub(crate) async fn submit_proof(&self, direction: Direction, record: &RetryRecord) -> Result<TxHash> {
        let key = hex::decode(&record.key)
            .map_err(|e| Error::Decode(format!("state key {:?}: {}", record.key, e)))?;

        let source = self.registry.client(direction.source).await?;
        let dest = self.registry.client(direction.dest).await?;

        // source-side query failures retry the request, they never dead-letter it
        let proof = source
            .cross_states_proof(record.height, &key)
            .await
            .map_err(|e| match e {
                Error::Chain(msg) => Error::Rpc(format!(
                    "proof for key {} at height {}: {}",
                    record.key, record.height, msg
                )),
                other => other,
            })?;
        if proof.is_empty() {
            return Err(Error::Decode(format!(
                "empty proof for key {} at height {}",
                record.key, record.height
            )));
        }

        let call = RelayCall::ProcessCrossChainTx {
            source_chain: direction.source,
            tx_hash: record.tx_hash.clone(),
            height: record.height + 1,
            proof,
            relayer: self.account.address.clone(),
        };
        dest.submit(&call, &self.account).await
    }

    pub(crate) fn dead_letter(&self, direction: Direction, record: &RetryRecord, err: &Error) {
        error!(
            "[{}] dropping request tx {} height {} key {}: {}",
            direction,
            hex::encode(&record.tx_hash),
            record.height,
            record.key,
            err
        );
        if let Err(e) = self.store.put_failed(direction, record, &err.to_string()) {
            error!("[{}] failed to record dropped request: {}", direction, e);
        }
    }
}
