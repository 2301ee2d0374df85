use async_trait::async_trait;
use std::time::Duration;
use crate::{
    types::{Account, Block, ChainEvent, ChainId, RelayCall, TxHash, TxOutcome},
    Error,
};

pub mod jsonrpc;

pub use jsonrpc::JsonRpcClient;

/// Storage key prefix of the synced header index in the header-sync contract.
pub const HEADER_INDEX: &[u8] = b"headerIndex";
/// Storage key prefix of the latest synced height per source chain.
pub const CURRENT_HEIGHT: &[u8] = b"currentHeight";

/// Everything the relayer needs from one chain.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_id(&self) -> ChainId;

    async fn current_height(&self) -> Result<u32, Error>;

    async fn block_by_height(&self, height: u32) -> Result<Block, Error>;

    /// Contract notifications emitted in the block, already decoded.
    async fn events_by_block(&self, height: u32) -> Result<Vec<ChainEvent>, Error>;

    /// Returns an empty vector when the slot is unset.
    async fn read_storage(&self, contract: &str, key: &[u8]) -> Result<Vec<u8>, Error>;

    async fn cross_states_proof(&self, height: u32, key: &[u8]) -> Result<Vec<u8>, Error>;

    /// Resource exhaustion on the destination must surface as
    /// [`Error::ResourceExhausted`].
    async fn submit(&self, call: &RelayCall, account: &Account) -> Result<TxHash, Error>;

    /// Blocks until `min_confirmations` new blocks are produced or `timeout` passes.
    async fn wait_for_confirmation(&self, timeout: Duration, min_confirmations: u32) -> Result<(), Error>;

    /// `None` while the transaction has not been executed yet.
    async fn tx_outcome(&self, tx_hash: &[u8]) -> Result<Option<TxOutcome>, Error>;
}

/// `headerIndex | u64_le(source) | u32_le(height)`
pub fn header_index_key(source: ChainId, height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(HEADER_INDEX.len() + 12);
    key.extend_from_slice(HEADER_INDEX);
    key.extend_from_slice(&source.to_le_bytes());
    key.extend_from_slice(&height.to_le_bytes());
    key
}

/// `currentHeight | u64_le(source)`
pub fn current_height_key(source: ChainId) -> Vec<u8> {
    let mut key = Vec::with_capacity(CURRENT_HEIGHT.len() + 8);
    key.extend_from_slice(CURRENT_HEIGHT);
    key.extend_from_slice(&source.to_le_bytes());
    key
}

/// Decodes the synced height slot. An unset slot means nothing was synced yet.
pub fn decode_sync_height(value: &[u8]) -> Result<u32, Error> {
    match value.len() {
        0 => Ok(0),
        4 => {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(value);
            Ok(u32::from_le_bytes(buf))
        }
        n => Err(Error::Decode(format!("synced height slot has {} bytes, expected 4", n))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_keys() {
        let key = header_index_key(3, 101);
        assert!(key.starts_with(b"headerIndex"));
        assert_eq!(&key[11..19], &3u64.to_le_bytes());
        assert_eq!(&key[19..], &101u32.to_le_bytes());

        let key = current_height_key(0);
        assert_eq!(key, [b"currentHeight".as_slice(), &[0u8; 8]].concat());
    }

    #[test]
    fn test_decode_sync_height() {
        assert_eq!(decode_sync_height(&[]).unwrap(), 0);
        assert_eq!(decode_sync_height(&42u32.to_le_bytes()).unwrap(), 42);
        assert!(matches!(decode_sync_height(&[1, 2]), Err(Error::Decode(_))));
    }
}
