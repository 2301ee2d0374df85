use serde::{Deserialize, Serialize};
use std::fmt;

pub type ChainId = u64;

/// Raw transaction hash as returned by the submitting chain.
pub type TxHash = Vec<u8>;

/// One relay direction: headers and proofs flow from `source` to `dest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Direction {
    pub source: ChainId,
    pub dest: ChainId,
}

impl Direction {
    pub fn new(source: ChainId, dest: ChainId) -> Self {
        Self { source, dest }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}", self.source, self.dest)
    }
}

/// Next unscanned height of one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainCursor {
    pub direction: Direction,
    pub height: u32,
}

impl ChainCursor {
    pub fn new(direction: Direction, height: u32) -> Self {
        Self { direction, height }
    }

    pub fn advance(&mut self) {
        self.height += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub height: u32,
    /// Serialized header, forwarded as-is to the destination.
    pub header: Vec<u8>,
    /// The block starts a new validator/config epoch.
    pub epoch_change: bool,
}

/// Contract notifications the relayer cares about, decoded by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    HeaderEpochChange,
    CrossChainRequest {
        tx_hash: TxHash,
        to_chain: ChainId,
        request_id: Vec<u8>,
        /// Hex encoded state key the inclusion proof is requested for.
        key: String,
    },
    Other {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRequest {
    pub direction: Direction,
    pub request_id: Vec<u8>,
    pub tx_hash: TxHash,
    pub height: u32,
    pub key: String,
}

impl RelayRequest {
    pub fn record(&self) -> RetryRecord {
        RetryRecord {
            tx_hash: self.tx_hash.clone(),
            height: self.height,
            key: self.key.clone(),
        }
    }
}

/// Snapshot of a relay request kept in the retry store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryRecord {
    pub tx_hash: TxHash,
    pub height: u32,
    pub key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutcome {
    Success,
    Failed,
}

/// Contract calls the relayer submits to a destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum RelayCall {
    SyncBlockHeader {
        source_chain: ChainId,
        #[serde(with = "hex_vec")]
        headers: Vec<Vec<u8>>,
    },
    ProcessCrossChainTx {
        source_chain: ChainId,
        #[serde(with = "hex_bytes")]
        tx_hash: TxHash,
        height: u32,
        #[serde(with = "hex_bytes")]
        proof: Vec<u8>,
        relayer: String,
    },
}

/// Credentials handle. Only the address and fee parameters are read here;
/// signing happens on the node side of `ChainClient::submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: String,
    #[serde(default)]
    pub gas_price: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_gas_limit() -> u64 {
    20_000
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_vec {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(items.iter().map(hex::encode))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .into_iter()
            .map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
