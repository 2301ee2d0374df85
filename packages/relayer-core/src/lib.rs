pub mod config;
pub mod types;
pub mod codec;
pub mod chain_client;
pub mod store;
pub mod relayer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::Config;
pub use types::{Account, ChainEvent, ChainId, Direction, RelayRequest, RetryRecord, TxOutcome};
pub use store::RetryStore;
pub use relayer::SyncService;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    /// The chain answered but rejected the request.
    #[error("Chain error: {0}")]
    Chain(String),

    /// The chain could not be reached or returned garbage at the transport level.
    #[error("Network error: {0}")]
    Network(String),

    /// A node answered a read query with an error, e.g. state not yet available.
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Decode error: {0}")]
    Decode(String),

    /// Destination rejected the submission for lack of spendable resources
    /// on the relayer's fee account. Expected to clear up on its own.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Unknown chain: {0}")]
    UnknownChain(ChainId),

    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Errors worth retrying at the same height on the next pass.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_) | Error::Rpc(_))
    }

    /// Errors that are absorbed into a deferred record instead of surfacing.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::ResourceExhausted(_))
    }
}

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Error {
                fn from(e: $ty) -> Self {
                    Error::Storage(e.to_string())
                }
            }
        )*
    };
}

storage_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);
