//! Scripted in-memory chain used by the relayer tests.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use crate::{
    chain_client::{current_height_key, header_index_key, ChainClient},
    config::{ContractAddresses, RelayerConfig},
    relayer::{registry::{SideChainEndpoint, SideChainRegistry}, Relayer},
    store::{RetryStore, DEFAULT_LIST_LIMIT},
    types::{Account, Block, ChainEvent, ChainId, Direction, RelayCall, TxHash, TxOutcome},
    Error,
};

pub const HEADER_SYNC: &str = "0800";
pub const CROSS_CHAIN: &str = "0900";

pub fn contracts() -> ContractAddresses {
    ContractAddresses {
        header_sync: HEADER_SYNC.to_string(),
        cross_chain: CROSS_CHAIN.to_string(),
    }
}

pub fn account() -> Account {
    Account {
        address: "AQf4Mzu1YJrhz9f3aRkkwSm9n3qhXGSh4p".to_string(),
        gas_price: 0,
        gas_limit: 20_000,
    }
}

pub fn fast_settings() -> RelayerConfig {
    RelayerConfig {
        scan_interval: 1,
        retry_interval: 0,
        retry_window: 50,
        list_limit: DEFAULT_LIST_LIMIT,
        header_poll_interval_ms: 1,
        header_poll_attempts: 3,
        block_wait_timeout: 1,
        min_confirmations: 1,
    }
}

/// Header bytes of the mock chain carry the chain id and height so the
/// destination side can index them on submission.
pub fn mock_header(chain_id: ChainId, height: u32) -> Vec<u8> {
    let mut header = chain_id.to_le_bytes().to_vec();
    header.extend_from_slice(&height.to_le_bytes());
    header
}

pub fn mock_proof(height: u32, key: &[u8]) -> Vec<u8> {
    let mut proof = height.to_le_bytes().to_vec();
    proof.extend_from_slice(key);
    proof
}

pub fn request(tx: u8, to_chain: ChainId, key: &str) -> ChainEvent {
    ChainEvent::CrossChainRequest {
        tx_hash: vec![tx; 32],
        to_chain,
        request_id: vec![tx],
        key: key.to_string(),
    }
}

#[derive(Default)]
struct MockState {
    height: u32,
    epochs: Vec<u32>,
    events: HashMap<u32, Vec<ChainEvent>>,
    event_failures: HashMap<u32, u32>,
    proof_failures: u32,
    block_requests: Vec<u32>,
    storage: HashMap<(String, Vec<u8>), Vec<u8>>,
    submit_failures: VecDeque<Error>,
    submitted: Vec<RelayCall>,
    outcomes: HashMap<TxHash, TxOutcome>,
    next_tx: u64,
    index_headers: bool,
}

pub struct MockChain {
    chain_id: ChainId,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new(chain_id: ChainId) -> Self {
        Self {
            chain_id,
            state: Mutex::new(MockState {
                index_headers: true,
                ..Default::default()
            }),
        }
    }

    pub fn set_height(&self, height: u32) {
        self.state.lock().unwrap().height = height;
    }

    pub fn set_epoch(&self, height: u32) {
        self.state.lock().unwrap().epochs.push(height);
    }

    pub fn add_event(&self, height: u32, event: ChainEvent) {
        self.state.lock().unwrap().events.entry(height).or_default().push(event);
    }

    /// The next `times` event queries for `height` fail with a network error.
    pub fn fail_events(&self, height: u32, times: u32) {
        self.state.lock().unwrap().event_failures.insert(height, times);
    }

    /// The next `times` proof queries fail the way a node without the state answers.
    pub fn fail_proofs(&self, times: u32) {
        self.state.lock().unwrap().proof_failures = times;
    }

    /// Queues errors returned by the next proof submissions.
    pub fn fail_proof_submissions(&self, errors: Vec<Error>) {
        self.state.lock().unwrap().submit_failures.extend(errors);
    }

    /// Stops the header index from being written on header submission.
    pub fn ignore_headers(&self) {
        self.state.lock().unwrap().index_headers = false;
    }

    pub fn set_storage(&self, contract: &str, key: Vec<u8>, value: Vec<u8>) {
        self.state.lock().unwrap().storage.insert((contract.to_string(), key), value);
    }

    pub fn set_outcome(&self, tx_hash: &[u8], outcome: TxOutcome) {
        self.state.lock().unwrap().outcomes.insert(tx_hash.to_vec(), outcome);
    }

    pub fn submitted(&self) -> Vec<RelayCall> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn header_submissions(&self) -> Vec<u32> {
        self.submitted()
            .into_iter()
            .filter_map(|call| match call {
                RelayCall::SyncBlockHeader { headers, .. } => {
                    headers.first().map(|h| u32::from_le_bytes([h[8], h[9], h[10], h[11]]))
                }
                _ => None,
            })
            .collect()
    }

    pub fn proof_submissions(&self) -> Vec<u32> {
        self.submitted()
            .into_iter()
            .filter_map(|call| match call {
                RelayCall::ProcessCrossChainTx { height, .. } => Some(height),
                _ => None,
            })
            .collect()
    }

    pub fn block_requests(&self) -> Vec<u32> {
        self.state.lock().unwrap().block_requests.clone()
    }

    fn next_tx_hash(state: &mut MockState) -> TxHash {
        state.next_tx += 1;
        let mut hash = vec![0u8; 32];
        hash[24..].copy_from_slice(&state.next_tx.to_be_bytes());
        hash
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn current_height(&self) -> Result<u32, Error> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn block_by_height(&self, height: u32) -> Result<Block, Error> {
        let mut state = self.state.lock().unwrap();
        state.block_requests.push(height);
        if height > state.height {
            return Err(Error::Chain(format!("block {} not found", height)));
        }
        Ok(Block {
            height,
            header: mock_header(self.chain_id, height),
            epoch_change: state.epochs.contains(&height),
        })
    }

    async fn events_by_block(&self, height: u32) -> Result<Vec<ChainEvent>, Error> {
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.event_failures.get_mut(&height) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Network(format!("events at {} unavailable", height)));
            }
        }
        Ok(state.events.get(&height).cloned().unwrap_or_default())
    }

    async fn read_storage(&self, contract: &str, key: &[u8]) -> Result<Vec<u8>, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .storage
            .get(&(contract.to_string(), key.to_vec()))
            .cloned()
            .unwrap_or_default())
    }

    async fn cross_states_proof(&self, height: u32, key: &[u8]) -> Result<Vec<u8>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.proof_failures > 0 {
            state.proof_failures -= 1;
            return Err(Error::Chain("getcrossstatesproof: code 42002: state not found".into()));
        }
        Ok(mock_proof(height, key))
    }

    async fn submit(&self, call: &RelayCall, _account: &Account) -> Result<TxHash, Error> {
        let mut state = self.state.lock().unwrap();
        match call {
            RelayCall::SyncBlockHeader { source_chain, headers } => {
                state.submitted.push(call.clone());
                if state.index_headers {
                    for header in headers {
                        let height = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
                        state
                            .storage
                            .insert((HEADER_SYNC.to_string(), header_index_key(*source_chain, height)), header.clone());
                        state.storage.insert(
                            (HEADER_SYNC.to_string(), current_height_key(*source_chain)),
                            height.to_le_bytes().to_vec(),
                        );
                    }
                }
            }
            RelayCall::ProcessCrossChainTx { .. } => {
                state.submitted.push(call.clone());
                if let Some(err) = state.submit_failures.pop_front() {
                    return Err(err);
                }
            }
        }
        Ok(Self::next_tx_hash(&mut state))
    }

    async fn wait_for_confirmation(&self, _timeout: Duration, _min_confirmations: u32) -> Result<(), Error> {
        Ok(())
    }

    async fn tx_outcome(&self, tx_hash: &[u8]) -> Result<Option<TxOutcome>, Error> {
        Ok(self.state.lock().unwrap().outcomes.get(tx_hash).copied())
    }
}

pub struct TestRelay {
    pub relayer: Arc<Relayer>,
    pub store: Arc<RetryStore>,
    pub chains: HashMap<ChainId, Arc<MockChain>>,
    _dir: tempfile::TempDir,
}

impl TestRelay {
    pub fn chain(&self, id: ChainId) -> &MockChain {
        &self.chains[&id]
    }
}

pub async fn test_relay(chain_ids: &[ChainId], directions: Vec<Direction>, settings: RelayerConfig) -> TestRelay {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RetryStore::open(dir.path().join("retry.redb"), settings.list_limit).unwrap());
    let registry = SideChainRegistry::new();
    let mut chains = HashMap::new();
    for id in chain_ids {
        let chain = Arc::new(MockChain::new(*id));
        registry.insert(SideChainEndpoint::new(chain.clone(), contracts())).await;
        chains.insert(*id, chain);
    }
    let relayer = Arc::new(Relayer::new(
        registry,
        store.clone(),
        account(),
        settings,
        directions,
        CancellationToken::new(),
    ));
    TestRelay {
        relayer,
        store,
        chains,
        _dir: dir,
    }
}
