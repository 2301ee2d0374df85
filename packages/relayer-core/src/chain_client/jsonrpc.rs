use async_trait::async_trait;
use log::{debug, error, warn};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use crate::{
    config::ChainConfig,
    types::{Account, Block, ChainEvent, ChainId, RelayCall, TxHash, TxOutcome},
    Error,
};
use super::ChainClient;

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONFIRMATION_POLL: Duration = Duration::from_secs(1);
const SUBMIT_METHOD: &str = "sendrelaytransaction";

/// Positions inside a cross-chain request notify:
/// `[name, to_chain, request_id, _, key]`.
const STATE_TO_CHAIN: usize = 1;
const STATE_REQUEST_ID: usize = 2;
const STATE_KEY: usize = 4;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcBlock {
    #[serde(rename = "Header")]
    header: RpcHeader,
    #[serde(rename = "RawHeader")]
    raw_header: String,
}

#[derive(Debug, Deserialize)]
struct RpcHeader {
    #[serde(rename = "Height")]
    height: u32,
    #[serde(rename = "ConsensusPayload", default)]
    consensus_payload: String,
}

#[derive(Debug, Deserialize)]
struct ConsensusPayload {
    #[serde(default)]
    new_chain_config: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcContractEvent {
    #[serde(rename = "TxHash", default)]
    tx_hash: String,
    #[serde(rename = "State", default)]
    state: u8,
    #[serde(rename = "Notify", default)]
    notify: Vec<RpcNotify>,
}

#[derive(Debug, Deserialize)]
struct RpcNotify {
    #[serde(rename = "ContractAddress")]
    contract_address: String,
    #[serde(rename = "States")]
    states: Value,
}

#[derive(Debug, Deserialize)]
struct RpcProof {
    #[serde(rename = "AuditPath")]
    audit_path: String,
}

/// Plain JSON-RPC access to one chain node. Submissions are signed by the
/// node's wallet service for the account address passed along.
pub struct JsonRpcClient {
    config: ChainConfig,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(config: ChainConfig) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Network(e.to_string()))?;
        Ok(Self {
            config,
            http,
            next_id: AtomicU64::new(1),
        })
    }

    async fn retry_with_backoff<F, Fut, T>(&self, operation: F) -> Result<T, Error>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, Error>>,
    {
        let mut retries = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e @ (Error::Network(_) | Error::Timeout(_))) if retries + 1 < MAX_RETRIES => {
                    retries += 1;
                    debug!("[{}] rpc attempt {} failed: {}", self.config.name, retries, e);
                    sleep(Duration::from_millis(RETRY_DELAY_MS * 2u64.pow(retries))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// A single round trip, no retry.
    async fn request<T: DeserializeOwned>(&self, method: &str, params: &Value) -> Result<T, Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let response = self
            .http
            .post(&self.config.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
                "id": id
            }))
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", method, e)))?;

        if !response.status().is_success() {
            return Err(Error::Network(format!("{}: http status {}", method, response.status())));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("{}: invalid response: {}", method, e)))?;

        if let Some(err) = body.error {
            return Err(self.classify(method, err));
        }

        serde_json::from_value(body.result)
            .map_err(|e| Error::Decode(format!("{}: unexpected result: {}", method, e)))
    }

    /// Read queries, retried on connection-level failures.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, Error> {
        let params = &params;
        self.retry_with_backoff(|| self.request(method, params)).await
    }

    fn classify(&self, method: &str, err: RpcError) -> Error {
        if method != SUBMIT_METHOD {
            return Error::Rpc(format!("{}: code {}: {}", method, err.code, err.message));
        }
        let transient = self
            .config
            .transient_errors
            .iter()
            .any(|marker| err.message.contains(marker.as_str()));
        if transient {
            Error::ResourceExhausted(err.message)
        } else {
            Error::Chain(format!("{}: code {}: {}", method, err.code, err.message))
        }
    }

    fn decode_notify(&self, tx_hash: &str, notify: &RpcNotify) -> Option<ChainEvent> {
        let states = notify.states.as_array()?;
        let name = states.first()?.as_str()?;

        if self.config.epoch_event.as_deref() == Some(name) {
            return Some(ChainEvent::HeaderEpochChange);
        }
        if name != self.config.request_event || notify.contract_address != self.config.contracts.cross_chain {
            return Some(ChainEvent::Other { name: name.to_string() });
        }

        let to_chain = states.get(STATE_TO_CHAIN).and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse::<ChainId>().ok(),
            _ => None,
        });
        let request_id = states
            .get(STATE_REQUEST_ID)
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s).ok());
        let key = states.get(STATE_KEY).and_then(Value::as_str);
        let tx = hex::decode(tx_hash).ok();

        match (to_chain, request_id, key, tx) {
            (Some(to_chain), Some(request_id), Some(key), Some(tx_hash)) => Some(ChainEvent::CrossChainRequest {
                tx_hash,
                to_chain,
                request_id,
                key: key.to_string(),
            }),
            _ => {
                error!(
                    "[{}] dropping malformed {} notify in tx {}: {}",
                    self.config.name, name, tx_hash, notify.states
                );
                None
            }
        }
    }
}

fn decode_hex(what: &str, s: &str) -> Result<Vec<u8>, Error> {
    hex::decode(s).map_err(|e| Error::Decode(format!("{}: {}", what, e)))
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    fn chain_id(&self) -> ChainId {
        self.config.id
    }

    async fn current_height(&self) -> Result<u32, Error> {
        let count: u32 = self.call("getblockcount", json!([])).await?;
        Ok(count.saturating_sub(1))
    }

    async fn block_by_height(&self, height: u32) -> Result<Block, Error> {
        let block: RpcBlock = self.call("getblock", json!([height, 1])).await?;
        let epoch_change = if block.header.consensus_payload.is_empty() {
            false
        } else {
            let raw = decode_hex("consensus payload", &block.header.consensus_payload)?;
            let payload: ConsensusPayload = serde_json::from_slice(&raw)
                .map_err(|e| Error::Decode(format!("consensus payload at {}: {}", height, e)))?;
            payload.new_chain_config.map_or(false, |c| !c.is_null())
        };
        Ok(Block {
            height: block.header.height,
            header: decode_hex("raw header", &block.raw_header)?,
            epoch_change,
        })
    }

    async fn events_by_block(&self, height: u32) -> Result<Vec<ChainEvent>, Error> {
        let events: Option<Vec<RpcContractEvent>> = self.call("getsmartcodeevent", json!([height])).await?;
        Ok(events
            .unwrap_or_default()
            .iter()
            .flat_map(|event| {
                event
                    .notify
                    .iter()
                    .filter_map(move |notify| self.decode_notify(&event.tx_hash, notify))
            })
            .collect())
    }

    async fn read_storage(&self, contract: &str, key: &[u8]) -> Result<Vec<u8>, Error> {
        let value: Option<String> = self.call("getstorage", json!([contract, hex::encode(key)])).await?;
        match value {
            Some(v) => decode_hex("storage value", &v),
            None => Ok(Vec::new()),
        }
    }

    async fn cross_states_proof(&self, height: u32, key: &[u8]) -> Result<Vec<u8>, Error> {
        let proof: RpcProof = self
            .call("getcrossstatesproof", json!([height, hex::encode(key)]))
            .await?;
        decode_hex("audit path", &proof.audit_path)
    }

    async fn submit(&self, call: &RelayCall, account: &Account) -> Result<TxHash, Error> {
        let call = serde_json::to_value(call).map_err(|e| Error::Serialization(e.to_string()))?;
        // a lost response must not turn into a second transaction
        let tx_hash: String = self.request(SUBMIT_METHOD, &json!([call, account])).await?;
        decode_hex("tx hash", &tx_hash)
    }

    async fn wait_for_confirmation(&self, timeout: Duration, min_confirmations: u32) -> Result<(), Error> {
        let deadline = Instant::now() + timeout;
        let start = self.current_height().await?;
        loop {
            sleep(CONFIRMATION_POLL).await;
            match self.current_height().await {
                Ok(height) if height >= start + min_confirmations => return Ok(()),
                Ok(_) => {}
                Err(e) => warn!("[{}] wait for confirmation: {}", self.config.name, e),
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "{} produced fewer than {} blocks in {:?}",
                    self.config.name, min_confirmations, timeout
                )));
            }
        }
    }

    async fn tx_outcome(&self, tx_hash: &[u8]) -> Result<Option<TxOutcome>, Error> {
        let event: Option<RpcContractEvent> = self
            .call("getsmartcodeevent", json!([hex::encode(tx_hash)]))
            .await?;
        Ok(event.map(|e| if e.state == 1 { TxOutcome::Success } else { TxOutcome::Failed }))
    }
}
