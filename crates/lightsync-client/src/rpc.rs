//! Chain client that follows an upstream Ethereum JSON-RPC node.
//!
//! Heads are discovered by polling `eth_blockNumber`. Reorgs are detected the
//! same way the block cache poller does it: the head moving backwards, or the
//! block at the last reported height changing hash. State slices are assembled
//! from the watched accounts that fall under the requested slice path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U256};
use async_trait::async_trait;
use rand::Rng;
use lightsync_core::{
    parse_quantity, slice_path_for, to_quantity, Block, BlockHeader, BlockRef, ChainEvent,
    SliceAccount, SliceRequest, StateSlice,
};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{ChainClient, ClientConfig, ClientError, PeerInfo, EVENT_CHANNEL_CAPACITY};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 2;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(200);

/// Raw JSON-RPC access to the upstream node.
#[async_trait]
pub trait JsonRpcApi: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError>;
}

pub struct HttpJsonRpc {
    url: String,
    http_client: reqwest::Client,
}

impl HttpJsonRpc {
    pub fn new(url: String) -> Result<Self, ClientError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Other(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { url, http_client })
    }

    async fn request_once(&self, method: &str, params: &Value) -> Result<Value, ClientError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http_client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| request_error(method, &e))?;

        let status = response.status();
        if !status.is_success() {
            if let Ok(body) = response.json::<Value>().await {
                if let Some(err) = extract_json_rpc_error(&body) {
                    return Err(err);
                }
            }
            return Err(ClientError::Transport(format!(
                "HTTP status {} for {}",
                status, method
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|_| ClientError::InvalidResponse(format!("invalid JSON for {}", method)))?;
        if let Some(err) = extract_json_rpc_error(&body) {
            return Err(err);
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl JsonRpcApi for HttpJsonRpc {
    async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
        for attempt in 0..=MAX_RETRIES {
            match self.request_once(method, &params).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < MAX_RETRIES && e.is_retryable() => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Upstream request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(ClientError::Transport(format!(
            "{} failed after {} retries",
            method, MAX_RETRIES
        )))
    }
}

fn request_error(method: &str, error: &reqwest::Error) -> ClientError {
    if error.is_timeout() {
        return ClientError::Transport(format!("upstream timeout for {}", method));
    }
    if error.is_connect() {
        return ClientError::Transport(format!("upstream connection failed for {}", method));
    }
    ClientError::Other(format!("upstream request failed for {}: {}", method, error))
}

fn extract_json_rpc_error(body: &Value) -> Option<ClientError> {
    let error = body.get("error")?.as_object()?;
    let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32000);
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("upstream error")
        .to_owned();
    Some(ClientError::Upstream { code, message })
}

fn de_quantity<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse_quantity(&s).ok_or_else(|| serde::de::Error::custom(format!("invalid quantity '{}'", s)))
}

/// Block object as returned by `eth_getBlockByNumber`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBlock {
    hash: Option<B256>,
    parent_hash: B256,
    sha3_uncles: B256,
    miner: Address,
    state_root: B256,
    transactions_root: B256,
    #[serde(default)]
    receipts_root: Option<B256>,
    logs_bloom: Bloom,
    #[serde(default)]
    difficulty: U256,
    #[serde(deserialize_with = "de_quantity")]
    number: u64,
    #[serde(deserialize_with = "de_quantity")]
    gas_limit: u64,
    #[serde(deserialize_with = "de_quantity")]
    gas_used: u64,
    #[serde(deserialize_with = "de_quantity")]
    timestamp: u64,
    extra_data: Bytes,
    #[serde(default)]
    mix_hash: B256,
    #[serde(default)]
    nonce: B64,
    #[serde(default)]
    transactions: Vec<Value>,
}

impl From<RawBlock> for Block {
    fn from(raw: RawBlock) -> Self {
        Block {
            hash: raw.hash,
            header: BlockHeader {
                parent_hash: raw.parent_hash,
                uncles_hash: raw.sha3_uncles,
                coinbase: raw.miner,
                state_root: raw.state_root,
                transactions_root: raw.transactions_root,
                receipts_root: raw.receipts_root,
                logs_bloom: raw.logs_bloom,
                difficulty: raw.difficulty,
                number: raw.number,
                gas_limit: raw.gas_limit,
                gas_used: raw.gas_used,
                timestamp: raw.timestamp,
                extra_data: raw.extra_data,
                mix_hash: raw.mix_hash,
                nonce: raw.nonce,
            },
            transactions: raw.transactions,
            transactions_root: None,
        }
    }
}

/// Parse an upstream block object; `null` means the block is unknown.
pub fn parse_block(value: Value) -> Result<Option<Block>, ClientError> {
    if value.is_null() {
        return Ok(None);
    }
    let raw: RawBlock = serde_json::from_value(value)
        .map_err(|e| ClientError::InvalidResponse(format!("malformed block: {}", e)))?;
    Ok(Some(raw.into()))
}

fn expect_str<'a>(method: &str, value: &'a Value) -> Result<&'a str, ClientError> {
    value
        .as_str()
        .ok_or_else(|| ClientError::InvalidResponse(format!("{}: expected hex string", method)))
}

async fn fetch_block<A: JsonRpcApi + ?Sized>(
    api: &A,
    block_ref: BlockRef,
    full_tx: bool,
) -> Result<Option<Block>, ClientError> {
    let result = api
        .request(
            "eth_getBlockByNumber",
            json!([block_ref.to_string(), full_tx]),
        )
        .await?;
    parse_block(result)
}

async fn fetch_head_number<A: JsonRpcApi + ?Sized>(api: &A) -> Result<u64, ClientError> {
    let result = api.request("eth_blockNumber", json!([])).await?;
    let s = expect_str("eth_blockNumber", &result)?;
    parse_quantity(s)
        .ok_or_else(|| ClientError::InvalidResponse(format!("invalid block number: {}", s)))
}

/// Hash comparison, falling back to parent hash and state root for
/// upstreams that omit `hash`.
fn same_block(current: &Block, previous: &Block) -> bool {
    match (current.hash, previous.hash) {
        (None, None) => {
            current.header.parent_hash == previous.header.parent_hash
                && current.header.state_root == previous.header.state_root
        }
        (current, previous) => current == previous,
    }
}

/// Tracks the last reported head and turns upstream changes into events.
pub struct HeadPoller<A: ?Sized> {
    api: Arc<A>,
    last: Option<Arc<Block>>,
}

impl<A: JsonRpcApi + ?Sized> HeadPoller<A> {
    pub fn new(api: Arc<A>) -> Self {
        Self { api, last: None }
    }

    pub fn last(&self) -> Option<&Arc<Block>> {
        self.last.as_ref()
    }

    /// One poll round. Returns the events to emit, `sync` always before `latest`.
    pub async fn poll(&mut self) -> Result<Vec<ChainEvent>, ClientError> {
        let head = fetch_head_number(self.api.as_ref()).await?;

        if let Some(prev) = self.last.clone() {
            if head < prev.number() {
                warn!(
                    cached = prev.number(),
                    chain_head = head,
                    "Chain reorg detected (head moved backwards)"
                );
            } else {
                let current = fetch_block(self.api.as_ref(), BlockRef::Number(prev.number()), false)
                    .await?;
                let replaced = match current {
                    Some(block) => !same_block(&block, &prev),
                    None => true,
                };
                if replaced {
                    warn!(block = prev.number(), "Chain reorg detected (block hash mismatch)");
                } else if head == prev.number() {
                    return Ok(Vec::new());
                }
            }
        }

        let Some(block) = fetch_block(self.api.as_ref(), BlockRef::Number(head), false).await?
        else {
            // Upstream reported a head it cannot serve yet; retry next round.
            debug!(head, "Head block not yet available upstream");
            return Ok(Vec::new());
        };
        let block = Arc::new(block);
        let old = self.last.replace(Arc::clone(&block));
        Ok(vec![
            ChainEvent::Sync {
                new_block: Some(Arc::clone(&block)),
                old_block: old,
            },
            ChainEvent::Latest(block),
        ])
    }
}

pub struct RpcChainClient<A: ?Sized = HttpJsonRpc> {
    api: Arc<A>,
    watched: Vec<Address>,
    poll_interval: Duration,
    retry_interval: Duration,
    events: broadcast::Sender<ChainEvent>,
    started: AtomicBool,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl RpcChainClient<HttpJsonRpc> {
    pub fn new(config: &ClientConfig, peer: &PeerInfo) -> Result<Self, ClientError> {
        let api = HttpJsonRpc::new(config.rpc_url.clone())?;
        info!(
            peer_id = %peer.peer_id,
            listen_addrs = ?peer.listen_addrs,
            watched = config.eth_addrs.len(),
            "Chain client configured"
        );
        Ok(Self::with_api(Arc::new(api), config))
    }
}

impl<A: JsonRpcApi + ?Sized + 'static> RpcChainClient<A> {
    pub fn with_api(api: Arc<A>, config: &ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            api,
            watched: config.watched_addresses(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            retry_interval: Duration::from_millis(config.dial_interval_ms),
            events,
            started: AtomicBool::new(false),
            poller: Mutex::new(None),
        }
    }

    fn ensure_started(&self) -> Result<(), ClientError> {
        if self.started.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ClientError::NotStarted)
        }
    }

    #[cfg(test)]
    fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn fetch_account(&self, address: Address, block: &str) -> Result<SliceAccount, ClientError> {
        let addr = address.to_string();
        let balance = self
            .api
            .request("eth_getBalance", json!([addr, block]))
            .await?;
        let balance = expect_str("eth_getBalance", &balance)?;
        let balance = U256::from_str_radix(balance.strip_prefix("0x").unwrap_or(balance), 16)
            .map_err(|_| ClientError::InvalidResponse(format!("invalid balance: {}", balance)))?;

        let nonce = self
            .api
            .request("eth_getTransactionCount", json!([addr, block]))
            .await?;
        let nonce = expect_str("eth_getTransactionCount", &nonce)?;
        let nonce = parse_quantity(nonce)
            .ok_or_else(|| ClientError::InvalidResponse(format!("invalid nonce: {}", nonce)))?;

        let code = self.api.request("eth_getCode", json!([addr, block])).await?;
        let code = expect_str("eth_getCode", &code)?;
        let code = code
            .parse::<Bytes>()
            .map_err(|_| ClientError::InvalidResponse(format!("invalid code for {}", addr)))?;

        Ok(SliceAccount {
            balance,
            nonce,
            code,
            storage: Default::default(),
        })
    }
}

/// `delay` plus up to 25% random jitter.
fn with_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() as u64) / 4;
    if max_jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter_ms))
}

async fn run_poller<A: JsonRpcApi + ?Sized>(
    mut poller: HeadPoller<A>,
    events: broadcast::Sender<ChainEvent>,
    poll_interval: Duration,
    retry_interval: Duration,
) {
    info!("Head poller started");
    let mut consecutive_failures = 0u32;
    loop {
        let delay = match poller.poll().await {
            Ok(emitted) => {
                if consecutive_failures > 0 {
                    info!(consecutive_failures, "Head poller recovered");
                }
                consecutive_failures = 0;
                for event in emitted {
                    if let ChainEvent::Latest(block) = &event {
                        debug!(head = %block.number_hex(), "New head");
                    }
                    let _ = events.send(event);
                }
                poll_interval
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures <= 3 {
                    warn!(consecutive_failures, error = %e, "Head poll failed");
                } else if consecutive_failures % 10 == 0 {
                    error!(consecutive_failures, error = %e, "Head poll repeatedly failing");
                }
                with_jitter(retry_interval)
            }
        };
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl<A: JsonRpcApi + ?Sized + 'static> ChainClient for RpcChainClient<A> {
    async fn start(&self) -> Result<(), ClientError> {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Chain client already started");
            return Ok(());
        }
        let handle = tokio::spawn(run_poller(
            HeadPoller::new(Arc::clone(&self.api)),
            self.events.clone(),
            self.poll_interval,
            self.retry_interval,
        ));
        *self.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    async fn get_latest_block(&self) -> Result<Option<Arc<Block>>, ClientError> {
        self.ensure_started()?;
        Ok(fetch_block(self.api.as_ref(), BlockRef::Latest, false)
            .await?
            .map(Arc::new))
    }

    async fn get_block_by_number(
        &self,
        block_ref: BlockRef,
        full_tx: bool,
    ) -> Result<Option<Arc<Block>>, ClientError> {
        self.ensure_started()?;
        Ok(fetch_block(self.api.as_ref(), block_ref, full_tx)
            .await?
            .map(Arc::new))
    }

    async fn get_slice(
        &self,
        request: &SliceRequest,
    ) -> Result<Option<Arc<StateSlice>>, ClientError> {
        self.ensure_started()?;
        let members: Vec<Address> = self
            .watched
            .iter()
            .filter(|addr| slice_path_for(addr).starts_with(&request.id.path))
            .copied()
            .collect();
        if members.is_empty() {
            return Ok(None);
        }

        let block_ref = BlockRef::Number(request.block_number);
        let Some(block) = fetch_block(self.api.as_ref(), block_ref, false).await? else {
            return Ok(None);
        };
        if block.header.state_root != request.id.state_root {
            debug!(
                slice = %request.id,
                block = request.block_number,
                "State root no longer canonical for block"
            );
            return Ok(None);
        }

        let block_hex = to_quantity(request.block_number);
        let mut slice = StateSlice::new(request.id.clone());
        for address in members {
            let account = self.fetch_account(address, &block_hex).await?;
            slice = slice.with_account(address, account);
        }
        Ok(Some(Arc::new(slice)))
    }

    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }
}

impl<A: ?Sized> Drop for RpcChainClient<A> {
    fn drop(&mut self) {
        let poller = self.poller.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = poller.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightsync_core::SliceId;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct ScriptedApi {
        responses: Mutex<HashMap<String, Value>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedApi {
        fn key(method: &str, params: &Value) -> String {
            format!("{} {}", method, params)
        }

        fn script(&self, method: &str, params: Value, result: Value) {
            self.responses
                .lock()
                .unwrap()
                .insert(Self::key(method, &params), result);
        }

        fn set_head(&self, number: u64) {
            self.script("eth_blockNumber", json!([]), json!(to_quantity(number)));
        }

        fn set_block(&self, number: u64, hash: B256, state_root: B256) {
            self.script(
                "eth_getBlockByNumber",
                json!([to_quantity(number), false]),
                block_json(number, hash, state_root),
            );
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl JsonRpcApi for ScriptedApi {
        async fn request(&self, method: &str, params: Value) -> Result<Value, ClientError> {
            let key = Self::key(method, &params);
            self.calls.lock().unwrap().push(key.clone());
            self.responses
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| ClientError::Other(format!("unscripted call: {}", key)))
        }
    }

    fn block_json(number: u64, hash: B256, state_root: B256) -> Value {
        json!({
            "hash": hash,
            "parentHash": B256::ZERO,
            "sha3Uncles": B256::repeat_byte(0x1d),
            "miner": Address::repeat_byte(0x52),
            "stateRoot": state_root,
            "transactionsRoot": B256::repeat_byte(0x04),
            "receiptsRoot": B256::repeat_byte(0x05),
            "logsBloom": Bloom::ZERO,
            "difficulty": "0x0",
            "number": to_quantity(number),
            "gasLimit": "0x1c9c380",
            "gasUsed": "0x5208",
            "timestamp": "0x6553f100",
            "extraData": "0x",
            "mixHash": B256::ZERO,
            "nonce": "0x0000000000000000",
            "transactions": []
        })
    }

    fn hash(n: u8) -> B256 {
        B256::repeat_byte(n)
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_the_delay() {
        let base = Duration::from_millis(1_000);
        for _ in 0..32 {
            let delay = with_jitter(base);
            assert!(delay >= base && delay <= Duration::from_millis(1_250));
        }
        assert_eq!(with_jitter(Duration::from_millis(2)), Duration::from_millis(2));
    }

    #[test]
    fn parse_block_maps_upstream_fields() {
        let block = parse_block(block_json(0x64, hash(0xaa), hash(0x03)))
            .unwrap()
            .unwrap();
        assert_eq!(block.number(), 0x64);
        assert_eq!(block.hash, Some(hash(0xaa)));
        assert_eq!(block.header.gas_limit, 30_000_000);
        assert_eq!(block.header.gas_used, 21_000);
        assert_eq!(block.header.receipts_root, Some(hash(0x05)));
        assert_eq!(block.header.coinbase, Address::repeat_byte(0x52));
    }

    #[test]
    fn parse_block_null_is_none_and_garbage_is_invalid() {
        assert!(parse_block(Value::Null).unwrap().is_none());
        let err = parse_block(json!({"number": "zz"})).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn first_poll_emits_sync_with_unknown_old_then_latest() {
        let api = Arc::new(ScriptedApi::default());
        api.set_head(0x64);
        api.set_block(0x64, hash(0xaa), hash(0x03));
        let mut poller = HeadPoller::new(Arc::clone(&api));

        let events = poller.poll().await.unwrap();
        assert_eq!(events.len(), 2);
        match &events[0] {
            ChainEvent::Sync {
                new_block,
                old_block,
            } => {
                assert_eq!(new_block.as_ref().map(|b| b.number()), Some(0x64));
                assert!(old_block.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(&events[1], ChainEvent::Latest(b) if b.number() == 0x64));
    }

    #[tokio::test]
    async fn unchanged_head_emits_nothing() {
        let api = Arc::new(ScriptedApi::default());
        api.set_head(0x64);
        api.set_block(0x64, hash(0xaa), hash(0x03));
        let mut poller = HeadPoller::new(Arc::clone(&api));
        poller.poll().await.unwrap();

        assert!(poller.poll().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn advancing_head_reports_previous_as_old() {
        let api = Arc::new(ScriptedApi::default());
        api.set_head(0x64);
        api.set_block(0x64, hash(0xaa), hash(0x03));
        let mut poller = HeadPoller::new(Arc::clone(&api));
        poller.poll().await.unwrap();

        api.set_head(0x65);
        api.set_block(0x65, hash(0xbb), hash(0x04));
        let events = poller.poll().await.unwrap();
        match &events[0] {
            ChainEvent::Sync {
                new_block,
                old_block,
            } => {
                assert_eq!(new_block.as_ref().map(|b| b.number()), Some(0x65));
                assert_eq!(old_block.as_ref().map(|b| b.number()), Some(0x64));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(poller.last().map(|b| b.number()), Some(0x65));
    }

    #[tokio::test]
    async fn same_height_hash_change_is_a_reorg() {
        let api = Arc::new(ScriptedApi::default());
        api.set_head(0x64);
        api.set_block(0x64, hash(0xaa), hash(0x03));
        let mut poller = HeadPoller::new(Arc::clone(&api));
        poller.poll().await.unwrap();

        api.set_block(0x64, hash(0xcc), hash(0x07));
        let events = poller.poll().await.unwrap();
        match &events[0] {
            ChainEvent::Sync {
                new_block,
                old_block,
            } => {
                assert_eq!(new_block.as_ref().and_then(|b| b.hash), Some(hash(0xcc)));
                assert_eq!(old_block.as_ref().and_then(|b| b.hash), Some(hash(0xaa)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn blocks_without_hash_compare_by_parent_and_state_root() {
        let api = Arc::new(ScriptedApi::default());
        api.set_head(0x64);
        let mut block = block_json(0x64, hash(0xaa), hash(0x03));
        block.as_object_mut().unwrap().remove("hash");
        api.script("eth_getBlockByNumber", json!(["0x64", false]), block.clone());
        let mut poller = HeadPoller::new(Arc::clone(&api));
        assert_eq!(poller.poll().await.unwrap().len(), 2);
        assert_eq!(poller.last().and_then(|b| b.hash), None);

        assert!(poller.poll().await.unwrap().is_empty());
        assert!(poller.poll().await.unwrap().is_empty());

        block["stateRoot"] = json!(hash(0x07));
        api.script("eth_getBlockByNumber", json!(["0x64", false]), block);
        assert_eq!(poller.poll().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn reads_before_start_are_rejected() {
        let api = Arc::new(ScriptedApi::default());
        let client = RpcChainClient::with_api(Arc::clone(&api), &ClientConfig::default());

        assert_eq!(
            client.get_latest_block().await.unwrap_err(),
            ClientError::NotStarted
        );
        assert_eq!(
            client
                .get_block_by_number(BlockRef::Number(1), false)
                .await
                .unwrap_err(),
            ClientError::NotStarted
        );
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn head_moving_backwards_is_a_reorg() {
        let api = Arc::new(ScriptedApi::default());
        api.set_head(0x65);
        api.set_block(0x65, hash(0xbb), hash(0x04));
        let mut poller = HeadPoller::new(Arc::clone(&api));
        poller.poll().await.unwrap();

        api.set_head(0x64);
        api.set_block(0x64, hash(0xdd), hash(0x03));
        let events = poller.poll().await.unwrap();
        assert!(matches!(&events[1], ChainEvent::Latest(b) if b.number() == 0x64));
        match &events[0] {
            ChainEvent::Sync { old_block, .. } => {
                assert_eq!(old_block.as_ref().map(|b| b.number()), Some(0x65));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_block_by_number_forwards_full_tx_flag() {
        let api = Arc::new(ScriptedApi::default());
        api.script(
            "eth_getBlockByNumber",
            json!(["0x2a", true]),
            Value::Null,
        );
        let client = RpcChainClient::with_api(Arc::clone(&api), &ClientConfig::default());
        client.mark_started();

        let block = client
            .get_block_by_number(BlockRef::Number(42), true)
            .await
            .unwrap();
        assert!(block.is_none());
        assert_eq!(api.calls(), vec![r#"eth_getBlockByNumber ["0x2a",true]"#]);
    }

    #[tokio::test]
    async fn get_slice_collects_watched_accounts_under_path() {
        let watched = Address::repeat_byte(0x11);
        let path = slice_path_for(&watched);
        // Membership comes from the watched addresses, not `slice_path`.
        let config = ClientConfig {
            eth_addrs: vec![watched.to_string()],
            slice_path: vec!["0000".into()],
            ..Default::default()
        };
        assert!(!path.starts_with("0000"));
        let api = Arc::new(ScriptedApi::default());
        api.set_block(7, hash(0xaa), hash(0x03));
        let addr = watched.to_string();
        api.script("eth_getBalance", json!([addr, "0x7"]), json!("0xde0b6b3a7640000"));
        api.script("eth_getTransactionCount", json!([addr, "0x7"]), json!("0x3"));
        api.script("eth_getCode", json!([addr, "0x7"]), json!("0x6001"));
        let client = RpcChainClient::with_api(Arc::clone(&api), &config);
        client.mark_started();

        let request = SliceRequest {
            id: SliceId {
                path,
                depth: 10,
                state_root: hash(0x03),
            },
            block_number: 7,
        };
        let slice = client.get_slice(&request).await.unwrap().unwrap();
        let account = slice.account(&watched).unwrap();
        assert_eq!(account.balance, U256::from(1_000_000_000_000_000_000u64));
        assert_eq!(account.nonce, 3);
        assert_eq!(&account.code[..], &[0x60, 0x01]);
    }

    #[tokio::test]
    async fn get_slice_with_stale_state_root_is_none() {
        let watched = Address::repeat_byte(0x11);
        let config = ClientConfig {
            eth_addrs: vec![watched.to_string()],
            ..Default::default()
        };
        let api = Arc::new(ScriptedApi::default());
        api.set_block(7, hash(0xaa), hash(0x03));
        let client = RpcChainClient::with_api(Arc::clone(&api), &config);
        client.mark_started();

        let request = SliceRequest {
            id: SliceId {
                path: slice_path_for(&watched),
                depth: 10,
                state_root: hash(0x99),
            },
            block_number: 7,
        };
        assert!(client.get_slice(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn get_slice_outside_watched_paths_skips_upstream() {
        let api = Arc::new(ScriptedApi::default());
        let config = ClientConfig {
            eth_addrs: vec![],
            ..Default::default()
        };
        let client = RpcChainClient::with_api(Arc::clone(&api), &config);
        client.mark_started();
        let request = SliceRequest {
            id: SliceId {
                path: "ffff".into(),
                depth: 10,
                state_root: hash(0x03),
            },
            block_number: 7,
        };
        assert!(client.get_slice(&request).await.unwrap().is_none());
        assert!(api.calls().is_empty());
    }

    async fn spawn_upstream_server(status_line: &str, body: &str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind listener");
        let addr = listener.local_addr().expect("listener addr");
        let status = status_line.to_owned();
        let response_body = body.to_owned();
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut buf = [0u8; 2048];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                response_body.len(),
                response_body
            );
            let _ = socket.write_all(response.as_bytes()).await;
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn http_api_returns_result_field() {
        let url = spawn_upstream_server(
            "200 OK",
            r#"{"jsonrpc":"2.0","id":1,"result":"0x64","error":null}"#,
        )
        .await;
        let api = HttpJsonRpc::new(url).unwrap();
        let result = api.request("eth_blockNumber", json!([])).await.unwrap();
        assert_eq!(result, json!("0x64"));
    }

    #[tokio::test]
    async fn http_api_surfaces_json_rpc_error() {
        let url = spawn_upstream_server(
            "200 OK",
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32005,"message":"limit exceeded"}}"#,
        )
        .await;
        let api = HttpJsonRpc::new(url).unwrap();
        let err = api.request("eth_blockNumber", json!([])).await.unwrap_err();
        assert_eq!(
            err,
            ClientError::Upstream {
                code: -32005,
                message: "limit exceeded".into()
            }
        );
    }
}
