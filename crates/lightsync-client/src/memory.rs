//! In-process chain client for tests and local development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use alloy_primitives::{keccak256, B256};
use async_trait::async_trait;
use lightsync_core::{Block, BlockHeader, BlockRef, ChainEvent, SliceId, SliceRequest, StateSlice};
use tokio::sync::broadcast;
use tracing::debug;

use crate::{ChainClient, ClientError, EVENT_CHANNEL_CAPACITY};

const SYNTHETIC_GAS_LIMIT: u64 = 30_000_000;
const SYNTHETIC_GENESIS_TIMESTAMP: u64 = 1_438_269_973;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    GetLatestBlock,
    GetBlockByNumber,
    GetSlice,
}

#[derive(Default)]
struct ChainState {
    blocks: BTreeMap<u64, Arc<Block>>,
    head: Option<u64>,
    slices: HashMap<SliceId, Arc<StateSlice>>,
    started: bool,
}

#[derive(Default)]
struct CallLog {
    counts: HashMap<Operation, usize>,
    block_requests: Vec<(BlockRef, bool)>,
    slice_requests: Vec<SliceRequest>,
}

/// Chain held entirely in memory. Heads and reorgs are driven by the caller.
pub struct MemoryChainClient {
    state: Mutex<ChainState>,
    failures: Mutex<HashMap<Operation, ClientError>>,
    calls: Mutex<CallLog>,
    events: broadcast::Sender<ChainEvent>,
}

impl Default for MemoryChainClient {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryChainClient {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(ChainState::default()),
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(CallLog::default()),
            events,
        }
    }

    /// Store a block without touching the head.
    pub fn insert_block(&self, block: Block) -> Arc<Block> {
        let block = Arc::new(block);
        lock(&self.state)
            .blocks
            .insert(block.number(), Arc::clone(&block));
        block
    }

    /// Store `block`, make it the head and emit `latest`.
    pub fn set_head(&self, block: Block) -> Arc<Block> {
        let block = self.insert_block(block);
        lock(&self.state).head = Some(block.number());
        self.emit(ChainEvent::Latest(Arc::clone(&block)));
        block
    }

    /// Replace the current head with `block`, emitting `sync` with the
    /// replaced head as the old block, then `latest`.
    pub fn reorg(&self, block: Block) -> Arc<Block> {
        let block = Arc::new(block);
        let old = {
            let mut state = lock(&self.state);
            let old = state.head.and_then(|n| state.blocks.get(&n).cloned());
            // Blocks above the new tip are no longer canonical.
            let number = block.number();
            state.blocks.retain(|n, _| *n < number);
            state.blocks.insert(number, Arc::clone(&block));
            state.head = Some(number);
            old
        };
        self.emit(ChainEvent::Sync {
            new_block: Some(Arc::clone(&block)),
            old_block: old,
        });
        self.emit(ChainEvent::Latest(Arc::clone(&block)));
        block
    }

    pub fn insert_slice(&self, slice: StateSlice) {
        lock(&self.state)
            .slices
            .insert(slice.id.clone(), Arc::new(slice));
    }

    /// Push a raw event to subscribers without changing the stored chain.
    pub fn emit(&self, event: ChainEvent) {
        // No receivers is fine; events are fire-and-forget.
        let _ = self.events.send(event);
    }

    /// Make every subsequent call of `operation` fail with `error`.
    pub fn fail(&self, operation: Operation, error: ClientError) {
        lock(&self.failures).insert(operation, error);
    }

    pub fn clear_failure(&self, operation: Operation) {
        lock(&self.failures).remove(&operation);
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        lock(&self.calls)
            .counts
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Arguments of every `get_block_by_number` call, in call order.
    pub fn block_requests(&self) -> Vec<(BlockRef, bool)> {
        lock(&self.calls).block_requests.clone()
    }

    pub fn slice_requests(&self) -> Vec<SliceRequest> {
        lock(&self.calls).slice_requests.clone()
    }

    pub fn is_started(&self) -> bool {
        lock(&self.state).started
    }

    fn record(&self, operation: Operation) -> Result<(), ClientError> {
        *lock(&self.calls).counts.entry(operation).or_default() += 1;
        match lock(&self.failures).get(&operation) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn head_block(state: &ChainState) -> Option<Arc<Block>> {
        state.head.and_then(|n| state.blocks.get(&n).cloned())
    }
}

#[async_trait]
impl ChainClient for MemoryChainClient {
    async fn start(&self) -> Result<(), ClientError> {
        self.record(Operation::Start)?;
        lock(&self.state).started = true;
        debug!("memory chain client started");
        Ok(())
    }

    async fn get_latest_block(&self) -> Result<Option<Arc<Block>>, ClientError> {
        self.record(Operation::GetLatestBlock)?;
        Ok(Self::head_block(&lock(&self.state)))
    }

    async fn get_block_by_number(
        &self,
        block_ref: BlockRef,
        full_tx: bool,
    ) -> Result<Option<Arc<Block>>, ClientError> {
        lock(&self.calls).block_requests.push((block_ref, full_tx));
        self.record(Operation::GetBlockByNumber)?;
        let state = lock(&self.state);
        let block = match block_ref {
            BlockRef::Latest | BlockRef::Pending => Self::head_block(&state),
            BlockRef::Earliest => state.blocks.get(&0).cloned(),
            BlockRef::Number(n) => state.blocks.get(&n).cloned(),
        };
        Ok(block)
    }

    async fn get_slice(
        &self,
        request: &SliceRequest,
    ) -> Result<Option<Arc<StateSlice>>, ClientError> {
        lock(&self.calls).slice_requests.push(request.clone());
        self.record(Operation::GetSlice)?;
        Ok(lock(&self.state).slices.get(&request.id).cloned())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }
}

/// Deterministic block at `number`, chained to `synthetic_block(number - 1)`.
pub fn synthetic_block(number: u64) -> Block {
    let hash_of = |n: u64| keccak256(n.to_be_bytes());
    let parent_hash = if number == 0 {
        B256::ZERO
    } else {
        hash_of(number - 1)
    };
    Block {
        hash: Some(hash_of(number)),
        header: BlockHeader {
            parent_hash,
            state_root: keccak256([b"state".as_slice(), &number.to_be_bytes()].concat()),
            number,
            gas_limit: SYNTHETIC_GAS_LIMIT,
            timestamp: SYNTHETIC_GENESIS_TIMESTAMP + number * 12,
            ..Default::default()
        },
        transactions: Vec::new(),
        transactions_root: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lightsync_core::SliceId;

    #[test]
    fn synthetic_blocks_chain_by_parent_hash() {
        let parent = synthetic_block(99);
        let child = synthetic_block(100);
        assert_eq!(Some(child.header.parent_hash), parent.hash);
        assert_ne!(child.header.state_root, parent.header.state_root);
    }

    #[tokio::test]
    async fn set_head_emits_latest_and_serves_block() {
        let client = MemoryChainClient::new();
        let mut events = client.subscribe();

        client.set_head(synthetic_block(0x64));

        match events.recv().await.unwrap() {
            ChainEvent::Latest(block) => assert_eq!(block.number(), 0x64),
            other => panic!("unexpected event {other:?}"),
        }
        let latest = client.get_latest_block().await.unwrap().unwrap();
        assert_eq!(latest.number(), 0x64);
        let by_number = client
            .get_block_by_number(BlockRef::Number(0x64), false)
            .await
            .unwrap();
        assert_eq!(by_number.map(|b| b.number()), Some(0x64));
    }

    #[tokio::test]
    async fn reorg_emits_sync_before_latest() {
        let client = MemoryChainClient::new();
        client.set_head(synthetic_block(10));
        let mut events = client.subscribe();

        let mut replacement = synthetic_block(10);
        replacement.hash = Some(B256::repeat_byte(0xee));
        client.reorg(replacement);

        match events.recv().await.unwrap() {
            ChainEvent::Sync {
                new_block,
                old_block,
            } => {
                assert_eq!(new_block.unwrap().hash, Some(B256::repeat_byte(0xee)));
                assert_eq!(old_block.unwrap().hash, synthetic_block(10).hash);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events.recv().await.unwrap(), ChainEvent::Latest(_)));
    }

    #[tokio::test]
    async fn reorg_to_lower_height_drops_orphaned_blocks() {
        let client = MemoryChainClient::new();
        for n in 0..=5 {
            client.set_head(synthetic_block(n));
        }
        client.reorg(synthetic_block(3));

        let orphan = client
            .get_block_by_number(BlockRef::Number(5), false)
            .await
            .unwrap();
        assert!(orphan.is_none());
        let head = client.get_latest_block().await.unwrap().unwrap();
        assert_eq!(head.number(), 3);
    }

    #[tokio::test]
    async fn injected_failure_is_returned_and_counted() {
        let client = MemoryChainClient::new();
        client.fail(
            Operation::GetLatestBlock,
            ClientError::Transport("peer gone".into()),
        );

        let err = client.get_latest_block().await.unwrap_err();
        assert_eq!(err, ClientError::Transport("peer gone".into()));
        assert_eq!(client.call_count(Operation::GetLatestBlock), 1);

        client.clear_failure(Operation::GetLatestBlock);
        assert!(client.get_latest_block().await.unwrap().is_none());
        assert_eq!(client.call_count(Operation::GetLatestBlock), 2);
    }

    #[tokio::test]
    async fn records_block_request_arguments() {
        let client = MemoryChainClient::new();
        let _ = client
            .get_block_by_number(BlockRef::Number(42), true)
            .await
            .unwrap();
        assert_eq!(client.block_requests(), vec![(BlockRef::Number(42), true)]);
    }

    #[tokio::test]
    async fn slices_are_keyed_by_full_id() {
        let client = MemoryChainClient::new();
        let id = SliceId {
            path: "8e99".into(),
            depth: 10,
            state_root: B256::repeat_byte(0x03),
        };
        client.insert_slice(StateSlice::new(id.clone()));

        let hit = client
            .get_slice(&SliceRequest {
                id: id.clone(),
                block_number: 1,
            })
            .await
            .unwrap();
        assert!(hit.is_some());

        let miss = client
            .get_slice(&SliceRequest {
                id: SliceId { depth: 4, ..id },
                block_number: 1,
            })
            .await
            .unwrap();
        assert!(miss.is_none());
        assert_eq!(client.slice_requests().len(), 2);
    }

    #[tokio::test]
    async fn start_marks_client_started() {
        let client = MemoryChainClient::new();
        assert!(!client.is_started());
        client.start().await.unwrap();
        assert!(client.is_started());
    }
}
