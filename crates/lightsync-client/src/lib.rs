//! Chain client boundary consumed by the RPC adapter.
//!
//! The adapter only needs a handful of operations from the light client that
//! owns peer connectivity and state-slice sync; [`ChainClient`] is that
//! contract. [`memory::MemoryChainClient`] is an in-process implementation
//! used by tests and local development, [`rpc::RpcChainClient`] follows an
//! upstream JSON-RPC node.

pub mod config;
mod error;
pub mod identity;
pub mod memory;
pub mod rpc;

use std::sync::Arc;

use async_trait::async_trait;
use lightsync_core::{Block, BlockRef, ChainEvent, SliceRequest, StateSlice};
use tokio::sync::broadcast;

pub use config::{ClientConfig, ConfigError, NodeEnv};
pub use error::ClientError;
pub use identity::{PeerIdentity, PeerInfo};

/// Capacity of the event channel every client exposes.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Begin syncing. Events may be emitted from this point on.
    async fn start(&self) -> Result<(), ClientError>;

    async fn get_latest_block(&self) -> Result<Option<Arc<Block>>, ClientError>;

    async fn get_block_by_number(
        &self,
        block_ref: BlockRef,
        full_tx: bool,
    ) -> Result<Option<Arc<Block>>, ClientError>;

    async fn get_slice(&self, request: &SliceRequest)
        -> Result<Option<Arc<StateSlice>>, ClientError>;

    /// New receiver for `latest`/`sync` notifications, delivered in emission order.
    fn subscribe(&self) -> broadcast::Receiver<ChainEvent>;
}
