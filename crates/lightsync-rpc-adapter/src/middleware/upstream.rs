use std::sync::Arc;

use async_trait::async_trait;
use lightsync_client::rpc::JsonRpcApi;
use tracing::debug;

use super::{Middleware, RpcEnvelope, Step};
use crate::error::RpcError;

const SAFE_READ_ONLY_PASSTHROUGH_METHODS: &[&str] = &[
    "eth_chainId",
    "eth_blockNumber",
    "eth_gasPrice",
    "eth_call",
    "eth_estimateGas",
    "eth_feeHistory",
    "eth_maxPriorityFeePerGas",
    "eth_blobBaseFee",
    "eth_syncing",
    "eth_getBalance",
    "eth_getCode",
    "eth_getTransactionCount",
    "eth_getStorageAt",
    "eth_getProof",
    "eth_getBlockByHash",
    "eth_getBlockByNumber",
    "eth_getBlockTransactionCountByHash",
    "eth_getBlockTransactionCountByNumber",
    "eth_getUncleByBlockHashAndIndex",
    "eth_getUncleByBlockNumberAndIndex",
    "eth_getUncleCountByBlockHash",
    "eth_getUncleCountByBlockNumber",
    "eth_getTransactionByHash",
    "eth_getTransactionByBlockHashAndIndex",
    "eth_getTransactionByBlockNumberAndIndex",
    "eth_getTransactionReceipt",
    "eth_getLogs",
    "net_listening",
    "net_peerCount",
    "web3_clientVersion",
    "web3_sha3",
];

const UNSAFE_METHODS: &[&str] = &[
    "eth_sendRawTransaction",
    "eth_sendTransaction",
    "eth_sign",
    "eth_signTransaction",
    "personal_sign",
    "eth_accounts",
    "eth_requestAccounts",
    "eth_subscribe",
    "eth_unsubscribe",
    "eth_newFilter",
    "eth_newBlockFilter",
    "eth_newPendingTransactionFilter",
    "eth_uninstallFilter",
    "eth_getFilterChanges",
    "eth_getFilterLogs",
    "eth_submitWork",
    "eth_submitHashrate",
];

pub fn is_safe_read_only_passthrough(method: &str) -> bool {
    if UNSAFE_METHODS.contains(&method) {
        return false;
    }

    SAFE_READ_ONLY_PASSTHROUGH_METHODS.contains(&method)
}

/// Last stage: forwards read-only methods nobody else answered to an
/// upstream JSON-RPC node. Writes, signing and subscriptions never leave
/// the process.
pub struct UpstreamMiddleware {
    api: Arc<dyn JsonRpcApi>,
}

impl UpstreamMiddleware {
    pub fn new(api: Arc<dyn JsonRpcApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl Middleware for UpstreamMiddleware {
    fn name(&self) -> &'static str {
        "upstream"
    }

    fn methods(&self) -> &'static [&'static str] {
        SAFE_READ_ONLY_PASSTHROUGH_METHODS
    }

    fn answers(&self, method: &str) -> bool {
        is_safe_read_only_passthrough(method)
    }

    async fn handle(&self, envelope: &mut RpcEnvelope) -> Result<Step, RpcError> {
        if !self.answers(&envelope.method) {
            return Ok(Step::Deferred);
        }
        debug!(method = %envelope.method, "Forwarding to upstream");
        let result = self
            .api
            .request(&envelope.method, envelope.params.clone())
            .await?;
        Ok(Step::Answered(result))
    }
}
