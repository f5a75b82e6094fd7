use std::sync::Arc;

use async_trait::async_trait;
use lightsync_client::ClientError;
use serde_json::Value;
use tracing::debug;

use super::{Middleware, RpcEnvelope, Step};
use crate::error::RpcError;
use crate::head_tracker::HeadTracker;

/// Position of the block parameter for methods that take one.
pub fn block_param_index(method: &str) -> Option<usize> {
    match method {
        "eth_getBalance" | "eth_getCode" | "eth_getTransactionCount" | "eth_call"
        | "eth_estimateGas" => Some(1),
        "eth_getStorageAt" | "eth_getProof" => Some(2),
        "eth_getBlockByNumber"
        | "eth_getBlockTransactionCountByNumber"
        | "eth_getUncleCountByBlockNumber"
        | "eth_getTransactionByBlockNumberAndIndex"
        | "eth_getUncleByBlockNumberAndIndex" => Some(0),
        _ => None,
    }
}

fn names_head(param: Option<&Value>) -> bool {
    match param {
        None | Some(Value::Null) => true,
        Some(Value::String(tag)) => tag == "latest" || tag == "pending",
        Some(_) => false,
    }
}

/// Pins `latest`/`pending` (or a missing block parameter) to the chain
/// client's current head number so later stages see a concrete block.
pub struct BlockRefRewriteMiddleware {
    tracker: Arc<HeadTracker>,
}

impl BlockRefRewriteMiddleware {
    pub fn new(tracker: Arc<HeadTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Middleware for BlockRefRewriteMiddleware {
    fn name(&self) -> &'static str {
        "block-ref-rewrite"
    }

    fn methods(&self) -> &'static [&'static str] {
        &[]
    }

    async fn handle(&self, envelope: &mut RpcEnvelope) -> Result<Step, RpcError> {
        let Some(index) = block_param_index(&envelope.method) else {
            return Ok(Step::Deferred);
        };
        if envelope.params.is_null() {
            envelope.params = Value::Array(Vec::new());
        }
        // Non-array params are left for the answering stage to reject.
        let Some(args) = envelope.params.as_array_mut() else {
            return Ok(Step::Deferred);
        };
        if !names_head(args.get(index)) {
            return Ok(Step::Deferred);
        }

        let head = match self.tracker.get_latest_block().await {
            Ok(head) => head,
            // No head yet: leave the tag for later stages, which miss on it.
            Err(ClientError::HeadUnavailable) => {
                debug!(method = %envelope.method, "No head to pin block parameter to");
                return Ok(Step::Deferred);
            }
            Err(err) => return Err(err.into()),
        };
        debug!(method = %envelope.method, %head, "Pinned block parameter to head");
        if args.len() <= index {
            args.resize(index + 1, Value::Null);
        }
        args[index] = Value::String(head);
        Ok(Step::Deferred)
    }
}
