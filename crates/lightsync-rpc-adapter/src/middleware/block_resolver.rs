use std::sync::Arc;

use async_trait::async_trait;
use lightsync_client::ChainClient;
use lightsync_core::BlockRef;
use serde_json::Value;
use tracing::debug;

use super::params::expect_params_array;
use super::{Middleware, RpcEnvelope, Step};
use crate::error::RpcError;

const METHODS: &[&str] = &["eth_getBlockByNumber", "net_version"];

/// Answers `eth_getBlockByNumber` and `net_version` straight from the chain client.
pub struct BlockResolverMiddleware {
    client: Arc<dyn ChainClient>,
    network_id: String,
}

impl BlockResolverMiddleware {
    pub fn new(client: Arc<dyn ChainClient>, network_id: impl Into<String>) -> Self {
        Self {
            client,
            network_id: network_id.into(),
        }
    }

    async fn block_by_number(&self, params: &Value) -> Result<Step, RpcError> {
        let args = expect_params_array("eth_getBlockByNumber", params, 1)?;
        let tag = args[0]
            .as_str()
            .ok_or_else(|| RpcError::invalid_params("block parameter must be a string"))?;

        let block = if tag == "latest" {
            self.client.get_latest_block().await?
        } else {
            let block_ref = tag
                .parse::<BlockRef>()
                .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            // The caller's fullTx flag is not forwarded; transactions come
            // back in whatever form the client stores them.
            self.client.get_block_by_number(block_ref, false).await?
        };

        let Some(block) = block else {
            debug!(tag, "Block not known to chain client");
            return Ok(Step::Deferred);
        };
        let rpc_block = serde_json::to_value(block.to_rpc())
            .map_err(|e| RpcError::internal(format!("block serialization failed: {e}")))?;
        Ok(Step::Answered(rpc_block))
    }
}

#[async_trait]
impl Middleware for BlockResolverMiddleware {
    fn name(&self) -> &'static str {
        "block-resolver"
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    async fn handle(&self, envelope: &mut RpcEnvelope) -> Result<Step, RpcError> {
        match envelope.method.as_str() {
            "net_version" => Ok(Step::Answered(Value::String(self.network_id.clone()))),
            "eth_getBlockByNumber" => self.block_by_number(&envelope.params).await,
            _ => Ok(Step::Deferred),
        }
    }
}
