use std::sync::Arc;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use lightsync_client::ChainClient;
use lightsync_core::{
    fixed_hex, slice_path_for, to_quantity, BlockRef, SliceAccount, SliceId, SliceRequest,
};
use serde_json::Value;
use tracing::debug;

use super::params::{expect_params_array, parse_address, parse_block_ref, parse_storage_slot};
use super::{Middleware, RpcEnvelope, Step};
use crate::error::RpcError;

const METHODS: &[&str] = &[
    "eth_getBalance",
    "eth_getTransactionCount",
    "eth_getCode",
    "eth_getStorageAt",
];

enum AccountField {
    Balance,
    Nonce,
    Code,
    Storage(B256),
}

/// Serves account reads from the state slice covering the account at the
/// referenced block.
pub struct SliceMiddleware {
    client: Arc<dyn ChainClient>,
    depth: u8,
}

impl SliceMiddleware {
    pub fn new(client: Arc<dyn ChainClient>, depth: u8) -> Self {
        Self { client, depth }
    }

    fn parse_request(
        method: &str,
        params: &Value,
    ) -> Result<(Address, AccountField, BlockRef), RpcError> {
        let args = expect_params_array(method, params, 1)?;
        let address = parse_address(&args[0])?;
        let (field, block_index) = match method {
            "eth_getBalance" => (AccountField::Balance, 1),
            "eth_getTransactionCount" => (AccountField::Nonce, 1),
            "eth_getCode" => (AccountField::Code, 1),
            _ => {
                let slot = args
                    .get(1)
                    .ok_or_else(|| RpcError::invalid_params("eth_getStorageAt expects a slot"))?;
                (AccountField::Storage(parse_storage_slot(slot)?), 2)
            }
        };
        let block_ref = parse_block_ref(args.get(block_index))?;
        Ok((address, field, block_ref))
    }

    async fn lookup_account(
        &self,
        address: &Address,
        block_ref: BlockRef,
    ) -> Result<Option<SliceAccount>, RpcError> {
        let block = if block_ref.is_head_tag() {
            self.client.get_latest_block().await?
        } else {
            self.client.get_block_by_number(block_ref, false).await?
        };
        let Some(block) = block else {
            debug!(%block_ref, "Block not known for slice lookup");
            return Ok(None);
        };

        let request = SliceRequest {
            id: SliceId {
                path: slice_path_for(address),
                depth: self.depth,
                state_root: block.header.state_root,
            },
            block_number: block.number(),
        };
        let Some(slice) = self.client.get_slice(&request).await? else {
            debug!(slice = %request.id, "Slice not available");
            return Ok(None);
        };
        Ok(slice.account(address).cloned())
    }
}

#[async_trait]
impl Middleware for SliceMiddleware {
    fn name(&self) -> &'static str {
        "slice"
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    async fn handle(&self, envelope: &mut RpcEnvelope) -> Result<Step, RpcError> {
        if !self.answers(&envelope.method) {
            return Ok(Step::Deferred);
        }
        let (address, field, block_ref) = Self::parse_request(&envelope.method, &envelope.params)?;

        let Some(account) = self.lookup_account(&address, block_ref).await? else {
            return Ok(Step::Deferred);
        };

        let value = match field {
            AccountField::Balance => Value::String(format!("0x{:x}", account.balance)),
            AccountField::Nonce => Value::String(to_quantity(account.nonce)),
            AccountField::Code => Value::String(fixed_hex(&account.code)),
            AccountField::Storage(slot) => match account.storage.get(&slot) {
                Some(word) => Value::String(fixed_hex(word)),
                None => return Ok(Step::Deferred),
            },
        };
        Ok(Step::Answered(value))
    }
}
