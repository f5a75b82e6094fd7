use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{keccak256, Bytes};
use lightsync_core::{fixed_hex, to_quantity};
use revm::{
    bytecode::Bytecode,
    database::Database,
    database_interface::DBErrorMarker,
    primitives::{Address, B256, KECCAK_EMPTY, U256},
    state::AccountInfo,
};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::debug;

use crate::middleware::StateProvider;

/// Error type for provider-backed database operations.
#[derive(Debug)]
pub struct ProviderDbError(pub String);

impl std::fmt::Display for ProviderDbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ProviderDbError {}
impl DBErrorMarker for ProviderDbError {}

/// A revm Database that reads every account, storage slot and block hash
/// through JSON-RPC requests against a [`StateProvider`], pinned to one block.
///
/// Must be used from a blocking thread; each lookup blocks on `handle`.
pub struct ProviderDatabase {
    provider: Arc<dyn StateProvider>,
    block: String,
    handle: Handle,
    code: HashMap<B256, Bytecode>,
}

impl ProviderDatabase {
    pub fn new(provider: Arc<dyn StateProvider>, block: impl Into<String>, handle: Handle) -> Self {
        Self {
            provider,
            block: block.into(),
            handle,
            code: HashMap::new(),
        }
    }

    fn fetch(&self, method: &str, params: Value) -> Result<Value, ProviderDbError> {
        self.handle
            .block_on(self.provider.request(method, params))
            .map_err(|e| ProviderDbError(format!("{method}: {e}")))
    }

    fn fetch_string(&self, method: &str, params: Value) -> Result<Option<String>, ProviderDbError> {
        match self.fetch(method, params)? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Err(ProviderDbError(format!(
                "{method}: expected hex string, got {other}"
            ))),
        }
    }
}

fn decode_u256(method: &str, s: &str) -> Result<U256, ProviderDbError> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(hex, 16).map_err(|e| ProviderDbError(format!("{method}: {e}")))
}

impl Database for ProviderDatabase {
    type Error = ProviderDbError;

    fn basic(&mut self, address: Address) -> Result<Option<AccountInfo>, Self::Error> {
        let addr = fixed_hex(address.as_slice());

        let balance = match self.fetch_string("eth_getBalance", json!([addr, self.block]))? {
            Some(s) => decode_u256("eth_getBalance", &s)?,
            None => U256::ZERO,
        };
        let nonce = match self.fetch_string("eth_getTransactionCount", json!([addr, self.block]))? {
            Some(s) => u64::try_from(decode_u256("eth_getTransactionCount", &s)?)
                .map_err(|_| ProviderDbError("eth_getTransactionCount: nonce overflows u64".into()))?,
            None => 0,
        };
        let code = match self.fetch_string("eth_getCode", json!([addr, self.block]))? {
            Some(s) => {
                let hex = s.strip_prefix("0x").unwrap_or(&s);
                Bytes::from(
                    hex::decode(hex).map_err(|e| ProviderDbError(format!("eth_getCode: {e}")))?,
                )
            }
            None => Bytes::new(),
        };

        // Non-existent account: return None so EXTCODEHASH returns 0x0
        if balance.is_zero() && nonce == 0 && code.is_empty() {
            return Ok(None);
        }

        let (code_hash, bytecode) = if code.is_empty() {
            (KECCAK_EMPTY, Bytecode::default())
        } else {
            let hash = keccak256(&code);
            let bytecode = Bytecode::new_raw(code);
            self.code.insert(hash, bytecode.clone());
            (hash, bytecode)
        };

        debug!(%address, nonce, %balance, block = %self.block, "VM: loaded account");

        Ok(Some(AccountInfo {
            balance,
            nonce,
            code_hash,
            code: Some(bytecode),
        }))
    }

    fn code_by_hash(&mut self, code_hash: B256) -> Result<Bytecode, Self::Error> {
        if code_hash == KECCAK_EMPTY || code_hash == B256::ZERO {
            return Ok(Bytecode::default());
        }
        self.code
            .get(&code_hash)
            .cloned()
            .ok_or_else(|| ProviderDbError(format!("unknown code hash {code_hash}")))
    }

    fn storage(&mut self, address: Address, index: U256) -> Result<U256, Self::Error> {
        let slot = fixed_hex(index.to_be_bytes::<32>());
        let value = match self.fetch_string(
            "eth_getStorageAt",
            json!([fixed_hex(address.as_slice()), slot, self.block]),
        )? {
            Some(s) => decode_u256("eth_getStorageAt", &s)?,
            None => U256::ZERO,
        };

        debug!(%address, slot = %index, %value, "VM: loaded storage");

        Ok(value)
    }

    fn block_hash(&mut self, number: u64) -> Result<B256, Self::Error> {
        let block = self.fetch("eth_getBlockByNumber", json!([to_quantity(number), false]))?;

        // BLOCKHASH for unknown blocks is zero
        let Some(hash_str) = block.get("hash").and_then(Value::as_str) else {
            return Ok(B256::ZERO);
        };
        let hash_hex = hash_str.strip_prefix("0x").unwrap_or(hash_str);
        let mut hash = [0u8; 32];
        hex::decode_to_slice(hash_hex, &mut hash)
            .map_err(|e| ProviderDbError(format!("Block hash decode: {e}")))?;
        Ok(B256::from(hash))
    }
}
