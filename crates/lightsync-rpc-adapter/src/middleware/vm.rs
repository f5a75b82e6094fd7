use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use lightsync_core::{fixed_hex, parse_quantity, to_quantity};
use revm::{
    context::TxEnv,
    context_interface::result::{ExecutionResult, Output},
    database::Database,
    primitives::TxKind,
    Context, ExecuteEvm, MainBuilder, MainContext,
};
use serde_json::{json, Value};
use tokio::runtime::Handle;
use tracing::{debug, info};

use super::params::{expect_params_array, parse_block_ref};
use super::{Middleware, RpcEnvelope, Step};
use crate::error::{RpcError, INTERNAL_ERROR_CODE};
use crate::provider_db::ProviderDatabase;

const METHODS: &[&str] = &["eth_call", "eth_estimateGas"];
const DEFAULT_CALL_GAS: u64 = 30_000_000;

/// JSON-RPC view of chain state used by the VM, typically a pipeline made of
/// the stages in front of the VM.
#[async_trait]
pub trait StateProvider: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
}

/// Block environment for execution.
#[derive(Debug, Clone, PartialEq)]
struct BlockInfo {
    number: u64,
    timestamp: u64,
    gas_limit: u64,
    beneficiary: Address,
}

impl BlockInfo {
    fn from_rpc(block: &Value) -> Result<Self, RpcError> {
        let quantity = |field: &str| -> Result<u64, RpcError> {
            block
                .get(field)
                .and_then(Value::as_str)
                .and_then(parse_quantity)
                .ok_or_else(|| RpcError::internal(format!("block is missing '{field}'")))
        };
        let beneficiary = parse_address_strict(block.get("miner"))
            .map_err(|e| RpcError::internal(format!("invalid block 'miner': {e}")))?
            .unwrap_or_default();
        Ok(Self {
            number: quantity("number")?,
            timestamp: quantity("timestamp")?,
            gas_limit: quantity("gasLimit")?,
            beneficiary,
        })
    }
}

/// Parsed call object of `eth_call` / `eth_estimateGas`.
#[derive(Debug, Clone, PartialEq)]
struct CallRequest {
    from: Address,
    to: Option<Address>,
    data: Bytes,
    value: U256,
    gas: Option<u64>,
}

impl CallRequest {
    fn parse(call: &Value) -> Result<Self, RpcError> {
        if !call.is_object() {
            return Err(RpcError::invalid_params("call object must be a JSON object"));
        }
        let field = |name: &str, e: String| RpcError::invalid_params(format!("invalid '{name}': {e}"));
        Ok(Self {
            from: parse_address_strict(call.get("from"))
                .map_err(|e| field("from", e))?
                .unwrap_or_default(),
            to: parse_address_strict(call.get("to")).map_err(|e| field("to", e))?,
            data: parse_bytes_strict(call.get("data").or(call.get("input")))
                .map_err(|e| field("data", e))?,
            value: parse_u256_strict(call.get("value")).map_err(|e| field("value", e))?,
            gas: parse_u64_strict(call.get("gas")).map_err(|e| field("gas", e))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallMode {
    Call,
    EstimateGas,
}

/// Executes `eth_call` and `eth_estimateGas` with revm. Every state read
/// goes back through the provider at the call's block.
pub struct VmMiddleware {
    provider: Arc<dyn StateProvider>,
}

impl VmMiddleware {
    pub fn new(provider: Arc<dyn StateProvider>) -> Self {
        Self { provider }
    }

    async fn execute(&self, mode: CallMode, params: &Value) -> Result<Step, RpcError> {
        let method = match mode {
            CallMode::Call => "eth_call",
            CallMode::EstimateGas => "eth_estimateGas",
        };
        let args = expect_params_array(method, params, 1)?;
        let call = CallRequest::parse(&args[0])?;
        let block_tag = parse_block_ref(args.get(1))?.to_string();

        let block = self
            .provider
            .request("eth_getBlockByNumber", json!([block_tag, false]))
            .await?;
        if block.is_null() {
            debug!(block = %block_tag, "Block not known for VM execution");
            return Ok(Step::Deferred);
        }
        let block_info = BlockInfo::from_rpc(&block)?;
        let pinned = to_quantity(block_info.number);

        info!(
            method,
            from = %call.from,
            to = ?call.to,
            data_len = call.data.len(),
            block = block_info.number,
            "Executing call via revm"
        );

        let provider = Arc::clone(&self.provider);
        let handle = Handle::current();

        let outcome = tokio::task::spawn_blocking(move || {
            let mut db = ProviderDatabase::new(provider, pinned, handle);
            let nonce = db
                .basic(call.from)
                .map_err(|e| RpcError::internal(format!("caller lookup failed: {e}")))?
                .map(|account| account.nonce)
                .unwrap_or_default();

            let tx = TxEnv::builder()
                .caller(call.from)
                .kind(match call.to {
                    Some(addr) => TxKind::Call(addr),
                    None => TxKind::Create,
                })
                .data(call.data)
                .value(call.value)
                .gas_limit(call.gas.unwrap_or(DEFAULT_CALL_GAS).min(block_info.gas_limit))
                .nonce(nonce)
                .build()
                .map_err(|e| RpcError::internal(format!("Failed to build tx: {e:?}")))?;

            let mut evm = Context::mainnet()
                .with_db(db)
                .modify_block_chained(|b| {
                    b.number = U256::from(block_info.number);
                    b.timestamp = U256::from(block_info.timestamp);
                    b.gas_limit = block_info.gas_limit;
                    b.beneficiary = block_info.beneficiary;
                    // Calls carry no gas price.
                    b.basefee = 0;
                })
                .build_mainnet();

            evm.transact(tx)
                .map(|result| result.result)
                .map_err(|e| RpcError::internal(format!("EVM execution failed: {e:?}")))
        })
        .await
        .map_err(|e| RpcError::internal(format!("spawn_blocking: {e}")))??;

        match outcome {
            ExecutionResult::Success {
                output, gas_used, ..
            } => {
                let value = match mode {
                    CallMode::Call => match output {
                        Output::Call(data) => fixed_hex(&data),
                        Output::Create(data, _) => fixed_hex(&data),
                    },
                    CallMode::EstimateGas => to_quantity(gas_used),
                };
                Ok(Step::Answered(Value::String(value)))
            }
            ExecutionResult::Revert { output, .. } => Err(RpcError::json_rpc(
                INTERNAL_ERROR_CODE,
                "execution reverted",
                Some(Value::String(fixed_hex(&output))),
            )),
            ExecutionResult::Halt { reason, .. } => Err(RpcError::internal(format!(
                "execution halted: {reason:?}"
            ))),
        }
    }
}

#[async_trait]
impl Middleware for VmMiddleware {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn methods(&self) -> &'static [&'static str] {
        METHODS
    }

    async fn handle(&self, envelope: &mut RpcEnvelope) -> Result<Step, RpcError> {
        match envelope.method.as_str() {
            "eth_call" => self.execute(CallMode::Call, &envelope.params).await,
            "eth_estimateGas" => self.execute(CallMode::EstimateGas, &envelope.params).await,
            _ => Ok(Step::Deferred),
        }
    }
}

/// Parse an address field. Returns Ok(None) if absent, Err if present but invalid.
fn parse_address_strict(val: Option<&Value>) -> Result<Option<Address>, String> {
    let Some(v) = val else { return Ok(None) };
    if v.is_null() {
        return Ok(None);
    }
    let s = v.as_str().ok_or("expected hex string")?;
    let hex = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(hex).map_err(|e| e.to_string())?;
    if bytes.len() != 20 {
        return Err(format!("expected 20 bytes, got {}", bytes.len()));
    }
    Ok(Some(Address::from_slice(&bytes)))
}

/// Parse a bytes field. Returns Ok(empty) if absent, Err if present but invalid hex.
fn parse_bytes_strict(val: Option<&Value>) -> Result<Bytes, String> {
    let Some(v) = val.filter(|v| !v.is_null()) else {
        return Ok(Bytes::new());
    };
    let s = v.as_str().ok_or("expected hex string")?;
    let hex = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(hex).map(Bytes::from).map_err(|e| e.to_string())
}

fn parse_u256_strict(val: Option<&Value>) -> Result<U256, String> {
    let Some(v) = val.filter(|v| !v.is_null()) else {
        return Ok(U256::ZERO);
    };
    let s = v.as_str().ok_or("expected hex string")?;
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.is_empty() {
        return Ok(U256::ZERO);
    }
    U256::from_str_radix(hex, 16).map_err(|e| e.to_string())
}

fn parse_u64_strict(val: Option<&Value>) -> Result<Option<u64>, String> {
    let Some(v) = val.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let s = v.as_str().ok_or("expected hex string")?;
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.is_empty() {
        return Ok(Some(0));
    }
    u64::from_str_radix(hex, 16)
        .map(Some)
        .map_err(|e| e.to_string())
}
