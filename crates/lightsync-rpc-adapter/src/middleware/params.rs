//! Positional parameter parsing shared by the stages.

use alloy_primitives::{Address, B256};
use lightsync_core::BlockRef;
use serde_json::Value;

use crate::error::RpcError;

pub fn expect_params_array<'a>(
    method: &str,
    params: &'a Value,
    min_len: usize,
) -> Result<&'a [Value], RpcError> {
    let values = params
        .as_array()
        .ok_or_else(|| RpcError::invalid_params(format!("{method} expects array params")))?;

    if values.len() < min_len {
        return Err(RpcError::invalid_params(format!(
            "{method} expects at least {min_len} parameter(s)"
        )));
    }

    Ok(values.as_slice())
}

pub fn parse_address(value: &Value) -> Result<Address, RpcError> {
    let address_str = value
        .as_str()
        .ok_or_else(|| RpcError::invalid_params("address must be a hex string"))?;
    let address_hex = address_str.strip_prefix("0x").unwrap_or(address_str);

    if address_hex.len() != 40 {
        return Err(RpcError::invalid_params("address must be exactly 20 bytes"));
    }

    let mut address = [0u8; 20];
    hex::decode_to_slice(address_hex, &mut address)
        .map_err(|e| RpcError::invalid_params(format!("invalid address: {e}")))?;

    Ok(Address::from(address))
}

/// Storage slot, left-padded to 32 bytes (`"0x1"` is slot one).
pub fn parse_storage_slot(value: &Value) -> Result<B256, RpcError> {
    let slot_str = value
        .as_str()
        .ok_or_else(|| RpcError::invalid_params("slot must be a hex string"))?;
    let slot_hex = slot_str.strip_prefix("0x").unwrap_or(slot_str);

    if slot_hex.len() > 64 {
        return Err(RpcError::invalid_params("slot too long (max 32 bytes)"));
    }

    let normalized_hex = if slot_hex.len() % 2 == 0 {
        slot_hex.to_owned()
    } else {
        format!("0{slot_hex}")
    };

    let slot_bytes = hex::decode(&normalized_hex)
        .map_err(|e| RpcError::invalid_params(format!("invalid slot: {e}")))?;

    let mut slot = [0u8; 32];
    let offset = 32 - slot_bytes.len();
    slot[offset..].copy_from_slice(&slot_bytes);
    Ok(B256::from(slot))
}

/// Block parameter; absent or `null` means `latest`. Object forms are rejected.
pub fn parse_block_ref(value: Option<&Value>) -> Result<BlockRef, RpcError> {
    match value {
        None | Some(Value::Null) => Ok(BlockRef::Latest),
        Some(Value::String(tag)) => tag
            .parse::<BlockRef>()
            .map_err(|e| RpcError::invalid_params(e.to_string())),
        Some(_) => Err(RpcError::invalid_params(
            "unsupported block parameter (object form not supported)",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_must_be_an_array_of_min_length() {
        assert!(expect_params_array("eth_getBalance", &json!({}), 1).is_err());
        assert!(expect_params_array("eth_getBalance", &json!([]), 1).is_err());
        assert_eq!(
            expect_params_array("eth_getBalance", &json!(["0x1"]), 1)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn address_parsing_checks_length_and_hex() {
        let addr = parse_address(&json!("0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5")).unwrap();
        assert_eq!(addr, Address::from([
            0x52, 0xbc, 0x44, 0xd5, 0x37, 0x83, 0x09, 0xee, 0x2a, 0xbf, 0x15, 0x39, 0xbf, 0x71,
            0xde, 0x1b, 0x7d, 0x7b, 0xe3, 0xb5,
        ]));
        assert!(parse_address(&json!("0xaabb")).is_err());
        assert!(parse_address(&json!("0xzz2bc44d5378309ee2abf1539bf71de1b7d7be3b")).is_err());
        assert_eq!(parse_address(&json!(42)).unwrap_err().code(), -32602);
    }

    #[test]
    fn short_storage_slot_is_left_padded() {
        let slot = parse_storage_slot(&json!("0x1")).unwrap();
        assert_eq!(slot, B256::with_last_byte(1));
        assert!(parse_storage_slot(&json!(format!("0x{}", "0".repeat(66)))).is_err());
    }

    #[test]
    fn block_ref_defaults_to_latest_and_rejects_objects() {
        assert_eq!(parse_block_ref(None).unwrap(), BlockRef::Latest);
        assert_eq!(parse_block_ref(Some(&json!(null))).unwrap(), BlockRef::Latest);
        assert_eq!(
            parse_block_ref(Some(&json!("0x2a"))).unwrap(),
            BlockRef::Number(42)
        );
        assert!(parse_block_ref(Some(&json!({"blockNumber": "0x1"}))).is_err());
        assert!(parse_block_ref(Some(&json!("safe"))).is_err());
    }
}
