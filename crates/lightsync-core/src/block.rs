use alloy_primitives::{Address, Bloom, Bytes, B256, B64, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::EMPTY_TRIE_ROOT;
use crate::quantity::{fixed_hex, to_quantity};

/// Header fields of a block as handed over by the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockHeader {
    pub parent_hash: B256,
    pub uncles_hash: B256,
    pub coinbase: Address,
    pub state_root: B256,
    pub transactions_root: B256,
    /// Absent for blocks whose receipts were never synced.
    pub receipts_root: Option<B256>,
    pub logs_bloom: Bloom,
    pub difficulty: U256,
    pub number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub mix_hash: B256,
    pub nonce: B64,
}

/// A block as known to the chain client.
///
/// `transactions` are kept opaque. `transactions_root` duplicates the header
/// field at the top level, some clients fill only one of the two.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    pub hash: Option<B256>,
    pub header: BlockHeader,
    pub transactions: Vec<Value>,
    pub transactions_root: Option<B256>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Block number as a hex quantity, the representation used for head pointers.
    pub fn number_hex(&self) -> String {
        to_quantity(self.header.number)
    }

    pub fn to_rpc(&self) -> RpcBlock {
        RpcBlock::from(self)
    }
}

/// The block object returned by `eth_getBlockByNumber`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub parent_hash: String,
    pub sha3_uncles: String,
    pub miner: String,
    pub state_root: String,
    pub transactions_root: String,
    pub receipt_root: String,
    pub logs_bloom: String,
    pub difficulty: String,
    pub number: String,
    pub gas_limit: String,
    pub gas_used: String,
    pub timestamp: String,
    pub extra_data: String,
    pub mix_hash: String,
    pub nonce: String,
    pub transactions: Vec<Value>,
}

impl From<&Block> for RpcBlock {
    fn from(block: &Block) -> Self {
        let header = &block.header;
        let transactions_root = block.transactions_root.unwrap_or(header.transactions_root);
        Self {
            hash: block.hash.map(fixed_hex),
            parent_hash: fixed_hex(header.parent_hash),
            sha3_uncles: fixed_hex(header.uncles_hash),
            miner: fixed_hex(header.coinbase.as_slice()),
            state_root: fixed_hex(header.state_root),
            transactions_root: fixed_hex(transactions_root),
            receipt_root: fixed_hex(header.receipts_root.unwrap_or(EMPTY_TRIE_ROOT)),
            logs_bloom: fixed_hex(header.logs_bloom.as_slice()),
            difficulty: format!("0x{:x}", header.difficulty),
            number: to_quantity(header.number),
            gas_limit: to_quantity(header.gas_limit),
            gas_used: to_quantity(header.gas_used),
            timestamp: to_quantity(header.timestamp),
            extra_data: fixed_hex(&header.extra_data),
            mix_hash: fixed_hex(header.mix_hash),
            nonce: fixed_hex(header.nonce),
            transactions: block.transactions.clone(),
        }
    }
}
