use std::collections::BTreeMap;
use std::fmt;

use alloy_primitives::{keccak256, Address, Bytes, B256, U256};

use crate::constants::SLICE_PATH_NIBBLES;
use crate::quantity::fixed_hex;

/// Identifies a bounded subtree of the state trie: the nibble path it hangs
/// off, how deep it reaches and which state root it was taken from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SliceId {
    pub path: String,
    pub depth: u8,
    pub state_root: B256,
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.path, self.depth, fixed_hex(self.state_root))
    }
}

/// A slice lookup together with the block the state root belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceRequest {
    pub id: SliceId,
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceAccount {
    pub balance: U256,
    pub nonce: u64,
    pub code: Bytes,
    pub storage: BTreeMap<B256, B256>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateSlice {
    pub id: SliceId,
    pub accounts: BTreeMap<Address, SliceAccount>,
}

impl StateSlice {
    pub fn new(id: SliceId) -> Self {
        Self {
            id,
            accounts: BTreeMap::new(),
        }
    }

    pub fn account(&self, address: &Address) -> Option<&SliceAccount> {
        self.accounts.get(address)
    }

    pub fn with_account(mut self, address: Address, account: SliceAccount) -> Self {
        self.accounts.insert(address, account);
        self
    }
}

/// Slice path of an account: the leading nibbles of its secure-trie key.
pub fn slice_path_for(address: &Address) -> String {
    let key = keccak256(address.as_slice());
    let mut path = hex::encode(key);
    path.truncate(SLICE_PATH_NIBBLES);
    path
}
