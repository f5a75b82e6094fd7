use alloy_primitives::{b256, B256};

/// Root hash of an empty Merkle-Patricia trie, `keccak256(rlp(""))`.
pub const EMPTY_TRIE_ROOT: B256 =
    b256!("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");

/// Network id reported by `net_version` for Ethereum mainnet.
pub const MAINNET_NETWORK_ID: &str = "1";

/// Trie walk depth used for state slices unless configured otherwise.
pub const DEFAULT_SLICE_DEPTH: u8 = 10;

/// Number of leading nibbles of `keccak256(address)` that name a slice.
pub const SLICE_PATH_NIBBLES: usize = 4;

/// Head value used when one side of a sync notification is absent.
pub const UNKNOWN_HEAD: &str = "0x0";
