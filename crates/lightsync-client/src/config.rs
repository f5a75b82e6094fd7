use alloy_primitives::Address;
use lightsync_core::{DEFAULT_SLICE_DEPTH, SLICE_PATH_NIBBLES};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TRANSPORT_ADDR: &str = "/ip4/127.0.0.1/tcp/9090/ws/p2p-webrtc-star";
pub const DEFAULT_BOOTSTRAP_PEER: &str =
    "/ip4/127.0.0.1/tcp/30334/ws/ipfs/QmUA1Ghihi5u3gDwEDxhbu49jU42QPbvHttZFwB6b4K5oC";
pub const DEFAULT_RPC_URL: &str = "http://localhost:8546";
pub const DEFAULT_DIAL_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

const DEFAULT_WATCHED_ADDRS: &[&str] = &[
    "0x52bc44d5378309ee2abf1539bf71de1b7d7be3b5",
    "0x6810e776880c02933d47db1b9fc05908e5386b96",
    "0x1d805bc00b8fa3c96ae6c8fa97b2fd24b19a9801",
];
const DEFAULT_SLICE_PATHS: &[&str] = &["8e99", "1372"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeEnv {
    Dev,
    Prod,
}

/// Bootstrap options handed to the chain client. The adapter validates the
/// shape but otherwise forwards them untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
    /// Transport addresses to listen on; the peer id is appended per address.
    pub libp2p_addrs: Vec<String>,
    pub node_env: NodeEnv,
    pub slice_depth: u8,
    /// Accounts whose state slices are kept in sync.
    pub eth_addrs: Vec<String>,
    /// Peers to dial on startup. Forwarded for peer-to-peer clients;
    /// `RpcChainClient` has no peers and ignores it.
    pub libp2p_bootstrap: Vec<String>,
    /// Trie path prefixes synced by peer-to-peer clients. Forwarded only;
    /// `RpcChainClient` derives slice membership from `eth_addrs`.
    pub slice_path: Vec<String>,
    pub dial_interval_ms: u64,
    pub rpc_url: String,
    pub poll_interval_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            libp2p_addrs: vec![DEFAULT_TRANSPORT_ADDR.to_string()],
            node_env: NodeEnv::Dev,
            slice_depth: DEFAULT_SLICE_DEPTH,
            eth_addrs: DEFAULT_WATCHED_ADDRS.iter().map(|s| s.to_string()).collect(),
            libp2p_bootstrap: vec![DEFAULT_BOOTSTRAP_PEER.to_string()],
            slice_path: DEFAULT_SLICE_PATHS.iter().map(|s| s.to_string()).collect(),
            dial_interval_ms: DEFAULT_DIAL_INTERVAL_MS,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    ZeroSliceDepth,
    InvalidWatchedAddress { address: String },
    InvalidSlicePath { path: String },
    ZeroInterval { field: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ZeroSliceDepth => write!(f, "sliceDepth must be > 0"),
            ConfigError::InvalidWatchedAddress { address } => {
                write!(f, "ethAddrs entry '{}' is not a 20-byte hex address", address)
            }
            ConfigError::InvalidSlicePath { path } => {
                write!(
                    f,
                    "slicePath entry '{}' must be 1..={} hex nibbles",
                    path, SLICE_PATH_NIBBLES
                )
            }
            ConfigError::ZeroInterval { field } => write!(f, "{} must be > 0", field),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.slice_depth == 0 {
            return Err(ConfigError::ZeroSliceDepth);
        }
        for address in &self.eth_addrs {
            if address.parse::<Address>().is_err() {
                return Err(ConfigError::InvalidWatchedAddress {
                    address: address.clone(),
                });
            }
        }
        for path in &self.slice_path {
            let valid = !path.is_empty()
                && path.len() <= SLICE_PATH_NIBBLES
                && path.chars().all(|c| c.is_ascii_hexdigit());
            if !valid {
                return Err(ConfigError::InvalidSlicePath { path: path.clone() });
            }
        }
        if self.dial_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "dialIntervalMs",
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval {
                field: "pollIntervalMs",
            });
        }
        Ok(())
    }

    /// Watched addresses, skipping entries that do not parse.
    pub fn watched_addresses(&self) -> Vec<Address> {
        self.eth_addrs
            .iter()
            .filter_map(|s| s.parse::<Address>().ok())
            .collect()
    }
}
