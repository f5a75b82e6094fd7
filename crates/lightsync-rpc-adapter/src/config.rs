//! Runtime configuration for the adapter binary.
//!
//! Values come from the command line, then `LIGHTSYNC_*` environment
//! variables, then an optional JSON file, then built-in defaults.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{ArgAction, Parser};
use lightsync_client::rpc::{HttpJsonRpc, JsonRpcApi};
use lightsync_client::{ClientConfig, NodeEnv};
use lightsync_core::MAINNET_NETWORK_ID;
use serde::{Deserialize, Serialize};

use crate::pipeline::PipelineSettings;
use crate::startup::StartupOptions;
use crate::telemetry::{sanitize_url_for_telemetry, OtelSettings};

pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8545";

const ENV_CONFIG: &str = "LIGHTSYNC_CONFIG";
const ENV_LISTEN_ADDR: &str = "LIGHTSYNC_LISTEN_ADDR";
const ENV_RPC_URL: &str = "UPSTREAM_RPC_URL";
const ENV_UPSTREAM_URL: &str = "LIGHTSYNC_UPSTREAM_URL";
const ENV_SLICE_DEPTH: &str = "LIGHTSYNC_SLICE_DEPTH";
const ENV_NODE_ENV: &str = "LIGHTSYNC_NODE_ENV";
const ENV_ETH_ADDRS: &str = "LIGHTSYNC_ETH_ADDRS";
const ENV_POLL_INTERVAL_MS: &str = "LIGHTSYNC_POLL_INTERVAL_MS";
const ENV_DIAL_INTERVAL_MS: &str = "LIGHTSYNC_DIAL_INTERVAL_MS";
const ENV_IDENTITY_KEY: &str = "LIGHTSYNC_IDENTITY_KEY";
const ENV_OTEL_ENABLED: &str = "LIGHTSYNC_OTEL_ENABLED";
const ENV_OTEL_ENDPOINT: &str = "LIGHTSYNC_OTEL_ENDPOINT";

/// Every environment variable the binary reads.
pub const ENV_KEYS: &[&str] = &[
    ENV_CONFIG,
    ENV_LISTEN_ADDR,
    ENV_RPC_URL,
    ENV_UPSTREAM_URL,
    ENV_SLICE_DEPTH,
    ENV_NODE_ENV,
    ENV_ETH_ADDRS,
    ENV_POLL_INTERVAL_MS,
    ENV_DIAL_INTERVAL_MS,
    ENV_IDENTITY_KEY,
    ENV_OTEL_ENABLED,
    ENV_OTEL_ENDPOINT,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ConfigError {}

#[derive(Parser, Debug, Clone, Default)]
#[command(
    author,
    version,
    about = "Ethereum JSON-RPC endpoint served from a light-sync chain client"
)]
pub struct CliArgs {
    /// Optional JSON config file path.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen address, for example 127.0.0.1:8545.
    #[arg(long)]
    pub listen_addr: Option<String>,

    /// JSON-RPC node the chain client follows.
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Optional node that answers read-only calls the local stages cannot.
    #[arg(long)]
    pub upstream_url: Option<String>,

    /// Trie depth of requested state slices.
    #[arg(long)]
    pub slice_depth: Option<u8>,

    /// Node mode: dev or prod.
    #[arg(long)]
    pub node_env: Option<String>,

    /// Comma-separated list of watched account addresses.
    #[arg(long)]
    pub eth_addrs: Option<String>,

    /// Head polling interval in milliseconds.
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,

    /// Peer dial retry interval in milliseconds.
    #[arg(long)]
    pub dial_interval_ms: Option<u64>,

    /// Hex-encoded protobuf keypair. A fresh identity is generated when absent.
    #[arg(long)]
    pub identity_key: Option<String>,

    /// Export traces over OTLP.
    #[arg(long, action = ArgAction::SetTrue)]
    pub otel_enabled: bool,

    /// OTLP collector endpoint.
    #[arg(long)]
    pub otel_endpoint: Option<String>,

    /// Print the resolved configuration as JSON and exit.
    #[arg(long, action = ArgAction::SetTrue)]
    pub print_effective_config: bool,
}

impl CliArgs {
    fn otel_enabled_override(&self) -> Option<bool> {
        self.otel_enabled.then_some(true)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub listen_addr: Option<String>,
    pub upstream_url: Option<String>,
    pub identity_key: Option<String>,
    pub otel_enabled: Option<bool>,
    pub otel_endpoint: Option<String>,
    pub client: Option<ClientConfig>,
}

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub config: Option<PathBuf>,
    pub listen_addr: Option<String>,
    pub rpc_url: Option<String>,
    pub upstream_url: Option<String>,
    pub slice_depth: Option<u8>,
    pub node_env: Option<String>,
    pub eth_addrs: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub dial_interval_ms: Option<u64>,
    pub identity_key: Option<String>,
    pub otel_enabled: Option<bool>,
    pub otel_endpoint: Option<String>,
}

impl EnvConfig {
    pub fn from_process_env() -> Result<Self, ConfigError> {
        Self::from_lookup(env_var)
    }

    /// Read every known variable through `lookup`; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let slice_depth = match get(ENV_SLICE_DEPTH) {
            Some(raw) => Some(parse_u8_value(&raw, ENV_SLICE_DEPTH)?),
            None => None,
        };
        Ok(Self {
            config: get(ENV_CONFIG).map(PathBuf::from),
            listen_addr: get(ENV_LISTEN_ADDR),
            rpc_url: get(ENV_RPC_URL),
            upstream_url: get(ENV_UPSTREAM_URL),
            slice_depth,
            node_env: get(ENV_NODE_ENV),
            eth_addrs: get(ENV_ETH_ADDRS),
            poll_interval_ms: get(ENV_POLL_INTERVAL_MS)
                .map(|raw| parse_u64_value(&raw, ENV_POLL_INTERVAL_MS))
                .transpose()?,
            dial_interval_ms: get(ENV_DIAL_INTERVAL_MS)
                .map(|raw| parse_u64_value(&raw, ENV_DIAL_INTERVAL_MS))
                .transpose()?,
            identity_key: get(ENV_IDENTITY_KEY),
            otel_enabled: get(ENV_OTEL_ENABLED)
                .map(|raw| parse_bool_value(&raw, ENV_OTEL_ENABLED))
                .transpose()?,
            otel_endpoint: get(ENV_OTEL_ENDPOINT),
        })
    }
}

/// Fully resolved settings for one adapter process.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen_addr: SocketAddr,
    pub client: ClientConfig,
    pub upstream_url: Option<String>,
    pub identity_key: Option<Vec<u8>>,
    pub otel: OtelSettings,
}

impl RuntimeConfig {
    pub fn resolve(
        cli: CliArgs,
        env: EnvConfig,
        file: Option<FileConfig>,
    ) -> Result<Self, ConfigError> {
        let file = file.unwrap_or_default();

        let listen_raw = pick3(cli.listen_addr.clone(), env.listen_addr, file.listen_addr)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_raw.parse::<SocketAddr>().map_err(|e| {
            ConfigError::new(format!("invalid listen_addr '{}': {}", listen_raw, e))
        })?;

        let mut client = file.client.unwrap_or_default();
        if let Some(rpc_url) = cli.rpc_url.clone().or(env.rpc_url) {
            client.rpc_url = rpc_url;
        }
        if let Some(depth) = cli.slice_depth.or(env.slice_depth) {
            client.slice_depth = depth;
        }
        if let Some(raw) = cli.node_env.clone().or(env.node_env) {
            client.node_env = parse_node_env(&raw)?;
        }
        if let Some(raw) = cli.eth_addrs.clone().or(env.eth_addrs) {
            client.eth_addrs = split_list(&raw);
        }
        if let Some(ms) = cli.poll_interval_ms.or(env.poll_interval_ms) {
            client.poll_interval_ms = ms;
        }
        if let Some(ms) = cli.dial_interval_ms.or(env.dial_interval_ms) {
            client.dial_interval_ms = ms;
        }

        let identity_key = pick3(cli.identity_key.clone(), env.identity_key, file.identity_key)
            .map(|raw| parse_hex_bytes(&raw, "identity_key"))
            .transpose()?;

        let mut otel = OtelSettings::default();
        if let Some(enabled) = pick3(cli.otel_enabled_override(), env.otel_enabled, file.otel_enabled)
        {
            otel.enabled = enabled;
        }
        if let Some(endpoint) = pick3(cli.otel_endpoint.clone(), env.otel_endpoint, file.otel_endpoint)
        {
            otel.endpoint = endpoint;
        }
        otel.environment = match client.node_env {
            NodeEnv::Dev => "dev".to_string(),
            NodeEnv::Prod => "prod".to_string(),
        };

        Ok(Self {
            listen_addr,
            client,
            upstream_url: pick3(cli.upstream_url, env.upstream_url, file.upstream_url),
            identity_key,
            otel,
        })
    }

    /// Startup inputs derived from this configuration. Builds the upstream
    /// client when one is configured.
    pub fn startup_options(&self) -> Result<StartupOptions, ConfigError> {
        let upstream = match &self.upstream_url {
            Some(url) => {
                let api = HttpJsonRpc::new(url.clone()).map_err(|e| {
                    ConfigError::new(format!(
                        "invalid upstream_url '{}': {}",
                        sanitize_url_for_telemetry(url),
                        e
                    ))
                })?;
                Some(Arc::new(api) as Arc<dyn JsonRpcApi>)
            }
            None => None,
        };
        Ok(StartupOptions {
            identity_key: self.identity_key.clone(),
            client: self.client.clone(),
            pipeline: PipelineSettings {
                network_id: MAINNET_NETWORK_ID.to_string(),
                slice_depth: self.client.slice_depth,
                upstream,
            },
        })
    }

    pub fn effective(&self) -> EffectiveConfig {
        EffectiveConfig {
            listen_addr: self.listen_addr.to_string(),
            rpc_url: sanitize_url_for_telemetry(&self.client.rpc_url),
            upstream_url: self
                .upstream_url
                .as_deref()
                .map(sanitize_url_for_telemetry),
            node_env: self.client.node_env,
            slice_depth: self.client.slice_depth,
            eth_addrs: self.client.eth_addrs.clone(),
            slice_path: self.client.slice_path.clone(),
            libp2p_addrs: self.client.libp2p_addrs.clone(),
            libp2p_bootstrap: self.client.libp2p_bootstrap.clone(),
            poll_interval_ms: self.client.poll_interval_ms,
            dial_interval_ms: self.client.dial_interval_ms,
            identity_key_configured: self.identity_key.is_some(),
            otel_enabled: self.otel.enabled,
            otel_endpoint: sanitize_url_for_telemetry(&self.otel.endpoint),
        }
    }
}

/// What `--print-effective-config` prints. Secrets are reduced to flags and
/// URLs to scheme, host and port.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub listen_addr: String,
    pub rpc_url: String,
    pub upstream_url: Option<String>,
    pub node_env: NodeEnv,
    pub slice_depth: u8,
    pub eth_addrs: Vec<String>,
    pub slice_path: Vec<String>,
    pub libp2p_addrs: Vec<String>,
    pub libp2p_bootstrap: Vec<String>,
    pub poll_interval_ms: u64,
    pub dial_interval_ms: u64,
    pub identity_key_configured: bool,
    pub otel_enabled: bool,
    pub otel_endpoint: String,
}

/// Resolve the runtime configuration for `cli` against the process
/// environment and the config file, if one is named.
pub fn load(cli: CliArgs) -> Result<RuntimeConfig, ConfigError> {
    let env = EnvConfig::from_process_env()?;
    let file = match cli.config.clone().or_else(|| env.config.clone()) {
        Some(path) => Some(load_file_config(&path)?),
        None => None,
    };
    RuntimeConfig::resolve(cli, env, file)
}

pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ConfigError::new(format!(
            "failed to read config file '{}': {}",
            path.display(),
            e
        ))
    })?;

    parse_file_config(&raw).map_err(|e| {
        ConfigError::new(format!(
            "failed to parse config file '{}' as JSON: {}",
            path.display(),
            e
        ))
    })
}

fn parse_file_config(raw: &str) -> Result<FileConfig, serde_json::Error> {
    serde_json::from_str::<FileConfig>(raw)
}

fn pick3<T>(cli: Option<T>, env: Option<T>, file: Option<T>) -> Option<T> {
    cli.or(env).or(file)
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_node_env(raw: &str) -> Result<NodeEnv, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "dev" => Ok(NodeEnv::Dev),
        "prod" | "production" => Ok(NodeEnv::Prod),
        _ => Err(ConfigError::new(format!(
            "invalid node_env '{}', expected dev|prod",
            raw
        ))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}

fn parse_u64_value(raw: &str, field: &str) -> Result<u64, ConfigError> {
    if let Some(hex) = raw.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
            .map_err(|e| ConfigError::new(format!("invalid {} value '{}': {}", field, raw, e)))
    } else {
        raw.parse::<u64>()
            .map_err(|e| ConfigError::new(format!("invalid {} value '{}': {}", field, raw, e)))
    }
}

fn parse_u8_value(raw: &str, field: &str) -> Result<u8, ConfigError> {
    let value = parse_u64_value(raw, field)?;
    u8::try_from(value).map_err(|_| {
        ConfigError::new(format!(
            "invalid {} value '{}': must be at most {}",
            field,
            raw,
            u8::MAX
        ))
    })
}

fn parse_bool_value(raw: &str, field: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::new(format!(
            "invalid {} value '{}': expected true/false",
            field, raw
        ))),
    }
}

fn parse_hex_bytes(raw: &str, field: &str) -> Result<Vec<u8>, ConfigError> {
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(hex).map_err(|e| ConfigError::new(format!("invalid {} hex: {}", field, e)))
}
