//! Ordered, fail-fast bring-up of the chain client and the request pipeline.
//!
//! Each [`Startup::advance`] performs exactly one step:
//!
//! | from            | to              | work                                             |
//! |-----------------|-----------------|--------------------------------------------------|
//! | `Idle`          | `IdentityReady` | validate client config, load or generate the peer identity, derive peer info |
//! | `IdentityReady` | `ClientReady`   | build the chain client, head tracker and pipeline |
//! | `ClientReady`   | `Started`       | subscribe the tracker, then start the client      |
//!
//! Any failure moves the machine to `Failed`, which is terminal.

use std::sync::Arc;

use lightsync_client::rpc::RpcChainClient;
use lightsync_client::{
    ChainClient, ClientConfig, ClientError, ConfigError, PeerIdentity, PeerInfo,
};
use lightsync_core::ChainEvent;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::head_tracker::HeadTracker;
use crate::pipeline::{build_pipeline, MiddlewarePipeline, PipelineSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupPhase {
    Idle,
    IdentityReady,
    ClientReady,
    Started,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    Config(ConfigError),
    Identity(ClientError),
    ClientConstruction(ClientError),
    ClientStart(ClientError),
    AlreadyStarted,
    AlreadyFailed,
}

impl std::fmt::Display for StartupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StartupError::Config(e) => write!(f, "invalid client config: {}", e),
            StartupError::Identity(e) => write!(f, "peer identity: {}", e),
            StartupError::ClientConstruction(e) => write!(f, "chain client construction: {}", e),
            StartupError::ClientStart(e) => write!(f, "chain client start: {}", e),
            StartupError::AlreadyStarted => write!(f, "startup already completed"),
            StartupError::AlreadyFailed => write!(f, "startup already failed"),
        }
    }
}

impl std::error::Error for StartupError {}

/// Builds the chain client once identity and peer info are known.
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        identity: &PeerIdentity,
        peer: &PeerInfo,
        config: &ClientConfig,
    ) -> Result<Arc<dyn ChainClient>, ClientError>;
}

/// Follows an upstream JSON-RPC node through [`RpcChainClient`].
#[derive(Debug, Default, Clone, Copy)]
pub struct RpcClientFactory;

impl ClientFactory for RpcClientFactory {
    fn build(
        &self,
        _identity: &PeerIdentity,
        peer: &PeerInfo,
        config: &ClientConfig,
    ) -> Result<Arc<dyn ChainClient>, ClientError> {
        Ok(Arc::new(RpcChainClient::new(config, peer)?))
    }
}

/// Inputs to startup.
#[derive(Clone, Default)]
pub struct StartupOptions {
    /// Protobuf-encoded keypair; a fresh ed25519 identity is generated when absent.
    pub identity_key: Option<Vec<u8>>,
    pub client: ClientConfig,
    pub pipeline: PipelineSettings,
}

/// Everything a running node consists of.
pub struct Node {
    pub identity: PeerIdentity,
    pub peer_info: PeerInfo,
    pub client: Arc<dyn ChainClient>,
    pub tracker: Arc<HeadTracker>,
    pub pipeline: Arc<MiddlewarePipeline>,
    /// Task feeding chain client events into the tracker.
    pub follower: JoinHandle<()>,
}

impl Node {
    pub fn shutdown(self) {
        self.follower.abort();
    }
}

enum Stage {
    Idle,
    IdentityReady {
        identity: PeerIdentity,
        peer_info: PeerInfo,
    },
    ClientReady {
        identity: PeerIdentity,
        peer_info: PeerInfo,
        client: Arc<dyn ChainClient>,
        tracker: Arc<HeadTracker>,
        pipeline: Arc<MiddlewarePipeline>,
    },
    Started(Node),
    Failed,
}

pub struct Startup {
    options: StartupOptions,
    factory: Arc<dyn ClientFactory>,
    stage: Stage,
}

impl Startup {
    pub fn new(options: StartupOptions, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            options,
            factory,
            stage: Stage::Idle,
        }
    }

    pub fn phase(&self) -> StartupPhase {
        match self.stage {
            Stage::Idle => StartupPhase::Idle,
            Stage::IdentityReady { .. } => StartupPhase::IdentityReady,
            Stage::ClientReady { .. } => StartupPhase::ClientReady,
            Stage::Started(_) => StartupPhase::Started,
            Stage::Failed => StartupPhase::Failed,
        }
    }

    /// Perform the next step and return the phase reached.
    pub async fn advance(&mut self) -> Result<StartupPhase, StartupError> {
        let current = std::mem::replace(&mut self.stage, Stage::Failed);
        let next = match current {
            Stage::Idle => self.load_identity(),
            Stage::IdentityReady {
                identity,
                peer_info,
            } => self.build_client(identity, peer_info),
            Stage::ClientReady {
                identity,
                peer_info,
                client,
                tracker,
                pipeline,
            } => Self::start_client(identity, peer_info, client, tracker, pipeline).await,
            Stage::Started(node) => {
                self.stage = Stage::Started(node);
                return Err(StartupError::AlreadyStarted);
            }
            Stage::Failed => return Err(StartupError::AlreadyFailed),
        };

        match next {
            Ok(stage) => {
                self.stage = stage;
                Ok(self.phase())
            }
            Err(e) => {
                error!(error = %e, "Startup failed");
                Err(e)
            }
        }
    }

    /// Drive startup to completion.
    pub async fn run(mut self) -> Result<Node, StartupError> {
        loop {
            match std::mem::replace(&mut self.stage, Stage::Failed) {
                Stage::Started(node) => return Ok(node),
                other => {
                    self.stage = other;
                    self.advance().await?;
                }
            }
        }
    }

    fn load_identity(&self) -> Result<Stage, StartupError> {
        self.options.client.validate().map_err(StartupError::Config)?;

        let identity = match &self.options.identity_key {
            Some(key) => PeerIdentity::from_protobuf(key).map_err(StartupError::Identity)?,
            None => PeerIdentity::generate(),
        };
        let peer_info = PeerInfo::derive(&identity, &self.options.client.libp2p_addrs);
        info!(peer_id = %peer_info.peer_id, "Peer identity ready");

        Ok(Stage::IdentityReady {
            identity,
            peer_info,
        })
    }

    fn build_client(
        &self,
        identity: PeerIdentity,
        peer_info: PeerInfo,
    ) -> Result<Stage, StartupError> {
        let client = self
            .factory
            .build(&identity, &peer_info, &self.options.client)
            .map_err(StartupError::ClientConstruction)?;
        let tracker = Arc::new(HeadTracker::new(Arc::clone(&client)));
        let pipeline = Arc::new(build_pipeline(
            Arc::clone(&client),
            Arc::clone(&tracker),
            self.options.pipeline.clone(),
        ));
        info!(stages = ?pipeline.stage_names(), "Request pipeline ready");

        Ok(Stage::ClientReady {
            identity,
            peer_info,
            client,
            tracker,
            pipeline,
        })
    }

    async fn start_client(
        identity: PeerIdentity,
        peer_info: PeerInfo,
        client: Arc<dyn ChainClient>,
        tracker: Arc<HeadTracker>,
        pipeline: Arc<MiddlewarePipeline>,
    ) -> Result<Stage, StartupError> {
        // Subscribe before start so no early event is missed.
        let events: broadcast::Receiver<ChainEvent> = client.subscribe();
        let follower = tracker.follow(events);

        if let Err(e) = client.start().await {
            follower.abort();
            return Err(StartupError::ClientStart(e));
        }
        info!(peer_id = %peer_info.peer_id, "Chain client started");

        Ok(Stage::Started(Node {
            identity,
            peer_info,
            client,
            tracker,
            pipeline,
            follower,
        }))
    }
}
