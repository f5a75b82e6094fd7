//! Peer identity of the local node.

use libp2p_identity::{Keypair, PeerId};

use crate::ClientError;

/// Cryptographic identity created once at startup.
#[derive(Clone)]
pub struct PeerIdentity {
    keypair: Keypair,
    peer_id: PeerId,
}

impl PeerIdentity {
    pub fn generate() -> Self {
        Self::from_keypair(Keypair::generate_ed25519())
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        let peer_id = keypair.public().to_peer_id();
        Self { keypair, peer_id }
    }

    /// Restore an identity previously exported with [`PeerIdentity::to_protobuf`].
    pub fn from_protobuf(bytes: &[u8]) -> Result<Self, ClientError> {
        let keypair = Keypair::from_protobuf_encoding(bytes)
            .map_err(|e| ClientError::Other(format!("invalid identity key: {}", e)))?;
        Ok(Self::from_keypair(keypair))
    }

    pub fn to_protobuf(&self) -> Result<Vec<u8>, ClientError> {
        self.keypair
            .to_protobuf_encoding()
            .map_err(|e| ClientError::Other(format!("identity export failed: {}", e)))
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Base-58 peer id string.
    pub fn id_b58(&self) -> String {
        self.peer_id.to_base58()
    }
}

impl std::fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerIdentity")
            .field("peer_id", &self.id_b58())
            .finish_non_exhaustive()
    }
}

/// Peer id plus the addresses it announces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer_id: String,
    pub listen_addrs: Vec<String>,
}

impl PeerInfo {
    pub fn derive(identity: &PeerIdentity, transport_addrs: &[String]) -> Self {
        let peer_id = identity.id_b58();
        let listen_addrs = transport_addrs
            .iter()
            .map(|addr| format!("{}/ipfs/{}", addr.trim_end_matches('/'), peer_id))
            .collect();
        Self {
            peer_id,
            listen_addrs,
        }
    }
}
