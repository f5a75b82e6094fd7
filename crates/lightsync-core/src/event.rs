use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::constants::UNKNOWN_HEAD;

/// Notification pushed by a chain client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A new canonical head.
    Latest(Arc<Block>),
    /// The tip changed, possibly replacing `old_block`.
    Sync {
        new_block: Option<Arc<Block>>,
        old_block: Option<Arc<Block>>,
    },
}

/// Head change re-emitted by the head tracker, numbers as hex quantities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub new_block: String,
    pub old_block: String,
}

impl SyncEvent {
    pub fn from_blocks(new_block: Option<&Block>, old_block: Option<&Block>) -> Self {
        Self {
            new_block: hex_or_unknown(new_block),
            old_block: hex_or_unknown(old_block),
        }
    }
}

fn hex_or_unknown(block: Option<&Block>) -> String {
    block
        .map(Block::number_hex)
        .unwrap_or_else(|| UNKNOWN_HEAD.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadEvent {
    Latest(String),
    Sync(SyncEvent),
}

impl HeadEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            HeadEvent::Latest(_) => EventKind::Latest,
            HeadEvent::Sync(_) => EventKind::Sync,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Latest,
    Sync,
}
