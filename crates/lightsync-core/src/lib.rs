mod block;
mod constants;
mod event;
mod quantity;
mod slice;

pub use block::{Block, BlockHeader, RpcBlock};
pub use constants::{
    DEFAULT_SLICE_DEPTH, EMPTY_TRIE_ROOT, MAINNET_NETWORK_ID, SLICE_PATH_NIBBLES, UNKNOWN_HEAD,
};
pub use event::{ChainEvent, EventKind, HeadEvent, SyncEvent};
pub use quantity::{fixed_hex, parse_quantity, to_quantity, BlockRef, InvalidBlockRef};
pub use slice::{slice_path_for, SliceAccount, SliceId, SliceRequest, StateSlice};
