use std::fmt;
use std::str::FromStr;

/// Format a number as a canonical JSON-RPC quantity (`0x0`, `0x2a`, ...).
pub fn to_quantity(value: u64) -> String {
    format!("0x{:x}", value)
}

/// Parse an optionally 0x-prefixed hex quantity.
pub fn parse_quantity(s: &str) -> Option<u64> {
    let hex = s.strip_prefix("0x").unwrap_or(s);
    if hex.is_empty() {
        return None;
    }
    u64::from_str_radix(hex, 16).ok()
}

/// Fixed-width lower-case hex with a `0x` prefix.
pub fn fixed_hex(bytes: impl AsRef<[u8]>) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Block parameter of a JSON-RPC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockRef {
    Latest,
    Pending,
    Earliest,
    Number(u64),
}

impl BlockRef {
    /// True for tags that name the moving chain head.
    pub fn is_head_tag(&self) -> bool {
        matches!(self, BlockRef::Latest | BlockRef::Pending)
    }

    pub fn as_number(&self) -> Option<u64> {
        match self {
            BlockRef::Number(n) => Some(*n),
            BlockRef::Earliest => Some(0),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidBlockRef(pub String);

impl fmt::Display for InvalidBlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid block reference '{}'", self.0)
    }
}

impl std::error::Error for InvalidBlockRef {}

impl FromStr for BlockRef {
    type Err = InvalidBlockRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(BlockRef::Latest),
            "pending" => Ok(BlockRef::Pending),
            "earliest" => Ok(BlockRef::Earliest),
            other if other.starts_with("0x") => parse_quantity(other)
                .map(BlockRef::Number)
                .ok_or_else(|| InvalidBlockRef(other.to_string())),
            other => Err(InvalidBlockRef(other.to_string())),
        }
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockRef::Latest => f.write_str("latest"),
            BlockRef::Pending => f.write_str("pending"),
            BlockRef::Earliest => f.write_str("earliest"),
            BlockRef::Number(n) => f.write_str(&to_quantity(*n)),
        }
    }
}
