//! Basic-block identifiers and the universe of blocks known for a scope.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Address-like identifier of a basic block.
///
/// Ordered by address so every iteration over blocks is deterministic.
/// Serialized as a `0x`-prefixed hex string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u64);

impl BlockId {
    pub fn addr(self) -> u64 {
        self.0
    }
}

impl From<u64> for BlockId {
    fn from(addr: u64) -> Self {
        BlockId(addr)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Error returned when a block address cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid block address: {0:?}")]
pub struct ParseBlockIdError(pub String);

impl FromStr for BlockId {
    type Err = ParseBlockIdError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(BlockId)
            .map_err(|_| ParseBlockIdError(s.to_string()))
    }
}

impl Serialize for BlockId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BlockId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BlockIdVisitor;

        impl Visitor<'_> for BlockIdVisitor {
            type Value = BlockId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a block address as hex string or integer")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<BlockId, E> {
                Ok(BlockId(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<BlockId, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(BlockIdVisitor)
    }
}

/// The set of blocks discovered by CFG recovery for one analysis scope.
///
/// Read-only once built. Changing scope means building a new universe.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUniverse {
    scope: String,
    blocks: BTreeSet<BlockId>,
}

impl BlockUniverse {
    pub fn new(scope: impl Into<String>, blocks: impl IntoIterator<Item = BlockId>) -> Self {
        Self {
            scope: scope.into(),
            blocks: blocks.into_iter().collect(),
        }
    }

    /// Label of the scope this universe describes (binary or function name).
    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.blocks.iter().copied()
    }

    pub fn blocks(&self) -> &BTreeSet<BlockId> {
        &self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_display_is_hex() {
        assert_eq!(BlockId(0x100).to_string(), "0x100");
        assert_eq!(BlockId(0).to_string(), "0x0");
    }

    #[test]
    fn test_block_id_parse() {
        assert_eq!("0x104".parse::<BlockId>().unwrap(), BlockId(0x104));
        assert_eq!("0X1f".parse::<BlockId>().unwrap(), BlockId(0x1f));
        assert_eq!("260".parse::<BlockId>().unwrap(), BlockId(260));
        assert!("0xzz".parse::<BlockId>().is_err());
        assert!("".parse::<BlockId>().is_err());
    }

    #[test]
    fn test_block_id_serde() {
        let json = serde_json::to_string(&BlockId(0x4010)).unwrap();
        assert_eq!(json, "\"0x4010\"");
        let back: BlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BlockId(0x4010));

        // Plain integers are accepted too.
        let from_int: BlockId = serde_json::from_str("16").unwrap();
        assert_eq!(from_int, BlockId(16));
    }

    #[test]
    fn test_block_id_as_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(BlockId(0x100), 3u64);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, "{\"0x100\":3}");
        let back: std::collections::BTreeMap<BlockId, u64> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn test_universe_is_ordered_and_deduplicated() {
        let universe = BlockUniverse::new(
            "main",
            [BlockId(0x108), BlockId(0x100), BlockId(0x104), BlockId(0x100)],
        );
        assert_eq!(universe.len(), 3);
        assert_eq!(universe.scope(), "main");
        let order: Vec<_> = universe.iter().collect();
        assert_eq!(order, vec![BlockId(0x100), BlockId(0x104), BlockId(0x108)]);
        assert!(universe.contains(BlockId(0x104)));
        assert!(!universe.contains(BlockId(0x10c)));
    }

    #[test]
    fn test_empty_universe() {
        let universe = BlockUniverse::default();
        assert!(universe.is_empty());
        assert_eq!(universe.len(), 0);
    }
}
