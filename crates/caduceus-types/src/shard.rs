//! The shard router: deterministic placement of records by partition key.
//!
//! Every staff, patient, and appointment record lives in exactly one of two
//! shards, selected by the parity of its department identifier. [`shard_of`]
//! is the single source of truth for that placement -- every other component
//! routes through it rather than re-deriving the rule, so a record can only
//! ever be looked for where it was stored.

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// One of the two shard ordinals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShardId {
    /// Shard 0: even partition keys.
    Zero,
    /// Shard 1: odd partition keys.
    One,
}

impl ShardId {
    /// Both shards, in the canonical read order (shard 0 then shard 1).
    pub const ALL: [Self; 2] = [Self::Zero, Self::One];

    /// The ordinal as an array index.
    pub const fn index(self) -> usize {
        match self {
            Self::Zero => 0,
            Self::One => 1,
        }
    }

    /// The other shard.
    pub const fn other(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

impl core::fmt::Display for ShardId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "shard {}", self.index())
    }
}

/// Map a partition key to its shard: `key mod 2`.
///
/// Pure and total over non-negative keys; deterministic across calls and
/// processes.
///
/// # Errors
///
/// Returns [`ModelError::InvalidKey`] for negative keys, which have no
/// defined placement.
pub const fn shard_of(partition_key: i64) -> Result<ShardId, ModelError> {
    if partition_key < 0 {
        return Err(ModelError::InvalidKey(partition_key));
    }
    if partition_key % 2 == 0 {
        Ok(ShardId::Zero)
    } else {
        Ok(ShardId::One)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_by_parity() {
        assert_eq!(shard_of(0), Ok(ShardId::Zero));
        assert_eq!(shard_of(1), Ok(ShardId::One));
        assert_eq!(shard_of(2), Ok(ShardId::Zero));
        assert_eq!(shard_of(1_000_001), Ok(ShardId::One));
    }

    #[test]
    fn rejects_negative_keys() {
        assert_eq!(shard_of(-1), Err(ModelError::InvalidKey(-1)));
        assert_eq!(shard_of(i64::MIN), Err(ModelError::InvalidKey(i64::MIN)));
    }

    #[test]
    fn is_deterministic() {
        for key in 0..1_000 {
            assert_eq!(shard_of(key), shard_of(key));
        }
    }

    #[test]
    fn other_is_an_involution() {
        assert_eq!(ShardId::Zero.other(), ShardId::One);
        assert_eq!(ShardId::One.other().other(), ShardId::One);
    }

    #[test]
    fn read_order_is_zero_then_one() {
        assert_eq!(ShardId::ALL, [ShardId::Zero, ShardId::One]);
        assert_eq!(ShardId::Zero.index(), 0);
        assert_eq!(ShardId::One.index(), 1);
    }
}
