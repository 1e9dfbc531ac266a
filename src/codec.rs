//! Mapping between flat global table indices and the rank/offset pair that
//! owns them.
//!
//! The table is distributed cyclically: global index `g` lives on rank
//! `g % rank_count` at local offset `g / rank_count`. Requests are packed
//! into a single `u64` (rank in the low [`RANK_BITS`] bits, offset above)
//! so the update loop never has to divide.

use crate::error::{HistoError, Result};
use serde::{Deserialize, Serialize};

/// A flat index into the logical distributed table.
pub type GlobalIndex = u64;

/// Width of the rank field of a [`PackedRequest`].
pub const RANK_BITS: u32 = 16;
/// Largest supported number of ranks.
pub const MAX_RANKS: usize = 1 << RANK_BITS;
/// Largest supported local offset.
pub const MAX_LOCAL_OFFSET: u64 = u64::MAX >> RANK_BITS;

const RANK_MASK: u64 = (1 << RANK_BITS) - 1;

// every rank id must fit the rank field
const _: () = assert!((MAX_RANKS - 1) as u64 <= RANK_MASK);

/// A decoded table address: which rank owns the slot, and where in its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotAddress {
    pub rank: usize,
    pub offset: usize,
}

/// A [`SlotAddress`] packed into one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackedRequest(u64);

impl PackedRequest {
    /// Packs an address. The caller guarantees the address came from a
    /// validated [`AddressCodec`].
    #[inline]
    pub fn pack(addr: SlotAddress) -> Self {
        debug_assert!(addr.rank < MAX_RANKS);
        debug_assert!(addr.offset as u64 <= MAX_LOCAL_OFFSET);
        PackedRequest(((addr.offset as u64) << RANK_BITS) | (addr.rank as u64 & RANK_MASK))
    }

    #[inline]
    pub fn rank(self) -> usize {
        (self.0 & RANK_MASK) as usize
    }

    #[inline]
    pub fn offset(self) -> usize {
        (self.0 >> RANK_BITS) as usize
    }

    #[inline]
    pub fn decode(self) -> SlotAddress {
        SlotAddress {
            rank: self.rank(),
            offset: self.offset(),
        }
    }
}

/// Converts global indices for one table geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressCodec {
    rank_count: usize,
    slots_per_rank: usize,
}

impl AddressCodec {
    pub fn new(rank_count: usize, slots_per_rank: usize) -> Result<Self> {
        if rank_count == 0 || rank_count > MAX_RANKS {
            return Err(HistoError::Configuration(format!(
                "rank count {rank_count} must be in 1..={MAX_RANKS} to fit the {RANK_BITS}-bit rank field"
            )));
        }
        if slots_per_rank == 0 || slots_per_rank as u64 - 1 > MAX_LOCAL_OFFSET {
            return Err(HistoError::Configuration(format!(
                "table size per rank {slots_per_rank} must be in 1..={}",
                MAX_LOCAL_OFFSET as u128 + 1
            )));
        }
        (slots_per_rank as u64)
            .checked_mul(rank_count as u64)
            .ok_or_else(|| {
                HistoError::Configuration(format!(
                    "table of {slots_per_rank} slots on {rank_count} ranks overflows a 64-bit index"
                ))
            })?;
        Ok(AddressCodec {
            rank_count,
            slots_per_rank,
        })
    }

    pub fn rank_count(&self) -> usize {
        self.rank_count
    }

    pub fn slots_per_rank(&self) -> usize {
        self.slots_per_rank
    }

    pub fn total_slots(&self) -> u64 {
        self.slots_per_rank as u64 * self.rank_count as u64
    }

    /// Splits a global index into its owner and local offset.
    ///
    /// Panics if `global` is outside the table.
    #[inline]
    pub fn split(&self, global: GlobalIndex) -> SlotAddress {
        assert!(
            global < self.total_slots(),
            "global index {global} outside table of {} slots",
            self.total_slots()
        );
        let ranks = self.rank_count as u64;
        SlotAddress {
            rank: (global % ranks) as usize,
            offset: (global / ranks) as usize,
        }
    }

    #[inline]
    pub fn encode(&self, global: GlobalIndex) -> PackedRequest {
        PackedRequest::pack(self.split(global))
    }

    pub fn global_index(&self, addr: SlotAddress) -> GlobalIndex {
        addr.offset as u64 * self.rank_count as u64 + addr.rank as u64
    }
}
