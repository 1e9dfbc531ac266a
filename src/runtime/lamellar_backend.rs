//! Lamellar backend: one rank per PE of a [`LamellarWorld`].
//!
//! Each shard is a `Darc<Vec<AtomicI64>>`. A remote atomic add is an active
//! message carrying the packed request to the owning PE, which applies it
//! with `fetch_add`. Scalar reductions all-gather through a scratch `Darc`
//! owned by the runtime handle.

use super::{Collective, PgasRuntime};
use crate::codec::{PackedRequest, SlotAddress};
use crate::error::{HistoError, Result};
use crate::table::RemoteAtomicTable;

use lamellar::active_messaging::prelude::*;
use lamellar::darc::prelude::*;

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

#[lamellar::AmData(Clone, Debug)]
struct AtomicAddAm {
    request: PackedRequest,
    delta: i64,
    counts: Darc<Vec<AtomicI64>>,
}

#[lamellar::am]
impl LamellarAM for AtomicAddAm {
    async fn exec(self) {
        self.counts[self.request.offset()].fetch_add(self.delta, Ordering::Relaxed);
    }
}

#[lamellar::AmData(Clone, Debug)]
struct ReduceSlotAm {
    slot: usize,
    bits: u64,
    scratch: Darc<Vec<AtomicU64>>,
}

#[lamellar::am]
impl LamellarAM for ReduceSlotAm {
    async fn exec(self) {
        self.scratch[self.slot].store(self.bits, Ordering::Relaxed);
    }
}

fn new_darc<T: Send + Sync + 'static>(
    world: &LamellarWorld,
    what: &'static str,
    item: T,
) -> Result<Darc<T>> {
    Darc::new(world, item).block().map_err(|e| HistoError::Allocation {
        what,
        reason: format!("{e:?}"),
    })
}

pub struct LamellarRuntime {
    world: LamellarWorld,
    scratch: Darc<Vec<AtomicU64>>,
}

impl LamellarRuntime {
    /// Wraps an initialized world. Collective: every PE must call it.
    pub fn new(world: LamellarWorld) -> Result<Self> {
        let scratch: Vec<AtomicU64> = (0..world.num_pes()).map(|_| AtomicU64::new(0)).collect();
        let scratch = new_darc(&world, "reduction scratch", scratch)?;
        Ok(LamellarRuntime { world, scratch })
    }

    fn all_gather(&self, bits: u64) -> Result<Vec<u64>> {
        // nobody may still be reading the previous reduction
        self.world.barrier();
        let my_pe = self.world.my_pe();
        for pe in 0..self.world.num_pes() {
            let _ = self
                .world
                .exec_am_pe(
                    pe,
                    ReduceSlotAm {
                        slot: my_pe,
                        bits,
                        scratch: self.scratch.clone(),
                    },
                )
                .spawn();
        }
        self.world.wait_all();
        self.world.barrier();
        Ok(self
            .scratch
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect())
    }
}

impl Collective for LamellarRuntime {
    fn my_rank(&self) -> usize {
        self.world.my_pe()
    }

    fn num_ranks(&self) -> usize {
        self.world.num_pes()
    }

    fn barrier(&self) -> Result<()> {
        self.world.barrier();
        Ok(())
    }

    fn sum_f64(&self, value: f64) -> Result<f64> {
        Ok(self
            .all_gather(value.to_bits())?
            .into_iter()
            .map(f64::from_bits)
            .sum())
    }

    fn sum_u64(&self, value: u64) -> Result<u64> {
        Ok(self.all_gather(value)?.into_iter().sum())
    }
}

impl PgasRuntime for LamellarRuntime {
    type Table = LamellarTable;

    fn alloc_table(&self, slots_per_rank: usize) -> Result<LamellarTable> {
        let mut cells = Vec::new();
        let reserved = cells.try_reserve_exact(slots_per_rank);
        // every PE must agree before entering the collective Darc::new
        let failed_pes = self.sum_u64(reserved.is_err() as u64)?;
        if let Err(e) = reserved {
            return Err(HistoError::Allocation {
                what: "histogram shard",
                reason: e.to_string(),
            });
        }
        if failed_pes > 0 {
            return Err(HistoError::Allocation {
                what: "histogram shard",
                reason: format!("{failed_pes} pe(s) could not reserve {slots_per_rank} slots"),
            });
        }
        cells.extend((0..slots_per_rank).map(|_| AtomicI64::new(0)));
        let counts = new_darc(&self.world, "histogram shard", cells)?;
        Ok(LamellarTable {
            world: self.world.clone(),
            num_pes: self.world.num_pes(),
            slots_per_rank,
            counts,
        })
    }

    fn name(&self) -> &'static str {
        "lamellar"
    }
}

pub struct LamellarTable {
    world: LamellarWorld,
    num_pes: usize,
    slots_per_rank: usize,
    counts: Darc<Vec<AtomicI64>>,
}

impl RemoteAtomicTable for LamellarTable {
    fn slots_per_rank(&self) -> usize {
        self.slots_per_rank
    }

    #[inline]
    fn atomic_add(&self, target: SlotAddress, delta: i64) -> Result<()> {
        if target.rank >= self.num_pes || target.offset >= self.slots_per_rank {
            return Err(HistoError::primitive(
                "atomic_add",
                format!("no slot {} on pe {}", target.offset, target.rank),
            ));
        }
        let _ = self
            .world
            .exec_am_pe(
                target.rank,
                AtomicAddAm {
                    request: PackedRequest::pack(target),
                    delta,
                    counts: self.counts.clone(),
                },
            )
            .spawn(); // completion is awaited in quiesce
        Ok(())
    }

    fn quiesce(&self) -> Result<()> {
        self.world.wait_all();
        Ok(())
    }

    fn local_shard(&self) -> Vec<i64> {
        self.counts
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}
