//! The distributed-memory runtime the benchmark runs on.
//!
//! The core only needs rank identity, barriers, scalar reductions and a
//! collectively allocated [`RemoteAtomicTable`]. Two backends provide them:
//! [`threads`] runs every rank as a thread of this process, and
//! `lamellar_backend` runs one rank per lamellar PE.

use crate::error::Result;
use crate::table::RemoteAtomicTable;

#[cfg(feature = "lamellar-backend")]
pub mod lamellar_backend;
pub mod threads;

/// Collective operations; every rank must make the same sequence of calls.
pub trait Collective {
    fn my_rank(&self) -> usize;

    fn num_ranks(&self) -> usize;

    /// Blocks until every rank has called `barrier`.
    fn barrier(&self) -> Result<()>;

    /// Sum of `value` over all ranks, returned on every rank.
    fn sum_f64(&self, value: f64) -> Result<f64>;

    fn sum_u64(&self, value: u64) -> Result<u64>;

    fn mean_f64(&self, value: f64) -> Result<f64> {
        Ok(self.sum_f64(value)? / self.num_ranks() as f64)
    }
}

pub trait PgasRuntime: Collective {
    type Table: RemoteAtomicTable;

    /// Collectively allocates a zeroed table with `slots_per_rank` counters
    /// on every rank.
    fn alloc_table(&self, slots_per_rank: usize) -> Result<Self::Table>;

    fn name(&self) -> &'static str;
}
