use crate::codec::SlotAddress;
use crate::error::Result;

/// A counts table with one shard per rank that any rank may update with
/// remote atomic adds.
///
/// Each `atomic_add` is indivisible with respect to every concurrent caller;
/// nothing orders two adds to different slots. An add is only guaranteed to
/// be visible to the owning rank once the issuing rank has called
/// [`quiesce`](RemoteAtomicTable::quiesce) and both have passed a barrier.
pub trait RemoteAtomicTable {
    fn slots_per_rank(&self) -> usize;

    fn atomic_add(&self, target: SlotAddress, delta: i64) -> Result<()>;

    /// Blocks until every add issued by this rank has been applied.
    fn quiesce(&self) -> Result<()>;

    /// Snapshot of this rank's own shard. Only meaningful past a barrier
    /// that follows the last remote update.
    fn local_shard(&self) -> Vec<i64>;
}

/// Slots of a shard that are not zero, in offset order.
pub fn residuals(shard: &[i64]) -> impl Iterator<Item = (usize, i64)> + '_ {
    shard
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, count)| count != 0)
}
