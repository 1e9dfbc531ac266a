//! In-process backend: every rank is an OS thread and every shard is a
//! boxed slice of `AtomicI64` shared through an `Arc`.
//!
//! A rank that fails poisons the team barrier, so peers blocked in (or
//! arriving at) a barrier get [`HistoError::PeerAborted`] instead of
//! waiting forever.

use super::{Collective, PgasRuntime};
use crate::codec::SlotAddress;
use crate::error::{HistoError, Result};
use crate::table::RemoteAtomicTable;

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

struct BarrierState {
    arrived: usize,
    generation: u64,
    poisoned: bool,
}

struct PhaseBarrier {
    parties: usize,
    state: Mutex<BarrierState>,
    cvar: Condvar,
}

impl PhaseBarrier {
    fn new(parties: usize) -> Self {
        PhaseBarrier {
            parties,
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
                poisoned: false,
            }),
            cvar: Condvar::new(),
        }
    }

    fn wait(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.poisoned {
            return Err(HistoError::PeerAborted);
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived == self.parties {
            state.arrived = 0;
            state.generation = generation.wrapping_add(1);
            self.cvar.notify_all();
            return Ok(());
        }
        while state.generation == generation && !state.poisoned {
            self.cvar.wait(&mut state);
        }
        if state.generation == generation {
            Err(HistoError::PeerAborted)
        } else {
            Ok(())
        }
    }

    fn poison(&self) {
        let mut state = self.state.lock();
        state.poisoned = true;
        self.cvar.notify_all();
    }
}

type Shard = Arc<[AtomicI64]>;

struct TeamShared {
    barrier: PhaseBarrier,
    // one reduction slot per rank
    scratch: Vec<AtomicU64>,
    // shards published during a collective allocation
    staging: Mutex<Vec<Option<Shard>>>,
}

/// One rank's handle on an in-process team.
pub struct ThreadTeam {
    rank: usize,
    shared: Arc<TeamShared>,
}

impl ThreadTeam {
    fn all_gather(&self, bits: u64) -> Result<Vec<u64>> {
        self.shared.scratch[self.rank].store(bits, Ordering::Relaxed);
        self.barrier()?;
        let gathered = self
            .shared
            .scratch
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        // nobody may overwrite a slot before every rank has read it
        self.barrier()?;
        Ok(gathered)
    }
}

impl Collective for ThreadTeam {
    fn my_rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.shared.barrier.parties
    }

    fn barrier(&self) -> Result<()> {
        self.shared.barrier.wait()
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

impl PgasRuntime for ThreadTeam {
    type Table = ThreadTable;

    fn alloc_table(&self, slots_per_rank: usize) -> Result<ThreadTable> {
        let shard = allocate_shard(slots_per_rank)?;
        self.shared.staging.lock()[self.rank] = Some(shard);
        self.barrier()?;
        let shards = self
            .shared
            .staging
            .lock()
            .iter()
            .map(|s| {
                s.clone()
                    .ok_or_else(|| HistoError::primitive("alloc_table", "a rank published no shard"))
            })
            .collect::<Result<Vec<Shard>>>()?;
        let mismatch = shards.iter().any(|s| s.len() != slots_per_rank);
        self.barrier()?;
        self.shared.staging.lock()[self.rank] = None;
        if mismatch {
            return Err(HistoError::Configuration(
                "ranks disagree on the table size".to_string(),
            ));
        }
        Ok(ThreadTable {
            rank: self.rank,
            slots_per_rank,
            shards,
        })
    }

    fn name(&self) -> &'static str {
        "threads"
    }
}

fn allocate_shard(slots: usize) -> Result<Shard> {
    let mut cells = Vec::new();
    cells
        .try_reserve_exact(slots)
        .map_err(|e| HistoError::Allocation {
            what: "histogram shard",
            reason: e.to_string(),
        })?;
    cells.extend((0..slots).map(|_| AtomicI64::new(0)));
    Ok(Shard::from(cells))
}

/// One rank's view of an in-process table: its own shard plus handles on
/// every peer's.
pub struct ThreadTable {
    rank: usize,
    slots_per_rank: usize,
    shards: Vec<Shard>,
}

impl RemoteAtomicTable for ThreadTable {
    fn slots_per_rank(&self) -> usize {
        self.slots_per_rank
    }

    #[inline]
    fn atomic_add(&self, target: SlotAddress, delta: i64) -> Result<()> {
        let cell = self
            .shards
            .get(target.rank)
            .and_then(|shard| shard.get(target.offset))
            .ok_or_else(|| {
                HistoError::primitive(
                    "atomic_add",
                    format!("no slot {} on rank {}", target.offset, target.rank),
                )
            })?;
        cell.fetch_add(delta, Ordering::Relaxed);
        Ok(())
    }

    fn quiesce(&self) -> Result<()> {
        // adds are applied before fetch_add returns
        Ok(())
    }

    fn local_shard(&self) -> Vec<i64> {
        self.shards[self.rank]
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }
}

struct PoisonOnDrop<'a> {
    barrier: &'a PhaseBarrier,
    armed: bool,
}

impl Drop for PoisonOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.barrier.poison();
        }
    }
}

/// Runs `f` once per rank on `ranks` threads and collects the results in
/// rank order.
///
/// If any rank fails or panics, the run is aborted and the first failure
/// that is not a consequence of another rank aborting is returned.
pub fn run_spmd<T, F>(ranks: usize, f: F) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&ThreadTeam) -> Result<T> + Sync,
{
    if ranks == 0 {
        return Err(HistoError::Configuration(
            "at least one rank is required".to_string(),
        ));
    }
    let shared = Arc::new(TeamShared {
        barrier: PhaseBarrier::new(ranks),
        scratch: (0..ranks).map(|_| AtomicU64::new(0)).collect(),
        staging: Mutex::new(vec![None; ranks]),
    });

    std::thread::scope(|s| {
        let mut handles = Vec::with_capacity(ranks);
        for rank in 0..ranks {
            let team = ThreadTeam {
                rank,
                shared: shared.clone(),
            };
            let f = &f;
            let spawned = std::thread::Builder::new()
                .name(format!("rank-{rank}"))
                .spawn_scoped(s, move || {
                    let mut guard = PoisonOnDrop {
                        barrier: &team.shared.barrier,
                        armed: true,
                    };
                    let res = f(&team);
                    guard.armed = res.is_err();
                    res
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    shared.barrier.poison();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(HistoError::primitive(
                        "spawn",
                        format!("could not start rank {rank}: {e}"),
                    ));
                }
            }
        }

        let mut results = Vec::with_capacity(ranks);
        let mut failure: Option<HistoError> = None;
        for (rank, handle) in handles.into_iter().enumerate() {
            let err = match handle.join() {
                Ok(Ok(value)) => {
                    results.push(value);
                    continue;
                }
                Ok(Err(e)) => e,
                Err(_) => HistoError::primitive("rank", format!("rank {rank} panicked")),
            };
            failure = match failure {
                None | Some(HistoError::PeerAborted) => Some(err),
                first => first,
            };
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_rank_identity() {
        let ids = run_spmd(5, |team| Ok((team.my_rank(), team.num_ranks()))).unwrap();
        assert_eq!(ids, (0..5).map(|r| (r, 5)).collect::<Vec<_>>());
    }

    #[test]
    fn sums_reach_every_rank() {
        let sums = run_spmd(4, |team| {
            let f = team.sum_f64(team.my_rank() as f64 + 0.5)?;
            let u = team.sum_u64(team.my_rank() as u64 * 10)?;
            let again = team.sum_u64(1)?;
            Ok((f, u, again))
        })
        .unwrap();
        for (f, u, again) in sums {
            assert_eq!(f, 8.0);
            assert_eq!(u, 60);
            assert_eq!(again, 4);
        }
    }

    #[test]
    fn mean_divides_by_rank_count() {
        let means = run_spmd(4, |team| team.mean_f64(team.my_rank() as f64)).unwrap();
        assert!(means.iter().all(|&m| m == 1.5));
    }

    #[test]
    fn fresh_table_is_zero() {
        let shards = run_spmd(3, |team| Ok(team.alloc_table(17)?.local_shard())).unwrap();
        for shard in shards {
            assert_eq!(shard, vec![0; 17]);
        }
    }

    #[test]
    fn remote_adds_land_on_owner() {
        let shards = run_spmd(3, |team| {
            let table = team.alloc_table(2)?;
            let next = (team.my_rank() + 1) % team.num_ranks();
            table.atomic_add(SlotAddress { rank: next, offset: 1 }, 5)?;
            table.quiesce()?;
            team.barrier()?;
            Ok(table.local_shard())
        })
        .unwrap();
        for shard in shards {
            assert_eq!(shard, vec![0, 5]);
        }
    }

    #[test]
    fn concurrent_adds_to_one_slot_are_not_lost() {
        let shards = run_spmd(4, |team| {
            let table = team.alloc_table(1)?;
            team.barrier()?;
            for _ in 0..10_000 {
                table.atomic_add(SlotAddress { rank: 0, offset: 0 }, 1)?;
            }
            table.quiesce()?;
            team.barrier()?;
            Ok(table.local_shard())
        })
        .unwrap();
        assert_eq!(shards[0], vec![40_000]);
    }

    #[test]
    fn out_of_range_add_is_an_error() {
        let res = run_spmd(2, |team| {
            let table = team.alloc_table(4)?;
            table.atomic_add(SlotAddress { rank: 2, offset: 0 }, 1)
        });
        assert!(matches!(
            res,
            Err(HistoError::RuntimePrimitive { op: "atomic_add", .. })
        ));
    }

    #[test]
    fn failing_rank_releases_peers() {
        let res = run_spmd(3, |team| {
            if team.my_rank() == 1 {
                return Err(HistoError::Configuration("boom".to_string()));
            }
            team.barrier()?;
            team.barrier()
        });
        assert!(matches!(res, Err(HistoError::Configuration(_))));
    }

    #[test]
    fn panicking_rank_releases_peers() {
        let res = run_spmd(2, |team| {
            if team.my_rank() == 0 {
                panic!("rank 0 gives up");
            }
            team.barrier()
        });
        assert!(matches!(res, Err(HistoError::RuntimePrimitive { op: "rank", .. })));
    }

    #[test]
    fn zero_ranks_is_rejected() {
        assert!(matches!(
            run_spmd(0, |_| Ok(())),
            Err(HistoError::Configuration(_))
        ));
    }
}
