use crate::codec::AddressCodec;
use crate::error::{HistoError, Result};
use crate::requests::RequestList;
use crate::runtime::{Collective, PgasRuntime};
use crate::table::RemoteAtomicTable;

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Timing,
}

/// Requests must have been laid out for this runtime and this table.
pub(crate) fn check_layout<R: PgasRuntime>(
    runtime: &R,
    table: &R::Table,
    codec: &AddressCodec,
) -> Result<()> {
    if codec.rank_count() != runtime.num_ranks() || codec.slots_per_rank() != table.slots_per_rank()
    {
        return Err(HistoError::Configuration(format!(
            "requests address {} ranks x {} slots but the table spans {} ranks x {} slots",
            codec.rank_count(),
            codec.slots_per_rank(),
            runtime.num_ranks(),
            table.slots_per_rank()
        )));
    }
    Ok(())
}

/// Timings of one update pass.
///
/// `issue`, `local` and `global` are this rank's: all adds issued, all of
/// this rank's adds applied, and the closing barrier passed. `mean_secs` is
/// the global time averaged over every rank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseTiming {
    pub issue: Duration,
    pub local: Duration,
    pub global: Duration,
    pub mean_secs: f64,
}

/// Drives the timed bulk-update phase.
pub struct UpdateEngine<'a, R: PgasRuntime> {
    runtime: &'a R,
    table: &'a R::Table,
    state: EngineState,
    runs_completed: u64,
}

impl<'a, R: PgasRuntime> UpdateEngine<'a, R> {
    pub fn new(runtime: &'a R, table: &'a R::Table) -> Self {
        UpdateEngine {
            runtime,
            table,
            state: EngineState::Idle,
            runs_completed: 0,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs_completed
    }

    /// Applies `+1` for every request, in list order, between two barriers.
    ///
    /// Collective. Any error is fatal to the run.
    #[tracing::instrument(skip_all, fields(rank = self.runtime.my_rank(), run = self.runs_completed))]
    pub fn run(&mut self, requests: &RequestList) -> Result<PhaseTiming> {
        check_layout(self.runtime, self.table, requests.codec())?;
        self.runtime.barrier()?;
        let started = Instant::now();
        self.state = EngineState::Timing;

        for &request in requests.packed() {
            self.table.atomic_add(request.decode(), 1)?;
        }
        let issue = started.elapsed();
        self.table.quiesce()?;
        let local = started.elapsed();
        self.runtime.barrier()?;
        let global = started.elapsed();
        self.state = EngineState::Idle;
        self.runs_completed += 1;

        let mean_secs = self.runtime.mean_f64(global.as_secs_f64())?;
        tracing::debug!(?issue, ?local, ?global, mean_secs, "update pass done");
        Ok(PhaseTiming {
            issue,
            local,
            global,
            mean_secs,
        })
    }
}
