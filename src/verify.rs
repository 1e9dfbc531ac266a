use crate::engine::check_layout;
use crate::error::{HistoError, Result};
use crate::requests::RequestList;
use crate::runtime::{Collective, PgasRuntime};
use crate::table::{residuals, RemoteAtomicTable};

/// Violations logged per rank; the rest are only counted.
pub const MAX_REPORTED_VIOLATIONS: usize = 5;

/// A slot left nonzero after the inverse pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub offset: usize,
    pub residual: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationReport {
    /// nonzero slots in this rank's shard
    pub local_errors: u64,
    /// nonzero slots summed over every rank
    pub total_errors: u64,
    /// the first few of this rank's violations
    pub reported: Vec<Violation>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.total_errors == 0
    }
}

/// Undoes `runs_completed` update passes and checks every shard is back
/// to zero.
pub struct VerificationPass<'a, R: PgasRuntime> {
    runtime: &'a R,
    table: &'a R::Table,
}

impl<'a, R: PgasRuntime> VerificationPass<'a, R> {
    pub fn new(runtime: &'a R, table: &'a R::Table) -> Self {
        VerificationPass { runtime, table }
    }

    /// Collective. Replays the raw indices (not the packed form) with
    /// `-runs_completed` each, then scans the local shard.
    #[tracing::instrument(skip_all, fields(rank = self.runtime.my_rank()))]
    pub fn run(&self, requests: &RequestList, runs_completed: u64) -> Result<VerificationReport> {
        let codec = requests.codec();
        check_layout(self.runtime, self.table, codec)?;
        let delta = i64::try_from(runs_completed)
            .map(|runs| -runs)
            .map_err(|_| {
                HistoError::Configuration(format!(
                    "{runs_completed} update passes cannot be undone with a 64-bit delta"
                ))
            })?;

        self.runtime.barrier()?;
        for &global in requests.indices() {
            self.table.atomic_add(codec.split(global), delta)?;
        }
        self.table.quiesce()?;
        self.runtime.barrier()?;

        let shard = self.table.local_shard();
        let mut local_errors = 0u64;
        let mut reported = Vec::new();
        for (offset, residual) in residuals(&shard) {
            local_errors += 1;
            if reported.len() < MAX_REPORTED_VIOLATIONS {
                tracing::error!(
                    rank = self.runtime.my_rank(),
                    offset,
                    residual,
                    "slot did not return to zero"
                );
                reported.push(Violation { offset, residual });
            }
        }

        let total_errors = self.runtime.sum_u64(local_errors)?;
        Ok(VerificationReport {
            local_errors,
            total_errors,
            reported,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{AddressCodec, SlotAddress};
    use crate::engine::UpdateEngine;
    use crate::runtime::threads::run_spmd;

    #[test]
    fn inverse_pass_restores_zero() {
        let reports = run_spmd(4, |team| {
            let codec = AddressCodec::new(4, 8)?;
            let table = team.alloc_table(8)?;
            let requests = RequestList::from_indices(codec, vec![0, 31, 7, 7, 12])?;
            let mut engine = UpdateEngine::new(team, &table);
            engine.run(&requests)?;
            engine.run(&requests)?;
            let report =
                VerificationPass::new(team, &table).run(&requests, engine.runs_completed())?;
            assert_eq!(table.local_shard(), vec![0; 8]);
            Ok(report)
        })
        .unwrap();
        for report in reports {
            assert!(report.passed());
            assert_eq!(report.local_errors, 0);
            assert!(report.reported.is_empty());
        }
    }

    #[test]
    fn stray_update_is_counted_everywhere() {
        let reports = run_spmd(2, |team| {
            let codec = AddressCodec::new(2, 4)?;
            let table = team.alloc_table(4)?;
            let requests = RequestList::from_indices(codec, vec![1, 2, 3])?;
            let mut engine = UpdateEngine::new(team, &table);
            engine.run(&requests)?;
            if team.my_rank() == 0 {
                table.atomic_add(SlotAddress { rank: 1, offset: 3 }, 2)?;
                table.quiesce()?;
            }
            VerificationPass::new(team, &table).run(&requests, engine.runs_completed())
        })
        .unwrap();
        assert_eq!(reports[0].local_errors, 0);
        assert_eq!(reports[1].local_errors, 1);
        assert_eq!(
            reports[1].reported,
            vec![Violation {
                offset: 3,
                residual: 2
            }]
        );
        assert!(reports.iter().all(|r| r.total_errors == 1 && !r.passed()));
    }

    #[test]
    fn only_first_violations_are_reported() {
        let reports = run_spmd(1, |team| {
            let codec = AddressCodec::new(1, 20)?;
            let table = team.alloc_table(20)?;
            // verify without ever updating: every touched slot goes negative
            let requests = RequestList::from_indices(codec, (0..12).collect())?;
            VerificationPass::new(team, &table).run(&requests, 1)
        })
        .unwrap();
        assert_eq!(reports[0].local_errors, 12);
        assert_eq!(reports[0].total_errors, 12);
        assert_eq!(reports[0].reported.len(), MAX_REPORTED_VIOLATIONS);
        assert_eq!(
            reports[0].reported[0],
            Violation {
                offset: 0,
                residual: -1
            }
        );
    }

    #[test]
    fn undoing_too_many_passes_is_a_configuration_error() {
        let results = run_spmd(2, |team| {
            let codec = AddressCodec::new(2, 4)?;
            let table = team.alloc_table(4)?;
            let requests = RequestList::from_indices(codec, vec![0, 5])?;
            let pass = VerificationPass::new(team, &table);
            for runs in [i64::MAX as u64 + 1, u64::MAX] {
                assert!(matches!(
                    pass.run(&requests, runs),
                    Err(HistoError::Configuration(_))
                ));
            }
            // nothing was subtracted by the rejected passes
            Ok(table.local_shard())
        })
        .unwrap();
        assert!(results.iter().all(|shard| shard == &vec![0; 4]));
    }
}
