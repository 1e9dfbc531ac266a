use crate::codec::AddressCodec;
use crate::engine::{PhaseTiming, UpdateEngine};
use crate::error::{HistoError, Result};
use crate::requests::{RequestGenerator, RequestPattern, SEED_BASE};
use crate::runtime::{Collective, PgasRuntime};
use crate::verify::{VerificationPass, VerificationReport};

/// Parameters of one benchmark run, identical on every rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoConfig {
    pub updates_per_rank: usize,
    pub slots_per_rank: usize,
    /// update passes before verification
    pub runs: u64,
    pub pattern: RequestPattern,
    pub seed_base: u64,
}

impl Default for HistoConfig {
    fn default() -> Self {
        HistoConfig {
            updates_per_rank: 1_000_000,
            slots_per_rank: 1_000,
            runs: 1,
            pattern: RequestPattern::Uniform,
            seed_base: SEED_BASE,
        }
    }
}

impl HistoConfig {
    /// Validates the configuration for `num_ranks` ranks.
    pub fn codec(&self, num_ranks: usize) -> Result<AddressCodec> {
        if self.runs == 0 {
            return Err(HistoError::Configuration(
                "at least one update pass is required".to_string(),
            ));
        }
        if self.runs > i64::MAX as u64 {
            return Err(HistoError::Configuration(format!(
                "{} update passes cannot be undone with a 64-bit delta",
                self.runs
            )));
        }
        AddressCodec::new(num_ranks, self.slots_per_rank)
    }

    pub fn total_slots(&self, num_ranks: usize) -> u64 {
        self.slots_per_rank as u64 * num_ranks as u64
    }

    pub fn total_updates(&self, num_ranks: usize) -> u64 {
        self.updates_per_rank as u64 * num_ranks as u64
    }
}

/// What one rank knows at the end of a run.
#[derive(Debug, Clone)]
pub struct RunStatistics {
    pub rank: usize,
    pub num_ranks: usize,
    pub backend: &'static str,
    pub config: HistoConfig,
    pub runs: Vec<PhaseTiming>,
    pub verification: VerificationReport,
}

impl RunStatistics {
    pub fn passed(&self) -> bool {
        self.verification.passed()
    }

    pub fn runs_completed(&self) -> u64 {
        self.runs.len() as u64
    }

    /// Millions of updates per second over all ranks for one pass.
    pub fn global_mups(&self, timing: &PhaseTiming) -> f64 {
        let updates = self.config.total_updates(self.num_ranks) as f64;
        (updates / 1_000_000.0) / timing.mean_secs
    }

    pub fn mean_secs(&self) -> f64 {
        if self.runs.is_empty() {
            return 0.0;
        }
        self.runs.iter().map(|t| t.mean_secs).sum::<f64>() / self.runs.len() as f64
    }

    /// Turns a failed verification into [`HistoError::CorrectnessViolation`].
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(HistoError::CorrectnessViolation {
                total_errors: self.verification.total_errors,
            })
        }
    }
}

/// Runs the whole benchmark on the calling rank: allocate, generate,
/// `config.runs` timed update passes, then verification.
///
/// Collective. A failed verification is reported in the returned
/// statistics, not as an error.
#[tracing::instrument(skip_all, fields(rank = runtime.my_rank(), backend = runtime.name()))]
pub fn run_histo<R: PgasRuntime>(runtime: &R, config: &HistoConfig) -> Result<RunStatistics> {
    let rank = runtime.my_rank();
    let num_ranks = runtime.num_ranks();
    let codec = config.codec(num_ranks)?;

    let table = runtime.alloc_table(config.slots_per_rank)?;
    let requests = RequestGenerator::for_rank(codec, rank, config.seed_base)
        .pattern(config.pattern)
        .generate(config.updates_per_rank);
    tracing::debug!(requests = requests.len(), "generated requests");
    runtime.barrier()?;

    let mut engine = UpdateEngine::new(runtime, &table);
    let mut runs = Vec::new();
    for _ in 0..config.runs {
        let timing = engine.run(&requests)?;
        tracing::info!(mean_secs = timing.mean_secs, "update pass");
        runs.push(timing);
    }

    let verification =
        VerificationPass::new(runtime, &table).run(&requests, engine.runs_completed())?;
    if !verification.passed() {
        tracing::warn!(
            local_errors = verification.local_errors,
            total_errors = verification.total_errors,
            "verification failed"
        );
    }

    Ok(RunStatistics {
        rank,
        num_ranks,
        backend: runtime.name(),
        config: config.clone(),
        runs,
        verification,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::threads::run_spmd;

    fn small(updates_per_rank: usize, slots_per_rank: usize) -> HistoConfig {
        HistoConfig {
            updates_per_rank,
            slots_per_rank,
            ..HistoConfig::default()
        }
    }

    #[test]
    fn default_matches_cli_defaults() {
        let config = HistoConfig::default();
        assert_eq!(config.updates_per_rank, 1_000_000);
        assert_eq!(config.slots_per_rank, 1_000);
        assert_eq!(config.runs, 1);
        assert_eq!(config.seed_base, 120348);
    }

    #[test]
    fn random_run_verifies_on_several_rank_counts() {
        for ranks in [1, 2, 5] {
            let config = small(20_000, 64);
            let stats = run_spmd(ranks, |team| run_histo(team, &config)).unwrap();
            assert_eq!(stats.len(), ranks);
            for s in &stats {
                assert!(s.passed(), "{ranks} ranks: {:?}", s.verification);
                assert_eq!(s.runs_completed(), 1);
                assert_eq!(s.num_ranks, ranks);
                assert_eq!(s.backend, "threads");
            }
            // the reduced mean is identical everywhere
            let mean = stats[0].runs[0].mean_secs;
            assert!(stats.iter().all(|s| s.runs[0].mean_secs == mean));
        }
    }

    #[test]
    fn several_passes_verify() {
        let config = HistoConfig {
            runs: 4,
            ..small(5_000, 16)
        };
        let stats = run_spmd(3, |team| run_histo(team, &config)).unwrap();
        for s in stats {
            assert!(s.passed());
            assert_eq!(s.runs_completed(), 4);
            assert!(s.mean_secs() >= 0.0);
        }
    }

    #[test]
    fn sequential_pattern_verifies() {
        let config = HistoConfig {
            pattern: RequestPattern::Sequential,
            ..small(1_000, 10)
        };
        let stats = run_spmd(4, |team| run_histo(team, &config)).unwrap();
        assert!(stats.iter().all(|s| s.passed()));
    }

    #[test]
    fn bad_configuration_fails_before_any_phase() {
        let res = run_spmd(2, |team| run_histo(team, &small(10, 0)));
        assert!(matches!(res, Err(HistoError::Configuration(_))));
        let res = run_spmd(2, |team| {
            run_histo(
                team,
                &HistoConfig {
                    runs: 0,
                    ..small(10, 10)
                },
            )
        });
        assert!(matches!(res, Err(HistoError::Configuration(_))));
    }

    #[test]
    fn failed_verification_becomes_an_error() {
        let config = small(10, 10);
        let mut stats = run_spmd(1, |team| run_histo(team, &config))
            .unwrap()
            .remove(0);
        assert!(stats.clone().into_result().is_ok());
        stats.verification.total_errors = 3;
        assert!(matches!(
            stats.into_result(),
            Err(HistoError::CorrectnessViolation { total_errors: 3 })
        ));
    }

    #[test]
    fn mups_uses_global_update_count() {
        let config = small(10, 10);
        let mut stats = run_spmd(2, |team| run_histo(team, &config))
            .unwrap()
            .remove(0);
        stats.config.updates_per_rank = 500_000;
        stats.runs[0].mean_secs = 0.5;
        assert_eq!(stats.global_mups(&stats.runs[0]), 2.0);
    }
}
