use crate::bench::RunStatistics;

use std::io::{self, Write};

/// Per-pass timings go to stderr, next to the banner.
pub fn print_run_times(stats: &RunStatistics) {
    if stats.rank == 0 {
        if let Err(e) = write_run_times(&mut io::stderr().lock(), stats) {
            tracing::warn!(error = %e, "cannot print run times");
        }
    }
}

pub fn write_run_times(out: &mut impl Write, stats: &RunStatistics) -> io::Result<()> {
    for timing in &stats.runs {
        writeln!(
            out,
            "  {:8.3} seconds  gmups {:>9.2}  pe0 issue {:>6.4?} local {:>6.4?} global {:>6.4?}",
            timing.mean_secs,
            stats.global_mups(timing),
            timing.issue,
            timing.local,
            timing.global,
        )?;
    }
    Ok(())
}

pub fn print_summary(stats: &RunStatistics) {
    if stats.rank == 0 {
        let gmups = stats
            .runs
            .iter()
            .map(|t| stats.global_mups(t))
            .collect::<Vec<f64>>();
        if gmups.is_empty() {
            return;
        }
        println!(
            "summary: {} {} pes min: {:>6.2} avg: {:>6.2} max: {:>6.2} gmups",
            stats.backend,
            stats.num_ranks,
            gmups.iter().fold(f64::INFINITY, |a, &b| a.min(b)),
            gmups.iter().sum::<f64>() / gmups.len() as f64,
            gmups.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b))
        );
    }
}

// per-slot violations are already logged by the verification pass
pub fn print_verification(stats: &RunStatistics) {
    if stats.rank == 0 && !stats.passed() {
        eprintln!(
            "FAILED!!!! total errors = {}",
            stats.verification.total_errors
        );
    }
}
