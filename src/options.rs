use crate::bench::HistoConfig;
use crate::requests::{RequestPattern, SEED_BASE};

use clap::{Parser, ValueEnum};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// every rank is a thread of this process
    Threads,
    /// one rank per lamellar PE (launch with the lamellae of your choice)
    #[cfg(feature = "lamellar-backend")]
    Lamellar,
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Remote atomic histogram benchmark", long_about = None)]
pub struct HistoCli {
    /// number of updates issued by each rank
    #[arg(short = 'n', long, default_value_t = 1_000_000)]
    pub updates_per_rank: usize,

    /// number of counters owned by each rank
    #[arg(short = 'T', long, default_value_t = 1_000)]
    pub table_size_per_rank: usize,

    /// timed update passes before verification
    #[arg(short, long, default_value_t = 1)]
    pub runs: u64,

    #[arg(short, long, value_enum, default_value_t = Backend::Threads)]
    pub backend: Backend,

    /// ranks to run with the threads backend
    #[arg(short = 'p', long, default_value_t = 4, env = "HISTO_RANKS")]
    pub ranks: usize,

    #[arg(long, value_enum, default_value_t = RequestPattern::Uniform)]
    pub pattern: RequestPattern,

    /// each rank seeds its generator with seed_base + rank
    #[arg(long, default_value_t = SEED_BASE)]
    pub seed_base: u64,

    /// append a JSON-lines run record to a file in this directory
    #[arg(long)]
    pub record_dir: Option<PathBuf>,

    /// write a folded-stack trace of the run phases to this file
    #[arg(long)]
    pub flame: Option<PathBuf>,
}

impl HistoCli {
    pub fn config(&self) -> HistoConfig {
        HistoConfig {
            updates_per_rank: self.updates_per_rank,
            slots_per_rank: self.table_size_per_rank,
            runs: self.runs,
            pattern: self.pattern,
            seed_base: self.seed_base,
        }
    }

    /// Prints the run banner to stderr, keeping stdout for results.
    pub fn describe(&self, num_ranks: usize) {
        if let Err(e) = self.write_banner(&mut io::stderr().lock(), num_ranks) {
            tracing::warn!(error = %e, "cannot print banner");
        }
    }

    pub fn write_banner(&self, out: &mut impl Write, num_ranks: usize) -> io::Result<()> {
        writeln!(out, "Running histo on {num_ranks} PEs ({:?} backend)", self.backend)?;
        writeln!(out, "Number updates / PE              (-n)= {}", self.pe_updates())?;
        writeln!(out, "Table size / PE                  (-T)= {}", self.table_size_per_rank)?;
        writeln!(out, "Update passes                    (-r)= {}", self.runs)?;
        writeln!(out, "Request pattern                      = {:?}", self.pattern)?;
        writeln!(out, "Total updates                        = {}", self.total_updates(num_ranks))?;
        writeln!(out, "Total table size                     = {}", self.total_table_size(num_ranks))
    }

    pub fn pe_updates(&self) -> usize {
        self.updates_per_rank
    }

    pub fn total_updates(&self, num_ranks: usize) -> u64 {
        self.config().total_updates(num_ranks)
    }

    pub fn total_table_size(&self, num_ranks: usize) -> u64 {
        self.config().total_slots(num_ranks)
    }
}
