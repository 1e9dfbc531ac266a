use histo_atomic::options::{Backend, HistoCli};
use histo_atomic::record::RunRecord;
use histo_atomic::runtime::threads::run_spmd;
use histo_atomic::{printer, run_histo, Collective, RunStatistics};

use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use tracing_flame::{FlameLayer, FlushGuard};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &HistoCli) -> anyhow::Result<Option<FlushGuard<BufWriter<File>>>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true);
    let (flame_layer, guard) = match &cli.flame {
        Some(path) => {
            let (layer, guard) = FlameLayer::with_file(path)
                .with_context(|| format!("cannot create flame output {}", path.display()))?;
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(flame_layer)
        .init();
    Ok(guard)
}

fn log_host(rank: usize) {
    let hostname = sysinfo::System::host_name().unwrap_or_else(|| "<unknown>".to_string());
    tracing::info!(%hostname, rank, "starting rank");
}

fn report(cli: &HistoCli, stats: &RunStatistics) -> anyhow::Result<()> {
    printer::print_run_times(stats);
    printer::print_summary(stats);
    printer::print_verification(stats);
    if let (0, Some(dir)) = (stats.rank, &cli.record_dir) {
        let mut record = RunRecord::new();
        record.with_statistics(stats);
        let path = record.default_output_path(dir);
        record
            .write(&path)
            .with_context(|| format!("cannot write run record {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote run record");
    }
    Ok(())
}

// srun -N <num nodes> target/release/histo_atomic -b lamellar -n <updates per pe> -T <table size per pe>
fn main() -> anyhow::Result<()> {
    let cli = HistoCli::parse();
    let _flame = init_tracing(&cli)?;
    let config = cli.config();

    let stats = match cli.backend {
        Backend::Threads => {
            cli.describe(cli.ranks);
            let all = run_spmd(cli.ranks, |team| {
                log_host(team.my_rank());
                run_histo(team, &config)
            })?;
            all.into_iter().next().context("no rank reported statistics")?
        }
        #[cfg(feature = "lamellar-backend")]
        Backend::Lamellar => {
            use histo_atomic::runtime::lamellar_backend::LamellarRuntime;

            let world = lamellar::LamellarWorldBuilder::new().build();
            let runtime = LamellarRuntime::new(world)?;
            if runtime.my_rank() == 0 {
                cli.describe(runtime.num_ranks());
            }
            log_host(runtime.my_rank());
            run_histo(&runtime, &config)?
        }
    };

    report(&cli, &stats)?;
    stats.into_result()?;
    Ok(())
}
