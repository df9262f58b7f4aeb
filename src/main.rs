use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use msabm_common::SimulationConfig;
use msabm_engine::{Case, CaseOverrides, Simulation};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about = "Multiscale agent-based tumor microenvironment simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a batch of repeated simulations for one case
    Run {
        /// Base configuration file
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,

        /// Predefined case applied on top of the configuration
        #[arg(long, value_enum, default_value_t = Case::NoTreatment)]
        case: Case,

        /// Number of repeated runs
        #[arg(long, default_value_t = 1)]
        runs: u32,

        /// Seed of the first run; run k uses seed + k
        #[arg(long)]
        seed: Option<u64>,

        /// Rayon worker threads (defaults to all cores)
        #[arg(long)]
        threads: Option<usize>,

        /// Root output directory; each run writes to DIR/<case>/run_<k>/
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,

        /// Drug target concentration for the treatment cases
        #[arg(long)]
        drug_target: Option<f64>,

        /// Treatment start time in hours
        #[arg(long)]
        drug_start: Option<f64>,

        /// Spatial-transcriptomics agent table
        #[arg(long)]
        st_csv: Option<PathBuf>,
    },
    /// List the predefined cases
    Cases,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Cases => {
            for case in Case::ALL {
                println!("{:<24} {}", case.name(), case.description());
            }
            Ok(())
        }
        Command::Run { config, case, runs, seed, threads, output_dir, drug_target, drug_start, st_csv } => {
            if let Some(threads) = threads {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("failed to configure the rayon thread pool")?;
            }
            info!("Using {} Rayon threads.", rayon::current_num_threads());

            let mut base = SimulationConfig::load(&config)
                .with_context(|| format!("failed to load configuration from {}", config.display()))?;
            let overrides = CaseOverrides { drug_target, drug_start_h: drug_start, st_csv };
            case.apply(&mut base, &overrides).with_context(|| format!("failed to apply case '{case}'"))?;

            let first_seed = seed.or(base.initial.seed);
            if first_seed.is_none() {
                warn!("No seed given; every run draws an entropy seed and is not reproducible.");
            }

            let case_dir = output_dir.join(case.name());
            let batch_start = Instant::now();
            let mut failed = 0u32;
            for k in 0..runs {
                let mut run_config = base.clone();
                run_config.initial.seed = first_seed.map(|s| s.wrapping_add(u64::from(k)));
                let run_dir = case_dir.join(format!("run_{k}"));

                info!("=== Run {}/{} -> {} ===", k + 1, runs, run_dir.display());
                let mut sim = Simulation::with_output(run_config, case.name(), Some(run_dir.as_path()))
                    .with_context(|| format!("failed to initialize run {k}"))?;
                match sim.run() {
                    Ok(metadata) => info!(
                        "Run {} completed: seed {}, {} agents, {} records, {} warnings.",
                        k,
                        metadata.seed,
                        sim.current_agent_count(),
                        metadata.records,
                        metadata.warning_count
                    ),
                    Err(e) => {
                        error!("Run {} aborted at t = {:.3} h: {}", k, sim.state().time_h, e);
                        failed += 1;
                    }
                }
            }

            info!(
                "Batch '{}' finished in {:.3} seconds ({} of {} runs completed).",
                case,
                batch_start.elapsed().as_secs_f64(),
                runs - failed,
                runs
            );
            if failed > 0 {
                anyhow::bail!("{failed} of {runs} runs aborted; see metadata.json in each run directory.");
            }
            Ok(())
        }
    }
}
