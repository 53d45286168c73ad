
use clap::Parser;
use nfiles_runner::{
    config::RoundConfig,
    executors::{rank_payload, Executors, RoundSummary},
};
use std::{fs::File, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

const DEFAULT_FILES: usize = 2;

/// Write the payload of every rank into a bounded number of files
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// YAML round config, command line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// number of ranks
    #[arg(short, long)]
    ranks: Option<usize>,
    /// number of output files
    #[arg(short = 'n', long)]
    files: Option<usize>,
    /// output file prefix, the zero padded slot index is appended
    #[arg(short, long)]
    prefix: Option<PathBuf>,
    /// keep every rank on the file of its set
    #[arg(long)]
    group_sets: bool,
    /// let writers take any free file, even if the config groups them
    #[arg(long, conflicts_with = "group_sets")]
    no_group_sets: bool,
    /// write payloads straight to the file without a local buffer
    #[arg(long)]
    no_set_buf: bool,
    /// payload size per rank in 4 byte integers
    #[arg(long)]
    ints: Option<usize>,
    /// number of consecutive rounds
    #[arg(long)]
    rounds: Option<u32>,
    /// write the YAML summary of all rounds to this file
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut RoundConfig) {
        if let Some(ranks) = self.ranks {
            config.executor.ranks = ranks;
        }
        if let Some(files) = self.files {
            config.files = files;
        }
        if let Some(prefix) = &self.prefix {
            config.prefix = prefix.clone();
        }
        if self.group_sets {
            config.group_sets = true;
        }
        if self.no_group_sets {
            config.group_sets = false;
        }
        if self.no_set_buf {
            config.set_buf = false;
        }
        if let Some(ints) = self.ints {
            config.executor.ints = ints;
        }
        if let Some(rounds) = self.rounds {
            config.executor.rounds = rounds;
        }
    }
}

fn report(summary: &RoundSummary) {
    let megabytes = summary.bytes_written as f64 / 1.0e6;

    println!(
        "  Round {} writing {} ranks to {} files ({:?})",
        summary.round, summary.ranks, summary.files, summary.policy
    );
    println!("------------------------------------------");
    println!("  Total megabytes = {megabytes:.5}");
    println!(
        "  Write:  Megabytes/sec   = {:.5}",
        summary.megabytes_per_second()
    );
    println!("  Wall clock time = {:.5}", summary.elapsed_secs);
    if let Some((min, max)) = summary.rank_wall_times() {
        println!("  Min wall clock time = {min:.5}");
        println!("  Max wall clock time = {max:.5}");
    }
    println!("  Coordinator = {}", summary.coordinator);
    println!("  Max open files = {}", summary.peak_open_files);
    println!("------------------------------------------");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match RoundConfig::load(path) {
            Ok(config) => config,
            Err(error) => {
                error!("Failed to load config {}: {error}", path.to_string_lossy());
                exit(1)
            }
        },
        None => RoundConfig::new(DEFAULT_FILES),
    };

    args.apply(&mut config);

    if config.preflight_checks() {
        error!("Config contains errors, see above");
        exit(1)
    }

    if let Err(error) = config.layout().remove_files() {
        error!("Failed to remove old output files: {error}");
        exit(1)
    }

    let ints = config.executor.ints;
    let rounds = config.executor.rounds;

    let mut executor = match Executors::load(config) {
        Ok(executor) => executor,
        Err(error) => {
            error!("Failed to start executor: {error}");
            exit(1)
        }
    };

    let mut summaries = Vec::with_capacity(rounds as usize);

    for _ in 0..rounds {
        match executor.execute(|rank| rank_payload(rank, ints)) {
            Ok(summary) => {
                report(&summary);
                summaries.push(summary);
            }
            Err(error) => {
                error!("Round failed: {error}");
                exit(1)
            }
        }
    }

    if let Some(path) = args.summary {
        let file = File::create(&path).unwrap_or_log();
        serde_yaml::to_writer(file, &summaries).unwrap_or_log();
        info!("Wrote summary to {}", path.to_string_lossy());
    }
}
