// ========================================================================================
//
//                          THE COMMAND-LINE FRONT END: SEEDSIFT
//
// ========================================================================================
//
// Parses the command line, merges it over an optional TOML config, runs one search with
// one of the built-in filters, and prints every matching seed to stdout, one per line.
// Status lines and progress go to stderr so that stdout can be piped.

#![feature(portable_simd)]
#![deny(unused_variables)]
#![deny(clippy::no_effect_underscore_binding)]

mod filters;

use clap::{Args, Parser, Subcommand, ValueEnum};
use crossbeam_channel::{Receiver, Sender};
use filters::{PicksDesc, ThresholdDesc};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use seedsift::batch::BatchError;
use seedsift::{
    BackendPreference, ProgressReport, SearchConfig, SearchError, SearchObserver,
    SearchScheduler, SearchSettings, SearchStatus, Seed, SeedFilterDesc,
};
use seedsift::settings::SearchSection;
use std::io::{self, BufWriter, IsTerminal, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendCli {
    Auto,
    Simd,
    Portable,
}

impl From<BackendCli> for BackendPreference {
    fn from(value: BackendCli) -> Self {
        match value {
            BackendCli::Auto => BackendPreference::Auto,
            BackendCli::Simd => BackendPreference::Simd,
            BackendCli::Portable => BackendPreference::Portable,
        }
    }
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// TOML file with a [search] table. Flags given here override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads (default: one per logical core).
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Enumerate every seed of this many characters.
    #[arg(long, global = true, conflicts_with = "seeds")]
    seed_length: Option<usize>,

    /// Seed positions enumerated within one batch.
    #[arg(long, global = true)]
    fast_digits: Option<usize>,

    /// Newline-delimited file of seeds to test instead of enumerating.
    #[arg(long, global = true)]
    seeds: Option<PathBuf>,

    /// Batch to start from, to resume an earlier run.
    #[arg(long, global = true)]
    start_batch: Option<u64>,

    #[arg(long, global = true, value_enum)]
    backend: Option<BackendCli>,
}

#[derive(Subcommand, Debug)]
enum FilterCommand {
    /// Seeds whose first draw on KEY is below a bound.
    Threshold {
        #[arg(long)]
        key: String,
        #[arg(long)]
        below: f64,
    },
    /// Seeds whose distinct picks from 1..=CHOICES on KEY include every wanted value.
    Picks {
        #[arg(long)]
        key: String,
        #[arg(long)]
        choices: i32,
        #[arg(long)]
        draws: usize,
        #[arg(long, value_delimiter = ',', required = true)]
        wanted: Vec<i32>,
    },
}

#[derive(Parser, Debug)]
#[command(
    name = "seedsift",
    version,
    about = "Searches the seed space of a legacy game PRNG for seeds that pass a filter."
)]
struct Cli {
    #[command(flatten)]
    search: SearchArgs,

    #[command(subcommand)]
    filter: FilterCommand,
}

// ========================================================================================
//                                   Match output
// ========================================================================================

/// Forwards matches to the printer thread and progress to the progress bar.
struct CliObserver {
    matches: Sender<Seed>,
    progress: ProgressBar,
}

impl SearchObserver for CliObserver {
    fn on_match(&self, seed: &Seed) {
        let _ = self.matches.send(*seed);
    }

    fn on_progress(&self, report: &ProgressReport) {
        self.progress.set_position(report.completed_batches);
        self.progress
            .set_message(format!("{:.0} seeds/ms", report.seeds_per_ms));
    }

    fn on_batch_failed(&self, batch_index: u64, error: &BatchError) {
        self.progress
            .println(format!("> Skipped batch {batch_index}: {error}"));
    }
}

fn create_progress_bar() -> ProgressBar {
    let draw_target = if io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(10)
    } else {
        ProgressDrawTarget::hidden()
    };
    let pb = ProgressBar::with_draw_target(Some(0), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} batches ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb
}

fn print_matches(receiver: Receiver<Seed>) -> io::Result<u64> {
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut count = 0;
    for seed in receiver {
        writeln!(out, "{seed}")?;
        count += 1;
    }
    out.flush()?;
    Ok(count)
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn build_settings(args: &SearchArgs) -> Result<SearchSettings, Box<dyn std::error::Error>> {
    let mut section = match &args.config {
        Some(path) => {
            eprintln!("> Reading config from {}", path.display());
            SearchConfig::load(path)?.search
        }
        None => SearchSection::default(),
    };

    if let Some(path) = &args.seeds {
        section.seeds_file = Some(path.clone());
        section.seed_length = None;
    }
    if let Some(seed_length) = args.seed_length {
        section.seed_length = Some(seed_length);
        section.seeds_file = None;
    }
    if section.seed_length.is_none() && section.seeds_file.is_none() {
        return Err("give --seed-length, --seeds or a --config naming one".into());
    }
    if let Some(path) = &section.seeds_file {
        eprintln!("> Testing seeds listed in {}", path.display());
    }

    section.fast_digits = args.fast_digits.or(section.fast_digits);
    section.threads = args.threads.or(section.threads);
    section.start_batch = args.start_batch.or(section.start_batch);
    section.backend = args.backend.map(BackendPreference::from).or(section.backend);
    Ok(SearchConfig { search: section }.into_settings()?)
}

fn run<D: SeedFilterDesc>(settings: &SearchSettings, filter: &D) -> Result<(), SearchError> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    let progress = create_progress_bar();
    let observer = Arc::new(CliObserver {
        matches: sender,
        progress: progress.clone(),
    });
    let printer = thread::spawn(move || print_matches(receiver));

    let mut scheduler = SearchScheduler::new(settings, filter, observer)?;
    progress.set_length(scheduler.total_batch_count());
    eprintln!(
        "> Searching {} batches of {} seeds on the {} backend",
        scheduler.total_batch_count(),
        scheduler.seeds_per_batch(),
        scheduler.backend().name()
    );

    scheduler.start();
    let status = scheduler.wait_for_completion();
    let next_batch = scheduler.next_batch_index();
    // Dropping the scheduler drops the observer, which closes the match channel.
    drop(scheduler);
    progress.finish_and_clear();

    match printer.join() {
        Ok(Ok(count)) => eprintln!("> Found {count} matching seeds"),
        Ok(Err(e)) => eprintln!("Error writing matches: {e}"),
        Err(_) => eprintln!("Error: the output thread panicked"),
    }
    if status != SearchStatus::Completed {
        eprintln!("> Stopped before completion; resume with --start-batch {next_batch}");
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings = match build_settings(&cli.search) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let result = match cli.filter {
        FilterCommand::Threshold { key, below } => run(&settings, &ThresholdDesc { key, below }),
        FilterCommand::Picks {
            key,
            choices,
            draws,
            wanted,
        } => run(
            &settings,
            &PicksDesc {
                key,
                choices,
                draws,
                wanted,
            },
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
