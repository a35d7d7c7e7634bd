//! # dex-cache
//!
//! A per-image cache of resolved constants for a managed runtime: strings,
//! classes, method types, methods, fields and call sites, looked up by their
//! index in the image without taking a lock.
//!
//! The cache itself lives in [`cache`]. The rest of the crate is the small
//! runtime it needs around it: a compacting [`heap`], image loading in
//! [`dex`], and a [`linker`] that resolves entries and fills the cache.
//!
//! ## Logging
//!
//! The `dex-cache` binary reads its log filter from `DEX_CACHE_LOG`, using
//! [`tracing_subscriber::EnvFilter`] syntax. Without it, `-v` flags raise the
//! level from `warn`.
use clap::{ArgAction, Parser};
use std::{path::PathBuf, process::ExitCode};
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod cache;
pub mod dex;
pub mod driver;
pub mod error;
pub mod heap;
pub mod linker;
pub mod members;
pub mod native;
pub mod utils;

pub use cache::ResolutionCache;
pub use driver::{run_image, RunOptions, RunReport};

use utils::PointerSize;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Load an image and hammer its resolution cache from several threads"
)]
pub struct Args {
    #[arg(value_name = "IMAGE")]
    pub image: PathBuf,
    #[arg(short, long, default_value_t = 4)]
    pub threads: usize,
    #[arg(short, long, default_value_t = 2)]
    pub rounds: usize,
    /// Resolve every string inside a transaction and roll it back first.
    #[arg(long)]
    pub transaction: bool,
    /// Run a moving collection after resolution and check the cache again.
    #[arg(long)]
    pub compact: bool,
    #[arg(long)]
    pub json: bool,
    #[arg(long, value_enum, default_value_t = PointerSize::native())]
    pub pointer_size: PointerSize,
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn options(&self) -> RunOptions {
        RunOptions {
            threads: self.threads,
            rounds: self.rounds,
            transaction: self.transaction,
            compact: self.compact,
            pointer_size: self.pointer_size,
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env("DEX_CACHE_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        })
    });
    // a second init (tests driving the CLI in-process) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn run_cli() -> ExitCode {
    run_args(Args::parse())
}

pub fn run_args(args: Args) -> ExitCode {
    init_tracing(args.verbose);

    let dex_file = match dex::DexFile::open(&args.image) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error loading image: {}", e);
            return ExitCode::from(1);
        }
    };
    info!(location = dex_file.location(), size = dex_file.size(), "loaded image");

    let report = match run_image(&dex_file, &args.options()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(1);
        }
    };

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing report: {}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        println!("{}: resolved {} entries", report.location, report.resolved);
        if let Some(cleared) = report.rolled_back {
            println!("rolled back {cleared} strings");
        }
        if let Some(moved) = report.relocated {
            println!("relocated {moved} objects");
        }
        print!("{}", report.stats);
    }
    ExitCode::SUCCESS
}
