//! CLI argument parsing for schedbench

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::{
    DEFAULT_BLOCK_SIZE, DEFAULT_INPUT_BASE, DEFAULT_ITERATIONS, DEFAULT_OUTPUT_BASE,
    DEFAULT_POLICY, DEFAULT_RESULT_BASE, DEFAULT_TRANSFER_SIZE, DEFAULT_WORKERS,
};

/// Output format for the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text format (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "schedbench")]
#[command(version)]
#[command(
    about = "Fork a pool of CPU-bound or I/O-bound workers under a chosen scheduling policy",
    long_about = None
)]
pub struct Cli {
    /// Enable trace-level logging on stderr
    #[arg(long, global = true)]
    pub debug: bool,

    /// Run summary format
    #[arg(long = "format", value_enum, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Seed pi/mixed workers deterministically (worker N uses SEED + N)
    #[arg(long, value_name = "SEED", global = true)]
    pub seed: Option<u64>,

    /// Fail the run when any worker exits abnormally
    #[arg(long, global = true)]
    pub strict: bool,

    #[command(subcommand)]
    pub command: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// CPU-bound: estimate pi in every worker and discard the result
    Pi(ComputeArgs),

    /// CPU-bound: estimate pi in every worker and log it to a per-worker file
    Mixed {
        #[command(flatten)]
        compute: ComputeArgs,

        /// Base name for result files (<BASE>-<worker>)
        #[arg(long = "result-base", value_name = "BASE", default_value = DEFAULT_RESULT_BASE)]
        result_base: PathBuf,
    },

    /// I/O-bound: copy blocks from <input>-<worker> to <output>-<pid>
    Rw(TransferArgs),
}

#[derive(Args, Debug)]
pub struct ComputeArgs {
    /// Monte Carlo samples per worker
    #[arg(default_value_t = DEFAULT_ITERATIONS as i64, allow_negative_numbers = true)]
    pub iterations: i64,

    /// SCHED_OTHER, SCHED_FIFO or SCHED_RR
    #[arg(default_value = DEFAULT_POLICY)]
    pub policy: String,

    /// Number of worker processes
    #[arg(default_value_t = i64::from(DEFAULT_WORKERS), allow_negative_numbers = true)]
    pub workers: i64,
}

#[derive(Args, Debug)]
pub struct TransferArgs {
    /// Bytes each worker must write (at least)
    #[arg(
        value_name = "TRANSFERSIZE",
        default_value_t = DEFAULT_TRANSFER_SIZE as i64,
        allow_negative_numbers = true
    )]
    pub transfer_size: i64,

    /// Bytes per read/write; must divide TRANSFERSIZE
    #[arg(
        value_name = "BLOCKSIZE",
        default_value_t = DEFAULT_BLOCK_SIZE as i64,
        allow_negative_numbers = true
    )]
    pub block_size: i64,

    /// Input file base; worker N reads <INPUT>-N
    #[arg(default_value = DEFAULT_INPUT_BASE)]
    pub input: PathBuf,

    /// Output file base; each worker writes <OUTPUT>-<pid>
    #[arg(default_value = DEFAULT_OUTPUT_BASE)]
    pub output: PathBuf,

    /// SCHED_OTHER, SCHED_FIFO or SCHED_RR
    #[arg(default_value = DEFAULT_POLICY)]
    pub policy: String,

    /// Number of worker processes
    #[arg(default_value_t = i64::from(DEFAULT_WORKERS), allow_negative_numbers = true)]
    pub workers: i64,

    /// Suffix output files with the worker number instead of the pid
    #[arg(long = "name-by-worker")]
    pub name_by_worker: bool,
}
