//! Run configuration resolved from the command line
//!
//! Everything is validated here, before the scheduler is touched or any file
//! is opened. A [`RunConfig`] is immutable once built; workers see it through
//! the copy-on-write image `fork()` hands them.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cli::{Cli, ComputeArgs, Mode, TransferArgs};
use crate::pool::ReapPolicy;
use crate::sched::SchedPolicy;

pub const DEFAULT_ITERATIONS: u64 = 1_000_000;
pub const DEFAULT_WORKERS: u32 = 5;
pub const DEFAULT_POLICY: &str = "SCHED_OTHER";
pub const DEFAULT_TRANSFER_SIZE: u64 = 1024 * 100;
pub const DEFAULT_BLOCK_SIZE: u64 = 1024;
pub const DEFAULT_INPUT_BASE: &str = "rwinput";
pub const DEFAULT_OUTPUT_BASE: &str = "rwoutput";
pub const DEFAULT_RESULT_BASE: &str = "pilog";

/// Upper bound (exclusive) on any generated filename, in bytes
pub const MAX_FILENAME_LEN: usize = 80;

/// Rejected command-line values
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Bad {name} value: {value} (must be positive)")]
    NonPositive { name: &'static str, value: i64 },

    #[error("Bad {name} value: {value} (out of range)")]
    OutOfRange { name: &'static str, value: u64 },

    #[error("Unhandled scheduling policy: {0} (expected SCHED_OTHER, SCHED_FIFO or SCHED_RR)")]
    UnknownPolicy(String),

    #[error("blocksize {block} can not exceed transfersize {transfer}")]
    BlockExceedsTransfer { block: u64, transfer: u64 },

    #[error("transfersize {transfer} must be a multiple of blocksize {block}")]
    BlockNotDivisor { block: u64, transfer: u64 },

    #[error("{name} is too long ({len} bytes, limit {limit})", limit = MAX_FILENAME_LEN - 1)]
    PathTooLong { name: &'static str, len: usize },

    #[error("--seed only applies to the pi and mixed modes")]
    SeedWithoutCompute,
}

/// Require a strictly positive integer
pub fn positive(name: &'static str, value: i64) -> Result<u64, ConfigError> {
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or(ConfigError::NonPositive { name, value })
}

fn check_path_base(name: &'static str, base: &Path) -> Result<(), ConfigError> {
    let len = base.as_os_str().len();
    if len >= MAX_FILENAME_LEN {
        return Err(ConfigError::PathTooLong { name, len });
    }
    Ok(())
}

/// `<base>-<suffix>`, the naming scheme for every per-worker file
pub fn suffixed_path(base: &Path, suffix: impl fmt::Display) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!("-{suffix}"));
    PathBuf::from(name)
}

/// Which number distinguishes transfer output files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSuffix {
    /// The worker's pid (fresh names on every run)
    #[default]
    ProcessId,
    /// The worker's 1-based identity (stable names across runs)
    WorkerId,
}

/// Settings for the CPU-bound estimator
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeConfig {
    pub iterations: u64,
    /// Base seed; worker `i` draws from `seed + i`. `None` seeds from the OS.
    pub seed: Option<u64>,
    /// When set, each estimate is persisted to `<result_base>-<worker>`
    pub result_base: Option<PathBuf>,
}

impl ComputeConfig {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            seed: None,
            result_base: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_result_base(mut self, base: impl Into<PathBuf>) -> Self {
        self.result_base = Some(base.into());
        self
    }
}

/// Settings for the I/O-bound block copier
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    pub transfer_size: u64,
    pub block_size: usize,
    pub input_base: PathBuf,
    pub output_base: PathBuf,
    pub output_suffix: OutputSuffix,
}

impl TransferConfig {
    /// Validate sizes and path bases
    ///
    /// `block_size` must not exceed `transfer_size` and must divide it.
    pub fn new(
        transfer_size: u64,
        block_size: u64,
        input_base: impl Into<PathBuf>,
        output_base: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        if transfer_size == 0 {
            return Err(ConfigError::NonPositive {
                name: "transfersize",
                value: 0,
            });
        }
        if block_size == 0 {
            return Err(ConfigError::NonPositive {
                name: "blocksize",
                value: 0,
            });
        }
        if block_size > transfer_size {
            return Err(ConfigError::BlockExceedsTransfer {
                block: block_size,
                transfer: transfer_size,
            });
        }
        if !transfer_size.is_multiple_of(block_size) {
            return Err(ConfigError::BlockNotDivisor {
                block: block_size,
                transfer: transfer_size,
            });
        }
        let block = usize::try_from(block_size).map_err(|_| ConfigError::OutOfRange {
            name: "blocksize",
            value: block_size,
        })?;

        let input_base = input_base.into();
        let output_base = output_base.into();
        check_path_base("Input filename", &input_base)?;
        check_path_base("Output filename base", &output_base)?;

        Ok(Self {
            transfer_size,
            block_size: block,
            input_base,
            output_base,
            output_suffix: OutputSuffix::default(),
        })
    }

    pub fn with_output_suffix(mut self, suffix: OutputSuffix) -> Self {
        self.output_suffix = suffix;
        self
    }
}

/// The two interchangeable workload bodies
#[derive(Debug, Clone, PartialEq)]
pub enum WorkloadKind {
    Compute(ComputeConfig),
    Transfer(TransferConfig),
}

/// Fully resolved run: policy, pool size and workload
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub policy: SchedPolicy,
    pub workers: u32,
    pub workload: WorkloadKind,
    pub reap_policy: ReapPolicy,
}

impl RunConfig {
    pub fn new(policy: SchedPolicy, workers: u32, workload: WorkloadKind) -> Self {
        Self {
            policy,
            workers,
            workload,
            reap_policy: ReapPolicy::default(),
        }
    }

    pub fn with_reap_policy(mut self, reap_policy: ReapPolicy) -> Self {
        self.reap_policy = reap_policy;
        self
    }
}

fn worker_count(value: i64) -> Result<u32, ConfigError> {
    let workers = positive("childrens", value)?;
    u32::try_from(workers).map_err(|_| ConfigError::OutOfRange {
        name: "childrens",
        value: workers,
    })
}

fn resolve_compute(
    args: &ComputeArgs,
    seed: Option<u64>,
) -> Result<(SchedPolicy, u32, ComputeConfig), ConfigError> {
    let iterations = positive("iterations", args.iterations)?;
    let policy = args.policy.parse()?;
    let workers = worker_count(args.workers)?;
    Ok((policy, workers, ComputeConfig::new(iterations).with_seed(seed)))
}

fn resolve_transfer(
    args: &TransferArgs,
) -> Result<(SchedPolicy, u32, TransferConfig), ConfigError> {
    let transfer_size = positive("transfersize", args.transfer_size)?;
    let block_size = positive("blocksize", args.block_size)?;
    let policy = args.policy.parse()?;
    let workers = worker_count(args.workers)?;

    let suffix = if args.name_by_worker {
        OutputSuffix::WorkerId
    } else {
        OutputSuffix::ProcessId
    };
    let transfer = TransferConfig::new(transfer_size, block_size, &args.input, &args.output)?
        .with_output_suffix(suffix);
    Ok((policy, workers, transfer))
}

impl TryFrom<&Cli> for RunConfig {
    type Error = ConfigError;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        let (policy, workers, workload) = match &cli.command {
            Mode::Pi(args) => {
                let (policy, workers, compute) = resolve_compute(args, cli.seed)?;
                (policy, workers, WorkloadKind::Compute(compute))
            }
            Mode::Mixed { compute, result_base } => {
                check_path_base("Result filename base", result_base)?;
                let (policy, workers, compute) = resolve_compute(compute, cli.seed)?;
                (
                    policy,
                    workers,
                    WorkloadKind::Compute(compute.with_result_base(result_base)),
                )
            }
            Mode::Rw(args) => {
                if cli.seed.is_some() {
                    return Err(ConfigError::SeedWithoutCompute);
                }
                let (policy, workers, transfer) = resolve_transfer(args)?;
                (policy, workers, WorkloadKind::Transfer(transfer))
            }
        };

        let reap_policy = if cli.strict {
            ReapPolicy::Strict
        } else {
            ReapPolicy::Lenient
        };
        Ok(RunConfig::new(policy, workers, workload).with_reap_policy(reap_policy))
    }
}
