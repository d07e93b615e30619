//! Worker bodies
//!
//! Every worker in a pool runs the same [`Workload`] variant with its own
//! [`WorkerId`].

pub mod compute;
pub mod transfer;

use std::io;
use std::os::fd::IntoRawFd;

use nix::errno::Errno;
use thiserror::Error;
use tracing::info;

use crate::config::WorkloadKind;
use crate::pool::WorkerId;
use crate::sink::SinkError;

pub use compute::{estimate_pi, ComputeWorkload, PiEstimate};
pub use transfer::{copy_blocks, TransferError, TransferState, TransferWorkload};

/// Close a descriptor and report the `close(2)` result that dropping a `File` discards
pub(crate) fn close_fd(file: impl IntoRawFd) -> io::Result<()> {
    let fd = file.into_raw_fd();
    // SAFETY: ownership of `fd` was just released, so it is closed exactly once
    let rc = unsafe { libc::close(fd) };
    Errno::result(rc).map(drop).map_err(io::Error::from)
}

#[derive(Error, Debug)]
pub enum WorkloadError {
    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// What a worker produced
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Estimate(PiEstimate),
    Transferred(TransferState),
}

#[derive(Debug, Clone)]
pub enum Workload {
    Compute(ComputeWorkload),
    Transfer(TransferWorkload),
}

impl Workload {
    pub fn from_kind(kind: &WorkloadKind) -> Self {
        match kind {
            WorkloadKind::Compute(config) => Self::Compute(ComputeWorkload::new(config)),
            WorkloadKind::Transfer(config) => {
                Self::Transfer(TransferWorkload::new(config.clone()))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Compute(c) if c.sink().is_some() => "mixed",
            Self::Compute(_) => "pi",
            Self::Transfer(_) => "rw",
        }
    }

    pub fn execute(&mut self, id: WorkerId) -> Result<WorkerOutcome, WorkloadError> {
        let outcome = match self {
            Self::Compute(compute) => {
                let estimate = compute.run(id)?;
                info!(
                    worker = %id,
                    iterations = compute.iterations(),
                    pi = %estimate,
                    "estimate complete"
                );
                WorkerOutcome::Estimate(estimate)
            }
            Self::Transfer(transfer) => WorkerOutcome::Transferred(transfer.run(id)?),
        };
        Ok(outcome)
    }
}

/// A descriptor that was never open, so closing it fails with EBADF
#[cfg(test)]
pub(crate) struct StaleFd;

#[cfg(test)]
impl IntoRawFd for StaleFd {
    fn into_raw_fd(self) -> std::os::fd::RawFd {
        -1
    }
}
