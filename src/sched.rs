//! Scheduling policy selection and application
//!
//! The policy is applied once, to the calling process, before any worker is
//! forked. Workers inherit it through `fork()`; nothing touches scheduling
//! attributes after the first spawn.

use std::fmt;
use std::io;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::ConfigError;

/// OS scheduling discipline under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SchedPolicy {
    /// `SCHED_OTHER`: the default time-shared scheduler
    #[default]
    #[serde(rename = "SCHED_OTHER")]
    TimeShared,
    /// `SCHED_FIFO`: fixed priority, runs until it blocks or yields
    #[serde(rename = "SCHED_FIFO")]
    Fifo,
    /// `SCHED_RR`: fixed priority with a time slice
    #[serde(rename = "SCHED_RR")]
    RoundRobin,
}

impl SchedPolicy {
    pub const ALL: [SchedPolicy; 3] = [Self::TimeShared, Self::Fifo, Self::RoundRobin];

    /// Policy name as accepted on the command line
    pub fn name(self) -> &'static str {
        match self {
            Self::TimeShared => "SCHED_OTHER",
            Self::Fifo => "SCHED_FIFO",
            Self::RoundRobin => "SCHED_RR",
        }
    }

    /// Raw policy constant for `sched_setscheduler(2)`
    pub fn as_raw(self) -> libc::c_int {
        match self {
            Self::TimeShared => libc::SCHED_OTHER,
            Self::Fifo => libc::SCHED_FIFO,
            Self::RoundRobin => libc::SCHED_RR,
        }
    }

    pub fn from_raw(raw: libc::c_int) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_raw() == raw)
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SchedPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| ConfigError::UnknownPolicy(s.to_string()))
    }
}

/// Errors raised while configuring the scheduler
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to query priority range for {policy}: {source}")]
    PriorityRange {
        policy: SchedPolicy,
        #[source]
        source: io::Error,
    },

    #[error("Error setting scheduler policy {policy} (priority {priority}): {source}")]
    Rejected {
        policy: SchedPolicy,
        priority: i32,
        #[source]
        source: io::Error,
    },
}

/// Policy and priority actually in force once `apply` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedPolicy {
    pub policy: SchedPolicy,
    pub priority: i32,
}

/// Applies a scheduling policy to the current process
///
/// Threaded explicitly into [`crate::pool::WorkerPool::run`] so tests can
/// swap in [`NoopScheduler`] instead of mutating the test runner's policy.
pub trait SchedulerConfigurator {
    fn apply(&self, policy: SchedPolicy) -> Result<AppliedPolicy, SchedulerError>;
}

/// Real configurator backed by `sched_setscheduler(2)` on pid 0
#[derive(Debug, Clone, Copy, Default)]
pub struct OsScheduler;

impl OsScheduler {
    /// Highest priority the kernel allows for `policy`
    pub fn max_priority(policy: SchedPolicy) -> Result<i32, SchedulerError> {
        // SAFETY: pure query, no pointers involved
        let priority = unsafe { libc::sched_get_priority_max(policy.as_raw()) };
        if priority == -1 {
            return Err(SchedulerError::PriorityRange {
                policy,
                source: io::Error::last_os_error(),
            });
        }
        Ok(priority)
    }

    /// Policy currently attached to this process, if it is one we know
    pub fn current_policy() -> Option<SchedPolicy> {
        // SAFETY: pure query on the calling process
        let raw = unsafe { libc::sched_getscheduler(0) };
        if raw == -1 {
            return None;
        }
        SchedPolicy::from_raw(raw & !libc::SCHED_RESET_ON_FORK)
    }
}

impl SchedulerConfigurator for OsScheduler {
    fn apply(&self, policy: SchedPolicy) -> Result<AppliedPolicy, SchedulerError> {
        let priority = Self::max_priority(policy)?;
        debug!(current = ?Self::current_policy(), %policy, priority, "setting scheduler policy");

        // SAFETY: sched_param is plain data; zeroed covers libc variants with padding fields
        let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
        param.sched_priority = priority;

        // SAFETY: `param` outlives the call and pid 0 names the calling process
        let rc = unsafe { libc::sched_setscheduler(0, policy.as_raw(), &param) };
        if rc != 0 {
            return Err(SchedulerError::Rejected {
                policy,
                priority,
                source: io::Error::last_os_error(),
            });
        }

        debug!(new = ?Self::current_policy(), "scheduler policy applied");
        Ok(AppliedPolicy { policy, priority })
    }
}

/// Configurator that leaves the process untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopScheduler;

impl SchedulerConfigurator for NoopScheduler {
    fn apply(&self, policy: SchedPolicy) -> Result<AppliedPolicy, SchedulerError> {
        Ok(AppliedPolicy {
            policy,
            priority: 0,
        })
    }
}

/// Configurator that refuses every policy, as the kernel does without CAP_SYS_NICE
#[cfg(test)]
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RejectingScheduler;

#[cfg(test)]
impl SchedulerConfigurator for RejectingScheduler {
    fn apply(&self, policy: SchedPolicy) -> Result<AppliedPolicy, SchedulerError> {
        Err(SchedulerError::Rejected {
            policy,
            priority: 99,
            source: io::Error::from_raw_os_error(libc::EPERM),
        })
    }
}
