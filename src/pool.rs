//! Worker pool: apply the policy, fork N workers, reap N workers
//!
//! Each worker is a full OS process produced by `fork()`. Workers share no
//! memory with each other or the parent; the only channel back is the exit
//! status collected by `wait()`.

use std::fmt;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};

use nix::errno::Errno;
use nix::sys::signal::Signal;
use nix::sys::wait::{wait, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::sched::{AppliedPolicy, SchedPolicy, SchedulerConfigurator, SchedulerError};

/// Exit status of a worker whose body returned an error
pub const EXIT_WORKER_FAILED: i32 = 1;
/// Exit status of a worker whose body panicked
pub const EXIT_WORKER_PANICKED: i32 = 101;

/// 1-based identity assigned to a worker before it is spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkerId(u32);

impl WorkerId {
    pub fn new(n: u32) -> Option<Self> {
        (n > 0).then_some(Self(n))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// How a reaped worker terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerExit {
    Exited { code: i32 },
    Signaled { signal: i32 },
}

impl WorkerExit {
    /// Map a `wait()` result to (pid, exit); stop/continue events yield `None`
    pub fn from_status(status: WaitStatus) -> Option<(Pid, Self)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, Self::Exited { code })),
            WaitStatus::Signaled(pid, signal, _) => Some((
                pid,
                Self::Signaled {
                    signal: signal as i32,
                },
            )),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Exited { code } => write!(f, "exit status {code}"),
            Self::Signaled { signal } => match Signal::try_from(signal) {
                Ok(sig) => write!(f, "killed by {}", sig.as_str()),
                Err(_) => write!(f, "killed by signal {signal}"),
            },
        }
    }
}

/// A spawned worker and, once reaped, its exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerHandle {
    pub id: WorkerId,
    pub pid: Pid,
    pub exit: Option<WorkerExit>,
}

/// Decides whether a reaped worker's exit is acceptable to the run
///
/// `Lenient` observes abnormal exits without failing the run, which keeps
/// the parent's exit code tied to spawning only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReapPolicy {
    #[default]
    Lenient,
    Strict,
}

impl ReapPolicy {
    pub fn accepts(self, exit: &WorkerExit) -> bool {
        match self {
            Self::Lenient => true,
            Self::Strict => exit.is_success(),
        }
    }
}

/// Errors surfaced by [`WorkerPool::run`]
#[derive(Error, Debug)]
pub enum PoolError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error("Failed to fork worker {id}: {source}")]
    Spawn {
        id: WorkerId,
        #[source]
        source: Errno,
    },

    #[error("Failed to wait for workers ({reaped} of {expected} reaped): {source}")]
    Reap {
        reaped: usize,
        expected: usize,
        #[source]
        source: Errno,
    },

    #[error("Worker {id} (pid {pid}) failed: {exit}")]
    WorkerFailed {
        id: WorkerId,
        pid: Pid,
        exit: WorkerExit,
    },
}

/// Outcome of a completed pool run
#[derive(Debug, Clone)]
pub struct PoolReport {
    pub applied: AppliedPolicy,
    /// Handles in spawn order (worker 1 first)
    pub workers: Vec<WorkerHandle>,
    /// Worker ids in the order `wait()` returned them
    pub completion_order: Vec<WorkerId>,
}

impl PoolReport {
    pub fn spawned(&self) -> usize {
        self.workers.len()
    }

    pub fn reaped(&self) -> usize {
        self.workers.iter().filter(|w| w.exit.is_some()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers
            .iter()
            .filter(|w| w.exit.is_some_and(|e| !e.is_success()))
    }
}

/// Fixed-size set of forked workers
#[derive(Debug, Clone)]
pub struct WorkerPool {
    size: u32,
    policy: SchedPolicy,
    reap_policy: ReapPolicy,
}

impl WorkerPool {
    pub fn new(size: u32, policy: SchedPolicy) -> Self {
        Self {
            size,
            policy,
            reap_policy: ReapPolicy::default(),
        }
    }

    pub fn with_reap_policy(mut self, reap_policy: ReapPolicy) -> Self {
        self.reap_policy = reap_policy;
        self
    }

    /// Apply the policy, fork `size` workers running `work`, reap them all
    ///
    /// Workers are spawned in ascending id order. A fork failure returns
    /// immediately; workers already running are neither killed nor reaped.
    /// `work` runs only in the children and never in the calling process.
    pub fn run<S, F, E>(&self, scheduler: &S, mut work: F) -> Result<PoolReport, PoolError>
    where
        S: SchedulerConfigurator + ?Sized,
        F: FnMut(WorkerId) -> Result<(), E>,
        E: fmt::Display,
    {
        let applied = scheduler.apply(self.policy)?;

        // Buffered output would otherwise be flushed once per child on exit
        std::io::stdout().flush().ok();
        std::io::stderr().flush().ok();

        let mut workers = Vec::with_capacity(self.size as usize);
        for n in 1..=self.size {
            let id = WorkerId(n);
            // SAFETY: the child only runs `work` and then exits without returning
            match unsafe { fork() } {
                Ok(ForkResult::Child) => std::process::exit(run_worker(id, &mut work)),
                Ok(ForkResult::Parent { child }) => {
                    debug!(worker = %id, pid = %child, "spawned worker");
                    workers.push(WorkerHandle {
                        id,
                        pid: child,
                        exit: None,
                    });
                }
                Err(source) => {
                    error!(worker = %id, error = %source, "fork failed");
                    return Err(PoolError::Spawn { id, source });
                }
            }
        }

        let mut completion_order = Vec::with_capacity(workers.len());
        let mut all_accepted = true;
        while completion_order.len() < workers.len() {
            let (id, accepted) = self.reap_one(&mut workers, completion_order.len())?;
            completion_order.push(id);
            all_accepted &= accepted;
        }

        if !all_accepted {
            let failed = completion_order
                .iter()
                .filter_map(|id| workers.iter().find(|w| w.id == *id))
                .find_map(|w| match w.exit {
                    Some(exit) if !self.reap_policy.accepts(&exit) => Some((w.id, w.pid, exit)),
                    _ => None,
                });
            if let Some((id, pid, exit)) = failed {
                return Err(PoolError::WorkerFailed { id, pid, exit });
            }
        }

        Ok(PoolReport {
            applied,
            workers,
            completion_order,
        })
    }

    /// Block until one of our workers terminates and record its exit
    ///
    /// Returns the worker's id and whether the reap policy accepts its exit.
    fn reap_one(
        &self,
        workers: &mut [WorkerHandle],
        reaped: usize,
    ) -> Result<(WorkerId, bool), PoolError> {
        loop {
            let status = match wait() {
                Ok(status) => status,
                Err(Errno::EINTR) => continue,
                Err(source) => {
                    return Err(PoolError::Reap {
                        reaped,
                        expected: workers.len(),
                        source,
                    })
                }
            };
            let Some((pid, exit)) = WorkerExit::from_status(status) else {
                continue;
            };
            let Some(handle) = workers
                .iter_mut()
                .find(|w| w.pid == pid && w.exit.is_none())
            else {
                warn!(%pid, %exit, "reaped a process this pool did not spawn");
                continue;
            };

            handle.exit = Some(exit);
            if exit.is_success() {
                debug!(worker = %handle.id, %pid, %exit, "reaped worker");
            } else {
                warn!(worker = %handle.id, %pid, %exit, "worker exited abnormally");
            }
            return Ok((handle.id, self.reap_policy.accepts(&exit)));
        }
    }
}

/// Body of a forked child: run the work and turn the result into an exit code
fn run_worker<F, E>(id: WorkerId, work: &mut F) -> i32
where
    F: FnMut(WorkerId) -> Result<(), E>,
    E: fmt::Display,
{
    match panic::catch_unwind(AssertUnwindSafe(|| work(id))) {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => {
            error!(worker = %id, error = %err, "worker failed");
            EXIT_WORKER_FAILED
        }
        Err(_) => {
            error!(worker = %id, "worker panicked");
            EXIT_WORKER_PANICKED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::{NoopScheduler, RejectingScheduler};
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    fn test_worker_id_is_one_based() {
        assert!(WorkerId::new(0).is_none());
        assert_eq!(WorkerId::new(4).unwrap().get(), 4);
        assert_eq!(WorkerId::new(4).unwrap().to_string(), "4");
    }

    #[test]
    fn test_reap_policy_lenient_accepts_everything() {
        let policy = ReapPolicy::Lenient;
        assert!(policy.accepts(&WorkerExit::Exited { code: 0 }));
        assert!(policy.accepts(&WorkerExit::Exited { code: 1 }));
        assert!(policy.accepts(&WorkerExit::Signaled { signal: 9 }));
    }

    #[test]
    fn test_reap_policy_strict_requires_clean_exit() {
        let policy = ReapPolicy::Strict;
        assert!(policy.accepts(&WorkerExit::Exited { code: 0 }));
        assert!(!policy.accepts(&WorkerExit::Exited { code: 1 }));
        assert!(!policy.accepts(&WorkerExit::Signaled { signal: 9 }));
    }

    #[test]
    fn test_worker_exit_display() {
        assert_eq!(WorkerExit::Exited { code: 3 }.to_string(), "exit status 3");
        assert_eq!(
            WorkerExit::Signaled {
                signal: Signal::SIGKILL as i32
            }
            .to_string(),
            "killed by SIGKILL"
        );
    }

    #[test]
    fn test_from_status_maps_exit_and_signal() {
        let pid = Pid::from_raw(42);
        assert_eq!(
            WorkerExit::from_status(WaitStatus::Exited(pid, 0)),
            Some((pid, WorkerExit::Exited { code: 0 }))
        );
        assert_eq!(
            WorkerExit::from_status(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            Some((
                pid,
                WorkerExit::Signaled {
                    signal: Signal::SIGTERM as i32
                }
            ))
        );
        assert_eq!(WorkerExit::from_status(WaitStatus::StillAlive), None);
    }

    #[test]
    #[serial]
    fn test_run_spawns_and_reaps_every_worker() {
        let pool = WorkerPool::new(4, SchedPolicy::TimeShared);
        let report = pool
            .run(&NoopScheduler, |_| Ok::<(), std::io::Error>(()))
            .unwrap();
        assert_eq!(report.spawned(), 4);
        assert_eq!(report.reaped(), 4);
        let ids: Vec<u32> = report.workers.iter().map(|w| w.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    #[serial]
    fn test_run_tolerates_any_completion_order() {
        for slow in [1, 3] {
            let pool = WorkerPool::new(3, SchedPolicy::TimeShared);
            let report = pool
                .run(&NoopScheduler, |id| {
                    if id.get() == slow {
                        std::thread::sleep(Duration::from_millis(300));
                    }
                    Ok::<(), std::io::Error>(())
                })
                .unwrap();
            assert_eq!(report.reaped(), 3);
            assert_eq!(report.completion_order.len(), 3);
            assert_eq!(report.completion_order.last().unwrap().get(), slow);
        }
    }

    #[test]
    #[serial]
    fn test_lenient_run_observes_failed_worker() {
        let pool = WorkerPool::new(3, SchedPolicy::TimeShared);
        let report = pool
            .run(&NoopScheduler, |id| {
                if id.get() == 2 {
                    Err("boom")
                } else {
                    Ok(())
                }
            })
            .unwrap();
        let failed: Vec<_> = report.failures().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id.get(), 2);
        assert_eq!(
            failed[0].exit,
            Some(WorkerExit::Exited {
                code: EXIT_WORKER_FAILED
            })
        );
    }

    #[test]
    #[serial]
    fn test_strict_run_fails_on_failed_worker() {
        let pool =
            WorkerPool::new(3, SchedPolicy::TimeShared).with_reap_policy(ReapPolicy::Strict);
        let err = pool
            .run(&NoopScheduler, |id| {
                if id.get() == 2 {
                    Err("boom")
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        match err {
            PoolError::WorkerFailed { id, exit, .. } => {
                assert_eq!(id.get(), 2);
                assert_eq!(
                    exit,
                    WorkerExit::Exited {
                        code: EXIT_WORKER_FAILED
                    }
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    #[serial]
    fn test_panicking_worker_exits_with_panic_status() {
        let pool = WorkerPool::new(1, SchedPolicy::TimeShared);
        let report = pool
            .run(&NoopScheduler, |_| -> Result<(), String> { panic!("worker blew up") })
            .unwrap();
        assert_eq!(
            report.workers[0].exit,
            Some(WorkerExit::Exited {
                code: EXIT_WORKER_PANICKED
            })
        );
    }

    #[test]
    #[serial]
    fn test_scheduler_rejection_aborts_before_spawning() {
        let dir = tempfile::TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let pool = WorkerPool::new(3, SchedPolicy::Fifo);

        let err = pool
            .run(&RejectingScheduler, |_| std::fs::write(&marker, b"x"))
            .unwrap_err();

        match err {
            PoolError::Scheduler(SchedulerError::Rejected { policy, .. }) => {
                assert_eq!(policy, SchedPolicy::Fifo);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(wait(), Err(Errno::ECHILD));
        assert!(!marker.exists());
    }

    #[test]
    #[serial]
    fn test_work_never_runs_in_parent() {
        let mut calls = 0;
        let pool = WorkerPool::new(2, SchedPolicy::TimeShared);
        pool.run(&NoopScheduler, |_| {
            calls += 1;
            Ok::<(), std::io::Error>(())
        })
        .unwrap();
        assert_eq!(calls, 0);
    }
}
