//! Top-level run: resolved config in, summary out

use std::time::Instant;

use tracing::info;

use crate::config::RunConfig;
use crate::pool::{PoolError, WorkerPool};
use crate::sched::SchedulerConfigurator;
use crate::summary::RunSummary;
use crate::workload::Workload;

/// Apply the policy, run every worker to completion and summarise
///
/// The workload (and the transfer buffer it owns) is built once here, before
/// the first fork, so each worker inherits its own copy.
pub fn run<S>(config: &RunConfig, scheduler: &S) -> Result<RunSummary, PoolError>
where
    S: SchedulerConfigurator + ?Sized,
{
    let mut workload = Workload::from_kind(&config.workload);
    let name = workload.name();
    let pool =
        WorkerPool::new(config.workers, config.policy).with_reap_policy(config.reap_policy);

    info!(workload = name, workers = config.workers, policy = %config.policy, "starting run");
    let started = Instant::now();
    let report = pool.run(scheduler, |id| workload.execute(id).map(|_| ()))?;
    let elapsed = started.elapsed();
    info!(workload = name, elapsed_secs = elapsed.as_secs_f64(), "all workers reaped");

    Ok(RunSummary::new(name, &report, elapsed))
}
