//! Run summary printed once every worker has been reaped

use std::fmt::Write as _;
use std::time::Duration;

use serde::Serialize;

use crate::pool::{PoolReport, WorkerExit, WorkerId};
use crate::sched::SchedPolicy;

/// One reaped worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub pid: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<WorkerExit>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub workload: String,
    pub policy: SchedPolicy,
    pub priority: i32,
    pub spawned: usize,
    pub reaped: usize,
    pub failed: usize,
    pub workers: Vec<WorkerRecord>,
    pub completion_order: Vec<WorkerId>,
    pub elapsed_secs: f64,
}

impl RunSummary {
    pub fn new(workload: &str, report: &PoolReport, elapsed: Duration) -> Self {
        Self {
            workload: workload.to_string(),
            policy: report.applied.policy,
            priority: report.applied.priority,
            spawned: report.spawned(),
            reaped: report.reaped(),
            failed: report.failures().count(),
            workers: report
                .workers
                .iter()
                .map(|w| WorkerRecord {
                    id: w.id,
                    pid: w.pid.as_raw(),
                    exit: w.exit,
                })
                .collect(),
            completion_order: report.completion_order.clone(),
            elapsed_secs: elapsed.as_secs_f64(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} workload: {} workers under {} (priority {}) in {:.3}s",
            self.workload, self.spawned, self.policy, self.priority, self.elapsed_secs
        );
        let order: Vec<String> = self
            .completion_order
            .iter()
            .map(|id| id.to_string())
            .collect();
        let _ = writeln!(out, "completion order: {}", order.join(" "));
        for worker in &self.workers {
            let exit = worker
                .exit
                .map_or_else(|| "not reaped".to_string(), |e| e.to_string());
            let _ = writeln!(out, "  worker {:>3}  pid {:>7}  {}", worker.id, worker.pid, exit);
        }
        if self.failed > 0 {
            let _ = writeln!(out, "{} of {} workers exited abnormally", self.failed, self.reaped);
        }
        out
    }
}
