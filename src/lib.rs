//! schedbench - compare Linux scheduling policies on forked worker pools
//!
//! A run applies one scheduling policy (`SCHED_OTHER`, `SCHED_FIFO` or
//! `SCHED_RR`) to the calling process, forks a fixed number of workers that
//! inherit it, and waits for all of them. Workers run either a CPU-bound Monte
//! Carlo estimate of pi or an I/O-bound synchronous block copy.

pub mod cli;
pub mod config;
pub mod pool;
pub mod runner;
pub mod sched;
pub mod sink;
pub mod summary;
pub mod workload;
