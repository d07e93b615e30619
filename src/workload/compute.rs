//! CPU-bound workload: Monte Carlo estimate of pi
//!
//! Samples points uniformly in the square `[-R, R) x [-R, R)` and counts how
//! many land inside the circle of radius `R`. The ratio approaches `pi / 4`,
//! with error shrinking as `O(1/sqrt(iterations))`.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::config::ComputeConfig;
use crate::pool::WorkerId;
use crate::sink::{ResultSink, SinkError};

/// Half of the classic 31-bit `RAND_MAX`
pub const RADIUS: i64 = (i32::MAX / 2) as i64;

/// A single pi approximation in `[0, 4]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct PiEstimate(f64);

impl PiEstimate {
    pub fn value(self) -> f64 {
        self.0
    }

    /// Absolute distance from the true value of pi
    pub fn error(self) -> f64 {
        (self.0 - std::f64::consts::PI).abs()
    }
}

impl fmt::Display for PiEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Run `iterations` samples against `rng`
///
/// Zero iterations yields `0.0` rather than dividing by zero.
pub fn estimate_pi<R: Rng>(iterations: u64, rng: &mut R) -> PiEstimate {
    let radius = RADIUS as f64;
    let mut in_circle: u64 = 0;
    let mut in_square: u64 = 0;

    for _ in 0..iterations {
        let x = rng.gen_range(-RADIUS..RADIUS) as f64;
        let y = rng.gen_range(-RADIUS..RADIUS) as f64;
        if x.hypot(y) < radius {
            in_circle += 1;
        }
        in_square += 1;
    }

    if in_square == 0 {
        return PiEstimate(0.0);
    }
    PiEstimate(4.0 * in_circle as f64 / in_square as f64)
}

/// The compute worker body, optionally persisting its estimate
#[derive(Debug, Clone)]
pub struct ComputeWorkload {
    iterations: u64,
    seed: Option<u64>,
    sink: Option<ResultSink>,
}

impl ComputeWorkload {
    pub fn new(config: &ComputeConfig) -> Self {
        Self {
            iterations: config.iterations,
            seed: config.seed,
            sink: config.result_base.as_ref().map(ResultSink::new),
        }
    }

    pub fn iterations(&self) -> u64 {
        self.iterations
    }

    pub fn sink(&self) -> Option<&ResultSink> {
        self.sink.as_ref()
    }

    /// Generator for one worker; forked children must not share a stream
    fn rng_for(&self, id: WorkerId) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(u64::from(id.get()))),
            None => StdRng::from_entropy(),
        }
    }

    pub fn run(&self, id: WorkerId) -> Result<PiEstimate, SinkError> {
        let mut rng = self.rng_for(id);
        let estimate = estimate_pi(self.iterations, &mut rng);
        if let Some(sink) = &self.sink {
            sink.persist(id, estimate)?;
        }
        Ok(estimate)
    }
}
