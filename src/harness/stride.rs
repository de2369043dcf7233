/*
 * STRESS FORGE - ADAPTIVE STRIDE POLICY
 * =================================================================
 * Component Name: src/harness/stride.rs
 * Core Responsibility: Picks the pool size range once per run and the per-round growth target.
 * Design Pattern: Doubling Probe / Budget Guard
 * Forensic Impact: A pool that outgrows memory or the time budget turns a stress run into a
 *                  swap test. The cap reason is kept with the result.
 * =================================================================
 */

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::outcome::Outcome;
use super::state_holder::Pair;
use super::stress_test::StressTest;

/// Why the probe stopped doubling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrideCap {
    /// Reached the configured maximum.
    None,
    Footprint,
    Time,
}

impl fmt::Display for StrideCap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StrideCap::None => write!(f, "NONE"),
            StrideCap::Footprint => write!(f, "FOOTPRINT"),
            StrideCap::Time => write!(f, "TIME"),
        }
    }
}

/// Cost of one dry run at a candidate pool size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FootprintSample {
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("allocation of {requested} pairs failed")]
    OutOfMemory { requested: usize },
}

pub trait FootprintEstimator {
    fn run_with(&self, size: usize) -> Result<FootprintSample, ProbeError>;
}

/// Result of the probe: usable pool range for the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrideRange {
    pub min: usize,
    pub max: usize,
    pub cap: StrideCap,
}

impl StrideRange {
    pub fn fixed(min: usize, max: usize) -> Self {
        Self { min, max, cap: StrideCap::None }
    }

    /// Pool size for the next round. Grows only after a lagging round and
    /// never shrinks.
    pub fn grow_target(&self, len: usize, lagged: bool) -> usize {
        if !lagged {
            return len;
        }
        len.saturating_mul(2).min(self.max).max(self.min).max(len)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StridePolicy {
    pub min_stride: usize,
    pub max_stride: usize,
    pub max_footprint_mb: u64,
    pub time_budget: Duration,
}

impl StridePolicy {
    /// Doubles a candidate size from 1 until a budget breaks or `max_stride`
    /// is reached, then clamps both ends to the last good size.
    pub fn adjust(&self, estimator: &dyn FootprintEstimator) -> StrideRange {
        let mut count = 1usize;
        let mut last_good = count;
        let mut cap = StrideCap::None;

        loop {
            if let Some(hit) = self.try_with(estimator, count) {
                cap = hit;
                break;
            }
            last_good = count;
            if last_good >= self.max_stride {
                last_good = self.max_stride;
                break;
            }
            count *= 2;
        }

        let range = StrideRange {
            min: self.min_stride.min(last_good),
            max: self.max_stride.min(last_good),
            cap,
        };
        if cap != StrideCap::None {
            info!(
                "STRIDE_CAP: {} hit at {} pairs. Using [{}, {}].",
                cap, count, range.min, range.max
            );
        }
        range
    }

    fn try_with(&self, estimator: &dyn FootprintEstimator, count: usize) -> Option<StrideCap> {
        match estimator.run_with(count) {
            Ok(sample) => {
                debug!("STRIDE_PROBE: {} pairs -> {} bytes, {:?}", count, sample.bytes, sample.elapsed);
                if sample.bytes > self.max_footprint_mb * 1024 * 1024 {
                    Some(StrideCap::Footprint)
                } else if sample.elapsed.as_millis() > self.time_budget.as_millis() {
                    Some(StrideCap::Time)
                } else {
                    None
                }
            }
            Err(ProbeError::OutOfMemory { .. }) => Some(StrideCap::Footprint),
        }
    }
}

/// Dry-runs a test on the calling thread: builds `size` pairs, runs every
/// actor over them, then consumes them.
pub struct ProbeEstimator<'a, S, R: Outcome> {
    test: &'a StressTest<S, R>,
}

impl<'a, S, R: Outcome> ProbeEstimator<'a, S, R> {
    pub fn new(test: &'a StressTest<S, R>) -> Self {
        Self { test }
    }
}

impl<'a, S: Send + Sync, R: Outcome> FootprintEstimator for ProbeEstimator<'a, S, R> {
    fn run_with(&self, size: usize) -> Result<FootprintSample, ProbeError> {
        let start = Instant::now();

        let mut pairs: Vec<Pair<S, R>> = Vec::new();
        pairs
            .try_reserve_exact(size)
            .map_err(|_| ProbeError::OutOfMemory { requested: size })?;
        pairs.extend((0..size).map(|_| Pair::new(self.test.new_state())));

        for actor in 0..self.test.num_actors() {
            for p in &pairs {
                // SAFETY: `pairs` is local to this thread.
                self.test.run_actor(actor, unsafe { p.state() }, p.result());
            }
        }
        for p in &pairs {
            self.test.run_arbiter(unsafe { p.state() }, p.result());
            let _ = p.result().observe();
            p.result().reset();
        }

        Ok(FootprintSample {
            bytes: (size * std::mem::size_of::<Pair<S, R>>()) as u64,
            elapsed: start.elapsed(),
        })
    }
}
