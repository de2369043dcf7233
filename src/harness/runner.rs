/*
 * STRESS FORGE - TEST RUNNER
 * =================================================================
 * Component Name: src/harness/runner.rs
 * Core Responsibility: Sanity check, stride probe, placement, iterations under a watchdog, grading.
 * Design Pattern: Template Method / RAII Placement Guard
 * Forensic Impact: Every exit path releases the placement unless role threads outlive the run.
 *                  A run that hangs is reported as TIMEOUT_ERROR with its threads abandoned
 *                  and its CPUs quarantined, never silently retried.
 * =================================================================
 */

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam::utils::Backoff;
use serde::Serialize;
use tracing::warn;

use super::counter::ResultAggregator;
use super::engine::{panic_message, GenerationEngine};
use super::outcome::Outcome;
use super::stress_test::{Expect, StressTest};
use super::stride::{ProbeEstimator, StrideCap};
use crate::error::{StressError, StressResult};
use crate::hardware::affinity_manager::{AffinityManager, PinPlan};
use crate::scheduler::{CpuMap, Scheduler, SchedulingClass};
use crate::utils::config_loader::RunConfig;
use crate::utils::logger::{log_placement, log_run_outcome};

const MIN_WATCHDOG: Duration = Duration::from_secs(30);

/// Waiting longer than this for the roles of one iteration is a timeout.
pub fn watchdog_timeout(time: Duration) -> Duration {
    (time * 10).max(MIN_WATCHDOG)
}

// =================================================================
// 1. Result types
// =================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Normal,
    /// The single-threaded sanity pass panicked; the test never ran.
    CheckTestError,
    TestError,
    TimeoutError,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Status::Normal => write!(f, "NORMAL"),
            Status::CheckTestError => write!(f, "CHECK_TEST_ERROR"),
            Status::TestError => write!(f, "TEST_ERROR"),
            Status::TimeoutError => write!(f, "TIMEOUT_ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Passed,
    /// Passed, but an interesting outcome showed up.
    Interesting,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grading {
    pub verdict: Verdict,
    /// (outcome, count, judgement) for every observed outcome.
    pub details: Vec<(String, u64, Expect)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub name: String,
    pub status: Status,
    pub class: String,
    pub cpu_map: Vec<usize>,
    /// (rendered outcome, count), ordered by outcome.
    pub states: Vec<(String, u64)>,
    pub messages: Vec<String>,
    pub iterations: usize,
    pub min_stride: usize,
    pub max_stride: usize,
    pub stride_cap: StrideCap,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub grading: Grading,
}

impl TestResult {
    fn failed(name: &str, class: &SchedulingClass, status: Status, started_at: DateTime<Utc>, messages: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            class: class.to_string(),
            cpu_map: Vec::new(),
            states: Vec::new(),
            messages,
            iterations: 0,
            min_stride: 0,
            max_stride: 0,
            stride_cap: StrideCap::None,
            started_at,
            elapsed: Duration::ZERO,
            grading: Grading { verdict: Verdict::Failed, details: Vec::new() },
        }
    }

    pub fn total_samples(&self) -> u64 {
        self.states.iter().map(|(_, n)| n).sum()
    }

    pub fn passed(&self) -> bool {
        self.grading.verdict != Verdict::Failed
    }
}

/// Grades observed outcomes. Any forbidden outcome fails the test, as does
/// a non-normal status.
pub fn grade(status: Status, states: &[(String, u64)], judge: impl Fn(&str) -> Expect) -> Grading {
    let details: Vec<(String, u64, Expect)> = states
        .iter()
        .map(|(outcome, n)| (outcome.clone(), *n, judge(outcome)))
        .collect();

    let verdict = if status != Status::Normal || details.iter().any(|(_, n, e)| *e == Expect::Forbidden && *n > 0) {
        Verdict::Failed
    } else if details.iter().any(|(_, n, e)| *e == Expect::Interesting && *n > 0) {
        Verdict::Interesting
    } else {
        Verdict::Passed
    };
    Grading { verdict, details }
}

// =================================================================
// 2. Placement guard
// =================================================================

/// Holds a granted placement and releases it on drop.
pub struct PlacementGuard<'a> {
    scheduler: &'a Scheduler,
    map: Option<CpuMap>,
}

impl<'a> PlacementGuard<'a> {
    pub fn map(&self) -> Option<&CpuMap> {
        self.map.as_ref()
    }

    /// Gives the placement up without releasing it. Used when role threads
    /// may still be running on its CPUs.
    pub fn quarantine(mut self) {
        if let Some(map) = self.map.take() {
            self.scheduler.quarantine(map);
        }
    }
}

impl Drop for PlacementGuard<'_> {
    fn drop(&mut self) {
        if let Some(map) = self.map.take() {
            self.scheduler.release(map);
        }
    }
}

// =================================================================
// 3. Runner
// =================================================================

pub struct Runner {
    config: RunConfig,
    scheduler: Arc<Scheduler>,
    affinity: Option<Arc<AffinityManager>>,
    cancel: Arc<AtomicBool>,
}

impl Runner {
    /// Discovers pinnable processors when `pin_threads` is set. Failure to
    /// discover them downgrades to unpinned runs.
    pub fn new(config: RunConfig, scheduler: Arc<Scheduler>) -> Self {
        let affinity = if config.pin_threads {
            match AffinityManager::new() {
                Ok(mgr) => Some(Arc::new(mgr)),
                Err(e) => {
                    warn!("RUNNER: {}. Running unpinned.", e);
                    None
                }
            }
        } else {
            None
        };
        Self {
            config,
            scheduler,
            affinity,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_affinity(mut self, affinity: Option<Arc<AffinityManager>>) -> Self {
        self.affinity = affinity;
        self
    }

    /// Shares a cancellation flag (e.g. set from a signal handler). A
    /// cancelled runner finishes the current iteration and stops waiting
    /// for placements.
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Retries `try_acquire` with backoff until it succeeds. Fails fast when
    /// the class cannot fit even on an idle scheduler.
    pub fn acquire(&self, class: &SchedulingClass) -> StressResult<PlacementGuard<'_>> {
        if !self.scheduler.fits_idle(class) {
            return Err(StressError::Scheduling(format!(
                "class {} cannot be placed on {} owned threads",
                class,
                self.scheduler.max_threads()
            )));
        }

        let backoff = Backoff::new();
        loop {
            if let Some(map) = self.scheduler.try_acquire(class) {
                return Ok(PlacementGuard {
                    scheduler: self.scheduler.as_ref(),
                    map: Some(map),
                });
            }
            if self.cancelled() {
                return Err(StressError::Scheduling(format!("cancelled while waiting for {}", class)));
            }
            if backoff.is_completed() {
                thread::sleep(Duration::from_millis(1));
            } else {
                backoff.snooze();
            }
        }
    }

    pub fn run<S, R>(&self, test: &Arc<StressTest<S, R>>, class: &SchedulingClass) -> StressResult<TestResult>
    where
        S: Send + Sync + 'static,
        R: Outcome,
    {
        if class.num_actors() != test.num_actors() {
            return Err(StressError::InvalidClass(format!(
                "{} has {} roles, '{}' has {} actors",
                class,
                class.num_actors(),
                test.name(),
                test.num_actors()
            )));
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        let mut results = match sanity_check(test) {
            Ok(counter) => counter,
            Err(message) => {
                let result = TestResult::failed(
                    test.name(),
                    class,
                    Status::CheckTestError,
                    started_at,
                    vec!["Check test failed".to_string(), message],
                );
                log_run_outcome(&result);
                return Ok(result);
            }
        };

        let strides = self.config.stride_policy().adjust(&ProbeEstimator::new(test.as_ref()));
        let guard = self.acquire(class)?;
        let cpu_map = guard.map().map(|m| m.actor_map().to_vec()).unwrap_or_default();
        if let Some(map) = guard.map() {
            log_placement(test.name(), map);
        }
        let plan = self.pin_plan(guard.map());

        let mut status = Status::Normal;
        let mut messages = Vec::new();
        let mut iterations = 0;
        let mut stranded = false;
        let time = self.config.time();

        for _ in 0..self.config.iterations {
            if self.cancelled() {
                messages.push(format!("Cancelled after {} iterations", iterations));
                break;
            }

            let mut engine = GenerationEngine::new(test.clone(), strides, self.config.spin_style);
            if let (Some(affinity), PinPlan::Pinned { .. }) = (&self.affinity, &plan) {
                engine = engine.with_pinning(affinity.clone(), plan.clone());
            }

            let handle = match engine.start() {
                Ok(handle) => handle,
                Err(e) => {
                    status = Status::TestError;
                    messages.push(e.to_string());
                    break;
                }
            };
            self.sleep_unless_cancelled(time);
            handle.stop();
            let tracker = handle.role_tracker();

            let joined = handle.join_timeout(watchdog_timeout(time));
            if joined.is_err() && !tracker.all_exited() {
                stranded = true;
            }
            match joined {
                Ok(counter) => {
                    results.merge_from(&counter);
                    iterations += 1;
                }
                Err(e @ StressError::Timeout(_)) => {
                    status = Status::TimeoutError;
                    messages.push("Timeout waiting for tasks to complete".to_string());
                    messages.push(e.to_string());
                    break;
                }
                Err(e) => {
                    status = Status::TestError;
                    messages.push("Unrecoverable error while running".to_string());
                    messages.push(e.to_string());
                    break;
                }
            }
        }
        if stranded {
            messages.push("Role threads still running, placement quarantined".to_string());
            guard.quarantine();
        } else {
            drop(guard);
        }

        let states = render(&results);
        let grading = grade(status, &states, |o| test.judge(o));
        let result = TestResult {
            name: test.name().to_string(),
            status,
            class: class.to_string(),
            cpu_map,
            states,
            messages,
            iterations,
            min_stride: strides.min,
            max_stride: strides.max,
            stride_cap: strides.cap,
            started_at,
            elapsed: clock.elapsed(),
            grading,
        };
        log_run_outcome(&result);
        Ok(result)
    }

    fn pin_plan(&self, map: Option<&CpuMap>) -> PinPlan {
        let (Some(affinity), Some(map)) = (&self.affinity, map) else {
            return PinPlan::Unpinned;
        };
        let plan = PinPlan::from_cpu_map(map);
        match affinity.validate(&plan) {
            Ok(()) => plan,
            Err(e) => {
                warn!("RUNNER: {}. Running unpinned.", e);
                PinPlan::Unpinned
            }
        }
    }

    fn sleep_unless_cancelled(&self, time: Duration) {
        let deadline = Instant::now() + time;
        loop {
            let now = Instant::now();
            if now >= deadline || self.cancelled() {
                return;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(50)));
        }
    }
}

/// Every actor once, then the arbiter, on one pair on the calling thread.
fn sanity_check<S, R: Outcome>(test: &StressTest<S, R>) -> Result<ResultAggregator<R::Key>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let state = test.new_state();
        let result = R::default();
        for role in 0..test.num_actors() {
            test.run_actor(role, &state, &result);
        }
        test.run_arbiter(&state, &result);
        let mut counter = ResultAggregator::new();
        counter.record(result.observe());
        counter
    }))
    .map_err(panic_message)
}

fn render<K: Eq + std::hash::Hash + Clone + Ord + fmt::Display>(results: &ResultAggregator<K>) -> Vec<(String, u64)> {
    results.sorted().into_iter().map(|(k, n)| (k.to_string(), n)).collect()
}
