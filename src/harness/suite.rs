/*
 * STRESS FORGE - SUITE EXECUTOR
 * =================================================================
 * Component Name: src/harness/suite.rs
 * Core Responsibility: Runs (test, class) jobs concurrently, each on its own disjoint placement.
 * Design Pattern: Work Queue (crossbeam channel) / Type-Erased Test Handles
 * Forensic Impact: Jobs only ever share the scheduler. Results come back in job order.
 * =================================================================
 */

use std::sync::Arc;
use std::thread;

use crossbeam::channel;
use tracing::{error, info};

use super::outcome::Outcome;
use super::runner::{Runner, TestResult};
use super::stress_test::StressTest;
use crate::error::{StressError, StressResult};
use crate::scheduler::SchedulingClass;

/// A stress test with its state and result types erased.
pub trait DynStressTest: Send + Sync {
    fn name(&self) -> &str;
    fn num_actors(&self) -> usize;
    fn run_on(&self, runner: &Runner, class: &SchedulingClass) -> StressResult<TestResult>;
}

struct ErasedTest<S, R: Outcome>(Arc<StressTest<S, R>>);

impl<S: Send + Sync + 'static, R: Outcome> DynStressTest for ErasedTest<S, R> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn num_actors(&self) -> usize {
        self.0.num_actors()
    }

    fn run_on(&self, runner: &Runner, class: &SchedulingClass) -> StressResult<TestResult> {
        runner.run(&self.0, class)
    }
}

impl<S: Send + Sync + 'static, R: Outcome> StressTest<S, R> {
    pub fn into_dyn(self) -> Arc<dyn DynStressTest> {
        Arc::new(ErasedTest(Arc::new(self)))
    }
}

pub struct Job {
    pub test: Arc<dyn DynStressTest>,
    pub class: SchedulingClass,
}

pub struct Suite {
    runner: Arc<Runner>,
    parallelism: usize,
}

impl Suite {
    pub fn new(runner: Runner) -> Self {
        let parallelism = runner.config().parallelism.max(1);
        Self {
            runner: Arc::new(runner),
            parallelism,
        }
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Every test paired with every class shape its actor count can take on
    /// the scheduler's owned threads.
    pub fn matrix(&self, tests: &[Arc<dyn DynStressTest>]) -> Vec<Job> {
        let scheduler = self.runner.scheduler();
        tests
            .iter()
            .flat_map(|test| {
                scheduler
                    .local_affinity_for(test.num_actors(), scheduler.max_threads())
                    .into_iter()
                    .map(move |class| Job {
                        test: test.clone(),
                        class,
                    })
            })
            .collect()
    }

    /// Runs all jobs on `parallelism` driver threads and returns one result
    /// per job, in job order.
    pub fn run(&self, jobs: Vec<Job>) -> Vec<StressResult<TestResult>> {
        let total = jobs.len();
        info!("SUITE: {} jobs on {} driver threads", total, self.parallelism);

        let (job_tx, job_rx) = channel::unbounded::<(usize, Job)>();
        let (out_tx, out_rx) = channel::unbounded();
        for (idx, job) in jobs.into_iter().enumerate() {
            let _ = job_tx.send((idx, job));
        }
        drop(job_tx);

        thread::scope(|scope| {
            for worker in 0..self.parallelism.min(total.max(1)) {
                let job_rx = job_rx.clone();
                let out_tx = out_tx.clone();
                let runner = &self.runner;
                let spawned = thread::Builder::new()
                    .name(format!("suite-driver-{}", worker))
                    .spawn_scoped(scope, move || {
                        for (idx, job) in job_rx.iter() {
                            let outcome = job.test.run_on(runner, &job.class);
                            if let Err(e) = &outcome {
                                error!("SUITE: '{}' on {} failed: {}", job.test.name(), job.class, e);
                            }
                            let _ = out_tx.send((idx, outcome));
                        }
                    });
                if let Err(e) = spawned {
                    error!("SUITE: could not start driver {}: {}", worker, e);
                }
            }
        });
        drop(out_tx);

        let mut slots: Vec<Option<StressResult<TestResult>>> = (0..total).map(|_| None).collect();
        for (idx, outcome) in out_rx.iter() {
            slots[idx] = Some(outcome);
        }
        slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(StressError::Spawn("job was never run".into()))))
            .collect()
    }
}
