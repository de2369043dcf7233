/*
 * STRESS FORGE - HARNESS FACADE
 * =================================================================
 * Component Name: src/harness/mod.rs
 * Core Responsibility: Generation-barrier engine, its pool and policies, and the drivers on top.
 * Design Pattern: Module Facade
 * =================================================================
 */

pub mod control;
pub mod counter;
pub mod engine;
pub mod outcome;
pub mod round_stats;
pub mod runner;
pub mod state_holder;
pub mod stride;
pub mod suite;

pub use control::{SpinLoopStyle, StopHandle};
pub use counter::ResultAggregator;
pub use engine::{EngineHandle, EngineState, GenerationEngine, RoleTracker};
pub use outcome::{IntOutcome, IntResult, Outcome};
pub use round_stats::{RoundSnapshot, RoundStats};
pub use runner::{Grading, Runner, Status, TestResult, Verdict};
pub use stress_test::{Expect, StressTest};
pub use stride::{FootprintEstimator, FootprintSample, ProbeError, StrideCap, StridePolicy, StrideRange};
pub use suite::{DynStressTest, Job, Suite};
