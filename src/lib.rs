// STRESS FORGE - ROOT LIBRARY
// Status: FINAL PRODUCTION

// 1. Modules
pub mod catalog;
pub mod error;
pub mod hardware;
pub mod harness;
pub mod scheduler;
pub mod utils;

// 2. Re-exports
pub use error::{StressError, StressResult};
pub use hardware::topology::{Topology, TopologyParseError};
pub use harness::counter::ResultAggregator;
pub use harness::engine::GenerationEngine;
pub use scheduler::{CpuMap, Scheduler, SchedulingClass};
pub use utils::logger::init_logger;

pub mod prelude {
    pub use crate::harness::{
        Expect, GenerationEngine, IntResult, Outcome, ResultAggregator, Runner, SpinLoopStyle, Status, StressTest,
        StrideRange, Suite, TestResult,
    };
    pub use crate::scheduler::{CpuMap, Scheduler, SchedulingClass};
    pub use crate::{StressError, StressResult, Topology};
}
