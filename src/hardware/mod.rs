// STRESS FORGE - HARDWARE LAYER
// Status: FINAL PRODUCTION

pub mod affinity_manager;
pub mod topology;

pub use affinity_manager::{AffinityManager, PinPlan};
pub use topology::{ThreadRecord, Topology, TopologyParseError, TopologySource};
