/*
 * STRESS FORGE - SCHEDULER FACADE
 * =================================================================
 * Component Name: src/scheduler/mod.rs
 * Core Responsibility: Placement classes, granted maps and the thread allocator.
 * Design Pattern: Module Facade
 * =================================================================
 */

pub mod allocator;
pub mod class;
pub mod cpu_map;
mod placement;

pub use allocator::Scheduler;
pub use class::{Affinity, SchedulingClass};
pub use cpu_map::CpuMap;
