// Worker Pinning

/*
 * STRESS FORGE - ACTOR AFFINITY MANAGER
 * =================================================================
 * Component Name: src/hardware/affinity_manager.rs
 * Core Responsibility: Pins each actor role thread onto the hardware thread its CPUMap assigned.
 * Design Pattern: Strategy / Resource Manager
 * Forensic Impact: Records the physical geography of a run. A "same core" outcome distribution
 *                  is only meaningful if the pin actually took.
 * =================================================================
 */

use std::thread;

use tracing::{debug, error, warn};

use crate::error::{StressError, StressResult};
use crate::scheduler::CpuMap;

/// How actor threads are placed for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinPlan {
    /// Let the OS scheduler float the threads.
    Unpinned,
    /// `cpus[role]` is the hardware thread of each role.
    Pinned { cpus: Vec<usize> },
}

impl PinPlan {
    pub fn from_cpu_map(map: &CpuMap) -> Self {
        PinPlan::Pinned { cpus: map.actor_map().to_vec() }
    }

    pub fn cpu_for(&self, role: usize) -> Option<usize> {
        match self {
            PinPlan::Unpinned => None,
            PinPlan::Pinned { cpus } => cpus.get(role).copied(),
        }
    }
}

pub struct AffinityManager {
    core_ids: Vec<core_affinity::CoreId>,
}

impl AffinityManager {
    /// Discovers the processors this process may be pinned to.
    pub fn new() -> StressResult<Self> {
        let core_ids = core_affinity::get_core_ids()
            .ok_or_else(|| StressError::Scheduling("Failed to detect CPU cores topology".into()))?;

        if core_ids.is_empty() {
            return Err(StressError::Scheduling("No pinnable processors reported".into()));
        }
        Ok(Self { core_ids })
    }

    /// Builds a manager over an explicit processor list.
    pub fn with_cores(ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            core_ids: ids.into_iter().map(|id| core_affinity::CoreId { id }).collect(),
        }
    }

    pub fn can_pin(&self, cpu: usize) -> bool {
        self.core_ids.iter().any(|c| c.id == cpu)
    }

    /// Checks that every processor of the plan is pinnable.
    pub fn validate(&self, plan: &PinPlan) -> StressResult<()> {
        if let PinPlan::Pinned { cpus } = plan {
            if let Some(&missing) = cpus.iter().find(|&&cpu| !self.can_pin(cpu)) {
                return Err(StressError::Scheduling(format!(
                    "CPU {} from placement is not pinnable (process sees {} processors)",
                    missing,
                    self.core_ids.len()
                )));
            }
        }
        Ok(())
    }

    /// Pins the current thread for `role`. A failed pin is logged, not fatal:
    /// the run proceeds unpinned on that role.
    pub fn pin_current_thread(&self, plan: &PinPlan, role: usize) -> bool {
        let Some(cpu) = plan.cpu_for(role) else {
            return false;
        };
        let thread_name = thread::current().name().map(str::to_owned);

        match self.core_ids.iter().find(|c| c.id == cpu) {
            Some(core) => {
                if core_affinity::set_for_current(*core) {
                    debug!("THREAD_PINNED: Role [{}] -> CPU #{} ({:?})", role, cpu, thread_name);
                    true
                } else {
                    error!("PINNING_FAIL: Could not pin role {} to CPU #{}", role, cpu);
                    false
                }
            }
            None => {
                warn!(
                    "AFFINITY_ERROR: CPU #{} for role {} not in allowed set (Total: {})",
                    cpu,
                    role,
                    self.core_ids.len()
                );
                false
            }
        }
    }
}
