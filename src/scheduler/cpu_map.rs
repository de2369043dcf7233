use std::fmt;

use super::class::SchedulingClass;

/// A granted placement: one hardware thread per actor role.
///
/// Not `Clone`: a map is released by value, exactly once, to the scheduler
/// that issued it.
#[derive(Debug, PartialEq, Eq)]
pub struct CpuMap {
    pub(crate) scheduler_id: u64,
    pub(crate) ticket: u64,
    class: SchedulingClass,
    actor_map: Vec<usize>,
    /// Same ids as `actor_map`, ascending.
    threads: Vec<usize>,
}

impl CpuMap {
    pub(crate) fn new(scheduler_id: u64, ticket: u64, class: SchedulingClass, actor_map: Vec<usize>) -> Self {
        let mut threads = actor_map.clone();
        threads.sort_unstable();
        Self {
            scheduler_id,
            ticket,
            class,
            actor_map,
            threads,
        }
    }

    /// `actor_map()[role]` is the hardware thread id of `role`.
    pub fn actor_map(&self) -> &[usize] {
        &self.actor_map
    }

    pub fn threads(&self) -> &[usize] {
        &self.threads
    }

    pub fn class(&self) -> &SchedulingClass {
        &self.class
    }

    pub fn ticket(&self) -> u64 {
        self.ticket
    }
}

impl fmt::Display for CpuMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{} {} -> {:?}", self.ticket, self.class, self.actor_map)
    }
}
