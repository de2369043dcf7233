// CPU Placement

/*
 * STRESS FORGE - TOPOLOGY-AWARE PLACEMENT SCHEDULER
 * =================================================================
 * Component Name: src/scheduler/allocator.rs
 * Core Responsibility: Hands out disjoint hardware-thread sets to concurrently running tests.
 * Design Pattern: Resource Manager / All-or-Nothing Reservation
 * Forensic Impact: The free/taken table is the single source of truth for "who runs where".
 *                  A leaked or double-released map corrupts every later placement, so both fail loudly.
 * =================================================================
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use super::class::{enumerate_skeletons, SchedulingClass};
use super::cpu_map::CpuMap;
use super::placement::{find_placement, Shape};
use crate::error::{StressError, StressResult};
use crate::hardware::topology::Topology;

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

/// Mutable allocation table. Only touched under `Scheduler::state`.
struct AllocationState {
    /// Indexed by thread id. Threads outside the owned set stay `false`.
    free: Vec<bool>,
    free_count: usize,
    next_ticket: u64,
    /// ticket -> threads (ascending)
    outstanding: HashMap<u64, Vec<usize>>,
    /// Outstanding maps that will never be released.
    quarantined: usize,
    shapes: HashMap<SchedulingClass, Arc<Shape>>,
}

impl AllocationState {
    fn shape_for(&mut self, class: &SchedulingClass) -> Arc<Shape> {
        if let Some(shape) = self.shapes.get(class) {
            return shape.clone();
        }
        let shape = Arc::new(Shape::of(class));
        self.shapes.insert(class.clone(), shape.clone());
        shape
    }
}

pub struct Scheduler {
    id: u64,
    topology: Arc<Topology>,
    /// Owned threads in selection order (packages interleaved first).
    owned: Vec<usize>,
    debug: AtomicBool,
    state: Mutex<AllocationState>,
}

impl Scheduler {
    /// Takes ownership of `max_threads` hardware threads of `topology`.
    /// Values above the topology size are clamped.
    pub fn new(topology: Arc<Topology>, max_threads: usize) -> StressResult<Self> {
        if max_threads == 0 {
            return Err(StressError::Config("scheduler needs max_threads >= 1".into()));
        }
        let total = topology.total_threads();
        let max_threads = if max_threads > total {
            warn!("SCHEDULER: max_threads {} exceeds topology ({}). Clamping.", max_threads, total);
            total
        } else {
            max_threads
        };

        let owned = spread_order(&topology, max_threads);
        let mut free = vec![false; total];
        for &t in &owned {
            free[t] = true;
        }

        info!(
            "SCHEDULER: Owning {} of {} hardware threads ({}).",
            owned.len(),
            total,
            topology
        );

        Ok(Self {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            topology,
            owned,
            debug: AtomicBool::new(false),
            state: Mutex::new(AllocationState {
                free,
                free_count: max_threads,
                next_ticket: 0,
                outstanding: HashMap::new(),
                quarantined: 0,
                shapes: HashMap::new(),
            }),
        })
    }

    /// Turns on placement logging and full accounting checks after every
    /// acquire/release.
    pub fn enable_debug(&self) {
        self.debug.store(true, Ordering::Relaxed);
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn max_threads(&self) -> usize {
        self.owned.len()
    }

    /// Every distinct class shape for `num_actors` roles that fits on the
    /// first `max_threads` owned threads when all of them are free.
    /// Independent of the current allocations.
    pub fn local_affinity_for(&self, num_actors: usize, max_threads: usize) -> Vec<SchedulingClass> {
        let limit = max_threads.min(self.owned.len());
        if num_actors == 0 || num_actors > limit {
            return Vec::new();
        }

        let pool = self.idle_pool(limit);
        enumerate_skeletons(num_actors)
            .into_iter()
            .filter(|class| find_placement(&self.topology, &pool, &Shape::of(class)).is_some())
            .collect()
    }

    /// Whether `class` fits on the owned threads when none are taken.
    /// One placement search, unlike filtering `local_affinity_for`.
    pub fn fits_idle(&self, class: &SchedulingClass) -> bool {
        if class.num_actors() > self.owned.len() {
            return false;
        }
        let pool = self.idle_pool(self.owned.len());
        find_placement(&self.topology, &pool, &Shape::of(class)).is_some()
    }

    fn idle_pool(&self, limit: usize) -> Vec<bool> {
        let mut pool = vec![false; self.topology.total_threads()];
        for &t in &self.owned[..limit] {
            pool[t] = true;
        }
        pool
    }

    /// Reserves threads for `class` in one step, or returns `None` if the
    /// current free set cannot host it. Never blocks on availability.
    pub fn try_acquire(&self, class: &SchedulingClass) -> Option<CpuMap> {
        let mut state = self.state.lock();

        if class.num_actors() > state.free_count {
            trace!("SCHEDULER: {} rejected, only {} threads free", class, state.free_count);
            return None;
        }

        let shape = state.shape_for(class);
        let actor_map = find_placement(&self.topology, &state.free, &shape)?;

        for &t in &actor_map {
            state.free[t] = false;
        }
        state.free_count -= actor_map.len();

        let ticket = state.next_ticket;
        state.next_ticket += 1;

        let map = CpuMap::new(self.id, ticket, class.clone(), actor_map);
        state.outstanding.insert(ticket, map.threads().to_vec());

        if self.debug.load(Ordering::Relaxed) {
            self.check_accounting(&state);
            debug!("SCHEDULER: acquired {} ({} free)", map, state.free_count);
        }
        Some(map)
    }

    /// Returns the map's threads to the free set.
    ///
    /// # Panics
    /// If the map was not issued by this scheduler or is not outstanding.
    pub fn release(&self, map: CpuMap) {
        assert_eq!(
            map.scheduler_id, self.id,
            "CpuMap {} released to a scheduler that did not issue it",
            map
        );

        let mut state = self.state.lock();
        let threads = match state.outstanding.get(&map.ticket) {
            Some(threads) => threads,
            None => panic!("CpuMap {} is not outstanding (double release?)", map),
        };
        assert_eq!(threads.as_slice(), map.threads(), "CpuMap {} does not match its reservation", map);
        for &t in map.threads() {
            assert!(!state.free[t], "thread {} of {} is already free", t, map);
        }

        state.outstanding.remove(&map.ticket);
        for &t in map.threads() {
            state.free[t] = true;
        }
        state.free_count += map.threads().len();

        if self.debug.load(Ordering::Relaxed) {
            self.check_accounting(&state);
            debug!("SCHEDULER: released {} ({} free)", map, state.free_count);
        }
    }

    /// Keeps the map's threads reserved for the scheduler's lifetime. For
    /// placements whose role threads may still be running.
    pub fn quarantine(&self, map: CpuMap) {
        assert_eq!(
            map.scheduler_id, self.id,
            "CpuMap {} quarantined by a scheduler that did not issue it",
            map
        );
        let mut state = self.state.lock();
        assert!(
            state.outstanding.contains_key(&map.ticket),
            "CpuMap {} is not outstanding",
            map
        );
        state.quarantined += 1;
        warn!(
            "SCHEDULER: PLACEMENT_QUARANTINED {} ({} free, {} quarantined)",
            map, state.free_count, state.quarantined
        );
    }

    pub fn quarantined(&self) -> usize {
        self.state.lock().quarantined
    }

    pub fn free_count(&self) -> usize {
        self.state.lock().free_count
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding.len()
    }

    /// Snapshot of the free thread ids, ascending.
    pub fn free_threads(&self) -> Vec<usize> {
        let state = self.state.lock();
        state
            .free
            .iter()
            .enumerate()
            .filter_map(|(t, &f)| f.then_some(t))
            .collect()
    }

    fn check_accounting(&self, state: &AllocationState) {
        let free = state.free.iter().filter(|&&f| f).count();
        assert_eq!(free, state.free_count, "free counter drifted");

        let mut seen = vec![false; state.free.len()];
        for (ticket, threads) in &state.outstanding {
            for &t in threads {
                assert!(!seen[t], "thread {} held by two maps (ticket {})", t, ticket);
                assert!(!state.free[t], "thread {} outstanding but marked free", t);
                seen[t] = true;
            }
        }
        for &t in &self.owned {
            assert!(seen[t] ^ state.free[t], "owned thread {} is neither free nor held", t);
        }
    }
}

/// First thread of every core with packages interleaved, then second
/// threads, and so on; truncated to `limit`.
fn spread_order(topology: &Topology, limit: usize) -> Vec<usize> {
    let mut order = Vec::with_capacity(limit);
    let max_threads_per_core = (0..topology.total_cores())
        .map(|c| topology.core_threads(c).len())
        .max()
        .unwrap_or(0);
    let max_cores_per_package = (0..topology.total_packages())
        .map(|p| topology.package_cores(p).len())
        .max()
        .unwrap_or(0);

    for slot in 0..max_threads_per_core {
        for core_idx in 0..max_cores_per_package {
            for package in 0..topology.total_packages() {
                let Some(&core) = topology.package_cores(package).get(core_idx) else {
                    continue;
                };
                if let Some(&thread) = topology.core_threads(core).get(slot) {
                    order.push(thread);
                    if order.len() == limit {
                        return order;
                    }
                }
            }
        }
    }
    order
}
