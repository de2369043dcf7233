// Generation Barrier

/*
 * STRESS FORGE - GENERATION BARRIER ENGINE
 * =================================================================
 * Component Name: src/harness/engine.rs
 * Core Responsibility: Drives one OS thread per actor role through lock-step rounds over the pair pool.
 * Design Pattern: Epoch Counter Barrier / Last-Arriver Publishes / Lock-Free Holder Swap
 * Forensic Impact: Exactly one role closes each round. Round R+1 never starts before every role
 *                  consumed its slice of round R, so no outcome is ever read from a stale state.
 * =================================================================
 */

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use crossbeam::utils::CachePadded;
use tracing::{debug, error, info, warn};

use super::control::{Control, SpinLoopStyle, StopHandle};
use super::counter::ResultAggregator;
use super::outcome::Outcome;
use super::round_stats::{RoundSnapshot, RoundStats};
use super::state_holder::{consume_slice, StateHolder};
use super::stress_test::StressTest;
use super::stride::StrideRange;
use crate::error::{StressError, StressResult};
use crate::hardware::affinity_manager::{AffinityManager, PinPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Running,
    /// Stop requested, some roles still inside a round.
    Stopping,
    Stopped,
}

// =================================================================
// 1. Shared run state (one per start)
// =================================================================

struct Shared<S, R: Outcome> {
    test: Arc<StressTest<S, R>>,
    control: Arc<Control>,
    strides: StrideRange,
    actors: u64,
    epoch: CachePadded<AtomicU64>,
    holder: ArcSwap<StateHolder<S, R>>,
    stats: Arc<RoundStats>,
}

impl<S: Send + Sync, R: Outcome> Shared<S, R> {
    /// Exits on a stopped holder, or at any wait once the run is aborted.
    /// An aborted role never consumes: a peer may still be inside its actor
    /// pass over the same pairs.
    fn role_loop(&self, role: usize) -> ResultAggregator<R::Key> {
        let mut counter = ResultAggregator::new();
        let mut cur_epoch = 0u64;

        loop {
            let holder = self.holder.load_full();
            if holder.stopped {
                return counter;
            }

            if !holder.pre_run(&self.control) {
                return counter;
            }
            for pair in holder.pairs.iter() {
                // SAFETY: states are replaced only in consume, after the finish gate.
                self.test.run_actor(role, unsafe { pair.state() }, pair.result());
            }
            if !holder.post_run(&self.control) {
                return counter;
            }

            self.consume(&holder, role, &mut counter);

            let ticket = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
            if ticket == cur_epoch + self.actors {
                self.publish(&holder, cur_epoch / (self.actors + 1));
                self.epoch.fetch_add(1, Ordering::AcqRel);
            }

            cur_epoch += self.actors + 1;
            if !self.control.wait_until(|| self.epoch.load(Ordering::Acquire) == cur_epoch) {
                return counter;
            }
        }
    }

    fn consume(&self, holder: &StateHolder<S, R>, role: usize, counter: &mut ResultAggregator<R::Key>) {
        let (from, to) = consume_slice(role, self.actors as usize, holder.pairs.len());
        for pair in holder.pairs.range(from, to) {
            let result = pair.result();
            // SAFETY: every actor pass of this round is behind the finish gate.
            self.test.run_arbiter(unsafe { pair.state() }, result);
            counter.record(result.observe());
            result.reset();
            // SAFETY: `role` is the only one touching indices [from, to) until the barrier.
            unsafe { pair.replace_state(self.test.new_state()) };
        }
    }

    /// Runs on the last arriver only.
    fn publish(&self, holder: &StateHolder<S, R>, round: u64) {
        let len = holder.pairs.len();
        let target = self.strides.grow_target(len, holder.has_lagged());
        let pairs = holder.pairs.grown(target, || self.test.new_state());

        self.stats.record_publish(round, target > len, pairs.len());
        self.holder.store(Arc::new(StateHolder::new(
            self.control.is_stopped(),
            pairs,
            self.actors as usize,
        )));
    }
}

// =================================================================
// 2. Engine
// =================================================================

pub struct GenerationEngine<S, R: Outcome> {
    test: Arc<StressTest<S, R>>,
    strides: StrideRange,
    spin_style: SpinLoopStyle,
    pinning: Option<(Arc<AffinityManager>, PinPlan)>,
}

impl<S: Send + Sync + 'static, R: Outcome> GenerationEngine<S, R> {
    pub fn new(test: Arc<StressTest<S, R>>, strides: StrideRange, spin_style: SpinLoopStyle) -> Self {
        Self {
            test,
            strides,
            spin_style,
            pinning: None,
        }
    }

    /// Pins role `i` onto `plan.cpu_for(i)` when it starts.
    pub fn with_pinning(mut self, affinity: Arc<AffinityManager>, plan: PinPlan) -> Self {
        self.pinning = Some((affinity, plan));
        self
    }

    /// Spawns the role threads and returns immediately. A fresh counter and
    /// holder are built on every call.
    pub fn start(&self) -> StressResult<EngineHandle<R::Key>> {
        let actors = self.test.num_actors();
        let control = Arc::new(Control::new(self.spin_style));
        let stats = Arc::new(RoundStats::new());
        let exited = Arc::new(AtomicUsize::new(0));

        let shared = Arc::new(Shared {
            test: self.test.clone(),
            control: control.clone(),
            strides: self.strides,
            actors: actors as u64,
            epoch: CachePadded::new(AtomicU64::new(0)),
            holder: ArcSwap::from_pointee(StateHolder::initial(actors)),
            stats: stats.clone(),
        });

        let (launch_tx, launch_rx) = channel::unbounded::<()>();
        let (done_tx, done_rx) = channel::unbounded();
        let mut threads = Vec::with_capacity(actors);

        for role in 0..actors {
            let shared = shared.clone();
            let launch = launch_rx.clone();
            let done: Sender<RoleExit<R::Key>> = done_tx.clone();
            let exited = exited.clone();
            let pinning = self.pinning.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-r{}", self.test.name(), role))
                .spawn(move || {
                    let outcome = match launch.recv() {
                        Ok(()) => panic::catch_unwind(AssertUnwindSafe(|| {
                            if let Some((affinity, plan)) = &pinning {
                                affinity.pin_current_thread(plan, role);
                            }
                            shared.role_loop(role)
                        }))
                        .map_err(|payload| {
                            // peers would otherwise wait for this role forever
                            shared.control.abort();
                            panic_message(payload)
                        }),
                        // launch aborted
                        Err(_) => Ok(ResultAggregator::new()),
                    };
                    exited.fetch_add(1, Ordering::AcqRel);
                    let _ = done.send(RoleExit { role, outcome });
                });

            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    drop(launch_tx);
                    error!("ENGINE: failed to spawn role {} of '{}': {}", role, self.test.name(), e);
                    return Err(StressError::Spawn(format!("role {}: {}", role, e)));
                }
            }
        }

        for _ in 0..actors {
            let _ = launch_tx.send(());
        }

        info!(
            "ENGINE: '{}' started with {} roles, strides [{}, {}], {} wait",
            self.test.name(),
            actors,
            self.strides.min,
            self.strides.max,
            self.spin_style
        );

        Ok(EngineHandle {
            name: self.test.name().to_string(),
            actor_names: (0..actors).map(|r| self.test.actor_name(r).to_string()).collect(),
            control,
            stats,
            exited,
            done: done_rx,
            threads,
        })
    }

    /// Runs for `duration`, stops, waits for every role and returns the
    /// merged results.
    pub fn run(&self, duration: Duration) -> StressResult<ResultAggregator<R::Key>> {
        let handle = self.start()?;
        thread::sleep(duration);
        handle.stop();
        handle.join()
    }
}

// =================================================================
// 3. Handle
// =================================================================

struct RoleExit<K: Eq + std::hash::Hash> {
    role: usize,
    outcome: Result<ResultAggregator<K>, String>,
}

#[derive(Debug, Clone)]
pub struct RoleTracker {
    exited: Arc<AtomicUsize>,
    total: usize,
}

impl RoleTracker {
    pub fn exited(&self) -> usize {
        self.exited.load(Ordering::Acquire)
    }

    pub fn all_exited(&self) -> bool {
        self.exited() == self.total
    }
}

pub struct EngineHandle<K: Eq + std::hash::Hash> {
    name: String,
    actor_names: Vec<String>,
    control: Arc<Control>,
    stats: Arc<RoundStats>,
    exited: Arc<AtomicUsize>,
    done: Receiver<RoleExit<K>>,
    threads: Vec<JoinHandle<()>>,
}

impl<K: Eq + std::hash::Hash + Clone> EngineHandle<K> {
    pub fn stop(&self) {
        self.control.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle::new(self.control.clone())
    }

    pub fn state(&self) -> EngineState {
        if self.exited.load(Ordering::Acquire) == self.actor_names.len() {
            EngineState::Stopped
        } else if self.control.is_stopped() {
            EngineState::Stopping
        } else {
            EngineState::Running
        }
    }

    pub fn stats(&self) -> RoundSnapshot {
        self.stats.snapshot()
    }

    pub fn round_report(&self) -> String {
        self.stats.report()
    }

    /// Waits for every role. Does not stop the engine by itself.
    pub fn join(self) -> StressResult<ResultAggregator<K>> {
        self.collect(None)
    }

    /// Like `join`, but gives up after `timeout`. Role threads still
    /// running at that point are left behind.
    pub fn join_timeout(self, timeout: Duration) -> StressResult<ResultAggregator<K>> {
        self.collect(Some(Instant::now() + timeout))
    }

    /// Exit counter that outlives the handle. Callers use it to tell
    /// whether a failed join left role threads running.
    pub fn role_tracker(&self) -> RoleTracker {
        RoleTracker {
            exited: self.exited.clone(),
            total: self.actor_names.len(),
        }
    }

    /// Receives up to `pending` exits of an aborted run, discarding them.
    /// Returns how many never arrived.
    fn drain(&self, mut pending: usize, deadline: Option<Instant>) -> usize {
        while pending > 0 {
            let received = match deadline {
                Some(deadline) => self.done.recv_deadline(deadline).is_ok(),
                None => self.done.recv().is_ok(),
            };
            if !received {
                break;
            }
            pending -= 1;
        }
        pending
    }

    fn collect(self, deadline: Option<Instant>) -> StressResult<ResultAggregator<K>> {
        let actors = self.actor_names.len();
        let mut per_role: Vec<Option<ResultAggregator<K>>> = (0..actors).map(|_| None).collect();

        for _ in 0..actors {
            let exit = match deadline {
                Some(deadline) => match self.done.recv_deadline(deadline) {
                    Ok(exit) => exit,
                    Err(RecvTimeoutError::Timeout) => {
                        self.control.abort();
                        let pending = per_role.iter().filter(|r| r.is_none()).count();
                        error!("ENGINE: '{}' timed out with {} roles still running", self.name, pending);
                        return Err(StressError::Timeout(format!(
                            "{} of {} roles of '{}' did not stop",
                            pending, actors, self.name
                        )));
                    }
                    Err(RecvTimeoutError::Disconnected) => return Err(self.vanished()),
                },
                None => self.done.recv().map_err(|_| self.vanished())?,
            };

            match exit.outcome {
                Ok(counter) => per_role[exit.role] = Some(counter),
                Err(message) => {
                    // peers may be stuck at a gate waiting for this role
                    self.control.abort();
                    error!("ENGINE: role {} of '{}' panicked: {}", exit.role, self.name, message);
                    let pending = per_role.iter().filter(|r| r.is_none()).count() - 1;
                    if self.drain(pending, deadline) == 0 {
                        for handle in self.threads {
                            let _ = handle.join();
                        }
                    } else {
                        warn!("ENGINE: '{}' left role threads behind after a panic", self.name);
                    }
                    return Err(StressError::ActorPanicked {
                        role: exit.role,
                        actor: self.actor_names[exit.role].clone(),
                        message,
                    });
                }
            }
        }

        for handle in self.threads {
            let _ = handle.join();
        }

        let mut merged = ResultAggregator::new();
        for counter in per_role.into_iter().flatten() {
            merged.merge_from(&counter);
        }
        debug!("ENGINE: '{}' stopped. {}", self.name, self.stats.report());
        Ok(merged)
    }

    fn vanished(&self) -> StressError {
        StressError::Spawn(format!("role threads of '{}' exited without reporting", self.name))
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::outcome::IntResult;
    use std::sync::atomic::AtomicI64;

    fn counting_test(actors: usize) -> Arc<StressTest<AtomicI64, IntResult<1>>> {
        let mut builder = StressTest::<AtomicI64, IntResult<1>>::builder("counting", || AtomicI64::new(0));
        for a in 0..actors {
            builder = builder.actor(format!("actor{}", a), |s, _r| {
                s.fetch_add(1, Ordering::Relaxed);
            });
        }
        Arc::new(
            builder
                .arbiter(|s, r| r.set(0, s.load(Ordering::Relaxed)))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn test_every_pair_sees_every_actor_once() {
        let engine = GenerationEngine::new(counting_test(3), StrideRange::fixed(4, 64), SpinLoopStyle::Yield);
        let results = engine.run(Duration::from_millis(50)).unwrap();
        assert!(results.total() > 0);
        let sorted = results.sorted();
        assert_eq!(sorted.len(), 1, "unexpected outcomes {:?}", sorted);
        assert_eq!(sorted[0].0 .0, [3]);
    }

    #[test]
    fn test_state_transitions() {
        let engine = GenerationEngine::new(counting_test(2), StrideRange::fixed(1, 8), SpinLoopStyle::Yield);
        let handle = engine.start().unwrap();
        assert_ne!(handle.state(), EngineState::Stopped);
        handle.stop_handle().stop();
        while handle.state() != EngineState::Stopped {
            thread::yield_now();
        }
        assert!(handle.stats().publishes >= 1);
        handle.join_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn test_single_role_panic_is_reported() {
        let test = Arc::new(
            StressTest::<(), IntResult<1>>::builder("boom", || ())
                .actor("exploder", |_, _| panic!("kaboom"))
                .build()
                .unwrap(),
        );
        let engine = GenerationEngine::new(test, StrideRange::fixed(1, 1), SpinLoopStyle::Spin);
        let handle = engine.start().unwrap();
        match handle.join_timeout(Duration::from_secs(5)) {
            Err(StressError::ActorPanicked { role, actor, message }) => {
                assert_eq!(role, 0);
                assert_eq!(actor, "exploder");
                assert!(message.contains("kaboom"));
            }
            other => panic!("expected ActorPanicked, got {:?}", other.map(|r| r.total())),
        }
    }

    #[test]
    fn test_mid_run_panic_releases_waiting_peers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let test = Arc::new(
            StressTest::<AtomicI64, IntResult<1>>::builder("late_boom", || AtomicI64::new(0))
                .actor("a", |s, _| {
                    s.fetch_add(1, Ordering::Relaxed);
                })
                .actor("b", move |_, _| {
                    if seen.fetch_add(1, Ordering::Relaxed) == 500 {
                        panic!("late failure");
                    }
                })
                .actor("c", |s, _| {
                    s.fetch_add(1, Ordering::Relaxed);
                })
                .build()
                .unwrap(),
        );
        let engine = GenerationEngine::new(test, StrideRange::fixed(1, 1), SpinLoopStyle::Yield);
        let handle = engine.start().unwrap();
        let tracker = handle.role_tracker();

        match handle.join_timeout(Duration::from_secs(5)) {
            Err(StressError::ActorPanicked { actor, message, .. }) => {
                assert_eq!(actor, "b");
                assert!(message.contains("late failure"));
            }
            other => panic!("expected ActorPanicked, got {:?}", other.map(|r| r.total())),
        }
        assert!(calls.load(Ordering::Relaxed) > 500);
        assert!(tracker.all_exited(), "{} of 3 roles exited", tracker.exited());
    }

    #[test]
    fn test_first_publish_sizes_pool_to_min_stride() {
        let engine = GenerationEngine::new(counting_test(1), StrideRange::fixed(16, 16), SpinLoopStyle::Spin);
        let handle = engine.start().unwrap();
        while handle.stats().publishes < 5 {
            thread::yield_now();
        }
        handle.stop();
        let stats = handle.stats();
        handle.join().unwrap();
        assert_eq!(stats.pool_len, 16);
        assert_eq!(stats.grows, 1);
    }
}
