/*
 * STRESS FORGE - ROUND SNAPSHOT & PAIR ARENA
 * =================================================================
 * Component Name: src/harness/state_holder.rs
 * Core Responsibility: Immutable per-round view of the (state, result) pool plus the round gates.
 * Design Pattern: Append-Only Segmented Arena / Copy-On-Grow View
 * Forensic Impact: Growing never moves a live pair. Roles holding last round's view and roles
 *                  holding the new one see the same slots at the same indices.
 * =================================================================
 */

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::utils::CachePadded;

use super::control::Control;
use super::outcome::Outcome;

// =================================================================
// 1. Pair
// =================================================================

/// One work item: racy state plus the result slot the actors fill in.
pub struct Pair<S, R> {
    state: UnsafeCell<S>,
    result: R,
}

// SAFETY: actors only take `&S` during the run phase. The state is replaced
// (`&mut`) only during consume, by the single role owning that index, after
// the finish gate has ordered every actor access before it.
unsafe impl<S: Send + Sync, R: Send + Sync> Sync for Pair<S, R> {}

impl<S, R: Outcome> Pair<S, R> {
    pub fn new(state: S) -> Self {
        Self {
            state: UnsafeCell::new(state),
            result: R::default(),
        }
    }

    /// # Safety
    /// No `replace_state` on this pair may run while the reference lives.
    #[inline]
    pub(crate) unsafe fn state(&self) -> &S {
        &*self.state.get()
    }

    #[inline]
    pub fn result(&self) -> &R {
        &self.result
    }

    /// # Safety
    /// The caller must be the only thread touching this pair's state and no
    /// reference from `state()` may be alive.
    #[inline]
    pub(crate) unsafe fn replace_state(&self, fresh: S) {
        *self.state.get() = fresh;
    }
}

// =================================================================
// 2. Segmented view
// =================================================================

/// Ordered list of pair segments. Cloning shares the segments.
pub struct PairView<S, R> {
    segments: Vec<Arc<[Pair<S, R>]>>,
    /// First global index of each segment.
    starts: Vec<usize>,
    len: usize,
}

impl<S, R> Clone for PairView<S, R> {
    fn clone(&self) -> Self {
        Self {
            segments: self.segments.clone(),
            starts: self.starts.clone(),
            len: self.len,
        }
    }
}

impl<S, R: Outcome> PairView<S, R> {
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
            starts: Vec::new(),
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn get(&self, idx: usize) -> Option<&Pair<S, R>> {
        if idx >= self.len {
            return None;
        }
        let seg = self.starts.partition_point(|&s| s <= idx) - 1;
        Some(&self.segments[seg][idx - self.starts[seg]])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pair<S, R>> {
        self.segments.iter().flat_map(|s| s.iter())
    }

    /// Pairs in `[from, to)`.
    pub fn range(&self, from: usize, to: usize) -> impl Iterator<Item = &Pair<S, R>> {
        let to = to.min(self.len);
        self.iter().skip(from).take(to.saturating_sub(from))
    }

    /// New view sharing every existing slot and appending fresh ones up to
    /// `new_len`. Never shrinks.
    pub fn grown(&self, new_len: usize, mut make_state: impl FnMut() -> S) -> Self {
        if new_len <= self.len {
            return self.clone();
        }
        let fresh: Arc<[Pair<S, R>]> = (self.len..new_len).map(|_| Pair::new(make_state())).collect();

        let mut next = self.clone();
        next.starts.push(self.len);
        next.segments.push(fresh);
        next.len = new_len;
        next
    }
}

/// Contiguous near-equal slice of `len` owned by `role` of `actors`.
#[inline]
pub fn consume_slice(role: usize, actors: usize, len: usize) -> (usize, usize) {
    (role * len / actors, (role + 1) * len / actors)
}

// =================================================================
// 3. StateHolder
// =================================================================

/// Everything roles need for one round. Published once, never mutated
/// apart from the gate counters.
pub struct StateHolder<S, R> {
    pub stopped: bool,
    pub pairs: PairView<S, R>,
    expected: usize,
    not_started: CachePadded<AtomicUsize>,
    entered: CachePadded<AtomicUsize>,
    not_finished: CachePadded<AtomicUsize>,
    lagged: AtomicBool,
}

impl<S, R: Outcome> StateHolder<S, R> {
    pub fn new(stopped: bool, pairs: PairView<S, R>, expected: usize) -> Self {
        Self {
            stopped,
            pairs,
            expected,
            not_started: CachePadded::new(AtomicUsize::new(expected)),
            entered: CachePadded::new(AtomicUsize::new(0)),
            not_finished: CachePadded::new(AtomicUsize::new(expected)),
            lagged: AtomicBool::new(false),
        }
    }

    /// First holder of a run: empty pool, flagged as lagging so the first
    /// publish sizes the pool.
    pub fn initial(expected: usize) -> Self {
        let holder = Self::new(false, PairView::empty(), expected);
        holder.lagged.store(true, Ordering::Relaxed);
        holder
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Start gate: returns `true` once every role has arrived, `false` if
    /// the run was aborted while waiting.
    pub fn pre_run(&self, control: &Control) -> bool {
        self.not_started.fetch_sub(1, Ordering::AcqRel);
        if !control.wait_until(|| self.not_started.load(Ordering::Acquire) == 0) {
            return false;
        }
        self.entered.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Finish gate: returns `true` once every role has finished its actor
    /// pass, `false` if the run was aborted while waiting. Finishing before
    /// some role even entered its pass marks the round as lagging.
    pub fn post_run(&self, control: &Control) -> bool {
        if self.entered.load(Ordering::Acquire) < self.expected {
            self.lagged.store(true, Ordering::Relaxed);
        }
        self.not_finished.fetch_sub(1, Ordering::AcqRel);
        control.wait_until(|| self.not_finished.load(Ordering::Acquire) == 0)
    }

    /// Read by the publishing role after the round barrier.
    pub fn has_lagged(&self) -> bool {
        self.lagged.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::control::SpinLoopStyle;
    use crate::harness::outcome::IntResult;

    type P = IntResult<1>;

    #[test]
    fn test_grow_keeps_existing_slots() {
        let mut next = 0;
        let v0: PairView<u32, P> = PairView::empty();
        let v1 = v0.grown(2, || {
            next += 1;
            next
        });
        let v2 = v1.grown(5, || {
            next += 1;
            next
        });
        assert_eq!(v1.len(), 2);
        assert_eq!(v2.len(), 5);
        assert_eq!(v2.segment_count(), 2);
        for i in 0..2 {
            assert!(std::ptr::eq(v1.get(i).unwrap(), v2.get(i).unwrap()));
        }
        let states: Vec<u32> = v2.iter().map(|p| unsafe { *p.state() }).collect();
        assert_eq!(states, vec![1, 2, 3, 4, 5]);
        assert!(v2.get(5).is_none());
    }

    #[test]
    fn test_grow_never_shrinks() {
        let v: PairView<u32, P> = PairView::empty().grown(4, || 0);
        assert_eq!(v.grown(2, || 9).len(), 4);
    }

    #[test]
    fn test_consume_slices_partition_the_pool() {
        for actors in 1..=5 {
            for len in 0..40 {
                let mut covered = 0;
                for role in 0..actors {
                    let (l, r) = consume_slice(role, actors, len);
                    assert_eq!(l, covered);
                    assert!(r >= l);
                    covered = r;
                }
                assert_eq!(covered, len);
            }
        }
    }

    #[test]
    fn test_range_matches_indices() {
        let mut n = 0;
        let v: PairView<u32, P> = PairView::empty().grown(3, || {
            n += 1;
            n
        });
        let v = v.grown(6, || {
            n += 1;
            n
        });
        let picked: Vec<u32> = v.range(2, 5).map(|p| unsafe { *p.state() }).collect();
        assert_eq!(picked, vec![3, 4, 5]);
    }

    #[test]
    fn test_single_role_gates_do_not_block() {
        let control = Control::new(SpinLoopStyle::Spin);
        let holder: StateHolder<u32, P> = StateHolder::new(false, PairView::empty(), 1);
        assert!(holder.pre_run(&control));
        assert!(holder.post_run(&control));
        assert!(!holder.has_lagged());
        assert!(StateHolder::<u32, P>::initial(3).has_lagged());
    }

    #[test]
    fn test_aborted_gate_lets_a_lone_role_out() {
        // two roles expected, only one ever arrives
        let control = Control::new(SpinLoopStyle::Spin);
        control.abort();
        let holder: StateHolder<u32, P> = StateHolder::new(false, PairView::empty(), 2);
        assert!(!holder.pre_run(&control));
        assert!(!holder.post_run(&control));
    }
}
