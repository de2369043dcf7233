// Result Slots

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicI64, Ordering};

/// Per-pair result object written by actors and read back at consume time.
///
/// Actors of one round share the slot through `&self`, so implementations
/// use interior mutability (relaxed atomics are enough: the round gates
/// order the accesses).
pub trait Outcome: Default + Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Ord + fmt::Display + Send + 'static;

    /// Snapshot of the fields as a histogram key.
    fn observe(&self) -> Self::Key;

    /// Restores every field to its default value.
    fn reset(&self);
}

/// `N` integer fields, all defaulting to 0.
pub struct IntResult<const N: usize> {
    slots: [AtomicI64; N],
}

impl<const N: usize> Default for IntResult<N> {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| AtomicI64::new(0)),
        }
    }
}

impl<const N: usize> IntResult<N> {
    #[inline]
    pub fn set(&self, idx: usize, value: i64) {
        self.slots[idx].store(value, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, idx: usize) -> i64 {
        self.slots[idx].load(Ordering::Relaxed)
    }
}

impl<const N: usize> fmt::Debug for IntResult<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "IntResult{:?}", self.observe().0)
    }
}

/// Observed values of an [`IntResult`]. Renders as `"1, 0"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IntOutcome<const N: usize>(pub [i64; N]);

impl<const N: usize> fmt::Display for IntOutcome<N> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        Ok(())
    }
}

impl<const N: usize> Outcome for IntResult<N> {
    type Key = IntOutcome<N>;

    fn observe(&self) -> IntOutcome<N> {
        IntOutcome(std::array::from_fn(|i| self.get(i)))
    }

    fn reset(&self) {
        for slot in &self.slots {
            slot.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_and_reset() {
        let r = IntResult::<2>::default();
        r.set(0, 1);
        r.set(1, -3);
        assert_eq!(r.observe(), IntOutcome([1, -3]));
        assert_eq!(r.observe().to_string(), "1, -3");
        r.reset();
        assert_eq!(r.observe(), IntOutcome([0, 0]));
    }
}
