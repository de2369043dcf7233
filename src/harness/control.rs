use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;

/// What a role does while it waits at a gate or the round barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpinLoopStyle {
    /// Hot spin with a CPU relax hint only.
    Spin,
    /// Give the processor away on every failed check.
    Yield,
}

impl SpinLoopStyle {
    #[inline]
    pub fn pause(self) {
        match self {
            SpinLoopStyle::Spin => std::hint::spin_loop(),
            SpinLoopStyle::Yield => std::thread::yield_now(),
        }
    }

    /// Busy-waits until `done()` holds.
    #[inline]
    pub fn wait_until(self, mut done: impl FnMut() -> bool) {
        while !done() {
            self.pause();
        }
    }
}

impl fmt::Display for SpinLoopStyle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SpinLoopStyle::Spin => write!(f, "spin"),
            SpinLoopStyle::Yield => write!(f, "yield"),
        }
    }
}

/// Run-wide switches shared by the driver and every role of one engine.
///
/// `stop` ends the run at the next round boundary. `abort` also releases
/// roles parked at a gate or at the round barrier, and is only used once a
/// role is known to be gone.
#[derive(Debug)]
pub struct Control {
    stopped: AtomicBool,
    aborted: AtomicBool,
    spin_style: SpinLoopStyle,
}

impl Control {
    pub fn new(spin_style: SpinLoopStyle) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            aborted: AtomicBool::new(false),
            spin_style,
        }
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.stop();
    }

    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    /// Waits in the run's spin style until `done()` holds. Returns `false`
    /// if the run was aborted first.
    #[inline]
    pub fn wait_until(&self, mut done: impl FnMut() -> bool) -> bool {
        while !done() {
            if self.is_aborted() {
                return false;
            }
            self.spin_style.pause();
        }
        true
    }
}

/// Cloneable remote for stopping a running engine.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<Control>);

impl StopHandle {
    pub(crate) fn new(control: Arc<Control>) -> Self {
        Self(control)
    }

    /// Takes effect when every role reaches its next holder read.
    pub fn stop(&self) {
        self.0.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_stopped()
    }
}
