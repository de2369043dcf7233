/*
 * STRESS FORGE - BUILT-IN TEST CATALOG
 * =================================================================
 * Component Name: src/catalog/mod.rs
 * Core Responsibility: Small classic concurrency probes run by the `stress_core` binary.
 * Design Pattern: Factory Functions
 * =================================================================
 */

use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};
use std::sync::Arc;

use crate::error::StressResult;
use crate::harness::outcome::IntResult;
use crate::harness::stress_test::{Expect, StressTest};
use crate::harness::suite::DynStressTest;

/// Two `fetch_add`s on one counter. Each actor must see a distinct value.
pub fn atomic_increment() -> StressResult<StressTest<AtomicI64, IntResult<2>>> {
    StressTest::builder("atomic_increment", || AtomicI64::new(0))
        .description("fetch_add is atomic")
        .actor("actor1", |s: &AtomicI64, r: &IntResult<2>| r.set(0, s.fetch_add(1, Ordering::Relaxed) + 1))
        .actor("actor2", |s: &AtomicI64, r: &IntResult<2>| r.set(1, s.fetch_add(1, Ordering::Relaxed) + 1))
        .outcome("1, 2", Expect::Acceptable, "actor1 first")
        .outcome("2, 1", Expect::Acceptable, "actor2 first")
        .build()
}

/// Load-then-store increment. Lost updates are expected.
pub fn racy_increment() -> StressResult<StressTest<AtomicI64, IntResult<1>>> {
    fn bump(s: &AtomicI64, _: &IntResult<1>) {
        let v = s.load(Ordering::Relaxed);
        s.store(v + 1, Ordering::Relaxed);
    }

    StressTest::builder("racy_increment", || AtomicI64::new(0))
        .description("read-modify-write split into load and store")
        .actor("actor1", bump)
        .actor("actor2", bump)
        .arbiter(|s, r| r.set(0, s.load(Ordering::Relaxed)))
        .outcome("2", Expect::Acceptable, "both increments landed")
        .outcome("1", Expect::Interesting, "lost update")
        .build()
}

pub struct Dekker {
    x: AtomicI32,
    y: AtomicI32,
}

impl Dekker {
    fn new() -> Self {
        Self {
            x: AtomicI32::new(0),
            y: AtomicI32::new(0),
        }
    }
}

/// Store buffering with relaxed accesses: both loads may miss both stores.
pub fn store_buffering() -> StressResult<StressTest<Dekker, IntResult<2>>> {
    StressTest::builder("store_buffering", Dekker::new)
        .description("Dekker-style store buffering, relaxed")
        .actor("actor1", |s: &Dekker, r: &IntResult<2>| {
            s.x.store(1, Ordering::Relaxed);
            r.set(0, s.y.load(Ordering::Relaxed) as i64);
        })
        .actor("actor2", |s: &Dekker, r: &IntResult<2>| {
            s.y.store(1, Ordering::Relaxed);
            r.set(1, s.x.load(Ordering::Relaxed) as i64);
        })
        .outcome("0, 1", Expect::Acceptable, "actor1 ran first")
        .outcome("1, 0", Expect::Acceptable, "actor2 ran first")
        .outcome("1, 1", Expect::Acceptable, "interleaved")
        .outcome("0, 0", Expect::Interesting, "both stores buffered")
        .build()
}

pub struct Mailbox {
    data: AtomicI32,
    ready: AtomicI32,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            data: AtomicI32::new(0),
            ready: AtomicI32::new(0),
        }
    }
}

/// Release/acquire message passing: seeing the flag implies seeing the data.
pub fn message_passing() -> StressResult<StressTest<Mailbox, IntResult<2>>> {
    StressTest::builder("message_passing", Mailbox::new)
        .description("release store of a flag publishes the data written before it")
        .actor("writer", |s: &Mailbox, _: &IntResult<2>| {
            s.data.store(1, Ordering::Relaxed);
            s.ready.store(1, Ordering::Release);
        })
        .actor("reader", |s: &Mailbox, r: &IntResult<2>| {
            r.set(0, s.ready.load(Ordering::Acquire) as i64);
            r.set(1, s.data.load(Ordering::Relaxed) as i64);
        })
        .outcome("0, 0", Expect::Acceptable, "reader ran first")
        .outcome("0, 1", Expect::Acceptable, "data seen early")
        .outcome("1, 1", Expect::Acceptable, "message delivered")
        .outcome("1, 0", Expect::Forbidden, "flag seen without its data")
        .build()
}

/// Every built-in test.
pub fn all() -> StressResult<Vec<Arc<dyn DynStressTest>>> {
    Ok(vec![
        atomic_increment()?.into_dyn(),
        racy_increment()?.into_dyn(),
        store_buffering()?.into_dyn(),
        message_passing()?.into_dyn(),
    ])
}
