// Round Timer

/*
 * STRESS FORGE - ROUND STATISTICS
 * =================================================================
 * Component Name: src/harness/round_stats.rs
 * Core Responsibility: Counts rounds, publishes and grows of one engine run, plus a round-time histogram.
 * Design Pattern: Atomic Sampling / Fixed Buckets
 * Forensic Impact: A second publish in the same round means two roles both believed they were
 *                  the last arriver. That is a barrier bug, and this is where it shows up.
 * =================================================================
 */

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{error, warn};

/// Round boundaries: < 1us, < 10us, < 100us, < 1ms, slower.
const BUCKET_LIMITS_NS: [u64; 4] = [1_000, 10_000, 100_000, 1_000_000];

/// Rounds slower than this are logged.
const SPIKE_THRESHOLD_NS: u64 = 50_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoundSnapshot {
    pub publishes: u64,
    pub grows: u64,
    pub duplicate_publishes: u64,
    pub pool_len: u64,
    pub min_round_ns: u64,
    pub max_round_ns: u64,
    pub sum_round_ns: u64,
    pub buckets: [u64; 5],
}

impl RoundSnapshot {
    /// Completed rounds. Every completed round publishes exactly once.
    pub fn rounds(&self) -> u64 {
        self.publishes - self.duplicate_publishes
    }

    pub fn avg_round_ns(&self) -> u64 {
        if self.publishes == 0 {
            0
        } else {
            self.sum_round_ns / self.publishes
        }
    }
}

/// Written only by the publishing role of each round.
#[derive(Debug)]
pub struct RoundStats {
    origin: Instant,
    last_publish_ns: AtomicU64,
    last_round: AtomicU64,
    publishes: AtomicU64,
    grows: AtomicU64,
    duplicate_publishes: AtomicU64,
    pool_len: AtomicU64,
    min_round_ns: AtomicU64,
    max_round_ns: AtomicU64,
    sum_round_ns: AtomicU64,
    buckets: [AtomicU64; 5],
}

impl Default for RoundStats {
    fn default() -> Self {
        Self::new()
    }
}

impl RoundStats {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_publish_ns: AtomicU64::new(0),
            last_round: AtomicU64::new(u64::MAX),
            publishes: AtomicU64::new(0),
            grows: AtomicU64::new(0),
            duplicate_publishes: AtomicU64::new(0),
            pool_len: AtomicU64::new(0),
            min_round_ns: AtomicU64::new(u64::MAX),
            max_round_ns: AtomicU64::new(0),
            sum_round_ns: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }

    /// Called once per publish with the round number the publisher is closing.
    pub fn record_publish(&self, round: u64, grew: bool, pool_len: usize) {
        if self.last_round.swap(round, Ordering::Relaxed) == round {
            self.duplicate_publishes.fetch_add(1, Ordering::Relaxed);
            error!("BARRIER_FAULT: second publish in round {}", round);
        }

        let now = self.origin.elapsed().as_nanos() as u64;
        let round_ns = now.saturating_sub(self.last_publish_ns.swap(now, Ordering::Relaxed));
        if round_ns > SPIKE_THRESHOLD_NS {
            warn!("ROUND_SPIKE: round {} took {} ms", round, round_ns / 1_000_000);
        }

        self.publishes.fetch_add(1, Ordering::Relaxed);
        if grew {
            self.grows.fetch_add(1, Ordering::Relaxed);
        }
        self.pool_len.store(pool_len as u64, Ordering::Relaxed);
        self.min_round_ns.fetch_min(round_ns, Ordering::Relaxed);
        self.max_round_ns.fetch_max(round_ns, Ordering::Relaxed);
        self.sum_round_ns.fetch_add(round_ns, Ordering::Relaxed);

        let bucket = BUCKET_LIMITS_NS
            .iter()
            .position(|&limit| round_ns < limit)
            .unwrap_or(BUCKET_LIMITS_NS.len());
        self.buckets[bucket].fetch_add(1, Ordering::Relaxed);
    }

    pub fn publishes(&self) -> u64 {
        self.publishes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        let min = self.min_round_ns.load(Ordering::Relaxed);
        RoundSnapshot {
            publishes: self.publishes.load(Ordering::Relaxed),
            grows: self.grows.load(Ordering::Relaxed),
            duplicate_publishes: self.duplicate_publishes.load(Ordering::Relaxed),
            pool_len: self.pool_len.load(Ordering::Relaxed),
            min_round_ns: if min == u64::MAX { 0 } else { min },
            max_round_ns: self.max_round_ns.load(Ordering::Relaxed),
            sum_round_ns: self.sum_round_ns.load(Ordering::Relaxed),
            buckets: std::array::from_fn(|i| self.buckets[i].load(Ordering::Relaxed)),
        }
    }

    pub fn report(&self) -> String {
        let s = self.snapshot();
        let mut out = String::from("--- ROUND REPORT (nanoseconds) ---\n");
        let _ = writeln!(
            out,
            "Rounds: {} (grows: {}, duplicate publishes: {}, pool: {})",
            s.rounds(),
            s.grows,
            s.duplicate_publishes,
            s.pool_len
        );
        let _ = writeln!(out, "Avg: {} ns  Min: {} ns  Max: {} ns", s.avg_round_ns(), s.min_round_ns, s.max_round_ns);
        let _ = writeln!(
            out,
            "Distribution: [<1µs: {}, <10µs: {}, <100µs: {}, <1ms: {}, SLOW: {}]",
            s.buckets[0], s.buckets[1], s.buckets[2], s.buckets[3], s.buckets[4]
        );
        out
    }
}
