// Non-blocking Logger

/*
 * STRESS FORGE - NON-BLOCKING LOGGER
 * =================================================================
 * Component Name: src/utils/logger.rs
 * Core Responsibility:
 * 1. Log to a daily rolling file without stalling role threads.
 * 2. Structured audit records for placements and run outcomes.
 * Design Pattern: Async Appender / Layered Subscriber
 * =================================================================
 */

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::harness::runner::{Status, TestResult};
use crate::scheduler::CpuMap;

// =================================================================
// 1. Subscriber setup
// =================================================================

/// Installs the global subscriber: file layer (non-blocking, daily rolling)
/// plus a compact stderr layer. `RUST_LOG` wins over `level`.
///
/// Call once from `main` and keep the guard alive until exit, otherwise
/// buffered lines are lost.
pub fn init_logger(log_dir: &str, file_name: &str, level: &str) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_dir, file_name);
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .with_ansi(false)
        .compact();

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();

    tracing::info!("LOGGER: Initialized non-blocking logging system at {}/{}", log_dir, file_name);

    guard
}

// =================================================================
// 2. Structured audit helpers
// =================================================================

/// Which hardware threads a test got.
pub fn log_placement(test: &str, map: &CpuMap) {
    tracing::info!(
        target: "PLACEMENT_AUDIT",
        test = test,
        ticket = map.ticket(),
        class = %map.class(),
        cpus = ?map.actor_map(),
        "PLACEMENT GRANTED"
    );
}

pub fn log_run_outcome(result: &TestResult) {
    if result.status == Status::Normal && result.passed() {
        tracing::info!(
            target: "RUN_AUDIT",
            test = %result.name,
            class = %result.class,
            verdict = ?result.grading.verdict,
            samples = result.total_samples(),
            iterations = result.iterations,
            stride_cap = %result.stride_cap,
            "RUN COMPLETE"
        );
    } else {
        tracing::warn!(
            target: "RUN_AUDIT",
            test = %result.name,
            class = %result.class,
            status = %result.status,
            verdict = ?result.grading.verdict,
            messages = ?result.messages,
            "RUN FAILED"
        );
    }
}
