/*
 * STRESS FORGE - SYSTEM ENTRY POINT
 * =================================================================
 * Component: src/main.rs
 * Responsibility: Load config, build topology and scheduler, run the built-in catalog over
 *                 every placement shape, report. Ctrl-C cancels cleanly.
 * Status: LIVE OPERATION
 * =================================================================
 */

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info, warn};

use stress_forge::catalog;
use stress_forge::harness::{Runner, Status, Suite, Verdict};
use stress_forge::utils::config_loader::{ConfigManager, TopologyConfig};
use stress_forge::utils::logger::init_logger;
use stress_forge::{Scheduler, Topology};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a. configuration: argv[1], then $STRESS_CONFIG, then the default path
    let config_path: PathBuf = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STRESS_CONFIG").ok())
        .unwrap_or_else(|| "config/stress.toml".to_string())
        .into();
    let manager = ConfigManager::load(Some(config_path.as_path())).context("loading configuration")?;
    let cfg = manager.current();

    // b. logging
    let _guard = init_logger(&cfg.logging.dir, &cfg.logging.file, &cfg.logging.level);
    info!("STRESS FORGE: Boot sequence initiated (config: {:?})", config_path);
    manager.log_effective();

    // c. hardware model
    let topology = Arc::new(match &cfg.scheduler.topology {
        TopologyConfig::Detect => Topology::detect(),
        TopologyConfig::Preset {
            packages,
            cores_per_package,
            threads_per_core,
        } => Topology::preset(*packages, *cores_per_package, *threads_per_core)?,
    });
    info!("TOPOLOGY: {}", topology);

    let max_threads = cfg.scheduler.max_threads.unwrap_or(topology.total_threads());
    let scheduler = Arc::new(Scheduler::new(topology.clone(), max_threads)?);
    if cfg.scheduler.debug {
        scheduler.enable_debug();
    }

    // d. suite
    let cancel = Arc::new(AtomicBool::new(false));
    let runner = Runner::new(cfg.run.clone(), scheduler.clone()).with_cancel(cancel.clone());
    let suite = Suite::new(runner);
    let tests = catalog::all()?;
    let jobs = suite.matrix(&tests);
    info!("SUITE: {} tests expand to {} jobs", tests.len(), jobs.len());

    let mut task = tokio::task::spawn_blocking(move || suite.run(jobs));
    let results = tokio::select! {
        joined = &mut task => joined?,
        _ = signal::ctrl_c() => {
            warn!("SHUTDOWN SIGNAL RECEIVED: finishing current iterations...");
            cancel.store(true, Ordering::Relaxed);
            task.await?
        }
    };

    // e. report
    let mut failed = 0;
    for outcome in &results {
        match outcome {
            Ok(r) => {
                info!(
                    "[{}] {} {} on {:?}: {} samples, strides [{}, {}] cap {}",
                    r.status, r.name, r.class, r.cpu_map, r.total_samples(), r.min_stride, r.max_stride, r.stride_cap
                );
                for (state, count) in &r.states {
                    info!("    {:>12}  {:>12}", state, count);
                }
                if r.status != Status::Normal || r.grading.verdict == Verdict::Failed {
                    failed += 1;
                }
            }
            Err(e) => {
                error!("JOB FAILED: {}", e);
                failed += 1;
            }
        }
    }

    info!("STRESS FORGE: {} jobs, {} failed", results.len(), failed);
    if failed > 0 {
        anyhow::bail!("{} of {} jobs failed", failed, results.len());
    }
    Ok(())
}
