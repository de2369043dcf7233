// Layered Config

/*
 * STRESS FORGE - CONFIGURATION MANAGER
 * =================================================================
 * Component Name: src/utils/config_loader.rs
 * Core Responsibility: Built-in defaults, then an optional TOML file, then STRESS__* environment overrides.
 * Design Pattern: Layered Sources / Atomic Reference Swap
 * Forensic Impact: The effective configuration is logged once the logger is up. "Which stride
 *                  budget did that run use?" always has an answer.
 * =================================================================
 */

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{StressError, StressResult};
use crate::harness::control::SpinLoopStyle;
use crate::harness::stride::StridePolicy;

// =================================================================
// Configuration schema
// =================================================================

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct HarnessConfig {
    pub run: RunConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RunConfig {
    /// Per-iteration run time, milliseconds.
    pub time_ms: u64,
    pub iterations: usize,
    pub min_stride: usize,
    pub max_stride: usize,
    pub max_footprint_mb: u64,
    pub spin_style: SpinLoopStyle,
    pub pin_threads: bool,
    /// Jobs run concurrently by a suite.
    pub parallelism: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_ms: 1000,
            iterations: 5,
            min_stride: 10,
            max_stride: 10_000,
            max_footprint_mb: 100,
            spin_style: SpinLoopStyle::Yield,
            pin_threads: true,
            parallelism: 1,
        }
    }
}

impl RunConfig {
    pub fn time(&self) -> Duration {
        Duration::from_millis(self.time_ms)
    }

    pub fn stride_policy(&self) -> StridePolicy {
        StridePolicy {
            min_stride: self.min_stride,
            max_stride: self.max_stride,
            max_footprint_mb: self.max_footprint_mb,
            time_budget: self.time(),
        }
    }

    pub fn validate(&self) -> StressResult<()> {
        if self.time_ms == 0 {
            return Err(StressError::Config("run.time_ms must be >= 1".into()));
        }
        if self.iterations == 0 {
            return Err(StressError::Config("run.iterations must be >= 1".into()));
        }
        if self.min_stride == 0 {
            return Err(StressError::Config("run.min_stride must be >= 1".into()));
        }
        if self.min_stride > self.max_stride {
            return Err(StressError::Config(format!(
                "run.min_stride ({}) exceeds run.max_stride ({})",
                self.min_stride, self.max_stride
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Hardware threads the scheduler may hand out. Absent: all of them.
    pub max_threads: Option<usize>,
    pub debug: bool,
    pub topology: TopologyConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum TopologyConfig {
    Detect,
    Preset {
        packages: usize,
        cores_per_package: usize,
        threads_per_core: usize,
    },
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub dir: String,
    pub file: String,
    pub level: String,
}

// =================================================================
// Manager
// =================================================================

pub struct ConfigManager {
    file_path: Option<PathBuf>,
    current: ArcSwap<HarnessConfig>,
}

impl ConfigManager {
    /// Loads and validates. A missing file is not an error: defaults and
    /// the environment still apply.
    ///
    /// Runs before the logger exists, so it logs nothing. Callers report the
    /// result with `log_effective` once logging is up.
    pub fn load(path: Option<&Path>) -> StressResult<Self> {
        let file_path = path.map(Path::to_path_buf);
        let initial = Self::load_from_sources(file_path.as_deref())?;

        Ok(Self {
            file_path,
            current: ArcSwap::from_pointee(initial),
        })
    }

    fn load_from_sources(path: Option<&Path>) -> StressResult<HarnessConfig> {
        let defaults = RunConfig::default();
        let mut builder = Config::builder()
            .set_default("run.time_ms", defaults.time_ms as i64)
            .and_then(|b| b.set_default("run.iterations", defaults.iterations as i64))
            .and_then(|b| b.set_default("run.min_stride", defaults.min_stride as i64))
            .and_then(|b| b.set_default("run.max_stride", defaults.max_stride as i64))
            .and_then(|b| b.set_default("run.max_footprint_mb", defaults.max_footprint_mb as i64))
            .and_then(|b| b.set_default("run.spin_style", defaults.spin_style.to_string()))
            .and_then(|b| b.set_default("run.pin_threads", defaults.pin_threads))
            .and_then(|b| b.set_default("run.parallelism", defaults.parallelism as i64))
            .and_then(|b| b.set_default("scheduler.debug", false))
            .and_then(|b| b.set_default("scheduler.topology.mode", "detect"))
            .and_then(|b| b.set_default("logging.dir", "./logs"))
            .and_then(|b| b.set_default("logging.file", "stress_core.log"))
            .and_then(|b| b.set_default("logging.level", "info"))
            .map_err(|e| StressError::Config(format!("Default Error: {}", e)))?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let settings = builder
            .add_source(
                Environment::with_prefix("STRESS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| StressError::Config(format!("Build Error: {}", e)))?;

        let config = settings
            .try_deserialize::<HarnessConfig>()
            .map_err(|e| StressError::Config(format!("Parse Error: {}", e)))?;
        config.run.validate()?;
        Ok(config)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// False when a file was named but does not exist.
    pub fn file_found(&self) -> bool {
        self.file_path.as_deref().map_or(true, Path::exists)
    }

    /// Reports the file used and the effective snapshot.
    pub fn log_effective(&self) {
        if !self.file_found() {
            warn!("CONFIG: {:?} not found. Using defaults and environment.", self.file_path);
        }
        let cfg = self.current();
        info!(
            "CONFIG: Loaded (file: {:?}). run = {:?}, scheduler = {:?}",
            self.file_path, cfg.run, cfg.scheduler
        );
    }

    /// Re-reads every source and swaps the snapshot in. On failure the old
    /// snapshot stays active.
    pub fn reload(&self) -> StressResult<Arc<HarnessConfig>> {
        match Self::load_from_sources(self.file_path.as_deref()) {
            Ok(fresh) => {
                let fresh = Arc::new(fresh);
                self.current.store(fresh.clone());
                if !self.file_found() {
                    warn!("CONFIG: {:?} not found. Using defaults and environment.", self.file_path);
                }
                info!("CONFIG: Reloaded.");
                Ok(fresh)
            }
            Err(e) => {
                warn!("CONFIG: Reload failed ({}). Keeping previous configuration.", e);
                Err(e)
            }
        }
    }

    pub fn current(&self) -> Arc<HarnessConfig> {
        self.current.load_full()
    }
}
