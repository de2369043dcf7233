// Hardware Map

/*
 * STRESS FORGE - CPU TOPOLOGY MODEL
 * =================================================================
 * Component Name: src/hardware/topology.rs
 * Core Responsibility: Static model of hardware threads grouped into cores grouped into packages.
 * Design Pattern: Immutable Value Object / Dense Index Tables
 * Forensic Impact: Every placement decision is expressed in these ids. A wrong mapping here
 *                  silently turns a "same core" test into a "cross socket" one.
 * =================================================================
 */

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

/// Failure to build a topology from malformed input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyParseError {
    #[error("topology has no hardware threads")]
    Empty,
    #[error("invalid preset dimension: {name} = {value}")]
    InvalidDimension { name: &'static str, value: usize },
    #[error("thread ids are not dense: expected {expected}, found {found}")]
    SparseThreadIds { expected: usize, found: usize },
    #[error("duplicate thread id {0}")]
    DuplicateThread(usize),
    #[error("core {core} is claimed by packages {first} and {second}")]
    CoreSpansPackages { core: usize, first: usize, second: usize },
    #[error("line {line}: {reason}")]
    MalformedLine { line: usize, reason: String },
    #[error("processor {processor} is missing field `{field}`")]
    MissingField { processor: usize, field: &'static str },
    #[error("cannot read topology source: {0}")]
    Unreadable(String),
}

/// One hardware thread as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadRecord {
    pub package: usize,
    pub core: usize,
    pub thread: usize,
}

/// Where a topology came from (for logs only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopologySource {
    Preset,
    Records,
    Cpuinfo,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Topology {
    source: TopologySource,
    /// Indexed by thread id.
    threads: Vec<ThreadRecord>,
    /// core id -> thread ids (ascending)
    core_threads: Vec<Vec<usize>>,
    /// package id -> core ids (ascending)
    package_cores: Vec<Vec<usize>>,
}

impl Topology {
    /// Synthetic rectangular topology, thread ids laid out package-major.
    pub fn preset(
        packages: usize,
        cores_per_package: usize,
        threads_per_core: usize,
    ) -> Result<Self, TopologyParseError> {
        for (name, value) in [
            ("packages", packages),
            ("cores_per_package", cores_per_package),
            ("threads_per_core", threads_per_core),
        ] {
            if value == 0 {
                return Err(TopologyParseError::InvalidDimension { name, value });
            }
        }

        let mut records = Vec::with_capacity(packages * cores_per_package * threads_per_core);
        for p in 0..packages {
            for c in 0..cores_per_package {
                for _ in 0..threads_per_core {
                    records.push(ThreadRecord {
                        package: p,
                        core: p * cores_per_package + c,
                        thread: records.len(),
                    });
                }
            }
        }

        Self::build(records, TopologySource::Preset)
    }

    /// Builds a topology from explicit records. Core ids are global: a core id
    /// must belong to exactly one package. Package and core ids are renumbered
    /// densely, preserving their order.
    pub fn from_records(records: Vec<ThreadRecord>) -> Result<Self, TopologyParseError> {
        Self::build(records, TopologySource::Records)
    }

    /// Parses the Linux `/proc/cpuinfo` format.
    ///
    /// Each blank-line separated block describes one logical processor. On
    /// machines that do not report `physical id`/`core id` at all, every
    /// processor becomes its own core in package 0. Reporting them for some
    /// processors but not others is malformed.
    pub fn from_cpuinfo(text: &str) -> Result<Self, TopologyParseError> {
        #[derive(Default)]
        struct Block {
            processor: Option<usize>,
            package: Option<usize>,
            core: Option<usize>,
        }

        let mut blocks: Vec<Block> = Vec::new();
        let mut current = Block::default();
        let mut open = false;

        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                if open {
                    blocks.push(std::mem::take(&mut current));
                    open = false;
                }
                continue;
            }

            let Some((key, value)) = line.split_once(':') else {
                return Err(TopologyParseError::MalformedLine {
                    line: idx + 1,
                    reason: format!("expected `key : value`, got `{}`", line),
                });
            };
            let key = key.trim();
            let value = value.trim();
            if !matches!(key, "processor" | "physical id" | "core id") {
                continue;
            }

            let parsed = value.parse::<usize>().map_err(|_| TopologyParseError::MalformedLine {
                line: idx + 1,
                reason: format!("`{}` is not a number: `{}`", key, value),
            })?;

            match key {
                "processor" => {
                    if current.processor.is_some() {
                        // Block without a separating blank line.
                        blocks.push(std::mem::take(&mut current));
                    }
                    current.processor = Some(parsed);
                }
                "physical id" => current.package = Some(parsed),
                _ => current.core = Some(parsed),
            }
            open = true;
        }
        if open {
            blocks.push(current);
        }

        if blocks.is_empty() {
            return Err(TopologyParseError::Empty);
        }

        let any_ids = blocks.iter().any(|b| b.package.is_some() || b.core.is_some());

        // (package, per-package core id) -> global core number
        let mut core_keys: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        let mut raw = Vec::with_capacity(blocks.len());

        for (n, block) in blocks.iter().enumerate() {
            let processor = block
                .processor
                .ok_or(TopologyParseError::MissingField { processor: n, field: "processor" })?;

            let (package, core) = if any_ids {
                let package = block
                    .package
                    .ok_or(TopologyParseError::MissingField { processor, field: "physical id" })?;
                let core = block
                    .core
                    .ok_or(TopologyParseError::MissingField { processor, field: "core id" })?;
                (package, core)
            } else {
                (0, processor)
            };
            raw.push((processor, package, core));
            let next = core_keys.len();
            core_keys.entry((package, core)).or_insert(next);
        }

        let records = raw
            .into_iter()
            .map(|(thread, package, core)| ThreadRecord {
                package,
                core: core_keys[&(package, core)],
                thread,
            })
            .collect();

        Self::build(records, TopologySource::Cpuinfo)
    }

    /// Reads `/proc/cpuinfo`-formatted data from a file.
    pub fn from_cpuinfo_file(path: &Path) -> Result<Self, TopologyParseError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| TopologyParseError::Unreadable(format!("{}: {}", path.display(), e)))?;
        Self::from_cpuinfo(&text)
    }

    /// Detects the machine topology. Falls back to a flat topology (one
    /// package, one thread per core) when `/proc/cpuinfo` is unavailable or
    /// malformed.
    pub fn detect() -> Self {
        match Self::from_cpuinfo_file(Path::new("/proc/cpuinfo")) {
            Ok(topology) => {
                info!(
                    "TOPOLOGY: Detected {} packages, {} cores, {} threads.",
                    topology.total_packages(),
                    topology.total_cores(),
                    topology.total_threads()
                );
                topology
            }
            Err(e) => {
                warn!("TOPOLOGY: cpuinfo unusable ({}). Falling back to flat topology.", e);
                Self::fallback()
            }
        }
    }

    fn fallback() -> Self {
        let count = core_affinity::get_core_ids()
            .map(|ids| ids.len())
            .filter(|&n| n > 0)
            .unwrap_or(1);

        let records = (0..count)
            .map(|t| ThreadRecord { package: 0, core: t, thread: t })
            .collect();

        match Self::build(records, TopologySource::Fallback) {
            Ok(topology) => topology,
            // A flat dense layout always validates.
            Err(_) => unreachable!("flat topology is always well-formed"),
        }
    }

    fn build(mut records: Vec<ThreadRecord>, source: TopologySource) -> Result<Self, TopologyParseError> {
        if records.is_empty() {
            return Err(TopologyParseError::Empty);
        }

        records.sort_by_key(|r| r.thread);
        for pair in records.windows(2) {
            if pair[0].thread == pair[1].thread {
                return Err(TopologyParseError::DuplicateThread(pair[0].thread));
            }
        }
        for (expected, r) in records.iter().enumerate() {
            if r.thread != expected {
                return Err(TopologyParseError::SparseThreadIds { expected, found: r.thread });
            }
        }

        // Each core must sit inside a single package.
        let mut core_owner: BTreeMap<usize, usize> = BTreeMap::new();
        for r in &records {
            if let Some(&first) = core_owner.get(&r.core) {
                if first != r.package {
                    return Err(TopologyParseError::CoreSpansPackages {
                        core: r.core,
                        first,
                        second: r.package,
                    });
                }
            } else {
                core_owner.insert(r.core, r.package);
            }
        }

        // Dense renumbering, order preserving.
        let package_ids: BTreeMap<usize, usize> = records
            .iter()
            .map(|r| r.package)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .enumerate()
            .map(|(dense, id)| (id, dense))
            .collect();
        let core_ids: BTreeMap<usize, usize> = core_owner
            .keys()
            .enumerate()
            .map(|(dense, &id)| (id, dense))
            .collect();

        let mut core_threads = vec![Vec::new(); core_ids.len()];
        let mut package_cores = vec![Vec::new(); package_ids.len()];

        for r in records.iter_mut() {
            r.package = package_ids[&r.package];
            r.core = core_ids[&r.core];
            core_threads[r.core].push(r.thread);
        }
        for (&raw_core, &raw_package) in &core_owner {
            package_cores[package_ids[&raw_package]].push(core_ids[&raw_core]);
        }

        Ok(Self {
            source,
            threads: records,
            core_threads,
            package_cores,
        })
    }

    pub fn source(&self) -> TopologySource {
        self.source
    }

    pub fn total_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn total_cores(&self) -> usize {
        self.core_threads.len()
    }

    pub fn total_packages(&self) -> usize {
        self.package_cores.len()
    }

    /// # Panics
    /// If `thread` is not in `[0, total_threads)`.
    #[inline]
    pub fn thread_to_package(&self, thread: usize) -> usize {
        self.record(thread).package
    }

    /// Global core id of `thread`.
    ///
    /// # Panics
    /// If `thread` is not in `[0, total_threads)`.
    #[inline]
    pub fn thread_to_core(&self, thread: usize) -> usize {
        self.record(thread).core
    }

    #[inline]
    fn record(&self, thread: usize) -> &ThreadRecord {
        match self.threads.get(thread) {
            Some(r) => r,
            None => panic!(
                "thread id {} out of range (topology has {} threads)",
                thread,
                self.threads.len()
            ),
        }
    }

    pub fn threads(&self) -> &[ThreadRecord] {
        &self.threads
    }

    pub fn core_threads(&self, core: usize) -> &[usize] {
        &self.core_threads[core]
    }

    pub fn package_cores(&self, package: usize) -> &[usize] {
        &self.package_cores[package]
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:?} topology: {} package(s), {} core(s), {} thread(s)",
            self.source,
            self.total_packages(),
            self.total_cores(),
            self.total_threads()
        )
    }
}
