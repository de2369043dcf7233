/*
 * STRESS FORGE - SCHEDULING CLASS
 * =================================================================
 * Component Name: src/scheduler/class.rs
 * Core Responsibility: Affinity shape requested by a set of actor roles (same core / same package / apart).
 * Design Pattern: Canonical Value Object / Restricted Growth Strings
 * Forensic Impact: Two classes that describe the same shape must compare equal, otherwise the
 *                  skeleton cache and the suite matrix silently double count configurations.
 * =================================================================
 */

use std::fmt;

use crate::error::{StressError, StressResult};

/// Pairwise relation between two roles of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Affinity {
    /// Same core (hence same package).
    SameCore,
    /// Same package, different cores.
    SamePackage,
    /// Different packages.
    DifferentPackage,
}

/// `packages[i]` / `cores[i]` group labels per role. Labels are canonical:
/// numbered by first appearance, so structurally equal shapes are `==`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulingClass {
    packages: Vec<usize>,
    cores: Vec<usize>,
}

impl SchedulingClass {
    pub fn new(packages: Vec<usize>, cores: Vec<usize>) -> StressResult<Self> {
        if packages.is_empty() {
            return Err(StressError::InvalidClass("class needs at least one actor".into()));
        }
        if packages.len() != cores.len() {
            return Err(StressError::InvalidClass(format!(
                "packages has {} entries, cores has {}",
                packages.len(),
                cores.len()
            )));
        }

        let packages = canonical(&packages);
        let cores = canonical(&cores);

        for i in 0..cores.len() {
            for j in (i + 1)..cores.len() {
                if cores[i] == cores[j] && packages[i] != packages[j] {
                    return Err(StressError::InvalidClass(format!(
                        "roles {} and {} share a core but not a package",
                        i, j
                    )));
                }
            }
        }

        Ok(Self { packages, cores })
    }

    /// Every role on its own core, all in one package.
    pub fn spread_in_package(actors: usize) -> StressResult<Self> {
        Self::new(vec![0; actors], (0..actors).collect())
    }

    /// All roles on one core.
    pub fn same_core(actors: usize) -> StressResult<Self> {
        Self::new(vec![0; actors], vec![0; actors])
    }

    pub fn num_actors(&self) -> usize {
        self.cores.len()
    }

    pub fn packages(&self) -> &[usize] {
        &self.packages
    }

    pub fn cores(&self) -> &[usize] {
        &self.cores
    }

    pub fn relation(&self, a: usize, b: usize) -> Affinity {
        if self.cores[a] == self.cores[b] {
            Affinity::SameCore
        } else if self.packages[a] == self.packages[b] {
            Affinity::SamePackage
        } else {
            Affinity::DifferentPackage
        }
    }

    pub fn core_group_count(&self) -> usize {
        self.cores.iter().max().map_or(0, |m| m + 1)
    }

    pub fn package_group_count(&self) -> usize {
        self.packages.iter().max().map_or(0, |m| m + 1)
    }
}

impl fmt::Display for SchedulingClass {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, (p, c)) in self.packages.iter().zip(&self.cores).enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "p{}c{}", p, c)?;
        }
        write!(f, "]")
    }
}

fn canonical(labels: &[usize]) -> Vec<usize> {
    let mut seen: Vec<usize> = Vec::new();
    labels
        .iter()
        .map(|l| match seen.iter().position(|s| s == l) {
            Some(idx) => idx,
            None => {
                seen.push(*l);
                seen.len() - 1
            }
        })
        .collect()
}

/// All restricted growth strings of length `n` (set partitions, canonical).
fn partitions(n: usize) -> Vec<Vec<usize>> {
    fn extend(prefix: &mut Vec<usize>, max_label: usize, n: usize, out: &mut Vec<Vec<usize>>) {
        if prefix.len() == n {
            out.push(prefix.clone());
            return;
        }
        let limit = if prefix.is_empty() { 0 } else { max_label + 1 };
        for label in 0..=limit {
            prefix.push(label);
            extend(prefix, max_label.max(label), n, out);
            prefix.pop();
        }
    }

    let mut out = Vec::new();
    if n > 0 {
        extend(&mut Vec::with_capacity(n), 0, n, &mut out);
    }
    out
}

/// Every distinct class shape for `actors` roles, in a fixed order:
/// core partitions first, then the package partitions of those core groups.
pub(crate) fn enumerate_skeletons(actors: usize) -> Vec<SchedulingClass> {
    let mut out = Vec::new();
    for cores in partitions(actors) {
        let core_groups = cores.iter().max().map_or(0, |m| m + 1);
        for package_of_core in partitions(core_groups) {
            let packages = cores.iter().map(|&c| package_of_core[c]).collect();
            out.push(SchedulingClass { packages, cores: cores.clone() });
        }
    }
    out
}
