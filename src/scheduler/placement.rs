/*
 * STRESS FORGE - PLACEMENT SEARCH
 * =================================================================
 * Component Name: src/scheduler/placement.rs
 * Core Responsibility: Finds free hardware threads satisfying every pairwise relation of a class.
 * Design Pattern: Two-Level Matching (packages: augmenting paths, cores: sorted capacities)
 * Forensic Impact: Exact search. If this returns None, no assignment exists on the current free set;
 *                  a heuristic miss here would show up as an unexplained scheduling stall.
 * =================================================================
 */

use std::cmp::Reverse;

use super::class::SchedulingClass;
use crate::hardware::topology::Topology;

/// Roles that must land on one package, split into per-core groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PackageGroup {
    /// Roles per core group, largest group first. Roles ascending inside.
    pub core_groups: Vec<Vec<usize>>,
    pub demand: usize,
}

/// Pre-digested form of a class, cached per class by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Shape {
    /// Largest demand first, ties by first role.
    pub package_groups: Vec<PackageGroup>,
    pub actors: usize,
}

impl Shape {
    pub fn of(class: &SchedulingClass) -> Self {
        let mut cores: Vec<Vec<usize>> = vec![Vec::new(); class.core_group_count()];
        for (role, &core) in class.cores().iter().enumerate() {
            cores[core].push(role);
        }

        let mut packages: Vec<Vec<Vec<usize>>> = vec![Vec::new(); class.package_group_count()];
        for group in cores {
            // all roles of a core group share the package label
            let package = class.packages()[group[0]];
            packages[package].push(group);
        }

        let mut package_groups: Vec<PackageGroup> = packages
            .into_iter()
            .map(|mut core_groups| {
                core_groups.sort_by_key(|g| (Reverse(g.len()), g[0]));
                let demand = core_groups.iter().map(Vec::len).sum();
                PackageGroup { core_groups, demand }
            })
            .collect();
        package_groups.sort_by_key(|g| (Reverse(g.demand), g.core_groups[0][0]));

        Self {
            package_groups,
            actors: class.num_actors(),
        }
    }
}

/// Free threads of one core, ascending.
fn free_threads_of(topology: &Topology, free: &[bool], core: usize) -> Vec<usize> {
    topology
        .core_threads(core)
        .iter()
        .copied()
        .filter(|&t| free[t])
        .collect()
}

/// Cores of `package` with at least one free thread, most free first, ties by id.
fn ranked_cores(core_free: &[Vec<usize>], topology: &Topology, package: usize) -> Vec<usize> {
    let mut cores: Vec<usize> = topology
        .package_cores(package)
        .iter()
        .copied()
        .filter(|&c| !core_free[c].is_empty())
        .collect();
    cores.sort_by_key(|&c| (Reverse(core_free[c].len()), c));
    cores
}

/// A package hosts a group iff, pairing sizes and capacities both sorted
/// descending, every group fits its partner core.
fn fits(group: &PackageGroup, cores: &[usize], core_free: &[Vec<usize>]) -> bool {
    group.core_groups.len() <= cores.len()
        && group
            .core_groups
            .iter()
            .zip(cores)
            .all(|(g, &c)| g.len() <= core_free[c].len())
}

fn augment(
    group: usize,
    fit: &[Vec<bool>],
    owner: &mut [Option<usize>],
    visited: &mut [bool],
) -> bool {
    for package in 0..owner.len() {
        if fit[group][package] && !visited[package] {
            visited[package] = true;
            let free_slot = match owner[package] {
                None => true,
                Some(other) => augment(other, fit, owner, visited),
            };
            if free_slot {
                owner[package] = Some(group);
                return true;
            }
        }
    }
    false
}

/// Returns `actor_map` (hardware thread per role) or `None` if the free set
/// cannot host the shape. `free` is indexed by thread id.
pub(crate) fn find_placement(topology: &Topology, free: &[bool], shape: &Shape) -> Option<Vec<usize>> {
    if free.iter().filter(|&&f| f).count() < shape.actors {
        return None;
    }

    let core_free: Vec<Vec<usize>> = (0..topology.total_cores())
        .map(|c| free_threads_of(topology, free, c))
        .collect();
    let ranked: Vec<Vec<usize>> = (0..topology.total_packages())
        .map(|p| ranked_cores(&core_free, topology, p))
        .collect();

    let fit: Vec<Vec<bool>> = shape
        .package_groups
        .iter()
        .map(|g| ranked.iter().map(|cores| fits(g, cores, &core_free)).collect())
        .collect();

    // 1. package groups -> distinct packages
    let mut owner: Vec<Option<usize>> = vec![None; topology.total_packages()];
    for group in 0..shape.package_groups.len() {
        let mut visited = vec![false; owner.len()];
        if !augment(group, &fit, &mut owner, &mut visited) {
            return None;
        }
    }

    // 2. core groups -> distinct cores inside each chosen package
    let mut actor_map = vec![usize::MAX; shape.actors];
    for (package, slot) in owner.iter().enumerate() {
        let Some(group) = slot else { continue };
        let cores = &ranked[package];
        for (roles, &core) in shape.package_groups[*group].core_groups.iter().zip(cores) {
            for (&role, &thread) in roles.iter().zip(&core_free[core]) {
                actor_map[role] = thread;
            }
        }
    }

    debug_assert!(actor_map.iter().all(|&t| t != usize::MAX));
    Some(actor_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::class::{enumerate_skeletons, Affinity};

    fn satisfies(topology: &Topology, class: &SchedulingClass, map: &[usize]) -> bool {
        let n = class.num_actors();
        for a in 0..n {
            for b in (a + 1)..n {
                if map[a] == map[b] {
                    return false;
                }
                let same_core = topology.thread_to_core(map[a]) == topology.thread_to_core(map[b]);
                let same_pkg = topology.thread_to_package(map[a]) == topology.thread_to_package(map[b]);
                let ok = match class.relation(a, b) {
                    Affinity::SameCore => same_core,
                    Affinity::SamePackage => same_pkg && !same_core,
                    Affinity::DifferentPackage => !same_pkg,
                };
                if !ok {
                    return false;
                }
            }
        }
        true
    }

    /// Tries every injective assignment of roles to free threads.
    fn brute_force(topology: &Topology, free: &[bool], class: &SchedulingClass) -> bool {
        fn go(
            topology: &Topology,
            free: &[bool],
            class: &SchedulingClass,
            used: &mut Vec<bool>,
            map: &mut Vec<usize>,
        ) -> bool {
            if map.len() == class.num_actors() {
                return true;
            }
            for t in 0..free.len() {
                if free[t] && !used[t] {
                    used[t] = true;
                    map.push(t);
                    // prune on the prefix
                    let sub = SchedulingClass::new(
                        class.packages()[..map.len()].to_vec(),
                        class.cores()[..map.len()].to_vec(),
                    )
                    .unwrap();
                    let found = satisfies(topology, &sub, map) && go(topology, free, class, used, map);
                    map.pop();
                    used[t] = false;
                    if found {
                        return true;
                    }
                }
            }
            false
        }
        go(topology, free, class, &mut vec![false; free.len()], &mut Vec::new())
    }

    #[test]
    fn test_shape_groups_largest_first() {
        let class = SchedulingClass::new(vec![0, 0, 0, 1], vec![0, 1, 1, 2]).unwrap();
        let shape = Shape::of(&class);
        assert_eq!(shape.package_groups.len(), 2);
        assert_eq!(shape.package_groups[0].demand, 3);
        assert_eq!(shape.package_groups[0].core_groups, vec![vec![1, 2], vec![0]]);
        assert_eq!(shape.package_groups[1].core_groups, vec![vec![3]]);
    }

    #[test]
    fn test_exact_against_brute_force_on_every_free_subset() {
        // 2 packages x 2 cores x 2 threads: 256 free masks, up to 4 actors.
        let topology = Topology::preset(2, 2, 2).unwrap();
        let classes: Vec<SchedulingClass> = (1..=4).flat_map(enumerate_skeletons).collect();

        for mask in 0u32..256 {
            let free: Vec<bool> = (0..8).map(|t| mask & (1 << t) != 0).collect();
            for class in &classes {
                let found = find_placement(&topology, &free, &Shape::of(class));
                let expected = brute_force(&topology, &free, class);
                assert_eq!(found.is_some(), expected, "mask {:08b} class {}", mask, class);
                if let Some(map) = found {
                    assert!(satisfies(&topology, class, &map), "bad map {:?} for {}", map, class);
                    assert!(map.iter().all(|&t| free[t]));
                }
            }
        }
    }

    #[test]
    fn test_asymmetric_topology() {
        use crate::hardware::topology::ThreadRecord;
        // package 0: core with 3 threads; package 1: two single-thread cores
        let records = vec![
            ThreadRecord { package: 0, core: 0, thread: 0 },
            ThreadRecord { package: 0, core: 0, thread: 1 },
            ThreadRecord { package: 0, core: 0, thread: 2 },
            ThreadRecord { package: 1, core: 1, thread: 3 },
            ThreadRecord { package: 1, core: 2, thread: 4 },
        ];
        let topology = Topology::from_records(records).unwrap();
        let free = vec![true; 5];

        let triple = SchedulingClass::same_core(3).unwrap();
        assert_eq!(find_placement(&topology, &free, &Shape::of(&triple)), Some(vec![0, 1, 2]));

        let spread = SchedulingClass::spread_in_package(2).unwrap();
        assert_eq!(find_placement(&topology, &free, &Shape::of(&spread)), Some(vec![3, 4]));

        let spread3 = SchedulingClass::spread_in_package(3).unwrap();
        assert_eq!(find_placement(&topology, &free, &Shape::of(&spread3)), None);
    }

    #[test]
    fn test_deterministic() {
        let topology = Topology::preset(2, 4, 2).unwrap();
        let free = vec![true; topology.total_threads()];
        let class = SchedulingClass::new(vec![0, 0, 1, 1], vec![0, 1, 2, 2]).unwrap();
        let shape = Shape::of(&class);
        let first = find_placement(&topology, &free, &shape);
        for _ in 0..10 {
            assert_eq!(find_placement(&topology, &free, &shape), first);
        }
    }

    #[test]
    fn test_many_roles() {
        let topology = Topology::preset(4, 16, 2).unwrap();
        let free = vec![true; topology.total_threads()];
        let class = SchedulingClass::spread_in_package(16).unwrap();
        let map = find_placement(&topology, &free, &Shape::of(&class)).unwrap();
        assert!(satisfies(&topology, &class, &map));

        let wide = SchedulingClass::new((0..64).map(|i| i / 16).collect(), (0..64).map(|i| i / 2).collect()).unwrap();
        let map = find_placement(&topology, &free, &Shape::of(&wide)).unwrap();
        assert!(satisfies(&topology, &wide, &map));
    }
}
