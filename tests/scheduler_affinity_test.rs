/*
 * STRESS FORGE - SCHEDULER AFFINITY TEST
 * =================================================================
 * Component Name: tests/scheduler_affinity_test.rs
 * Core Responsibility: Placements honour their class exactly and never overlap, even under contention.
 * Design Pattern: Property Testing (seeded) / Concurrent Hammering
 * Forensic Impact: A thread id handed out twice means two tests measuring each other. This
 *                  file is the tripwire.
 * =================================================================
 */

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use stress_forge::scheduler::class::Affinity;
use stress_forge::{CpuMap, Scheduler, SchedulingClass, Topology};

// =================================================================
// Helpers
// =================================================================

fn scheduler(packages: usize, cores: usize, threads: usize) -> Arc<Scheduler> {
    let topo = Arc::new(Topology::preset(packages, cores, threads).unwrap());
    let total = topo.total_threads();
    Arc::new(Scheduler::new(topo, total).unwrap())
}

fn assert_honours_class(topo: &Topology, map: &CpuMap) {
    let class = map.class();
    let ids = map.actor_map();
    assert_eq!(ids.len(), class.num_actors());

    for a in 0..ids.len() {
        for b in (a + 1)..ids.len() {
            assert_ne!(ids[a], ids[b], "role {} and {} share thread {}", a, b, ids[a]);
            let same_core = topo.thread_to_core(ids[a]) == topo.thread_to_core(ids[b]);
            let same_pkg = topo.thread_to_package(ids[a]) == topo.thread_to_package(ids[b]);
            let got = if same_core {
                Affinity::SameCore
            } else if same_pkg {
                Affinity::SamePackage
            } else {
                Affinity::DifferentPackage
            };
            assert_eq!(got, class.relation(a, b), "{} placed as {:?}", class, ids);
        }
    }
}

// =================================================================
// Scenarios
// =================================================================

#[test]
fn test_every_local_class_fits_an_idle_scheduler() {
    let sched = scheduler(2, 2, 2);
    let mut rng = StdRng::seed_from_u64(0xAFF1);

    for actors in 1..=4 {
        let mut classes = sched.local_affinity_for(actors, sched.max_threads());
        assert!(!classes.is_empty(), "no classes for {} actors", actors);
        classes.shuffle(&mut rng);

        for class in classes {
            let map = sched
                .try_acquire(&class)
                .unwrap_or_else(|| panic!("{} does not fit an idle 2x2x2", class));
            assert_honours_class(sched.topology(), &map);
            sched.release(map);
            assert_eq!(sched.free_count(), 8);
        }
    }
}

#[test]
fn test_classes_that_cannot_exist_are_not_offered() {
    // one package: nothing may ask for two packages
    let sched = scheduler(1, 4, 2);
    for class in sched.local_affinity_for(3, sched.max_threads()) {
        assert_eq!(class.package_group_count(), 1, "{} needs two packages", class);
    }

    // three roles on one core of a 2-way SMT machine is impossible
    let three_same = SchedulingClass::same_core(3).unwrap();
    assert!(!sched.local_affinity_for(3, sched.max_threads()).contains(&three_same));
    assert!(sched.try_acquire(&three_same).is_none());
    assert_eq!(sched.free_count(), 8);
}

#[test]
fn test_single_thread_classes_exhaust_the_machine() {
    let sched = scheduler(2, 2, 2);
    let single = SchedulingClass::same_core(1).unwrap();

    let mut maps = Vec::new();
    while let Some(map) = sched.try_acquire(&single) {
        maps.push(map);
    }
    assert_eq!(maps.len(), 8);
    assert_eq!(sched.free_count(), 0);

    let mut seen: Vec<usize> = maps.iter().map(|m| m.actor_map()[0]).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..8).collect::<Vec<_>>());

    for map in maps {
        sched.release(map);
    }
    assert_eq!(sched.free_count(), 8);
    assert_eq!(sched.outstanding(), 0);
}

#[test]
fn test_concurrent_acquire_never_overlaps() {
    let sched = scheduler(2, 4, 2);
    sched.enable_debug();
    let total = sched.topology().total_threads();
    let in_use: Arc<Vec<AtomicBool>> = Arc::new((0..total).map(|_| AtomicBool::new(false)).collect());
    let granted = Arc::new(AtomicUsize::new(0));

    let mut classes = sched.local_affinity_for(2, total);
    classes.extend(sched.local_affinity_for(3, total));
    let classes = Arc::new(classes);

    let workers: Vec<_> = (0..8u64)
        .map(|w| {
            let sched = sched.clone();
            let in_use = in_use.clone();
            let granted = granted.clone();
            let classes = classes.clone();
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xC0FFEE + w);
                for _ in 0..2_000 {
                    let class = &classes[rng.gen_range(0..classes.len())];
                    let Some(map) = sched.try_acquire(class) else {
                        thread::yield_now();
                        continue;
                    };
                    for &t in map.actor_map() {
                        assert!(!in_use[t].swap(true, Ordering::AcqRel), "thread {} granted twice", t);
                    }
                    granted.fetch_add(1, Ordering::Relaxed);
                    for &t in map.actor_map() {
                        in_use[t].store(false, Ordering::Release);
                    }
                    sched.release(map);
                }
            })
        })
        .collect();

    for w in workers {
        w.join().unwrap();
    }

    assert!(granted.load(Ordering::Relaxed) > 0);
    assert_eq!(sched.free_count(), total);
    assert_eq!(sched.outstanding(), 0);
}
