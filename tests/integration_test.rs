/*
 * STRESS FORGE - FULL SYSTEM INTEGRATION TEST
 * =================================================================
 * Component Name: tests/integration_test.rs
 * Core Responsibility: End-to-end flow: topology -> scheduler -> runner -> suite -> graded results.
 * Design Pattern: Black Box Testing
 * Forensic Impact: Every component has to agree on classes, placements and outcome strings or
 *                  the grading here comes out wrong.
 * =================================================================
 */

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use stress_forge::catalog;
use stress_forge::harness::{Expect, IntResult, Runner, SpinLoopStyle, Status, StressTest, Suite, Verdict};
use stress_forge::utils::config_loader::RunConfig;
use stress_forge::{Scheduler, SchedulingClass, StressError, Topology};

// =================================================================
// Test helpers
// =================================================================

fn preset_scheduler() -> Arc<Scheduler> {
    let topo = Arc::new(Topology::preset(2, 2, 2).unwrap());
    Arc::new(Scheduler::new(topo, 8).unwrap())
}

fn quick_config() -> RunConfig {
    RunConfig {
        time_ms: 30,
        iterations: 2,
        min_stride: 1,
        max_stride: 64,
        max_footprint_mb: 16,
        spin_style: SpinLoopStyle::Yield,
        pin_threads: false,
        parallelism: 2,
    }
}

// =================================================================
// Test scenarios
// =================================================================

#[test]
fn test_same_core_pairs_fill_every_core_then_refuse() {
    let sched = preset_scheduler();
    let class = SchedulingClass::same_core(2).unwrap();
    let start = Arc::new(Barrier::new(5));

    let workers: Vec<_> = (0..5)
        .map(|_| {
            let sched = sched.clone();
            let class = class.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                sched.try_acquire(&class)
            })
        })
        .collect();
    let maps: Vec<_> = workers
        .into_iter()
        .filter_map(|w| w.join().unwrap())
        .collect();

    assert_eq!(maps.len(), 4, "exactly one requester per core");
    assert_eq!(sched.free_count(), 0);
    assert!(sched.try_acquire(&class).is_none());

    let t = sched.topology();
    let mut cores: Vec<_> = maps.iter().map(|m| t.thread_to_core(m.actor_map()[0])).collect();
    for map in &maps {
        assert_eq!(t.thread_to_core(map.actor_map()[0]), t.thread_to_core(map.actor_map()[1]));
    }
    cores.sort_unstable();
    cores.dedup();
    assert_eq!(cores.len(), 4);

    // one release makes exactly one core available again
    let mut maps = maps.into_iter();
    sched.release(maps.next().unwrap());
    let again = sched.try_acquire(&class).expect("released core is reusable");
    assert!(sched.try_acquire(&class).is_none());

    sched.release(again);
    for map in maps {
        sched.release(map);
    }
    assert_eq!(sched.free_count(), 8);
}

#[test]
fn test_wide_class_is_acquired_without_enumerating_shapes() {
    let topo = Arc::new(Topology::preset(1, 16, 1).unwrap());
    let runner = Runner::new(quick_config(), Arc::new(Scheduler::new(topo, 16).unwrap()));
    let wide = SchedulingClass::spread_in_package(16).unwrap();

    let clock = Instant::now();
    let guard = runner.acquire(&wide).unwrap();
    assert_eq!(guard.map().map(|m| m.threads().len()), Some(16));
    drop(guard);
    assert!(clock.elapsed() < Duration::from_secs(2), "acquire took {:?}", clock.elapsed());
    assert_eq!(runner.scheduler().free_count(), 16);

    // one thread per core: a shared core can never be placed
    let err = runner.acquire(&SchedulingClass::same_core(2).unwrap()).err().unwrap();
    assert!(matches!(err, StressError::Scheduling(_)));
}

#[test]
fn test_mid_run_panic_releases_placement_after_peers_exit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = calls.clone();
    // the sanity check makes the first call, the engine the rest
    let test = StressTest::<AtomicI64, IntResult<1>>::builder("late_panic", || AtomicI64::new(0))
        .actor("a", |s, _| {
            s.fetch_add(1, Ordering::Relaxed);
        })
        .actor("b", move |_, _| {
            if seen.fetch_add(1, Ordering::Relaxed) == 500 {
                panic!("role b gave up");
            }
        })
        .actor("c", |s, _| {
            s.fetch_add(1, Ordering::Relaxed);
        })
        .build()
        .unwrap();
    let config = RunConfig {
        time_ms: 200,
        iterations: 3,
        ..quick_config()
    };
    let runner = Runner::new(config, preset_scheduler());
    let class = SchedulingClass::new(vec![0, 0, 1], vec![0, 1, 2]).unwrap();

    let result = runner.run(&Arc::new(test), &class).unwrap();

    assert_eq!(result.status, Status::TestError);
    assert!(result.messages.iter().any(|m| m.contains("role b gave up")));
    assert!(calls.load(Ordering::Relaxed) > 500);
    assert_eq!(runner.scheduler().free_count(), 8);
    assert_eq!(runner.scheduler().outstanding(), 0);
    assert_eq!(runner.scheduler().quarantined(), 0);
}

#[test]
fn test_runner_grades_a_clean_test() {
    let runner = Runner::new(quick_config(), preset_scheduler());
    let test = catalog::atomic_increment().unwrap();
    let class = SchedulingClass::spread_in_package(2).unwrap();

    let result = runner.run(&Arc::new(test), &class).unwrap();

    assert_eq!(result.status, Status::Normal);
    assert_eq!(result.iterations, 2);
    assert_eq!(result.grading.verdict, Verdict::Passed);
    assert!(result.total_samples() > 0);
    assert!(result.states.iter().all(|(s, _)| s == "1, 2" || s == "2, 1"));
    assert_eq!(result.cpu_map.len(), 2);
    assert!(result.min_stride >= 1 && result.max_stride <= 64);
    assert_eq!(runner.scheduler().free_count(), 8, "placement not released");
}

#[test]
fn test_forbidden_outcome_fails_the_grade() {
    // every pair observes 1, which is listed as forbidden
    let test = StressTest::<AtomicI64, IntResult<1>>::builder("always_forbidden", || AtomicI64::new(0))
        .actor("only", |s, r| r.set(0, s.fetch_add(1, Ordering::Relaxed) + 1))
        .outcome("1", Expect::Forbidden, "should never be seen")
        .build()
        .unwrap();
    let runner = Runner::new(quick_config(), preset_scheduler());
    let result = runner
        .run(&Arc::new(test), &SchedulingClass::same_core(1).unwrap())
        .unwrap();

    assert_eq!(result.status, Status::Normal);
    assert_eq!(result.grading.verdict, Verdict::Failed);
    assert!(!result.passed());
}

#[test]
fn test_panicking_actor_is_caught_by_the_sanity_check() {
    let test = StressTest::<(), IntResult<1>>::builder("explodes", || ())
        .actor("a", |_, _| {})
        .actor("b", |_, _| panic!("actor b is broken"))
        .build()
        .unwrap();
    let runner = Runner::new(quick_config(), preset_scheduler());
    let result = runner
        .run(&Arc::new(test), &SchedulingClass::spread_in_package(2).unwrap())
        .unwrap();

    assert_eq!(result.status, Status::CheckTestError);
    assert!(result.messages.iter().any(|m| m.contains("actor b is broken")));
    assert_eq!(runner.scheduler().free_count(), 8);
}

#[test]
fn test_class_arity_mismatch_is_rejected() {
    let runner = Runner::new(quick_config(), preset_scheduler());
    let test = Arc::new(catalog::atomic_increment().unwrap());
    let err = runner.run(&test, &SchedulingClass::same_core(3).unwrap()).unwrap_err();
    assert!(matches!(err, StressError::InvalidClass(_)));
}

#[test]
fn test_suite_runs_the_catalog_over_every_shape() {
    let suite = Suite::new(Runner::new(quick_config(), preset_scheduler()));
    let tests = catalog::all().unwrap();
    let jobs = suite.matrix(&tests);

    // two roles on a 2x2x2: same core, same package, different packages
    assert_eq!(jobs.len(), tests.len() * 3);

    let expected: Vec<(String, String)> = jobs
        .iter()
        .map(|j| (j.test.name().to_string(), j.class.to_string()))
        .collect();
    let results = suite.run(jobs);
    assert_eq!(results.len(), expected.len());

    for (result, (name, class)) in results.iter().zip(&expected) {
        let result = result.as_ref().unwrap();
        assert_eq!(&result.name, name, "results out of job order");
        assert_eq!(&result.class, class);
        assert_eq!(result.status, Status::Normal);
        assert_ne!(result.grading.verdict, Verdict::Failed, "{} on {} failed: {:?}", name, class, result.states);
    }
    assert_eq!(suite.runner().scheduler().free_count(), 8);
}
