//! Concurrency tests against live engines.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use tether::Registry;
use tether::tether_engine::EngineConfig;

fn registry(name: &str) -> Arc<Registry> {
    Arc::new(Registry::new(EngineConfig::new(name)))
}

#[test]
fn concurrent_calls_keep_their_own_results() {
    let registry = registry("stress-ab");
    let handle = registry.create_instance().unwrap();

    let a = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            registry.evaluate_sync(
                handle,
                "return new Promise((resolve) => setTimeout(() => resolve('A'), 200))",
                5_000,
            )
        })
    };
    let b = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.evaluate_sync(handle, "return 'B'", 5_000))
    };

    assert_eq!(b.join().unwrap(), "B");
    assert_eq!(a.join().unwrap(), "A");
}

#[test]
fn many_callers_one_engine() {
    let registry = registry("stress-many");
    let handle = registry.create_instance().unwrap();

    let workers: Vec<_> = (0..16)
        .map(|worker| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for i in 0..25 {
                    let code = format!("return '{worker}:' + ({i} * 2)");
                    assert_eq!(registry.evaluate_sync(handle, &code, 5_000), format!("{worker}:{}", i * 2));
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    let leftover = registry.with_engine(handle, |engine| engine.submit(|engine| engine.callback_count()));
    assert_eq!(leftover, Some(0));
}

#[test]
fn timeouts_racing_replies_leave_nothing_behind() {
    let registry = registry("stress-race");
    let handle = registry.create_instance().unwrap();

    for round in 0..3 {
        let workers: Vec<_> = (0..24)
            .map(|worker| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    let delay: u64 = rng.gen_range(0..40);
                    let timeout: u64 = rng.gen_range(1..40);
                    let expected = format!("r{round}w{worker}");
                    let code = format!(
                        "return new Promise((resolve) => setTimeout(() => resolve('{expected}'), {delay}))"
                    );

                    let result = registry.evaluate_sync(handle, &code, timeout);
                    assert!(
                        result.is_empty() || result == expected,
                        "call {expected} got foreign result {result:?}"
                    );
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }
    }

    // Late replies still arrive and unregister their callbacks.
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let leftover = registry
            .with_engine(handle, |engine| engine.submit(|engine| engine.callback_count()))
            .unwrap();
        if leftover == 0 {
            break;
        }
        assert!(Instant::now() < deadline, "{leftover} reply callbacks never released");
        thread::sleep(Duration::from_millis(20));
    }

    assert!(registry.destroy_instance(handle));
}

#[test]
fn failed_engine_never_blocks_callers() {
    let registry = registry("stress-broken");
    let config = EngineConfig::new("stress-broken")
        .with_startup_script("throw new Error('unavailable')")
        .with_init_timeout(Duration::from_secs(2));

    let start = Instant::now();
    let handle = registry.create_instance_with(config).unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(!registry.is_ready(handle));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let start = Instant::now();
                assert_eq!(registry.evaluate_sync(handle, "return 1", 30_000), "");
                start.elapsed()
            })
        })
        .collect();

    for worker in workers {
        assert!(worker.join().unwrap() < Duration::from_millis(500));
    }
}

#[test]
fn destroy_during_calls_releases_waiters() {
    let registry = registry("stress-destroy");
    let handle = registry.create_instance().unwrap();

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.evaluate_sync(handle, "return new Promise(() => {})", 30_000))
        })
        .collect();

    thread::sleep(Duration::from_millis(150));
    let start = Instant::now();
    assert!(registry.destroy_instance(handle));

    for worker in workers {
        assert_eq!(worker.join().unwrap(), "");
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}
