use graphstats_space::{SpaceManager, SpacePressure};
use std::sync::atomic::{AtomicBool, Ordering};

#[test]
fn granted_total_equals_sum_of_outstanding_grants() {
    let manager = SpaceManager::new(1_000);
    let owners: Vec<_> = (0..4).map(|i| manager.register(format!("p{i}"))).collect();

    let mut outstanding = [0u64; 4];
    let script: &[(usize, i64)] = &[
        (0, 300),
        (1, 200),
        (2, 400),
        (3, 200), // denied: 1100 > 1000
        (1, -150),
        (3, 200),
        (0, -300),
        (2, 400), // denied: 650 + 400
        (2, -400),
        (2, 350),
    ];

    for &(owner, delta) in script {
        let registration = &owners[owner];
        if delta >= 0 {
            if manager.request(registration.id(), delta as u64) {
                outstanding[owner] += delta as u64;
            }
        } else {
            manager.release(registration.id(), delta.unsigned_abs());
            outstanding[owner] -= delta.unsigned_abs();
        }

        assert!(manager.granted() <= manager.budget());
        assert_eq!(manager.granted(), outstanding.iter().sum::<u64>());
        for (i, registration) in owners.iter().enumerate() {
            assert_eq!(manager.granted_to(registration.id()), outstanding[i]);
        }
    }

    assert_eq!(outstanding, [0, 50, 350, 200]);
}

#[test]
fn concurrent_requests_never_overcommit() {
    const THREADS: usize = 16;
    const BLOCK: u64 = 4096;
    let budget = 64 * BLOCK;
    let manager = SpaceManager::new(budget);
    let overcommitted = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for t in 0..THREADS {
            let manager = manager.clone();
            let overcommitted = &overcommitted;
            scope.spawn(move || {
                let registration = manager.register(format!("worker-{t}"));
                let mut held = 0u64;
                for round in 0..2_000 {
                    if round % 3 == 2 && held > 0 {
                        manager.release(registration.id(), BLOCK);
                        held -= BLOCK;
                    } else if manager.request(registration.id(), BLOCK) {
                        held += BLOCK;
                    }
                    if manager.granted() > budget {
                        overcommitted.store(true, Ordering::Relaxed);
                    }
                }
                assert_eq!(manager.granted_to(registration.id()), held);
                assert_eq!(manager.release_all(registration.id()), held);
            });
        }
    });

    assert!(!overcommitted.load(Ordering::Relaxed));
    assert_eq!(manager.granted(), 0);
}

#[test]
fn eviction_candidates_follow_request_recency() {
    let manager = SpaceManager::new(10_000);
    let a = manager.register("a");
    let b = manager.register("b");
    let c = manager.register("c");
    let idle = manager.register("idle");

    assert!(manager.request(a.id(), 100));
    assert!(manager.request(b.id(), 100));
    assert!(manager.request(c.id(), 100));
    assert_eq!(manager.eviction_candidates(None), vec![a.id(), b.id(), c.id()]);

    // `a` becomes the most recently active owner.
    assert!(manager.request(a.id(), 10));
    assert_eq!(manager.eviction_candidates(None), vec![b.id(), c.id(), a.id()]);
    assert_eq!(manager.eviction_candidates(Some(c.id())), vec![b.id(), a.id()]);

    // Owners that released everything are not worth asking.
    manager.release_all(b.id());
    assert_eq!(manager.eviction_candidates(None), vec![c.id(), a.id()]);
    assert!(!manager.eviction_candidates(None).contains(&idle.id()));
}

#[test]
fn report_is_sorted_and_serializable() {
    let manager = SpaceManager::new(1_000);
    let small = manager.register("small");
    let large = manager.register("large");
    assert!(manager.request(small.id(), 100));
    assert!(manager.request(large.id(), 800));

    let report = manager.report();
    assert_eq!(report.granted_bytes, 900);
    assert_eq!(report.available_bytes(), 100);
    assert_eq!(report.pressure, SpacePressure::High);
    let names: Vec<&str> = report.owners.iter().map(|o| o.name.as_str()).collect();
    assert_eq!(names, vec!["large", "small"]);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["pressure"], "high");
    assert_eq!(json["owners"][0]["granted_bytes"], 800);
}

#[test]
fn handles_share_the_owner_budget() {
    let manager = SpaceManager::new(100);
    let registration = manager.register("cache");
    let first = registration.handle();
    let second = registration.handle();

    assert!(first.request(60));
    assert!(!second.request(50));
    assert!(second.is_available(40));
    assert_eq!(second.granted(), 60);
    assert_eq!(first.release_all(), 60);
    assert_eq!(manager.pressure(), SpacePressure::Low);
}
