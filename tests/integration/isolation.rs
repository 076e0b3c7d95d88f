//! Isolated inner parallel-for nested inside an outer parallel-for leaf.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use yaoxiang_flow::{isolate, parallel_for, Arena, Concurrency, TaskPriority};

use super::pool;

thread_local! {
    /// Set while this thread is inside the isolated region.
    static IN_REGION: Cell<bool> = const { Cell::new(false) };
}

#[test]
fn isolated_inner_loop_runs_exactly_once() {
    const OUTER: usize = 1000;
    const INNER: usize = 10;

    let pool = pool(2);
    let arena = Arena::with_scheduler(&pool, Concurrency::Automatic, TaskPriority::Medium);
    let outer: Vec<AtomicUsize> = (0..OUTER).map(|_| AtomicUsize::new(0)).collect();
    let inner: Vec<AtomicUsize> = (0..INNER).map(|_| AtomicUsize::new(0)).collect();
    let leaked = AtomicUsize::new(0);

    arena
        .execute(|| {
            parallel_for(0, OUTER, 1, |i| {
                if IN_REGION.with(Cell::get) {
                    leaked.fetch_add(1, Ordering::SeqCst);
                }
                if i == OUTER / 2 {
                    isolate(|| {
                        IN_REGION.with(|flag| flag.set(true));
                        let result = parallel_for(0, INNER, 1, |j| {
                            std::thread::sleep(Duration::from_millis(2));
                            inner[j].fetch_add(1, Ordering::SeqCst);
                        });
                        IN_REGION.with(|flag| flag.set(false));
                        result
                    })
                    .unwrap();
                }
                outer[i].fetch_add(1, Ordering::SeqCst);
            })
        })
        .unwrap()
        .unwrap();

    assert!(outer.iter().all(|n| n.load(Ordering::SeqCst) == 1));
    assert!(inner.iter().all(|n| n.load(Ordering::SeqCst) == 1));
    assert_eq!(
        leaked.load(Ordering::SeqCst),
        0,
        "an outer leaf ran on a thread draining the isolated region"
    );
}
