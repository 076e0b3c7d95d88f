//! End-to-end scenario: t1→t2→t3→t4 chain, t5 producer feeding t6, and a
//! join of t5's output with t4's completion feeding t7.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use yaoxiang_flow::{
    parallel_for, Arena, Concurrency, EdgeKind, FlowGraph, InvocationPolicy, Signal,
    TaskPriority,
};

use super::pool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Begin,
    End,
}

#[derive(Default)]
struct Journal {
    clock: AtomicUsize,
    events: Mutex<Vec<(&'static str, Phase, usize)>>,
}

impl Journal {
    fn record(
        &self,
        name: &'static str,
        phase: Phase,
    ) {
        let tick = self.clock.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push((name, phase, tick));
    }

    fn tick(
        &self,
        name: &str,
        phase: Phase,
    ) -> usize {
        self.events
            .lock()
            .iter()
            .find(|(n, p, _)| *n == name && *p == phase)
            .map(|(_, _, tick)| *tick)
            .unwrap_or_else(|| panic!("no {phase:?} event for {name}"))
    }
}

#[test]
fn t1_to_t7_scenario() {
    let pool = pool(4);
    let arena = Arena::with_scheduler(&pool, Concurrency::Automatic, TaskPriority::Medium);
    let journal = Arc::new(Journal::default());
    let total = Arc::new(AtomicUsize::new(0));

    let mut graph = FlowGraph::with_scheduler(&pool);
    let mut chain = Vec::new();
    for name in ["t1", "t2", "t3", "t4"] {
        let journal = journal.clone();
        chain.push(graph.add_continue(name, TaskPriority::Medium, move || {
            journal.record(name, Phase::Begin);
            journal.record(name, Phase::End);
            Ok(())
        }));
    }
    for pair in chain.windows(2) {
        graph.add_edge(pair[0], pair[1], EdgeKind::Signal).unwrap();
    }

    let t5 = {
        let journal = journal.clone();
        graph.add_function(
            "t5",
            TaskPriority::High,
            InvocationPolicy::Serial,
            move |_: &Signal| {
                journal.record("t5", Phase::Begin);
                let items: Vec<f64> = (0..200).map(|i| i as f64 * 0.5).collect();
                journal.record("t5", Phase::End);
                Ok(items)
            },
        )
    };
    let t6 = {
        let journal = journal.clone();
        let total = total.clone();
        graph.add_function(
            "t6",
            TaskPriority::Medium,
            InvocationPolicy::Serial,
            move |items: &Vec<f64>| {
                journal.record("t6", Phase::Begin);
                total.store(items.len(), Ordering::SeqCst);
                journal.record("t6", Phase::End);
                Ok(())
            },
        )
    };
    let join = graph.add_join::<(Vec<f64>, Signal)>("t5+t4", TaskPriority::Medium);
    let t7 = {
        let journal = journal.clone();
        graph.add_continue("t7", TaskPriority::Low, move || {
            journal.record("t7", Phase::Begin);
            journal.record("t7", Phase::End);
            Ok(())
        })
    };

    graph.add_edge(t5, t6, EdgeKind::Data).unwrap();
    graph.add_edge(t5, (join, 0), EdgeKind::Data).unwrap();
    graph.add_edge(chain[3], (join, 1), EdgeKind::Signal).unwrap();
    graph.add_edge(join, t7, EdgeKind::Signal).unwrap();
    assert_eq!(graph.node_count(), 8);

    arena
        .execute(|| {
            let sources = [chain[0], t5];
            parallel_for(0, sources.len(), 1, |i| {
                graph.signal(sources[i]).unwrap();
            })?;
            graph.wait_for_all()
        })
        .unwrap()
        .unwrap();

    let events = journal.events.lock().clone();
    let begins = events.iter().filter(|(_, p, _)| *p == Phase::Begin).count();
    let ends = events.iter().filter(|(_, p, _)| *p == Phase::End).count();
    assert_eq!((begins, ends), (7, 7));
    assert_eq!(total.load(Ordering::SeqCst), 200);

    assert!(journal.tick("t6", Phase::Begin) > journal.tick("t5", Phase::End));
    assert!(journal.tick("t7", Phase::Begin) > journal.tick("t4", Phase::End));
    assert!(journal.tick("t7", Phase::Begin) > journal.tick("t5", Phase::End));
}
