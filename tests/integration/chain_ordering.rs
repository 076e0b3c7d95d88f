//! A→B→C signal chain: a body never starts before its predecessor returned.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use yaoxiang_flow::{EdgeKind, FlowGraph, NodeId, TaskPriority};

use super::pool;

type Spans = Arc<Mutex<Vec<(Instant, Instant)>>>;

fn timed(
    graph: &mut FlowGraph,
    name: &str,
    spans: &Spans,
) -> NodeId {
    let spans = spans.clone();
    graph.add_continue(name, TaskPriority::Medium, move || {
        let start = Instant::now();
        std::hint::black_box((0..2_000u64).sum::<u64>());
        spans.lock().push((start, Instant::now()));
        Ok(())
    })
}

#[test]
fn chain_ordering_over_repeated_activations() {
    let pool = pool(4);
    let mut graph = FlowGraph::with_scheduler(&pool);
    let spans: Vec<Spans> = (0..3).map(|_| Arc::new(Mutex::new(Vec::new()))).collect();

    let a = timed(&mut graph, "A", &spans[0]);
    let b = timed(&mut graph, "B", &spans[1]);
    let c = timed(&mut graph, "C", &spans[2]);
    graph.add_edge(a, b, EdgeKind::Signal).unwrap();
    graph.add_edge(b, c, EdgeKind::Signal).unwrap();

    for _ in 0..100 {
        graph.signal(a).unwrap();
        graph.wait_for_all().unwrap();
        graph.reset().unwrap();
    }

    let a = spans[0].lock();
    let b = spans[1].lock();
    let c = spans[2].lock();
    assert_eq!((a.len(), b.len(), c.len()), (100, 100, 100));
    for run in 0..100 {
        assert!(b[run].0 >= a[run].1, "B started before A returned in run {run}");
        assert!(c[run].0 >= b[run].1, "C started before B returned in run {run}");
        if run > 0 {
            assert!(a[run].0 >= c[run - 1].1);
        }
    }
}
