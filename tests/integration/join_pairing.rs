//! Join pairing with producers running at different rates.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use yaoxiang_flow::{EdgeKind, FlowGraph, InvocationPolicy, TaskPriority};

use super::pool;

#[test]
fn join_pairs_in_fifo_order_per_port() {
    let pool = pool(2);
    let mut graph = FlowGraph::with_scheduler(&pool);
    let tuples = Arc::new(Mutex::new(Vec::new()));

    let join = graph.add_join::<(u64, u64)>("pair", TaskPriority::Medium);
    let sink = {
        let tuples = tuples.clone();
        graph.add_function(
            "collect",
            TaskPriority::Medium,
            InvocationPolicy::Serial,
            move |(fast, slow): &(Arc<u64>, Arc<u64>)| {
                tuples.lock().push((**fast, **slow));
                Ok(())
            },
        )
    };
    graph.add_edge(join, sink, EdgeKind::Data).unwrap();

    let fast_count = 12u64;
    let slow_count = 3u64;
    thread::scope(|scope| {
        let graph = &graph;
        scope.spawn(move || {
            for i in 0..fast_count {
                graph.activate_port(join, 0, i).unwrap();
                thread::sleep(Duration::from_millis(10));
            }
        });
        scope.spawn(move || {
            for i in 0..slow_count {
                graph.activate_port(join, 1, 100 + i).unwrap();
                thread::sleep(Duration::from_millis(50));
            }
        });
    });
    graph.wait_for_all().unwrap();

    let tuples = tuples.lock();
    assert_eq!(tuples.len() as u64, fast_count.min(slow_count));
    for (i, &(fast, slow)) in tuples.iter().enumerate() {
        assert_eq!(fast, i as u64);
        assert_eq!(slow, 100 + i as u64);
    }
    assert_eq!(graph.pending(join, 0) as u64, fast_count - slow_count);
    assert_eq!(graph.pending(join, 1), 0);
}
