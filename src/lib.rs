//! YaoXiang Flow
//!
//! A concurrent task-graph engine: a work-stealing worker pool, arenas with
//! their own priority and concurrency cap, isolated regions, a structured
//! parallel-for, and typed task graphs of continue, function and join nodes.
//!
//! # Example
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use yaoxiang_flow::{Arena, Concurrency, EdgeKind, FlowGraph, TaskPriority};
//!
//! let hits = Arc::new(AtomicUsize::new(0));
//! let arena = Arena::new(Concurrency::Automatic, TaskPriority::Medium);
//!
//! arena
//!     .execute(|| -> yaoxiang_flow::Result<()> {
//!         let mut graph = FlowGraph::new();
//!         let counter = hits.clone();
//!         let first = graph.add_continue("first", TaskPriority::High, move || {
//!             counter.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         });
//!         let counter = hits.clone();
//!         let second = graph.add_continue("second", TaskPriority::Low, move || {
//!             counter.fetch_add(1, Ordering::SeqCst);
//!             Ok(())
//!         });
//!         graph.add_edge(first, second, EdgeKind::Signal)?;
//!         graph.signal(first)?;
//!         graph.wait_for_all()?;
//!         yaoxiang_flow::Result::Ok(())
//!     })
//!     .unwrap()
//!     .unwrap();
//!
//! assert_eq!(hits.load(Ordering::SeqCst), 2);
//! ```

#![doc(html_root_url = "https://docs.rs/yaoxiang-flow")]
#![warn(rust_2018_idioms)]

pub mod runtime;
pub mod util;

// Re-exports
pub use anyhow::{Context, Result};
pub use runtime::dag::{
    EdgeKind, FlowGraph, GraphError, InvocationPolicy, NodeId, NodeState, Signal,
};
pub use runtime::scheduler::{
    isolate, parallel_for, parallel_for_ranges, Arena, Concurrency, FlowScheduler, PoolError,
    SchedulerConfig, TaskError, TaskPriority,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = "YaoXiang Flow (爻象)";
