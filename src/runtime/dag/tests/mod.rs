//! DAG 模块单元测试
//!
//! 测试图结构校验、连接缓冲区与任务图执行

use crate::runtime::dag::{
    ComputationDAG, DAGNodeKind, EdgeKind, GraphError, InvocationPolicy, NodeId, PortType, Signal,
};
use crate::runtime::scheduler::{FlowScheduler, SchedulerConfig, TaskPriority};


fn continue_kind() -> DAGNodeKind {
    DAGNodeKind::Continue
}

fn function_kind<I: 'static, O: 'static>() -> DAGNodeKind {
    DAGNodeKind::Function {
        policy: InvocationPolicy::Serial,
        input: PortType::of::<I>(),
        output: PortType::of::<O>(),
    }
}

pub(super) fn pool(workers: usize) -> FlowScheduler {
    FlowScheduler::with_config(SchedulerConfig::with_workers(workers)).unwrap()
}

#[cfg(test)]
mod node_id_tests {
    use super::*;
    use crate::runtime::dag::NodeIdGenerator;

    #[test]
    fn test_node_id_new() {
        let id = NodeId(1);
        assert_eq!(id.value(), 1);
        assert_eq!(NodeId::new(1), id);
    }

    #[test]
    fn test_node_id_display() {
        let display = format!("{}", NodeId(42));
        assert!(display.contains("42"));
    }

    #[test]
    fn test_node_id_generator() {
        let generator = NodeIdGenerator::new();
        assert_eq!(generator.generate(), NodeId(0));
        assert_eq!(generator.generate(), NodeId(1));
        assert_eq!(generator.issued(), 2);
    }
}

#[cfg(test)]
mod node_kind_tests {
    use super::*;

    #[test]
    fn test_port_layout() {
        let cont = continue_kind();
        assert_eq!(cont.arity(), 1);
        assert_eq!(cont.input_type(0), Some(PortType::signal()));
        assert_eq!(cont.input_type(1), None);
        assert!(cont.output_type().is_signal());

        let func = function_kind::<u32, String>();
        assert_eq!(func.input_type(0), Some(PortType::of::<u32>()));
        assert_eq!(func.output_type(), PortType::of::<String>());

        let join = DAGNodeKind::Join {
            ports: vec![PortType::of::<u8>(), PortType::signal()],
            output: PortType::of::<(u8, Signal)>(),
        };
        assert!(join.is_join());
        assert_eq!(join.arity(), 2);
        assert_eq!(join.input_type(1), Some(PortType::signal()));
        assert_eq!(join.input_type(2), None);
    }

    #[test]
    fn test_port_type_accepts() {
        let payload: crate::runtime::dag::Payload = std::sync::Arc::new(5u32);
        assert!(PortType::of::<u32>().accepts(&payload));
        assert!(!PortType::of::<u64>().accepts(&payload));
        assert!(PortType::of::<u32>().name().contains("u32"));
    }
}

#[cfg(test)]
mod dag_tests {
    use super::*;

    fn three_continues(dag: &mut ComputationDAG) -> (NodeId, NodeId, NodeId) {
        let a = dag.add_node("a", continue_kind(), TaskPriority::Medium);
        let b = dag.add_node("b", continue_kind(), TaskPriority::Medium);
        let c = dag.add_node("c", continue_kind(), TaskPriority::Medium);
        (a, b, c)
    }

    #[test]
    fn test_dag_new() {
        let dag = ComputationDAG::new();
        assert!(dag.is_empty());
        assert_eq!(dag.num_nodes(), 0);
        assert_eq!(dag.num_edges(), 0);

        let dag = ComputationDAG::with_capacity(16);
        assert!(dag.is_empty());
    }

    #[test]
    fn test_dag_add_node() {
        let mut dag = ComputationDAG::new();
        let a = dag.add_node("a", continue_kind(), TaskPriority::High);
        assert!(dag.contains_node(a));
        assert!(!dag.contains_node(NodeId(7)));

        let node = dag.get_node(a).unwrap();
        assert_eq!(node.name(), "a");
        assert_eq!(node.priority(), TaskPriority::High);
        assert!(node.is_root() && node.is_leaf());
    }

    #[test]
    fn test_dag_add_edge() {
        let mut dag = ComputationDAG::new();
        let (a, b, _) = three_continues(&mut dag);

        dag.add_edge(a, b, 0, EdgeKind::Signal).unwrap();
        assert!(dag.has_edge(a, b));
        assert!(!dag.has_edge(b, a));
        assert_eq!(dag.in_degree(b), 1);
        assert!(dag.get_node(b).unwrap().depends_on(a));
        assert_eq!(dag.edges_from(a).len(), 1);
    }

    #[test]
    fn test_dag_rejects_unknown_node() {
        let mut dag = ComputationDAG::new();
        let a = dag.add_node("a", continue_kind(), TaskPriority::Medium);
        assert_eq!(
            dag.add_edge(a, NodeId(9), 0, EdgeKind::Signal),
            Err(GraphError::NodeNotFound(NodeId(9)))
        );
    }

    #[test]
    fn test_dag_rejects_cycles() {
        let mut dag = ComputationDAG::new();
        let (a, b, c) = three_continues(&mut dag);
        dag.add_edge(a, b, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(b, c, 0, EdgeKind::Signal).unwrap();

        assert_eq!(
            dag.add_edge(c, a, 0, EdgeKind::Signal),
            Err(GraphError::CycleDetected { from: c, to: a })
        );
        assert_eq!(
            dag.add_edge(b, b, 0, EdgeKind::Signal),
            Err(GraphError::CycleDetected { from: b, to: b })
        );
        assert_eq!(dag.num_edges(), 2);
    }

    #[test]
    fn test_dag_rejects_duplicate_edge() {
        let mut dag = ComputationDAG::new();
        let (a, b, _) = three_continues(&mut dag);
        dag.add_edge(a, b, 0, EdgeKind::Signal).unwrap();
        assert_eq!(
            dag.add_edge(a, b, 0, EdgeKind::Signal),
            Err(GraphError::DuplicateEdge {
                from: a,
                to: b,
                port: 0
            })
        );
    }

    #[test]
    fn test_dag_rejects_bad_ports() {
        let mut dag = ComputationDAG::new();
        let a = dag.add_node("a", continue_kind(), TaskPriority::Medium);
        let numbers = dag.add_node("numbers", function_kind::<Signal, u64>(), TaskPriority::Medium);
        let text = dag.add_node("text", function_kind::<String, Signal>(), TaskPriority::Medium);

        assert_eq!(
            dag.add_edge(a, numbers, 1, EdgeKind::Signal),
            Err(GraphError::PortArityMismatch {
                node: numbers,
                port: 1,
                arity: 1
            })
        );
        assert!(matches!(
            dag.add_edge(numbers, text, 0, EdgeKind::Data),
            Err(GraphError::PortTypeMismatch { node, port: 0, .. }) if node == text
        ));
        // A signal edge needs a port that takes signals.
        assert!(matches!(
            dag.add_edge(a, text, 0, EdgeKind::Signal),
            Err(GraphError::PortTypeMismatch { .. })
        ));
        dag.add_edge(a, numbers, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(numbers, a, 0, EdgeKind::Signal).unwrap_err();
    }

    #[test]
    fn test_dag_roots_and_leaves() {
        let mut dag = ComputationDAG::new();
        let (a, b, c) = three_continues(&mut dag);

        assert_eq!(dag.roots().len(), 3);
        assert_eq!(dag.leaves().len(), 3);

        dag.add_edge(a, c, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(b, c, 0, EdgeKind::Signal).unwrap();

        assert_eq!(dag.roots(), vec![a, b]);
        assert_eq!(dag.leaves(), vec![c]);
        assert_eq!(dag.in_degree(c), 2);
    }

    #[test]
    fn test_dag_topological_sort() {
        let mut dag = ComputationDAG::new();
        let (a, b, c) = three_continues(&mut dag);
        let d = dag.add_node("d", continue_kind(), TaskPriority::Medium);

        dag.add_edge(c, a, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(b, a, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(a, d, 0, EdgeKind::Signal).unwrap();

        let order = dag.topological_sort();
        assert_eq!(order.len(), 4);
        let pos = |id| order.iter().position(|&x| x == id).unwrap();
        assert!(pos(b) < pos(a));
        assert!(pos(c) < pos(a));
        assert!(pos(a) < pos(d));
    }

    #[test]
    fn test_dag_levels_and_parallelism() {
        let mut dag = ComputationDAG::new();
        let (a, b, c) = three_continues(&mut dag);
        let d = dag.add_node("d", continue_kind(), TaskPriority::Medium);
        dag.add_edge(a, d, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(b, d, 0, EdgeKind::Signal).unwrap();
        dag.add_edge(c, d, 0, EdgeKind::Signal).unwrap();

        assert_eq!(dag.levels(), vec![vec![a, b, c], vec![d]]);
        assert_eq!(dag.max_parallelism(), 3);
        assert_eq!(ComputationDAG::new().max_parallelism(), 0);
    }
}

#[cfg(test)]
mod join_tests {
    use std::sync::Arc;

    use crate::runtime::dag::join::{JoinBuffer, JoinTuple};
    use crate::runtime::dag::{Payload, PortType, Signal};

    #[test]
    fn test_join_tuple_layout() {
        assert_eq!(<(u8, Signal) as JoinTuple>::ARITY, 2);
        assert_eq!(
            <(u8, Signal, String) as JoinTuple>::port_types(),
            vec![
                PortType::of::<u8>(),
                PortType::signal(),
                PortType::of::<String>()
            ]
        );
    }

    #[test]
    fn test_join_tuple_assemble() {
        let items: Vec<Payload> = vec![Arc::new(3u8), Arc::new("x".to_string())];
        let (a, b) = <(u8, String)>::assemble(items).unwrap();
        assert_eq!(*a, 3);
        assert_eq!(b.as_str(), "x");

        let wrong: Vec<Payload> = vec![Arc::new(3u32), Arc::new("x".to_string())];
        assert!(<(u8, String)>::assemble(wrong).is_none());
    }

    #[test]
    fn test_join_buffer_pairs_in_fifo_order() {
        let mut buffer = JoinBuffer::new(2);
        buffer.push(0, Arc::new(1u32));
        buffer.push(0, Arc::new(2u32));
        assert!(buffer.pop_complete().is_none());
        assert_eq!(buffer.pending(0), 2);

        buffer.push(1, Arc::new(Signal));
        let items = buffer.pop_complete().unwrap();
        assert_eq!(items[0].downcast_ref::<u32>(), Some(&1));
        assert!(buffer.pop_complete().is_none());
        assert_eq!(buffer.pending(0), 1);
        assert_eq!(buffer.pending(1), 0);

        buffer.clear();
        assert_eq!(buffer.pending(0), 0);
    }
}
