//! Join tuples and per-port buffers.
//!
//! A join over `(A, B, ..)` has one unbounded FIFO per port and emits
//! `(Arc<A>, Arc<B>, ..)` each time every port holds at least one item,
//! taking the oldest item of each port.

use std::collections::VecDeque;
use std::sync::Arc;

use super::node::{Payload, PortType};

/// Tuple types a join node can be built over (2 to 6 ports).
pub trait JoinTuple: 'static {
    /// The emitted value: one shared handle per port.
    type Output: Send + Sync + 'static;

    /// Number of ports.
    const ARITY: usize;

    /// Port types in port order.
    fn port_types() -> Vec<PortType>;

    /// Build the output from one item per port, in port order.
    ///
    /// Returns `None` if an item has the wrong type.
    fn assemble(items: Vec<Payload>) -> Option<Self::Output>;
}

macro_rules! impl_join_tuple {
    ($arity:expr; $($T:ident),+) => {
        impl<$($T: Send + Sync + 'static),+> JoinTuple for ($($T,)+) {
            type Output = ($(Arc<$T>,)+);

            const ARITY: usize = $arity;

            fn port_types() -> Vec<PortType> {
                vec![$(PortType::of::<$T>()),+]
            }

            fn assemble(items: Vec<Payload>) -> Option<Self::Output> {
                let mut items = items.into_iter();
                Some(($(items.next()?.downcast::<$T>().ok()?,)+))
            }
        }
    };
}

impl_join_tuple!(2; A, B);
impl_join_tuple!(3; A, B, C);
impl_join_tuple!(4; A, B, C, D);
impl_join_tuple!(5; A, B, C, D, E);
impl_join_tuple!(6; A, B, C, D, E, F);

/// Assembles a type-erased join output.
pub(crate) type Assemble = fn(Vec<Payload>) -> Option<Payload>;

pub(crate) fn assemble_erased<J: JoinTuple>(items: Vec<Payload>) -> Option<Payload> {
    J::assemble(items).map(|output| Arc::new(output) as Payload)
}

/// FIFO buffers of one join node.
#[derive(Debug)]
pub(crate) struct JoinBuffer {
    ports: Vec<VecDeque<Payload>>,
}

impl JoinBuffer {
    pub(crate) fn new(arity: usize) -> Self {
        Self {
            ports: (0..arity).map(|_| VecDeque::new()).collect(),
        }
    }

    /// Append `item` to `port`.
    pub(crate) fn push(
        &mut self,
        port: usize,
        item: Payload,
    ) {
        self.ports[port].push_back(item);
    }

    /// Pop the oldest item of every port, if none is empty.
    pub(crate) fn pop_complete(&mut self) -> Option<Vec<Payload>> {
        if self.ports.iter().any(VecDeque::is_empty) {
            return None;
        }
        self.ports.iter_mut().map(VecDeque::pop_front).collect()
    }

    /// Items waiting on `port`.
    pub(crate) fn pending(
        &self,
        port: usize,
    ) -> usize {
        self.ports.get(port).map_or(0, VecDeque::len)
    }

    pub(crate) fn clear(&mut self) {
        self.ports.iter_mut().for_each(VecDeque::clear);
    }
}
