//! Subscriber types for the reactive system.
//!
//! A subscriber is any computation that depends on reactive values: memos
//! and effects. The runtime stores them type-erased behind [`Reactive`] so
//! the flush loop can run any of them by `NodeId`.

use std::rc::{Rc, Weak};

use crate::error::BoxError;
use crate::graph::{NodeId, NodeKind};

/// A computation the runtime can re-run.
pub(crate) trait Reactive {
    /// The graph node backing this computation.
    fn node_id(&self) -> NodeId;

    /// Memo or effect.
    fn kind(&self) -> NodeKind;

    /// Run the body once.
    ///
    /// Returns whether the node's observable value changed. Effects have no
    /// value and always report `false`.
    fn execute(&self) -> Result<bool, BoxError>;

    /// Called when the runtime removes the computation.
    fn dispose(&self) {}
}

/// How the runtime holds on to a subscriber.
///
/// Effects have no natural owner besides the runtime, so the runtime keeps
/// them alive until they are disposed. Memos are owned by their handles;
/// the runtime only keeps a weak reference so a dropped memo goes away.
pub(crate) enum Subscriber {
    Owned(Rc<dyn Reactive>),
    Weak(Weak<dyn Reactive>),
}

impl Subscriber {
    pub(crate) fn upgrade(&self) -> Option<Rc<dyn Reactive>> {
        match self {
            Subscriber::Owned(reactive) => Some(Rc::clone(reactive)),
            Subscriber::Weak(weak) => weak.upgrade(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counter {
        id: NodeId,
        runs: Cell<usize>,
    }

    impl Reactive for Counter {
        fn node_id(&self) -> NodeId {
            self.id
        }

        fn kind(&self) -> NodeKind {
            NodeKind::Effect
        }

        fn execute(&self) -> Result<bool, BoxError> {
            self.runs.set(self.runs.get() + 1);
            Ok(false)
        }
    }

    fn counter() -> Rc<Counter> {
        Rc::new(Counter {
            id: NodeId::next(),
            runs: Cell::new(0),
        })
    }

    #[test]
    fn owned_subscriber_keeps_computation_alive() {
        let reactive = counter();
        let slot = Subscriber::Owned(reactive.clone());
        drop(reactive);

        let upgraded = slot.upgrade().unwrap();
        upgraded.execute().unwrap();
        assert_eq!(upgraded.kind(), NodeKind::Effect);
    }

    #[test]
    fn weak_subscriber_does_not_keep_computation_alive() {
        let reactive = counter();
        let weak: Weak<Counter> = Rc::downgrade(&reactive);
        let slot = Subscriber::Weak(weak);

        assert_eq!(slot.upgrade().map(|r| r.node_id()), Some(reactive.id));
        drop(reactive);
        assert!(slot.upgrade().is_none());
    }
}
