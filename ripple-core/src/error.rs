//! Error types for the reactive runtime.

use thiserror::Error;

use crate::graph::NodeId;

/// Boxed error returned by fallible effect bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors surfaced to whoever drove a run: the creation call, a signal
/// write, or the close of a batch.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// An effect body returned an error. The effect stays dirty and is
    /// retried the next time propagation reaches it.
    #[error("computation {node} failed: {source}")]
    Computation {
        node: NodeId,
        #[source]
        source: BoxError,
    },

    /// Computations kept writing signals during propagation, so the flush
    /// never settled.
    #[error("propagation did not settle after {rounds} rounds")]
    FlushLimitExceeded { rounds: usize },

    /// More than one computation failed during a single flush.
    #[error("{} computations failed during propagation", .0.len())]
    Multiple(Vec<ReactiveError>),
}

impl ReactiveError {
    /// Wrap an effect failure.
    pub fn computation(node: NodeId, source: impl Into<BoxError>) -> Self {
        Self::Computation {
            node,
            source: source.into(),
        }
    }

    /// Collapse a list of failures into one error, if there were any.
    pub(crate) fn collect(mut errors: Vec<ReactiveError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// The node that failed, for single-computation errors.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            Self::Computation { node, .. } => Some(*node),
            _ => None,
        }
    }
}
