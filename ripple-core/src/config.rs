//! Runtime configuration.

use serde::{Deserialize, Serialize};

/// Default cap on flush rounds before propagation is declared runaway.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 100;

/// Settings for a [`Runtime`](crate::reactive::Runtime).
///
/// Deserializable from any serde format; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name attached to the runtime's log events.
    pub name: Option<String>,

    /// How many commit-and-propagate rounds a single flush may take.
    /// A round is added whenever a computation writes a signal while
    /// propagation is running.
    pub max_flush_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
        }
    }
}

impl RuntimeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn with_max_flush_rounds(mut self, rounds: usize) -> Self {
        self.max_flush_rounds = rounds.max(1);
        self
    }
}
