//! Hierarchical identifiers for structures and their configurations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a candidate structure or of one configuration of it.
///
/// Ordering is lexicographic on `(iteration, structure, config)`; a structure
/// id (no config index) sorts before all of its configuration ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CandidateId {
    /// Iteration of the proposer that issued the structure. Carries the
    /// repetition offset, so ids stay fresh across repetitions.
    pub iteration: u32,
    /// Index of the structure within its iteration.
    pub structure: u32,
    /// Index of the configuration within the structure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<u32>,
}

impl CandidateId {
    /// Creates the id of a structure.
    pub fn new(iteration: u32, structure: u32) -> Self {
        Self {
            iteration,
            structure,
            config: None,
        }
    }

    /// Returns the id of the `config`-th configuration of this structure.
    pub fn with_config(&self, config: u32) -> Self {
        Self {
            config: Some(config),
            ..*self
        }
    }

    /// Strips the configuration index.
    pub fn structure_id(&self) -> Self {
        Self {
            config: None,
            ..*self
        }
    }

    /// Returns whether this id names a configuration rather than a structure.
    pub fn is_config(&self) -> bool {
        self.config.is_some()
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.config {
            Some(config) => write!(
                f,
                "{:02}:{:02}:{:02}",
                self.iteration, self.structure, config
            ),
            None => write!(f, "{:02}:{:02}", self.iteration, self.structure),
        }
    }
}
