//! Construction parameters of a K-tree. Persisted alongside the tree.

use serde::{Deserialize, Serialize};

use crate::error::{KTreeError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KTreeConfig {
    /// Maximum number of keys a node may hold. A node that reaches it splits.
    pub order: usize,
    /// Seed for the random choice of initial means. `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Cap on two-means rounds per split.
    pub max_iterations: usize,
}

impl KTreeConfig {
    /// A root split leaves its new parent holding two keys, so order 2 would
    /// split forever.
    pub const MIN_ORDER: usize = 3;
    pub const DEFAULT_MAX_ITERATIONS: usize = 300;

    pub fn new(order: usize) -> Self {
        KTreeConfig {
            order,
            seed: None,
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.order < Self::MIN_ORDER {
            return Err(KTreeError::InvalidOrder { order: self.order });
        }
        if self.max_iterations == 0 {
            return Err(KTreeError::InvalidIterationCap);
        }
        Ok(())
    }
}
