//! K-trees: hierarchical clustering indexes built by two-means node splits.
//!
//! Observations are inserted one at a time into a [`KTree`]. Leaves hold raw
//! observations and every internal key holds the mean of its child, so a
//! descent from the root gives progressively finer cluster assignments of a
//! point (see [`KTree::cluster_path`] and [`KTree::mean_at_depth`]).

pub mod data_types;
pub mod error;
pub mod ktree;
pub mod vector_value;

#[cfg(feature = "python")]
mod python;

pub use data_types::{Pixel, Point1D, Point2D};
pub use error::{KTreeError, Result};
pub use ktree::config::KTreeConfig;
pub use ktree::query::ClusterPath;
pub use ktree::two_means::{Cluster, TwoMeans};
pub use ktree::{KTree, Key, Node, NodeId};
pub use vector_value::{VectorValue, mean_of};
