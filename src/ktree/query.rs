//! Read-only descents through a built K-tree.

use super::{KTree, Key, NodeId};
use crate::vector_value::VectorValue;

/// Lazy root-to-leaf walk yielding the nearest internal key at each level.
///
/// Produced by [`KTree::cluster_path`]. Each call to `next` inspects one node;
/// the walk ends once it reaches a leaf node.
#[derive(Debug)]
pub struct ClusterPath<'a, 'q, T> {
    tree: &'a KTree<T>,
    observation: &'q T,
    next_node: Option<NodeId>,
}

impl<'a, T: VectorValue> Iterator for ClusterPath<'a, '_, T> {
    type Item = &'a Key<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let tree = self.tree;
        let node = tree.node(self.next_node.take()?)?;
        if node.is_leaf() {
            return None;
        }
        let key = &node.keys[tree.nearest_key(node, self.observation)?];
        self.next_node = key.child;
        Some(key)
    }
}

impl<T: VectorValue> KTree<T> {
    /// The cluster means `observation` falls into, coarsest first.
    pub fn cluster_path<'q>(&self, observation: &'q T) -> ClusterPath<'_, 'q, T> {
        self.cluster_path_from(self.root, observation)
    }

    pub fn cluster_path_from<'q>(&self, start: NodeId, observation: &'q T) -> ClusterPath<'_, 'q, T> {
        ClusterPath {
            tree: self,
            observation,
            next_node: Some(start),
        }
    }

    /// The key nearest to `observation` at `depth` levels below the root
    /// (depth 0 is the root's own keys).
    ///
    /// Returns `None` when the path to a leaf is shorter than `depth`.
    pub fn mean_at_depth(&self, observation: &T, depth: usize) -> Option<&Key<T>> {
        self.mean_at_depth_from(self.root, observation, depth)
    }

    pub fn mean_at_depth_from(&self, start: NodeId, observation: &T, depth: usize) -> Option<&Key<T>> {
        let mut node = self.node(start)?;
        let mut current_depth = 0;
        loop {
            let key = &node.keys[self.nearest_key(node, observation)?];
            if current_depth == depth {
                return Some(key);
            }
            node = self.node(key.child?)?;
            current_depth += 1;
        }
    }
}
