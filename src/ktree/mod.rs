//! The K-tree: a height-balanced clustering tree built by two-means node splits.
//!
//! Nodes live in an arena owned by [`KTree`] and are addressed by [`NodeId`].
//! A key's child id is the owning link; a node's parent id is a plain
//! back-reference used only to find and update the key that summarises it.
//! Nodes are never removed, so ids stay valid for the life of the tree.

pub mod config;
mod nearest;
pub mod persistence;
pub mod query;
pub mod two_means;

use std::fmt;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{KTreeError, Result};
use crate::vector_value::{VectorValue, mean_of};
use config::KTreeConfig;
use two_means::TwoMeans;

/// Stable handle of a node inside a [`KTree`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A slot in a node.
///
/// A leaf key holds a raw observation. An internal key holds the mean of its
/// child node's keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Key<T> {
    pub value: T,
    child: Option<NodeId>,
}

impl<T> Key<T> {
    fn leaf(value: T) -> Self {
        Key { value, child: None }
    }

    fn internal(value: T, child: NodeId) -> Self {
        Key {
            value,
            child: Some(child),
        }
    }

    pub fn child(&self) -> Option<NodeId> {
        self.child
    }

    pub fn is_leaf(&self) -> bool {
        self.child.is_none()
    }
}

/// Up to `order - 1` keys, all leaf or all internal, plus a link to the parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node<T> {
    keys: Vec<Key<T>>,
    parent: Option<NodeId>,
}

impl<T> Node<T> {
    fn new(keys: Vec<Key<T>>, parent: Option<NodeId>) -> Self {
        Node { keys, parent }
    }

    pub fn keys(&self) -> &[Key<T>] {
        &self.keys
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// A node with no internal keys. The empty initial root counts as a leaf.
    pub fn is_leaf(&self) -> bool {
        self.keys.iter().all(Key::is_leaf)
    }

    fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.keys.iter().filter_map(Key::child)
    }
}

/// A K-tree over observations of type `T`.
#[derive(Debug)]
pub struct KTree<T> {
    nodes: Vec<Node<T>>,
    root: NodeId,
    config: KTreeConfig,
    two_means: TwoMeans,
    rng: StdRng,
}

impl<T: VectorValue> KTree<T> {
    /// An empty tree: a single root node with no keys.
    pub fn new(config: KTreeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(vec![Node::new(Vec::new(), None)], NodeId(0), config))
    }

    /// Builds a tree by inserting every observation in order.
    pub fn construct<I>(observations: I, config: KTreeConfig) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
    {
        let mut observations = observations.into_iter().peekable();
        if observations.peek().is_none() {
            return Err(KTreeError::EmptyObservations);
        }

        let mut tree = Self::new(config)?;
        let start = Instant::now();
        let mut inserted = 0usize;
        for observation in observations {
            tree.insert(observation)?;
            inserted += 1;
        }

        info!(
            observations = inserted,
            nodes = tree.node_count(),
            height = tree.height(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "k-tree constructed"
        );
        Ok(tree)
    }

    fn from_parts(nodes: Vec<Node<T>>, root: NodeId, config: KTreeConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        KTree {
            nodes,
            root,
            two_means: TwoMeans::new(config.max_iterations),
            config,
            rng,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn order(&self) -> usize {
        self.config.order
    }

    pub fn config(&self) -> &KTreeConfig {
        &self.config
    }

    pub fn node(&self, id: NodeId) -> Option<&Node<T>> {
        self.nodes.get(id.0)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of levels from the root down to the leaves (1 for an empty tree).
    pub fn height(&self) -> usize {
        let mut height = 1;
        let mut current = &self.nodes[self.root.0];
        while let Some(child) = current.children().next() {
            current = &self.nodes[child.0];
            height += 1;
        }
        height
    }

    /// Number of raw observations stored in leaf keys.
    pub fn observation_count(&self) -> usize {
        self.nodes.iter().filter(|node| node.is_leaf()).map(Node::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.observation_count() == 0
    }

    /// The node reached by following parent links from `id`.
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            current = parent;
        }
        current
    }

    /// Inserts one observation and returns the (possibly new) root.
    ///
    /// The observation descends to the nearest leaf. A leaf that reaches the
    /// tree's order splits, and splits cascade upward as parents fill.
    /// Otherwise the means on the path back to the root are refreshed.
    pub fn insert(&mut self, observation: T) -> Result<NodeId> {
        let leaf = self.descend_to_leaf(&observation);

        if self.nodes[leaf.0].is_empty() {
            let wrapper = Key::internal(observation.clone(), leaf);
            self.nodes[leaf.0].keys.push(Key::leaf(observation));
            let parent = self.push_node(Node::new(vec![wrapper], None));
            self.nodes[leaf.0].parent = Some(parent);
            self.root = parent;
            debug!(root = parent.0, "bootstrapped k-tree");
        } else {
            self.nodes[leaf.0].keys.push(Key::leaf(observation));
            self.settle(leaf)?;
        }

        Ok(self.root_of(leaf))
    }

    /// Nearest key of `node` to `observation`: ties go to the key whose
    /// child holds fewer keys, then to the lowest position.
    pub(crate) fn nearest_key(&self, node: &Node<T>, observation: &T) -> Option<usize> {
        nearest::nearest(
            observation,
            node.keys.iter().map(|key| (&key.value, self.child_len(key))),
        )
    }

    fn child_len(&self, key: &Key<T>) -> usize {
        key.child.map_or(0, |child| self.nodes[child.0].len())
    }

    fn descend_to_leaf(&self, observation: &T) -> NodeId {
        let mut current = self.root;
        loop {
            let node = &self.nodes[current.0];
            if node.is_leaf() {
                return current;
            }
            let Some(child) = self.nearest_key(node, observation).and_then(|index| node.keys[index].child) else {
                return current;
            };
            current = child;
        }
    }

    fn push_node(&mut self, node: Node<T>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    /// Called after a key was appended to `id`.
    fn settle(&mut self, id: NodeId) -> Result<()> {
        if self.nodes[id.0].len() >= self.config.order {
            self.split(id)
        } else {
            self.propagate_mean_upward(id);
            Ok(())
        }
    }

    /// Recomputes the key summarising `id` in its parent, then the parent's
    /// own summary, and so on up to the root. Never splits.
    fn propagate_mean_upward(&mut self, id: NodeId) {
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            if let Some(mean) = mean_of(self.nodes[current.0].keys.iter().map(|key| &key.value)) {
                self.set_child_mean(parent, current, mean);
            }
            current = parent;
        }
    }

    fn set_child_mean(&mut self, parent: NodeId, child: NodeId, mean: T) {
        if let Some(key) = self.nodes[parent.0]
            .keys
            .iter_mut()
            .find(|key| key.child == Some(child))
        {
            key.value = mean;
        }
    }

    /// Splits a full node in two with two-means.
    ///
    /// The node keeps cluster 0 and its identity; cluster 1 moves to a new
    /// sibling under the same parent. A root that splits gets a new parent,
    /// which becomes the root. If the parent fills up it splits in turn.
    fn split(&mut self, id: NodeId) -> Result<()> {
        let mut current = id;
        loop {
            let keys = std::mem::take(&mut self.nodes[current.0].keys);
            let values: Vec<T> = keys.iter().map(|key| key.value.clone()).collect();
            let [left, right] = match self.two_means.partition(&values, &mut self.rng) {
                Ok(clusters) => clusters,
                Err(err) => {
                    self.nodes[current.0].keys = keys;
                    return Err(err);
                }
            };
            let (left_mean, left_members) = left.into_parts();
            let (right_mean, right_members) = right.into_parts();

            let mut slots: Vec<Option<Key<T>>> = keys.into_iter().map(Some).collect();
            let left_keys = take_members(&mut slots, &left_members);
            let right_keys = take_members(&mut slots, &right_members);
            debug!(
                node = current.0,
                left = left_keys.len(),
                right = right_keys.len(),
                "splitting k-tree node"
            );
            self.nodes[current.0].keys = left_keys;

            let parent = match self.nodes[current.0].parent {
                Some(parent) => {
                    self.set_child_mean(parent, current, left_mean);
                    parent
                }
                None => {
                    let new_root = self.push_node(Node::new(vec![Key::internal(left_mean, current)], None));
                    self.nodes[current.0].parent = Some(new_root);
                    self.root = new_root;
                    info!(root = new_root.0, height = self.height(), "k-tree grew a new root");
                    new_root
                }
            };

            let sibling = self.push_node(Node::new(right_keys, Some(parent)));
            self.adopt_children(sibling);
            self.nodes[parent.0].keys.push(Key::internal(right_mean, sibling));

            if self.nodes[parent.0].len() >= self.config.order {
                current = parent;
                continue;
            }
            self.propagate_mean_upward(parent);
            return Ok(());
        }
    }

    /// Points the parent link of every child of `id` back at `id`.
    fn adopt_children(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.nodes[id.0].children().collect();
        for child in children {
            self.nodes[child.0].parent = Some(id);
        }
    }

    /// Verifies the structural invariants of the tree, returning a
    /// description of the first violation found.
    ///
    /// Checked: every node is uniformly leaf or internal; no node holds
    /// `order` keys or more; child and parent links agree; every internal
    /// key equals the mean of its child's keys; every node reaches the root
    /// through parent links; the root has no parent.
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        const MEAN_TOLERANCE: f64 = 1e-9;

        if self.nodes[self.root.0].parent.is_some() {
            return Err(format!("root {} has a parent", self.root.0));
        }

        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id.0], true) {
                return Err(format!("node {} reachable twice", id.0));
            }
            let node = &self.nodes[id.0];

            let leaf_keys = node.keys.iter().filter(|key| key.is_leaf()).count();
            if leaf_keys != 0 && leaf_keys != node.len() {
                return Err(format!("node {} mixes leaf and internal keys", id.0));
            }
            if node.len() >= self.config.order {
                return Err(format!(
                    "node {} holds {} keys, order is {}",
                    id.0,
                    node.len(),
                    self.config.order
                ));
            }
            if self.root_of(id) != self.root {
                return Err(format!("node {} does not reach the root", id.0));
            }

            for key in &node.keys {
                let Some(child) = key.child else { continue };
                let child_node = self.node(child).ok_or_else(|| format!("dangling child {}", child.0))?;
                if child_node.parent != Some(id) {
                    return Err(format!("child {} does not point back to {}", child.0, id.0));
                }
                let expected = mean_of(child_node.keys.iter().map(|k| &k.value))
                    .ok_or_else(|| format!("internal key of node {} has an empty child", id.0))?;
                if key.value.distance(&expected) > MEAN_TOLERANCE {
                    return Err(format!(
                        "key {} in node {} is not the mean {} of its child",
                        key.value, id.0, expected
                    ));
                }
                stack.push(child);
            }
        }

        if let Some(orphan) = visited.iter().position(|seen| !seen) {
            return Err(format!("node {orphan} is unreachable from the root"));
        }
        Ok(())
    }

    /// An indented dump of every node's key values, one node per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_node(self.root, 0, &mut out);
        out
    }

    fn render_node(&self, id: NodeId, depth: usize, out: &mut String) {
        let node = &self.nodes[id.0];
        for level in 1..=depth {
            out.push_str(if level > 1 { "|  " } else { "   " });
        }
        let values: Vec<String> = node.keys.iter().map(|key| key.value.to_string()).collect();
        out.push_str(&format!("+- [{}]\n", values.join(", ")));
        for child in node.children() {
            self.render_node(child, depth + 1, out);
        }
    }
}

impl<T: VectorValue> fmt::Display for KTree<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Moves the keys at `members` out of `slots`, in member order.
fn take_members<T>(slots: &mut [Option<Key<T>>], members: &[usize]) -> Vec<Key<T>> {
    members
        .iter()
        .filter_map(|&index| slots.get_mut(index).and_then(Option::take))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_types::{Pixel, Point1D, Point2D};

    fn config(order: usize, seed: u64) -> KTreeConfig {
        KTreeConfig::new(order).with_seed(seed)
    }

    fn build_1d(values: &[f64], order: usize, seed: u64) -> KTree<f64> {
        KTree::construct(values.iter().copied(), config(order, seed)).expect("Tree construction failed")
    }

    /// Every leaf value under `id`.
    fn leaf_values<T: VectorValue>(tree: &KTree<T>, id: NodeId) -> Vec<T> {
        let node = tree.node(id).unwrap();
        if node.is_leaf() {
            return node.keys().iter().map(|key| key.value.clone()).collect();
        }
        node.keys()
            .iter()
            .flat_map(|key| leaf_values(tree, key.child().unwrap()))
            .collect()
    }

    #[test]
    fn test_invalid_order_is_rejected() {
        assert!(matches!(
            KTree::<f64>::new(KTreeConfig::new(2)),
            Err(KTreeError::InvalidOrder { order: 2 })
        ));
        assert!(matches!(
            KTree::<f64>::construct(vec![1.0, 2.0], KTreeConfig::new(0)),
            Err(KTreeError::InvalidOrder { order: 0 })
        ));
    }

    #[test]
    fn test_construct_rejects_empty_input() {
        let result = KTree::<f64>::construct(Vec::new(), config(3, 0));
        assert!(matches!(result, Err(KTreeError::EmptyObservations)));
    }

    #[test]
    fn test_fresh_tree_is_empty() {
        let tree = KTree::<f64>::new(config(3, 0)).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.height(), 1);
        assert_eq!(tree.node_count(), 1);
        assert!(tree.node(tree.root()).unwrap().is_leaf());
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_single_insert_bootstraps_root() {
        let mut tree = KTree::new(config(3, 0)).unwrap();
        let root = tree.insert(Point1D::new(4.0)).unwrap();
        assert_eq!(root, tree.root());

        let root_node = tree.node(root).unwrap();
        assert_eq!(root_node.parent(), None);
        assert_eq!(root_node.len(), 1);
        assert_eq!(root_node.keys()[0].value, Point1D::new(4.0));

        let leaf = tree.node(root_node.keys()[0].child().unwrap()).unwrap();
        assert!(leaf.is_leaf());
        assert_eq!(leaf.keys(), &[Key::leaf(Point1D::new(4.0))]);
        assert_eq!(leaf.parent(), Some(root));

        assert_eq!(tree.height(), 2);
        assert_eq!(tree.observation_count(), 1);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_insert_without_split_refreshes_mean() {
        let mut tree = KTree::new(config(5, 0)).unwrap();
        for value in [1.0_f64, 2.0, 6.0] {
            tree.insert(value).unwrap();
        }
        let root_node = tree.node(tree.root()).unwrap();
        assert_eq!(root_node.len(), 1);
        assert!((root_node.keys()[0].value - 3.0).abs() < 1e-12);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_forced_split_creates_two_children_under_root() {
        let order = 4;
        let mut tree = KTree::new(config(order, 17)).unwrap();
        let first_root = tree.insert(Point2D::new(0.0, 0.0)).unwrap();
        tree.insert(Point2D::new(100.0, 0.0)).unwrap();
        tree.insert(Point2D::new(0.0, 100.0)).unwrap();
        assert_eq!(tree.root(), first_root);

        let root = tree.insert(Point2D::new(100.0, 100.0)).unwrap();
        assert_eq!(root, first_root, "bootstrap root absorbs the leaf split");

        let root_node = tree.node(root).unwrap();
        assert_eq!(root_node.len(), 2);
        for key in root_node.keys() {
            let child = tree.node(key.child().unwrap()).unwrap();
            assert!(child.is_leaf());
            assert!(!child.is_empty());
        }
        assert_eq!(tree.observation_count(), order);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_minimum_order_keeps_nodes_small() {
        let tree = build_1d(&[1.0, 50.0, 2.0, 49.0, 3.0, 48.0, 25.0], 3, 9);
        assert_eq!(tree.observation_count(), 7);
        for id in (0..tree.node_count()).map(NodeId) {
            assert!(tree.node(id).unwrap().len() < 3);
        }
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_root_changes_when_root_splits() {
        let mut tree = KTree::new(config(3, 1)).unwrap();
        let mut roots = Vec::new();
        for value in [1.0, 2.0, 3.0, 100.0, 101.0, 102.0] {
            roots.push(tree.insert(value).unwrap());
        }
        assert_eq!(*roots.last().unwrap(), tree.root());
        assert!(roots.windows(2).any(|pair| pair[0] != pair[1]), "root should have moved");
        assert!(tree.height() >= 3);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_separated_groups_stay_apart() {
        for seed in 0..10 {
            let tree = build_1d(&[1.0, 2.0, 3.0, 100.0, 101.0, 102.0], 3, seed);
            assert!(tree.check_invariants().is_ok(), "seed {seed}");

            let root_node = tree.node(tree.root()).unwrap();
            assert_eq!(root_node.len(), 2, "seed {seed}");
            for key in root_node.keys() {
                let leaves = leaf_values(&tree, key.child().unwrap());
                if key.value < 10.0 {
                    assert!((1.0..=3.0).contains(&key.value));
                    assert!(leaves.iter().all(|v| *v <= 3.0), "seed {seed}");
                } else {
                    assert!((100.0..=102.0).contains(&key.value));
                    assert!(leaves.iter().all(|v| *v >= 100.0), "seed {seed}");
                }
            }
        }
    }

    #[test]
    fn test_invariants_hold_after_every_insert() {
        let mut tree = KTree::new(config(4, 3)).unwrap();
        for i in 0..200u32 {
            let x = ((i * 7919) % 97) as f64;
            let y = ((i * 104_729) % 89) as f64;
            tree.insert(Point2D::new(x, y)).unwrap();
            if let Err(violation) = tree.check_invariants() {
                panic!("after insert {i}: {violation}");
            }
        }
        assert_eq!(tree.observation_count(), 200);
    }

    #[test]
    fn test_root_reachable_from_every_node() {
        let values: Vec<f64> = (0..60).map(|i| ((i * 31) % 53) as f64).collect();
        let tree = build_1d(&values, 3, 21);
        for id in (0..tree.node_count()).map(NodeId) {
            assert_eq!(tree.root_of(id), tree.root());
        }
    }

    #[test]
    fn test_all_observations_are_kept() {
        let values: Vec<f64> = (0..40).map(|i| (i as f64) * 0.5).collect();
        let tree = build_1d(&values, 5, 2);
        let mut stored = leaf_values(&tree, tree.root());
        stored.sort_by(|a, b| a.compare(b));
        assert_eq!(stored, values);
    }

    #[test]
    fn test_duplicate_observations() {
        let tree = build_1d(&[7.0; 12], 3, 4);
        assert_eq!(tree.observation_count(), 12);
        assert!(tree.check_invariants().is_ok());
    }

    #[test]
    fn test_same_seed_builds_same_tree() {
        let pixels: Vec<Pixel> = (0..50u32)
            .map(|i| Pixel::new(i % 10, i / 10, (i * 5) as u8, (255 - i * 3) as u8, (i * 11 % 256) as u8))
            .collect();
        let a = KTree::construct(pixels.clone(), config(4, 99)).unwrap();
        let b = KTree::construct(pixels, config(4, 99)).unwrap();
        assert_eq!(a.render(), b.render());
        assert_eq!(a.root(), b.root());
    }

    #[test]
    fn test_render_layout() {
        let mut tree = KTree::new(config(5, 0)).unwrap();
        tree.insert(Point1D::new(1.0)).unwrap();
        tree.insert(Point1D::new(3.0)).unwrap();
        assert_eq!(tree.render(), "+- [2]\n   +- [1, 3]\n");
        assert_eq!(tree.to_string(), tree.render());
    }
}
