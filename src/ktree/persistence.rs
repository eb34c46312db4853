//! Gzip-compressed bincode snapshots of a whole K-tree.
//!
//! The arena is written as-is: child and parent links are plain node
//! indices, so the parent/child cycle needs no special handling.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::KTreeConfig;
use super::{KTree, Node, NodeId};
use crate::error::{KTreeError, Result};
use crate::vector_value::VectorValue;

const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotRef<'a, T> {
    format_version: u32,
    config: &'a KTreeConfig,
    root: NodeId,
    nodes: &'a [Node<T>],
}

#[derive(Deserialize)]
struct Snapshot<T> {
    format_version: u32,
    config: KTreeConfig,
    root: NodeId,
    nodes: Vec<Node<T>>,
}

impl<T: VectorValue> KTree<T> {
    /// Writes the tree to `path`, replacing any existing file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let start = Instant::now();
        let file = File::create(path.as_ref())?;
        self.write_to(BufWriter::new(file))?.flush()?;
        info!(
            path = %path.as_ref().display(),
            nodes = self.node_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "k-tree saved"
        );
        Ok(())
    }

    /// Reads a tree written by [`KTree::save`].
    ///
    /// The random generator used by later splits is reseeded from the stored
    /// config, or from entropy when the tree was built unseeded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let start = Instant::now();
        let file = File::open(path.as_ref())?;
        let tree = Self::read_from(BufReader::new(file))?;
        info!(
            path = %path.as_ref().display(),
            nodes = tree.node_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "k-tree opened"
        );
        Ok(tree)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.write_to(Vec::new())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(bytes)
    }

    fn write_to<W: Write>(&self, writer: W) -> Result<W> {
        let snapshot = SnapshotRef {
            format_version: FORMAT_VERSION,
            config: &self.config,
            root: self.root,
            nodes: &self.nodes,
        };
        let mut encoder = GzEncoder::new(writer, Compression::default());
        bincode::serialize_into(&mut encoder, &snapshot)?;
        Ok(encoder.finish()?)
    }

    fn read_from<R: Read>(reader: R) -> Result<Self> {
        let snapshot: Snapshot<T> = bincode::deserialize_from(GzDecoder::new(reader))?;
        if snapshot.format_version != FORMAT_VERSION {
            return Err(KTreeError::UnsupportedVersion {
                found: snapshot.format_version,
                expected: FORMAT_VERSION,
            });
        }
        snapshot.config.validate()?;
        validate_links(&snapshot.nodes, snapshot.root)?;
        Ok(Self::from_parts(snapshot.nodes, snapshot.root, snapshot.config))
    }
}

/// Structural checks on a decoded arena: every id in range, children point
/// back at their parent, the root is parentless, every node is reachable from
/// the root exactly once, and no node is empty or mixes leaf and internal keys.
/// A lone empty root is the one empty node allowed.
fn validate_links<T>(nodes: &[Node<T>], root: NodeId) -> Result<()> {
    let corrupt = |msg: String| Err(KTreeError::CorruptSnapshot(msg));

    let Some(root_node) = nodes.get(root.0) else {
        return corrupt(format!("root {} out of range ({} nodes)", root.0, nodes.len()));
    };
    if root_node.parent.is_some() {
        return corrupt(format!("root {} has a parent", root.0));
    }
    if root_node.is_empty() && nodes.len() == 1 {
        return Ok(());
    }

    for (index, node) in nodes.iter().enumerate() {
        if let Some(parent) = node.parent.filter(|parent| parent.0 >= nodes.len()) {
            return corrupt(format!("node {index} has parent {} out of range", parent.0));
        }
        if node.is_empty() {
            return corrupt(format!("node {index} is empty"));
        }
        let leaf_keys = node.keys.iter().filter(|key| key.is_leaf()).count();
        if leaf_keys != 0 && leaf_keys != node.len() {
            return corrupt(format!("node {index} mixes leaf and internal keys"));
        }
        for child in node.children() {
            match nodes.get(child.0) {
                Some(child_node) if child_node.parent == Some(NodeId(index)) => {}
                Some(_) => return corrupt(format!("child {} of node {index} does not point back", child.0)),
                None => return corrupt(format!("node {index} has child {} out of range", child.0)),
            }
        }
    }

    let mut visited = vec![false; nodes.len()];
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        if std::mem::replace(&mut visited[id.0], true) {
            return corrupt(format!("node {} is reachable twice", id.0));
        }
        stack.extend(nodes[id.0].children());
    }
    if let Some(orphan) = visited.iter().position(|seen| !seen) {
        return corrupt(format!("node {orphan} is unreachable from root {}", root.0));
    }
    Ok(())
}
