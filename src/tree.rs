//! Code trees shared by the encoder and the decoder.
//!
//! Both trees are arenas: every node lives in one `Vec` owned by its tree and
//! is addressed by a [`NodeId`]. Leaves come first, one per symbol in table
//! order, followed by internal nodes in the order they were merged. Parent
//! links are written once, when a node gets merged, and are only ever used to
//! walk back up to the root.
use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bit_buffer::BitBuffer;

pub mod decode;
pub mod encode;

/// Root-to-node bit sequence: 0 for a left child, 1 for a right child.
pub type HuffmanPath = BitBuffer;

/// Index of a node inside the tree that created it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One entry of the symbol table: a byte value and how often it occurs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub symbol: u8,
    pub frequency: u64,
}

impl Key {
    pub const fn new(symbol: u8, frequency: u64) -> Self {
        Self { symbol, frequency }
    }
}

/// Represents an error emitted while building or rewriting a code tree.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TreeError {
    /// [`DecodeTree::exception`](decode::DecodeTree::exception) was called on
    /// a node whose children were already swapped.
    #[error("exception already applied to node {0}")]
    ExceptionRepeat(NodeId),

    /// A leaf has no children to swap.
    #[error("node {0} is a leaf, exceptions only apply to internal nodes")]
    ExceptionOnLeaf(NodeId),

    #[error("exceptions were already applied to this tree")]
    ExceptionsAlreadyApplied,

    /// Rebuilding from an exception string would discard a swap made by hand.
    #[error("node {0} was swapped before the exception string was applied")]
    SwappedBeforeRebuild(NodeId),

    /// The id was not produced by this tree.
    #[error("node {0} does not belong to this tree")]
    UnknownNode(NodeId),

    /// The exception string held more bits than the rebuild could consume.
    #[error("{0} exception bit(s) left over after rebuilding the tree")]
    TrailingExceptionBits(usize),

    #[error("symbol {0:#04x} appears more than once in the symbol table")]
    DuplicateSymbol(u8),

    /// The frequencies sum past `u64::MAX`, so the root weight can't be stored.
    #[error("symbol frequencies overflow when merged")]
    FrequencyOverflow,
}

/// Read-only navigation over a built code tree.
///
/// A [`NodeId`] from another tree is treated as a detached node: it has no
/// parent, no children and no symbol.
pub trait Topology {
    fn root(&self) -> Option<NodeId>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// `(left, right)` for an internal node, `None` for a leaf.
    fn children(&self, node: NodeId) -> Option<(NodeId, NodeId)>;

    /// The byte a leaf stands for. `None` for internal nodes.
    fn symbol_of(&self, node: NodeId) -> Option<u8>;

    fn node_count(&self) -> usize;

    fn contains(&self, node: NodeId) -> bool {
        node.index() < self.node_count()
    }

    /// Whether `node` is a leaf of this tree.
    fn has_value(&self, node: NodeId) -> bool {
        self.contains(node) && self.children(node).is_none()
    }

    /// The child reached by following `bit` (0 = left, 1 = right).
    fn child(&self, node: NodeId, bit: bool) -> Option<NodeId> {
        self.children(node).map(|(left, right)| if bit { right } else { left })
    }

    /// Builds the root-to-node path. The root's path is empty, and so is the
    /// path of a node outside this tree.
    fn get_path(&self, node: NodeId) -> HuffmanPath {
        let Some(parent) = self.parent(node) else {
            return HuffmanPath::new();
        };

        let mut path = self.get_path(parent);
        let is_right = self.children(parent).is_some_and(|(_, right)| right == node);
        path.append(is_right);
        path
    }

    fn depth(&self, node: NodeId) -> usize {
        let mut depth = 0;
        let mut current = node;
        while let Some(parent) = self.parent(current) {
            depth += 1;
            current = parent;
        }
        depth
    }

    /// Every reachable leaf symbol with its path, in leaf order.
    fn codebook(&self) -> Vec<(u8, HuffmanPath)> {
        (0..self.node_count())
            .map(NodeId::new)
            .filter(|&node| self.root().is_some_and(|root| root == node || self.parent(node).is_some()))
            .filter_map(|node| self.symbol_of(node).map(|symbol| (symbol, self.get_path(node))))
            .collect()
    }
}

/// Maps every symbol to its leaf, rejecting repeated symbols.
pub(crate) fn index_symbols(symbols: impl IntoIterator<Item = u8>) -> Result<[Option<NodeId>; 256], TreeError> {
    let mut by_symbol = [None; 256];
    for (index, symbol) in symbols.into_iter().enumerate() {
        let slot = &mut by_symbol[symbol as usize];
        if slot.is_some() {
            return Err(TreeError::DuplicateSymbol(symbol));
        }
        *slot = Some(NodeId::new(index));
    }
    Ok(by_symbol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_symbols_maps_each_symbol_to_its_position() {
        let table = index_symbols(*b"zay").unwrap();
        assert_eq!(table[b'z' as usize], Some(NodeId::new(0)));
        assert_eq!(table[b'a' as usize], Some(NodeId::new(1)));
        assert_eq!(table[b'y' as usize], Some(NodeId::new(2)));
        assert_eq!(table[b'b' as usize], None);
    }

    #[test]
    fn index_symbols_rejects_duplicates() {
        assert_eq!(index_symbols(*b"abca"), Err(TreeError::DuplicateSymbol(b'a')));
    }

    #[test]
    fn key_serializes_as_a_plain_record() {
        let key = Key::new(b'a', 5);
        assert_eq!(serde_json::to_string(&key).unwrap(), r#"{"symbol":97,"frequency":5}"#);
        let table: Vec<Key> = serde_json::from_str(r#"[{"symbol":98,"frequency":2}]"#).unwrap();
        assert_eq!(table, vec![Key::new(b'b', 2)]);
    }
}
