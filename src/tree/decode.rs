use core::mem;
use std::collections::VecDeque;

use crate::bit_buffer::BitBuffer;
use crate::tree::{NodeId, Topology, TreeError, index_symbols};

if_tracing! {
    use tracing::{debug, info, warn};
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Leaf,
    Internal {
        left: NodeId,
        right: NodeId,
        exception_applied: bool,
    },
}

#[derive(Clone, Debug)]
struct DecodeNode {
    kind: NodeKind,
    parent: Option<NodeId>,
}

impl DecodeNode {
    const LEAF: Self = Self {
        kind: NodeKind::Leaf,
        parent: None,
    };

    fn exception(&mut self, id: NodeId) -> Result<(), TreeError> {
        match &mut self.kind {
            NodeKind::Leaf => Err(TreeError::ExceptionOnLeaf(id)),
            NodeKind::Internal {
                exception_applied: true, ..
            } => Err(TreeError::ExceptionRepeat(id)),
            NodeKind::Internal {
                left,
                right,
                exception_applied,
            } => {
                mem::swap(left, right);
                *exception_applied = true;
                Ok(())
            }
        }
    }
}

#[derive(Clone, Copy)]
enum Operand {
    Leaf(NodeId),
    Merged(NodeId),
}

impl Operand {
    const fn id(self) -> NodeId {
        match self {
            Self::Leaf(id) | Self::Merged(id) => id,
        }
    }
}

/// The decoder's tree, grown from symbol order alone.
///
/// [`new`](Self::new) pairs the symbols strictly left to right: the first two
/// queued nodes are merged and the result joins the back of the queue. That
/// default shape is corrected into the encoder's tree by
/// [`apply_exceptions`](Self::apply_exceptions).
#[derive(Clone, Debug)]
pub struct DecodeTree {
    symbols: Vec<u8>,
    nodes: Vec<DecodeNode>,
    root: Option<NodeId>,
    exceptions_applied: bool,
}

impl DecodeTree {
    /// Creates one leaf per symbol, in order, and builds the default shape.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateSymbol`] if a symbol appears twice.
    pub fn new(symbols: &[u8]) -> Result<Self, TreeError> {
        index_symbols(symbols.iter().copied())?;
        let (nodes, root) = assemble(symbols.len(), &mut core::iter::empty())?;

        Ok(Self {
            symbols: symbols.to_vec(),
            nodes,
            root,
            exceptions_applied: false,
        })
    }

    /// [`new`](Self::new) followed by [`apply_exceptions`](Self::apply_exceptions).
    pub fn with_exceptions(symbols: &[u8], exceptions: &BitBuffer) -> Result<Self, TreeError> {
        let mut tree = Self::new(symbols)?;
        tree.apply_exceptions(exceptions)?;
        Ok(tree)
    }

    /// Rebuilds the tree following the encoder's exception decisions.
    ///
    /// The pairwise reduction is replayed with two queues, pending leaves and
    /// merged nodes. Whenever both are non-empty one exception bit is read: 0
    /// takes the next leaf, 1 the oldest merged node. Bits past the end of
    /// `exceptions` read as 0. Operands are attached in queue order, and when
    /// the merged operand was taken before a leaf the new node gets an
    /// [`exception`](Self::exception) so the merged operand ends up left.
    ///
    /// # Errors
    ///
    /// - [`TreeError::ExceptionsAlreadyApplied`] on a second call.
    /// - [`TreeError::SwappedBeforeRebuild`] if a node was already swapped
    ///   through [`exception`](Self::exception).
    /// - [`TreeError::TrailingExceptionBits`] if `exceptions` holds more bits
    ///   than the rebuild consumed.
    ///
    /// On error the tree keeps its previous shape.
    pub fn apply_exceptions(&mut self, exceptions: &BitBuffer) -> Result<(), TreeError> {
        if self.exceptions_applied {
            return Err(TreeError::ExceptionsAlreadyApplied);
        }
        if let Some(swapped) = (0..self.nodes.len()).map(NodeId::new).find(|&node| self.has_exception(node)) {
            return Err(TreeError::SwappedBeforeRebuild(swapped));
        }
        if_tracing! {
            debug!(target = "decode_tree", symbols = self.symbols.len(), exception_bits = exceptions.bit_count(), "applying exceptions");
        }

        let mut stream = exceptions.bits();
        let (nodes, root) = assemble(self.symbols.len(), &mut stream)?;
        let trailing = stream.len();
        if trailing > 0 {
            if_tracing! {
                warn!(target = "decode_tree", trailing, "exception string longer than the tree needs");
            }
            return Err(TreeError::TrailingExceptionBits(trailing));
        }

        self.nodes = nodes;
        self.root = root;
        self.exceptions_applied = true;

        if_tracing! {
            info!(
                target = "decode_tree",
                symbols = self.symbols.len(),
                swapped = self.nodes.iter().filter(|node| matches!(node.kind, NodeKind::Internal { exception_applied: true, .. })).count(),
                "exceptions applied"
            );
        }
        Ok(())
    }

    /// Swaps the children of an internal node. Each node can be swapped once.
    ///
    /// # Errors
    ///
    /// [`TreeError::ExceptionOnLeaf`] for a leaf, [`TreeError::ExceptionRepeat`]
    /// if `node` was already swapped, [`TreeError::UnknownNode`] if it is not
    /// part of this tree.
    pub fn exception(&mut self, node: NodeId) -> Result<(), TreeError> {
        self.nodes
            .get_mut(node.index())
            .ok_or(TreeError::UnknownNode(node))?
            .exception(node)
    }

    /// Whether `node`'s children were swapped by [`exception`](Self::exception).
    pub fn has_exception(&self, node: NodeId) -> bool {
        matches!(
            self.nodes.get(node.index()).map(|node| node.kind),
            Some(NodeKind::Internal {
                exception_applied: true,
                ..
            })
        )
    }

    pub const fn exceptions_applied(&self) -> bool {
        self.exceptions_applied
    }

    /// The symbols, in leaf order.
    pub fn symbols(&self) -> &[u8] {
        &self.symbols
    }
}

impl Topology for DecodeTree {
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.index())?.parent
    }

    fn children(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        match self.nodes.get(node.index())?.kind {
            NodeKind::Leaf => None,
            NodeKind::Internal { left, right, .. } => Some((left, right)),
        }
    }

    fn symbol_of(&self, node: NodeId) -> Option<u8> {
        self.symbols.get(node.index()).copied()
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

/// Pairwise reduction of `leaf_count` leaves, steered by `exceptions`.
fn assemble(leaf_count: usize, exceptions: &mut impl Iterator<Item = bool>) -> Result<(Vec<DecodeNode>, Option<NodeId>), TreeError> {
    let mut nodes = vec![DecodeNode::LEAF; leaf_count];
    let mut leaves: VecDeque<NodeId> = (0..leaf_count).map(NodeId::new).collect();
    let mut merged: VecDeque<NodeId> = VecDeque::with_capacity(leaf_count);

    while let Some(first) = take_next(&mut leaves, &mut merged, exceptions) {
        let Some(second) = take_next(&mut leaves, &mut merged, exceptions) else {
            return Ok((nodes, Some(first.id())));
        };

        let swapped = matches!((first, second), (Operand::Merged(_), Operand::Leaf(_)));
        let (left, right) = if swapped {
            (second.id(), first.id())
        } else {
            (first.id(), second.id())
        };

        let id = NodeId::new(nodes.len());
        nodes.push(DecodeNode {
            kind: NodeKind::Internal {
                left,
                right,
                exception_applied: false,
            },
            parent: None,
        });
        nodes[left.index()].parent = Some(id);
        nodes[right.index()].parent = Some(id);
        if swapped {
            nodes[id.index()].exception(id)?;
        }
        merged.push_back(id);
    }

    Ok((nodes, None))
}

fn take_next(leaves: &mut VecDeque<NodeId>, merged: &mut VecDeque<NodeId>, exceptions: &mut impl Iterator<Item = bool>) -> Option<Operand> {
    let contested = !leaves.is_empty() && !merged.is_empty();
    if contested && exceptions.next().unwrap_or(false) {
        return merged.pop_front().map(Operand::Merged);
    }
    leaves
        .pop_front()
        .map(Operand::Leaf)
        .or_else(|| merged.pop_front().map(Operand::Merged))
}
