use crate::bit_buffer::BitBuffer;
use crate::tree::{Key, NodeId, Topology, TreeError, index_symbols};

if_tracing! {
    use tracing::{debug, info};
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NodeKind {
    Leaf { frequency: u64 },
    Internal { left: NodeId, right: NodeId, frequency: u64 },
}

#[derive(Clone, Debug)]
struct EncodeNode {
    kind: NodeKind,
    parent: Option<NodeId>,
}

impl EncodeNode {
    const fn frequency(&self) -> u64 {
        match self.kind {
            NodeKind::Leaf { frequency } | NodeKind::Internal { frequency, .. } => frequency,
        }
    }
}

/// The frequency-optimal code tree, built on the encoding side.
///
/// Besides the tree itself, building records what a decoder needs to grow
/// the same tree without frequencies: the order in which leaves enter the
/// merge queue ([`symbol_order`](Self::symbol_order)) and the exception
/// decisions ([`exceptions_to_bits`](Self::exceptions_to_bits)).
///
/// # Exceptions
///
/// After the initial stable sort the merge queue is always an interleaving
/// of two sequences: the leaves not merged yet, in symbol order, and the
/// internal nodes, in creation order. A decoder that knows the symbol order
/// only has to learn, whenever both sequences are non-empty, which one a merge
/// operand was taken from. Taking the next leaf is the default pairing;
/// taking an internal node while a leaf was still available is an
/// *exception*, and the node that merge produces is an exception node.
#[derive(Clone, Debug)]
pub struct EncodeTree {
    keys: Vec<Key>,
    by_symbol: [Option<NodeId>; 256],
    nodes: Vec<EncodeNode>,
    queue: Vec<NodeId>,
    symbol_order: Vec<u8>,
    decisions: Vec<bool>,
    exception_nodes: Vec<NodeId>,
    root: Option<NodeId>,
    built: bool,
}

impl EncodeTree {
    /// Creates one leaf per key, keeping the table order, and queues them for
    /// [`build`](Self::build).
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateSymbol`] if a symbol appears twice.
    pub fn new(keys: Vec<Key>) -> Result<Self, TreeError> {
        let by_symbol = index_symbols(keys.iter().map(|key| key.symbol))?;
        let nodes = keys
            .iter()
            .map(|key| EncodeNode {
                kind: NodeKind::Leaf { frequency: key.frequency },
                parent: None,
            })
            .collect::<Vec<_>>();
        let queue = (0..keys.len()).map(NodeId::new).collect();

        Ok(Self {
            keys,
            by_symbol,
            nodes,
            queue,
            symbol_order: Vec::new(),
            decisions: Vec::new(),
            exception_nodes: Vec::new(),
            root: None,
            built: false,
        })
    }

    /// [`new`](Self::new) followed by [`build`](Self::build).
    pub fn from_frequencies(keys: Vec<Key>) -> Result<Self, TreeError> {
        let mut tree = Self::new(keys)?;
        tree.build()?;
        Ok(tree)
    }

    /// Merges the two lightest queued nodes until one is left.
    ///
    /// The queue is kept sorted by frequency with a stable sort, and a new
    /// node joins at the back before re-sorting, so ties always resolve the
    /// same way. The first queued node becomes the left child, the second one
    /// the right child. Building an already built tree does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::FrequencyOverflow`] if the frequencies sum past
    /// `u64::MAX`. The tree is untouched in that case.
    pub fn build(&mut self) -> Result<(), TreeError> {
        if self.built {
            return Ok(());
        }
        // every merged weight is bounded by the total
        self.keys
            .iter()
            .try_fold(0u64, |total, key| total.checked_add(key.frequency))
            .ok_or(TreeError::FrequencyOverflow)?;

        if_tracing! {
            debug!(target = "encode_tree", symbols = self.keys.len(), "encode tree build start");
        }

        self.sort_queue();
        self.symbol_order = self.queue.iter().map(|leaf| self.keys[leaf.index()].symbol).collect();

        let mut pending_leaves = self.queue.len();
        let mut pending_internal = 0usize;

        while self.queue.len() > 1 {
            let (first, second) = (self.queue[0], self.queue[1]);

            let mut is_exception = false;
            for operand in [first, second] {
                let is_leaf = self.has_value(operand);
                if pending_leaves > 0 && pending_internal > 0 {
                    self.decisions.push(!is_leaf);
                    is_exception |= !is_leaf;
                }
                if is_leaf {
                    pending_leaves -= 1;
                } else {
                    pending_internal -= 1;
                }
            }

            let merged = self.merge(first, second);
            if is_exception {
                self.exception_nodes.push(merged);
            }

            self.queue.drain(..2);
            self.queue.push(merged);
            pending_internal += 1;
            self.sort_queue();
        }

        self.root = self.queue.first().copied();
        self.built = true;

        if_tracing! {
            info!(
                target = "encode_tree",
                symbols = self.keys.len(),
                nodes = self.nodes.len(),
                exceptions = self.exception_nodes.len(),
                "encode tree build complete"
            );
        }
        Ok(())
    }

    /// The exception decisions in merge order, cut after the last exception.
    ///
    /// Together with [`symbol_order`](Self::symbol_order) this is everything
    /// [`DecodeTree::apply_exceptions`](crate::DecodeTree::apply_exceptions)
    /// needs. It is empty when the tree matches the default pairing.
    pub fn exceptions_to_bits(&self) -> BitBuffer {
        let used = self.decisions.iter().rposition(|&taken| taken).map_or(0, |last| last + 1);
        self.decisions[..used].iter().copied().collect()
    }

    /// The symbol table, in the order it was given.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Symbols in the order their leaves entered the merge queue, which is
    /// the order a decoder must create its leaves in. Empty until built.
    pub fn symbol_order(&self) -> &[u8] {
        &self.symbol_order
    }

    /// Nodes produced by an exception merge, in creation order.
    ///
    /// A merge counts as an exception whenever either of its operands was an
    /// internal node taken while a leaf was still queued. The decoder only
    /// swaps the children of those where the internal operand came first, so
    /// [`DecodeTree::has_exception`](crate::DecodeTree::has_exception) holds
    /// for a subset of these ids.
    pub fn exception_nodes(&self) -> &[NodeId] {
        &self.exception_nodes
    }

    pub const fn is_built(&self) -> bool {
        self.built
    }

    /// The leaf standing for `symbol`, if the table has one.
    pub fn leaf_for(&self, symbol: u8) -> Option<NodeId> {
        self.by_symbol[symbol as usize]
    }

    /// The weight of `node`, `None` if it does not belong to this tree.
    pub fn frequency(&self, node: NodeId) -> Option<u64> {
        self.nodes.get(node.index()).map(EncodeNode::frequency)
    }

    fn merge(&mut self, left: NodeId, right: NodeId) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        // cannot overflow, `build` checked the total up front
        let frequency = self.nodes[left.index()].frequency() + self.nodes[right.index()].frequency();
        self.nodes.push(EncodeNode {
            kind: NodeKind::Internal { left, right, frequency },
            parent: None,
        });
        self.nodes[left.index()].parent = Some(id);
        self.nodes[right.index()].parent = Some(id);
        id
    }

    fn sort_queue(&mut self) {
        let nodes = &self.nodes;
        // `sort_by_key` is stable, ties keep their queue order
        self.queue.sort_by_key(|node| nodes[node.index()].frequency());
    }
}

impl Topology for EncodeTree {
    fn root(&self) -> Option<NodeId> {
        self.root
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.index())?.parent
    }

    fn children(&self, node: NodeId) -> Option<(NodeId, NodeId)> {
        match self.nodes.get(node.index())?.kind {
            NodeKind::Leaf { .. } => None,
            NodeKind::Internal { left, right, .. } => Some((left, right)),
        }
    }

    fn symbol_of(&self, node: NodeId) -> Option<u8> {
        self.keys.get(node.index()).map(|key| key.symbol)
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{corpus, frequency_table, paths_by_symbol, sample_table};

    #[test]
    fn lightest_symbols_merge_first() {
        let tree = EncodeTree::from_frequencies(sample_table()).unwrap();
        let c = tree.leaf_for(b'c').unwrap();
        let d = tree.leaf_for(b'd').unwrap();

        let first_merge = NodeId::new(tree.keys().len());
        assert_eq!(tree.children(first_merge), Some((c, d)));
        assert_eq!(tree.frequency(first_merge), Some(2));
        assert_eq!(tree.parent(c), Some(first_merge));
        assert_eq!(tree.frequency(tree.root().unwrap()), Some(9));
    }

    #[test]
    fn sample_table_paths() {
        let tree = EncodeTree::from_frequencies(sample_table()).unwrap();
        let paths = paths_by_symbol(&tree);
        assert_eq!(paths[&b'a'].to_string(), "1");
        assert_eq!(paths[&b'b'].to_string(), "00");
        assert_eq!(paths[&b'c'].to_string(), "010");
        assert_eq!(paths[&b'd'].to_string(), "011");
    }

    #[test]
    fn sample_table_exceptions() {
        let tree = EncodeTree::from_frequencies(sample_table()).unwrap();
        assert_eq!(tree.symbol_order(), b"cdba");
        assert_eq!(tree.exceptions_to_bits().to_string(), "011");
        assert_eq!(tree.exception_nodes(), &[NodeId::new(5), NodeId::new(6)]);
    }

    #[test]
    fn keys_keep_their_table_order() {
        let tree = EncodeTree::from_frequencies(sample_table()).unwrap();
        let symbols: Vec<u8> = tree.keys().iter().map(|key| key.symbol).collect();
        assert_eq!(symbols, b"abcd");
        assert_eq!(tree.symbol_of(NodeId::new(0)), Some(b'a'));
        assert_eq!(tree.symbol_of(tree.root().unwrap()), None);
    }

    #[test]
    fn equal_frequencies_build_a_balanced_tree() {
        let table = b"wxyz".iter().map(|&symbol| Key::new(symbol, 7)).collect();
        let tree = EncodeTree::from_frequencies(table).unwrap();
        for (_, path) in tree.codebook() {
            assert_eq!(path.bit_count(), 2);
        }
        assert!(tree.exceptions_to_bits().is_empty());
        assert!(tree.exception_nodes().is_empty());
    }

    #[test]
    fn building_twice_assigns_the_same_paths() {
        let table = frequency_table(crate::tests::LONG_DATA);
        let first = EncodeTree::from_frequencies(table.clone()).unwrap();
        let second = EncodeTree::from_frequencies(table).unwrap();
        assert_eq!(first.codebook(), second.codebook());
        assert_eq!(first.exceptions_to_bits(), second.exceptions_to_bits());
    }

    #[test]
    fn paths_are_prefix_free() {
        for (data, name) in corpus() {
            let tree = EncodeTree::from_frequencies(frequency_table(&data)).unwrap();
            let codebook = tree.codebook();
            for (a, path_a) in &codebook {
                for (b, path_b) in &codebook {
                    if a == b {
                        continue;
                    }
                    let is_prefix = path_a.bit_count() <= path_b.bit_count() && path_a.bits().zip(path_b.bits()).all(|(x, y)| x == y);
                    assert!(!is_prefix, "{name}: path of {a:#04x} ({path_a}) prefixes {b:#04x} ({path_b})");
                }
            }
        }
    }

    #[test]
    fn exception_nodes_are_ordered_and_merge_an_internal_node() {
        for (data, name) in corpus() {
            let tree = EncodeTree::from_frequencies(frequency_table(&data)).unwrap();
            let exceptions = tree.exception_nodes();

            assert!(exceptions.windows(2).all(|pair| pair[0] < pair[1]), "{name}: out of order");
            for &node in exceptions {
                let (left, right) = tree.children(node).expect("exception nodes are internal");
                assert!(!tree.has_value(left) || !tree.has_value(right), "{name}: {node} merges two leaves");
            }
            assert_eq!(exceptions.is_empty(), tree.exceptions_to_bits().is_empty(), "{name}");
            let ones = tree.exceptions_to_bits().bits().filter(|&bit| bit).count();
            assert!(ones >= exceptions.len(), "{name}");
        }
    }

    #[test]
    fn foreign_node_ids_are_detached() {
        let tree = EncodeTree::from_frequencies(sample_table()).unwrap();
        let foreign = NodeId::new(tree.node_count() + 3);
        assert_eq!(tree.frequency(foreign), None);
        assert_eq!(tree.parent(foreign), None);
        assert_eq!(tree.children(foreign), None);
        assert_eq!(tree.symbol_of(foreign), None);
        assert!(!tree.has_value(foreign));
        assert!(tree.get_path(foreign).is_empty());
        assert_eq!(tree.depth(foreign), 0);
    }

    #[test]
    fn single_symbol_tree_is_its_own_root() {
        let tree = EncodeTree::from_frequencies(vec![Key::new(b'x', 3)]).unwrap();
        let leaf = tree.leaf_for(b'x').unwrap();
        assert_eq!(tree.root(), Some(leaf));
        assert!(tree.get_path(leaf).is_empty());
        assert_eq!(tree.depth(leaf), 0);
    }

    #[test]
    fn empty_table_has_no_root() {
        let tree = EncodeTree::from_frequencies(Vec::new()).unwrap();
        assert!(tree.is_built());
        assert_eq!(tree.root(), None);
        assert!(tree.codebook().is_empty());
    }

    #[test]
    fn unbuilt_tree_has_no_root() {
        let tree = EncodeTree::new(sample_table()).unwrap();
        assert!(!tree.is_built());
        assert_eq!(tree.root(), None);
        assert!(tree.symbol_order().is_empty());
    }

    #[test]
    fn build_is_idempotent() {
        let mut tree = EncodeTree::from_frequencies(sample_table()).unwrap();
        let nodes = tree.node_count();
        tree.build().unwrap();
        assert_eq!(tree.node_count(), nodes);
        assert_eq!(tree.exceptions_to_bits().to_string(), "011");
    }

    #[test]
    fn duplicate_symbols_are_rejected() {
        let table = vec![Key::new(b'a', 1), Key::new(b'b', 1), Key::new(b'a', 2)];
        assert_eq!(EncodeTree::new(table).unwrap_err(), TreeError::DuplicateSymbol(b'a'));
    }

    #[test]
    fn overflowing_frequencies_are_rejected() {
        let table = vec![Key::new(b'a', u64::MAX), Key::new(b'b', 1)];
        let mut tree = EncodeTree::new(table).unwrap();
        assert_eq!(tree.build(), Err(TreeError::FrequencyOverflow));
        assert!(!tree.is_built());
    }
}
