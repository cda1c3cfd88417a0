//! Turning bytes into code words and back.
//!
//! [`encode`] and [`decode`] are the two primitive passes. [`compress`] and
//! [`decompress`] drive a whole session: they build both trees and carry the
//! three artifacts a decoder needs in an [`Encoded`] value.
use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::bit_buffer::{BitBuffer, BitBufferError};
use crate::tree::decode::DecodeTree;
use crate::tree::encode::EncodeTree;
use crate::tree::{HuffmanPath, Key, NodeId, Topology, TreeError};

if_tracing! {
    use tracing::{debug, info, warn};
}

/// Represents an error emitted by [`encode`] or [`decode`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The input buffer holds no bits.
    #[error("input is empty")]
    EmptyInput,

    /// The encode tree was built from an empty symbol table.
    #[error("symbol table is empty")]
    NoSymbols,

    /// A decode tree needs at least two symbols to have anything to descend.
    #[error("decode tree needs at least 2 symbols, got {0}")]
    TooFewSymbols(usize),

    #[error("encode tree was never built")]
    TreeNotBuilt,

    #[error("byte {0:#04x} is not in the symbol table")]
    UnknownSymbol(u8),

    /// The tree and its symbol table disagree about `node`.
    #[error("tree and symbol table disagree at node {0}")]
    TableMismatch(NodeId),

    /// Raw input must be whole bytes.
    #[error("input ends in a partial byte ({0} bits of padding)")]
    MisalignedInput(u8),

    /// The stream stopped partway down the tree.
    #[error("stream ends {0} bit(s) into a code word")]
    TruncatedSymbol(usize),

    #[error(transparent)]
    Buffer(#[from] BitBufferError),

    #[error(transparent)]
    Tree(#[from] TreeError),
}

/// Encodes `data` byte by byte with the paths of `tree`.
///
/// The output is the concatenation of every input byte's path, with nothing
/// in between and no length marker: the output's own bit count is the only
/// terminator. A table with a single symbol encodes to an empty buffer.
///
/// # Errors
///
/// - [`CodecError::EmptyInput`] if `data` holds no bits.
/// - [`CodecError::MisalignedInput`] if `data` ends in a partial byte.
/// - [`CodecError::NoSymbols`] / [`CodecError::TreeNotBuilt`] if `tree` has
///   nothing to encode with.
/// - [`CodecError::UnknownSymbol`] for a byte missing from the table.
pub fn encode(mut data: BitBuffer, tree: &EncodeTree) -> Result<BitBuffer, CodecError> {
    if_tracing! {
        debug!(target = "codec", input_bits = data.bit_count(), symbols = tree.keys().len(), "encode start");
    }
    if data.is_empty() {
        if_tracing! {
            warn!(target = "codec", "encode rejected: input empty");
        }
        return Err(CodecError::EmptyInput);
    }
    if data.padding() != 0 {
        return Err(CodecError::MisalignedInput(data.padding()));
    }
    if tree.keys().is_empty() {
        return Err(CodecError::NoSymbols);
    }
    if !tree.is_built() {
        return Err(CodecError::TreeNotBuilt);
    }

    // paths only depend on the tree, compute each once
    let mut paths: Vec<Option<HuffmanPath>> = vec![None; 256];
    let mut encoded = BitBuffer::new();

    data.reset_cursors();
    loop {
        let (byte, wrapped) = data.read_byte()?;
        let leaf = tree.leaf_for(byte).ok_or(CodecError::UnknownSymbol(byte))?;
        let path = paths[byte as usize].get_or_insert_with(|| tree.get_path(leaf));
        encoded.extend_from(path);

        if wrapped.is_some() {
            break;
        }
    }

    if_tracing! {
        info!(target = "codec", input_bytes = data.byte_len(), output_bits = encoded.bit_count(), "encode complete");
    }
    Ok(encoded)
}

/// Decodes `data` by walking `tree` one bit at a time.
///
/// Every time the walk reaches a leaf its byte is emitted and the walk
/// restarts at the root. The stream has to end exactly on such a restart.
///
/// # Errors
///
/// - [`CodecError::TooFewSymbols`] if `tree` has fewer than two symbols.
/// - [`CodecError::EmptyInput`] if `data` holds no bits.
/// - [`CodecError::TruncatedSymbol`] if the stream ends inside a code word.
/// - [`CodecError::TableMismatch`] if the walk hits a node without a symbol
///   where a leaf was expected.
pub fn decode(mut data: BitBuffer, tree: &DecodeTree) -> Result<BitBuffer, CodecError> {
    if_tracing! {
        debug!(target = "codec", input_bits = data.bit_count(), symbols = tree.symbols().len(), "decode start");
    }
    let symbol_count = tree.symbols().len();
    let root = match tree.root() {
        Some(root) if symbol_count >= 2 => root,
        _ => return Err(CodecError::TooFewSymbols(symbol_count)),
    };
    if data.is_empty() {
        if_tracing! {
            warn!(target = "codec", "decode rejected: input empty");
        }
        return Err(CodecError::EmptyInput);
    }

    let mut decoded = BitBuffer::new();
    let mut node = root;
    let mut depth = 0usize;

    data.reset_cursors();
    while data.has_remaining() {
        let bit = data.read_bit()?;
        node = tree.child(node, bit).ok_or(CodecError::TableMismatch(node))?;
        depth += 1;

        if tree.has_value(node) {
            let symbol = tree.symbol_of(node).ok_or(CodecError::TableMismatch(node))?;
            decoded.append_byte(symbol);
            node = root;
            depth = 0;
        }
    }

    if node != root {
        if_tracing! {
            warn!(target = "codec", depth, "decode rejected: stream ends inside a code word");
        }
        return Err(CodecError::TruncatedSymbol(depth));
    }

    if_tracing! {
        info!(target = "codec", input_bits = data.bit_count(), output_bytes = decoded.byte_len(), "decode complete");
    }
    Ok(decoded)
}

/// Everything a decoder needs to reproduce the encoded bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Encoded {
    /// The compressed bit stream.
    pub data: BitBuffer,
    /// Symbols in the order the decode tree creates its leaves.
    pub symbols: Vec<u8>,
    /// The encode tree's exception string.
    pub exceptions: BitBuffer,
}

/// Builds an [`EncodeTree`] from `table` and encodes `input` with it.
///
/// `table` must cover every distinct byte of `input`. Counting frequencies is
/// left to the caller.
pub fn compress(input: &[u8], table: Vec<Key>) -> anyhow::Result<Encoded> {
    let tree = EncodeTree::from_frequencies(table).context("building the encode tree")?;
    let data = BitBuffer::from_bytes(input, 0).context("wrapping the input")?;
    let encoded = encode(data, &tree).context("encoding the input")?;

    Ok(Encoded {
        data: encoded,
        symbols: tree.symbol_order().to_vec(),
        exceptions: tree.exceptions_to_bits(),
    })
}

/// Rebuilds the decode tree from `encoded` and decodes its bit stream.
pub fn decompress(encoded: &Encoded) -> anyhow::Result<Vec<u8>> {
    let tree = DecodeTree::with_exceptions(&encoded.symbols, &encoded.exceptions).context("rebuilding the decode tree")?;
    let decoded = decode(encoded.data.clone(), &tree).context("decoding the bit stream")?;

    let (bytes, _padding) = decoded.to_packed_bytes();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{corpus, frequency_table, rng_data, roundtrip_test, sample_table};

    fn encode_tree(table: Vec<Key>) -> EncodeTree {
        EncodeTree::from_frequencies(table).unwrap()
    }

    fn decode_tree_for(tree: &EncodeTree) -> DecodeTree {
        DecodeTree::with_exceptions(tree.symbol_order(), &tree.exceptions_to_bits()).unwrap()
    }

    fn raw(bytes: &[u8]) -> BitBuffer {
        BitBuffer::from_bytes(bytes, 0).unwrap()
    }

    #[test]
    fn sample_table_roundtrip() {
        let tree = encode_tree(sample_table());
        let encoded = encode(raw(b"aab"), &tree).unwrap();
        // a = 1, b = 00
        assert_eq!(encoded.to_string(), "1100");

        let decoded = decode(encoded, &decode_tree_for(&tree)).unwrap();
        assert_eq!(decoded, raw(b"aab"));
    }

    #[test]
    fn encode_of_empty_input_fails() {
        let tree = encode_tree(sample_table());
        assert_eq!(encode(BitBuffer::new(), &tree), Err(CodecError::EmptyInput));
        assert_eq!(encode(raw(&[]), &tree), Err(CodecError::EmptyInput));
    }

    #[test]
    fn encode_of_partial_byte_fails() {
        let tree = encode_tree(sample_table());
        let partial = BitBuffer::from_bytes(b"a", 3).unwrap();
        assert_eq!(encode(partial, &tree), Err(CodecError::MisalignedInput(3)));
    }

    #[test]
    fn encode_with_empty_or_unbuilt_tree_fails() {
        assert_eq!(encode(raw(b"a"), &encode_tree(Vec::new())), Err(CodecError::NoSymbols));

        let unbuilt = EncodeTree::new(sample_table()).unwrap();
        assert_eq!(encode(raw(b"a"), &unbuilt), Err(CodecError::TreeNotBuilt));
    }

    #[test]
    fn encode_of_unknown_byte_fails() {
        let tree = encode_tree(sample_table());
        assert_eq!(encode(raw(b"abz"), &tree), Err(CodecError::UnknownSymbol(b'z')));
    }

    #[test]
    fn encode_ignores_the_incoming_byte_cursor() {
        let tree = encode_tree(sample_table());
        let mut data = raw(b"ab");
        data.read_byte().unwrap();
        assert_eq!(encode(data, &tree).unwrap().to_string(), "100");
    }

    #[test]
    fn single_symbol_encodes_to_nothing_and_cannot_decode() {
        let tree = encode_tree(vec![Key::new(b'x', 3)]);
        let encoded = encode(raw(b"xxx"), &tree).unwrap();
        assert!(encoded.is_empty());

        let decoder = decode_tree_for(&tree);
        assert_eq!(decode(encoded, &decoder), Err(CodecError::TooFewSymbols(1)));
        assert_eq!(decode(raw(b"x"), &decoder), Err(CodecError::TooFewSymbols(1)));
    }

    #[test]
    fn decode_of_empty_input_fails() {
        let tree = encode_tree(sample_table());
        assert_eq!(decode(BitBuffer::new(), &decode_tree_for(&tree)), Err(CodecError::EmptyInput));
    }

    #[test]
    fn decode_must_end_on_a_symbol_boundary() {
        let tree = encode_tree(sample_table());
        let decoder = decode_tree_for(&tree);
        // "1" is `a`, then "01" stops inside c/d
        let truncated: BitBuffer = [true, false, true].into_iter().collect();
        assert_eq!(decode(truncated, &decoder), Err(CodecError::TruncatedSymbol(2)));
    }

    #[test]
    fn decode_restarts_its_cursor() {
        let tree = encode_tree(sample_table());
        let mut encoded = encode(raw(b"dab"), &tree).unwrap();
        encoded.read_bit().unwrap();
        assert_eq!(decode(encoded, &decode_tree_for(&tree)).unwrap(), raw(b"dab"));
    }

    #[test]
    fn corpus_tables_cover_their_data() {
        for (data, name) in corpus() {
            let table = frequency_table(&data);
            let total: u64 = table.iter().map(|key| key.frequency).sum();
            assert_eq!(total, data.len() as u64, "{name}");
            assert!(table.len() >= 2, "{name} needs two distinct bytes to decode");
        }

        let table = frequency_table(&rng_data());
        assert!(table.len() > 2);
        assert!(table.iter().all(|key| key.symbol < 23));
    }

    #[test]
    fn roundtrip_corpus() {
        for (data, name) in corpus() {
            roundtrip_test(&data, frequency_table(&data), name);
        }
    }

    #[test]
    fn roundtrip_with_unused_symbols_in_the_table() {
        let mut table = frequency_table(b"mississippi");
        table.extend([Key::new(b'q', 0), Key::new(b'z', 40), Key::new(0, 1)]);
        roundtrip_test(b"mississippi", table, "mississippi with extra symbols");
    }

    #[test]
    fn roundtrip_every_byte_value() {
        let data: Vec<u8> = (0..=255u8).chain((0..=255u8).step_by(3)).collect();
        roundtrip_test(&data, frequency_table(&data), "all byte values");
    }

    #[test]
    fn compress_and_decompress_a_session() {
        let input = crate::tests::REPEATING_DATA;
        let encoded = compress(input, frequency_table(input)).unwrap();
        assert!(encoded.data.bit_count() < input.len() * 8);
        assert_eq!(decompress(&encoded).unwrap(), input);
    }

    #[test]
    fn encoded_survives_serde() {
        let input = b"abracadabra";
        let encoded = compress(input, frequency_table(input)).unwrap();
        let json = serde_json::to_string(&encoded).unwrap();
        let back: Encoded = serde_json::from_str(&json).unwrap();
        assert_eq!(back, encoded);
        assert_eq!(decompress(&back).unwrap(), input);
    }

    #[test]
    fn compress_reports_the_failing_stage() {
        let error = compress(b"abc", frequency_table(b"ab")).unwrap_err();
        assert_eq!(error.to_string(), "encoding the input");
        assert_eq!(error.downcast_ref::<CodecError>(), Some(&CodecError::UnknownSymbol(b'c')));

        let error = compress(b"", frequency_table(b"ab")).unwrap_err();
        assert_eq!(error.downcast_ref::<CodecError>(), Some(&CodecError::EmptyInput));
    }

    #[test]
    fn decompress_rejects_tampered_exceptions() {
        let input = b"abracadabra";
        let mut encoded = compress(input, frequency_table(input)).unwrap();
        encoded.exceptions.extend([true; 64]);
        let error = decompress(&encoded).unwrap_err();
        assert!(matches!(error.downcast_ref::<TreeError>(), Some(TreeError::TrailingExceptionBits(_))));
    }
}
