//! Huffman coding over a byte alphabet, without shipping the code tree.
//!
//! The encoder builds a frequency-optimal tree and publishes two small
//! artifacts next to the compressed bits: the order in which the symbols enter
//! the tree, and a short exception bit string. From those alone the decoder
//! rebuilds a tree with exactly the same paths, never seeing a frequency.
//!
//! ```text
//! frequency table -> EncodeTree -> paths -> encode -> compressed bits
//!                        |
//!                        +-> symbol_order + exceptions_to_bits
//!                                   |
//!                                   v
//!                               DecodeTree -> decode -> original bytes
//! ```
//!
//! [`compress`] and [`decompress`] run a whole session; the pieces are public
//! for callers that package the artifacts themselves.
extern crate anyhow;
extern crate serde;
extern crate thiserror;

#[macro_export]
macro_rules! if_tracing {
    {$($body:tt)*} => {
        ::cfg_if::cfg_if! {
            if #[cfg(feature = "tracing")] {
                $($body)*
            }
        }
    };
}

pub mod bit_buffer;
pub mod codec;
pub mod tree;


pub use crate::bit_buffer::{BitBuffer, BitBufferError, Bits};
pub use crate::codec::{CodecError, Encoded, compress, decode, decompress, encode};
pub use crate::tree::decode::DecodeTree;
pub use crate::tree::encode::EncodeTree;
pub use crate::tree::{HuffmanPath, Key, NodeId, Topology, TreeError};
