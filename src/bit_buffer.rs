//! A growable, bit-addressable buffer.
//!
//! Bits are appended into the low end of the last byte, shifting whatever is
//! already there to the left, so the first bit written into a byte is the
//! first one read back. The number of still-unwritten low bits of the last
//! byte is the buffer's *padding*; a fresh buffer is one empty byte with a
//! padding of 8.
//!
//! Two cursors read the buffer independently:
//! - the bit cursor ([`read_bit`](BitBuffer::read_bit)) walks single bits and
//!   is what the decoder consumes,
//! - the byte cursor ([`read_byte`](BitBuffer::read_byte)) walks whole stored
//!   bytes and is what the encoder uses to scan raw input.
use core::fmt;
use core::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors emitted while constructing or reading a [`BitBuffer`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum BitBufferError {
    /// A read was attempted with no bits left under the cursor.
    #[error("read past the end of the bit buffer")]
    EndOfBuffer,

    /// The padding of the final byte must leave at least one bit in it.
    #[error("padding must be in 0..=7, got {0}")]
    InvalidPadding(u8),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(into = "PackedBits", try_from = "PackedBits")]
pub struct BitBuffer {
    /// Never empty. Every byte but the last is full.
    bytes: Vec<u8>,
    padding: u8,
    byte_pos: usize,
    bit_pos: u8,
    byte_cursor: usize,
}

impl BitBuffer {
    /// Creates an empty buffer: a single byte with all 8 bits unwritten.
    pub fn new() -> Self {
        Self {
            bytes: vec![0],
            padding: 8,
            byte_pos: 0,
            bit_pos: 0,
            byte_cursor: 0,
        }
    }

    /// Wraps a single byte. `padding` low bits of `value` are dropped, so
    /// `from_byte(0b1010_0000, 5)` holds the three bits `101`.
    ///
    /// # Errors
    ///
    /// Returns [`BitBufferError::InvalidPadding`] if `padding > 7`.
    pub fn from_byte(value: u8, padding: u8) -> Result<Self, BitBufferError> {
        Self::from_bytes(&[value], padding)
    }

    /// Wraps a byte slice, applying `padding` to its final byte only.
    ///
    /// An empty slice yields an empty buffer.
    ///
    /// # Errors
    ///
    /// Returns [`BitBufferError::InvalidPadding`] if `padding > 7`.
    pub fn from_bytes(bytes: &[u8], padding: u8) -> Result<Self, BitBufferError> {
        if padding > 7 {
            return Err(BitBufferError::InvalidPadding(padding));
        }
        let Some((&last, rest)) = bytes.split_last() else {
            return Ok(Self::new());
        };

        let mut owned = Vec::with_capacity(bytes.len());
        owned.extend_from_slice(rest);
        owned.push(last >> padding);

        Ok(Self {
            bytes: owned,
            padding,
            byte_pos: 0,
            bit_pos: 0,
            byte_cursor: 0,
        })
    }

    /// Number of valid bits: `8 * byte_len - padding`.
    pub fn bit_count(&self) -> usize {
        self.bytes.len() * 8 - self.padding as usize
    }

    pub fn is_empty(&self) -> bool {
        self.bit_count() == 0
    }

    /// Number of stored bytes, including a partially written last byte.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Unwritten low bits of the last byte.
    pub const fn padding(&self) -> u8 {
        self.padding
    }

    /// The stored bytes as-is: the last byte keeps its bits in the low end.
    pub fn as_raw_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Appends one bit.
    ///
    /// Returns `true` if the last byte was full and a new byte had to be
    /// allocated for this bit.
    pub fn append(&mut self, bit: bool) -> bool {
        let allocated = self.padding == 0;
        if allocated {
            self.bytes.push(0);
            self.padding = 8;
        }
        self.padding -= 1;

        let last = self.bytes.len() - 1;
        self.bytes[last] = (self.bytes[last] << 1) | u8::from(bit);
        allocated
    }

    /// Appends the 8 bits of `value`, most significant first.
    pub fn append_byte(&mut self, value: u8) {
        for shift in (0..8).rev() {
            self.append((value >> shift) & 1 == 1);
        }
    }

    /// Appends every bit of `other`, read from its start. `other`'s cursors
    /// are not touched.
    pub fn extend_from(&mut self, other: &BitBuffer) {
        self.extend(other.bits());
    }

    /// Returns a new buffer holding `self` followed by all bits of `other`.
    pub fn concat(&self, other: &BitBuffer) -> BitBuffer {
        let mut joined = BitBuffer {
            bytes: self.bytes.clone(),
            padding: self.padding,
            byte_pos: 0,
            bit_pos: 0,
            byte_cursor: 0,
        };
        joined.extend_from(other);
        joined
    }

    /// The bit at `index`, counted from the first appended bit.
    pub fn bit(&self, index: usize) -> Option<bool> {
        if index >= self.bit_count() {
            return None;
        }

        let byte_index = index / 8;
        let offset = index % 8;
        let mut byte = self.bytes[byte_index];
        // the valid bits of the last byte sit in its low end
        if byte_index == self.bytes.len() - 1 {
            byte <<= self.padding;
        }
        Some((byte >> (7 - offset)) & 1 == 1)
    }

    /// Iterates over all bits from the start, independent of both cursors.
    pub fn bits(&self) -> Bits<'_> {
        Bits {
            buffer: self,
            front: 0,
            back: self.bit_count(),
        }
    }

    /// Reads the bit under the bit cursor and advances it.
    ///
    /// # Errors
    ///
    /// Returns [`BitBufferError::EndOfBuffer`] once every bit has been read.
    /// Check [`has_remaining`](Self::has_remaining) to stop before that.
    pub fn read_bit(&mut self) -> Result<bool, BitBufferError> {
        let bit = self.bit(self.bit_cursor()).ok_or(BitBufferError::EndOfBuffer)?;

        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }
        Ok(bit)
    }

    /// Bits left under the bit cursor.
    pub fn remaining_bits(&self) -> usize {
        self.bit_count().saturating_sub(self.bit_cursor())
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining_bits() > 0
    }

    /// Reads the stored byte under the byte cursor and advances it.
    ///
    /// When the cursor moves past the last byte it wraps back to 0 and the
    /// buffer's padding is returned alongside the byte, which tells the caller
    /// this was the final (possibly partial) byte.
    ///
    /// # Errors
    ///
    /// Returns [`BitBufferError::EndOfBuffer`] if the buffer holds no bits.
    pub fn read_byte(&mut self) -> Result<(u8, Option<u8>), BitBufferError> {
        if self.is_empty() {
            return Err(BitBufferError::EndOfBuffer);
        }

        let value = self.bytes[self.byte_cursor];
        self.byte_cursor += 1;
        if self.byte_cursor == self.bytes.len() {
            self.byte_cursor = 0;
            return Ok((value, Some(self.padding)));
        }
        Ok((value, None))
    }

    /// Moves both cursors back to the start. The content is left alone.
    pub fn reset_cursors(&mut self) {
        self.byte_pos = 0;
        self.bit_pos = 0;
        self.byte_cursor = 0;
    }

    /// Packs the content into ordinary MSB-first bytes plus the padding of
    /// the last one. This is the inverse of [`from_bytes`](Self::from_bytes).
    pub fn to_packed_bytes(&self) -> (Vec<u8>, u8) {
        if self.is_empty() {
            return (Vec::new(), 0);
        }

        let mut bytes = self.bytes.clone();
        let last = bytes.len() - 1;
        bytes[last] <<= self.padding;
        (bytes, self.padding)
    }

    fn bit_cursor(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }
}

impl Default for BitBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for BitBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.padding == other.padding && self.as_raw_bytes() == other.as_raw_bytes()
    }
}

impl Eq for BitBuffer {}

impl Hash for BitBuffer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.padding.hash(state);
        self.as_raw_bytes().hash(state);
    }
}

impl Extend<bool> for BitBuffer {
    fn extend<T: IntoIterator<Item = bool>>(&mut self, iter: T) {
        for bit in iter {
            self.append(bit);
        }
    }
}

impl FromIterator<bool> for BitBuffer {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let mut buffer = BitBuffer::new();
        buffer.extend(iter);
        buffer
    }
}

impl fmt::Display for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for bit in self.bits() {
            f.write_str(if bit { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for BitBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitBuffer({} bits: {})", self.bit_count(), self)
    }
}

/// Iterator over the bits of a [`BitBuffer`], see [`BitBuffer::bits`].
#[derive(Clone, Debug)]
pub struct Bits<'a> {
    buffer: &'a BitBuffer,
    front: usize,
    back: usize,
}

impl Iterator for Bits<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<bool> {
        if self.front == self.back {
            return None;
        }
        let bit = self.buffer.bit(self.front);
        self.front += 1;
        bit
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.back - self.front;
        (len, Some(len))
    }
}

impl DoubleEndedIterator for Bits<'_> {
    fn next_back(&mut self) -> Option<bool> {
        if self.front == self.back {
            return None;
        }
        self.back -= 1;
        self.buffer.bit(self.back)
    }
}

impl ExactSizeIterator for Bits<'_> {}

/// Serialized form of a [`BitBuffer`]: packed bytes and the final padding.
#[derive(Serialize, Deserialize)]
struct PackedBits {
    bytes: Vec<u8>,
    padding: u8,
}

impl From<BitBuffer> for PackedBits {
    fn from(buffer: BitBuffer) -> Self {
        let (bytes, padding) = buffer.to_packed_bytes();
        Self { bytes, padding }
    }
}

impl TryFrom<PackedBits> for BitBuffer {
    type Error = BitBufferError;

    fn try_from(packed: PackedBits) -> Result<Self, Self::Error> {
        BitBuffer::from_bytes(&packed.bytes, packed.padding)
    }
}
