//! Huffman compression codec.
//!
//! Payloads are compressed before encryption. The codec is deterministic:
//! identical input always yields the identical tree and bitstream, with
//! frequency ties broken by node insertion order.
//!
//! Round-trip exactness for every byte sequence, including empty input and
//! inputs with a single distinct byte value, is the contract this module
//! exists to provide.

mod tree;

pub use tree::{HuffmanTree, NodeEntry};

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// A packed bit sequence with an explicit bit count.
///
/// The final byte is zero-padded; pad bits are ignored on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bitstream {
    bytes: Vec<u8>,
    bit_len: u64,
}

impl Bitstream {
    /// Create an empty bitstream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one bit.
    pub fn push(&mut self, bit: bool) {
        let offset = (self.bit_len % 8) as u8;
        if offset == 0 {
            self.bytes.push(0);
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << (7 - offset);
            }
        }
        self.bit_len += 1;
    }

    /// Read the bit at `index`, if in range.
    pub fn bit(&self, index: u64) -> Option<bool> {
        if index >= self.bit_len {
            return None;
        }
        let byte = self.bytes.get((index / 8) as usize)?;
        Some(byte & (1 << (7 - (index % 8) as u8)) != 0)
    }

    /// Number of bits held.
    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    /// Number of packed bytes held.
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Serialize for encryption/persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self)
            .map_err(|e| Error::Compression(format!("bitstream serialization failed: {e}")))
    }

    /// Deserialize, validating that the bit count fits the byte payload.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let stream: Self = bincode::deserialize(data)
            .map_err(|e| Error::Compression(format!("bitstream deserialization failed: {e}")))?;
        if stream.bit_len > stream.bytes.len() as u64 * 8 {
            return Err(Error::Compression(
                "bit count exceeds packed payload".into(),
            ));
        }
        Ok(stream)
    }
}

/// Compression statistics reported back to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Input size in bytes.
    pub original_size: u64,
    /// Packed bitstream size in bytes.
    pub compressed_size: u64,
}

impl CompressionStats {
    /// Fraction of the input saved by compression; negative when the
    /// payload grew.
    pub fn ratio(&self) -> f64 {
        if self.original_size == 0 {
            return 0.0;
        }
        1.0 - self.compressed_size as f64 / self.original_size as f64
    }
}

/// Compress `data` into a Huffman tree and bitstream.
///
/// The tree is built by repeatedly merging the two lowest-frequency nodes;
/// ties resolve in favor of the earlier-inserted node so the result is
/// deterministic. Empty input yields an empty tree and bitstream; a single
/// distinct byte value yields a one-leaf tree and one bit per occurrence.
pub fn encode(data: &[u8]) -> Result<(HuffmanTree, Bitstream)> {
    let mut bits = Bitstream::new();
    if data.is_empty() {
        return Ok((HuffmanTree::empty(), bits));
    }

    let mut freq = [0u64; 256];
    for &byte in data {
        freq[byte as usize] += 1;
    }

    let mut tree = HuffmanTree::empty();
    // Min-heap keyed by (frequency, insertion sequence) for determinism.
    let mut heap: BinaryHeap<Reverse<(u64, u32, usize)>> = BinaryHeap::new();
    let mut seq = 0u32;
    for (symbol, &count) in freq.iter().enumerate() {
        if count > 0 {
            let index = tree.push_leaf(symbol as u8);
            heap.push(Reverse((count, seq, index)));
            seq += 1;
        }
    }

    while heap.len() > 1 {
        match (heap.pop(), heap.pop()) {
            (Some(Reverse((left_freq, _, left))), Some(Reverse((right_freq, _, right)))) => {
                let merged = tree.push_internal(left, right);
                heap.push(Reverse((left_freq + right_freq, seq, merged)));
                seq += 1;
            }
            _ => break,
        }
    }

    let codes = tree.codes()?;
    for &byte in data {
        let code = codes[byte as usize]
            .as_ref()
            .ok_or_else(|| Error::Compression(format!("no code for byte {byte}")))?;
        for &bit in code {
            bits.push(bit);
        }
    }
    Ok((tree, bits))
}

/// Decode `bits` back into `original_len` bytes by walking `tree`.
///
/// Fails with [`Error::Compression`] when the bitstream runs out before
/// the declared length is reached or the tree is structurally invalid.
pub fn decode(tree: &HuffmanTree, bits: &Bitstream, original_len: usize) -> Result<Vec<u8>> {
    if original_len == 0 {
        return Ok(Vec::new());
    }
    let root = tree
        .root()
        .ok_or_else(|| Error::Compression("empty tree for non-empty output".into()))?;

    let root_entry = tree.node(root)?;
    if root_entry.is_leaf {
        // Single-symbol input: one bit per occurrence, all pointing at the root.
        if bits.bit_len() < original_len as u64 {
            return Err(Error::Compression("bitstream exhausted".into()));
        }
        return Ok(vec![root_entry.value as u8; original_len]);
    }

    let mut out = Vec::with_capacity(original_len);
    let mut cursor = 0u64;
    while out.len() < original_len {
        let mut index = root;
        loop {
            let entry = tree.node(index)?;
            if entry.is_leaf {
                out.push(entry.value as u8);
                break;
            }
            let bit = bits
                .bit(cursor)
                .ok_or_else(|| Error::Compression("bitstream exhausted".into()))?;
            cursor += 1;
            index = if bit {
                entry.right as usize
            } else {
                entry.value as usize
            };
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(data: &[u8]) -> Vec<u8> {
        let (tree, bits) = encode(data).expect("encode");
        decode(&tree, &bits, data.len()).expect("decode")
    }

    #[test]
    fn test_round_trip_text() {
        let data = b"the quick brown fox jumps over the lazy dog";
        assert_eq!(round_trip(data), data);
    }

    #[test]
    fn test_empty_input() {
        let (tree, bits) = encode(&[]).expect("encode");
        assert!(tree.is_empty());
        assert_eq!(bits.bit_len(), 0);
        assert!(decode(&tree, &bits, 0).expect("decode").is_empty());
    }

    #[test]
    fn test_single_distinct_byte() {
        let data = vec![0x41u8; 1000];
        let (tree, bits) = encode(&data).expect("encode");
        assert_eq!(tree.len(), 1);
        // Trivial one-bit code per occurrence.
        assert_eq!(bits.bit_len(), 1000);
        assert_eq!(decode(&tree, &bits, data.len()).expect("decode"), data);
    }

    #[test]
    fn test_single_occurrence() {
        assert_eq!(round_trip(&[0xff]), vec![0xff]);
    }

    #[test]
    fn test_all_byte_values() {
        let data: Vec<u8> = (0..=255u8).collect();
        assert_eq!(round_trip(&data), data);
    }

    #[test]
    fn test_deterministic() {
        let data = b"abracadabra";
        let (tree_a, bits_a) = encode(data).expect("encode");
        let (tree_b, bits_b) = encode(data).expect("encode");
        assert_eq!(tree_a, tree_b);
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn test_skewed_input_compresses() {
        // Heavily repetitive input must come out smaller than it went in.
        let mut data = vec![b'a'; 4000];
        data.extend_from_slice(b"some rarer bytes: xyz0123");
        let (_, bits) = encode(&data).expect("encode");
        let stats = CompressionStats {
            original_size: data.len() as u64,
            compressed_size: bits.byte_len() as u64,
        };
        assert!(stats.ratio() > 0.5);
    }

    #[test]
    fn test_truncated_bitstream_rejected() {
        let data = b"hello huffman";
        let (tree, bits) = encode(data).expect("encode");
        // Ask for more bytes than the bitstream encodes.
        assert!(decode(&tree, &bits, data.len() + 1).is_err());
    }

    #[test]
    fn test_bitstream_serialization_round_trip() {
        let (_, bits) = encode(b"serialize me").expect("encode");
        let blob = bits.to_bytes().expect("to_bytes");
        assert_eq!(Bitstream::from_bytes(&blob).expect("from_bytes"), bits);
    }

    #[test]
    fn test_bitstream_inflated_bit_len_rejected() {
        let stream = Bitstream {
            bytes: vec![0u8; 2],
            bit_len: 17,
        };
        let blob = bincode::serialize(&stream).expect("serialize");
        assert!(Bitstream::from_bytes(&blob).is_err());
    }

    #[test]
    fn test_stats_ratio_empty() {
        let stats = CompressionStats {
            original_size: 0,
            compressed_size: 0,
        };
        assert_eq!(stats.ratio(), 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(data in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let (tree, bits) = encode(&data).expect("encode");
            let decoded = decode(&tree, &bits, data.len()).expect("decode");
            prop_assert_eq!(decoded, data);
        }

        #[test]
        fn prop_round_trip_through_serialization(
            data in proptest::collection::vec(any::<u8>(), 1..512)
        ) {
            let (tree, bits) = encode(&data).expect("encode");
            let tree = HuffmanTree::from_bytes(&tree.to_bytes().expect("tree bytes"))
                .expect("tree restore");
            let bits = Bitstream::from_bytes(&bits.to_bytes().expect("bit bytes"))
                .expect("bits restore");
            let decoded = decode(&tree, &bits, data.len()).expect("decode");
            prop_assert_eq!(decoded, data);
        }
    }
}
