//! Huffman prefix tree stored as an index-addressed arena.
//!
//! Nodes are held in a flat vector instead of a linked structure, which
//! sidesteps ownership cycles and makes the serialized form a plain array
//! of triples.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// One arena entry: a leaf flag plus two indices.
///
/// For a leaf, `value` holds the byte symbol and `right` is zero. For an
/// internal node, `value` is the arena index of the left child and `right`
/// the index of the right child. Children always precede their parent, so
/// the last entry is the root and the structure is acyclic by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    /// True when this entry is a leaf.
    pub is_leaf: bool,
    /// Byte symbol (leaf) or left child index (internal).
    pub value: u32,
    /// Right child index (internal); zero for leaves.
    pub right: u32,
}

/// A Huffman tree as an arena of [`NodeEntry`] triples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HuffmanTree {
    nodes: Vec<NodeEntry>,
}

impl HuffmanTree {
    /// Create an empty tree (the encoding of empty input).
    pub fn empty() -> Self {
        Self { nodes: Vec::new() }
    }

    /// True when the tree has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of arena entries.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Arena index of the root, if any.
    pub fn root(&self) -> Option<usize> {
        self.nodes.len().checked_sub(1)
    }

    /// Append a leaf for `symbol`, returning its arena index.
    pub fn push_leaf(&mut self, symbol: u8) -> usize {
        self.nodes.push(NodeEntry {
            is_leaf: true,
            value: u32::from(symbol),
            right: 0,
        });
        self.nodes.len() - 1
    }

    /// Append an internal node over two existing entries, returning its index.
    pub fn push_internal(&mut self, left: usize, right: usize) -> usize {
        self.nodes.push(NodeEntry {
            is_leaf: false,
            value: left as u32,
            right: right as u32,
        });
        self.nodes.len() - 1
    }

    /// Fetch an entry, failing on an out-of-range index (malformed tree).
    pub fn node(&self, index: usize) -> Result<NodeEntry> {
        self.nodes
            .get(index)
            .copied()
            .ok_or_else(|| Error::Compression(format!("node index {index} out of range")))
    }

    /// Bit codes per byte value, derived by walking root-to-leaf paths
    /// (false = left, true = right). A single-leaf tree yields the one-bit
    /// code `[false]` for its symbol.
    pub fn codes(&self) -> Result<Vec<Option<Vec<bool>>>> {
        let mut codes: Vec<Option<Vec<bool>>> = vec![None; 256];
        let root = match self.root() {
            Some(root) => root,
            None => return Ok(codes),
        };

        let mut stack: Vec<(usize, Vec<bool>)> = vec![(root, Vec::new())];
        while let Some((index, path)) = stack.pop() {
            let entry = self.node(index)?;
            if entry.is_leaf {
                let symbol = entry.value as usize;
                if symbol > 255 {
                    return Err(Error::Compression(format!("leaf symbol {symbol} out of range")));
                }
                // A lone root leaf still needs a non-empty code.
                let code = if path.is_empty() { vec![false] } else { path };
                codes[symbol] = Some(code);
            } else {
                let mut left_path = path.clone();
                left_path.push(false);
                let mut right_path = path;
                right_path.push(true);
                stack.push((entry.value as usize, left_path));
                stack.push((entry.right as usize, right_path));
            }
        }
        Ok(codes)
    }

    /// Serialize the arena for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.nodes)
            .map_err(|e| Error::Compression(format!("tree serialization failed: {e}")))
    }

    /// Deserialize and validate an arena.
    ///
    /// Every internal node must point at earlier entries and every leaf
    /// symbol must fit in a byte; anything else is a malformed tree.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let nodes: Vec<NodeEntry> = bincode::deserialize(data)
            .map_err(|e| Error::Compression(format!("tree deserialization failed: {e}")))?;

        for (index, entry) in nodes.iter().enumerate() {
            if entry.is_leaf {
                if entry.value > 255 {
                    return Err(Error::Compression(format!(
                        "leaf symbol {} out of range",
                        entry.value
                    )));
                }
            } else if entry.value as usize >= index || entry.right as usize >= index {
                return Err(Error::Compression(format!(
                    "internal node {index} references a later entry"
                )));
            }
        }
        Ok(Self { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_leaf_tree() -> HuffmanTree {
        let mut tree = HuffmanTree::empty();
        let a = tree.push_leaf(b'a');
        let b = tree.push_leaf(b'b');
        tree.push_internal(a, b);
        tree
    }

    #[test]
    fn test_root_is_last_entry() {
        let tree = two_leaf_tree();
        assert_eq!(tree.root(), Some(2));
        assert!(HuffmanTree::empty().root().is_none());
    }

    #[test]
    fn test_codes_two_leaves() {
        let tree = two_leaf_tree();
        let codes = tree.codes().expect("codes");
        assert_eq!(codes[b'a' as usize], Some(vec![false]));
        assert_eq!(codes[b'b' as usize], Some(vec![true]));
        assert!(codes[b'c' as usize].is_none());
    }

    #[test]
    fn test_codes_single_leaf() {
        let mut tree = HuffmanTree::empty();
        tree.push_leaf(b'z');
        let codes = tree.codes().expect("codes");
        assert_eq!(codes[b'z' as usize], Some(vec![false]));
    }

    #[test]
    fn test_serialization_round_trip() {
        let tree = two_leaf_tree();
        let bytes = tree.to_bytes().expect("serialize");
        let restored = HuffmanTree::from_bytes(&bytes).expect("deserialize");
        assert_eq!(tree, restored);
    }

    #[test]
    fn test_forward_reference_rejected() {
        // Internal node at index 0 pointing at entries after itself.
        let nodes = vec![NodeEntry {
            is_leaf: false,
            value: 1,
            right: 2,
        }];
        let bytes = bincode::serialize(&nodes).expect("serialize");
        assert!(HuffmanTree::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_oversized_symbol_rejected() {
        let nodes = vec![NodeEntry {
            is_leaf: true,
            value: 900,
            right: 0,
        }];
        let bytes = bincode::serialize(&nodes).expect("serialize");
        assert!(HuffmanTree::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_garbage_bytes_rejected() {
        assert!(HuffmanTree::from_bytes(&[0xff; 7]).is_err());
    }
}
