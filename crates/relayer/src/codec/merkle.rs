//! Merkle audit-path verification.
//!
//! An audit path carries the leaf as a var-bytes field followed by
//! (direction flag, 32-byte sibling) pairs. Leaves and interior nodes are
//! domain-separated with a 0x00 / 0x01 prefix byte.

use alloy_primitives::B256;
use sha2::{Digest, Sha256};

use crate::codec::Source;
use crate::error::{RelayError, Result};

const LEAF_PREFIX: u8 = 0x00;
const NODE_PREFIX: u8 = 0x01;

/// Walk `path` up to the root and return the leaf it proves.
///
/// Fails with [`RelayError::RootMismatch`] when the recomputed root differs
/// from `root`, and with [`RelayError::Truncated`] when the path does not
/// split into whole (flag, sibling) pairs.
pub fn prove(path: &[u8], root: B256) -> Result<Vec<u8>> {
    let mut source = Source::new(path);
    let leaf = source.read_var_bytes()?.to_vec();
    let mut hash = hash_leaf(&leaf);
    while !source.is_empty() {
        let flag = source.read_byte()?;
        let sibling = source.read_hash()?;
        hash = if flag == LEAF_PREFIX {
            hash_children(sibling, hash)
        } else {
            hash_children(hash, sibling)
        };
    }
    if hash != root {
        return Err(RelayError::RootMismatch {
            expected: root,
            computed: hash,
        });
    }
    Ok(leaf)
}

pub fn hash_leaf(value: &[u8]) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(value);
    B256::from_slice(&hasher.finalize())
}

pub fn hash_children(left: B256, right: B256) -> B256 {
    let mut hasher = Sha256::new();
    hasher.update([NODE_PREFIX]);
    hasher.update(left.as_slice());
    hasher.update(right.as_slice());
    B256::from_slice(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Sink;

    /// Build an audit path for `leaf` with the given (flag, sibling) steps.
    fn build_path(leaf: &[u8], steps: &[(u8, B256)]) -> Vec<u8> {
        let mut sink = Sink::new();
        sink.write_var_bytes(leaf);
        for (flag, sibling) in steps {
            sink.write_byte(*flag);
            sink.write_hash(sibling);
        }
        sink.into_bytes()
    }

    #[test]
    fn right_sibling_proof() {
        let leaf = b"ab";
        let sibling = hash_leaf(b"cd");
        let root = hash_children(hash_leaf(leaf), sibling);

        let path = build_path(leaf, &[(0x01, sibling)]);
        assert_eq!(prove(&path, root).unwrap(), leaf);
    }

    #[test]
    fn left_sibling_proof() {
        let leaf = b"cd";
        let sibling = hash_leaf(b"ab");
        let root = hash_children(sibling, hash_leaf(leaf));

        let path = build_path(leaf, &[(0x00, sibling)]);
        assert_eq!(prove(&path, root).unwrap(), leaf);
    }

    #[test]
    fn corrupted_sibling_mismatches() {
        let leaf = b"ab";
        let mut sibling = hash_leaf(b"cd");
        let root = hash_children(hash_leaf(leaf), sibling);

        sibling.0[7] ^= 0x01;
        let path = build_path(leaf, &[(0x01, sibling)]);
        assert!(matches!(
            prove(&path, root).unwrap_err(),
            RelayError::RootMismatch { .. }
        ));
    }

    #[test]
    fn four_leaf_tree_left_inverse() {
        // Tree over leaves l0..l3; prove l2 from its audit path.
        let leaves: Vec<&[u8]> = vec![b"l0", b"l1", b"l2-payload", b"l3"];
        let hashes: Vec<B256> = leaves.iter().map(|l| hash_leaf(l)).collect();
        let n01 = hash_children(hashes[0], hashes[1]);
        let n23 = hash_children(hashes[2], hashes[3]);
        let root = hash_children(n01, n23);

        // l2: sibling l3 on the right, then n01 on the left.
        let path = build_path(leaves[2], &[(0x01, hashes[3]), (0x00, n01)]);
        assert_eq!(prove(&path, root).unwrap(), leaves[2]);
    }

    #[test]
    fn dangling_flag_is_truncated() {
        let leaf = b"ab";
        let root = hash_leaf(leaf);
        let mut path = build_path(leaf, &[]);
        path.push(0x01); // flag without a sibling
        assert!(matches!(
            prove(&path, root).unwrap_err(),
            RelayError::Truncated { .. }
        ));
    }

    #[test]
    fn single_leaf_path() {
        let leaf = b"only";
        let path = build_path(leaf, &[]);
        assert_eq!(prove(&path, hash_leaf(leaf)).unwrap(), leaf);
    }
}
