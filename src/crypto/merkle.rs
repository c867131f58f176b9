//! Merkle root computation over transaction hashes
//!
//! The root commits a block header to the exact ordered list of its
//! transactions.

use super::hash::{double_sha256, Hash256};

/// Calculate the merkle root from a list of transaction hashes
pub fn calculate_merkle_root(hashes: &[Hash256]) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::ZERO;
    }

    let mut current_level: Vec<Hash256> = hashes.to_vec();

    while current_level.len() > 1 {
        let next_level = current_level
            .chunks(2)
            .map(|chunk| {
                // Duplicate the last hash if odd number
                let right = chunk.get(1).unwrap_or(&chunk[0]);
                let mut data = Vec::with_capacity(64);
                data.extend_from_slice(chunk[0].as_bytes());
                data.extend_from_slice(right.as_bytes());
                Hash256::new(double_sha256(&data))
            })
            .collect();

        current_level = next_level;
    }

    current_level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_hash_is_root() {
        let h = Hash256::digest(b"tx1");
        assert_eq!(calculate_merkle_root(&[h]), h);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(calculate_merkle_root(&[]), Hash256::ZERO);
    }

    #[test]
    fn test_order_matters() {
        let a = Hash256::digest(b"a");
        let b = Hash256::digest(b"b");
        assert_ne!(calculate_merkle_root(&[a, b]), calculate_merkle_root(&[b, a]));
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        let a = Hash256::digest(b"a");
        let b = Hash256::digest(b"b");
        let c = Hash256::digest(b"c");
        assert_eq!(
            calculate_merkle_root(&[a, b, c]),
            calculate_merkle_root(&[a, b, c, c])
        );
    }
}
