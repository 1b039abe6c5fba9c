//! Deterministic key-to-partition assignment.
//!
//! Uses jump-consistent hashing seeded from the low 8 bytes of a SHA-1
//! digest of the key. Deterministic across processes and runs, which is
//! what lets binary operators co-locate matching keys across two tables
//! with equal partition counts.

use sha1::{Digest, Sha1};

use crate::errors::{EngineError, EngineResult};

/// Assigns `key` to one of `partitions` buckets.
///
/// # Errors
/// Returns `EngineError::InvalidArgument` if `partitions < 1`.
pub fn partition_for_key(key: &[u8], partitions: u64) -> EngineResult<u64> {
    if partitions < 1 {
        return Err(EngineError::InvalidArgument(
            "partitions must be a positive number".to_string(),
        ));
    }

    let mut hasher = Sha1::new();
    hasher.update(key);
    let digest = hasher.finalize();
    let mut seed = u64::from_le_bytes(digest[0..8].try_into().unwrap());

    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while (j as u64) < partitions {
        b = j;
        seed = seed.wrapping_mul(2862933555777941757).wrapping_add(1);
        j = ((b + 1) as f64 * ((1u64 << 31) as f64 / ((seed >> 33) + 1) as f64)) as i64;
    }
    Ok(b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_partition_counts() {
        assert!(partition_for_key(b"k1", 0).is_err());
    }

    #[test]
    fn assigns_into_range_and_is_deterministic() {
        for i in 0..1000 {
            let key = format!("k{i}");
            let p1 = partition_for_key(key.as_bytes(), 4).unwrap();
            let p2 = partition_for_key(key.as_bytes(), 4).unwrap();
            assert_eq!(p1, p2);
            assert!(p1 < 4);
        }
    }

    #[test]
    fn single_partition_always_zero() {
        for i in 0..100 {
            let key = format!("k{i}");
            assert_eq!(partition_for_key(key.as_bytes(), 1).unwrap(), 0);
        }
    }
}
