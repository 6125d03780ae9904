//! Key-to-partition hashing. Uses a fixed FNV-1a rather than
//! `std::hash::DefaultHasher`, whose algorithm is explicitly unstable
//! across Rust releases and would silently reshuffle existing data across
//! partitions after a toolchain upgrade. This exact algorithm is part of
//! the on-disk compatibility surface and must never change once deployed.

const FNV_OFFSET_BASIS: u32 = 0x811c9dc5;
const FNV_PRIME: u32 = 0x01000193;

fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps a message key to a partition index in `0..num_partitions`. An empty
/// key always maps to partition 0.
pub fn partition_for_key(key: &[u8], num_partitions: u32) -> u32 {
    if key.is_empty() || num_partitions <= 1 {
        return 0;
    }
    fnv1a32(key) % num_partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_maps_to_partition_zero() {
        assert_eq!(partition_for_key(b"", 8), 0);
    }

    #[test]
    fn same_key_always_maps_to_same_partition() {
        let a = partition_for_key(b"user-42", 16);
        let b = partition_for_key(b"user-42", 16);
        assert_eq!(a, b);
    }

    #[test]
    fn result_is_always_in_range() {
        for i in 0..1000u32 {
            let key = i.to_be_bytes();
            let p = partition_for_key(&key, 7);
            assert!(p < 7);
        }
    }
}
