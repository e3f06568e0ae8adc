
//! The 32-bit MurmurHash3 used by the Cryptomatte id-manifest convention.

/// Compute the 32-bit MurmurHash3 of the bytes with the specified seed.
pub fn murmur3_32(bytes: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut hash = seed;
    let mut chunks = bytes.chunks_exact(4);

    for chunk in &mut chunks {
        let mut block = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        block = block.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

        hash ^= block;
        hash = hash.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut block: u32 = 0;
        for (index, &byte) in remainder.iter().enumerate() {
            block |= (byte as u32) << (index * 8);
        }

        block = block.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        hash ^= block;
    }

    hash ^= bytes.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;
    hash
}

/// Hash a cryptomatte object name to the `u32` id stored in id channels.
///
/// The id convention requires the hash, reinterpreted as an `f32`,
/// to be a normal number. Where the exponent field of the raw hash
/// is all zeroes or all ones, bit 23 is flipped, so the bits neither
/// form a zero, subnormal, NaN, nor infinity.
pub fn cryptomatte_hash(name: &str) -> u32 {
    let hash = murmur3_32(name.as_bytes(), 0);

    let exponent = (hash >> 23) & 0xff;
    if exponent == 0 || exponent == 255 { hash ^ (1 << 23) }
    else { hash }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reference_values() {
        assert_eq!(murmur3_32(b"", 0), 0);
        assert_eq!(murmur3_32(b"hello", 0), 0x248b_fa47);
        assert_eq!(cryptomatte_hash("hello"), 0x248b_fa47);
    }

    #[test]
    fn hashes_are_always_normal_floats() {
        let names = [
            "hello", "bunny", "flower", "default", "",
            "a", "ab", "abc", "abcd", "abcde",
            "some/long/object/path/with_material.001",
        ];

        for name in &names {
            let value = f32::from_bits(cryptomatte_hash(name));
            let exponent = (cryptomatte_hash(name) >> 23) & 0xff;

            assert_ne!(exponent, 0, "subnormal hash for {:?}", name);
            assert_ne!(exponent, 255, "nan or infinite hash for {:?}", name);
            assert!(value.is_finite() && value.is_normal(), "bad hash for {:?}", name);
        }
    }
}
