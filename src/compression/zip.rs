
//! Deflate compression of whole blocks,
//! applied after the delta and fork transforms.
//! Covers both the single-line and the 16-line block variant.

use super::ByteVec;
use super::bytes::*;
use crate::error::{Error, Result};


pub fn decompress(compressed: &[u8], expected_byte_size: usize) -> Result<ByteVec> {
    let mut decompressed = zune_inflate::DeflateDecoder::new_with_options(
        compressed,
        zune_inflate::DeflateOptions::default()
            .set_limit(expected_byte_size)
            .set_size_hint(expected_byte_size)
    )
        .decode_zlib()
        .map_err(|_| Error::codec("zip", "malformed deflate stream"))?;

    if decompressed.len() != expected_byte_size {
        return Err(Error::codec("zip", "deflate stream contains a wrong number of bytes"));
    }

    delta_decode(&mut decompressed);

    let mut scratch = Vec::new();
    interleave(&mut decompressed, &mut scratch);
    Ok(decompressed)
}

pub fn compress(uncompressed: &[u8]) -> Result<ByteVec> {
    let mut data = uncompressed.to_vec();

    let mut scratch = Vec::new();
    fork(&mut data, &mut scratch);
    delta_encode(&mut data);

    Ok(miniz_oxide::deflate::compress_to_vec_zlib(&data, 4))
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_noise() {
        let noise: Vec<u8> = (0 .. 4096).map(|_| rand::random()).collect();
        let compressed = compress(&noise).unwrap();
        let decompressed = decompress(&compressed, noise.len()).unwrap();
        assert_eq!(noise, decompressed);
    }

    #[test]
    fn roundtrip_gradient_shrinks() {
        let gradient: Vec<u8> = (0 .. 4096).map(|index| (index / 16) as u8).collect();
        let compressed = compress(&gradient).unwrap();
        assert!(compressed.len() < gradient.len());

        let decompressed = decompress(&compressed, gradient.len()).unwrap();
        assert_eq!(gradient, decompressed);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decompress(&[1, 2, 3, 4, 5], 100).is_err());
    }
}
