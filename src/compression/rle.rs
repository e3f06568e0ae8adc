
//! Byte-level run-length encoding,
//! applied after the delta and fork transforms.

use super::ByteVec;
use super::bytes::*;
use crate::error::{Error, Result};
use crate::io::{take_1, take_n};

const MIN_RUN_LENGTH: usize = 3;
const MAX_RUN_LENGTH: usize = 127;


pub fn decompress(compressed: &[u8], expected_byte_size: usize, pedantic: bool) -> Result<ByteVec> {
    let mut remaining = compressed;
    let mut decompressed = Vec::with_capacity(expected_byte_size.min(8 * 2048));

    while !remaining.is_empty() && decompressed.len() != expected_byte_size {
        let count = take_1(&mut remaining)? as i8 as i32;

        if count < 0 {
            // copy the next '-count' bytes as-is
            let literals = take_n(&mut remaining, (-count) as usize)?;
            decompressed.extend_from_slice(literals);
        }
        else {
            // repeat the next byte 'count + 1' times
            let value = take_1(&mut remaining)?;
            decompressed.resize(decompressed.len() + count as usize + 1, value);
        }
    }

    if decompressed.len() > expected_byte_size || (pedantic && !remaining.is_empty()) {
        return Err(Error::codec("rle", "run lengths do not sum to the block size"));
    }

    if decompressed.len() != expected_byte_size {
        return Err(Error::codec("rle", "compressed data ends too soon"));
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

    let mut compressed = Vec::with_capacity(data.len());
    let mut run_start = 0;
    let mut run_end = 1;

    while run_start < data.len() {
        while run_end < data.len()
            && data[run_start] == data[run_end]
            && run_end - run_start <= MAX_RUN_LENGTH
        {
            run_end += 1;
        }

        if run_end - run_start >= MIN_RUN_LENGTH {
            compressed.push((run_end - run_start - 1) as u8);
            compressed.push(data[run_start]);
            run_start = run_end;
        }
        else {
            // collect literals until a worthwhile run begins
            while run_end < data.len()
                && ((run_end + 1 >= data.len() || data[run_end] != data[run_end + 1])
                    || (run_end + 2 >= data.len() || data[run_end + 1] != data[run_end + 2]))
                && run_end - run_start < MAX_RUN_LENGTH
            {
                run_end += 1;
            }

            compressed.push((run_start as i32 - run_end as i32) as u8);
            compressed.extend_from_slice(&data[run_start .. run_end]);

            run_start = run_end;
            run_end += 1;
        }
    }

    Ok(compressed)
}


#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(data: &[u8]) {
        let compressed = compress(data).unwrap();
        let decompressed = decompress(&compressed, data.len(), true).unwrap();
        assert_eq!(data, decompressed.as_slice());
    }

    #[test]
    fn roundtrip_flat_data() {
        roundtrip(&[0_u8; 512]);
        roundtrip(&[42_u8; 3]);
    }

    #[test]
    fn roundtrip_noise() {
        let noise: Vec<u8> = (0 .. 4096).map(|_| rand::random()).collect();
        roundtrip(&noise);
    }

    #[test]
    fn roundtrip_alternating_runs() {
        let mut data = Vec::new();
        for index in 0 .. 100 {
            data.extend(std::iter::repeat(index as u8).take(index % 9 + 1));
        }

        roundtrip(&data);
    }

    #[test]
    fn truncated_input_is_rejected() {
        let compressed = compress(&[7_u8; 100]).unwrap();
        let truncated = &compressed[.. compressed.len() - 1];
        assert!(decompress(truncated, 100, true).is_err());
    }

    #[test]
    fn excess_runs_are_rejected() {
        let compressed = compress(&[7_u8; 100]).unwrap();
        assert!(decompress(&compressed, 50, true).is_err());
    }
}
