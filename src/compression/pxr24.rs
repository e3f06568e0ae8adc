
//! Lossy compression for `f32` samples,
//! but lossless compression for `u32` and `f16` samples.
//!
//! Each `f32` is rounded to its top 24 bits, every sample is replaced
//! with the difference to its left neighbor, the difference bytes are
//! transposed so that all most significant bytes form one contiguous
//! run, and the result is deflated.

use super::{ByteVec, Bytes};
use crate::error::{Error, Result};
use crate::math::mod_positive;
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};


pub fn compress(channels: &ChannelList, uncompressed: Bytes<'_>, bounds: IntegerBounds) -> Result<ByteVec> {
    if uncompressed.is_empty() { return Ok(Vec::new()); }

    // f32 samples shrink to three bytes, all other samples keep their size
    let mut transposed = vec![0_u8; uncompressed.len()];
    let mut write_index = 0;
    let mut remaining = uncompressed;

    for y in bounds.position.y() .. bounds.end().y() {
        for channel in &channels.list {
            if mod_positive(y, channel.sampling.y() as i32) != 0 { continue; }

            let sample_count = channel.subsampled_resolution(bounds.size).x();
            let mut previous: u32 = 0;

            match channel.sample_type {
                SampleType::F16 => {
                    let mut planes = [write_index, write_index + sample_count];
                    write_index = planes[1] + sample_count;

                    for _ in 0 .. sample_count {
                        let sample = u16::from_le_bytes([remaining[0], remaining[1]]) as u32;
                        remaining = &remaining[2..];

                        let difference = sample.wrapping_sub(previous);
                        previous = sample;

                        transposed[planes[0]] = (difference >> 8) as u8;
                        transposed[planes[1]] = difference as u8;
                        planes[0] += 1;
                        planes[1] += 1;
                    }
                },

                SampleType::U32 => {
                    let mut planes = [
                        write_index,
                        write_index + sample_count,
                        write_index + sample_count * 2,
                        write_index + sample_count * 3,
                    ];

                    write_index = planes[3] + sample_count;

                    for _ in 0 .. sample_count {
                        let sample = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]);
                        remaining = &remaining[4..];

                        let difference = sample.wrapping_sub(previous);
                        previous = sample;

                        transposed[planes[0]] = (difference >> 24) as u8;
                        transposed[planes[1]] = (difference >> 16) as u8;
                        transposed[planes[2]] = (difference >> 8) as u8;
                        transposed[planes[3]] = difference as u8;

                        for plane in &mut planes { *plane += 1; }
                    }
                },

                SampleType::F32 => {
                    let mut planes = [
                        write_index,
                        write_index + sample_count,
                        write_index + sample_count * 2,
                    ];

                    write_index = planes[2] + sample_count;

                    for _ in 0 .. sample_count {
                        let sample = f32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]);
                        remaining = &remaining[4..];

                        let rounded = f32_to_f24(sample);
                        let difference = rounded.wrapping_sub(previous);
                        previous = rounded;

                        transposed[planes[0]] = (difference >> 16) as u8;
                        transposed[planes[1]] = (difference >> 8) as u8;
                        transposed[planes[2]] = difference as u8;

                        for plane in &mut planes { *plane += 1; }
                    }
                },
            }
        }
    }

    transposed.truncate(write_index);
    Ok(miniz_oxide::deflate::compress_to_vec_zlib(&transposed, 4))
}

pub fn decompress(
    channels: &ChannelList,
    compressed: Bytes<'_>,
    bounds: IntegerBounds,
    expected_byte_size: usize,
    pedantic: bool,
) -> Result<ByteVec> {
    if compressed.is_empty() { return Ok(Vec::new()); }

    // the transposed data is never larger than the uncompressed block
    let transposed_size = expected_byte_size;
    let transposed = zune_inflate::DeflateDecoder::new_with_options(
        compressed,
        zune_inflate::DeflateOptions::default()
            .set_limit(transposed_size)
            .set_size_hint(transposed_size)
    )
        .decode_zlib()
        .map_err(|_| Error::codec("pxr24", "malformed deflate stream"))?;

    let mut read_index = 0;
    let mut out = Vec::with_capacity(expected_byte_size.min(8 * 2048));

    let take_planes = |start: usize, count: usize, planes: usize| -> Result<usize> {
        let end = start + count * planes;
        if end > transposed.len() { Err(Error::codec("pxr24", "deflate stream ends too soon")) }
        else { Ok(end) }
    };

    for y in bounds.position.y() .. bounds.end().y() {
        for channel in &channels.list {
            if mod_positive(y, channel.sampling.y() as i32) != 0 { continue; }

            let sample_count = channel.subsampled_resolution(bounds.size).x();
            let mut accumulated: u32 = 0;

            match channel.sample_type {
                SampleType::F16 => {
                    let mut planes = [read_index, read_index + sample_count];
                    read_index = take_planes(read_index, sample_count, 2)?;

                    for _ in 0 .. sample_count {
                        let difference = ((transposed[planes[0]] as u32) << 8)
                            | (transposed[planes[1]] as u32);

                        planes[0] += 1;
                        planes[1] += 1;

                        accumulated = accumulated.wrapping_add(difference);
                        out.extend_from_slice(&(accumulated as u16).to_le_bytes());
                    }
                },

                SampleType::U32 => {
                    let mut planes = [
                        read_index,
                        read_index + sample_count,
                        read_index + sample_count * 2,
                        read_index + sample_count * 3,
                    ];

                    read_index = take_planes(read_index, sample_count, 4)?;

                    for _ in 0 .. sample_count {
                        let difference = ((transposed[planes[0]] as u32) << 24)
                            | ((transposed[planes[1]] as u32) << 16)
                            | ((transposed[planes[2]] as u32) << 8)
                            | (transposed[planes[3]] as u32);

                        for plane in &mut planes { *plane += 1; }

                        accumulated = accumulated.wrapping_add(difference);
                        out.extend_from_slice(&accumulated.to_le_bytes());
                    }
                },

                SampleType::F32 => {
                    let mut planes = [
                        read_index,
                        read_index + sample_count,
                        read_index + sample_count * 2,
                    ];

                    read_index = take_planes(read_index, sample_count, 3)?;

                    for _ in 0 .. sample_count {
                        let difference = ((transposed[planes[0]] as u32) << 24)
                            | ((transposed[planes[1]] as u32) << 16)
                            | ((transposed[planes[2]] as u32) << 8);

                        for plane in &mut planes { *plane += 1; }

                        // the dropped mantissa byte stays zero
                        accumulated = accumulated.wrapping_add(difference);
                        out.extend_from_slice(&accumulated.to_le_bytes());
                    }
                },
            }
        }
    }

    if pedantic && read_index != transposed.len() {
        return Err(Error::codec("pxr24", "deflate stream contains too many bytes"));
    }

    Ok(out)
}


/// Round a 32-bit float to 24 bits by discarding
/// the lowest significand byte, rounding to nearest.
/// The reverse conversion is an 8-bit left shift.
pub fn f32_to_f24(float: f32) -> u32 {
    let bits = float.to_bits();

    let sign = bits & 0x8000_0000;
    let exponent = bits & 0x7f80_0000;
    let mantissa = bits & 0x007f_ffff;

    let result = if exponent == 0x7f80_0000 {
        if mantissa != 0 {
            // preserve nan-ness: if the remaining significand bits
            // would be all zero, the value would turn into an infinity,
            // so at least one bit must survive
            let mantissa = mantissa >> 8;
            (exponent >> 8) | mantissa | if mantissa == 0 { 1 } else { 0 }
        }
        else {
            // infinity stays infinity
            exponent >> 8
        }
    }
    else {
        let rounded = ((exponent | mantissa) + (mantissa & 0x0000_0080)) >> 8;

        if rounded >= 0x7f_8000 {
            // rounding the significand overflowed the exponent near the
            // largest finite value. truncate instead to stay finite
            (exponent | mantissa) >> 8
        }
        else { rounded }
    };

    (sign >> 8) | result
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;
    use crate::meta::attribute::ChannelDescription;

    fn channel(sample_type: SampleType) -> ChannelDescription {
        ChannelDescription {
            name: Default::default(),
            sample_type,
            quantize_linearly: false,
            sampling: Vec2(1, 1),
        }
    }

    #[test]
    fn f24_preserves_top_15_significand_bits() {
        for &value in &[1.0_f32, -1.0, 0.5, 1234.567, 1.0e-30, 3.4e38, 0.0] {
            let restored = f32::from_bits(f32_to_f24(value) << 8);
            let error = (restored - value).abs();
            assert!(error <= value.abs() * 3.0e-5 + f32::MIN_POSITIVE, "value {}", value);
        }

        assert!(f32::from_bits(f32_to_f24(f32::NAN) << 8).is_nan());
        assert_eq!(f32::from_bits(f32_to_f24(f32::INFINITY) << 8), f32::INFINITY);

        // values near the top of the range must not overflow into infinity
        assert!(f32::from_bits(f32_to_f24(f32::MAX) << 8).is_finite());
    }

    #[test]
    fn floats_roundtrip_within_tolerance() {
        let channels = ChannelList::new(smallvec![channel(SampleType::F32)]);
        let bounds = IntegerBounds::new(Vec2(4, -2), Vec2(23, 11));

        let values: Vec<f32> = (0 .. bounds.size.area())
            .map(|index| (index as f32 * 0.02 - 3.0).exp())
            .collect();

        let bytes: Vec<u8> = values.iter().flat_map(|value| value.to_le_bytes()).collect();

        let compressed = compress(&channels, &bytes, bounds).unwrap();
        let decompressed = decompress(&channels, &compressed, bounds, bytes.len(), true).unwrap();

        for (index, (&original, restored_bytes)) in values.iter().zip(decompressed.chunks_exact(4)).enumerate() {
            let restored = f32::from_le_bytes([restored_bytes[0], restored_bytes[1], restored_bytes[2], restored_bytes[3]]);
            let error = (restored - original).abs();
            assert!(error <= original.abs() * 3.0e-5, "sample {}", index);
        }
    }

    #[test]
    fn truncated_stream_is_rejected() {
        let channels = ChannelList::new(smallvec![channel(SampleType::U32)]);
        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(16, 16));

        let bytes: Vec<u8> = (0 .. channels.bytes_per_block(bounds)).map(|_| rand::random()).collect();
        let compressed = compress(&channels, &bytes, bounds).unwrap();

        assert!(decompress(&channels, &compressed[.. compressed.len() / 2], bounds, bytes.len(), true).is_err());
    }
}
