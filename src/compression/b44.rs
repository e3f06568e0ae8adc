
//! Lossy fixed-rate compression of f16 channels in 4×4 blocks.
//! Every block packs into 14 bytes. The B44A variant additionally
//! shrinks flat blocks to 3 bytes. Channels of other sample types
//! are stored without compression.

use std::sync::OnceLock;
use crate::error::{Error, Result};
use crate::half::Half;
use crate::io::Data;
use crate::math::{Vec2, mod_positive};
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};
use super::{ByteVec, Bytes};


const BIAS: i32 = 0x20;

// value of the third byte that marks a 3-byte flat block.
// a 14-byte block stores its shift value there, which never reaches 13
const FLAT_BLOCK_MARKER: u8 = 0xfc;

fn invalid(message: &'static str) -> Error {
    Error::codec("b44", message)
}


// Samples of channels that quantize linearly, such as alpha,
// are moved to a nonlinear representation before packing,
// so the quantization error becomes relative instead of absolute.
// The two tables are mutual inverses over the finite range.

fn nonlinear_table() -> &'static [u16; 1 << 16] {
    static TABLE: OnceLock<Box<[u16; 1 << 16]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Box::new([0_u16; 1 << 16]);
        for (bits, entry) in table.iter_mut().enumerate() {
            let value = Half::from_bits(bits as u16);
            *entry = if value.is_finite() {
                Half::from_f32((value.to_f32() / 8.0).exp()).to_bits()
            } else { 0 };
        }

        table
    })
}

fn linear_table() -> &'static [u16; 1 << 16] {
    static TABLE: OnceLock<Box<[u16; 1 << 16]>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = Box::new([0_u16; 1 << 16]);
        for (bits, entry) in table.iter_mut().enumerate() {
            let value = Half::from_bits(bits as u16);
            *entry = if value.is_finite() && value.to_f32() > 0.0 {
                Half::from_f32(value.to_f32().ln() * 8.0).to_bits()
            } else { 0 };
        }

        table
    })
}

fn convert_from_linear(samples: &mut [u16; 16]) {
    let table = nonlinear_table();
    for sample in samples.iter_mut() { *sample = table[*sample as usize]; }
}

fn convert_to_linear(samples: &mut [u16; 16]) {
    let table = linear_table();
    for sample in samples.iter_mut() { *sample = table[*sample as usize]; }
}


#[inline]
fn shift_and_round(value: i32, shift: i32) -> i32 {
    let value = value << 1;
    let bias = (1 << shift) - 1;
    let shift = shift + 1;
    let rounding = (value >> shift) & 1;
    (value + bias + rounding) >> shift
}

/// Pack a 4×4 block of 16-bit samples into 14 bytes,
/// or into 3 bytes if all samples are equal and the short form is enabled.
/// Returns the number of bytes written.
fn pack_block(samples: [u16; 16], out: &mut [u8; 14], optimize_flat: bool, exact_max: bool) -> usize {

    // map the sign-magnitude bit patterns to monotonic integers.
    // infinities and nans collapse to a single value
    let mut t = [0_u16; 16];
    for index in 0 .. 16 {
        t[index] =
            if samples[index] & 0x7c00 == 0x7c00 { 0x8000 }
            else if samples[index] & 0x8000 != 0 { !samples[index] }
            else { samples[index] | 0x8000 };
    }

    let t_max = t.iter().copied().max().expect("block is never empty");

    // find the smallest shift for which all running differences,
    // after rounding and biasing, fit into six bits
    let mut shift = -1_i32;
    let mut d = [0_i32; 16];
    let mut r = [0_i32; 15];
    let (mut r_min, mut r_max);

    loop {
        shift += 1;

        for index in 0 .. 16 {
            d[index] = shift_and_round((t_max - t[index]) as i32, shift);
        }

        r[0] = d[0] - d[4] + BIAS;
        r[1] = d[4] - d[8] + BIAS;
        r[2] = d[8] - d[12] + BIAS;

        r[3] = d[0] - d[1] + BIAS;
        r[4] = d[4] - d[5] + BIAS;
        r[5] = d[8] - d[9] + BIAS;
        r[6] = d[12] - d[13] + BIAS;

        r[7] = d[1] - d[2] + BIAS;
        r[8] = d[5] - d[6] + BIAS;
        r[9] = d[9] - d[10] + BIAS;
        r[10] = d[13] - d[14] + BIAS;

        r[11] = d[2] - d[3] + BIAS;
        r[12] = d[6] - d[7] + BIAS;
        r[13] = d[10] - d[11] + BIAS;
        r[14] = d[14] - d[15] + BIAS;

        r_min = r[0];
        r_max = r[0];

        for &value in &r[1 ..] {
            r_min = r_min.min(value);
            r_max = r_max.max(value);
        }

        if r_min >= 0 && r_max <= 0x3f { break; }
    }

    if r_min == BIAS && r_max == BIAS && optimize_flat {
        // all samples are equal; 3 bytes suffice
        out[0] = (t[0] >> 8) as u8;
        out[1] = t[0] as u8;
        out[2] = FLAT_BLOCK_MARKER;
        return 3;
    }

    if exact_max {
        // adjust t[0] so the largest sample is represented exactly
        t[0] = t_max.wrapping_sub((d[0] << shift) as u16);
    }

    out[0] = (t[0] >> 8) as u8;
    out[1] = t[0] as u8;

    out[2] = ((shift << 2) | (r[0] >> 4)) as u8;
    out[3] = ((r[0] << 4) | (r[1] >> 2)) as u8;
    out[4] = ((r[1] << 6) | r[2]) as u8;

    out[5] = ((r[3] << 2) | (r[4] >> 4)) as u8;
    out[6] = ((r[4] << 4) | (r[5] >> 2)) as u8;
    out[7] = ((r[5] << 6) | r[6]) as u8;

    out[8] = ((r[7] << 2) | (r[8] >> 4)) as u8;
    out[9] = ((r[8] << 4) | (r[9] >> 2)) as u8;
    out[10] = ((r[9] << 6) | r[10]) as u8;

    out[11] = ((r[11] << 2) | (r[12] >> 4)) as u8;
    out[12] = ((r[12] << 4) | (r[13] >> 2)) as u8;
    out[13] = ((r[13] << 6) | r[14]) as u8;

    14
}

const SIX_BITS: u32 = 0x3f;

/// Unpack a 14-byte block into 4×4 16-bit samples.
fn unpack_14(bytes: &[u8; 14], samples: &mut [u16; 16]) {
    debug_assert_ne!(bytes[2], FLAT_BLOCK_MARKER, "flat block in 14-byte unpack");

    let b = |index: usize| bytes[index] as u32;
    let s = samples;

    s[0] = ((b(0) << 8) | b(1)) as u16;

    let shift = b(2) >> 2;
    let bias = 0x20 << shift;

    s[4] = (s[0] as u32).wrapping_add((((b(2) << 4) | (b(3) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[8] = (s[4] as u32).wrapping_add((((b(3) << 2) | (b(4) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[12] = (s[8] as u32).wrapping_add((b(4) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    s[1] = (s[0] as u32).wrapping_add((b(5) >> 2) << shift).wrapping_sub(bias) as u16;
    s[5] = (s[4] as u32).wrapping_add((((b(5) << 4) | (b(6) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[9] = (s[8] as u32).wrapping_add((((b(6) << 2) | (b(7) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[13] = (s[12] as u32).wrapping_add((b(7) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    s[2] = (s[1] as u32).wrapping_add((b(8) >> 2) << shift).wrapping_sub(bias) as u16;
    s[6] = (s[5] as u32).wrapping_add((((b(8) << 4) | (b(9) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[10] = (s[9] as u32).wrapping_add((((b(9) << 2) | (b(10) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[14] = (s[13] as u32).wrapping_add((b(10) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    s[3] = (s[2] as u32).wrapping_add((b(11) >> 2) << shift).wrapping_sub(bias) as u16;
    s[7] = (s[6] as u32).wrapping_add((((b(11) << 4) | (b(12) >> 4)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[11] = (s[10] as u32).wrapping_add((((b(12) << 2) | (b(13) >> 6)) & SIX_BITS) << shift).wrapping_sub(bias) as u16;
    s[15] = (s[14] as u32).wrapping_add((b(13) & SIX_BITS) << shift).wrapping_sub(bias) as u16;

    for sample in s.iter_mut() {
        // undo the monotonic mapping
        if *sample & 0x8000 != 0 { *sample &= 0x7fff; }
        else { *sample = !*sample; }
    }
}

/// Unpack a 3-byte block into 4×4 identical 16-bit samples.
fn unpack_3(bytes: &[u8; 3], samples: &mut [u16; 16]) {
    debug_assert_eq!(bytes[2], FLAT_BLOCK_MARKER, "non-flat block in 3-byte unpack");

    let mut value = ((bytes[0] as u16) << 8) | bytes[1] as u16;

    if value & 0x8000 != 0 { value &= 0x7fff; }
    else { value = !value; }

    *samples = [value; 16];
}


#[derive(Debug)]
struct ChannelLayout {
    start_index: usize,
    next_row_index: usize,

    resolution: Vec2<usize>,
    y_sampling: usize,
    sample_type: SampleType,
    quantize_linearly: bool,
    values_per_sample: usize,
}

fn channel_layouts(channels: &ChannelList, bounds: IntegerBounds) -> (Vec<ChannelLayout>, usize) {
    let mut layouts = Vec::with_capacity(channels.list.len());
    let mut value_index = 0;

    for channel in &channels.list {
        let resolution = channel.subsampled_resolution(bounds.size);
        let values = channel.sample_type.bytes_per_sample() / SampleType::F16.bytes_per_sample();

        layouts.push(ChannelLayout {
            start_index: value_index,
            next_row_index: value_index,
            resolution,
            y_sampling: channel.sampling.y(),
            sample_type: channel.sample_type,
            quantize_linearly: channel.quantize_linearly,
            values_per_sample: values,
        });

        value_index += resolution.area() * values;
    }

    (layouts, value_index)
}


pub fn compress(
    channels: &ChannelList,
    uncompressed: Bytes<'_>,
    bounds: IntegerBounds,
    optimize_flat: bool,
) -> Result<ByteVec> {
    if uncompressed.is_empty() { return Ok(Vec::new()); }

    let (mut layouts, value_count) = channel_layouts(channels, bounds);
    debug_assert_eq!(value_count * 2, uncompressed.len(), "b44 block size bug");

    // rearrange the row-interleaved block into one plane per channel
    let mut values = vec![0_u16; value_count];
    let mut remaining_bytes = uncompressed;

    for y in bounds.position.y() .. bounds.end().y() {
        for channel in &mut layouts {
            if mod_positive(y, channel.y_sampling as i32) != 0 { continue; }

            let row_values = channel.resolution.x() * channel.values_per_sample;
            let row_end = channel.next_row_index + row_values;
            u16::read_slice(&mut remaining_bytes, &mut values[channel.next_row_index .. row_end])
                .expect("in-memory read failed");

            channel.next_row_index = row_end;
        }
    }

    let mut compressed = Vec::with_capacity(uncompressed.len() / 2);

    for channel in &layouts {
        let plane = &values[channel.start_index .. channel.next_row_index];

        if channel.sample_type != SampleType::F16 {
            // other sample types are not compressed
            u16::write_slice(&mut compressed, plane).expect("in-memory write failed");
            continue;
        }

        let width = channel.resolution.x();
        let height = channel.resolution.y();

        for block_y in (0 .. height).step_by(4) {
            for block_x in (0 .. width).step_by(4) {

                // copy the block, padding by repeating the last column and row
                let mut samples = [0_u16; 16];
                for row in 0 .. 4 {
                    let y = (block_y + row).min(height - 1);
                    for column in 0 .. 4 {
                        let x = (block_x + column).min(width - 1);
                        samples[row * 4 + column] = plane[y * width + x];
                    }
                }

                if channel.quantize_linearly {
                    convert_from_linear(&mut samples);
                }

                let mut block_bytes = [0_u8; 14];
                let written = pack_block(
                    samples, &mut block_bytes,
                    optimize_flat, !channel.quantize_linearly
                );

                compressed.extend_from_slice(&block_bytes[.. written]);
            }
        }
    }

    Ok(compressed)
}


pub fn decompress(
    channels: &ChannelList,
    compressed: Bytes<'_>,
    bounds: IntegerBounds,
    expected_byte_size: usize,
) -> Result<ByteVec> {
    if compressed.is_empty() { return Ok(Vec::new()); }

    let (mut layouts, value_count) = channel_layouts(channels, bounds);
    debug_assert_eq!(value_count * 2, expected_byte_size, "b44 block size bug");

    let mut values = vec![0_u16; value_count];
    let mut remaining = compressed;

    for channel in &layouts {
        let plane = &mut values[channel.start_index
            .. channel.start_index + channel.resolution.area() * channel.values_per_sample];

        if channel.sample_type != SampleType::F16 {
            u16::read_slice(&mut remaining, plane)
                .map_err(|_| invalid("uncompressed channel ends too soon"))?;
            continue;
        }

        let width = channel.resolution.x();
        let height = channel.resolution.y();

        for block_y in (0 .. height).step_by(4) {
            for block_x in (0 .. width).step_by(4) {
                let mut samples = [0_u16; 16];

                if remaining.len() >= 3 && remaining[2] >= 13 << 2 {
                    let mut block_bytes = [0_u8; 3];
                    block_bytes.copy_from_slice(&remaining[.. 3]);
                    remaining = &remaining[3 ..];
                    unpack_3(&block_bytes, &mut samples);
                }
                else if remaining.len() >= 14 {
                    let mut block_bytes = [0_u8; 14];
                    block_bytes.copy_from_slice(&remaining[.. 14]);
                    remaining = &remaining[14 ..];
                    unpack_14(&block_bytes, &mut samples);
                }
                else {
                    return Err(invalid("compressed block ends too soon"));
                }

                if channel.quantize_linearly {
                    convert_to_linear(&mut samples);
                }

                // write the covered part of the block, dropping the padding
                for row in 0 .. 4_usize.min(height - block_y) {
                    let y = block_y + row;
                    for column in 0 .. 4_usize.min(width - block_x) {
                        plane[y * width + block_x + column] = samples[row * 4 + column];
                    }
                }
            }
        }
    }

    // restore the row-interleaved block layout
    let mut out = Vec::with_capacity(expected_byte_size);

    for y in bounds.position.y() .. bounds.end().y() {
        for channel in &mut layouts {
            if mod_positive(y, channel.y_sampling as i32) != 0 { continue; }

            let row_values = channel.resolution.x() * channel.values_per_sample;
            let row_end = channel.next_row_index + row_values;
            u16::write_slice(&mut out, &values[channel.next_row_index .. row_end])
                .expect("in-memory write failed");

            channel.next_row_index = row_end;
        }
    }

    debug_assert_eq!(out.len(), expected_byte_size, "b44 byte count bug");
    Ok(out)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;

    fn half_bytes_of(values: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(values.len() * 2);
        for &value in values {
            Half::from_f32(value).write(&mut bytes).unwrap();
        }

        bytes
    }

    fn halves_of(bytes: &[u8]) -> Vec<f32> {
        bytes.chunks_exact(2)
            .map(|pair| Half::from_bits(u16::from_le_bytes([pair[0], pair[1]])).to_f32())
            .collect()
    }

    fn channel(sample_type: SampleType, quantize_linearly: bool) -> ChannelDescription {
        ChannelDescription {
            sample_type,
            name: Default::default(),
            quantize_linearly,
            sampling: Vec2(1, 1),
        }
    }

    #[test]
    fn nonlinear_tables_are_inverse() {
        for &value in &[0.0_f32, 0.001, 0.33, 0.5, 0.99, 1.0, 2.0, 15.5] {
            let bits = Half::from_f32(value).to_bits();
            let there = nonlinear_table()[bits as usize];
            let back = Half::from_bits(linear_table()[there as usize]).to_f32();
            assert!((back - value).abs() < 0.01, "value {}", value);
        }
    }

    #[test]
    fn pack_roundtrip_within_tolerance() {
        let mut samples = [0_u16; 16];
        for (index, sample) in samples.iter_mut().enumerate() {
            *sample = Half::from_f32(index as f32 * 0.13).to_bits();
        }

        let mut bytes = [0_u8; 14];
        assert_eq!(pack_block(samples, &mut bytes, true, true), 14);

        let mut unpacked = [0_u16; 16];
        unpack_14(&bytes, &mut unpacked);

        for (&original, &restored) in samples.iter().zip(&unpacked) {
            let error = (Half::from_bits(original).to_f32() - Half::from_bits(restored).to_f32()).abs();
            assert!(error < 0.04, "error {}", error);
        }
    }

    #[test]
    fn flat_blocks_shrink_to_3_bytes() {
        let samples = [Half::from_f32(0.25).to_bits(); 16];

        let mut bytes = [0_u8; 14];
        assert_eq!(pack_block(samples, &mut bytes, true, true), 3);

        let mut unpacked = [0_u16; 16];
        unpack_3(&[bytes[0], bytes[1], bytes[2]], &mut unpacked);
        assert_eq!(unpacked, samples);

        // without the flat optimization, the same block takes 14 bytes
        assert_eq!(pack_block(samples, &mut bytes, false, true), 14);
    }

    #[test]
    fn roundtrip_gradient_within_tolerance() {
        let channels = ChannelList::new(smallvec![channel(SampleType::F16, false)]);
        let bounds = IntegerBounds::new(Vec2(-7, 13), Vec2(37, 22));

        let original: Vec<f32> = (0 .. bounds.size.area())
            .map(|index| (index % 37) as f32 * 0.09)
            .collect();

        let bytes = half_bytes_of(&original);
        let compressed = compress(&channels, &bytes, bounds, false).unwrap();
        assert!(compressed.len() < bytes.len());

        let decompressed = decompress(&channels, &compressed, bounds, bytes.len()).unwrap();

        for (&original, restored) in original.iter().zip(halves_of(&decompressed)) {
            assert!((original - restored).abs() < 0.04, "{} vs {}", original, restored);
        }
    }

    #[test]
    fn b44a_compresses_flat_fields_smaller() {
        let channels = ChannelList::new(smallvec![channel(SampleType::F16, false)]);
        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(64, 32));

        let flat = half_bytes_of(&vec![0.5_f32; bounds.size.area()]);

        let b44 = compress(&channels, &flat, bounds, false).unwrap();
        let b44a = compress(&channels, &flat, bounds, true).unwrap();

        assert!(b44a.len() < b44.len(), "{} vs {}", b44a.len(), b44.len());

        let decompressed = decompress(&channels, &b44a, bounds, flat.len()).unwrap();
        assert_eq!(decompressed, flat);
    }

    #[test]
    fn non_half_channels_roundtrip_exactly() {
        let channels = ChannelList::new(smallvec![
            channel(SampleType::F32, false),
            channel(SampleType::F16, false),
            channel(SampleType::U32, false),
        ]);

        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(19, 13));

        // f32 noise would not survive the f16 channel, so use gradients there
        let mut bytes = Vec::new();
        for y in 0 .. bounds.size.height() {
            for value in 0 .. bounds.size.width() {
                ((y * value) as f32).write(&mut bytes).unwrap();
            }

            for value in 0 .. bounds.size.width() {
                Half::from_f32(value as f32 / 19.0).write(&mut bytes).unwrap();
            }

            for value in 0 .. bounds.size.width() {
                ((y * 1000 + value) as u32).write(&mut bytes).unwrap();
            }
        }

        let compressed = compress(&channels, &bytes, bounds, true).unwrap();
        let decompressed = decompress(&channels, &compressed, bounds, bytes.len()).unwrap();

        // check the f32 and u32 rows byte for byte
        let row_bytes = bounds.size.width() * 4;
        for y in 0 .. bounds.size.height() {
            let row_start = y * row_bytes * 2 + y * bounds.size.width() * 2;
            assert_eq!(
                bytes[row_start .. row_start + row_bytes],
                decompressed[row_start .. row_start + row_bytes],
                "f32 row {}", y
            );

            let u32_start = row_start + row_bytes + bounds.size.width() * 2;
            assert_eq!(
                bytes[u32_start .. u32_start + row_bytes],
                decompressed[u32_start .. u32_start + row_bytes],
                "u32 row {}", y
            );
        }
    }

    #[test]
    fn truncated_data_is_rejected() {
        let channels = ChannelList::new(smallvec![channel(SampleType::F16, false)]);
        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(32, 32));

        let bytes = half_bytes_of(&(0 .. bounds.size.area()).map(|index| index as f32).collect::<Vec<_>>());
        let compressed = compress(&channels, &bytes, bounds, false).unwrap();

        assert!(decompress(&channels, &compressed[.. compressed.len() - 5], bounds, bytes.len()).is_err());
    }
}
