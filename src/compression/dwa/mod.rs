
//! DCT-based lossy compression,
//! in blocks of 32 or 256 scan lines.
//!
//! Color channels are transformed in 8×8 blocks and quantized, with the
//! coefficient stream entropy-coded like the piz data. Channels that must
//! survive exactly, such as alpha, take a lossless route. Each chunk
//! records the chosen route per channel, so decoding is self-contained.

mod classifier;
mod dct;

pub use classifier::{ChannelRules, Rule, Scheme};

use crate::error::{Error, Result};
use crate::half::Half;
use crate::io::Data;
use crate::math::{Vec2, mod_positive};
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};
use super::{ByteVec, Bytes, rle, zip};
use super::piz::huffman;
use dct::{BLOCK_EDGE, BLOCK_SIZE, ZIGZAG};


fn invalid(message: &'static str) -> Error {
    Error::codec("dwa", message)
}


#[derive(Debug)]
struct ChannelLayout {
    start_index: usize,
    next_row_index: usize,

    resolution: Vec2<usize>,
    y_sampling: usize,
    sample_type: SampleType,
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
            values_per_sample: values,
        });

        value_index += resolution.area() * values;
    }

    (layouts, value_index)
}


/// How strongly the coefficients are quantized.
/// A compression level of 100 or more means almost no extra loss.
fn aggressiveness(compression_level: f32) -> f32 {
    ((100.0 - compression_level) / 100.0).max(0.05).min(1.0)
}

/// Reduce one frequency coefficient to fewer bits.
/// The first coefficient of each block is kept at full f16 precision;
/// higher frequencies get a widening dead zone and lose mantissa bits.
fn quantize(coefficient: f32, zigzag_index: usize, aggressiveness: f32, block_magnitude: f32) -> u16 {
    let half_bits = Half::from_f32(coefficient.max(-65504.0).min(65504.0)).to_bits();

    if zigzag_index == 0 {
        return half_bits;
    }

    let dead_zone = aggressiveness * block_magnitude * (zigzag_index as f32 + 8.0) / 16000.0;
    if coefficient.abs() < dead_zone {
        return 0;
    }

    let dropped_mantissa_bits = ((aggressiveness * (2.0 + 8.0 * zigzag_index as f32 / 63.0)) as u32).min(8);
    half_bits & !(((1_u16) << dropped_mantissa_bits) - 1)
}


fn plane_to_samples(layout: &ChannelLayout, plane: &[u16]) -> Vec<f32> {
    match layout.sample_type {
        SampleType::F16 => plane.iter()
            .map(|&bits| Half::from_bits(bits).to_f32())
            .collect(),

        SampleType::F32 => plane.chunks_exact(2)
            .map(|pair| f32::from_bits((pair[1] as u32) << 16 | pair[0] as u32))
            .collect(),

        SampleType::U32 => unreachable!("u32 channels never take the dct path"),
    }
}

fn samples_to_plane(layout: &ChannelLayout, samples: &[f32], plane: &mut [u16]) {
    match layout.sample_type {
        SampleType::F16 => {
            for (value, bits) in samples.iter().zip(plane.iter_mut()) {
                *bits = Half::from_f32(*value).clamped_to_finite().to_bits();
            }
        },

        SampleType::F32 => {
            for (value, bits) in samples.iter().zip(plane.chunks_exact_mut(2)) {
                let value_bits = value.to_bits();
                bits[0] = value_bits as u16;
                bits[1] = (value_bits >> 16) as u16;
            }
        },

        SampleType::U32 => unreachable!("u32 channels never take the dct path"),
    }
}

fn block_counts(resolution: Vec2<usize>) -> Vec2<usize> {
    Vec2(
        (resolution.x() + BLOCK_EDGE - 1) / BLOCK_EDGE,
        (resolution.y() + BLOCK_EDGE - 1) / BLOCK_EDGE,
    )
}


fn encode_dct_plane(
    layout: &ChannelLayout, plane: &[u16], aggressiveness: f32,
    dc_values: &mut Vec<u16>, ac_values: &mut Vec<u16>,
) {
    let samples = plane_to_samples(layout, plane);
    let (width, height) = (layout.resolution.x(), layout.resolution.y());
    let blocks = block_counts(layout.resolution);

    for block_y in 0 .. blocks.y() {
        for block_x in 0 .. blocks.x() {

            // copy the block, padding by repeating the last column and row
            let mut block = [0.0_f32; BLOCK_SIZE];
            for row in 0 .. BLOCK_EDGE {
                let y = (block_y * BLOCK_EDGE + row).min(height - 1);
                for column in 0 .. BLOCK_EDGE {
                    let x = (block_x * BLOCK_EDGE + column).min(width - 1);
                    block[row * BLOCK_EDGE + column] = samples[y * width + x];
                }
            }

            dct::forward(&mut block);

            let block_magnitude = block[0].abs().max(0.01);
            dc_values.push(quantize(block[0], 0, aggressiveness, block_magnitude));

            for (zigzag_index, &coefficient_index) in ZIGZAG.iter().enumerate().skip(1) {
                ac_values.push(quantize(
                    block[coefficient_index], zigzag_index,
                    aggressiveness, block_magnitude,
                ));
            }
        }
    }
}

fn decode_dct_plane(
    layout: &ChannelLayout, plane: &mut [u16],
    dc_values: &mut impl Iterator<Item = u16>,
    ac_values: &mut &[u16],
) -> Result<()> {
    let (width, height) = (layout.resolution.x(), layout.resolution.y());
    let blocks = block_counts(layout.resolution);
    let mut samples = vec![0.0_f32; width * height];

    for block_y in 0 .. blocks.y() {
        for block_x in 0 .. blocks.x() {
            let mut block = [0.0_f32; BLOCK_SIZE];

            let dc = dc_values.next().ok_or_else(|| invalid("missing dc coefficient"))?;
            block[0] = Half::from_bits(dc).to_f32();

            if ac_values.len() < BLOCK_SIZE - 1 {
                return Err(invalid("missing ac coefficients"));
            }

            for (zigzag_index, &coefficient_index) in ZIGZAG.iter().enumerate().skip(1) {
                block[coefficient_index] = Half::from_bits(ac_values[zigzag_index - 1]).to_f32();
            }

            *ac_values = &ac_values[BLOCK_SIZE - 1 ..];

            dct::inverse(&mut block);

            for row in 0 .. BLOCK_EDGE.min(height - block_y * BLOCK_EDGE) {
                let y = block_y * BLOCK_EDGE + row;
                for column in 0 .. BLOCK_EDGE.min(width - block_x * BLOCK_EDGE) {
                    let x = block_x * BLOCK_EDGE + column;
                    samples[y * width + x] = block[row * BLOCK_EDGE + column];
                }
            }
        }
    }

    samples_to_plane(layout, &samples, plane);
    Ok(())
}


pub fn compress(
    channels: &ChannelList,
    uncompressed: Bytes<'_>,
    bounds: IntegerBounds,
    compression_level: f32,
) -> Result<ByteVec> {
    if uncompressed.is_empty() { return Ok(Vec::new()); }

    let (mut layouts, value_count) = channel_layouts(channels, bounds);
    debug_assert_eq!(value_count * 2, uncompressed.len(), "dwa block size bug");

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

    let rules = ChannelRules::default();
    let aggressiveness = aggressiveness(compression_level);

    let mut schemes = Vec::with_capacity(channels.list.len());
    let mut dc_values = Vec::new();
    let mut ac_values = Vec::new();
    let mut rle_raw = Vec::new();
    let mut zip_raw = Vec::new();

    for (channel, layout) in channels.list.iter().zip(&layouts) {
        let scheme = rules.classify(channel);
        schemes.push(scheme);

        let plane = &values[layout.start_index .. layout.next_row_index];
        match scheme {
            Scheme::LossyDct => encode_dct_plane(layout, plane, aggressiveness, &mut dc_values, &mut ac_values),
            Scheme::Rle => u16::write_slice(&mut rle_raw, plane).expect("in-memory write failed"),
            Scheme::Zip => u16::write_slice(&mut zip_raw, plane).expect("in-memory write failed"),
        }
    }

    let ac_compressed = huffman::compress(&ac_values)?;

    let mut dc_bytes = Vec::with_capacity(dc_values.len() * 2);
    u16::write_slice(&mut dc_bytes, &dc_values).expect("in-memory write failed");
    let dc_compressed = zip::compress(&dc_bytes)?;

    let rle_compressed = if rle_raw.is_empty() { Vec::new() } else { rle::compress(&rle_raw)? };
    let zip_compressed = if zip_raw.is_empty() { Vec::new() } else { zip::compress(&zip_raw)? };

    let mut compressed = Vec::with_capacity(
        ac_compressed.len() + dc_compressed.len() + rle_compressed.len() + zip_compressed.len() + 64
    );

    for scheme in schemes {
        scheme.to_byte().write(&mut compressed)?;
    }

    u8::write_i32_sized_slice(&mut compressed, &ac_compressed)?;
    u8::write_i32_sized_slice(&mut compressed, &dc_compressed)?;
    u8::write_i32_sized_slice(&mut compressed, &rle_compressed)?;
    u8::write_i32_sized_slice(&mut compressed, &zip_compressed)?;

    Ok(compressed)
}


pub fn decompress(
    channels: &ChannelList,
    compressed: Bytes<'_>,
    bounds: IntegerBounds,
    expected_byte_size: usize,
    pedantic: bool,
) -> Result<ByteVec> {
    if compressed.is_empty() { return Ok(Vec::new()); }

    let (mut layouts, value_count) = channel_layouts(channels, bounds);
    debug_assert_eq!(value_count * 2, expected_byte_size, "dwa block size bug");

    let mut remaining = compressed;

    let mut schemes = Vec::with_capacity(channels.list.len());
    for layout in &layouts {
        let scheme = Scheme::from_byte(u8::read(&mut remaining)?)
            .ok_or_else(|| invalid("unknown channel scheme"))?;

        if scheme == Scheme::LossyDct && layout.sample_type == SampleType::U32 {
            return Err(invalid("u32 channel routed through the dct"));
        }

        schemes.push(scheme);
    }

    // how much data every stream must contain, derived from the geometry
    let mut expected_dc_count = 0;
    let mut expected_rle_bytes = 0;
    let mut expected_zip_bytes = 0;

    for (scheme, layout) in schemes.iter().zip(&layouts) {
        let plane_bytes = layout.resolution.area() * layout.values_per_sample * 2;
        match scheme {
            Scheme::LossyDct => expected_dc_count += block_counts(layout.resolution).area(),
            Scheme::Rle => expected_rle_bytes += plane_bytes,
            Scheme::Zip => expected_zip_bytes += plane_bytes,
        }
    }

    let expected_ac_count = expected_dc_count * (BLOCK_SIZE - 1);

    let mut read_stream = |remaining: &mut &[u8]| -> Result<Vec<u8>> {
        let length = i32::read(remaining)?;
        if length < 0 || length as usize > remaining.len() {
            return Err(invalid("stream length out of bounds"));
        }

        let (stream, rest) = remaining.split_at(length as usize);
        *remaining = rest;
        Ok(stream.to_vec())
    };

    let ac_compressed = read_stream(&mut remaining)?;
    let dc_compressed = read_stream(&mut remaining)?;
    let rle_compressed = read_stream(&mut remaining)?;
    let zip_compressed = read_stream(&mut remaining)?;

    if pedantic && !remaining.is_empty() {
        return Err(invalid("trailing bytes after all streams"));
    }

    let ac_values = if expected_ac_count == 0 { Vec::new() }
        else { huffman::decompress(&ac_compressed, expected_ac_count)? };

    let dc_values = if expected_dc_count == 0 { Vec::new() }
        else {
            let dc_bytes = zip::decompress(&dc_compressed, expected_dc_count * 2)?;
            let mut dc_values = vec![0_u16; expected_dc_count];
            u16::read_slice(&mut dc_bytes.as_slice(), &mut dc_values)?;
            dc_values
        };

    let rle_raw = if expected_rle_bytes == 0 { Vec::new() }
        else { rle::decompress(&rle_compressed, expected_rle_bytes, pedantic)? };

    let zip_raw = if expected_zip_bytes == 0 { Vec::new() }
        else { zip::decompress(&zip_compressed, expected_zip_bytes)? };

    let mut values = vec![0_u16; value_count];
    let mut dc_iter = dc_values.into_iter();
    let mut ac_slice = ac_values.as_slice();
    let mut rle_slice = rle_raw.as_slice();
    let mut zip_slice = zip_raw.as_slice();

    for (scheme, layout) in schemes.iter().zip(&layouts) {
        let plane = &mut values[layout.start_index
            .. layout.start_index + layout.resolution.area() * layout.values_per_sample];

        match scheme {
            Scheme::LossyDct => decode_dct_plane(layout, plane, &mut dc_iter, &mut ac_slice)?,
            Scheme::Rle => u16::read_slice(&mut rle_slice, plane)?,
            Scheme::Zip => u16::read_slice(&mut zip_slice, plane)?,
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

    debug_assert_eq!(out.len(), expected_byte_size, "dwa byte count bug");
    Ok(out)
}
