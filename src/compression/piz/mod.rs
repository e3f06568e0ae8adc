
//! Wavelet compression followed by Huffman coding.
//! Works well for grainy photographic content.

pub(crate) mod huffman;
mod wavelet;

use crate::error::{Error, Result, usize_to_u16};
use crate::io::Data;
use crate::math::{Vec2, mod_positive};
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};
use super::{ByteVec, Bytes};


const U16_RANGE: usize = 1 << 16;
const BITMAP_SIZE: usize = U16_RANGE >> 3;

/// Where the 16-bit planes of one channel live in the shared buffer.
/// Samples wider than 16 bits are striped over multiple interleaved planes.
#[derive(Debug)]
struct ChannelLayout {
    start_index: usize,
    next_row_index: usize,

    resolution: Vec2<usize>,
    y_sampling: usize,
    planes_per_sample: usize,
}

fn channel_layouts(channels: &ChannelList, bounds: IntegerBounds) -> (Vec<ChannelLayout>, usize) {
    let mut layouts = Vec::with_capacity(channels.list.len());
    let mut value_index = 0;

    for channel in &channels.list {
        let resolution = channel.subsampled_resolution(bounds.size);
        let planes = channel.sample_type.bytes_per_sample() / SampleType::F16.bytes_per_sample();

        layouts.push(ChannelLayout {
            start_index: value_index,
            next_row_index: value_index,
            resolution,
            y_sampling: channel.sampling.y(),
            planes_per_sample: planes,
        });

        value_index += resolution.area() * planes;
    }

    (layouts, value_index)
}


pub fn compress(channels: &ChannelList, uncompressed: Bytes<'_>, bounds: IntegerBounds) -> Result<ByteVec> {
    if uncompressed.is_empty() { return Ok(Vec::new()); }

    let (mut layouts, value_count) = channel_layouts(channels, bounds);
    debug_assert_eq!(value_count * 2, uncompressed.len(), "piz block size bug");

    // rearrange the row-interleaved block into one contiguous plane per channel
    let mut values = vec![0_u16; value_count];
    let mut remaining_bytes = uncompressed;

    for y in bounds.position.y() .. bounds.end().y() {
        for channel in &mut layouts {
            if mod_positive(y, channel.y_sampling as i32) != 0 { continue; }

            let row_values = channel.resolution.x() * channel.planes_per_sample;
            let row_end = channel.next_row_index + row_values;
            u16::read_slice(&mut remaining_bytes, &mut values[channel.next_row_index .. row_end])
                .expect("in-memory read failed");

            channel.next_row_index = row_end;
        }
    }

    // range-compact the values so the wavelet output stays small
    let (min_nonzero_byte, max_nonzero_byte, bitmap) = used_value_bitmap(&values);
    let (max_compact_value, forward_table) = forward_table_from_bitmap(&bitmap);
    apply_table(&mut values, &forward_table);

    let mut compressed = Vec::with_capacity(uncompressed.len() / 2);
    usize_to_u16(min_nonzero_byte, "bitmap index")?.write(&mut compressed)?;
    usize_to_u16(max_nonzero_byte, "bitmap index")?.write(&mut compressed)?;

    if min_nonzero_byte <= max_nonzero_byte {
        compressed.extend_from_slice(&bitmap[min_nonzero_byte ..= max_nonzero_byte]);
    }

    for channel in &layouts {
        for plane in 0 .. channel.planes_per_sample {
            wavelet::encode(
                &mut values[channel.start_index + plane .. channel.next_row_index],
                channel.resolution,
                Vec2(channel.planes_per_sample, channel.resolution.x() * channel.planes_per_sample),
                max_compact_value,
            );
        }
    }

    let entropy_coded = huffman::compress(&values)?;
    u8::write_i32_sized_slice(&mut compressed, &entropy_coded)?;

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
    debug_assert_eq!(value_count * 2, expected_byte_size, "piz block size bug");

    let mut remaining = compressed;
    let min_nonzero_byte = u16::read(&mut remaining)? as usize;
    let max_nonzero_byte = u16::read(&mut remaining)? as usize;

    if min_nonzero_byte >= BITMAP_SIZE || max_nonzero_byte >= BITMAP_SIZE {
        return Err(Error::codec("piz", "invalid bitmap size"));
    }

    let mut bitmap = vec![0_u8; BITMAP_SIZE];
    if min_nonzero_byte <= max_nonzero_byte {
        u8::read_slice(&mut remaining, &mut bitmap[min_nonzero_byte ..= max_nonzero_byte])?;
    }

    let (reverse_table, max_compact_value) = reverse_table_from_bitmap(&bitmap);

    let entropy_coded_length = i32::read(&mut remaining)?;
    if entropy_coded_length < 0 || entropy_coded_length as usize > remaining.len()
        || (pedantic && entropy_coded_length as usize != remaining.len())
    {
        return Err(Error::codec("piz", "invalid stream length"));
    }

    let mut values = huffman::decompress(&remaining[.. entropy_coded_length as usize], value_count)?;

    for channel in &layouts {
        let channel_values = channel.resolution.area() * channel.planes_per_sample;

        for plane in 0 .. channel.planes_per_sample {
            wavelet::decode(
                &mut values[channel.start_index + plane .. channel.start_index + channel_values],
                channel.resolution,
                Vec2(channel.planes_per_sample, channel.resolution.x() * channel.planes_per_sample),
                max_compact_value,
            );
        }
    }

    // expand the compacted values back to their original range
    apply_table(&mut values, &reverse_table);

    // restore the row-interleaved block layout
    let mut out = Vec::with_capacity(expected_byte_size);

    for y in bounds.position.y() .. bounds.end().y() {
        for channel in &mut layouts {
            if mod_positive(y, channel.y_sampling as i32) != 0 { continue; }

            let row_values = channel.resolution.x() * channel.planes_per_sample;
            let row_end = channel.next_row_index + row_values;
            u16::write_slice(&mut out, &values[channel.next_row_index .. row_end])
                .expect("in-memory write failed");

            channel.next_row_index = row_end;
        }
    }

    debug_assert_eq!(out.len(), expected_byte_size, "piz byte count bug");
    Ok(out)
}


/// Mark every 16-bit value that occurs in the data.
/// Returns the indices of the first and last non-zero bitmap byte.
fn used_value_bitmap(values: &[u16]) -> (usize, usize, Vec<u8>) {
    let mut bitmap = vec![0_u8; BITMAP_SIZE];

    for &value in values {
        bitmap[value as usize >> 3] |= 1 << (value & 7);
    }

    // zero is always assumed present and not stored explicitly
    bitmap[0] &= !1;

    let min_index = bitmap.iter().position(|&byte| byte != 0);
    let max_index = min_index.map(|min|
        min + bitmap[min ..].iter().rposition(|&byte| byte != 0).expect("bitmap position bug")
    );

    (min_index.unwrap_or(0), max_index.unwrap_or(0), bitmap)
}

/// Build the table mapping every occurring value to a dense range starting at zero.
fn forward_table_from_bitmap(bitmap: &[u8]) -> (u16, Vec<u16>) {
    let mut table = vec![0_u16; U16_RANGE];
    let mut count = 0_usize;

    for (value, entry) in table.iter_mut().enumerate() {
        if value == 0 || bitmap[value >> 3] & (1 << (value & 7)) != 0 {
            *entry = count as u16;
            count += 1;
        }
    }

    ((count - 1) as u16, table)
}

/// Build the table mapping the dense range back to the original values.
fn reverse_table_from_bitmap(bitmap: &[u8]) -> (Vec<u16>, u16) {
    let mut table = Vec::with_capacity(U16_RANGE);

    for value in 0 .. U16_RANGE {
        if value == 0 || bitmap[value >> 3] & (1 << (value & 7)) != 0 {
            table.push(value as u16);
        }
    }

    let max_compact_value = (table.len() - 1) as u16;
    table.resize(U16_RANGE, 0);

    (table, max_compact_value)
}

fn apply_table(values: &mut [u16], table: &[u16]) {
    for value in values {
        *value = table[*value as usize];
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::ChannelDescription;

    fn test_roundtrip_noise_with(channels: ChannelList, bounds: IntegerBounds) {
        let pixel_bytes: ByteVec = (0 .. channels.bytes_per_block(bounds))
            .map(|_| rand::random()).collect();

        let compressed = compress(&channels, &pixel_bytes, bounds).unwrap();
        let decompressed = decompress(&channels, &compressed, bounds, pixel_bytes.len(), true).unwrap();

        assert_eq!(pixel_bytes, decompressed);
    }

    fn plain_channel(sample_type: SampleType) -> ChannelDescription {
        ChannelDescription {
            sample_type,
            name: Default::default(),
            quantize_linearly: false,
            sampling: Vec2(1, 1),
        }
    }

    #[test]
    fn roundtrip_any_sample_type() {
        for &sample_type in &[SampleType::F16, SampleType::F32, SampleType::U32] {
            let channels = ChannelList::new(smallvec![
                plain_channel(sample_type), plain_channel(sample_type)
            ]);

            let bounds = IntegerBounds {
                position: Vec2(-30, 100),
                size: Vec2(163, 95),
            };

            test_roundtrip_noise_with(channels, bounds);
        }
    }

    #[test]
    fn roundtrip_mixed_channels() {
        let channels = ChannelList::new(smallvec![
            plain_channel(SampleType::F32),
            plain_channel(SampleType::F16),
            plain_channel(SampleType::U32),
            plain_channel(SampleType::F16),
        ]);

        let bounds = IntegerBounds {
            position: Vec2(-3, 1),
            size: Vec2(97, 61),
        };

        test_roundtrip_noise_with(channels, bounds);
    }

    #[test]
    fn roundtrip_low_entropy_content() {
        let channels = ChannelList::new(smallvec![plain_channel(SampleType::F16)]);
        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(64, 32));

        let values: Vec<u16> = (0 .. bounds.size.area())
            .map(|index| (index % 5) as u16 * 1000)
            .collect();

        let mut pixel_bytes = Vec::with_capacity(values.len() * 2);
        u16::write_slice(&mut pixel_bytes, &values).unwrap();

        let compressed = compress(&channels, &pixel_bytes, bounds).unwrap();
        assert!(compressed.len() < pixel_bytes.len(), "piz did not compress structured data");

        let decompressed = decompress(&channels, &compressed, bounds, pixel_bytes.len(), true).unwrap();
        assert_eq!(pixel_bytes, decompressed);
    }

    #[test]
    fn truncated_data_is_rejected() {
        let channels = ChannelList::new(smallvec![plain_channel(SampleType::F16)]);
        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(32, 32));

        let pixel_bytes: ByteVec = (0 .. channels.bytes_per_block(bounds))
            .map(|_| rand::random()).collect();

        let compressed = compress(&channels, &pixel_bytes, bounds).unwrap();

        for &len in &[2_usize, 10, compressed.len() / 2, compressed.len() - 1] {
            assert!(
                decompress(&channels, &compressed[.. len], bounds, pixel_bytes.len(), true).is_err(),
                "accepted a file truncated to {} bytes", len
            );
        }
    }
}
