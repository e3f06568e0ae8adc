
//! The caller-owned pixel storage that blocks are scattered into when
//! reading and gathered from when writing. The core borrows the slices
//! for the duration of one call and never retains them.

use crate::error::{Error, Result, UnitResult};
use crate::half::Half;
use crate::math::{Vec2, mod_positive};
use crate::meta::attribute::{ChannelList, SampleType, Text};
use crate::meta::header::Header;
use crate::block::UncompressedBlock;


/// The typed storage of one channel slice.
/// The element type must match the channel's sample type.
#[derive(Debug)]
pub enum SliceData<'s> {

    /// Storage for a channel of 16-bit float samples.
    F16(&'s mut [Half]),

    /// Storage for a channel of 32-bit float samples.
    F32(&'s mut [f32]),

    /// Storage for a channel of 32-bit unsigned integer samples.
    U32(&'s mut [u32]),
}

impl SliceData<'_> {

    /// The sample type this storage can hold.
    pub fn sample_type(&self) -> SampleType {
        match self {
            SliceData::F16(_) => SampleType::F16,
            SliceData::F32(_) => SampleType::F32,
            SliceData::U32(_) => SampleType::U32,
        }
    }

    /// The number of elements in this storage.
    pub fn len(&self) -> usize {
        match self {
            SliceData::F16(values) => values.len(),
            SliceData::F32(values) => values.len(),
            SliceData::U32(values) => values.len(),
        }
    }

    /// Whether this storage contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One caller-owned channel buffer and its memory layout.
///
/// A sample at the data window position `(x, y)` lives at the element index
/// `(x / x_sampling) · x_stride + (y / y_sampling) · y_stride`,
/// where `x` and `y` are relative to the data window position.
#[derive(Debug)]
pub struct Slice<'s> {

    /// Name of the channel this slice stores.
    pub channel: Text,

    /// The typed sample storage.
    pub data: SliceData<'s>,

    /// Element distance between horizontally and vertically
    /// adjacent samples in the storage.
    pub stride: Vec2<usize>,

    /// The subsampling factors of the channel.
    /// Must match the channel description in the header.
    pub sampling: Vec2<usize>,
}

impl<'s> Slice<'s> {

    /// A dense row-major slice without subsampling
    /// for a part of the specified width.
    pub fn dense(channel: Text, width: usize, data: SliceData<'s>) -> Self {
        Slice {
            channel, data,
            stride: Vec2(1, width),
            sampling: Vec2(1, 1),
        }
    }
}

/// A set of channel slices that a read call fills with samples,
/// or a write call takes samples from.
///
/// Channels of the file that have no slice are skipped while reading.
/// Slices without a matching channel in the file are left untouched.
#[derive(Debug, Default)]
pub struct FrameBuffer<'s> {

    /// The slices, one per channel of interest.
    pub slices: Vec<Slice<'s>>,
}

impl<'s> FrameBuffer<'s> {

    /// A frame buffer without any slices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slice to this frame buffer.
    pub fn insert(&mut self, slice: Slice<'s>) -> &mut Self {
        self.slices.push(slice);
        self
    }

    fn slice_for_channel(&mut self, name: &Text) -> Option<&mut Slice<'s>> {
        self.slices.iter_mut().find(|slice| &slice.channel == name)
    }

    /// Check this frame buffer against the channel list of a part:
    /// sample types must match, sampling factors must match,
    /// and every storage must be large enough for the data window.
    pub fn validate_for_channels(&self, channels: &ChannelList, data_size: Vec2<usize>) -> UnitResult {
        for slice in &self.slices {
            let channel = match channels.list.iter().find(|channel| channel.name == slice.channel) {
                Some(channel) => channel,
                None => continue, // extra slices are allowed and skipped
            };

            if channel.sample_type != slice.data.sample_type() {
                return Err(Error::invalid("slice sample type does not match the channel"));
            }

            if channel.sampling != slice.sampling {
                return Err(Error::invalid("slice sampling does not match the channel"));
            }

            let resolution = channel.subsampled_resolution(data_size);
            if resolution.area() == 0 { continue; }

            let max_index = (resolution.x() - 1) * slice.stride.x()
                + (resolution.y() - 1) * slice.stride.y();

            if max_index >= slice.data.len() {
                return Err(Error::invalid("slice storage is too small for the data window"));
            }
        }

        Ok(())
    }

    /// Copy the samples of an uncompressed block into the matching slices.
    /// Blocks of levels other than the full resolution are skipped,
    /// as the slice layout only describes the full data window.
    pub fn scatter_block(&mut self, header: &Header, block: &UncompressedBlock) -> UnitResult {
        if block.index.level != Vec2(0, 0) {
            return Ok(());
        }

        let data_position = header.own_attributes.data_position;
        let mut remaining = block.data.as_slice();

        for row in 0 .. block.index.pixel_size.height() {
            let y = block.index.pixel_position.y() + row;
            let absolute_y = data_position.y() + y as i32;

            for channel in &header.channels.list {
                if mod_positive(absolute_y, channel.sampling.y() as i32) != 0 { continue; }

                let sample_count = block.index.pixel_size.width() / channel.sampling.x();
                let row_bytes = sample_count * channel.sample_type.bytes_per_sample();

                if remaining.len() < row_bytes {
                    return Err(Error::invalid("block data ends inside a row"));
                }

                let (row_data, rest) = remaining.split_at(row_bytes);
                remaining = rest;

                let slice = match self.slice_for_channel(&channel.name) {
                    Some(slice) => slice,
                    None => continue, // channel was not requested
                };

                let start_index = (block.index.pixel_position.x() / slice.sampling.x()) * slice.stride.x()
                    + (y / slice.sampling.y()) * slice.stride.y();

                let x_stride = slice.stride.x();

                match &mut slice.data {
                    SliceData::F16(values) => {
                        for (index, bytes) in row_data.chunks_exact(2).enumerate() {
                            values[start_index + index * x_stride] =
                                Half::from_bits(u16::from_le_bytes([bytes[0], bytes[1]]));
                        }
                    },

                    SliceData::F32(values) => {
                        for (index, bytes) in row_data.chunks_exact(4).enumerate() {
                            values[start_index + index * x_stride] =
                                f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        }
                    },

                    SliceData::U32(values) => {
                        for (index, bytes) in row_data.chunks_exact(4).enumerate() {
                            values[start_index + index * x_stride] =
                                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        }
                    },
                }
            }
        }

        Ok(())
    }

    /// Collect the samples of one block from the slices
    /// into the uncompressed block layout.
    /// Every channel of the part must have a slice when writing.
    pub fn gather_block(&self, header: &Header, block_index: crate::block::BlockIndex) -> Result<Vec<u8>> {
        let data_position = header.own_attributes.data_position;

        let absolute_bounds = crate::meta::attribute::IntegerBounds::new(
            Vec2(
                data_position.x() + block_index.pixel_position.x() as i32,
                data_position.y() + block_index.pixel_position.y() as i32,
            ),
            block_index.pixel_size,
        );

        let mut data = Vec::with_capacity(header.channels.bytes_per_block(absolute_bounds));

        for row in 0 .. block_index.pixel_size.height() {
            let y = block_index.pixel_position.y() + row;
            let absolute_y = data_position.y() + y as i32;

            for channel in &header.channels.list {
                if mod_positive(absolute_y, channel.sampling.y() as i32) != 0 { continue; }

                let slice = self.slices.iter()
                    .find(|slice| slice.channel == channel.name)
                    .ok_or_else(|| Error::invalid("missing slice for a channel of the file"))?;

                let sample_count = block_index.pixel_size.width() / channel.sampling.x();

                let start_index = (block_index.pixel_position.x() / slice.sampling.x()) * slice.stride.x()
                    + (y / slice.sampling.y()) * slice.stride.y();

                let x_stride = slice.stride.x();

                match &slice.data {
                    SliceData::F16(values) => {
                        for index in 0 .. sample_count {
                            let sample = values[start_index + index * x_stride];
                            data.extend_from_slice(&sample.to_bits().to_le_bytes());
                        }
                    },

                    SliceData::F32(values) => {
                        for index in 0 .. sample_count {
                            data.extend_from_slice(&values[start_index + index * x_stride].to_le_bytes());
                        }
                    },

                    SliceData::U32(values) => {
                        for index in 0 .. sample_count {
                            data.extend_from_slice(&values[start_index + index * x_stride].to_le_bytes());
                        }
                    },
                }
            }
        }

        Ok(data)
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::block::BlockIndex;
    use crate::compression::Compression;
    use crate::meta::BlockDescription;
    use crate::meta::attribute::{ChannelDescription, LineOrder};

    fn rgb_header(size: Vec2<usize>) -> Header {
        Header::new(
            Text::new("main").unwrap(),
            size,
            smallvec![
                ChannelDescription::new(Text::new("B").unwrap(), SampleType::F16, false),
                ChannelDescription::new(Text::new("G").unwrap(), SampleType::F32, false),
                ChannelDescription::new(Text::new("R").unwrap(), SampleType::U32, false),
            ],
        ).with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, LineOrder::Increasing)
    }

    #[test]
    fn gather_then_scatter_restores_the_frame_buffer() {
        let header = rgb_header(Vec2(5, 3));

        let b: Vec<Half> = (0 .. 15).map(|index| Half::from_f32(index as f32)).collect();
        let g: Vec<f32> = (0 .. 15).map(|index| index as f32 * 0.5).collect();
        let r: Vec<u32> = (0 .. 15).map(|index| index * 100).collect();

        let (mut b2, mut g2, mut r2) = (b.clone(), g.clone(), r.clone());

        let block_index = BlockIndex {
            part: 0,
            pixel_position: Vec2(0, 1),
            pixel_size: Vec2(5, 1),
            level: Vec2(0, 0),
        };

        let data = {
            let mut source = FrameBuffer::new();
            source.insert(Slice::dense(Text::new("B").unwrap(), 5, SliceData::F16(&mut b2)));
            source.insert(Slice::dense(Text::new("G").unwrap(), 5, SliceData::F32(&mut g2)));
            source.insert(Slice::dense(Text::new("R").unwrap(), 5, SliceData::U32(&mut r2)));
            source.gather_block(&header, block_index).unwrap()
        };

        // row 1 of: B as f16, G as f32, R as u32
        assert_eq!(data.len(), 5 * (2 + 4 + 4));

        let mut b3 = vec![Half::ZERO; 15];
        let mut g3 = vec![0.0_f32; 15];
        let mut r3 = vec![0_u32; 15];

        {
            let mut target = FrameBuffer::new();
            target.insert(Slice::dense(Text::new("B").unwrap(), 5, SliceData::F16(&mut b3)));
            target.insert(Slice::dense(Text::new("G").unwrap(), 5, SliceData::F32(&mut g3)));
            target.insert(Slice::dense(Text::new("R").unwrap(), 5, SliceData::U32(&mut r3)));
            target.validate_for_channels(&header.channels, header.layer_size).unwrap();
            target.scatter_block(&header, &UncompressedBlock { index: block_index, data }).unwrap();
        }

        // only row 1 was scattered
        for x in 0 .. 5 {
            assert_eq!(b3[5 + x].to_bits(), b[5 + x].to_bits());
            assert_eq!(g3[5 + x], g[5 + x]);
            assert_eq!(r3[5 + x], r[5 + x]);

            assert_eq!(g3[x], 0.0);
            assert_eq!(r3[10 + x], 0);
        }
    }

    #[test]
    fn missing_channels_are_skipped_while_reading() {
        let header = rgb_header(Vec2(4, 1));

        let block = UncompressedBlock {
            index: BlockIndex {
                part: 0,
                pixel_position: Vec2(0, 0),
                pixel_size: Vec2(4, 1),
                level: Vec2(0, 0),
            },
            data: vec![0_u8; 4 * (2 + 4 + 4)],
        };

        // a frame buffer that only wants G, plus an extra channel not in the file
        let mut g = vec![1.0_f32; 4];
        let mut extra = vec![9_u32; 4];

        let mut target = FrameBuffer::new();
        target.insert(Slice::dense(Text::new("G").unwrap(), 4, SliceData::F32(&mut g)));
        target.insert(Slice::dense(Text::new("unknown").unwrap(), 4, SliceData::U32(&mut extra)));

        target.validate_for_channels(&header.channels, header.layer_size).unwrap();
        target.scatter_block(&header, &block).unwrap();

        assert_eq!(g, vec![0.0; 4]); // was scattered
        assert_eq!(extra, vec![9; 4]); // was left untouched
    }

    #[test]
    fn wrong_sample_type_is_rejected() {
        let header = rgb_header(Vec2(4, 1));

        let mut wrong = vec![0_u32; 4];
        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert(Slice::dense(Text::new("B").unwrap(), 4, SliceData::U32(&mut wrong)));

        assert!(frame_buffer.validate_for_channels(&header.channels, header.layer_size).is_err());
    }

    #[test]
    fn too_small_storage_is_rejected() {
        let header = rgb_header(Vec2(4, 2));

        let mut small = vec![Half::ZERO; 7]; // needs 8
        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert(Slice::dense(Text::new("B").unwrap(), 4, SliceData::F16(&mut small)));

        assert!(frame_buffer.validate_for_channels(&header.channels, header.layer_size).is_err());
    }

    #[test]
    fn missing_slice_fails_writing_before_any_output() {
        let header = rgb_header(Vec2(4, 1));

        let mut g = vec![0.0_f32; 4];
        let mut incomplete = FrameBuffer::new();
        incomplete.insert(Slice::dense(Text::new("G").unwrap(), 4, SliceData::F32(&mut g)));

        let block_index = BlockIndex {
            part: 0,
            pixel_position: Vec2(0, 0),
            pixel_size: Vec2(4, 1),
            level: Vec2(0, 0),
        };

        assert!(incomplete.gather_block(&header, block_index).is_err());
    }
}
