
//! Compressed and uncompressed pixel byte blocks,
//! and the conversion between chunks and block layouts.

pub mod chunk;
pub mod reader;
pub mod writer;

use crate::compression::ByteVec;
use crate::context::CodecContext;
use crate::error::{Error, Result, usize_to_i32, i32_to_usize};
use crate::io::Data;
use crate::math::Vec2;
use crate::meta::{BlockDescription, MetaData};
use crate::meta::header::Header;
use crate::block::chunk::{
    Chunk, CompressedBlock, CompressedScanLineBlock, CompressedTileBlock,
    CompressedDeepScanLineBlock, CompressedDeepTileBlock, TileCoordinates,
};


/// Specifies where a block of pixel data is placed in the image.
/// This is a globally unique identifier including
/// the part index, level index, and pixel location.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Debug)]
pub struct BlockIndex {

    /// Index of the part this block belongs to.
    pub part: usize,

    /// Index of the top left pixel of this block within the data window.
    pub pixel_position: Vec2<usize>,

    /// Number of pixels in this block, clipped against the level boundary.
    pub pixel_size: Vec2<usize>,

    /// Index of the mip or rip level.
    pub level: Vec2<usize>,
}

/// A block of uncompressed pixel bytes and where they belong in the image.
///
/// The bytes are the row-major block layout: for each scan line
/// in the block, for each channel with a sample in that line,
/// sorted alphabetically, the little-endian sample bytes.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct UncompressedBlock {

    /// Where the data is placed in the image.
    pub index: BlockIndex,

    /// The uncompressed pixel bytes of the whole block.
    pub data: ByteVec,
}

/// A decoded block of deep data: the per-pixel sample counts
/// and the packed sample bytes.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct DeepBlock {

    /// Where the data is placed in the image.
    pub index: BlockIndex,

    /// For each pixel of the block in row-major order, the cumulative
    /// number of samples up to and including that pixel, per scan line.
    pub cumulative_sample_counts: Vec<i32>,

    /// The uncompressed deep sample bytes of the whole block.
    pub sample_data: ByteVec,
}


impl UncompressedBlock {

    /// Decompress a flat chunk into an `UncompressedBlock`.
    /// Returns an error for deep chunks, which are decoded by `DeepBlock`.
    pub fn decompress_chunk(chunk: Chunk, meta_data: &MetaData, context: &CodecContext, pedantic: bool) -> Result<Self> {
        let header: &Header = meta_data.headers.get(chunk.part_index)
            .ok_or_else(|| Error::invalid("chunk part index"))?;

        let tile_coordinates = header.get_block_data_indices(&chunk.block.locator())?;
        let relative_bounds = header.get_absolute_block_pixel_coordinates(tile_coordinates)?;
        let absolute_bounds = relative_bounds.with_origin(header.own_attributes.data_position);

        let expected_byte_size = header.channels.bytes_per_block(absolute_bounds);
        context.check_allocation(expected_byte_size)?;

        let index = BlockIndex {
            part: chunk.part_index,
            pixel_position: relative_bounds.position.to_usize("block position")?,
            pixel_size: relative_bounds.size,
            level: tile_coordinates.level_index,
        };

        match chunk.block {
            CompressedBlock::Tile(CompressedTileBlock { compressed_pixels, .. }) |
            CompressedBlock::ScanLine(CompressedScanLineBlock { compressed_pixels, .. }) => {
                Ok(UncompressedBlock {
                    data: header.compression.decompress_block(
                        &header.channels, compressed_pixels,
                        absolute_bounds, expected_byte_size, pedantic,
                    )?,
                    index,
                })
            },

            _ => Err(Error::unsupported("deep chunks must be decoded as deep blocks")),
        }
    }

    /// Consume this block by compressing it into a `Chunk`.
    pub fn compress_to_chunk(self, headers: &[Header]) -> Result<Chunk> {
        let UncompressedBlock { data, index } = self;

        let header: &Header = headers.get(index.part)
            .ok_or_else(|| Error::invalid("block part index"))?;

        let tile_coordinates = TileCoordinates {
            tile_index: index.pixel_position / header.max_block_pixel_size(),
            level_index: index.level,
        };

        let relative_bounds = header.get_absolute_block_pixel_coordinates(tile_coordinates)?;
        let absolute_bounds = relative_bounds.with_origin(header.own_attributes.data_position);

        let expected_byte_size = header.channels.bytes_per_block(absolute_bounds);
        if expected_byte_size != data.len() {
            return Err(Error::invalid("block byte size does not match its dimensions"));
        }

        let compression = match header.compression {
            // the dwa level is an attribute of the header, not of the compression value
            crate::compression::Compression::DWAA(None) =>
                crate::compression::Compression::DWAA(header.own_attributes.dwa_compression_level),

            crate::compression::Compression::DWAB(None) =>
                crate::compression::Compression::DWAB(header.own_attributes.dwa_compression_level),

            other => other,
        };

        let compressed_data = compression.compress_block(&header.channels, data, absolute_bounds)?;

        Ok(Chunk {
            part_index: index.part,
            block: match header.blocks {
                BlockDescription::ScanLines => CompressedBlock::ScanLine(CompressedScanLineBlock {
                    compressed_pixels: compressed_data,
                    y_coordinate: usize_to_i32(index.pixel_position.y(), "block y position")?
                        + header.own_attributes.data_position.y(),
                }),

                BlockDescription::Tiles(_) => CompressedBlock::Tile(CompressedTileBlock {
                    compressed_pixels: compressed_data,
                    coordinates: tile_coordinates,
                }),
            },
        })
    }
}


impl DeepBlock {

    /// Decompress a deep chunk. The sample-count table and the sample
    /// data are compressed independently with the same method.
    pub fn decompress_chunk(chunk: Chunk, meta_data: &MetaData, context: &CodecContext, pedantic: bool) -> Result<Self> {
        let header: &Header = meta_data.headers.get(chunk.part_index)
            .ok_or_else(|| Error::invalid("chunk part index"))?;

        if !header.deep {
            return Err(Error::invalid("flat chunk decoded as deep block"));
        }

        let tile_coordinates = header.get_block_data_indices(&chunk.block.locator())?;
        let relative_bounds = header.get_absolute_block_pixel_coordinates(tile_coordinates)?;

        let index = BlockIndex {
            part: chunk.part_index,
            pixel_position: relative_bounds.position.to_usize("block position")?,
            pixel_size: relative_bounds.size,
            level: tile_coordinates.level_index,
        };

        let (offset_table_bytes, sample_bytes, decompressed_sample_size) = match chunk.block {
            CompressedBlock::DeepScanLine(CompressedDeepScanLineBlock {
                compressed_pixel_offset_table, compressed_sample_data, decompressed_sample_data_size, ..
            }) => (compressed_pixel_offset_table, compressed_sample_data, decompressed_sample_data_size),

            CompressedBlock::DeepTile(CompressedDeepTileBlock {
                compressed_pixel_offset_table, compressed_sample_data, decompressed_sample_data_size, ..
            }) => (compressed_pixel_offset_table, compressed_sample_data, decompressed_sample_data_size),

            _ => return Err(Error::invalid("flat chunk decoded as deep block")),
        };

        let pixel_count = relative_bounds.size.area();
        let table_byte_size = pixel_count * i32::BYTE_SIZE;

        context.check_allocation(table_byte_size)?;
        context.check_allocation(decompressed_sample_size)?;

        let table_bytes = decompress_deep_bytes(
            header, offset_table_bytes, table_byte_size, pedantic
        )?;

        let mut cumulative_sample_counts = vec![0_i32; pixel_count];
        i32::read_slice(&mut table_bytes.as_slice(), &mut cumulative_sample_counts)?;

        if cumulative_sample_counts.iter().any(|&count| count < 0) {
            return Err(Error::invalid("negative deep sample count"));
        }

        let sample_data = decompress_deep_bytes(
            header, sample_bytes, decompressed_sample_size, pedantic
        )?;

        Ok(DeepBlock { index, cumulative_sample_counts, sample_data })
    }

    /// Consume this block by compressing it into a deep `Chunk`.
    pub fn compress_to_chunk(self, headers: &[Header]) -> Result<Chunk> {
        let DeepBlock { index, cumulative_sample_counts, sample_data } = self;

        let header: &Header = headers.get(index.part)
            .ok_or_else(|| Error::invalid("block part index"))?;

        if !header.deep {
            return Err(Error::invalid("deep block written to flat part"));
        }

        if cumulative_sample_counts.len() != index.pixel_size.area() {
            return Err(Error::invalid("deep sample table does not match the block dimensions"));
        }

        let mut table_bytes = Vec::with_capacity(cumulative_sample_counts.len() * i32::BYTE_SIZE);
        i32::write_slice(&mut table_bytes, &cumulative_sample_counts)?;

        let decompressed_sample_data_size = sample_data.len();
        let compressed_pixel_offset_table = compress_deep_bytes(header, table_bytes)?;
        let compressed_sample_data = compress_deep_bytes(header, sample_data)?;

        let y_coordinate = usize_to_i32(index.pixel_position.y(), "block y position")?
            + header.own_attributes.data_position.y();

        Ok(Chunk {
            part_index: index.part,
            block: match header.blocks {
                BlockDescription::ScanLines => CompressedBlock::DeepScanLine(CompressedDeepScanLineBlock {
                    y_coordinate,
                    decompressed_sample_data_size,
                    compressed_pixel_offset_table,
                    compressed_sample_data,
                }),

                BlockDescription::Tiles(_) => CompressedBlock::DeepTile(CompressedDeepTileBlock {
                    coordinates: TileCoordinates {
                        tile_index: index.pixel_position / header.max_block_pixel_size(),
                        level_index: index.level,
                    },
                    decompressed_sample_data_size,
                    compressed_pixel_offset_table,
                    compressed_sample_data,
                }),
            },
        })
    }

    /// The number of samples of each pixel in this block, in row-major order.
    pub fn sample_counts(&self) -> impl '_ + Iterator<Item = usize> {
        let width = self.index.pixel_size.width();

        self.cumulative_sample_counts.iter().enumerate().map(move |(index, &cumulative)| {
            let previous =
                if index % width == 0 { 0 } // the table restarts on every scan line
                else { self.cumulative_sample_counts[index - 1] };

            i32_to_usize(cumulative.saturating_sub(previous).max(0), "sample count")
                .unwrap_or(0)
        })
    }
}

// deep data is restricted to the byte-oriented compression methods,
// which need no pixel layout information
fn decompress_deep_bytes(header: &Header, bytes: ByteVec, expected_size: usize, pedantic: bool) -> Result<ByteVec> {
    header.compression.decompress_bytes(bytes, expected_size, pedantic)
}

fn compress_deep_bytes(header: &Header, bytes: ByteVec) -> Result<ByteVec> {
    header.compression.compress_bytes(bytes)
}


/// Iterate over the block indices of all blocks in the image,
/// in the order the chunks must appear in the file.
/// The yielded index is the position within the part,
/// counted in increasing-y order.
pub fn enumerate_ordered_header_block_indices(headers: &[Header])
    -> impl '_ + Iterator<Item = (usize, BlockIndex)>
{
    headers.iter().enumerate().flat_map(|(part_index, header)| {
        header.enumerate_ordered_blocks().map(move |(index_in_header, tile)| {
            let data_indices = header.get_absolute_block_pixel_coordinates(tile.location)
                .expect("tile coordinate bug");

            let block = BlockIndex {
                part: part_index,
                level: tile.location.level_index,
                pixel_position: data_indices.position.to_usize("data index start")
                    .expect("data index bug"),
                pixel_size: data_indices.size,
            };

            (index_in_header, block)
        })
    })
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::compression::Compression;
    use crate::meta::attribute::{ChannelDescription, SampleType, Text, LineOrder};

    fn example_header(compression: Compression, size: Vec2<usize>) -> Header {
        Header::new(
            Text::new("main").unwrap(),
            size,
            smallvec![
                ChannelDescription::new(Text::new("G").unwrap(), SampleType::F16, false),
            ],
        ).with_encoding(compression, BlockDescription::ScanLines, LineOrder::Increasing)
    }

    #[test]
    fn compress_decompress_chunk_roundtrip() {
        let header = example_header(Compression::ZIP, Vec2(17, 35));
        let meta = MetaData::new(smallvec![header]);
        let context = CodecContext::new();

        let block_index = BlockIndex {
            part: 0,
            pixel_position: Vec2(0, 16),
            pixel_size: Vec2(17, 16),
            level: Vec2(0, 0),
        };

        let data: ByteVec = (0 .. 17 * 16 * 2).map(|index| (index % 251) as u8).collect();

        let chunk = UncompressedBlock { index: block_index, data: data.clone() }
            .compress_to_chunk(&meta.headers).unwrap();

        assert!(matches!(
            chunk.block,
            CompressedBlock::ScanLine(CompressedScanLineBlock { y_coordinate: 16, .. })
        ));

        let block = UncompressedBlock::decompress_chunk(chunk, &meta, &context, true).unwrap();
        assert_eq!(block.index, block_index);
        assert_eq!(block.data, data);
    }

    #[test]
    fn memory_limit_rejects_huge_blocks_before_decoding() {
        let header = example_header(Compression::ZIP, Vec2(4096, 64));
        let meta = MetaData::new(smallvec![header]);
        let small_context = CodecContext::new().with_max_allocation(512);

        let data: ByteVec = vec![0_u8; 4096 * 16 * 2];
        let chunk = UncompressedBlock {
            index: BlockIndex {
                part: 0,
                pixel_position: Vec2(0, 0),
                pixel_size: Vec2(4096, 16),
                level: Vec2(0, 0),
            },
            data,
        }.compress_to_chunk(&meta.headers).unwrap();

        assert!(matches!(
            UncompressedBlock::decompress_chunk(chunk, &meta, &small_context, true),
            Err(Error::MemoryLimit { .. })
        ));
    }

    #[test]
    fn block_ordering_respects_line_order() {
        let increasing = example_header(Compression::ZIP, Vec2(8, 48));
        let blocks: Vec<usize> = increasing.enumerate_ordered_blocks()
            .map(|(index, _)| index).collect();
        assert_eq!(blocks, vec![0, 1, 2]);

        let mut decreasing = example_header(Compression::ZIP, Vec2(8, 48));
        decreasing.line_order = LineOrder::Decreasing;

        let blocks: Vec<usize> = decreasing.enumerate_ordered_blocks()
            .map(|(index, _)| index).collect();
        assert_eq!(blocks, vec![2, 1, 0]);
    }

    #[test]
    fn deep_sample_counts_restart_per_scan_line() {
        let block = DeepBlock {
            index: BlockIndex {
                part: 0,
                pixel_position: Vec2(0, 0),
                pixel_size: Vec2(3, 2),
                level: Vec2(0, 0),
            },
            cumulative_sample_counts: vec![2, 2, 5, 1, 1, 1],
            sample_data: Vec::new(),
        };

        let counts: Vec<usize> = block.sample_counts().collect();
        assert_eq!(counts, vec![2, 0, 3, 1, 0, 0]);
    }
}
