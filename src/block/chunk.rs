
//! Read and write already compressed pixel data blocks.
//! Does not include the process of compression and decompression.

use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32, u64_to_usize, usize_to_u64};
use crate::io::{Data, Read, Write};
use crate::math::Vec2;
use crate::meta::{MetaData, BlockDescription};
use crate::meta::attribute::IntegerBounds;
use crate::meta::header::Header;


/// One atomic unit of compressed pixel data, referencing
/// the part it belongs to. The chunks of a file can appear in any order.
#[derive(Debug, Clone)]
pub struct Chunk {

    /// The index of the part this chunk belongs to.
    pub part_index: usize,

    /// The compressed pixel contents including its locator.
    pub block: CompressedBlock,
}

/// The raw, possibly compressed pixel data of one chunk.
/// The variant depends on the block type of the part.
#[derive(Debug, Clone)]
pub enum CompressedBlock {

    /// A block of flat scan lines.
    ScanLine(CompressedScanLineBlock),

    /// A tile of flat data.
    Tile(CompressedTileBlock),

    /// A block of deep scan lines.
    DeepScanLine(CompressedDeepScanLineBlock),

    /// A tile of deep data.
    DeepTile(CompressedDeepTileBlock),
}

/// Identifies the area a chunk covers, without the level information
/// required for tiles. Used for headers that store either kind of block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkLocator {

    /// A scan line block is located by the y coordinate of its top row,
    /// in the global 2D space.
    ScanLine {

        /// The y coordinate of the first scan line in the block.
        y_coordinate: i32,
    },

    /// A tile is located by its index and level.
    Tile(TileCoordinates),
}

/// A `CompressedBlock` of flat scan lines.
/// Corresponds to the type attribute `scanlineimage`.
#[derive(Debug, Clone)]
pub struct CompressedScanLineBlock {

    /// The y coordinate of the first scan line in this block,
    /// in the global 2D space. Aligned to the data window
    /// and the blocks above it.
    pub y_coordinate: i32,

    /// The compressed pixel rows, one after another,
    /// with the channels within each row sorted alphabetically.
    pub compressed_pixels: Vec<u8>,
}

/// A `CompressedBlock` of one flat tile.
/// Corresponds to the type attribute `tiledimage`.
#[derive(Debug, Clone)]
pub struct CompressedTileBlock {

    /// The tile index and resolution level.
    pub coordinates: TileCoordinates,

    /// The compressed pixel rows of this tile.
    pub compressed_pixels: Vec<u8>,
}

/// Indicates the position and resolution level of a tile.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct TileCoordinates {

    /// Index of the tile, not a pixel position.
    pub tile_index: Vec2<usize>,

    /// Index of the mip or rip level.
    pub level_index: Vec2<usize>,
}

/// A `CompressedBlock` of deep scan lines.
/// Corresponds to the type attribute `deepscanline`.
#[derive(Debug, Clone)]
pub struct CompressedDeepScanLineBlock {

    /// The y coordinate of the first scan line in this block.
    pub y_coordinate: i32,

    /// Byte size of the decompressed sample data.
    pub decompressed_sample_data_size: usize,

    /// The compressed table declaring, for each pixel of this block,
    /// the cumulative number of samples up to and including that pixel.
    pub compressed_pixel_offset_table: Vec<u8>,

    /// The compressed deep samples of all pixels.
    pub compressed_sample_data: Vec<u8>,
}

/// A `CompressedBlock` of one deep tile.
/// Corresponds to the type attribute `deeptile`.
#[derive(Debug, Clone)]
pub struct CompressedDeepTileBlock {

    /// The tile index and resolution level.
    pub coordinates: TileCoordinates,

    /// Byte size of the decompressed sample data.
    pub decompressed_sample_data_size: usize,

    /// The compressed table declaring, for each pixel of this tile,
    /// the cumulative number of samples up to and including that pixel.
    pub compressed_pixel_offset_table: Vec<u8>,

    /// The compressed deep samples of all pixels.
    pub compressed_sample_data: Vec<u8>,
}


impl TileCoordinates {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        usize_to_i32(self.tile_index.x(), "tile index")?.write(write)?;
        usize_to_i32(self.tile_index.y(), "tile index")?.write(write)?;
        usize_to_i32(self.level_index.x(), "level index")?.write(write)?;
        usize_to_i32(self.level_index.y(), "level index")?.write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read) -> Result<Self> {
        let tile_x = i32::read(read)?;
        let tile_y = i32::read(read)?;

        let level_x = i32::read(read)?;
        let level_y = i32::read(read)?;

        if level_x > 31 || level_y > 31 {
            // a level of 32 would mean a resolution of 2^32,
            // which exceeds the maximum 32-bit integer value
            return Err(Error::invalid("level index exceeds integer maximum"));
        }

        Ok(TileCoordinates {
            tile_index: Vec2(
                i32_to_usize(tile_x, "tile coordinate index")?,
                i32_to_usize(tile_y, "tile coordinate index")?,
            ),
            level_index: Vec2(
                i32_to_usize(level_x, "tile coordinate level")?,
                i32_to_usize(level_y, "tile coordinate level")?,
            ),
        })
    }

    /// The pixel rectangle this tile covers within its level.
    /// Starts at zero and is never negative. Tiles at the boundary
    /// are clipped against the level size.
    pub fn to_data_indices(&self, tile_size: Vec2<usize>, level_size: Vec2<usize>) -> Result<IntegerBounds> {
        let position = Vec2(
            self.tile_index.x() * tile_size.width(),
            self.tile_index.y() * tile_size.height(),
        );

        if position.x() >= level_size.x() || position.y() >= level_size.y() {
            return Err(Error::invalid("tile index out of bounds"));
        }

        Ok(IntegerBounds {
            position: Vec2(
                usize_to_i32(position.x(), "tile position")?,
                usize_to_i32(position.y(), "tile position")?,
            ),
            size: Vec2(
                tile_size.width().min(level_size.x() - position.x()),
                tile_size.height().min(level_size.y() - position.y()),
            ),
        })
    }

    /// The rectangle this tile covers in the global 2D space, may be negative.
    pub fn to_absolute_indices(&self, tile_size: Vec2<usize>, data_window: IntegerBounds) -> Result<IntegerBounds> {
        let data = self.to_data_indices(tile_size, data_window.size)?;
        Ok(data.with_origin(data_window.position))
    }

    /// Whether this is the full resolution and not a smaller level.
    pub fn is_largest_resolution_level(&self) -> bool {
        self.level_index == Vec2(0, 0)
    }
}


impl CompressedScanLineBlock {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        debug_assert_ne!(self.compressed_pixels.len(), 0, "empty blocks should not be written");

        self.y_coordinate.write(write)?;
        u8::write_i32_sized_slice(write, &self.compressed_pixels)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read, max_block_byte_size: usize) -> Result<Self> {
        let y_coordinate = i32::read(read)?;
        let compressed_pixels = u8::read_i32_sized_vec(
            read, max_block_byte_size, Some(max_block_byte_size), "scan line block size"
        )?;

        Ok(CompressedScanLineBlock { y_coordinate, compressed_pixels })
    }
}

impl CompressedTileBlock {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        debug_assert_ne!(self.compressed_pixels.len(), 0, "empty blocks should not be written");

        self.coordinates.write(write)?;
        u8::write_i32_sized_slice(write, &self.compressed_pixels)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read, max_block_byte_size: usize) -> Result<Self> {
        let coordinates = TileCoordinates::read(read)?;
        let compressed_pixels = u8::read_i32_sized_vec(
            read, max_block_byte_size, Some(max_block_byte_size), "tile block size"
        )?;

        Ok(CompressedTileBlock { coordinates, compressed_pixels })
    }
}

impl CompressedDeepScanLineBlock {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        debug_assert_ne!(self.compressed_sample_data.len(), 0, "empty blocks should not be written");

        self.y_coordinate.write(write)?;
        usize_to_u64(self.compressed_pixel_offset_table.len()).write(write)?;
        usize_to_u64(self.compressed_sample_data.len()).write(write)?;
        usize_to_u64(self.decompressed_sample_data_size).write(write)?;
        u8::write_slice(write, &self.compressed_pixel_offset_table)?;
        u8::write_slice(write, &self.compressed_sample_data)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read, max_block_byte_size: usize) -> Result<Self> {
        let y_coordinate = i32::read(read)?;
        let compressed_pixel_offset_table_size = u64_to_usize(u64::read(read)?, "deep offset table size")?;
        let compressed_sample_data_size = u64_to_usize(u64::read(read)?, "deep data size")?;
        let decompressed_sample_data_size = u64_to_usize(u64::read(read)?, "deep data size")?;

        let compressed_pixel_offset_table = u8::read_vec(
            read, compressed_pixel_offset_table_size,
            6 * u16::MAX as usize, Some(max_block_byte_size),
            "deep offset table size",
        )?;

        let compressed_sample_data = u8::read_vec(
            read, compressed_sample_data_size,
            6 * u16::MAX as usize, Some(max_block_byte_size),
            "deep data size",
        )?;

        Ok(CompressedDeepScanLineBlock {
            y_coordinate,
            decompressed_sample_data_size,
            compressed_pixel_offset_table,
            compressed_sample_data,
        })
    }
}

impl CompressedDeepTileBlock {

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        debug_assert_ne!(self.compressed_sample_data.len(), 0, "empty blocks should not be written");

        self.coordinates.write(write)?;
        usize_to_u64(self.compressed_pixel_offset_table.len()).write(write)?;
        usize_to_u64(self.compressed_sample_data.len()).write(write)?;
        usize_to_u64(self.decompressed_sample_data_size).write(write)?;
        u8::write_slice(write, &self.compressed_pixel_offset_table)?;
        u8::write_slice(write, &self.compressed_sample_data)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read(read: &mut impl Read, max_block_byte_size: usize) -> Result<Self> {
        let coordinates = TileCoordinates::read(read)?;
        let compressed_pixel_offset_table_size = u64_to_usize(u64::read(read)?, "deep offset table size")?;
        let compressed_sample_data_size = u64_to_usize(u64::read(read)?, "deep data size")?;
        let decompressed_sample_data_size = u64_to_usize(u64::read(read)?, "deep data size")?;

        let compressed_pixel_offset_table = u8::read_vec(
            read, compressed_pixel_offset_table_size,
            6 * u16::MAX as usize, Some(max_block_byte_size),
            "deep offset table size",
        )?;

        let compressed_sample_data = u8::read_vec(
            read, compressed_sample_data_size,
            6 * u16::MAX as usize, Some(max_block_byte_size),
            "deep data size",
        )?;

        Ok(CompressedDeepTileBlock {
            coordinates,
            decompressed_sample_data_size,
            compressed_pixel_offset_table,
            compressed_sample_data,
        })
    }
}


impl CompressedBlock {

    /// The locator of this block, disregarding the level of tiles.
    pub fn locator(&self) -> ChunkLocator {
        match self {
            CompressedBlock::ScanLine(block) => ChunkLocator::ScanLine { y_coordinate: block.y_coordinate },
            CompressedBlock::DeepScanLine(block) => ChunkLocator::ScanLine { y_coordinate: block.y_coordinate },
            CompressedBlock::Tile(block) => ChunkLocator::Tile(block.coordinates),
            CompressedBlock::DeepTile(block) => ChunkLocator::Tile(block.coordinates),
        }
    }
}

impl Chunk {

    /// Without validation, write this chunk to the byte stream.
    /// The part index is included only for multi-part files.
    pub fn write(&self, write: &mut impl Write, header_count: usize) -> UnitResult {
        debug_assert!(self.part_index < header_count, "part index out of bounds");

        if header_count != 1 {
            usize_to_i32(self.part_index, "part index")?.write(write)?;
        }
        else {
            debug_assert_eq!(self.part_index, 0, "invalid part index of single-part file");
        }

        match self.block {
            CompressedBlock::ScanLine(ref value) => value.write(write),
            CompressedBlock::Tile(ref value) => value.write(write),
            CompressedBlock::DeepScanLine(ref value) => value.write(write),
            CompressedBlock::DeepTile(ref value) => value.write(write),
        }
    }

    /// Read a chunk, using the meta data to interpret its prologue.
    pub fn read(read: &mut impl Read, meta_data: &MetaData) -> Result<Self> {
        let part_index =
            if meta_data.requirements.is_multipart() {
                i32_to_usize(i32::read(read)?, "chunk part index")?
            }
            else { 0 };

        let header: &Header = meta_data.headers.get(part_index)
            .ok_or_else(|| Error::invalid("chunk part index"))?;

        let max_block_byte_size = header.max_block_byte_size() + 64;

        let block = match (header.blocks, header.deep) {
            (BlockDescription::ScanLines, false) =>
                CompressedBlock::ScanLine(CompressedScanLineBlock::read(read, max_block_byte_size)?),

            (BlockDescription::Tiles(_), false) =>
                CompressedBlock::Tile(CompressedTileBlock::read(read, max_block_byte_size)?),

            (BlockDescription::ScanLines, true) =>
                CompressedBlock::DeepScanLine(CompressedDeepScanLineBlock::read(read, max_block_byte_size)?),

            (BlockDescription::Tiles(_), true) =>
                CompressedBlock::DeepTile(CompressedDeepTileBlock::read(read, max_block_byte_size)?),
        };

        Ok(Chunk { part_index, block })
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tile_coordinate_roundtrip() {
        let coordinates = TileCoordinates {
            tile_index: Vec2(3, 19),
            level_index: Vec2(2, 0),
        };

        let mut bytes = Vec::new();
        coordinates.write(&mut bytes).unwrap();

        let read_back = TileCoordinates::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(coordinates, read_back);
    }

    #[test]
    fn oversized_levels_are_rejected() {
        let mut bytes = Vec::new();
        0_i32.write(&mut bytes).unwrap();
        0_i32.write(&mut bytes).unwrap();
        32_i32.write(&mut bytes).unwrap();
        0_i32.write(&mut bytes).unwrap();

        assert!(TileCoordinates::read(&mut bytes.as_slice()).is_err());
    }

    #[test]
    fn partial_boundary_tiles_are_clipped() {
        let tile = TileCoordinates { tile_index: Vec2(1, 1), level_index: Vec2(0, 0) };
        let bounds = tile.to_data_indices(Vec2(64, 64), Vec2(100, 80)).unwrap();

        assert_eq!(bounds.position, Vec2(64, 64));
        assert_eq!(bounds.size, Vec2(36, 16));

        let outside = TileCoordinates { tile_index: Vec2(2, 0), level_index: Vec2(0, 0) };
        assert!(outside.to_data_indices(Vec2(64, 64), Vec2(100, 80)).is_err());
    }
}
