
//! Describes all meta data possible in an exr file:
//! the magic number, the version word, and one header per part.

pub mod attribute;
pub mod header;

use smallvec::SmallVec;
use std::collections::HashSet;

use crate::error::{Error, Result, UnitResult, u64_to_usize};
use crate::io::{Data, PeekRead, Read, Write};
use crate::math::{RoundingMode, Vec2};
use crate::compression::Compression;
use crate::meta::attribute::{TileDescription, LevelMode};
use crate::meta::header::Header;
use crate::block::chunk::TileCoordinates;


/// The complete meta data of an exr file: the feature requirements
/// and one header for each part.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaData {

    /// The flags summarizing the features a reader
    /// must support to decode this file.
    pub requirements: Requirements,

    /// One header for each part of the file.
    pub headers: Headers,
}

/// List of `Header`s.
pub type Headers = SmallVec<[Header; 3]>;

/// List of `OffsetTable`s.
pub type OffsetTables = SmallVec<[OffsetTable; 3]>;

/// For each part, one absolute byte offset into the file per chunk,
/// ordered as if the line order were increasing.
/// Enables loading single chunks without scanning the whole file.
pub type OffsetTable = Vec<u64>;

/// A summary of the features that must be supported to read a file.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct Requirements {

    /// The file format version. This library reads and writes version 2.
    pub file_format_version: u8,

    /// If true, the file contains a single tiled part.
    pub is_single_part_and_tiled: bool,

    /// Whether the file contains names longer than 31 bytes.
    /// No name is ever longer than 255 bytes.
    pub has_long_names: bool,

    /// Whether any part of the file contains deep data.
    pub has_deep_data: bool,

    /// Whether the file contains multiple parts.
    pub has_multiple_parts: bool,
}

/// Locates one chunk within a part: the tile or block index,
/// the level, and the pixel size of the covered area.
#[derive(Copy, Clone, Debug, Hash, Eq, PartialEq)]
pub struct TileIndices {

    /// Index of the tile or scan line block.
    pub location: TileCoordinates,

    /// Pixel size of the covered area, which is smaller
    /// than the tile size at the image boundary.
    pub size: Vec2<usize>,
}

/// Whether a part stores its pixels as scan line blocks or as tiles.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BlockDescription {

    /// The part is divided into blocks of consecutive scan lines.
    /// The number of scan lines per block depends on the compression method.
    ScanLines,

    /// The part is divided into tiles, possibly with resolution levels.
    Tiles(TileDescription),
}

impl BlockDescription {

    /// Whether this part is tiled. If false, it has scan line blocks.
    pub fn has_tiles(&self) -> bool {
        matches!(self, BlockDescription::Tiles { .. })
    }
}


/// The first four bytes of each exr file.
pub mod magic_number {
    use super::*;

    /// The first four bytes of each exr file.
    pub const BYTES: [u8; 4] = [0x76, 0x2f, 0x31, 0x01];

    /// Without validation, write the magic number to the byte stream.
    pub fn write(write: &mut impl Write) -> UnitResult {
        u8::write_slice(write, &self::BYTES)
    }

    /// Consume four bytes from the reader and check the file signature.
    pub fn validate_exr(read: &mut impl Read) -> UnitResult {
        let mut magic_num = [0; 4];
        u8::read_slice(read, &mut magic_num).map_err(|_| Error::Magic)?;

        if magic_num == self::BYTES { Ok(()) }
        else { Err(Error::Magic) }
    }
}

/// A `0_u8` that terminates a sequence, for example the attributes of a header.
pub mod sequence_end {
    use super::*;

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        1
    }

    /// Without validation, write the terminator to the byte stream.
    pub fn write<W: Write>(write: &mut W) -> UnitResult {
        0_u8.write(write)
    }

    /// Peek the next byte. If it is zero, consume it and return true.
    pub fn has_come(read: &mut PeekRead<impl Read>) -> Result<bool> {
        Ok(read.skip_if_eq(0)?)
    }
}


/// Compute the number of blocks required to contain the specified
/// number of pixels, counting the partial block at the boundary.
pub fn compute_block_count(full_res: usize, block_size: usize) -> usize {
    RoundingMode::Up.divide(full_res, block_size)
}

/// Compute the start position and size of a block inside a dimension.
#[inline]
pub fn calculate_block_position_and_size(total_size: usize, block_size: usize, block_index: usize) -> Result<(usize, usize)> {
    let block_position = block_size * block_index;

    if block_position >= total_size {
        return Err(Error::invalid("block index"));
    }

    Ok((block_position, block_size.min(total_size - block_position)))
}

/// Calculate the number of mip levels for the specified resolution.
pub fn compute_level_count(round: RoundingMode, full_res: usize) -> usize {
    round.log2(full_res) + 1
}

/// Calculate the resolution of one mip level.
pub fn compute_level_size(round: RoundingMode, full_res: usize, level_index: usize) -> usize {
    debug_assert!(level_index < std::mem::size_of::<usize>() * 8, "level index too large");
    round.divide(full_res, 1 << level_index).max(1)
}

/// Iterate over all mip map resolutions of the specified size,
/// including the level indices, in the order they appear in the file.
pub fn mip_map_levels(round: RoundingMode, max_resolution: Vec2<usize>)
    -> impl Iterator<Item = (usize, Vec2<usize>)>
{
    mip_map_indices(round, max_resolution).map(move |level_index| {
        (
            level_index,
            Vec2(
                compute_level_size(round, max_resolution.width(), level_index),
                compute_level_size(round, max_resolution.height(), level_index),
            ),
        )
    })
}

/// Iterate over all rip map resolutions of the specified size,
/// including the level indices, in the order they appear in the file.
pub fn rip_map_levels(round: RoundingMode, max_resolution: Vec2<usize>)
    -> impl Iterator<Item = (Vec2<usize>, Vec2<usize>)>
{
    rip_map_indices(round, max_resolution).map(move |level_indices| {
        (
            level_indices,
            Vec2(
                compute_level_size(round, max_resolution.width(), level_indices.x()),
                compute_level_size(round, max_resolution.height(), level_indices.y()),
            ),
        )
    })
}

/// Iterate over all mip map level indices of the specified size.
pub fn mip_map_indices(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item = usize> {
    0 .. compute_level_count(round, max_resolution.width().max(max_resolution.height()))
}

/// Iterate over all rip map level indices of the specified size.
pub fn rip_map_indices(round: RoundingMode, max_resolution: Vec2<usize>) -> impl Iterator<Item = Vec2<usize>> {
    let (width, height) = (
        compute_level_count(round, max_resolution.width()),
        compute_level_count(round, max_resolution.height()),
    );

    (0 .. height).flat_map(move |y_level| {
        (0 .. width).map(move |x_level| Vec2(x_level, y_level))
    })
}

/// Compute the number of chunks a part is divided into:
/// for scan line parts, the number of line blocks; for tiled parts,
/// the tile count summed over all resolution levels.
pub fn compute_chunk_count(compression: Compression, data_size: Vec2<usize>, blocks: BlockDescription) -> usize {
    match blocks {
        BlockDescription::Tiles(tiles) => {
            let round = tiles.rounding_mode;
            let Vec2(tile_width, tile_height) = tiles.tile_size;

            match tiles.level_mode {
                LevelMode::Singular => {
                    compute_block_count(data_size.width(), tile_width)
                        * compute_block_count(data_size.height(), tile_height)
                },

                LevelMode::MipMap => {
                    mip_map_levels(round, data_size).map(|(_, Vec2(level_width, level_height))| {
                        compute_block_count(level_width, tile_width) * compute_block_count(level_height, tile_height)
                    }).sum()
                },

                LevelMode::RipMap => {
                    rip_map_levels(round, data_size).map(|(_, Vec2(level_width, level_height))| {
                        compute_block_count(level_width, tile_width) * compute_block_count(level_height, tile_height)
                    }).sum()
                },
            }
        },

        // scan line blocks never have resolution levels
        BlockDescription::ScanLines => {
            compute_block_count(data_size.height(), compression.scan_lines_per_block())
        },
    }
}


impl Requirements {

    /// Infer the version requirements from the headers.
    pub fn infer(headers: &[Header]) -> Self {
        let is_multipart = headers.len() > 1;

        let first_part_tiled = headers.first()
            .map_or(false, |header| header.blocks.has_tiles());

        let has_deep_data = headers.iter().any(|header| header.deep);

        let mut has_long_names = false;
        for header in headers {
            for name in header.own_attributes.custom.keys()
                .chain(header.shared_attributes.custom.keys())
                .chain(header.channels.list.iter().map(|channel| &channel.name))
            {
                let _ = name.validate_name(Some(&mut has_long_names));
            }
        }

        Requirements {
            file_format_version: 2,
            is_single_part_and_tiled: !is_multipart && !has_deep_data && first_part_tiled,
            has_long_names,
            has_deep_data,
            has_multiple_parts: is_multipart,
        }
    }

    /// Is this file declared to contain multiple parts?
    pub fn is_multipart(&self) -> bool {
        self.has_multiple_parts
    }

    /// Read the version word without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        use bit_field::BitField;

        let version_and_flags = u32::read(read)?;

        // the eight least significant bits contain the file format version
        let version = (version_and_flags & 0x00ff) as u8;

        let is_single_tile = version_and_flags.get_bit(9);
        let has_long_names = version_and_flags.get_bit(10);
        let has_deep_data = version_and_flags.get_bit(11);
        let has_multiple_parts = version_and_flags.get_bit(12);

        // all other bits are reserved and must be zero. a file with
        // any of them set uses a feature this implementation cannot know
        if version_and_flags >> 13 != 0 || version_and_flags.get_bit(8) {
            return Err(Error::Version("unknown feature flags".into()));
        }

        Ok(Requirements {
            file_format_version: version,
            is_single_part_and_tiled: is_single_tile,
            has_long_names,
            has_deep_data,
            has_multiple_parts: has_multiple_parts,
        })
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        use bit_field::BitField;

        let mut version_and_flags = self.file_format_version as u32;

        version_and_flags.set_bit(9, self.is_single_part_and_tiled);
        version_and_flags.set_bit(10, self.has_long_names);
        version_and_flags.set_bit(11, self.has_deep_data);
        version_and_flags.set_bit(12, self.has_multiple_parts);

        version_and_flags.write(write)
    }

    /// Validate this instance.
    pub fn validate(&self) -> UnitResult {
        if let 1 ..= 2 = self.file_format_version {
            match (
                self.is_single_part_and_tiled, self.has_deep_data,
                self.has_multiple_parts, self.file_format_version,
            ) {
                // a single scan line part
                (false, false, false, 1 ..= 2) => Ok(()),

                // a single tiled part
                (true, false, false, 1 ..= 2) => Ok(()),

                // multiple parts, new in version 2
                (false, false, true, 2) => Ok(()),

                // a single deep part, new in version 2
                (false, true, false, 2) => Ok(()),

                // multiple parts with deep data, new in version 2
                (false, true, true, 2) => Ok(()),

                _ => Err(Error::Version("invalid feature flag combination".into())),
            }
        }
        else {
            Err(Error::Version("file version newer than 2.0".into()))
        }
    }
}


impl MetaData {

    /// Infer the version requirements from the headers.
    pub fn new(headers: Headers) -> Self {
        MetaData {
            requirements: Requirements::infer(headers.as_slice()),
            headers,
        }
    }

    /// Read the exr meta data from a byte source, leaving the reader
    /// positioned right behind the headers. Does not validate.
    pub fn read_unvalidated_from_buffered_peekable(
        read: &mut PeekRead<impl Read>, pedantic: bool,
    ) -> Result<Self> {
        magic_number::validate_exr(read)?;

        let requirements = Requirements::read(read)?;
        let headers = Header::read_all(read, &requirements, pedantic)?;

        Ok(MetaData { requirements, headers })
    }

    /// Read the exr meta data from a byte source and validate it.
    pub fn read_validated_from_buffered_peekable(
        read: &mut PeekRead<impl Read>, pedantic: bool,
    ) -> Result<Self> {
        let meta_data = Self::read_unvalidated_from_buffered_peekable(read, pedantic)?;

        // relaxed validation by default, so slightly invalid files
        // that can still be read are not rejected
        meta_data.validate(pedantic)?;
        Ok(meta_data)
    }

    /// Validate and then write the magic number, the version word,
    /// and all headers to the byte stream.
    pub fn write_validating_to_buffered(&self, write: &mut impl Write, pedantic: bool) -> UnitResult {
        // always validate pedantically when writing, so this
        // library does not produce files other readers reject
        self.validate(pedantic)?;

        magic_number::write(write)?;
        self.requirements.write(write)?;
        Header::write_all(self.headers.as_slice(), write, self.requirements.has_multiple_parts)?;
        Ok(())
    }

    /// Read one offset table from the reader for each header.
    pub fn read_offset_tables(read: &mut PeekRead<impl Read>, headers: &Headers) -> Result<OffsetTables> {
        headers.iter()
            .map(|header| u64::read_vec(
                read, header.chunk_count,
                u16::MAX as usize, None,
                "offset table length"
            ))
            .collect()
    }

    /// Skip the offset tables by advancing the reader by the table byte size.
    pub fn skip_offset_tables(read: &mut PeekRead<impl Read>, headers: &Headers) -> Result<usize> {
        let chunk_count: usize = headers.iter().map(|header| header.chunk_count).sum();
        crate::io::skip_bytes(read, (chunk_count * u64::BYTE_SIZE) as u64)?;
        Ok(chunk_count)
    }

    /// Validate this meta data. Returns an upper bound
    /// for the number of pixel bytes in the whole file.
    pub fn validate(&self, strict: bool) -> UnitResult {
        self.requirements.validate()?;

        let part_count = self.headers.len();

        if part_count == 0 {
            return Err(Error::header("at least one part is required"));
        }

        // a multi-part file is allowed to contain a single part,
        // but multiple parts require the multipart flag
        if !self.requirements.has_multiple_parts && part_count > 1 {
            return Err(Error::header("multiple parts without the multipart flag"));
        }

        if !self.requirements.has_deep_data && self.headers.iter().any(|header| header.deep) {
            return Err(Error::header("deep part without the deep data flag"));
        }

        for header in &self.headers {
            header.validate(&self.requirements, strict)?;
        }

        // parts must have unique names
        if part_count > 1 {
            let mut part_names = HashSet::with_capacity(part_count);
            for header in &self.headers {
                if !part_names.insert(&header.own_attributes.name) {
                    return Err(Error::header("duplicate part name"));
                }
            }
        }

        if strict && part_count > 1 {
            // check the attributes that must not differ between parts
            let first_header = self.headers.first().expect("part count checked above");

            for header in &self.headers[1 ..] {
                if header.shared_attributes != first_header.shared_attributes {
                    return Err(Error::header(
                        "display window, pixel aspect, chromaticities, \
                         and time code must be equal for all parts"
                    ));
                }
            }
        }

        Ok(())
    }
}


/// Validate that each offset in each table points behind the headers
/// and inside the file's possible pixel data range.
pub fn validate_offset_tables(headers: &[Header], offset_tables: &OffsetTables, chunks_start_byte: usize) -> UnitResult {
    let max_pixel_bytes: usize = headers.iter()
        .map(|header| header.max_pixel_file_bytes())
        .sum();

    // check that each offset is within the bounds
    let end_byte = chunks_start_byte + max_pixel_bytes;

    for &offset in offset_tables.iter().flatten() {
        let offset = u64_to_usize(offset, "chunk offset")?;

        if offset < chunks_start_byte || offset > end_byte {
            return Err(Error::invalid("offset table entry"));
        }
    }

    Ok(())
}


/// A missing chunk offset within an offset table is encoded as zero.
/// Tables with such entries appear in aborted writes
/// and can be reconstructed by scanning the chunks.
pub fn offset_table_is_complete(tables: &OffsetTables) -> bool {
    tables.iter().flatten().all(|&offset| offset != 0)
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::meta::attribute::*;
    use crate::meta::header::{ImageAttributes, LayerAttributes};
    use crate::math::Vec2;

    fn example_header(name: &str) -> Header {
        Header::new(
            Text::new(name).unwrap(),
            Vec2(100, 100),
            smallvec![
                ChannelDescription::new(Text::new("B").unwrap(), SampleType::F16, false),
                ChannelDescription::new(Text::new("G").unwrap(), SampleType::F16, false),
                ChannelDescription::new(Text::new("R").unwrap(), SampleType::F16, false),
            ],
        )
    }

    #[test]
    fn round_trip_requirements() {
        let requirements = Requirements {
            file_format_version: 2,
            is_single_part_and_tiled: true,
            has_long_names: false,
            has_deep_data: false,
            has_multiple_parts: false,
        };

        let mut bytes = Vec::new();
        requirements.write(&mut bytes).unwrap();
        let read_back = Requirements::read(&mut bytes.as_slice()).unwrap();
        assert_eq!(requirements, read_back);
    }

    #[test]
    fn unknown_version_flags_are_rejected() {
        let mut bytes = Vec::new();
        0x4000_0002_u32.write(&mut bytes).unwrap(); // version 2 with reserved bit 30
        assert!(matches!(Requirements::read(&mut bytes.as_slice()), Err(Error::Version(_))));
    }

    #[test]
    fn round_trip_metadata() {
        let meta = MetaData::new(smallvec![
            example_header("main")
                .with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing)
        ]);

        let mut bytes = Vec::new();
        meta.write_validating_to_buffered(&mut bytes, true).unwrap();

        let read_back = MetaData::read_validated_from_buffered_peekable(
            &mut PeekRead::new(bytes.as_slice()), true
        ).unwrap();

        assert_eq!(meta.requirements, read_back.requirements);
        assert_eq!(meta.headers, read_back.headers);
    }

    #[test]
    fn round_trip_metadata_with_optional_attributes() {
        let mut header = example_header("beauty")
            .with_encoding(Compression::PIZ, BlockDescription::ScanLines, LineOrder::Increasing);

        header.own_attributes = LayerAttributes {
            comments: Some(Text::new("a test image").unwrap()),
            exposure: Some(0.5),
            frames_per_second: Some((24, 1)),
            multi_view_names: Some(vec![
                Text::new("left").unwrap(),
                Text::new("right").unwrap(),
            ]),
            ..LayerAttributes::named(Text::new("beauty").unwrap())
        };

        header.shared_attributes = ImageAttributes {
            pixel_aspect: 1.5,
            time_code: Some(TimeCode { time_and_flags: 99, user_data: 1 }),
            ..ImageAttributes::with_size(Vec2(100, 100))
        };

        header.own_attributes.custom.insert(
            Text::new("customString").unwrap(),
            AttributeValue::Text(Text::new("custom value").unwrap()),
        );

        let meta = MetaData::new(smallvec![header]);

        let mut bytes = Vec::new();
        meta.write_validating_to_buffered(&mut bytes, true).unwrap();

        let read_back = MetaData::read_validated_from_buffered_peekable(
            &mut PeekRead::new(bytes.as_slice()), true
        ).unwrap();

        assert_eq!(meta.headers, read_back.headers);
    }

    #[test]
    fn round_trip_multipart_metadata() {
        let meta = MetaData::new(smallvec![
            example_header("first")
                .with_encoding(Compression::RLE, BlockDescription::ScanLines, LineOrder::Increasing),

            example_header("second")
                .with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing),
        ]);

        assert!(meta.requirements.has_multiple_parts);

        let mut bytes = Vec::new();
        meta.write_validating_to_buffered(&mut bytes, true).unwrap();

        let read_back = MetaData::read_validated_from_buffered_peekable(
            &mut PeekRead::new(bytes.as_slice()), true
        ).unwrap();

        assert_eq!(meta.headers, read_back.headers);
    }

    #[test]
    fn duplicate_part_names_are_rejected() {
        let meta = MetaData::new(smallvec![
            example_header("twin"), example_header("twin"),
        ]);

        assert!(meta.validate(false).is_err());
    }

    #[test]
    fn scan_line_chunk_counts() {
        assert_eq!(
            compute_chunk_count(Compression::ZIP, Vec2(64, 100), BlockDescription::ScanLines),
            7 // ceil(100 / 16)
        );

        assert_eq!(
            compute_chunk_count(Compression::PIZ, Vec2(64, 100), BlockDescription::ScanLines),
            4 // ceil(100 / 32)
        );

        assert_eq!(
            compute_chunk_count(Compression::Uncompressed, Vec2(64, 100), BlockDescription::ScanLines),
            100
        );
    }

    #[test]
    fn mip_map_chunk_counts() {
        // a 1024² image with 64² tiles has 11 levels,
        // summing to 347 tiles over all levels
        let tiles = TileDescription {
            tile_size: Vec2(64, 64),
            level_mode: LevelMode::MipMap,
            rounding_mode: RoundingMode::Down,
        };

        let level_sizes: Vec<usize> = mip_map_levels(RoundingMode::Down, Vec2(1024, 1024))
            .map(|(_, size)| size.width())
            .collect();

        assert_eq!(level_sizes, vec![1024, 512, 256, 128, 64, 32, 16, 8, 4, 2, 1]);

        assert_eq!(
            compute_chunk_count(Compression::ZIP, Vec2(1024, 1024), BlockDescription::Tiles(tiles)),
            347
        );
    }

    #[test]
    fn rip_map_chunk_counts() {
        let tiles = TileDescription {
            tile_size: Vec2(32, 32),
            level_mode: LevelMode::RipMap,
            rounding_mode: RoundingMode::Down,
        };

        // 64x32 pixels: x levels 64,32,16,8,4,2,1 (7), y levels 32,16,8,4,2,1 (6)
        // every level combination is at most one tile of 32x32
        let expected: usize = rip_map_levels(RoundingMode::Down, Vec2(64, 32))
            .map(|(_, size)| {
                compute_block_count(size.width(), 32) * compute_block_count(size.height(), 32)
            })
            .sum();

        assert_eq!(
            compute_chunk_count(Compression::ZIP, Vec2(64, 32), BlockDescription::Tiles(tiles)),
            expected
        );

        assert_eq!(expected, 7 * 6 + 6); // only the largest x level needs two tiles
    }
}
