
//! Contains all attribute types that can appear in a header,
//! including their byte-level encoding and decoding.
//! Unknown attribute types survive as raw bytes.

use smallvec::SmallVec;
use std::convert::TryFrom;

use crate::io::{Data, PeekRead, Read, Write};
use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32};
use crate::math::{RoundingMode, Vec2};
use crate::meta::sequence_end;

pub use crate::compression::Compression;


/// Contains one of all possible attribute values,
/// including a variant for unknown attribute types.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {

    /// Channel meta data.
    ChannelList(ChannelList),

    /// Color space definition.
    Chromaticities(Chromaticities),

    /// Compression method of this part.
    Compression(Compression),

    /// This image is an environment map.
    EnvironmentMap(EnvironmentMap),

    /// Film roll information.
    KeyCode(KeyCode),

    /// Order of the chunks in the file.
    LineOrder(LineOrder),

    /// A 3×3 matrix of floats.
    Matrix3x3(Matrix3x3),

    /// A 4×4 matrix of floats.
    Matrix4x4(Matrix4x4),

    /// 8-bit rgba preview of the image.
    Preview(Preview),

    /// An integer dividend and divisor.
    Rational(Rational),

    /// Deep or flat, and scan lines or tiles.
    BlockType(BlockType),

    /// List of texts.
    TextVector(Vec<Text>),

    /// How to tile up the image.
    TileDescription(TileDescription),

    /// Timepoint and flags.
    TimeCode(TimeCode),

    /// A string of byte-chars.
    Text(Text),

    /// 64-bit float.
    F64(f64),

    /// 32-bit float.
    F32(f32),

    /// 32-bit signed integer.
    I32(i32),

    /// 2D integer rectangle.
    IntegerBounds(IntegerBounds),

    /// 2D float rectangle.
    FloatRect(FloatRect),

    /// 2D integer vector.
    IntVec2(Vec2<i32>),

    /// 2D float vector.
    FloatVec2(Vec2<f32>),

    /// 3D integer vector.
    IntVec3((i32, i32, i32)),

    /// 3D float vector.
    FloatVec3((f32, f32, f32)),

    /// An attribute of an unknown type.
    /// Its bytes are preserved and written back verbatim.
    Custom {

        /// The name of the type this attribute is an instance of.
        kind: Text,

        /// The little-endian value bytes.
        bytes: Vec<u8>,
    },
}

/// A byte string where each byte is one char.
/// This is not utf and must be constructed from ascii text.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct Text {
    bytes: TextBytes,
}

/// The raw bytes that make up a string in an exr file.
/// Small strings do not allocate.
type TextBytes = SmallVec<[u8; 24]>;

/// An integer dividend and divisor, together forming a ratio.
pub type Rational = (i32, u32);

/// A float matrix with three rows and three columns.
pub type Matrix3x3 = [f32; 3 * 3];

/// A float matrix with four rows and four columns.
pub type Matrix4x4 = [f32; 4 * 4];


/// Says whether a part contains scan lines or tiles, and flat or deep data.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BlockType {

    /// Corresponds to the string value `scanlineimage`.
    ScanLine,

    /// Corresponds to the string value `tiledimage`.
    Tile,

    /// Corresponds to the string value `deepscanline`.
    DeepScanLine,

    /// Corresponds to the string value `deeptile`.
    DeepTile,
}

/// The string literals representing a `BlockType` in a file.
pub mod block_type_strings {

    /// Type attribute value of flat scan lines.
    pub const SCAN_LINE: &[u8] = b"scanlineimage";

    /// Type attribute value of flat tiles.
    pub const TILE: &[u8] = b"tiledimage";

    /// Type attribute value of deep scan lines.
    pub const DEEP_SCAN_LINE: &[u8] = b"deepscanline";

    /// Type attribute value of deep tiles.
    pub const DEEP_TILE: &[u8] = b"deeptile";
}


/// A rectangular section anywhere in 2D integer space,
/// used for data windows and display windows.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct IntegerBounds {

    /// The top left corner of this rectangle.
    /// The rectangle contains this pixel if the size is not zero.
    pub position: Vec2<i32>,

    /// How many pixels to include in this rectangle.
    /// Does not include the actual boundary, just like `Vec::len()`.
    pub size: Vec2<usize>,
}

/// A rectangular section anywhere in 2D float space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloatRect {

    /// The lower corner.
    pub min: Vec2<f32>,

    /// The upper corner.
    pub max: Vec2<f32>,
}

/// A list of channels. Channels must be sorted alphabetically.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelList {

    /// The channels in this list.
    pub list: SmallVec<[ChannelDescription; 5]>,

    /// The number of bytes that one pixel of all channels needs,
    /// disregarding subsampling.
    pub bytes_per_pixel: usize,

    /// The sample type of all channels, if all channels have the same type.
    pub uniform_sample_type: Option<SampleType>,
}

/// A single channel in a part.
/// Does not contain the actual pixel data, but instead describes it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ChannelDescription {

    /// One of "R", "G", or "B" most of the time.
    /// Dot-separated prefixes form the layer path.
    pub name: Text,

    /// U32, F16 or F32.
    pub sample_type: SampleType,

    /// Whether lossy compression methods should quantize
    /// this channel linearly instead of exponentially.
    /// Should be false for colors and true for alpha or saturation.
    pub quantize_linearly: bool,

    /// A sample is stored only at positions divisible by this factor.
    /// Anything other than `(1, 1)` is only allowed in flat scan line parts.
    pub sampling: Vec2<usize>,
}

/// What kind of samples are in a channel.
#[derive(Clone, Debug, Eq, PartialEq, Copy, Hash)]
pub enum SampleType {

    /// 32-bit unsigned integer samples.
    U32,

    /// 16-bit float samples.
    F16,

    /// 32-bit float samples.
    F32,
}

/// The cie chromaticity coordinates of the primaries and the white point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chromaticities {

    /// "Red" location on the cie chromaticity diagram.
    pub red: Vec2<f32>,

    /// "Green" location on the cie chromaticity diagram.
    pub green: Vec2<f32>,

    /// "Blue" location on the cie chromaticity diagram.
    pub blue: Vec2<f32>,

    /// "White" location on the cie chromaticity diagram.
    pub white: Vec2<f32>,
}

/// If present, describes how the image is projected onto an environment.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EnvironmentMap {

    /// The image is projected like a world map.
    LatitudeLongitude,

    /// The image contains the six sides of a cube.
    Cube,
}

/// Uniquely identifies a motion picture film frame.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct KeyCode {

    /// Identifies the film manufacturer.
    pub film_manufacturer_code: i32,

    /// Identifies the film type.
    pub film_type: i32,

    /// Specifies the film roll prefix.
    pub film_roll_prefix: i32,

    /// Specifies the film count.
    pub count: i32,

    /// Specifies the perforation offset.
    pub perforation_offset: i32,

    /// Perforation count of each single frame.
    pub perforations_per_frame: i32,

    /// Perforation count per foot of film.
    pub perforations_per_count: i32,
}

/// Video timepoint and flags, packed into two 32-bit words.
#[derive(Copy, Debug, Clone, Eq, PartialEq, Hash)]
pub struct TimeCode {

    /// Hours, minutes, seconds, frame and flag fields, packed as in smpte.
    pub time_and_flags: u32,

    /// Eight four-bit user fields.
    pub user_data: u32,
}

/// In what order the chunks of a part appear in the file.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LineOrder {

    /// The chunks are ordered from the top row of the image to the bottom.
    Increasing,

    /// The chunks are ordered from the bottom row of the image to the top.
    Decreasing,

    /// The chunks can appear in any order, typically
    /// in the order they happened to be compressed in.
    Unspecified,
}

/// A small rgba image of `u8` values approximating the real image.
#[derive(Clone, Eq, PartialEq)]
pub struct Preview {

    /// The dimensions of the preview image.
    pub size: Vec2<usize>,

    /// An array with a length of 4 × width × height.
    /// Each pixel consists of the four `u8` values red, green, blue, alpha.
    pub pixel_data: Vec<u8>,
}

/// Describes how a part is divided into tiles, and whether
/// it contains multiple resolution levels.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TileDescription {

    /// The size of each tile, which stays the same across all levels.
    pub tile_size: Vec2<usize>,

    /// Whether to also store smaller versions of the image.
    pub level_mode: LevelMode,

    /// Whether to round up or down when dividing level resolutions.
    pub rounding_mode: RoundingMode,
}

/// Whether to also store increasingly smaller versions of the original image.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum LevelMode {

    /// Only the full resolution is stored.
    Singular,

    /// Levels with the aspect ratio of the image, each half the previous size.
    MipMap,

    /// Levels for all combinations of horizontal and vertical halvings.
    RipMap,
}


fn attribute_type_mismatch() -> Error {
    Error::header("attribute type mismatch")
}


impl Text {

    /// The internal ascii bytes this text is made of.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    /// Create a `Text` from an `str` reference.
    /// Returns `None` if the string contains chars that are not ascii.
    pub fn new(text: impl AsRef<str>) -> Option<Self> {
        let bytes: Option<TextBytes> = text.as_ref().chars()
            .map(|character| u8::try_from(character as u64).ok())
            .collect();

        bytes.map(Self::from_bytes_unchecked)
    }

    /// Create a `Text` from a byte slice, without checking any of the bytes.
    pub fn from_slice_unchecked(text: &[u8]) -> Self {
        Self::from_bytes_unchecked(SmallVec::from_slice(text))
    }

    /// Create a `Text` from bytes, without checking any of the bytes.
    pub fn from_bytes_unchecked(bytes: TextBytes) -> Self {
        Text { bytes }
    }

    /// Whether this text contains no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Check whether a name is valid: non-empty, at most 255 bytes, no nul.
    /// Flags `long_names` when a name is longer than 31 bytes.
    pub fn validate_name(&self, long_names: Option<&mut bool>) -> UnitResult {
        if self.bytes.is_empty() {
            return Err(Error::header("name must not be empty"));
        }

        if self.bytes.contains(&0) {
            return Err(Error::header("name must not contain a null byte"));
        }

        if self.bytes.len() > 255 {
            return Err(Error::header("name must not be longer than 255 bytes"));
        }

        if let Some(long_names) = long_names {
            if self.bytes.len() > 31 { *long_names = true; }
        }

        Ok(())
    }

    /// The byte count this string occupies when encoded with a null-terminator.
    pub fn null_terminated_byte_size(&self) -> usize {
        self.bytes.len() + sequence_end::byte_size()
    }

    /// The byte count this string occupies when encoded with a length prefix.
    pub fn i32_sized_byte_size(&self) -> usize {
        self.bytes.len() + i32::BYTE_SIZE
    }

    /// Write the length of the string and then its contents.
    pub fn write_i32_sized<W: Write>(&self, write: &mut W) -> UnitResult {
        usize_to_i32(self.bytes.len(), "text length")?.write(write)?;
        u8::write_slice(write, self.bytes.as_slice())
    }

    /// Read a length and then that many bytes of content.
    pub fn read_i32_sized<R: Read>(read: &mut R, max_size: usize) -> Result<Self> {
        let size = i32_to_usize(i32::read(read)?, "text length")?;
        let bytes = u8::read_vec(read, size, 1024, Some(max_size), "text length")?;
        Ok(Text::from_bytes_unchecked(SmallVec::from_vec(bytes)))
    }

    /// Read exactly the specified number of bytes of content.
    pub fn read_sized<R: Read>(read: &mut R, size: usize) -> Result<Self> {
        const SMALL_SIZE: usize = 24;

        // for small strings, read into a stack buffer without heap allocation
        if size <= SMALL_SIZE {
            let mut buffer = [0_u8; SMALL_SIZE];
            let data = &mut buffer[.. size];

            read.read_exact(data)?;
            Ok(Text::from_slice_unchecked(data))
        }
        else {
            let bytes = u8::read_vec(read, size, 1024, None, "text length")?;
            Ok(Text::from_bytes_unchecked(SmallVec::from_vec(bytes)))
        }
    }

    /// Write the string contents and a null-terminator.
    pub fn write_null_terminated<W: Write>(&self, write: &mut W) -> UnitResult {
        debug_assert!(!self.bytes.is_empty(), "empty text would terminate the sequence early");

        u8::write_slice(write, self.bytes())?;
        sequence_end::write(write)
    }

    /// Read bytes until the null-terminator is found, then skip the terminator.
    pub fn read_null_terminated<R: Read>(read: &mut R, max_len: usize) -> Result<Self> {
        let mut bytes = smallvec![ u8::read(read)? ]; // null-terminated strings are at least one byte

        loop {
            match u8::read(read)? {
                0 => break,
                non_terminator => bytes.push(non_terminator),
            }

            if bytes.len() > max_len {
                return Err(Error::header("text too long"));
            }
        }

        Ok(Text { bytes })
    }

    /// Read a sequence of length-prefixed strings until the byte budget is used up.
    fn read_vec_of_i32_sized(read: &mut impl Read, total_byte_size: usize) -> Result<Vec<Text>> {
        let mut result = Vec::with_capacity(2);
        let mut processed_bytes = 0;

        while processed_bytes < total_byte_size {
            let text = Text::read_i32_sized(read, total_byte_size)?;
            processed_bytes += text.i32_sized_byte_size();
            result.push(text);
        }

        if processed_bytes != total_byte_size {
            return Err(Error::header("text array byte size"));
        }

        Ok(result)
    }

    fn write_vec_of_i32_sized_texts<W: Write>(write: &mut W, texts: &[Text]) -> UnitResult {
        // the length of the vector is inferred from the attribute byte size
        for text in texts {
            text.write_i32_sized(write)?;
        }

        Ok(())
    }

    /// Iterate over the chars in this text, similar to `String::chars()`.
    pub fn chars(&self) -> impl '_ + Iterator<Item = char> {
        self.bytes.iter().map(|&byte| byte as char)
    }

    /// Compare this text with a plain `&str`.
    pub fn eq_str(&self, string: &str) -> bool {
        string.chars().eq(self.chars())
    }
}

impl<'s> TryFrom<&'s str> for Text {
    type Error = &'static str;

    fn try_from(value: &'s str) -> std::result::Result<Self, Self::Error> {
        Text::new(value).ok_or("exr text does not support unicode characters")
    }
}

impl std::fmt::Debug for Text {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "exr::Text(\"{}\")", self)
    }
}

// automatically implements to_string for us
impl std::fmt::Display for Text {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use std::fmt::Write;

        for &byte in self.bytes.iter() {
            formatter.write_char(byte as char)?;
        }

        Ok(())
    }
}


impl BlockType {

    /// The corresponding attribute type name literal.
    const TYPE_NAME: &'static [u8] = type_names::TEXT;

    /// Return a `BlockType` object from the specified attribute text value.
    pub fn parse(text: Text) -> Result<Self> {
        match text.bytes() {
            block_type_strings::SCAN_LINE => Ok(BlockType::ScanLine),
            block_type_strings::TILE => Ok(BlockType::Tile),
            block_type_strings::DEEP_SCAN_LINE => Ok(BlockType::DeepScanLine),
            block_type_strings::DEEP_TILE => Ok(BlockType::DeepTile),
            _ => Err(Error::header("unknown block type attribute value")),
        }
    }

    /// Whether this block type is a deep data type.
    pub fn is_deep(self) -> bool {
        matches!(self, BlockType::DeepScanLine | BlockType::DeepTile)
    }

    /// Whether this block type is tiled.
    pub fn is_tiled(self) -> bool {
        matches!(self, BlockType::Tile | BlockType::DeepTile)
    }

    /// The raw attribute text value this type is represented by in a file.
    pub fn to_text_bytes(self) -> &'static [u8] {
        match self {
            BlockType::ScanLine => block_type_strings::SCAN_LINE,
            BlockType::Tile => block_type_strings::TILE,
            BlockType::DeepScanLine => block_type_strings::DEEP_SCAN_LINE,
            BlockType::DeepTile => block_type_strings::DEEP_TILE,
        }
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write(self, write: &mut impl Write) -> UnitResult {
        u8::write_slice(write, self.to_text_bytes())
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(self) -> usize {
        self.to_text_bytes().len()
    }
}


impl IntegerBounds {

    /// Create a box with a size starting at zero.
    pub fn from_dimensions(size: impl Into<Vec2<usize>>) -> Self {
        Self::new(Vec2(0, 0), size)
    }

    /// Create a box with a size and an origin point.
    pub fn new(position: impl Into<Vec2<i32>>, size: impl Into<Vec2<usize>>) -> Self {
        Self { position: position.into(), size: size.into() }
    }

    /// Returns the top-right coordinate of the rectangle.
    /// The row and column described by this vector are not included
    /// in the rectangle, just like `Vec::len()`.
    pub fn end(self) -> Vec2<i32> {
        self.position + self.size.to_i32("rectangle size").expect("rectangle size overflow")
    }

    /// Returns the maximum coordinate that a pixel in this rectangle can have.
    pub fn max(self) -> Vec2<i32> {
        self.end() - Vec2(1, 1)
    }

    /// Validate that the coordinates are within range,
    /// and optionally that the size is within the specified maximum.
    pub fn validate(&self, max_size: Option<Vec2<usize>>) -> UnitResult {
        if let Some(max_size) = max_size {
            if self.size.width() > max_size.width() || self.size.height() > max_size.height() {
                return Err(Error::invalid("window attribute dimension value"));
            }
        }

        let max_coordinate = i32::MAX as i64 / 2; // leaves room for size computations

        let end = Vec2(
            self.position.x() as i64 + self.size.width() as i64,
            self.position.y() as i64 + self.size.height() as i64,
        );

        if end.x() >= max_coordinate || end.y() >= max_coordinate
            || self.position.x() as i64 <= -max_coordinate
            || self.position.y() as i64 <= -max_coordinate
        {
            return Err(Error::invalid("window size exceeds the supported range"));
        }

        Ok(())
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        4 * i32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        let Vec2(x_min, y_min) = self.position;
        let Vec2(x_max, y_max) = self.max();

        x_min.write(write)?;
        y_min.write(write)?;
        x_max.write(write)?;
        y_max.write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let x_min = i32::read(read)?;
        let y_min = i32::read(read)?;
        let x_max = i32::read(read)?;
        let y_max = i32::read(read)?;

        if x_min > x_max || y_min > y_max {
            return Err(Error::invalid("box coordinates are not ordered"));
        }

        let min = Vec2(x_min, y_min);
        let max = Vec2(x_max, y_max); // both inclusive

        let size = Vec2(
            max.x() as i64 - min.x() as i64 + 1,
            max.y() as i64 - min.y() as i64 + 1,
        );

        let size = Vec2(
            usize::try_from(size.x()).map_err(|_| Error::invalid("box size"))?,
            usize::try_from(size.y()).map_err(|_| Error::invalid("box size"))?,
        );

        Ok(IntegerBounds { position: min, size })
    }

    /// Create a new rectangle which is offset by the specified origin.
    pub fn with_origin(self, origin: Vec2<i32>) -> Self {
        IntegerBounds { position: self.position + origin, ..self }
    }

    /// Returns whether the specified rectangle is equal to or inside this rectangle.
    pub fn contains(self, subset: Self) -> bool {
        subset.position.x() >= self.position.x()
            && subset.position.y() >= self.position.y()
            && subset.end().x() <= self.end().x()
            && subset.end().y() <= self.end().y()
    }
}


impl FloatRect {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        4 * f32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.min.x().write(write)?;
        self.min.y().write(write)?;
        self.max.x().write(write)?;
        self.max.y().write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let x_min = f32::read(read)?;
        let y_min = f32::read(read)?;
        let x_max = f32::read(read)?;
        let y_max = f32::read(read)?;

        Ok(FloatRect {
            min: Vec2(x_min, y_min),
            max: Vec2(x_max, y_max),
        })
    }
}


impl SampleType {

    /// How many bytes a single sample takes up.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleType::F16 => 2,
            SampleType::F32 => 4,
            SampleType::U32 => 4,
        }
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        i32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        match self {
            SampleType::U32 => 0_i32,
            SampleType::F16 => 1_i32,
            SampleType::F32 => 2_i32,
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(match i32::read(read)? {
            0 => SampleType::U32,
            1 => SampleType::F16,
            2 => SampleType::F32,
            _ => return Err(Error::header("unknown pixel type attribute value")),
        })
    }
}


impl ChannelDescription {

    /// Create a new channel with the specified properties and a sampling rate of (1,1).
    pub fn new(name: Text, sample_type: SampleType, quantize_linearly: bool) -> Self {
        Self { name, sample_type, quantize_linearly, sampling: Vec2(1, 1) }
    }

    /// The count of samples this channel stores in a rectangle
    /// of the specified dimensions, respecting subsampling.
    pub fn subsampled_pixels(&self, dimensions: Vec2<usize>) -> usize {
        self.subsampled_resolution(dimensions).area()
    }

    /// The resolution of this channel, respecting subsampling.
    pub fn subsampled_resolution(&self, dimensions: Vec2<usize>) -> Vec2<usize> {
        dimensions / self.sampling
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        self.name.null_terminated_byte_size()
            + SampleType::byte_size()
            + 1 // is_linear
            + 3 // reserved bytes
            + 2 * i32::BYTE_SIZE // sampling x, y
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.name.write_null_terminated(write)?;
        self.sample_type.write(write)?;

        match self.quantize_linearly {
            false => 0_u8,
            true => 1_u8,
        }.write(write)?;

        u8::write_slice(write, &[0, 0, 0])?; // reserved
        usize_to_i32(self.sampling.x(), "x sampling")?.write(write)?;
        usize_to_i32(self.sampling.y(), "y sampling")?.write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let name = Text::read_null_terminated(read, 256)?;
        let sample_type = SampleType::read(read)?;

        let is_linear = match u8::read(read)? {
            1 => true,
            0 => false,
            _ => return Err(Error::header("invalid channel linearity value")),
        };

        let mut reserved = [0_u8; 3];
        u8::read_slice(read, &mut reserved)?;

        let x_sampling = i32_to_usize(i32::read(read)?, "x channel sampling")?;
        let y_sampling = i32_to_usize(i32::read(read)?, "y channel sampling")?;

        Ok(ChannelDescription {
            name, sample_type,
            quantize_linearly: is_linear,
            sampling: Vec2(x_sampling, y_sampling),
        })
    }

    /// Validate this instance against the data window it describes.
    pub fn validate(&self, allow_sampling: bool, data_window: IntegerBounds, strict: bool) -> UnitResult {
        self.name.validate_name(None)?;

        if self.sampling.x() == 0 || self.sampling.y() == 0 {
            return Err(Error::invalid("zero sampling factor"));
        }

        if strict && !allow_sampling && self.sampling != Vec2(1, 1) {
            return Err(Error::invalid("subsampling is only allowed in flat scan line images"));
        }

        if data_window.position.x() % self.sampling.x() as i32 != 0
            || data_window.position.y() % self.sampling.y() as i32 != 0
        {
            return Err(Error::invalid("channel sampling factor not dividing the data window position"));
        }

        if data_window.size.x() % self.sampling.x() != 0
            || data_window.size.y() % self.sampling.y() != 0
        {
            return Err(Error::invalid("channel sampling factor not dividing the data window size"));
        }

        Ok(())
    }
}


impl ChannelList {

    /// Does not validate the channel order.
    pub fn new(channels: SmallVec<[ChannelDescription; 5]>) -> Self {
        let uniform_sample_type = channels.first().map(|first| first.sample_type)
            .filter(|&first_type| channels.iter().all(|channel| channel.sample_type == first_type));

        ChannelList {
            bytes_per_pixel: channels.iter().map(|channel| channel.sample_type.bytes_per_sample()).sum(),
            list: channels,
            uniform_sample_type,
        }
    }

    /// The byte size of the uncompressed block covering the specified
    /// rectangle: for each contained row, for each channel with a sample
    /// in that row, the sample bytes of one subsampled row.
    pub fn bytes_per_block(&self, bounds: IntegerBounds) -> usize {
        use crate::math::mod_positive;

        let mut byte_count = 0;
        for channel in &self.list {
            let row_bytes = channel.subsampled_resolution(bounds.size).x()
                * channel.sample_type.bytes_per_sample();

            let row_count = (bounds.position.y() .. bounds.end().y())
                .filter(|&y| mod_positive(y, channel.sampling.y() as i32) == 0)
                .count();

            byte_count += row_bytes * row_count;
        }

        byte_count
    }

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        self.list.iter().map(ChannelDescription::byte_size).sum::<usize>()
            + sequence_end::byte_size()
    }

    /// Without validation, write this instance to the byte stream.
    /// Assumes channels are sorted alphabetically.
    pub fn write(&self, write: &mut impl Write) -> UnitResult {
        for channel in &self.list {
            channel.write(write)?;
        }

        sequence_end::write(write)
    }

    /// Read the value without validating.
    pub fn read(read: &mut PeekRead<impl Read>) -> Result<Self> {
        let mut channels = SmallVec::new();
        while !sequence_end::has_come(read)? {
            channels.push(ChannelDescription::read(read)?);
        }

        Ok(ChannelList::new(channels))
    }

    /// Check that all channels are valid, sorted, and unique.
    pub fn validate(&self, allow_sampling: bool, data_window: IntegerBounds, strict: bool) -> UnitResult {
        let mut iter = self.list.iter()
            .map(|channel| channel.validate(allow_sampling, data_window, strict).map(|_| &channel.name));

        let mut previous = iter.next()
            .ok_or_else(|| Error::invalid("at least one channel is required"))??;

        for name in iter {
            let name = name?;
            if strict && previous == name { return Err(Error::invalid("channel names are not unique")); }
            else if previous > name { return Err(Error::invalid("channel names are not sorted alphabetically")); }
            else { previous = name; }
        }

        Ok(())
    }
}


impl TimeCode {

    /// Number of bytes this would consume in an exr file.
    pub const BYTE_SIZE: usize = 2 * u32::BYTE_SIZE;

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.time_and_flags.write(write)?;
        self.user_data.write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let time_and_flags = u32::read(read)?;
        let user_data = u32::read(read)?;
        Ok(Self { time_and_flags, user_data })
    }
}


impl Chromaticities {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        8 * f32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.red.x().write(write)?;
        self.red.y().write(write)?;

        self.green.x().write(write)?;
        self.green.y().write(write)?;

        self.blue.x().write(write)?;
        self.blue.y().write(write)?;

        self.white.x().write(write)?;
        self.white.y().write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(Chromaticities {
            red: Vec2(f32::read(read)?, f32::read(read)?),
            green: Vec2(f32::read(read)?, f32::read(read)?),
            blue: Vec2(f32::read(read)?, f32::read(read)?),
            white: Vec2(f32::read(read)?, f32::read(read)?),
        })
    }
}


impl Compression {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize { u8::BYTE_SIZE }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        use crate::compression::Compression::*;
        match self {
            Uncompressed => 0_u8,
            RLE => 1_u8,
            ZIPS => 2_u8,
            ZIP => 3_u8,
            PIZ => 4_u8,
            PXR24 => 5_u8,
            B44 => 6_u8,
            B44A => 7_u8,
            DWAA(_) => 8_u8,
            DWAB(_) => 9_u8,
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        use crate::compression::Compression::*;
        Ok(match u8::read(read)? {
            0 => Uncompressed,
            1 => RLE,
            2 => ZIPS,
            3 => ZIP,
            4 => PIZ,
            5 => PXR24,
            6 => B44,
            7 => B44A,
            8 => DWAA(None),
            9 => DWAB(None),
            _ => return Err(Error::unsupported("unknown compression method")),
        })
    }
}


impl EnvironmentMap {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        u8::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        use self::EnvironmentMap::*;
        match self {
            LatitudeLongitude => 0_u8,
            Cube => 1_u8,
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        use self::EnvironmentMap::*;
        Ok(match u8::read(read)? {
            0 => LatitudeLongitude,
            1 => Cube,
            _ => return Err(Error::header("invalid environment map attribute value")),
        })
    }
}


impl KeyCode {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        7 * i32::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        self.film_manufacturer_code.write(write)?;
        self.film_type.write(write)?;
        self.film_roll_prefix.write(write)?;
        self.count.write(write)?;
        self.perforation_offset.write(write)?;
        self.perforations_per_frame.write(write)?;
        self.perforations_per_count.write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        Ok(KeyCode {
            film_manufacturer_code: i32::read(read)?,
            film_type: i32::read(read)?,
            film_roll_prefix: i32::read(read)?,
            count: i32::read(read)?,
            perforation_offset: i32::read(read)?,
            perforations_per_frame: i32::read(read)?,
            perforations_per_count: i32::read(read)?,
        })
    }
}


impl LineOrder {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        u8::BYTE_SIZE
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(self, write: &mut W) -> UnitResult {
        use self::LineOrder::*;
        match self {
            Increasing => 0_u8,
            Decreasing => 1_u8,
            Unspecified => 2_u8,
        }.write(write)
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        use self::LineOrder::*;
        Ok(match u8::read(read)? {
            0 => Increasing,
            1 => Decreasing,
            2 => Unspecified,
            _ => return Err(Error::header("invalid line order attribute value")),
        })
    }
}


impl Preview {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        2 * u32::BYTE_SIZE + self.pixel_data.len()
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        (self.size.width() as u32).write(write)?;
        (self.size.height() as u32).write(write)?;
        u8::write_slice(write, &self.pixel_data)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let components_per_pixel = 4;
        let width = u32::read(read)? as usize;
        let height = u32::read(read)? as usize;

        let pixel_data = u8::read_vec(
            read, width * height * components_per_pixel,
            1024 * 1024 * 4, None, "preview byte size"
        )?;

        Ok(Preview {
            size: Vec2(width, height),
            pixel_data,
        })
    }

    /// Validate this instance.
    pub fn validate(&self, strict: bool) -> UnitResult {
        if strict && self.size.area() * 4 != self.pixel_data.len() {
            return Err(Error::invalid("preview dimensions do not match content length"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for Preview {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "Preview ({}x{} px)", self.size.width(), self.size.height())
    }
}


impl TileDescription {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size() -> usize {
        2 * u32::BYTE_SIZE + 1 // size x, size y, (level mode + rounding mode)
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        (self.tile_size.width() as u32).write(write)?;
        (self.tile_size.height() as u32).write(write)?;

        let level_mode = match self.level_mode {
            LevelMode::Singular => 0_u8,
            LevelMode::MipMap => 1_u8,
            LevelMode::RipMap => 2_u8,
        };

        let rounding_mode = match self.rounding_mode {
            RoundingMode::Down => 0_u8,
            RoundingMode::Up => 1_u8,
        };

        // both modes share a single byte
        (level_mode + (rounding_mode * 16)).write(write)?;
        Ok(())
    }

    /// Read the value without validating.
    pub fn read<R: Read>(read: &mut R) -> Result<Self> {
        let x_size = u32::read(read)? as usize;
        let y_size = u32::read(read)? as usize;

        let mode = u8::read(read)?;

        let level_mode = match mode & 0b0000_1111 {
            0 => LevelMode::Singular,
            1 => LevelMode::MipMap,
            2 => LevelMode::RipMap,
            _ => return Err(Error::header("invalid tile level mode")),
        };

        let rounding_mode = match mode >> 4 {
            0 => RoundingMode::Down,
            1 => RoundingMode::Up,
            _ => return Err(Error::header("invalid tile rounding mode")),
        };

        Ok(TileDescription { tile_size: Vec2(x_size, y_size), level_mode, rounding_mode })
    }

    /// Validate this instance.
    pub fn validate(&self) -> UnitResult {
        let max = i32::MAX as i64 / 2;

        if self.tile_size.width() == 0 || self.tile_size.height() == 0
            || self.tile_size.width() as i64 >= max || self.tile_size.height() as i64 >= max
        {
            return Err(Error::invalid("tile size"));
        }

        Ok(())
    }
}


/// Number of bytes a whole attribute record would consume in an exr file.
pub fn byte_size(name: &Text, value: &AttributeValue) -> usize {
    name.null_terminated_byte_size()
        + value.kind_name().len() + sequence_end::byte_size()
        + i32::BYTE_SIZE // serialized byte size
        + value.byte_size()
}

/// Without validation, write a whole attribute record to the byte stream.
pub fn write<W: Write>(name: &[u8], value: &AttributeValue, write: &mut W) -> UnitResult {
    u8::write_slice(write, name)?;
    sequence_end::write(write)?;

    u8::write_slice(write, value.kind_name())?;
    sequence_end::write(write)?;

    usize_to_i32(value.byte_size(), "attribute byte size")?.write(write)?;
    value.write(write)
}

/// Read an attribute record. The value result may be an error
/// even if the byte source itself is intact, so that a single
/// unparseable attribute does not make the whole header unreadable.
pub fn read(read: &mut PeekRead<impl Read>, max_size: usize) -> Result<(Text, Result<AttributeValue>)> {
    let name = Text::read_null_terminated(read, max_size)?;
    let kind = Text::read_null_terminated(read, max_size)?;
    let size = i32_to_usize(i32::read(read)?, "attribute size")?;
    let value = AttributeValue::read(read, kind, size)?;
    Ok((name, value))
}

/// Validate this attribute record.
pub fn validate(
    name: &Text, value: &AttributeValue, long_names: &mut bool,
    allow_sampling: bool, data_window: IntegerBounds, strict: bool,
) -> UnitResult {
    name.validate_name(Some(long_names))?; // only the name has a length restriction
    value.validate(allow_sampling, data_window, strict)
}


impl AttributeValue {

    /// Number of bytes this would consume in an exr file.
    pub fn byte_size(&self) -> usize {
        use self::AttributeValue::*;

        match *self {
            IntegerBounds(_) => self::IntegerBounds::byte_size(),
            FloatRect(_) => self::FloatRect::byte_size(),

            I32(_) => i32::BYTE_SIZE,
            F32(_) => f32::BYTE_SIZE,
            F64(_) => f64::BYTE_SIZE,

            Rational(_) => i32::BYTE_SIZE + u32::BYTE_SIZE,
            TimeCode(_) => self::TimeCode::BYTE_SIZE,

            IntVec2(_) => 2 * i32::BYTE_SIZE,
            FloatVec2(_) => 2 * f32::BYTE_SIZE,
            IntVec3(_) => 3 * i32::BYTE_SIZE,
            FloatVec3(_) => 3 * f32::BYTE_SIZE,

            ChannelList(ref channels) => channels.byte_size(),
            Chromaticities(_) => self::Chromaticities::byte_size(),
            Compression(_) => self::Compression::byte_size(),
            EnvironmentMap(_) => self::EnvironmentMap::byte_size(),

            KeyCode(_) => self::KeyCode::byte_size(),
            LineOrder(_) => self::LineOrder::byte_size(),

            Matrix3x3(ref value) => value.len() * f32::BYTE_SIZE,
            Matrix4x4(ref value) => value.len() * f32::BYTE_SIZE,

            Preview(ref value) => value.byte_size(),

            // attribute value texts are neither length-restricted nor
            // length-prefixed, as the length follows from the attribute size
            Text(ref value) => value.bytes.len(),

            TextVector(ref value) => value.iter().map(self::Text::i32_sized_byte_size).sum(),
            TileDescription(_) => self::TileDescription::byte_size(),
            Custom { ref bytes, .. } => bytes.len(),
            BlockType(kind) => kind.byte_size(),
        }
    }

    /// The exr name string of the type of this attribute.
    pub fn kind_name(&self) -> &[u8] {
        use self::AttributeValue::*;
        use self::type_names as ty;

        match *self {
            IntegerBounds(_) => ty::I32BOX2,
            FloatRect(_) => ty::F32BOX2,
            I32(_) => ty::I32,
            F32(_) => ty::F32,
            F64(_) => ty::F64,
            Rational(_) => ty::RATIONAL,
            TimeCode(_) => ty::TIME_CODE,
            IntVec2(_) => ty::I32VEC2,
            FloatVec2(_) => ty::F32VEC2,
            IntVec3(_) => ty::I32VEC3,
            FloatVec3(_) => ty::F32VEC3,
            ChannelList(_) => ty::CHANNEL_LIST,
            Chromaticities(_) => ty::CHROMATICITIES,
            Compression(_) => ty::COMPRESSION,
            EnvironmentMap(_) => ty::ENVIRONMENT_MAP,
            KeyCode(_) => ty::KEY_CODE,
            LineOrder(_) => ty::LINE_ORDER,
            Matrix3x3(_) => ty::F32MATRIX3X3,
            Matrix4x4(_) => ty::F32MATRIX4X4,
            Preview(_) => ty::PREVIEW,
            Text(_) => ty::TEXT,
            TextVector(_) => ty::TEXT_VECTOR,
            TileDescription(_) => ty::TILES,
            Custom { ref kind, .. } => kind.bytes(),
            BlockType(_) => self::BlockType::TYPE_NAME,
        }
    }

    /// Without validation, write this instance to the byte stream.
    pub fn write<W: Write>(&self, write: &mut W) -> UnitResult {
        use self::AttributeValue::*;

        match *self {
            IntegerBounds(value) => value.write(write)?,
            FloatRect(value) => value.write(write)?,

            I32(value) => value.write(write)?,
            F32(value) => value.write(write)?,
            F64(value) => value.write(write)?,

            Rational((a, b)) => { a.write(write)?; b.write(write)?; },
            TimeCode(codes) => codes.write(write)?,

            IntVec2(Vec2(x, y)) => { x.write(write)?; y.write(write)?; },
            FloatVec2(Vec2(x, y)) => { x.write(write)?; y.write(write)?; },
            IntVec3((x, y, z)) => { x.write(write)?; y.write(write)?; z.write(write)?; },
            FloatVec3((x, y, z)) => { x.write(write)?; y.write(write)?; z.write(write)?; },

            ChannelList(ref channels) => channels.write(write)?,
            Chromaticities(ref value) => value.write(write)?,
            Compression(value) => value.write(write)?,
            EnvironmentMap(value) => value.write(write)?,

            KeyCode(ref value) => value.write(write)?,
            LineOrder(value) => value.write(write)?,

            Matrix3x3(ref value) => f32::write_slice(write, value)?,
            Matrix4x4(ref value) => f32::write_slice(write, value)?,

            Preview(ref value) => value.write(write)?,
            Text(ref value) => u8::write_slice(write, value.bytes.as_slice())?,

            TextVector(ref value) => self::Text::write_vec_of_i32_sized_texts(write, value)?,
            TileDescription(ref value) => value.write(write)?,
            Custom { ref bytes, .. } => u8::write_slice(write, bytes)?,
            BlockType(kind) => kind.write(write)?,
        };

        Ok(())
    }

    /// Read the value without validating.
    /// Returns `Ok(Ok(attribute))` for valid attributes.
    /// Returns `Ok(Err(Error))` for invalid attributes from a valid byte source.
    /// Returns `Err(Error)` for invalid byte sources, for example truncated files.
    pub fn read(read: &mut PeekRead<impl Read>, kind: Text, byte_size: usize) -> Result<Result<Self>> {
        use self::AttributeValue::*;
        use self::type_names as ty;

        // always consume exactly the declared number of bytes,
        // so one bad attribute does not corrupt the following ones
        let attribute_bytes = u8::read_vec(read, byte_size, 128, None, "attribute size")?;

        let parse_attribute = move || {
            let reader = &mut attribute_bytes.as_slice();

            Ok(match kind.bytes() {
                ty::I32BOX2 => IntegerBounds(self::IntegerBounds::read(reader)?),
                ty::F32BOX2 => FloatRect(self::FloatRect::read(reader)?),

                ty::I32 => I32(i32::read(reader)?),
                ty::F32 => F32(f32::read(reader)?),
                ty::F64 => F64(f64::read(reader)?),

                ty::RATIONAL => Rational({
                    let a = i32::read(reader)?;
                    let b = u32::read(reader)?;
                    (a, b)
                }),

                ty::TIME_CODE => TimeCode(self::TimeCode::read(reader)?),

                ty::I32VEC2 => IntVec2({
                    let a = i32::read(reader)?;
                    let b = i32::read(reader)?;
                    Vec2(a, b)
                }),

                ty::F32VEC2 => FloatVec2({
                    let a = f32::read(reader)?;
                    let b = f32::read(reader)?;
                    Vec2(a, b)
                }),

                ty::I32VEC3 => IntVec3({
                    let a = i32::read(reader)?;
                    let b = i32::read(reader)?;
                    let c = i32::read(reader)?;
                    (a, b, c)
                }),

                ty::F32VEC3 => FloatVec3({
                    let a = f32::read(reader)?;
                    let b = f32::read(reader)?;
                    let c = f32::read(reader)?;
                    (a, b, c)
                }),

                ty::CHANNEL_LIST => ChannelList(self::ChannelList::read(&mut PeekRead::new(attribute_bytes.as_slice()))?),
                ty::CHROMATICITIES => Chromaticities(self::Chromaticities::read(reader)?),
                ty::COMPRESSION => Compression(self::Compression::read(reader)?),
                ty::ENVIRONMENT_MAP => EnvironmentMap(self::EnvironmentMap::read(reader)?),

                ty::KEY_CODE => KeyCode(self::KeyCode::read(reader)?),
                ty::LINE_ORDER => LineOrder(self::LineOrder::read(reader)?),

                ty::F32MATRIX3X3 => Matrix3x3({
                    let mut result = [0.0_f32; 9];
                    f32::read_slice(reader, &mut result)?;
                    result
                }),

                ty::F32MATRIX4X4 => Matrix4x4({
                    let mut result = [0.0_f32; 16];
                    f32::read_slice(reader, &mut result)?;
                    result
                }),

                ty::PREVIEW => Preview(self::Preview::read(reader)?),
                ty::TEXT => Text(self::Text::read_sized(reader, byte_size)?),

                // the number of strings is inferred from the total attribute size
                ty::TEXT_VECTOR => TextVector(self::Text::read_vec_of_i32_sized(
                    &mut attribute_bytes.as_slice(), byte_size
                )?),

                ty::TILES => TileDescription(self::TileDescription::read(reader)?),

                _ => Custom { kind: kind.clone(), bytes: attribute_bytes.clone() },
            })
        };

        Ok(parse_attribute())
    }

    /// Validate this instance.
    pub fn validate(&self, allow_sampling: bool, data_window: IntegerBounds, strict: bool) -> UnitResult {
        use self::AttributeValue::*;

        match *self {
            ChannelList(ref channels) => channels.validate(allow_sampling, data_window, strict)?,
            TileDescription(ref value) => value.validate()?,
            Preview(ref value) => value.validate(strict)?,

            TextVector(ref vec) => if strict && vec.is_empty() {
                return Err(Error::invalid("text vector may not be empty"));
            },

            _ => {}
        };

        Ok(())
    }

    /// Return `Ok(i32)` if this attribute is an i32.
    pub fn to_i32(&self) -> Result<i32> {
        match *self {
            AttributeValue::I32(value) => Ok(value),
            _ => Err(attribute_type_mismatch()),
        }
    }

    /// Return `Ok(f32)` if this attribute is an f32.
    pub fn to_f32(&self) -> Result<f32> {
        match *self {
            AttributeValue::F32(value) => Ok(value),
            _ => Err(attribute_type_mismatch()),
        }
    }

    /// Return `Ok(&Text)` if this attribute is a text.
    pub fn to_text(&self) -> Result<&Text> {
        match self {
            AttributeValue::Text(value) => Ok(value),
            _ => Err(attribute_type_mismatch()),
        }
    }

    /// Return `Ok(Chromaticities)` if this attribute is a chromaticities attribute.
    pub fn to_chromaticities(&self) -> Result<Chromaticities> {
        match *self {
            AttributeValue::Chromaticities(value) => Ok(value),
            _ => Err(attribute_type_mismatch()),
        }
    }

    /// Return `Ok(TimeCode)` if this attribute is a time code.
    pub fn to_time_code(&self) -> Result<TimeCode> {
        match *self {
            AttributeValue::TimeCode(value) => Ok(value),
            _ => Err(attribute_type_mismatch()),
        }
    }
}


/// Contains the byte-string names identifying the type of an attribute.
pub mod type_names {
    macro_rules! define_attribute_type_names {
        ( $($name: ident : $value: expr),* ) => {
            $(
                /// The byte-string name of this attribute type as it appears in an exr file.
                pub const $name: &'static [u8] = $value;
            )*
        };
    }

    define_attribute_type_names! {
        I32BOX2:        b"box2i",
        F32BOX2:        b"box2f",
        I32:            b"int",
        F32:            b"float",
        F64:            b"double",
        RATIONAL:       b"rational",
        TIME_CODE:      b"timecode",
        I32VEC2:        b"v2i",
        F32VEC2:        b"v2f",
        I32VEC3:        b"v3i",
        F32VEC3:        b"v3f",
        CHANNEL_LIST:   b"chlist",
        CHROMATICITIES: b"chromaticities",
        COMPRESSION:    b"compression",
        ENVIRONMENT_MAP:b"envmap",
        KEY_CODE:       b"keycode",
        LINE_ORDER:     b"lineOrder",
        F32MATRIX3X3:   b"m33f",
        F32MATRIX4X4:   b"m44f",
        PREVIEW:        b"preview",
        TEXT:           b"string",
        TEXT_VECTOR:    b"stringvector",
        TILES:          b"tiledesc"
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn text_ordering_matches_string_ordering() {
        for _ in 0 .. 1024 {
            let text1 = Text::from_bytes_unchecked((0 .. 4).map(|_| rand::random::<u8>()).collect());
            let text2 = Text::from_bytes_unchecked((0 .. 4).map(|_| rand::random::<u8>()).collect());

            assert_eq!(
                text1.to_string().cmp(&text2.to_string()), text1.cmp(&text2),
                "in text {:?} vs {:?}", text1, text2
            );
        }
    }

    #[test]
    fn tile_description_roundtrip() {
        let tiles = [
            TileDescription {
                tile_size: Vec2(31, 7),
                level_mode: LevelMode::MipMap,
                rounding_mode: RoundingMode::Down,
            },

            TileDescription {
                tile_size: Vec2(64, 64),
                level_mode: LevelMode::Singular,
                rounding_mode: RoundingMode::Up,
            },

            TileDescription {
                tile_size: Vec2(11, 2),
                level_mode: LevelMode::RipMap,
                rounding_mode: RoundingMode::Down,
            },
        ];

        for tile in &tiles {
            let mut bytes = Vec::new();
            tile.write(&mut bytes).unwrap();

            let read_back = TileDescription::read(&mut Cursor::new(bytes)).unwrap();
            assert_eq!(*tile, read_back);
        }
    }

    #[test]
    fn bounds_are_inclusive_on_disk() {
        let bounds = IntegerBounds::new(Vec2(-2, 3), Vec2(10, 5));

        let mut bytes = Vec::new();
        bounds.write(&mut bytes).unwrap();

        // min (-2, 3), max (7, 7), as four little-endian i32 values
        let mut read = bytes.as_slice();
        assert_eq!(i32::read(&mut read).unwrap(), -2);
        assert_eq!(i32::read(&mut read).unwrap(), 3);
        assert_eq!(i32::read(&mut read).unwrap(), 7);
        assert_eq!(i32::read(&mut read).unwrap(), 7);

        assert_eq!(IntegerBounds::read(&mut bytes.as_slice()).unwrap(), bounds);
    }

    #[test]
    fn block_byte_size_respects_sampling() {
        let channels = ChannelList::new(smallvec![
            ChannelDescription {
                name: Text::new("chroma").unwrap(),
                sample_type: SampleType::F16,
                quantize_linearly: false,
                sampling: Vec2(2, 2),
            },
            ChannelDescription {
                name: Text::new("luma").unwrap(),
                sample_type: SampleType::F16,
                quantize_linearly: false,
                sampling: Vec2(1, 1),
            },
        ]);

        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(16, 16));

        // luma: 16 rows of 16 samples; chroma: 8 rows of 8 samples
        assert_eq!(channels.bytes_per_block(bounds), 16 * 16 * 2 + 8 * 8 * 2);
    }

    #[test]
    fn attribute_roundtrip_and_byte_size() {
        let attributes = [
            (
                Text::new("greeting").unwrap(),
                AttributeValue::Text(Text::new("hello").unwrap()),
            ),
            (
                Text::new("age").unwrap(),
                AttributeValue::I32(923),
            ),
            (
                Text::new("density").unwrap(),
                AttributeValue::F64(9.114939599234),
            ),
            (
                Text::new("focalRegion").unwrap(),
                AttributeValue::FloatRect(FloatRect {
                    min: Vec2(23.4234, 345.23),
                    max: Vec2(68623.0, 3.12425926538),
                }),
            ),
            (
                Text::new("multiView").unwrap(),
                AttributeValue::TextVector(vec![
                    Text::new("left").unwrap(),
                    Text::new("right").unwrap(),
                    Text::new("center").unwrap(),
                ]),
            ),
            (
                Text::new("preview").unwrap(),
                AttributeValue::Preview(Preview {
                    size: Vec2(10, 30),
                    pixel_data: vec![31; 10 * 30 * 4],
                }),
            ),
            (
                Text::new("channels").unwrap(),
                AttributeValue::ChannelList(ChannelList::new(smallvec![
                    ChannelDescription {
                        name: Text::new("B").unwrap(),
                        sample_type: SampleType::F16,
                        quantize_linearly: false,
                        sampling: Vec2(1, 1),
                    },
                    ChannelDescription {
                        name: Text::new("G").unwrap(),
                        sample_type: SampleType::F32,
                        quantize_linearly: true,
                        sampling: Vec2(1, 1),
                    },
                    ChannelDescription {
                        name: Text::new("R").unwrap(),
                        sample_type: SampleType::U32,
                        quantize_linearly: false,
                        sampling: Vec2(1, 1),
                    },
                ])),
            ),
            (
                Text::new("timecode").unwrap(),
                AttributeValue::TimeCode(TimeCode { time_and_flags: 0x1234_5678, user_data: 42 }),
            ),
        ];

        for (name, value) in &attributes {
            let mut bytes = Vec::new();
            super::write(name.bytes(), value, &mut bytes).unwrap();
            assert_eq!(super::byte_size(name, value), bytes.len(), "byte_size of {:?}", name);

            let (read_name, read_value) = super::read(&mut PeekRead::new(Cursor::new(bytes)), 300).unwrap();
            assert_eq!((&read_name, &read_value.unwrap()), (name, value), "roundtrip of {:?}", name);
        }
    }

    #[test]
    fn unknown_attribute_type_is_preserved() {
        let name = Text::new("fancy").unwrap();
        let value = AttributeValue::Custom {
            kind: Text::new("madeUpType").unwrap(),
            bytes: vec![1, 2, 3, 4, 5, 6, 7],
        };

        let mut bytes = Vec::new();
        super::write(name.bytes(), &value, &mut bytes).unwrap();

        let (read_name, read_value) = super::read(&mut PeekRead::new(Cursor::new(bytes.clone())), 300).unwrap();
        assert_eq!(read_name, name);
        assert_eq!(read_value.unwrap(), value);

        // writing back the unknown attribute reproduces the exact bytes
        let mut rewritten = Vec::new();
        super::write(name.bytes(), &value, &mut rewritten).unwrap();
        assert_eq!(rewritten, bytes);
    }

    #[test]
    fn long_names_are_flagged_and_oversized_names_rejected() {
        let mut long_names = false;

        let short = Text::new("shortName").unwrap();
        short.validate_name(Some(&mut long_names)).unwrap();
        assert!(!long_names);

        let long = Text::new("thisNameIsLongerThanThirtyOneBytes").unwrap();
        long.validate_name(Some(&mut long_names)).unwrap();
        assert!(long_names);

        let oversized = Text::from_bytes_unchecked(std::iter::repeat(b'x').take(256).collect());
        assert!(oversized.validate_name(None).is_err());

        assert!(Text::default().validate_name(None).is_err());
    }
}
