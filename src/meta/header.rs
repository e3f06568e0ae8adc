
//! Describes a single part of an image file:
//! the required structural attributes, the standard optional attributes,
//! and arbitrary custom attributes.

use std::collections::HashMap;
use smallvec::SmallVec;

use crate::compression::Compression;
use crate::error::{Error, Result, UnitResult, i32_to_usize, usize_to_i32};
use crate::io::{PeekRead, Read, Write};
use crate::math::Vec2;
use crate::meta::{
    BlockDescription, Requirements, TileIndices, sequence_end,
    compute_chunk_count, compute_block_count, compute_level_size,
    calculate_block_position_and_size, mip_map_levels, rip_map_levels,
};
use crate::meta::attribute::{self, *};
use crate::block::chunk::{ChunkLocator, TileCoordinates};


/// Describes a single part in a file.
/// A file can have any number of parts; the meta data contains one header each.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {

    /// List of channels in this part, sorted alphabetically.
    pub channels: ChannelList,

    /// How the pixel data of all channels in this part is compressed.
    pub compression: Compression,

    /// Describes how the pixels of this part are divided into smaller chunks,
    /// and whether the file contains multiple resolution levels.
    pub blocks: BlockDescription,

    /// In what order the chunks of this part occur in the file.
    pub line_order: LineOrder,

    /// The resolution of this part, which is the size of the data window.
    pub layer_size: Vec2<usize>,

    /// Whether this part contains deep data.
    pub deep: bool,

    /// Version of the deep data format. Only version 1 exists.
    pub deep_data_version: Option<i32>,

    /// Number of chunks this part is divided into,
    /// including all resolution levels.
    /// Always computed from the other fields, never trusted from the file.
    pub chunk_count: usize,

    /// Maximum number of samples in a single pixel of a deep part.
    pub max_samples_per_pixel: Option<usize>,

    /// Attributes that must be identical for all parts of a file.
    pub shared_attributes: ImageAttributes,

    /// Attributes that differ per part.
    pub own_attributes: LayerAttributes,
}

/// Attributes that must be the same for all parts of a file,
/// such as the display window.
#[derive(Clone, PartialEq, Debug)]
pub struct ImageAttributes {

    /// The rectangle of the global 2D space
    /// that forms the final image frame.
    pub display_window: IntegerBounds,

    /// Width of a pixel divided by its height.
    pub pixel_aspect: f32,

    /// The color space of the pixels.
    pub chromaticities: Option<Chromaticities>,

    /// The time code of the image.
    pub time_code: Option<TimeCode>,

    /// Custom attributes that must be the same for all parts.
    pub custom: HashMap<Text, AttributeValue>,
}

/// Attributes that belong to one single part,
/// such as its position in the global space.
#[derive(Clone, PartialEq)]
pub struct LayerAttributes {

    /// The name of this part.
    /// Required if the file contains multiple parts or deep data.
    pub name: Option<Text>,

    /// The position of the data window in the global 2D space.
    pub data_position: Vec2<i32>,

    /// Part of the perspective projection. Default is `(0, 0)`.
    pub screen_window_center: Vec2<f32>,

    /// Part of the perspective projection. Default is `1`.
    pub screen_window_width: f32,

    /// Luminance in nits of the rgb value `(1, 1, 1)`.
    pub white_luminance: Option<f32>,

    /// The cie coordinates to consider neutral during color rendering.
    pub adopted_neutral: Option<Vec2<f32>>,

    /// Name of the color transform function applied for rendering.
    pub rendering_transform_name: Option<Text>,

    /// Name of the color transform function that computes the look modification.
    pub look_modification_transform_name: Option<Text>,

    /// The horizontal output density, in pixels per inch.
    pub horizontal_density: Option<f32>,

    /// Name of the owner.
    pub owner: Option<Text>,

    /// Additional textual information.
    pub comments: Option<Text>,

    /// The date of image creation, in `YYYY:MM:DD hh:mm:ss` format.
    pub capture_date: Option<Text>,

    /// Time offset from utc in hours.
    pub utc_offset: Option<f32>,

    /// Geographical image location.
    pub longitude: Option<f32>,

    /// Geographical image location.
    pub latitude: Option<f32>,

    /// Geographical image location.
    pub altitude: Option<f32>,

    /// Camera focus in meters.
    pub focus: Option<f32>,

    /// Exposure time in seconds.
    pub exposure: Option<f32>,

    /// Camera aperture in f-stops.
    pub aperture: Option<f32>,

    /// Iso-speed of the camera sensor.
    pub iso_speed: Option<f32>,

    /// If this is an environment map, how to interpret it.
    pub environment_map: Option<EnvironmentMap>,

    /// Identifies the film roll and frame position of this image.
    pub key_code: Option<KeyCode>,

    /// How texture maps are extrapolated:
    /// `black`, `clamp`, `periodic`, or `mirror`.
    pub wrap_mode_name: Option<Text>,

    /// Frames per second if this is a frame in a sequence.
    pub frames_per_second: Option<Rational>,

    /// The view names of a multi-view file, for example stereo left and right.
    pub multi_view_names: Option<Vec<Text>>,

    /// The matrix transforming world coordinates to camera coordinates.
    pub world_to_camera: Option<Matrix4x4>,

    /// The matrix transforming world coordinates
    /// to normalized device coordinates.
    pub world_to_normalized_device: Option<Matrix4x4>,

    /// Whether the samples of a deep image are sorted and non-overlapping.
    pub deep_image_state: Option<Rational>,

    /// If the image was cropped, the original data window.
    pub original_data_window: Option<IntegerBounds>,

    /// How much the dwa compression is allowed to lose.
    /// Defaults to `45.0`, higher values lose less.
    pub dwa_compression_level: Option<f32>,

    /// A small rgba image approximating the real image.
    pub preview: Option<Preview>,

    /// Name of the view this part belongs to,
    /// probably `left` or `right` for stereoscopic images.
    pub view_name: Option<Text>,

    /// Custom attributes that only this part carries.
    pub custom: HashMap<Text, AttributeValue>,
}


impl LayerAttributes {

    /// Create default part attributes with the specified name.
    pub fn named(name: Text) -> Self {
        Self {
            name: Some(name),
            ..Self::default()
        }
    }

    /// Set the position of the data window of this part.
    pub fn with_position(self, data_position: Vec2<i32>) -> Self {
        Self { data_position, ..self }
    }
}

impl ImageAttributes {

    /// Create default image attributes with the specified display window size,
    /// positioned at the origin.
    pub fn with_size(display_size: impl Into<Vec2<usize>>) -> Self {
        Self {
            display_window: IntegerBounds::from_dimensions(display_size),
            ..Self::default()
        }
    }
}


impl Header {

    /// Create a new header with the specified size and channels,
    /// uncompressed scan line blocks, and no custom attributes.
    pub fn new(name: Text, layer_size: impl Into<Vec2<usize>>, channels: SmallVec<[ChannelDescription; 5]>) -> Self {
        let layer_size = layer_size.into();
        let compression = Compression::Uncompressed;
        let blocks = BlockDescription::ScanLines;

        Self {
            layer_size,
            compression,
            blocks,

            channels: ChannelList::new(channels),
            line_order: LineOrder::Increasing,

            shared_attributes: ImageAttributes::with_size(layer_size),
            own_attributes: LayerAttributes::named(name),

            chunk_count: compute_chunk_count(compression, layer_size, blocks),

            deep: false,
            deep_data_version: None,
            max_samples_per_pixel: None,
        }
    }

    /// Set the display window, which must be the same for all parts of a file.
    pub fn with_display_window(mut self, display_window: IntegerBounds) -> Self {
        self.shared_attributes.display_window = display_window;
        self
    }

    /// Set the position of the data window of this part.
    pub fn with_position(mut self, position: Vec2<i32>) -> Self {
        self.own_attributes.data_position = position;
        self
    }

    /// Set compression, tiling, and line order. Recomputes the chunk count.
    pub fn with_encoding(self, compression: Compression, blocks: BlockDescription, line_order: LineOrder) -> Self {
        Self {
            chunk_count: compute_chunk_count(compression, self.layer_size, blocks),
            compression, blocks, line_order,
            ..self
        }
    }

    /// The rectangle this part covers in the global 2D space.
    pub fn data_window(&self) -> IntegerBounds {
        IntegerBounds::new(self.own_attributes.data_position, self.layer_size)
    }

    /// Iterate over all chunks of this part in the order
    /// specified by the line order attribute, each with its index
    /// in increasing-y order.
    pub fn enumerate_ordered_blocks(&self) -> impl Iterator<Item = (usize, TileIndices)> + Send {
        let increasing_y = self.blocks_increasing_y_order().enumerate();

        let ordered: Box<dyn Send + Iterator<Item = (usize, TileIndices)>> =
            if self.line_order == LineOrder::Decreasing { Box::new(increasing_y.rev()) }
            else { Box::new(increasing_y) };

        ordered
    }

    /// Iterate over all chunk indices of this part in increasing-y order.
    pub fn blocks_increasing_y_order(&self)
        -> impl Iterator<Item = TileIndices> + ExactSizeIterator + DoubleEndedIterator
    {
        fn tiles_of(image_size: Vec2<usize>, tile_size: Vec2<usize>, level_index: Vec2<usize>)
            -> impl Iterator<Item = TileIndices>
        {
            fn divide_and_rest(total_size: usize, block_size: usize) -> impl Iterator<Item = (usize, usize)> {
                let block_count = compute_block_count(total_size, block_size);
                (0 .. block_count).map(move |block_index| (
                    block_index,
                    (total_size - block_index * block_size).min(block_size),
                ))
            }

            divide_and_rest(image_size.height(), tile_size.height()).flat_map(move |(y_index, tile_height)| {
                divide_and_rest(image_size.width(), tile_size.width()).map(move |(x_index, tile_width)| {
                    TileIndices {
                        size: Vec2(tile_width, tile_height),
                        location: TileCoordinates { tile_index: Vec2(x_index, y_index), level_index },
                    }
                })
            })
        }

        let vec: Vec<TileIndices> = match self.blocks {
            BlockDescription::Tiles(tiles) => {
                match tiles.level_mode {
                    LevelMode::Singular =>
                        tiles_of(self.layer_size, tiles.tile_size, Vec2(0, 0)).collect(),

                    LevelMode::MipMap =>
                        mip_map_levels(tiles.rounding_mode, self.layer_size)
                            .flat_map(move |(level_index, level_size)|
                                tiles_of(level_size, tiles.tile_size, Vec2(level_index, level_index)))
                            .collect(),

                    LevelMode::RipMap =>
                        rip_map_levels(tiles.rounding_mode, self.layer_size)
                            .flat_map(move |(level_index, level_size)|
                                tiles_of(level_size, tiles.tile_size, level_index))
                            .collect(),
                }
            },

            BlockDescription::ScanLines => {
                let block_size = Vec2(self.layer_size.width(), self.compression.scan_lines_per_block());
                tiles_of(self.layer_size, block_size, Vec2(0, 0)).collect()
            },
        };

        vec.into_iter()
    }

    /// Calculate the pixel rectangle a chunk covers inside this part.
    /// The result starts at zero and is not negative.
    pub fn get_absolute_block_pixel_coordinates(&self, tile: TileCoordinates) -> Result<IntegerBounds> {
        match self.blocks {
            BlockDescription::Tiles(tiles) => {
                let level_size = Vec2(
                    compute_level_size(tiles.rounding_mode, self.layer_size.width(), tile.level_index.x()),
                    compute_level_size(tiles.rounding_mode, self.layer_size.height(), tile.level_index.y()),
                );

                tile.to_data_indices(tiles.tile_size, level_size)
            },

            BlockDescription::ScanLines => {
                debug_assert_eq!(tile.tile_index.x(), 0, "scan line blocks have no x index");

                let (y, height) = calculate_block_position_and_size(
                    self.layer_size.height(),
                    self.compression.scan_lines_per_block(),
                    tile.tile_index.y(),
                )?;

                Ok(IntegerBounds {
                    position: Vec2(0, usize_to_i32(y, "block start")?),
                    size: Vec2(self.layer_size.width(), height),
                })
            },
        }
    }

    /// Determine the tile coordinates of a chunk from its locator.
    pub fn get_block_data_indices(&self, locator: &ChunkLocator) -> Result<TileCoordinates> {
        match locator {
            ChunkLocator::Tile(coordinates) => Ok(*coordinates),

            ChunkLocator::ScanLine { y_coordinate } => {
                let size = self.compression.scan_lines_per_block() as i32;
                let y = (y_coordinate - self.own_attributes.data_position.y()) / size;

                if y < 0 {
                    return Err(Error::invalid("scan line block y coordinate"));
                }

                Ok(TileCoordinates {
                    tile_index: Vec2(0, y as usize),
                    level_index: Vec2(0, 0),
                })
            },
        }
    }

    /// The dimensions of a full-sized block of this part, in pixels.
    /// Blocks at the right or lower boundary may be smaller.
    pub fn max_block_pixel_size(&self) -> Vec2<usize> {
        match self.blocks {
            BlockDescription::ScanLines => Vec2(
                self.layer_size.width(),
                self.compression.scan_lines_per_block().min(self.layer_size.height().max(1)),
            ),

            BlockDescription::Tiles(tiles) => tiles.tile_size,
        }
    }

    /// Maximum byte count of an uncompressed block of this part,
    /// used to limit allocations while reading.
    pub fn max_block_byte_size(&self) -> usize {
        self.channels.bytes_per_pixel * self.max_block_pixel_size().area()
    }

    /// An upper bound of the byte count of all pixel data of this part
    /// in the file, used to validate offset tables.
    pub fn max_pixel_file_bytes(&self) -> usize {
        let samples_per_pixel = if self.deep { self.max_samples_per_pixel.unwrap_or(1024).max(1) } else { 1 };

        // the factor of four covers raw fallbacks and full rip map pyramids
        self.chunk_count * 64
            + self.layer_size.area() * self.channels.bytes_per_pixel * 4 * samples_per_pixel
    }

    /// Validate this instance, assuming the specified requirements.
    pub fn validate(&self, requirements: &Requirements, strict: bool) -> UnitResult {
        debug_assert_eq!(
            self.chunk_count, compute_chunk_count(self.compression, self.layer_size, self.blocks),
            "incorrect chunk count value"
        );

        self.data_window().validate(None)?;
        self.shared_attributes.display_window.validate(None)?;

        if strict {
            if requirements.is_multipart() && self.own_attributes.name.is_none() {
                return Err(Error::header("missing part name in multi-part file"));
            }

            if self.layer_size == Vec2(0, 0) {
                return Err(Error::invalid("empty data window"));
            }

            if self.shared_attributes.display_window.size == Vec2(0, 0) {
                return Err(Error::invalid("empty display window"));
            }

            if !self.shared_attributes.pixel_aspect.is_normal()
                || self.shared_attributes.pixel_aspect < 1.0e-6
                || self.shared_attributes.pixel_aspect > 1.0e6
            {
                return Err(Error::invalid("pixel aspect ratio"));
            }

            if self.own_attributes.screen_window_width < 0.0 {
                return Err(Error::invalid("screen window width"));
            }
        }

        let allow_subsampling = !self.deep && self.blocks == BlockDescription::ScanLines;
        self.channels.validate(allow_subsampling, self.data_window(), strict)?;

        let mut long_names = false;

        for (name, value) in &self.shared_attributes.custom {
            attribute::validate(name, value, &mut long_names, allow_subsampling, self.data_window(), strict)?;
        }

        for (name, value) in &self.own_attributes.custom {
            attribute::validate(name, value, &mut long_names, allow_subsampling, self.data_window(), strict)?;
        }

        if strict {
            for &reserved in standard_names::ALL {
                let name = Text::from_slice_unchecked(reserved);

                if self.own_attributes.custom.contains_key(&name)
                    || self.shared_attributes.custom.contains_key(&name)
                {
                    return Err(Error::header("custom attribute shadows a reserved name"));
                }
            }
        }

        if self.deep {
            if strict {
                if self.own_attributes.name.is_none() {
                    return Err(Error::header("missing part name in deep file"));
                }

                if self.max_samples_per_pixel.is_none() {
                    return Err(Error::header("missing maxSamplesPerPixel attribute in deep part"));
                }
            }

            match self.deep_data_version {
                Some(1) => {},
                Some(_) => return Err(Error::unsupported("deep data version")),
                None => return Err(Error::header("missing deep data version attribute")),
            }

            if !self.compression.supports_deep_data() {
                return Err(Error::invalid("compression method does not support deep data"));
            }
        }

        Ok(())
    }

    /// Read the headers of all parts, without validating them.
    pub fn read_all(read: &mut PeekRead<impl Read>, version: &Requirements, pedantic: bool) -> Result<SmallVec<[Header; 3]>> {
        if !version.is_multipart() {
            Ok(smallvec![ Header::read(read, version, pedantic)? ])
        }
        else {
            let mut headers = SmallVec::new();

            while !sequence_end::has_come(read)? {
                headers.push(Header::read(read, version, pedantic)?);
            }

            Ok(headers)
        }
    }

    /// Without validation, write all headers to the byte stream.
    pub fn write_all(headers: &[Header], write: &mut impl Write, is_multipart: bool) -> UnitResult {
        for header in headers {
            header.write(write)?;
        }

        if is_multipart {
            sequence_end::write(write)?;
        }

        Ok(())
    }

    /// Read a single header, without validating.
    /// If `pedantic` is false, an unparseable attribute value
    /// does not abort reading the rest of the header.
    pub fn read(read: &mut PeekRead<impl Read>, requirements: &Requirements, pedantic: bool) -> Result<Self> {
        let max_string_len = if requirements.has_long_names { 256 } else { 32 };

        // all required attributes will be filled when encountered while parsing
        let mut tiles = None;
        let mut block_type = None;
        let mut deep_data_version = None;
        let mut chunk_count = None;
        let mut max_samples_per_pixel = None;
        let mut channels = None;
        let mut compression = None;
        let mut data_window = None;
        let mut display_window = None;
        let mut line_order = None;

        let mut layer_attributes = LayerAttributes::default();
        let mut image_attributes = ImageAttributes::default();

        while !sequence_end::has_come(read)? {
            let (attribute_name, value) = attribute::read(read, max_string_len)?;

            match value {
                Ok(value) => {
                    use crate::meta::header::standard_names as name;
                    use crate::meta::attribute::AttributeValue::*;

                    // if the attribute is a required or standard attribute with
                    // the commonly used type, set the corresponding field directly.
                    // otherwise preserve the attribute as a custom attribute
                    match (attribute_name.bytes(), value) {
                        (name::BLOCK_TYPE, Text(value)) => block_type = Some(attribute::BlockType::parse(value)?),
                        (name::TILES, TileDescription(value)) => tiles = Some(value),
                        (name::CHANNELS, ChannelList(value)) => channels = Some(value),
                        (name::COMPRESSION, Compression(value)) => compression = Some(value),
                        (name::DATA_WINDOW, IntegerBounds(value)) => data_window = Some(value),
                        (name::DISPLAY_WINDOW, IntegerBounds(value)) => display_window = Some(value),
                        (name::LINE_ORDER, LineOrder(value)) => line_order = Some(value),
                        (name::DEEP_DATA_VERSION, I32(value)) => deep_data_version = Some(value),

                        (name::MAX_SAMPLES, I32(value)) =>
                            max_samples_per_pixel = Some(i32_to_usize(value, "max sample count")?),

                        (name::CHUNKS, I32(value)) =>
                            chunk_count = Some(i32_to_usize(value, "chunk count")?),

                        (name::NAME, Text(value)) => layer_attributes.name = Some(value),
                        (name::WINDOW_CENTER, FloatVec2(value)) => layer_attributes.screen_window_center = value,
                        (name::WINDOW_WIDTH, F32(value)) => layer_attributes.screen_window_width = value,

                        (name::WHITE_LUMINANCE, F32(value)) => layer_attributes.white_luminance = Some(value),
                        (name::ADOPTED_NEUTRAL, FloatVec2(value)) => layer_attributes.adopted_neutral = Some(value),
                        (name::RENDERING_TRANSFORM, Text(value)) => layer_attributes.rendering_transform_name = Some(value),
                        (name::LOOK_MOD_TRANSFORM, Text(value)) => layer_attributes.look_modification_transform_name = Some(value),
                        (name::X_DENSITY, F32(value)) => layer_attributes.horizontal_density = Some(value),

                        (name::OWNER, Text(value)) => layer_attributes.owner = Some(value),
                        (name::COMMENTS, Text(value)) => layer_attributes.comments = Some(value),
                        (name::CAPTURE_DATE, Text(value)) => layer_attributes.capture_date = Some(value),
                        (name::UTC_OFFSET, F32(value)) => layer_attributes.utc_offset = Some(value),
                        (name::LONGITUDE, F32(value)) => layer_attributes.longitude = Some(value),
                        (name::LATITUDE, F32(value)) => layer_attributes.latitude = Some(value),
                        (name::ALTITUDE, F32(value)) => layer_attributes.altitude = Some(value),
                        (name::FOCUS, F32(value)) => layer_attributes.focus = Some(value),
                        (name::EXPOSURE_TIME, F32(value)) => layer_attributes.exposure = Some(value),
                        (name::APERTURE, F32(value)) => layer_attributes.aperture = Some(value),
                        (name::ISO_SPEED, F32(value)) => layer_attributes.iso_speed = Some(value),
                        (name::ENVIRONMENT_MAP, EnvironmentMap(value)) => layer_attributes.environment_map = Some(value),
                        (name::KEY_CODE, KeyCode(value)) => layer_attributes.key_code = Some(value),
                        (name::WRAP_MODES, Text(value)) => layer_attributes.wrap_mode_name = Some(value),
                        (name::FRAMES_PER_SECOND, Rational(value)) => layer_attributes.frames_per_second = Some(value),
                        (name::MULTI_VIEW, TextVector(value)) => layer_attributes.multi_view_names = Some(value),
                        (name::WORLD_TO_CAMERA, Matrix4x4(value)) => layer_attributes.world_to_camera = Some(value),
                        (name::WORLD_TO_NDC, Matrix4x4(value)) => layer_attributes.world_to_normalized_device = Some(value),
                        (name::DEEP_IMAGE_STATE, Rational(value)) => layer_attributes.deep_image_state = Some(value),
                        (name::ORIGINAL_DATA_WINDOW, IntegerBounds(value)) => layer_attributes.original_data_window = Some(value),
                        (name::DWA_COMPRESSION_LEVEL, F32(value)) => layer_attributes.dwa_compression_level = Some(value),
                        (name::PREVIEW, Preview(value)) => layer_attributes.preview = Some(value),
                        (name::VIEW, Text(value)) => layer_attributes.view_name = Some(value),

                        (name::PIXEL_ASPECT, F32(value)) => image_attributes.pixel_aspect = value,
                        (name::TIME_CODE, TimeCode(value)) => image_attributes.time_code = Some(value),
                        (name::CHROMATICITIES, Chromaticities(value)) => image_attributes.chromaticities = Some(value),

                        // insert unknown attributes of these types into the shared attributes,
                        // as they must be the same for all parts
                        (_, value @ Chromaticities(_)) |
                        (_, value @ TimeCode(_)) => {
                            image_attributes.custom.insert(attribute_name, value);
                        },

                        (_, value) => {
                            layer_attributes.custom.insert(attribute_name, value);
                        },
                    }
                },

                // the attribute value itself is broken, but the byte
                // stream is still intact, so reading on is possible
                Err(error) => {
                    if pedantic { return Err(error); }
                }
            }
        }

        let compression = compression.ok_or_else(|| missing_attribute("compression"))?;
        let data_window = data_window.ok_or_else(|| missing_attribute("dataWindow"))?;

        image_attributes.display_window = display_window.ok_or_else(|| missing_attribute("displayWindow"))?;
        layer_attributes.data_position = data_window.position;

        let blocks = match block_type {
            None if requirements.is_single_part_and_tiled => {
                BlockDescription::Tiles(tiles.ok_or_else(|| missing_attribute("tiles"))?)
            },
            Some(block_type) if block_type.is_tiled() => {
                BlockDescription::Tiles(tiles.ok_or_else(|| missing_attribute("tiles"))?)
            },

            _ => BlockDescription::ScanLines,
        };

        // validate the size before computing the chunk count with it
        data_window.validate(None)?;

        let computed_chunk_count = compute_chunk_count(compression, data_window.size, blocks);
        if chunk_count.is_some() && chunk_count != Some(computed_chunk_count) {
            return Err(Error::header("chunk count does not match the data window"));
        }

        Ok(Header {
            compression,
            blocks,

            // always computed ourselves, as the file cannot be trusted
            chunk_count: computed_chunk_count,

            layer_size: data_window.size,

            shared_attributes: image_attributes,
            own_attributes: layer_attributes,

            channels: channels.ok_or_else(|| missing_attribute("channels"))?,
            line_order: line_order.unwrap_or(LineOrder::Unspecified),

            max_samples_per_pixel,
            deep_data_version,
            deep: block_type.map_or(false, attribute::BlockType::is_deep),
        })
    }

    /// Without validation, write this header to the byte stream.
    pub fn write(&self, write: &mut impl Write) -> UnitResult {

        macro_rules! write_attributes {
            ( $($name: ident : $variant: ident = $value: expr),* ) => { $(
                attribute::write($name, & $variant ($value .clone()), write)?;
            )* };
        }

        macro_rules! write_optional_attributes {
            ( $($name: ident : $variant: ident = $value: expr),* ) => { $(
                if let Some(value) = $value {
                    attribute::write($name, & $variant (value.clone()), write)?;
                };
            )* };
        }

        {
            use crate::meta::header::standard_names::*;
            use AttributeValue::*;

            let (block_type, tiles) = match self.blocks {
                BlockDescription::ScanLines => (
                    if self.deep { attribute::BlockType::DeepScanLine } else { attribute::BlockType::ScanLine },
                    None
                ),
                BlockDescription::Tiles(tiles) => (
                    if self.deep { attribute::BlockType::DeepTile } else { attribute::BlockType::Tile },
                    Some(tiles)
                ),
            };

            fn usize_as_i32(value: usize) -> AttributeValue {
                I32(usize_to_i32(value, "attribute value").expect("value exceeds i32 range"))
            }

            write_optional_attributes!(
                TILES: TileDescription = &tiles,
                DEEP_DATA_VERSION: I32 = &self.deep_data_version,
                MAX_SAMPLES: usize_as_i32 = &self.max_samples_per_pixel
            );

            write_attributes!(
                // chunk count is only required for multi-part files,
                // but this library always writes it
                CHUNKS: usize_as_i32 = &self.chunk_count,

                BLOCK_TYPE: BlockType = &block_type,
                CHANNELS: ChannelList = &self.channels,
                COMPRESSION: Compression = &self.compression,
                LINE_ORDER: LineOrder = &self.line_order,
                DATA_WINDOW: IntegerBounds = &self.data_window(),

                DISPLAY_WINDOW: IntegerBounds = &self.shared_attributes.display_window,
                PIXEL_ASPECT: F32 = &self.shared_attributes.pixel_aspect,

                WINDOW_CENTER: FloatVec2 = &self.own_attributes.screen_window_center,
                WINDOW_WIDTH: F32 = &self.own_attributes.screen_window_width
            );

            write_optional_attributes!(
                NAME: Text = &self.own_attributes.name,
                WHITE_LUMINANCE: F32 = &self.own_attributes.white_luminance,
                ADOPTED_NEUTRAL: FloatVec2 = &self.own_attributes.adopted_neutral,
                RENDERING_TRANSFORM: Text = &self.own_attributes.rendering_transform_name,
                LOOK_MOD_TRANSFORM: Text = &self.own_attributes.look_modification_transform_name,
                X_DENSITY: F32 = &self.own_attributes.horizontal_density,
                OWNER: Text = &self.own_attributes.owner,
                COMMENTS: Text = &self.own_attributes.comments,
                CAPTURE_DATE: Text = &self.own_attributes.capture_date,
                UTC_OFFSET: F32 = &self.own_attributes.utc_offset,
                LONGITUDE: F32 = &self.own_attributes.longitude,
                LATITUDE: F32 = &self.own_attributes.latitude,
                ALTITUDE: F32 = &self.own_attributes.altitude,
                FOCUS: F32 = &self.own_attributes.focus,
                EXPOSURE_TIME: F32 = &self.own_attributes.exposure,
                APERTURE: F32 = &self.own_attributes.aperture,
                ISO_SPEED: F32 = &self.own_attributes.iso_speed,
                ENVIRONMENT_MAP: EnvironmentMap = &self.own_attributes.environment_map,
                KEY_CODE: KeyCode = &self.own_attributes.key_code,
                TIME_CODE: TimeCode = &self.shared_attributes.time_code,
                WRAP_MODES: Text = &self.own_attributes.wrap_mode_name,
                FRAMES_PER_SECOND: Rational = &self.own_attributes.frames_per_second,
                MULTI_VIEW: TextVector = &self.own_attributes.multi_view_names,
                WORLD_TO_CAMERA: Matrix4x4 = &self.own_attributes.world_to_camera,
                WORLD_TO_NDC: Matrix4x4 = &self.own_attributes.world_to_normalized_device,
                DEEP_IMAGE_STATE: Rational = &self.own_attributes.deep_image_state,
                ORIGINAL_DATA_WINDOW: IntegerBounds = &self.own_attributes.original_data_window,
                DWA_COMPRESSION_LEVEL: F32 = &self.own_attributes.dwa_compression_level,
                CHROMATICITIES: Chromaticities = &self.shared_attributes.chromaticities,
                PREVIEW: Preview = &self.own_attributes.preview,
                VIEW: Text = &self.own_attributes.view_name
            );
        }

        for (name, value) in &self.shared_attributes.custom {
            attribute::write(name.bytes(), value, write)?;
        }

        for (name, value) in &self.own_attributes.custom {
            attribute::write(name.bytes(), value, write)?;
        }

        sequence_end::write(write)?;
        Ok(())
    }
}

fn missing_attribute(name: &'static str) -> Error {
    Error::header(format!("missing or invalid {} attribute", name))
}


/// Contains the reserved attribute names, as byte strings.
pub mod standard_names {
    macro_rules! define_standard_attribute_names {
        ( $($name: ident : $value: expr),* ) => {

            /// A list containing all reserved names.
            pub const ALL: &'static [&'static [u8]] = &[
                $( $value ),*
            ];

            $(
                /// The byte-string name of this attribute as it appears in an exr file.
                pub const $name: &'static [u8] = $value;
            )*
        };
    }

    define_standard_attribute_names! {
        TILES: b"tiles",
        NAME: b"name",
        BLOCK_TYPE: b"type",
        DEEP_DATA_VERSION: b"version",
        CHUNKS: b"chunkCount",
        MAX_SAMPLES: b"maxSamplesPerPixel",
        CHANNELS: b"channels",
        COMPRESSION: b"compression",
        DATA_WINDOW: b"dataWindow",
        DISPLAY_WINDOW: b"displayWindow",
        LINE_ORDER: b"lineOrder",
        PIXEL_ASPECT: b"pixelAspectRatio",
        WINDOW_CENTER: b"screenWindowCenter",
        WINDOW_WIDTH: b"screenWindowWidth",
        WHITE_LUMINANCE: b"whiteLuminance",
        ADOPTED_NEUTRAL: b"adoptedNeutral",
        RENDERING_TRANSFORM: b"renderingTransform",
        LOOK_MOD_TRANSFORM: b"lookModTransform",
        X_DENSITY: b"xDensity",
        OWNER: b"owner",
        COMMENTS: b"comments",
        CAPTURE_DATE: b"capDate",
        UTC_OFFSET: b"utcOffset",
        LONGITUDE: b"longitude",
        LATITUDE: b"latitude",
        ALTITUDE: b"altitude",
        FOCUS: b"focus",
        EXPOSURE_TIME: b"expTime",
        APERTURE: b"aperture",
        ISO_SPEED: b"isoSpeed",
        ENVIRONMENT_MAP: b"envmap",
        KEY_CODE: b"keyCode",
        TIME_CODE: b"timeCode",
        WRAP_MODES: b"wrapmodes",
        FRAMES_PER_SECOND: b"framesPerSecond",
        MULTI_VIEW: b"multiView",
        WORLD_TO_CAMERA: b"worldToCamera",
        WORLD_TO_NDC: b"worldToNDC",
        DEEP_IMAGE_STATE: b"deepImageState",
        ORIGINAL_DATA_WINDOW: b"originalDataWindow",
        DWA_COMPRESSION_LEVEL: b"dwaCompressionLevel",
        PREVIEW: b"preview",
        VIEW: b"view",
        CHROMATICITIES: b"chromaticities"
    }
}


impl Default for LayerAttributes {
    fn default() -> Self {
        Self {
            data_position: Vec2(0, 0),
            screen_window_center: Vec2(0.0, 0.0),
            screen_window_width: 1.0,
            name: None,
            white_luminance: None,
            adopted_neutral: None,
            rendering_transform_name: None,
            look_modification_transform_name: None,
            horizontal_density: None,
            owner: None,
            comments: None,
            capture_date: None,
            utc_offset: None,
            longitude: None,
            latitude: None,
            altitude: None,
            focus: None,
            exposure: None,
            aperture: None,
            iso_speed: None,
            environment_map: None,
            key_code: None,
            wrap_mode_name: None,
            frames_per_second: None,
            multi_view_names: None,
            world_to_camera: None,
            world_to_normalized_device: None,
            deep_image_state: None,
            original_data_window: None,
            dwa_compression_level: None,
            preview: None,
            view_name: None,
            custom: Default::default(),
        }
    }
}

impl Default for ImageAttributes {
    fn default() -> Self {
        Self {
            pixel_aspect: 1.0,
            chromaticities: None,
            time_code: None,
            custom: Default::default(),
            display_window: Default::default(),
        }
    }
}

impl std::fmt::Debug for LayerAttributes {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let default_self = Self::default();

        let mut debug = formatter.debug_struct("LayerAttributes (only relevant attributes)");

        // always debug the following fields
        debug.field("data_position", &self.data_position);
        debug.field("name", &self.name);

        macro_rules! debug_non_default_fields {
            ( $( $name: ident ),* ) => { $(
                if self.$name != default_self.$name {
                    debug.field(stringify!($name), &self.$name);
                }
            )* };
        }

        // only debug these fields if they are not the default value
        debug_non_default_fields! {
            screen_window_center, screen_window_width,
            white_luminance, adopted_neutral, horizontal_density,
            rendering_transform_name, look_modification_transform_name,
            owner, comments,
            capture_date, utc_offset,
            longitude, latitude, altitude,
            focus, exposure, aperture, iso_speed,
            environment_map, key_code, wrap_mode_name,
            frames_per_second, multi_view_names,
            world_to_camera, world_to_normalized_device,
            deep_image_state, original_data_window,
            dwa_compression_level,
            preview, view_name,
            custom
        }

        debug.finish()
    }
}
