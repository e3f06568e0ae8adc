
//! Read and write OpenEXR images.
//! This crate contains the container format, the ten compression codecs,
//! and the binary16 sample type. It does not contain any unsafe code.

#![warn(
    rust_2018_idioms,
    future_incompatible,
    unused_extern_crates,
    unused,

    missing_copy_implementations,
    missing_debug_implementations,
)]

#![deny(
    unused_variables,
    unused_assignments,
    dead_code,
    unused_must_use,
    trivial_numeric_casts,
)]

#![forbid(unsafe_code)]

pub mod io; // public to allow for custom attribute byte parsing

pub mod math;
pub mod half;
pub mod hash;
pub mod error;
pub mod context;
pub mod meta;
pub mod compression;
pub mod block;
pub mod frame;

#[macro_use]
extern crate smallvec;

/// Re-exports of the types commonly required for reading and writing an exr image.
pub mod prelude {
    pub use crate::meta::{MetaData, Requirements, BlockDescription};
    pub use crate::meta::attribute::{
        AttributeValue, Text, ChannelDescription, ChannelList, SampleType,
        IntegerBounds, LineOrder, TileDescription, LevelMode,
    };
    pub use crate::meta::header::Header;
    pub use crate::compression::Compression;
    pub use crate::half::Half;
    pub use crate::math::{Vec2, RoundingMode};
    pub use crate::error::{Error, Result};
    pub use crate::context::{CodecContext, CancellationToken};
    pub use crate::frame::{FrameBuffer, Slice, SliceData};
    pub use crate::block::reader::ImageReader;
    pub use crate::block::writer::ImageWriter;
}
