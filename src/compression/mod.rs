
//! Contains the compression attribute definition
//! and all methods to compress and decompress chunk data.

// private modules make non-breaking changes easier
mod rle;
mod zip;
mod pxr24;
mod piz;
mod b44;
mod dwa;

pub use dwa::{ChannelRules as DwaChannelRules, Rule as DwaChannelRule, Scheme as DwaScheme};

use crate::error::{Error, Result};
use crate::meta::attribute::{ChannelList, IntegerBounds, SampleType};


/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];

/// Default value of the `dwaCompressionLevel` attribute.
pub const DEFAULT_DWA_COMPRESSION_LEVEL: f32 = 45.0;

/// Specifies which compression method a part uses for its chunks.
///
/// The uncompressed method and the byte-oriented methods (RLE, ZIP)
/// reconstruct every bit. PIZ is also lossless but reorganizes samples
/// through a wavelet and Huffman stage. PXR24, B44, B44A, DWAA and DWAB
/// discard precision for some sample types.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compression {

    /// Store uncompressed values. Produces large files that read and write fastest.
    Uncompressed,

    /// Run-length encoding of byte differences.
    /// Fast, works best for large flat areas such as masks. Lossless.
    RLE,

    /// Deflate every scan line on its own. Lossless.
    ZIPS,

    /// Deflate blocks of 16 scan lines. Smaller but slower than `ZIPS`. Lossless.
    ZIP,

    /// A wavelet transform followed by Huffman coding, 32 scan lines at once.
    /// Best ratios for grainy photographic content. Lossless.
    PIZ,

    /// Like `ZIP`, but rounds `f32` samples to 24 bits before deflating.
    /// Lossless for f16 and u32 data, lossy for f32 data.
    PXR24,

    /// Packs 4×4 blocks of f16 samples into 14 bytes each, a fixed rate.
    /// Channels of other types are not compressed. Lossy.
    B44,

    /// Like `B44`, but flat 4×4 blocks shrink to 3 bytes. Lossy.
    B44A,

    /// DCT-based compression of 32 scan line blocks.
    /// Carries an optional compression level, defaulting to the
    /// `dwaCompressionLevel` attribute default of `45.0`. Lossy.
    DWAA(Option<f32>),

    /// DCT-based compression of 256 scan line blocks.
    /// Larger blocks compress better but need more memory per chunk. Lossy.
    DWAB(Option<f32>),
}

impl std::fmt::Display for Compression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} compression", self.name())
    }
}

impl Compression {

    /// The lower-case name of this method, as used in error messages.
    pub fn name(self) -> &'static str {
        use self::Compression::*;
        match self {
            Uncompressed => "no",
            RLE => "rle",
            ZIPS => "zips",
            ZIP => "zip",
            PIZ => "piz",
            PXR24 => "pxr24",
            B44 => "b44",
            B44A => "b44a",
            DWAA(_) => "dwaa",
            DWAB(_) => "dwab",
        }
    }

    /// Compress the pixel bytes of one block.
    ///
    /// The uncompressed block is the row-major concatenation described in
    /// the file format: for each row, for each channel active on that row,
    /// the little-endian sample bytes. If compressing does not reduce
    /// the size, the original bytes are returned instead, which decoders
    /// recognize by the stored size matching the uncompressed size.
    pub fn compress_block(self, channels: &ChannelList, uncompressed: ByteVec, bounds: IntegerBounds) -> Result<ByteVec> {
        debug_assert_eq!(
            uncompressed.len(), channels.bytes_per_block(bounds),
            "compress called with mismatched block size"
        );

        use self::Compression::*;
        let compressed = match self {
            Uncompressed => return Ok(uncompressed),
            RLE => rle::compress(&uncompressed)?,
            ZIPS | ZIP => zip::compress(&uncompressed)?,
            PIZ => piz::compress(channels, &uncompressed, bounds)?,
            PXR24 => pxr24::compress(channels, &uncompressed, bounds)?,
            B44 => b44::compress(channels, &uncompressed, bounds, false)?,
            B44A => b44::compress(channels, &uncompressed, bounds, true)?,
            DWAA(level) | DWAB(level) => dwa::compress(
                channels, &uncompressed, bounds,
                level.unwrap_or(DEFAULT_DWA_COMPRESSION_LEVEL)
            )?,
        };

        // only store the compressed bytes if they actually shrank
        if compressed.len() < uncompressed.len() { Ok(compressed) }
        else { Ok(uncompressed) }
    }

    /// Decompress the pixel bytes of one block,
    /// producing exactly `expected_byte_size` bytes of block layout.
    ///
    /// A payload whose length equals the uncompressed size
    /// is accepted verbatim, as written by `compress_block`.
    pub fn decompress_block(
        self,
        channels: &ChannelList,
        compressed: ByteVec,
        bounds: IntegerBounds,
        expected_byte_size: usize,
        pedantic: bool,
    ) -> Result<ByteVec> {
        if compressed.len() == expected_byte_size {
            // the compressor fell back to raw bytes for this block
            return Ok(compressed);
        }

        use self::Compression::*;
        let bytes = match self {
            Uncompressed => Ok(compressed),
            RLE => rle::decompress(&compressed, expected_byte_size, pedantic),
            ZIPS | ZIP => zip::decompress(&compressed, expected_byte_size),
            PIZ => piz::decompress(channels, &compressed, bounds, expected_byte_size, pedantic),
            PXR24 => pxr24::decompress(channels, &compressed, bounds, expected_byte_size, pedantic),
            B44 | B44A => b44::decompress(channels, &compressed, bounds, expected_byte_size),
            DWAA(_) | DWAB(_) => dwa::decompress(channels, &compressed, bounds, expected_byte_size, pedantic),
        }?;

        if bytes.len() != expected_byte_size {
            return Err(Error::codec(self.name(), "decompressed an unexpected number of bytes"));
        }

        Ok(bytes)
    }

    /// How many consecutive scan lines one chunk of a scan line part covers.
    pub fn scan_lines_per_block(self) -> usize {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIPS      => 1,
            ZIP | PXR24                    => 16,
            PIZ | B44 | B44A | DWAA(_)     => 32,
            DWAB(_)                        => 256,
        }
    }

    /// Deep data can only be compressed with the byte-oriented methods.
    pub fn supports_deep_data(self) -> bool {
        use self::Compression::*;
        matches!(self, Uncompressed | RLE | ZIPS)
    }

    /// Compress a raw byte buffer that has no pixel layout,
    /// as used for deep sample tables. Only valid for the methods
    /// that support deep data.
    pub(crate) fn compress_bytes(self, bytes: ByteVec) -> Result<ByteVec> {
        use self::Compression::*;
        let compressed = match self {
            Uncompressed => return Ok(bytes),
            RLE => rle::compress(&bytes)?,
            ZIPS => zip::compress(&bytes)?,
            _ => return Err(Error::unsupported("compression method for deep data")),
        };

        if compressed.len() < bytes.len() { Ok(compressed) }
        else { Ok(bytes) }
    }

    /// Decompress a raw byte buffer that has no pixel layout,
    /// as written by `compress_bytes`.
    pub(crate) fn decompress_bytes(self, bytes: ByteVec, expected_byte_size: usize, pedantic: bool) -> Result<ByteVec> {
        if bytes.len() == expected_byte_size {
            return Ok(bytes);
        }

        use self::Compression::*;
        match self {
            Uncompressed => Ok(bytes),
            RLE => rle::decompress(&bytes, expected_byte_size, pedantic),
            ZIPS => zip::decompress(&bytes, expected_byte_size),
            _ => Err(Error::unsupported("compression method for deep data")),
        }
    }

    /// Whether this method reconstructs the exact bytes
    /// for samples of the specified type.
    pub fn is_lossless_for(self, sample_type: SampleType) -> bool {
        use self::Compression::*;
        match self {
            Uncompressed | RLE | ZIPS | ZIP | PIZ => true,
            PXR24 => sample_type != SampleType::F32,
            B44 | B44A => sample_type != SampleType::F16,
            DWAA(_) | DWAB(_) => false,
        }
    }

    /// Whether this method may discard data for any sample type.
    pub fn is_lossy(self) -> bool {
        use self::Compression::*;
        matches!(self, PXR24 | B44 | B44A | DWAA(_) | DWAB(_))
    }
}


/// Byte transformations that prepare pixel data for entropy coding.
/// Applied by RLE, ZIP and PXR24 but not by the transform-based codecs,
/// whose own stages already decorrelate the data.
pub mod bytes {

    /// Replace each byte with the difference to its predecessor, shifted by 128.
    /// Turns flat regions into long runs of `128`.
    pub fn delta_encode(buffer: &mut [u8]) {
        for index in (1 .. buffer.len()).rev() {
            buffer[index] = (buffer[index] as i32 - buffer[index - 1] as i32 + 128) as u8;
        }
    }

    /// Invert `delta_encode` by a running sum.
    pub fn delta_decode(buffer: &mut [u8]) {
        for index in 1 .. buffer.len() {
            buffer[index] = (buffer[index - 1] as i32 + buffer[index] as i32 - 128) as u8;
        }
    }

    /// Reorder bytes such that the first half of the output contains
    /// the even-indexed bytes and the second half the odd-indexed bytes.
    /// Clusters the high exponent bytes of 16-bit samples, which compress well.
    pub fn fork(buffer: &mut [u8], scratch: &mut Vec<u8>) {
        scratch.clear();
        scratch.extend(buffer.iter().step_by(2));
        scratch.extend(buffer.iter().skip(1).step_by(2));
        buffer.copy_from_slice(scratch);
    }

    /// Invert `fork`, restoring the original byte order.
    pub fn interleave(buffer: &mut [u8], scratch: &mut Vec<u8>) {
        scratch.clear();
        scratch.resize(buffer.len(), 0);

        let (first_half, second_half) = buffer.split_at((buffer.len() + 1) / 2);

        for (index, &byte) in first_half.iter().enumerate() {
            scratch[index * 2] = byte;
        }

        for (index, &byte) in second_half.iter().enumerate() {
            scratch[index * 2 + 1] = byte;
        }

        buffer.copy_from_slice(scratch);
    }

    /// Group bytes by their offset within elements of the specified stride:
    /// `[A0,A1, B0,B1, C0,C1]` with stride 2 becomes `[A0,B0,C0, A1,B1,C1]`.
    pub fn group_by_stride(input: &[u8], stride: usize, output: &mut Vec<u8>) {
        debug_assert_ne!(stride, 0, "zero stride");
        output.clear();

        for offset in 0 .. stride {
            output.extend(input.iter().skip(offset).step_by(stride));
        }
    }

    /// Invert `group_by_stride`.
    pub fn ungroup_by_stride(input: &[u8], stride: usize, output: &mut Vec<u8>) {
        debug_assert_ne!(stride, 0, "zero stride");
        debug_assert_eq!(input.len() % stride, 0, "input not divisible by stride");

        output.clear();
        output.resize(input.len(), 0);

        let group_len = input.len() / stride;
        for offset in 0 .. stride {
            for index in 0 .. group_len {
                output[index * stride + offset] = input[offset * group_len + index];
            }
        }
    }


    #[cfg(test)]
    mod test {

        #[test]
        fn roundtrip_fork() {
            let source = vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
            let mut modified = source.clone();
            let mut scratch = Vec::new();

            super::fork(&mut modified, &mut scratch);
            super::interleave(&mut modified, &mut scratch);

            assert_eq!(source, modified);
        }

        #[test]
        fn roundtrip_delta() {
            let source = vec![0, 1, 2, 7, 4, 5, 6, 7, 13, 9, 255];
            let mut modified = source.clone();

            super::delta_encode(&mut modified);
            super::delta_decode(&mut modified);

            assert_eq!(source, modified);
        }

        #[test]
        fn roundtrip_stride_groups() {
            let source: Vec<u8> = (0 .. 24).collect();
            let mut grouped = Vec::new();
            let mut restored = Vec::new();

            for stride in 1 ..= 6 {
                super::group_by_stride(&source, stride, &mut grouped);
                super::ungroup_by_stride(&grouped, stride, &mut restored);
                assert_eq!(source, restored, "stride {}", stride);
            }
        }

        #[test]
        fn stride_groups_cluster_offsets() {
            let source = vec![0xa0, 0xa1, 0xb0, 0xb1, 0xc0, 0xc1];
            let mut grouped = Vec::new();
            super::group_by_stride(&source, 2, &mut grouped);
            assert_eq!(grouped, vec![0xa0, 0xb0, 0xc0, 0xa1, 0xb1, 0xc1]);
        }
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;
    use crate::meta::attribute::{ChannelDescription, ChannelList, SampleType, IntegerBounds};

    fn noise_channels(sample_type: SampleType, count: usize) -> ChannelList {
        let channel = ChannelDescription {
            name: Default::default(),
            sample_type,
            quantize_linearly: false,
            sampling: Vec2(1, 1),
        };

        ChannelList::new((0 .. count).map(|_| channel.clone()).collect())
    }

    fn roundtrip_block(compression: Compression, channels: &ChannelList, bounds: IntegerBounds) {
        let byte_count = channels.bytes_per_block(bounds);
        let pixel_bytes: ByteVec = (0 .. byte_count).map(|_| rand::random()).collect();

        let compressed = compression
            .compress_block(channels, pixel_bytes.clone(), bounds).unwrap();

        let decompressed = compression
            .decompress_block(channels, compressed, bounds, pixel_bytes.len(), true).unwrap();

        assert_eq!(pixel_bytes, decompressed, "{} roundtrip", compression);
    }

    #[test]
    fn lossless_codecs_roundtrip_noise() {
        let bounds = IntegerBounds::new(Vec2(-11, 7), Vec2(79, 65));

        for &compression in &[
            Compression::Uncompressed, Compression::RLE,
            Compression::ZIPS, Compression::ZIP, Compression::PIZ,
        ] {
            for &sample_type in &[SampleType::F16, SampleType::F32, SampleType::U32] {
                roundtrip_block(compression, &noise_channels(sample_type, 3), bounds);
            }
        }
    }

    #[test]
    fn pxr24_is_lossless_for_non_float_samples() {
        let bounds = IntegerBounds::new(Vec2(0, 0), Vec2(33, 17));
        roundtrip_block(Compression::PXR24, &noise_channels(SampleType::F16, 2), bounds);
        roundtrip_block(Compression::PXR24, &noise_channels(SampleType::U32, 2), bounds);
    }

    #[test]
    fn block_row_counts() {
        assert_eq!(Compression::ZIPS.scan_lines_per_block(), 1);
        assert_eq!(Compression::ZIP.scan_lines_per_block(), 16);
        assert_eq!(Compression::PIZ.scan_lines_per_block(), 32);
        assert_eq!(Compression::DWAB(None).scan_lines_per_block(), 256);
    }
}
