
//! Whole-file round trips through the writer and the reader.

extern crate exrio;

use std::io::Cursor;

use exrio::prelude::*;
use exrio::block::{BlockIndex, UncompressedBlock};
use exrio::block::writer::ChunkWriter;
use exrio::context::CancellationToken;
use exrio::math::Vec2;
use exrio::meta::attribute::LevelMode;

use smallvec::smallvec;


fn half_channels(names: &[&str]) -> smallvec::SmallVec<[ChannelDescription; 5]> {
    names.iter()
        .map(|name| ChannelDescription::new(Text::new(name).unwrap(), SampleType::F16, false))
        .collect()
}

fn write_single_part(
    header: Header,
    slices: Vec<(&str, &mut [Half])>,
) -> Vec<u8> {
    let width = header.layer_size.width();
    let meta = MetaData::new(smallvec![header]);

    let mut frame_buffer = FrameBuffer::new();
    for (name, data) in slices {
        frame_buffer.insert(Slice::dense(Text::new(name).unwrap(), width, SliceData::F16(data)));
    }

    let mut bytes = Cursor::new(Vec::new());
    ImageWriter::new(meta)
        .write_from_frame_buffers(&mut bytes, &[&frame_buffer])
        .unwrap();

    bytes.into_inner()
}


#[test]
fn minimal_read() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(4, 4),
        half_channels(&["B", "G", "R"]),
    ).with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing);

    let one = Half::from_f32(1.0);
    let mut b = vec![one; 16];
    let mut g = vec![one; 16];
    let mut r = vec![one; 16];

    let bytes = write_single_part(header, vec![("B", &mut b), ("G", &mut g), ("R", &mut r)]);

    let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes), true).unwrap();

    assert!(!reader.headers()[0].blocks.has_tiles());

    let channel_names: Vec<String> = reader.headers()[0].channels.list.iter()
        .map(|channel| channel.name.to_string())
        .collect();
    assert_eq!(channel_names, vec!["B", "G", "R"]);

    let mut b2 = vec![Half::ZERO; 16];
    let mut g2 = vec![Half::ZERO; 16];
    let mut r2 = vec![Half::ZERO; 16];

    {
        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert(Slice::dense(Text::new("B").unwrap(), 4, SliceData::F16(&mut b2)));
        frame_buffer.insert(Slice::dense(Text::new("G").unwrap(), 4, SliceData::F16(&mut g2)));
        frame_buffer.insert(Slice::dense(Text::new("R").unwrap(), 4, SliceData::F16(&mut r2)));
        reader.read_part(0, &mut frame_buffer).unwrap();
    }

    for sample in b2.iter().chain(&g2).chain(&r2) {
        assert_eq!(sample.to_bits(), 0x3c00);
    }
}


#[test]
fn roundtrip_all_codecs_on_gradient() {
    let codecs: [(Compression, f32); 10] = [
        (Compression::Uncompressed, 0.0),
        (Compression::RLE, 0.0),
        (Compression::ZIPS, 0.0),
        (Compression::ZIP, 0.0),
        (Compression::PIZ, 0.0),
        (Compression::PXR24, 0.0), // lossless for f16
        (Compression::B44, 0.01),
        (Compression::B44A, 0.01),
        (Compression::DWAA(None), 0.05),
        (Compression::DWAB(None), 0.05),
    ];

    let size = Vec2(64, 64);

    let r: Vec<Half> = (0 .. size.area())
        .map(|index| Half::from_f32((index % 64) as f32 / 63.0)).collect();
    let g: Vec<Half> = (0 .. size.area())
        .map(|index| Half::from_f32((index / 64) as f32 / 63.0)).collect();
    let b: Vec<Half> = vec![Half::from_f32(0.5); size.area()];

    for (compression, tolerance) in codecs {
        let header = Header::new(
            Text::new("main").unwrap(),
            size,
            half_channels(&["B", "G", "R"]),
        ).with_encoding(compression, BlockDescription::ScanLines, LineOrder::Increasing);

        let (mut r1, mut g1, mut b1) = (r.clone(), g.clone(), b.clone());
        let bytes = write_single_part(header, vec![("B", &mut b1), ("G", &mut g1), ("R", &mut r1)]);

        let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes), true).unwrap();

        let mut r2 = vec![Half::ZERO; size.area()];
        let mut g2 = vec![Half::ZERO; size.area()];
        let mut b2 = vec![Half::ZERO; size.area()];

        {
            let mut frame_buffer = FrameBuffer::new();
            frame_buffer.insert(Slice::dense(Text::new("B").unwrap(), 64, SliceData::F16(&mut b2)));
            frame_buffer.insert(Slice::dense(Text::new("G").unwrap(), 64, SliceData::F16(&mut g2)));
            frame_buffer.insert(Slice::dense(Text::new("R").unwrap(), 64, SliceData::F16(&mut r2)));
            reader.read_part(0, &mut frame_buffer).unwrap();
        }

        for (expected, actual) in [(&r, &r2), (&g, &g2), (&b, &b2)] {
            for (index, (expected, actual)) in expected.iter().zip(actual.iter()).enumerate() {
                let difference = (expected.to_f32() - actual.to_f32()).abs();
                assert!(
                    difference <= tolerance,
                    "{} failed at sample {}: {} vs {}",
                    compression, index, expected, actual
                );
            }
        }
    }
}


#[test]
fn multi_part_union() {
    let left = Header::new(
        Text::new("left").unwrap(),
        Vec2(100, 100),
        half_channels(&["Y"]),
    ).with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing);

    let right = Header::new(
        Text::new("right").unwrap(),
        Vec2(100, 100),
        half_channels(&["Y"]),
    )
        .with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing)
        .with_position(Vec2(50, 0));

    let meta = MetaData::new(smallvec![left, right]);
    assert!(meta.requirements.is_multipart());

    // a 100 row part with 16-line zip blocks has ceil(100/16) chunks
    assert_eq!(meta.headers[0].chunk_count, 7);
    assert_eq!(meta.headers[1].chunk_count, 7);

    let mut left_pixels = vec![Half::from_f32(1.0); 100 * 100];
    let mut right_pixels = vec![Half::from_f32(2.0); 100 * 100];

    let mut bytes = Cursor::new(Vec::new());

    {
        let mut left_buffer = FrameBuffer::new();
        left_buffer.insert(Slice::dense(Text::new("Y").unwrap(), 100, SliceData::F16(&mut left_pixels)));

        let mut right_buffer = FrameBuffer::new();
        right_buffer.insert(Slice::dense(Text::new("Y").unwrap(), 100, SliceData::F16(&mut right_pixels)));

        ImageWriter::new(meta)
            .write_from_frame_buffers(&mut bytes, &[&left_buffer, &right_buffer])
            .unwrap();
    }

    // merge both parts into the union of their data windows, (0,0) to (149,99)
    let union_width = 150;
    let mut union = vec![Half::ZERO; union_width * 100];

    let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes.into_inner()), true).unwrap();
    assert_eq!(reader.headers().len(), 2);

    // every offset table entry leads to the chunk it claims to lead to
    for part_index in 0 .. 2 {
        for chunk_index in 0 .. 7 {
            let chunk = reader.read_chunk(part_index, chunk_index).unwrap();
            assert_eq!(chunk.part_index, part_index);

            match chunk.block.locator() {
                exrio::block::chunk::ChunkLocator::ScanLine { y_coordinate } =>
                    assert_eq!(y_coordinate, chunk_index as i32 * 16),

                other => panic!("expected a scan line chunk, got {:?}", other),
            }
        }
    }

    {
        let mut left_target = FrameBuffer::new();
        left_target.insert(Slice {
            channel: Text::new("Y").unwrap(),
            data: SliceData::F16(&mut union),
            stride: Vec2(1, union_width),
            sampling: Vec2(1, 1),
        });

        reader.read_part(0, &mut left_target).unwrap();
    }

    {
        // the right part starts 50 pixels into each union row
        let mut right_target = FrameBuffer::new();
        right_target.insert(Slice {
            channel: Text::new("Y").unwrap(),
            data: SliceData::F16(&mut union[50 ..]),
            stride: Vec2(1, union_width),
            sampling: Vec2(1, 1),
        });

        reader.read_part(1, &mut right_target).unwrap();
    }

    for y in 0 .. 100 {
        let row = &union[y * union_width .. (y + 1) * union_width];

        for (x, sample) in row.iter().enumerate() {
            let expected = if x < 50 { 1.0 } else { 2.0 };
            assert_eq!(sample.to_f32(), expected, "pixel ({}, {})", x, y);
        }
    }
}


#[test]
fn mip_map_tiled_write() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(1024, 1024),
        smallvec![ChannelDescription::new(Text::new("Z").unwrap(), SampleType::F32, false)],
    ).with_encoding(
        Compression::ZIP,
        BlockDescription::Tiles(TileDescription {
            tile_size: Vec2(64, 64),
            level_mode: LevelMode::MipMap,
            rounding_mode: RoundingMode::Down,
        }),
        LineOrder::Increasing,
    );

    // 11 levels of 1024, 512, ..., 1; 347 tiles in total
    assert_eq!(header.chunk_count, 347);

    let meta = MetaData::new(smallvec![header]);
    let mut bytes = Cursor::new(Vec::new());

    // each block is filled with its level index as an f32 value
    ImageWriter::new(meta)
        .write_from_blocks(&mut bytes, |_header, block: BlockIndex| {
            let value = block.level.x() as f32;
            let mut data = Vec::with_capacity(block.pixel_size.area() * 4);
            for _ in 0 .. block.pixel_size.area() {
                data.extend_from_slice(&value.to_le_bytes());
            }

            Ok(data)
        })
        .unwrap();

    let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes.into_inner()), true).unwrap();

    let mut seen_levels = std::collections::HashSet::new();

    for chunk_index in 0 .. 347 {
        let block: UncompressedBlock = reader.read_block(0, chunk_index).unwrap();
        seen_levels.insert(block.index.level.x());

        let expected = block.index.level.x() as f32;
        for sample in block.data.chunks_exact(4) {
            let sample = f32::from_le_bytes([sample[0], sample[1], sample[2], sample[3]]);
            assert_eq!(sample, expected, "chunk {}", chunk_index);
        }
    }

    assert_eq!(seen_levels.len(), 11);
}


#[test]
fn corrupt_chunk_is_reported_with_index_and_others_remain_readable() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(64, 64),
        half_channels(&["G"]),
    ).with_encoding(Compression::PIZ, BlockDescription::ScanLines, LineOrder::Increasing);

    // two piz chunks of 32 scan lines each
    assert_eq!(header.chunk_count, 2);

    let mut g: Vec<Half> = (0 .. 64 * 64).map(|index| Half::from_f32((index % 100) as f32)).collect();
    let mut bytes = write_single_part(header, vec![("G", &mut g)]);

    // locate the first chunk and overwrite its payload with garbage
    let first_chunk_offset = {
        let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes.clone()), true).unwrap();
        assert!(reader.read_block(0, 0).is_ok());
        reader.offset_tables()[0][0] as usize
    };

    let packed_size = i32::from_le_bytes([
        bytes[first_chunk_offset + 4], bytes[first_chunk_offset + 5],
        bytes[first_chunk_offset + 6], bytes[first_chunk_offset + 7],
    ]) as usize;

    for byte in &mut bytes[first_chunk_offset + 8 .. first_chunk_offset + 8 + packed_size] {
        *byte = 0xff;
    }

    let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes), true).unwrap();

    match reader.read_block(0, 0) {
        Err(Error::Codec { codec, chunk: Some(0), .. }) => assert_eq!(codec, "piz"),
        other => panic!("expected a codec error for chunk 0, got {:?}", other.map(|_| ())),
    }

    // the second chunk is still intact and decodable
    let second = reader.read_block(0, 1).unwrap();
    assert_eq!(second.index.pixel_position, Vec2(0, 32));
}


#[test]
fn truncated_files_yield_errors_not_panics() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(16, 16),
        half_channels(&["G"]),
    ).with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing);

    let mut g = vec![Half::from_f32(0.25); 16 * 16];
    let bytes = write_single_part(header, vec![("G", &mut g)]);

    let try_read = |bytes: Vec<u8>| -> Result<()> {
        let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes), true)?;

        let mut g = vec![Half::ZERO; 16 * 16];
        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert(Slice::dense(Text::new("G").unwrap(), 16, SliceData::F16(&mut g)));
        reader.read_part(0, &mut frame_buffer)
    };

    assert!(try_read(bytes.clone()).is_ok());

    // cutting the file anywhere behind the magic number must
    // produce an error and never a panic
    for length in (4 .. bytes.len()).step_by(13).chain([bytes.len() - 1]) {
        assert!(
            try_read(bytes[.. length].to_vec()).is_err(),
            "no error for file truncated to {} bytes", length
        );
    }
}


#[test]
fn dwa_keeps_masks_lossless() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(64, 64),
        half_channels(&["A", "R"]),
    ).with_encoding(Compression::DWAA(None), BlockDescription::ScanLines, LineOrder::Increasing);

    let alpha: Vec<Half> = (0 .. 64 * 64)
        .map(|index| Half::from_f32(if (index / 13) % 2 == 0 { 1.0 } else { 0.0 }))
        .collect();

    let red: Vec<Half> = (0 .. 64 * 64)
        .map(|index| Half::from_f32(index as f32 / 4096.0))
        .collect();

    let (mut alpha1, mut red1) = (alpha.clone(), red.clone());
    let bytes = write_single_part(header, vec![("A", &mut alpha1), ("R", &mut red1)]);

    let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes), true).unwrap();

    let mut alpha2 = vec![Half::ZERO; 64 * 64];
    let mut red2 = vec![Half::ZERO; 64 * 64];

    {
        let mut frame_buffer = FrameBuffer::new();
        frame_buffer.insert(Slice::dense(Text::new("A").unwrap(), 64, SliceData::F16(&mut alpha2)));
        frame_buffer.insert(Slice::dense(Text::new("R").unwrap(), 64, SliceData::F16(&mut red2)));
        reader.read_part(0, &mut frame_buffer).unwrap();
    }

    // the alpha matte routes around the dct and survives bit for bit
    for (expected, actual) in alpha.iter().zip(&alpha2) {
        assert_eq!(expected.to_bits(), actual.to_bits());
    }

    // the color channel is allowed to lose a little
    for (expected, actual) in red.iter().zip(&red2) {
        assert!((expected.to_f32() - actual.to_f32()).abs() < 0.1);
    }
}


#[test]
fn cancellation_stops_at_chunk_boundaries() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(32, 32),
        half_channels(&["G"]),
    ).with_encoding(Compression::ZIP, BlockDescription::ScanLines, LineOrder::Increasing);

    let mut g = vec![Half::from_f32(0.5); 32 * 32];
    let bytes = write_single_part(header, vec![("G", &mut g)]);

    let token = CancellationToken::new();
    token.cancel();

    let context = CodecContext::new()
        .with_worker_count(1)
        .with_cancellation(token);

    let mut reader = ImageReader::read_from_buffered_with_context(
        Cursor::new(bytes), context, true
    ).unwrap();

    let mut g2 = vec![Half::ZERO; 32 * 32];
    let mut frame_buffer = FrameBuffer::new();
    frame_buffer.insert(Slice::dense(Text::new("G").unwrap(), 32, SliceData::F16(&mut g2)));

    assert!(matches!(reader.read_part(0, &mut frame_buffer), Err(Error::Cancelled)));
}


#[test]
fn aborted_write_leaves_a_detectably_incomplete_file() {
    let header = Header::new(
        Text::new("main").unwrap(),
        Vec2(8, 2),
        half_channels(&["G"]),
    ).with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, LineOrder::Increasing);

    let meta = MetaData::new(smallvec![header]);
    let mut bytes = Cursor::new(Vec::new());

    // write the headers and one of two chunks, then abort
    {
        let mut chunk_writer = ChunkWriter::begin(&mut bytes, &meta, true).unwrap();

        let block = UncompressedBlock {
            index: BlockIndex {
                part: 0,
                pixel_position: Vec2(0, 0),
                pixel_size: Vec2(8, 1),
                level: Vec2(0, 0),
            },
            data: vec![0_u8; 8 * 2],
        };

        let chunk = block.compress_to_chunk(&meta.headers).unwrap();
        chunk_writer.write_chunk(0, chunk).unwrap();
        // dropped without complete()
    }

    let bytes = bytes.into_inner();

    // the strict reader rejects the zeroed offset table
    assert!(ImageReader::read_from_buffered(Cursor::new(bytes.clone()), true).is_err());

    // the lenient reader recovers the chunk that was written
    let mut reader = ImageReader::read_from_buffered(Cursor::new(bytes), false).unwrap();
    assert!(reader.read_block(0, 0).is_ok());
    assert!(reader.read_block(0, 1).is_err());
}
