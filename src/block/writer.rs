
//! Write an exr file: magic number, headers, a zeroed offset table
//! placeholder, the compressed chunks, and finally the patched offset table.

use std::collections::BTreeMap;
use std::io::{Seek, Write};

use crate::context::CodecContext;
use crate::error::{Error, Result, UnitResult, usize_to_u64};
use crate::frame::FrameBuffer;
use crate::io::{Data, Tracking};
use crate::meta::{MetaData, OffsetTables};
use crate::meta::header::Header;
use crate::block::{UncompressedBlock, DeepBlock, enumerate_ordered_header_block_indices};
use crate::block::chunk::Chunk;


/// Writes the meta data up front and then accepts chunks,
/// patching the offset tables when finished.
///
/// Chunks must arrive in the order declared by each part's line order.
/// If writing is aborted, the offset table remains zeroed, which marks
/// the file as incomplete but keeps all finished chunks recoverable.
#[derive(Debug)]
#[must_use]
pub struct ChunkWriter<W> {
    header_count: usize,
    byte_writer: Tracking<W>,
    offset_table_start_byte: usize,
    offset_tables: OffsetTables,
}

impl<W: Write + Seek> ChunkWriter<W> {

    /// Validate the meta data and write it to the byte destination,
    /// followed by a zeroed offset table placeholder.
    pub fn begin(buffered_write: W, meta_data: &MetaData, pedantic: bool) -> Result<Self> {
        let mut write = Tracking::new(buffered_write);
        meta_data.write_validating_to_buffered(&mut write, pedantic)?;

        let offset_table_start_byte = write.byte_position();
        let offset_table_size: usize = meta_data.headers.iter().map(|header| header.chunk_count).sum();

        // zeroed offset tables mark the file as incomplete
        // until they are patched at the very end
        write.seek_write_to(offset_table_start_byte + offset_table_size * u64::BYTE_SIZE)?;

        let offset_tables = meta_data.headers.iter()
            .map(|header| vec![0_u64; header.chunk_count])
            .collect();

        Ok(ChunkWriter {
            header_count: meta_data.headers.len(),
            byte_writer: write,
            offset_table_start_byte,
            offset_tables,
        })
    }

    /// Write a single chunk, recording its offset under the specified
    /// index within its part, counted in increasing-y order.
    /// Chunks of different parts may be interleaved in any order.
    pub fn write_chunk(&mut self, index_in_part_increasing_y: usize, chunk: Chunk) -> UnitResult {
        let part_offsets = self.offset_tables.get_mut(chunk.part_index)
            .ok_or_else(|| Error::invalid("chunk part index"))?;

        let offset_slot = part_offsets.get_mut(index_in_part_increasing_y)
            .ok_or_else(|| Error::invalid("chunk index out of bounds"))?;

        if *offset_slot != 0 {
            return Err(Error::invalid("chunk at this index was already written"));
        }

        *offset_slot = usize_to_u64(self.byte_writer.byte_position());
        chunk.write(&mut self.byte_writer, self.header_count)?;
        Ok(())
    }

    /// The number of chunks that the complete file must contain.
    pub fn total_chunk_count(&self) -> usize {
        self.offset_tables.iter().map(Vec::len).sum()
    }

    /// Seek back and overwrite the offset table placeholder
    /// with the recorded offsets, then flush the byte destination.
    /// Fails if any chunk has not been written.
    pub fn complete(mut self) -> UnitResult {
        if self.offset_tables.iter().flatten().any(|&offset| offset == 0) {
            return Err(Error::invalid("some chunks have not been written yet"));
        }

        self.byte_writer.seek_write_to(self.offset_table_start_byte)?;

        for table in &self.offset_tables {
            u64::write_slice(&mut self.byte_writer, table.as_slice())?;
        }

        // catch possibly delayed io errors before returning
        self.byte_writer.flush()?;
        Ok(())
    }
}


/// Reorders chunks arriving in arbitrary order into the file order.
/// Required when compressing in parallel while the line order is specified.
#[derive(Debug)]
#[must_use]
struct SortedChunkWriter<'w, W> {
    chunk_writer: &'w mut ChunkWriter<W>,
    pending_chunks: BTreeMap<usize, (usize, Chunk)>,
    next_chunk_index: usize,
}

impl<'w, W: Write + Seek> SortedChunkWriter<'w, W> {

    fn new(chunk_writer: &'w mut ChunkWriter<W>) -> Self {
        SortedChunkWriter {
            chunk_writer,
            pending_chunks: BTreeMap::new(),
            next_chunk_index: 0,
        }
    }

    /// Write the chunk with the specified position in the whole file,
    /// or stash it until all earlier chunks have arrived.
    fn write_or_stash_chunk(&mut self, chunk_index_in_file: usize, chunk_y_index: usize, chunk: Chunk) -> UnitResult {
        if chunk_index_in_file != self.next_chunk_index {
            self.pending_chunks.insert(chunk_index_in_file, (chunk_y_index, chunk));
            return Ok(());
        }

        self.chunk_writer.write_chunk(chunk_y_index, chunk)?;
        self.next_chunk_index += 1;

        // write all stashed chunks that are now next in line
        while let Some((chunk_y_index, chunk)) = self.pending_chunks.remove(&self.next_chunk_index) {
            self.chunk_writer.write_chunk(chunk_y_index, chunk)?;
            self.next_chunk_index += 1;
        }

        Ok(())
    }
}


/// Writes a complete image from frame buffers,
/// compressing blocks sequentially or on a worker pool.
#[derive(Debug)]
pub struct ImageWriter {
    meta_data: MetaData,
    context: CodecContext,
}

impl ImageWriter {

    /// Prepare writing an image with the specified meta data and default limits.
    pub fn new(meta_data: MetaData) -> Self {
        Self::with_context(meta_data, CodecContext::default())
    }

    /// Prepare writing an image with the specified meta data and limits.
    pub fn with_context(meta_data: MetaData, context: CodecContext) -> Self {
        ImageWriter { meta_data, context }
    }

    /// The meta data this writer produces.
    pub fn meta_data(&self) -> &MetaData { &self.meta_data }

    /// Write the complete file: headers, all chunks gathered from
    /// one frame buffer per part, and the offset tables.
    ///
    /// On any error, the offset table is not patched, leaving
    /// a detectably incomplete file without truncating past writes.
    pub fn write_from_frame_buffers<W: Write + Seek>(
        self, buffered_write: W, frame_buffers: &[&FrameBuffer<'_>],
    ) -> UnitResult {
        if frame_buffers.len() != self.meta_data.headers.len() {
            return Err(Error::invalid("expected one frame buffer per part"));
        }

        for (header, frame_buffer) in self.meta_data.headers.iter().zip(frame_buffers) {
            if header.deep {
                return Err(Error::unsupported("deep parts must be written chunk by chunk"));
            }

            if let crate::meta::BlockDescription::Tiles(tiles) = header.blocks {
                if tiles.level_mode != crate::meta::attribute::LevelMode::Singular {
                    // a frame buffer only describes the full resolution;
                    // smaller levels are written through the block interface
                    return Err(Error::unsupported("resolution levels must be written from blocks"));
                }
            }

            frame_buffer.validate_for_channels(&header.channels, header.layer_size)?;

            // fail if any channel has no slice, before writing any byte
            for channel in &header.channels.list {
                if !frame_buffer.slices.iter().any(|slice| slice.channel == channel.name) {
                    return Err(Error::invalid("missing slice for a channel of the file"));
                }
            }
        }

        let mut chunk_writer = ChunkWriter::begin(buffered_write, &self.meta_data, true)?;

        #[cfg(feature = "rayon")]
        {
            let compressed_parts = self.meta_data.headers.iter()
                .any(|header| header.compression != crate::compression::Compression::Uncompressed);

            if self.context.worker_count > 1 && compressed_parts {
                self.write_all_blocks_parallel(&mut chunk_writer, frame_buffers)?;
                return chunk_writer.complete();
            }
        }

        for (index_in_part, block_index) in enumerate_ordered_header_block_indices(&self.meta_data.headers) {
            self.context.cancellation.check()?;

            let header = &self.meta_data.headers[block_index.part];
            let data = frame_buffers[block_index.part].gather_block(header, block_index)?;

            let chunk = UncompressedBlock { index: block_index, data }
                .compress_to_chunk(&self.meta_data.headers)?;

            chunk_writer.write_chunk(index_in_part, chunk)?;
        }

        chunk_writer.complete()
    }

    /// Compress all blocks on a worker pool, writing them
    /// to the file in the order required by the line order.
    #[cfg(feature = "rayon")]
    fn write_all_blocks_parallel<W: Write + Seek>(
        &self, chunk_writer: &mut ChunkWriter<W>, frame_buffers: &[&FrameBuffer<'_>],
    ) -> UnitResult {
        use std::sync::mpsc;

        let pool = rayon_core::ThreadPoolBuilder::new()
            .num_threads(self.context.worker_count)
            .build()
            .map_err(|_| Error::unsupported("worker pool creation failed"))?;

        let max_queued = self.context.worker_count + 2;
        let (sender, receiver) = mpsc::channel::<Result<(usize, usize, Chunk)>>();

        let headers = &self.meta_data.headers;
        let context = &self.context;

        let mut sorted_writer = SortedChunkWriter::new(chunk_writer);
        let block_count = headers.iter().map(|header| header.chunk_count).sum::<usize>();

        let mut blocks = enumerate_ordered_header_block_indices(headers).enumerate();
        let mut currently_compressing = 0_usize;
        let mut written = 0_usize;

        pool.in_place_scope(|scope| -> UnitResult {
            while written < block_count {
                context.cancellation.check()?;

                while currently_compressing < max_queued {
                    let (file_index, (index_in_part, block_index)) = match blocks.next() {
                        Some(next) => next,
                        None => break,
                    };

                    // gathering is cheap compared to compression,
                    // so it stays on the calling thread
                    let header = &headers[block_index.part];
                    let data = frame_buffers[block_index.part].gather_block(header, block_index)?;

                    let sender = sender.clone();
                    currently_compressing += 1;

                    scope.spawn(move |_| {
                        let chunk = UncompressedBlock { index: block_index, data }
                            .compress_to_chunk(headers);

                        let _ = sender.send(chunk.map(|chunk| (file_index, index_in_part, chunk)));
                    });
                }

                let (file_index, index_in_part, chunk) = receiver.recv().expect("compressor hung up")?;
                currently_compressing -= 1;
                written += 1;

                sorted_writer.write_or_stash_chunk(file_index, index_in_part, chunk)?;
            }

            Ok(())
        })
    }

    /// Write the complete file, requesting the uncompressed byte content
    /// of every block from the specified closure. Unlike the frame buffer
    /// interface, this covers mip map and rip map levels: the closure
    /// receives every block of every level in file order.
    pub fn write_from_blocks<W: Write + Seek>(
        self, buffered_write: W,
        mut get_block_data: impl FnMut(&Header, crate::block::BlockIndex) -> Result<Vec<u8>>,
    ) -> UnitResult {
        let mut chunk_writer = ChunkWriter::begin(buffered_write, &self.meta_data, true)?;

        for (index_in_part, block_index) in enumerate_ordered_header_block_indices(&self.meta_data.headers) {
            self.context.cancellation.check()?;

            let header = &self.meta_data.headers[block_index.part];
            let data = get_block_data(header, block_index)?;

            let chunk = UncompressedBlock { index: block_index, data }
                .compress_to_chunk(&self.meta_data.headers)?;

            chunk_writer.write_chunk(index_in_part, chunk)?;
        }

        chunk_writer.complete()
    }

    /// Write a complete deep file from caller-assembled deep blocks.
    /// The blocks must be supplied in increasing-y order per part.
    pub fn write_from_deep_blocks<W: Write + Seek>(
        self, buffered_write: W,
        blocks: impl Iterator<Item = Result<DeepBlock>>,
    ) -> UnitResult {
        let mut chunk_writer = ChunkWriter::begin(buffered_write, &self.meta_data, true)?;
        let mut next_index_of_part = vec![0_usize; self.meta_data.headers.len()];

        for block in blocks {
            self.context.cancellation.check()?;

            let block = block?;
            let part_index = block.index.part;

            let chunk = block.compress_to_chunk(&self.meta_data.headers)?;

            let index_in_part = next_index_of_part.get_mut(part_index)
                .ok_or_else(|| Error::invalid("block part index"))?;

            chunk_writer.write_chunk(*index_in_part, chunk)?;
            *index_in_part += 1;
        }

        chunk_writer.complete()
    }
}


#[cfg(test)]
mod test {
    use super::*;
    use crate::math::Vec2;
    use crate::block::chunk::{CompressedBlock, CompressedScanLineBlock};
    use crate::compression::Compression;
    use crate::meta::BlockDescription;
    use crate::meta::attribute::{ChannelDescription, SampleType, Text, LineOrder};

    fn tiny_meta() -> MetaData {
        MetaData::new(smallvec![
            Header::new(
                Text::new("main").unwrap(),
                Vec2(4, 2),
                smallvec![ChannelDescription::new(Text::new("G").unwrap(), SampleType::F16, false)],
            ).with_encoding(Compression::Uncompressed, BlockDescription::ScanLines, LineOrder::Increasing)
        ])
    }

    fn tiny_chunk(y_coordinate: i32) -> Chunk {
        Chunk {
            part_index: 0,
            block: CompressedBlock::ScanLine(CompressedScanLineBlock {
                y_coordinate,
                compressed_pixels: vec![0_u8; 4 * 2],
            }),
        }
    }

    #[test]
    fn incomplete_files_are_not_finalized() {
        let meta = tiny_meta();
        assert_eq!(meta.headers[0].chunk_count, 2);

        let mut writer = ChunkWriter::begin(std::io::Cursor::new(Vec::new()), &meta, true).unwrap();
        writer.write_chunk(0, tiny_chunk(0)).unwrap();

        // the second chunk is missing
        assert!(writer.complete().is_err());
    }

    #[test]
    fn duplicate_chunks_are_rejected() {
        let meta = tiny_meta();

        let mut writer = ChunkWriter::begin(std::io::Cursor::new(Vec::new()), &meta, true).unwrap();
        writer.write_chunk(0, tiny_chunk(0)).unwrap();
        assert!(writer.write_chunk(0, tiny_chunk(0)).is_err());
    }

    #[test]
    fn sorted_writer_reorders_chunks() {
        let meta = tiny_meta();

        let mut writer = ChunkWriter::begin(std::io::Cursor::new(Vec::new()), &meta, true).unwrap();
        let mut sorted = SortedChunkWriter::new(&mut writer);

        // the second chunk arrives first and is stashed
        sorted.write_or_stash_chunk(1, 1, tiny_chunk(1)).unwrap();
        sorted.write_or_stash_chunk(0, 0, tiny_chunk(0)).unwrap();

        writer.complete().unwrap();
    }
}
