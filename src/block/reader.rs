
//! Read an exr file: magic number, headers, offset tables,
//! and on request, decompressed chunks scattered into a frame buffer.

use std::io::{Read, Seek};

use crate::context::CodecContext;
use crate::error::{Error, Result, UnitResult, u64_to_usize};
use crate::frame::FrameBuffer;
use crate::io::{PeekRead, Tracking};
use crate::meta::{MetaData, OffsetTables, offset_table_is_complete, validate_offset_tables};
use crate::meta::attribute::LineOrder;
use crate::meta::header::Header;
use crate::block::{UncompressedBlock, DeepBlock};
use crate::block::chunk::Chunk;


/// Decodes the meta data of a byte source and then
/// provides random access to its chunks.
#[derive(Debug)]
pub struct ImageReader<R> {
    meta_data: MetaData,
    offset_tables: OffsetTables,
    remaining_reader: PeekRead<Tracking<R>>,
    context: CodecContext,
    pedantic: bool,
}

impl<R: Read + Seek> ImageReader<R> {

    /// Start the reading process with default limits.
    /// Immediately decodes the meta data and the offset tables.
    pub fn read_from_buffered(read: R, pedantic: bool) -> Result<Self> {
        Self::read_from_buffered_with_context(read, CodecContext::default(), pedantic)
    }

    /// Start the reading process.
    /// Immediately decodes the meta data and the offset tables.
    pub fn read_from_buffered_with_context(read: R, context: CodecContext, pedantic: bool) -> Result<Self> {
        let mut remaining_reader = PeekRead::new(Tracking::new(read));
        let meta_data = MetaData::read_validated_from_buffered_peekable(&mut remaining_reader, pedantic)?;

        for header in &meta_data.headers {
            if header.layer_size.width() > context.max_image_dimension
                || header.layer_size.height() > context.max_image_dimension
            {
                return Err(Error::invalid("image dimensions exceed the configured maximum"));
            }
        }

        let mut offset_tables = MetaData::read_offset_tables(&mut remaining_reader, &meta_data.headers)?;
        let chunks_start_byte = remaining_reader.inner().byte_position();

        if offset_table_is_complete(&offset_tables) {
            validate_offset_tables(meta_data.headers.as_slice(), &offset_tables, chunks_start_byte)?;
        }
        else if pedantic {
            return Err(Error::invalid("incomplete offset table"));
        }
        else {
            // an aborted write leaves zeroed offset entries. the chunks that
            // were written are still intact and can be located by scanning
            offset_tables = rebuild_offset_tables(
                &meta_data, &mut remaining_reader, chunks_start_byte
            )?;
        }

        Ok(Self { meta_data, offset_tables, remaining_reader, context, pedantic })
    }

    /// The decoded exr meta data.
    pub fn meta_data(&self) -> &MetaData { &self.meta_data }

    /// The decoded headers of all parts.
    pub fn headers(&self) -> &[Header] { &self.meta_data.headers }

    /// The offset table of each part.
    pub fn offset_tables(&self) -> &OffsetTables { &self.offset_tables }

    /// Read the raw chunk with the specified index within its part,
    /// seeking to its recorded offset. The index counts in increasing-y order.
    /// Other chunks remain readable if this one turns out to be corrupt.
    pub fn read_chunk(&mut self, part_index: usize, chunk_index: usize) -> Result<Chunk> {
        let offset = *self.offset_tables.get(part_index)
            .and_then(|table| table.get(chunk_index))
            .ok_or_else(|| Error::invalid("chunk index out of bounds"))?;

        self.remaining_reader.skip_to(u64_to_usize(offset, "chunk offset")?)?;

        let chunk = Chunk::read(&mut self.remaining_reader, &self.meta_data)
            .map_err(|error| error.while_decoding_chunk(chunk_index))?;

        if chunk.part_index != part_index {
            return Err(Error::invalid("chunk part index does not match the offset table"));
        }

        Ok(chunk)
    }

    /// Read and decompress the flat block with the specified index
    /// within its part. The index counts in increasing-y order.
    pub fn read_block(&mut self, part_index: usize, chunk_index: usize) -> Result<UncompressedBlock> {
        let chunk = self.read_chunk(part_index, chunk_index)?;
        UncompressedBlock::decompress_chunk(chunk, &self.meta_data, &self.context, self.pedantic)
            .map_err(|error| error.while_decoding_chunk(chunk_index))
    }

    /// Read and decompress the deep block with the specified index
    /// within its part. The index counts in increasing-y order.
    pub fn read_deep_block(&mut self, part_index: usize, chunk_index: usize) -> Result<DeepBlock> {
        let chunk = self.read_chunk(part_index, chunk_index)?;
        DeepBlock::decompress_chunk(chunk, &self.meta_data, &self.context, self.pedantic)
            .map_err(|error| error.while_decoding_chunk(chunk_index))
    }

    /// Read all chunks of one flat part, decompress them,
    /// and scatter the samples into the frame buffer.
    ///
    /// Decompression runs on the configured number of workers.
    /// The scatter order honors the line order of the part, so readers
    /// of contiguous ranges seek as little as possible.
    pub fn read_part(&mut self, part_index: usize, frame_buffer: &mut FrameBuffer<'_>) -> UnitResult {
        let header = self.meta_data.headers.get(part_index)
            .ok_or_else(|| Error::invalid("part index out of bounds"))?;

        if header.deep {
            return Err(Error::unsupported("deep parts must be read block by block"));
        }

        frame_buffer.validate_for_channels(&header.channels, header.layer_size)?;

        let chunk_count = header.chunk_count;

        // chunks are stored in line order; read them in storage order
        // to avoid seeking backwards within the file
        let chunk_indices: Vec<usize> = match header.line_order {
            LineOrder::Decreasing => (0 .. chunk_count).rev().collect(),
            _ => (0 .. chunk_count).collect(),
        };

        #[cfg(feature = "rayon")]
        {
            if self.context.worker_count > 1 && header.compression != crate::compression::Compression::Uncompressed {
                return self.read_part_parallel(part_index, frame_buffer, &chunk_indices);
            }
        }

        for &chunk_index in &chunk_indices {
            self.context.cancellation.check()?;

            let block = self.read_block(part_index, chunk_index)?;
            let header = &self.meta_data.headers[part_index];
            frame_buffer.scatter_block(header, &block)?;
        }

        Ok(())
    }

    /// Decompress the chunks of one part on a thread pool.
    /// Workers claim the next chunk index from a shared atomic counter;
    /// the file itself is still read sequentially on the calling thread.
    #[cfg(feature = "rayon")]
    fn read_part_parallel(
        &mut self,
        part_index: usize,
        frame_buffer: &mut FrameBuffer<'_>,
        chunk_indices: &[usize],
    ) -> UnitResult {
        use std::sync::mpsc;

        // borrow the fields separately, so the byte source can advance
        // while the decompressors hold on to the shared meta data
        let meta_data = &self.meta_data;
        let offset_tables = &self.offset_tables;
        let remaining_reader = &mut self.remaining_reader;
        let context = &self.context;
        let pedantic = self.pedantic;

        let mut read_chunk = |chunk_index: usize| -> Result<Chunk> {
            let offset = *offset_tables.get(part_index)
                .and_then(|table| table.get(chunk_index))
                .ok_or_else(|| Error::invalid("chunk index out of bounds"))?;

            remaining_reader.skip_to(u64_to_usize(offset, "chunk offset")?)?;

            Chunk::read(remaining_reader, meta_data)
                .map_err(|error| error.while_decoding_chunk(chunk_index))
        };

        let pool = rayon_core::ThreadPoolBuilder::new()
            .num_threads(context.worker_count)
            .build()
            .map_err(|_| Error::unsupported("worker pool creation failed"))?;

        let max_queued = context.worker_count + 2; // keep all workers busy
        let (sender, receiver) = mpsc::channel::<Result<UncompressedBlock>>();

        let mut currently_decompressing = 0_usize;
        let mut next_chunk = 0_usize;
        let mut scattered = 0_usize;

        let header = &meta_data.headers[part_index];

        pool.in_place_scope(|scope| -> UnitResult {
            while scattered < chunk_indices.len() {
                context.cancellation.check()?;

                // fill the pool with compressed chunks
                while currently_decompressing < max_queued && next_chunk < chunk_indices.len() {
                    let chunk_index = chunk_indices[next_chunk];
                    next_chunk += 1;

                    let chunk = read_chunk(chunk_index)?;
                    let sender = sender.clone();

                    currently_decompressing += 1;

                    scope.spawn(move |_| {
                        let block = UncompressedBlock::decompress_chunk(chunk, meta_data, context, pedantic)
                            .map_err(|error| error.while_decoding_chunk(chunk_index));

                        // the receiver only disconnects after an error,
                        // in which case this result is obsolete anyway
                        let _ = sender.send(block);
                    });
                }

                // wait for any finished block and scatter it.
                // blocks never overlap, so the order does not matter
                let block = receiver.recv().expect("decompressor hung up")?;
                currently_decompressing -= 1;
                scattered += 1;

                frame_buffer.scatter_block(header, &block)?;
            }

            Ok(())
        })
    }
}

/// Scan all chunks sequentially to reconstruct the offset tables.
/// Stops at the first chunk that cannot be parsed, leaving
/// the remaining entries zero.
fn rebuild_offset_tables(
    meta_data: &MetaData,
    read: &mut PeekRead<Tracking<impl Read + Seek>>,
    chunks_start_byte: usize,
) -> Result<OffsetTables> {
    let mut tables: OffsetTables = meta_data.headers.iter()
        .map(|header| vec![0_u64; header.chunk_count])
        .collect();

    let mut next_chunk_index_of_part = vec![0_usize; meta_data.headers.len()];
    let total_chunk_count: usize = meta_data.headers.iter().map(|header| header.chunk_count).sum();

    read.skip_to(chunks_start_byte)?;

    for _ in 0 .. total_chunk_count {
        let chunk_start = read.inner().byte_position();

        let chunk = match Chunk::read(read, meta_data) {
            Ok(chunk) => chunk,
            Err(_) => break, // keep everything that was recovered so far
        };

        let chunk_index = next_chunk_index_of_part[chunk.part_index];
        if chunk_index < tables[chunk.part_index].len() {
            tables[chunk.part_index][chunk_index] = chunk_start as u64;
            next_chunk_index_of_part[chunk.part_index] += 1;
        }
    }

    Ok(tables)
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn garbage_is_rejected_as_magic_number() {
        let bytes = [0_u8; 64];
        let result = ImageReader::read_from_buffered(std::io::Cursor::new(bytes.to_vec()), true);
        assert!(matches!(result, Err(Error::Magic)));

        let result = ImageReader::read_from_buffered(std::io::Cursor::new(vec![]), true);
        assert!(matches!(result, Err(Error::Magic)));
    }
}
