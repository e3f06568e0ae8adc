
//! Specialized binary input and output.
//! All numbers and sequences that appear in an exr file are little-endian.

pub use std::io::{Read, Write, Seek, SeekFrom};
use lebe::prelude::*;
use crate::error::{Error, Result, UnitResult, IoResult, i32_to_usize, usize_to_i32};


/// Skip the specified number of bytes without seeking.
pub fn skip_bytes(read: &mut impl Read, count: u64) -> UnitResult {
    let skipped = std::io::copy(
        &mut read.by_ref().take(count),
        &mut std::io::sink()
    )?;

    if skipped < count { return Err(Error::invalid("unexpected end of input")); }
    Ok(())
}


/// A byte reader that can peek at the next byte without consuming it.
/// Used to detect the null byte that terminates header sequences.
#[derive(Debug)]
pub struct PeekRead<T> {
    inner: T,
    peeked: Option<IoResult<u8>>,
}

impl<T: Read> PeekRead<T> {

    /// Wrap a reader to enable peeking.
    pub fn new(inner: T) -> Self {
        Self { inner, peeked: None }
    }

    /// Inspect the next byte without consuming it.
    pub fn peek_u8(&mut self) -> &IoResult<u8> {
        self.peeked = self.peeked.take()
            .or_else(|| Some(u8::read_from_little_endian(&mut self.inner)));

        self.peeked.as_ref().unwrap() // unwrap cannot fail because we just set it
    }

    /// Consume the next byte if it equals the specified value.
    pub fn skip_if_eq(&mut self, value: u8) -> IoResult<bool> {
        match self.peek_u8() {
            Ok(peeked) if *peeked == value => {
                self.peeked = None;
                Ok(true)
            },

            Ok(_) => Ok(false),
            Err(_) => Err(self.peeked.take().unwrap().err().unwrap()),
        }
    }
}

impl<T: Read> Read for PeekRead<T> {
    fn read(&mut self, target: &mut [u8]) -> IoResult<usize> {
        if target.is_empty() { return Ok(0) }

        match self.peeked.take() {
            None => self.inner.read(target),
            Some(peeked) => {
                target[0] = peeked?;
                Ok(1 + self.inner.read(&mut target[1..])?)
            }
        }
    }
}

impl<T: Read + Seek> PeekRead<Tracking<T>> {

    /// Seek this reader to the specified byte position.
    /// Discards any peeked byte.
    pub fn skip_to(&mut self, position: usize) -> std::io::Result<()> {
        self.inner.seek_read_to(position)?;
        self.peeked = None;
        Ok(())
    }
}

impl<T> PeekRead<T> {

    /// The wrapped reader.
    pub fn inner(&mut self) -> &mut T { &mut self.inner }
}


/// Remembers the current byte position of a reader or writer,
/// so that seeking can be expressed in absolute positions.
#[derive(Debug)]
pub struct Tracking<T> {
    inner: T,
    position: usize,
}

impl<T> Tracking<T> {

    /// Wrap a reader or writer, starting to count at zero.
    pub fn new(inner: T) -> Self {
        Tracking { inner, position: 0 }
    }

    /// The number of bytes that have been read or written so far,
    /// or the position seeked to.
    pub fn byte_position(&self) -> usize {
        self.position
    }
}

impl<T: Read> Read for Tracking<T> {
    fn read(&mut self, buffer: &mut [u8]) -> IoResult<usize> {
        let count = self.inner.read(buffer)?;
        self.position += count;
        Ok(count)
    }
}

impl<T: Write> Write for Tracking<T> {
    fn write(&mut self, buffer: &[u8]) -> IoResult<usize> {
        let count = self.inner.write(buffer)?;
        self.position += count;
        Ok(count)
    }

    fn flush(&mut self) -> IoResult<()> {
        self.inner.flush()
    }
}

impl<T: Read + Seek> Tracking<T> {

    /// Move the read position to the specified absolute byte index.
    /// Skips forward without seeking where that is cheaper.
    pub fn seek_read_to(&mut self, target_position: usize) -> std::io::Result<()> {
        let delta = target_position as i128 - self.position as i128;

        if delta > 0 && delta < 16 { // skipping few bytes is faster than seeking
            std::io::copy(
                &mut self.inner.by_ref().take(delta as u64),
                &mut std::io::sink()
            )?;
        }
        else if delta != 0 {
            self.inner.seek(SeekFrom::Start(target_position as u64))?;
        }

        self.position = target_position;
        Ok(())
    }
}

impl<T: Write + Seek> Tracking<T> {

    /// Move the write position to the specified absolute byte index.
    /// Fills any gap with zero bytes instead of seeking past the end.
    pub fn seek_write_to(&mut self, target_position: usize) -> std::io::Result<()> {
        if target_position < self.position {
            self.inner.seek(SeekFrom::Start(target_position as u64))?;
        }
        else if target_position > self.position {
            std::io::copy(
                &mut std::io::repeat(0).take((target_position - self.position) as u64),
                &mut self.inner
            )?;
        }

        self.position = target_position;
        Ok(())
    }
}


/// Extension trait for reading and writing the primitive types
/// that appear in an exr file, always little-endian.
pub trait Data: Sized + Default + Clone + Copy {

    /// Number of bytes this would consume in an exr file.
    const BYTE_SIZE: usize = std::mem::size_of::<Self>();

    /// Read a value of this type from the byte stream.
    fn read(read: &mut impl Read) -> Result<Self>;

    /// Fill the slice with values from the byte stream.
    fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult;

    /// Write this value to the byte stream.
    fn write(self, write: &mut impl Write) -> UnitResult;

    /// Write all values of the slice to the byte stream.
    fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult;

    /// Read a vector of the specified length. The `hard_max` protects
    /// against allocating enormous buffers for corrupted length fields:
    /// lengths beyond it fail immediately, lengths beyond `soft_max`
    /// are read incrementally so that truncated files fail early.
    fn read_vec(read: &mut impl Read, data_size: usize, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        if let Some(hard_max) = hard_max {
            if data_size > hard_max {
                return Err(Error::invalid(purpose));
            }
        }

        if data_size <= soft_max {
            let mut vec = vec![Self::default(); data_size];
            Self::read_slice(read, &mut vec)?;
            Ok(vec)
        }
        else {
            // be careful with suspiciously large sizes: grow incrementally,
            // so a forged length field fails from truncation instead of oom
            let mut vec = vec![Self::default(); soft_max];
            Self::read_slice(read, &mut vec)?;

            for _ in soft_max .. data_size {
                vec.push(Self::read(read)?);
            }

            Ok(vec)
        }
    }

    /// Write the slice length as `i32` and then the slice contents.
    fn write_i32_sized_slice<W: Write>(write: &mut W, slice: &[Self]) -> UnitResult {
        usize_to_i32(slice.len(), "byte size")?.write(write)?;
        Self::write_slice(write, slice)
    }

    /// Read an `i32` length and then that many values.
    fn read_i32_sized_vec(read: &mut impl Read, soft_max: usize, hard_max: Option<usize>, purpose: &'static str) -> Result<Vec<Self>> {
        let size = i32_to_usize(i32::read(read)?, purpose)?;
        Self::read_vec(read, size, soft_max, hard_max, purpose)
    }
}

macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            fn read(read: &mut impl Read) -> Result<Self> {
                Ok(read.read_from_little_endian()?)
            }

            fn write(self, write: &mut impl Write) -> UnitResult {
                write.write_as_little_endian(&self)?;
                Ok(())
            }

            fn read_slice(read: &mut impl Read, slice: &mut [Self]) -> UnitResult {
                read.read_from_little_endian_into(slice)?;
                Ok(())
            }

            fn write_slice(write: &mut impl Write, slice: &[Self]) -> UnitResult {
                write.write_as_little_endian(slice)?;
                Ok(())
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(i64);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(f32);
implement_data_for_primitive!(f64);


/// Consume a single byte from the front of the slice.
pub(crate) fn take_1(slice: &mut &[u8]) -> Result<u8> {
    if let Some((&first, rest)) = slice.split_first() {
        *slice = rest;
        Ok(first)
    }
    else {
        Err(Error::invalid("unexpected end of compressed data"))
    }
}

/// Consume `n` bytes from the front of the slice.
pub(crate) fn take_n<'s>(slice: &mut &'s [u8], n: usize) -> Result<&'s [u8]> {
    if n <= slice.len() {
        let (front, back) = slice.split_at(n);
        *slice = back;
        Ok(front)
    }
    else {
        Err(Error::invalid("unexpected end of compressed data"))
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn peek() {
        let buffer: &[u8] = &[0, 1, 2, 3];
        let mut peek = PeekRead::new(buffer);

        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(peek.peek_u8().as_ref().unwrap(), &0);
        assert_eq!(u8::read(&mut peek).unwrap(), 0_u8);

        assert!(!peek.skip_if_eq(5).unwrap());
        assert!(peek.skip_if_eq(1).unwrap());

        assert_eq!(u8::read(&mut peek).unwrap(), 2_u8);
        assert_eq!(u8::read(&mut peek).unwrap(), 3_u8);

        assert!(peek.peek_u8().is_err());
        assert!(u8::read(&mut peek).is_err());
    }

    #[test]
    fn tracking_write_seek_fills_with_zero() {
        let mut write = Tracking::new(std::io::Cursor::new(Vec::new()));
        42_u8.write(&mut write).unwrap();
        write.seek_write_to(4).unwrap();
        7_u8.write(&mut write).unwrap();
        assert_eq!(write.inner.into_inner(), vec![42, 0, 0, 0, 7]);
    }

    #[test]
    fn sized_slice_roundtrip() {
        let mut bytes = Vec::new();
        u16::write_i32_sized_slice(&mut bytes, &[9, 8, 7]).unwrap();

        let mut read = bytes.as_slice();
        let values = u16::read_i32_sized_vec(&mut read, 1024, None, "test").unwrap();
        assert_eq!(values, vec![9, 8, 7]);
        assert!(read.is_empty());
    }
}
