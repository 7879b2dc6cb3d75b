//! Bounds-checked reader over a window of a seekable stream.

use std::io::{ErrorKind, Read, Seek, SeekFrom};

use super::io::PeIO;
use crate::{Error, Result};

/// A little-endian cursor restricted to the window `[start, start + size)` of a stream.
///
/// The window starts at the stream position the reader was created at. Every read validates
/// `offset + count` against the window before the stream is touched, and fails with
/// [`Error::ImageTooSmall`] when the request would leave it. Offsets passed to and returned by
/// the reader are relative to the window start.
///
/// # Examples
///
/// ```rust
/// use dotpe::PEBinaryReader;
/// use std::io::Cursor;
///
/// let data = [0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00];
/// let mut reader = PEBinaryReader::new(Cursor::new(&data[..]), data.len())?;
/// assert_eq!(reader.read_u16()?, 0x5A4D);
/// reader.seek(4)?;
/// assert_eq!(reader.read_u32()?, 3);
/// assert!(reader.read_u8().is_err());
/// # Ok::<(), dotpe::Error>(())
/// ```
pub struct PEBinaryReader<R> {
    reader: R,
    start_offset: u64,
    max_offset: usize,
}

impl<R: Read + Seek> PEBinaryReader<R> {
    /// Creates a reader whose window starts at the current position of `reader` and spans
    /// `size` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the stream position cannot be queried.
    pub fn new(mut reader: R, size: usize) -> Result<Self> {
        let start_offset = reader.stream_position()?;
        Ok(PEBinaryReader {
            reader,
            start_offset,
            max_offset: size,
        })
    }

    /// Size of the window in bytes.
    pub fn size(&self) -> usize {
        self.max_offset
    }

    /// Position of the cursor relative to the window start.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the stream position cannot be queried.
    pub fn current_offset(&mut self) -> Result<usize> {
        let position = self.reader.stream_position()?;
        let relative = position
            .checked_sub(self.start_offset)
            .ok_or(Error::ImageTooSmall)?;
        usize::try_from(relative).map_err(|_| Error::ImageTooSmall)
    }

    /// Moves the cursor to `offset` within the window. Seeking to the window end is allowed.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if `offset` lies past the window end.
    pub fn seek(&mut self, offset: usize) -> Result<()> {
        self.check_bounds_at(offset, 0)?;
        self.reader
            .seek(SeekFrom::Start(self.start_offset + offset as u64))?;
        Ok(())
    }

    /// Reads a little-endian value of type `T`.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if fewer than `size_of::<T>()` bytes remain.
    pub fn read_le<T: PeIO>(&mut self) -> Result<T> {
        let mut buffer = [0u8; 8];
        let len = std::mem::size_of::<T>();
        self.read_exact(&mut buffer[..len])?;

        let Ok(bytes) = <T::Bytes as TryFrom<&[u8]>>::try_from(&buffer[..len]) else {
            return Err(Error::ImageTooSmall);
        };
        Ok(T::from_le_bytes(bytes))
    }

    /// Reads one byte.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] at the window end.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_le()
    }

    /// Reads a little-endian `i16`.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if the window is exhausted.
    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_le()
    }

    /// Reads a little-endian `u16`.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if the window is exhausted.
    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_le()
    }

    /// Reads a little-endian `i32`.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if the window is exhausted.
    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_le()
    }

    /// Reads a little-endian `u32`.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if the window is exhausted.
    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_le()
    }

    /// Reads a little-endian `u64`.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if the window is exhausted.
    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_le()
    }

    /// Reads `count` raw bytes.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if fewer than `count` bytes remain.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; count];
        self.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads a fixed-size, NUL-padded UTF-8 field.
    ///
    /// Only trailing NUL bytes are removed; a NUL followed by other bytes is kept because UTF-8
    /// permits embedded NULs. Invalid sequences are replaced with U+FFFD.
    ///
    /// # Errors
    /// Returns [`Error::ImageTooSmall`] if fewer than `byte_count` bytes remain.
    pub fn read_null_padded_utf8(&mut self, byte_count: usize) -> Result<String> {
        let bytes = self.read_bytes(byte_count)?;
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |last| last + 1);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// Gives back the underlying stream.
    pub fn into_inner(self) -> R {
        self.reader
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let offset = self.current_offset()?;
        self.check_bounds_at(offset, buffer.len())?;

        match self.reader.read_exact(buffer) {
            Ok(()) => Ok(()),
            // The stream ended before the declared image size.
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => Err(Error::ImageTooSmall),
            Err(error) => Err(Error::FileError(error)),
        }
    }

    fn check_bounds_at(&self, start: usize, count: usize) -> Result<()> {
        match start.checked_add(count) {
            Some(end) if end <= self.max_offset => Ok(()),
            _ => Err(Error::ImageTooSmall),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn reader(data: &[u8]) -> PEBinaryReader<Cursor<&[u8]>> {
        PEBinaryReader::new(Cursor::new(data), data.len()).unwrap()
    }

    #[test]
    fn read_primitives() {
        #[rustfmt::skip]
        let data = [
            0xAB,                                           // u8
            0xFE, 0xFF,                                     // i16 = -2
            0x34, 0x12,                                     // u16
            0xFF, 0xFF, 0xFF, 0x7F,                         // i32
            0x78, 0x56, 0x34, 0x12,                         // u32
            0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01, // u64
        ];
        let mut r = reader(&data);
        assert_eq!(r.read_u8().unwrap(), 0xAB);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_i32().unwrap(), i32::MAX);
        assert_eq!(r.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(r.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert_eq!(r.current_offset().unwrap(), data.len());
        assert!(matches!(r.read_u8(), Err(Error::ImageTooSmall)));
    }

    #[test]
    fn bounds_window_of_ten() {
        let data = [0u8; 10];

        let mut r = reader(&data);
        assert_eq!(r.read_bytes(10).unwrap().len(), 10);

        let mut r = reader(&data);
        r.seek(10).unwrap();
        assert!(matches!(r.read_bytes(1), Err(Error::ImageTooSmall)));

        let mut r = reader(&data);
        r.seek(10).unwrap();
        assert!(r.read_bytes(0).unwrap().is_empty());

        let mut r = reader(&data);
        assert!(matches!(r.seek(11), Err(Error::ImageTooSmall)));
        assert!(matches!(r.read_bytes(11), Err(Error::ImageTooSmall)));
    }

    #[test]
    fn bounds_all_offsets() {
        let data = [0u8; 10];
        for start in 0..=12usize {
            for count in 0..=12usize {
                let mut r = reader(&data);
                let result = r.seek(start).and_then(|()| r.read_bytes(count));
                assert_eq!(result.is_ok(), start + count <= 10, "start={start} count={count}");
            }
        }
    }

    #[test]
    fn window_is_relative_to_start_position() {
        let data = [0xEE, 0xEE, 0x01, 0x02, 0x03, 0x04];
        let mut cursor = Cursor::new(&data[..]);
        cursor.set_position(2);

        let mut r = PEBinaryReader::new(&mut cursor, 4).unwrap();
        assert_eq!(r.current_offset().unwrap(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0201);
        r.seek(3).unwrap();
        assert_eq!(r.read_u8().unwrap(), 0x04);
        assert!(r.read_u8().is_err());
    }

    #[test]
    fn window_larger_than_stream() {
        let data = [0u8; 4];
        let mut r = PEBinaryReader::new(Cursor::new(&data[..]), 64).unwrap();
        assert!(matches!(r.read_u64(), Err(Error::ImageTooSmall)));
    }

    #[test]
    fn null_padded_utf8() {
        let mut r = reader(b".text\0\0\0");
        assert_eq!(r.read_null_padded_utf8(8).unwrap(), ".text");

        let mut r = reader(b"a\0b\0\0\0\0\0");
        assert_eq!(r.read_null_padded_utf8(8).unwrap(), "a\0b");

        let mut r = reader(&[0u8; 8]);
        assert_eq!(r.read_null_padded_utf8(8).unwrap(), "");

        let mut r = reader(b"12345678");
        assert_eq!(r.read_null_padded_utf8(8).unwrap(), "12345678");
    }
}
