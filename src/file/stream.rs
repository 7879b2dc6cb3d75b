//! On-demand access to a seekable stream shared between threads.

use std::{
    io::{ErrorKind, Read, Seek, SeekFrom},
    sync::Mutex,
};

use crate::{headers::PEHeaders, Error, Result};

/// A readable, seekable stream that can be moved across threads.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Reads image bytes from a stream on demand.
///
/// The stream cursor is shared state, so every access seeks and reads under a mutex. Offsets
/// are relative to the position the stream was at when the provider was created.
pub struct StreamProvider {
    stream: Mutex<Box<dyn ReadSeek>>,
    image_start: u64,
    size: usize,
}

impl StreamProvider {
    /// Wraps `stream`; the image occupies `size` bytes starting at `image_start`.
    pub fn new(stream: Box<dyn ReadSeek>, image_start: u64, size: usize) -> Self {
        StreamProvider {
            stream: Mutex::new(stream),
            image_start,
            size,
        }
    }

    /// Size of the image in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Parses the image headers from the start of the image.
    ///
    /// # Errors
    /// Propagates any header parsing failure.
    pub fn read_headers(&self, is_loaded_image: bool) -> Result<PEHeaders> {
        let mut stream = lock!(self.stream);
        stream.seek(SeekFrom::Start(self.image_start))?;
        PEHeaders::read(&mut *stream, self.size, is_loaded_image)
    }

    /// Reads `len` bytes at image offset `offset`.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the range is outside the image, or
    /// [`Error::ImageTooSmall`] if the stream ends early.
    pub fn read_block(&self, offset: usize, len: usize) -> Result<Vec<u8>> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => {}
            _ => return Err(Error::OutOfBounds),
        }

        let mut buffer = vec![0u8; len];
        let mut stream = lock!(self.stream);
        stream.seek(SeekFrom::Start(self.image_start + offset as u64))?;
        match stream.read_exact(&mut buffer) {
            Ok(()) => Ok(buffer),
            Err(error) if error.kind() == ErrorKind::UnexpectedEof => Err(Error::ImageTooSmall),
            Err(error) => Err(Error::FileError(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn read_block_relative_to_start() {
        let data: Vec<u8> = (0u8..32).collect();
        let provider = StreamProvider::new(Box::new(Cursor::new(data)), 8, 16);

        assert_eq!(provider.size(), 16);
        assert_eq!(provider.read_block(0, 4).unwrap(), vec![8, 9, 10, 11]);
        assert_eq!(provider.read_block(12, 4).unwrap(), vec![20, 21, 22, 23]);
        assert!(matches!(provider.read_block(13, 4), Err(Error::OutOfBounds)));
        assert!(provider.read_block(usize::MAX, 2).is_err());
    }

    #[test]
    fn read_block_truncated_stream() {
        let provider = StreamProvider::new(Box::new(Cursor::new(vec![0u8; 4])), 0, 16);
        assert!(matches!(provider.read_block(0, 8), Err(Error::ImageTooSmall)));
    }
}
