use super::Backend;
use crate::{Error::OutOfBounds, Result};

/// Image bytes owned by the reader, e.g. a buffer handed to [`crate::PEReader::from_bytes`]
/// or an image prefetched from a stream.
#[derive(Debug, Default)]
pub struct Memory {
    image: Vec<u8>,
}

impl Memory {
    /// Takes ownership of `image`.
    #[must_use]
    pub fn new(image: Vec<u8>) -> Memory {
        Memory { image }
    }

    /// Gives the image bytes back.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.image
    }
}

impl From<Vec<u8>> for Memory {
    fn from(image: Vec<u8>) -> Self {
        Memory::new(image)
    }
}

impl Backend for Memory {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.image.get(offset..end))
            .ok_or(OutOfBounds)
    }

    fn data(&self) -> &[u8] {
        &self.image
    }

    fn len(&self) -> usize {
        self.image.len()
    }
}
