//! Borrowed views into image bytes.

use std::io::Cursor;

use crate::{file::PEBinaryReader, Error, Result};

/// A contiguous range of image bytes owned by a [`crate::PEReader`].
///
/// The block borrows from the reader, so it cannot outlive it or survive
/// [`crate::PEReader::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PEMemoryBlock<'a> {
    data: &'a [u8],
}

impl<'a> PEMemoryBlock<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        PEMemoryBlock { data }
    }

    pub(crate) fn empty() -> Self {
        PEMemoryBlock { data: &[] }
    }

    /// Length of the block in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the block holds no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The bytes of the block
    #[must_use]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    /// `len` bytes starting at `start` within the block.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the range leaves the block.
    pub fn get_content(&self, start: usize, len: usize) -> Result<&'a [u8]> {
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(&self.data[start..end]),
            _ => Err(Error::OutOfBounds),
        }
    }

    /// Copies the block into a new vector
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.to_vec()
    }

    /// A [`PEBinaryReader`] whose window is this block.
    ///
    /// # Errors
    /// Never fails for in-memory blocks; the signature follows [`PEBinaryReader::new`].
    pub fn reader(&self) -> Result<PEBinaryReader<Cursor<&'a [u8]>>> {
        PEBinaryReader::new(Cursor::new(self.data), self.data.len())
    }
}

impl AsRef<[u8]> for PEMemoryBlock<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data
    }
}
