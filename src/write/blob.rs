//! Append-only byte arena with reserve-then-patch fixups.
//!
//! Several fields of a PE image can only be computed after the bytes that follow them have
//! been emitted (the COFF time stamp, the checksum, the strong-name signature). The writer
//! reserves those fields as zero-filled [`Fixup`]s and patches them once their value is known.
//!
//! A [`Fixup`] remembers the arena it was reserved in; patching it through any other arena
//! fails, and because [`BlobBuilder::into_bytes`] consumes the arena no fixup can outlive it.

use std::{
    ops::Range,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{file::io::PeIO, utils::align_up, Error, Result};

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// A reserved, zero-filled range of a [`BlobBuilder`].
///
/// Fixups are neither `Clone` nor `Copy`: [`BlobBuilder::patch`] consumes the handle, so each
/// reservation is written at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct Fixup {
    arena: u64,
    offset: usize,
    len: usize,
}

impl Fixup {
    /// Offset of the reserved range within its arena
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the reserved range
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the reservation is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The reserved byte range
    #[must_use]
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Growable little-endian byte buffer used to assemble sections and whole images.
///
/// # Examples
///
/// ```rust
/// use dotpe::BlobBuilder;
///
/// let mut builder = BlobBuilder::new();
/// builder.write_u16(0x5A4D);
/// let stamp = builder.reserve(4);
/// builder.write_bytes(b"tail");
///
/// builder.patch(stamp, &0x1234_5678u32.to_le_bytes())?;
/// assert_eq!(builder.as_bytes(), b"MZ\x78\x56\x34\x12tail");
/// # Ok::<(), dotpe::Error>(())
/// ```
#[derive(Debug)]
pub struct BlobBuilder {
    id: u64,
    buffer: Vec<u8>,
}

impl Default for BlobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobBuilder {
    /// Creates an empty builder
    #[must_use]
    pub fn new() -> BlobBuilder {
        Self::with_capacity(0)
    }

    /// Creates an empty builder with room for `capacity` bytes
    #[must_use]
    pub fn with_capacity(capacity: usize) -> BlobBuilder {
        BlobBuilder {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Creates a builder holding `data`
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> BlobBuilder {
        let mut builder = Self::new();
        builder.buffer = data;
        builder
    }

    /// Number of bytes written so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` if nothing has been written
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// The bytes written so far
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Finishes the arena and returns its bytes. Outstanding fixups become unusable.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Appends a value in little-endian byte order
    pub fn write_le<T: PeIO>(&mut self, value: T) {
        self.buffer.extend_from_slice(value.to_le_bytes().as_ref());
    }

    /// Appends a byte
    pub fn write_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Appends a little-endian `u16`
    pub fn write_u16(&mut self, value: u16) {
        self.write_le(value);
    }

    /// Appends a little-endian `u32`
    pub fn write_u32(&mut self, value: u32) {
        self.write_le(value);
    }

    /// Appends a little-endian `i32`
    pub fn write_i32(&mut self, value: i32) {
        self.write_le(value);
    }

    /// Appends a little-endian `u64`
    pub fn write_u64(&mut self, value: u64) {
        self.write_le(value);
    }

    /// Appends raw bytes
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Appends `count` zero bytes
    pub fn write_zeros(&mut self, count: usize) {
        self.buffer.resize(self.buffer.len() + count, 0);
    }

    /// Pads with zeros up to the next multiple of `alignment`
    pub fn align(&mut self, alignment: usize) {
        let aligned = align_up(self.buffer.len(), alignment);
        self.buffer.resize(aligned, 0);
    }

    /// Pads with zeros until the builder holds `len` bytes. Does nothing if it already does.
    pub fn pad_to(&mut self, len: usize) {
        if self.buffer.len() < len {
            self.buffer.resize(len, 0);
        }
    }

    /// Appends the content of `suffix` and returns the offset it starts at.
    pub fn link_suffix(&mut self, suffix: BlobBuilder) -> usize {
        let start = self.buffer.len();
        if start == 0 {
            self.buffer = suffix.buffer;
        } else {
            self.buffer.extend_from_slice(&suffix.buffer);
        }
        start
    }

    /// Reserves `len` zero bytes to be patched later
    pub fn reserve(&mut self, len: usize) -> Fixup {
        let offset = self.buffer.len();
        self.write_zeros(len);
        Fixup {
            arena: self.id,
            offset,
            len,
        }
    }

    /// Writes `data` into a reserved range. `data` may be shorter than the reservation; the
    /// remainder keeps its current content.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperation`] if `fixup` was reserved in another builder or `data`
    /// is longer than the reservation.
    pub fn patch(&mut self, fixup: Fixup, data: &[u8]) -> Result<()> {
        if fixup.arena != self.id {
            return Err(Error::InvalidOperation(
                "fixup belongs to a different blob builder".to_string(),
            ));
        }
        if data.len() > fixup.len {
            return Err(Error::InvalidOperation(format!(
                "patch of {} bytes exceeds the {} reserved bytes",
                data.len(),
                fixup.len
            )));
        }

        self.buffer[fixup.offset..fixup.offset + data.len()].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_little_endian() {
        let mut builder = BlobBuilder::new();
        builder.write_u8(1);
        builder.write_u16(0x0302);
        builder.write_u32(0x0706_0504);
        builder.write_i32(-1);
        builder.write_u64(0x10);
        assert_eq!(
            builder.as_bytes(),
            &[1, 2, 3, 4, 5, 6, 7, 0xFF, 0xFF, 0xFF, 0xFF, 0x10, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn align_and_pad() {
        let mut builder = BlobBuilder::new();
        builder.write_bytes(&[1, 2, 3]);
        builder.align(4);
        assert_eq!(builder.len(), 4);
        builder.align(4);
        assert_eq!(builder.len(), 4);
        builder.pad_to(10);
        assert_eq!(builder.len(), 10);
        builder.pad_to(2);
        assert_eq!(builder.len(), 10);
    }

    #[test]
    fn link_suffix_returns_offset() {
        let mut head = BlobBuilder::new();
        head.write_bytes(b"abc");
        let mut tail = BlobBuilder::new();
        tail.write_bytes(b"de");

        assert_eq!(head.link_suffix(tail), 3);
        assert_eq!(head.into_bytes(), b"abcde");
    }

    #[test]
    fn patch_reserved_range() {
        let mut builder = BlobBuilder::new();
        builder.write_u8(0xAA);
        let fixup = builder.reserve(4);
        builder.write_u8(0xBB);

        assert_eq!(fixup.range(), 1..5);
        builder.patch(fixup, &[1, 2]).unwrap();
        assert_eq!(builder.as_bytes(), &[0xAA, 1, 2, 0, 0, 0xBB]);
    }

    #[test]
    fn patch_rejects_oversized_data() {
        let mut builder = BlobBuilder::new();
        let fixup = builder.reserve(2);
        assert!(matches!(
            builder.patch(fixup, &[1, 2, 3]),
            Err(Error::InvalidOperation(_))
        ));
    }

    #[test]
    fn patch_rejects_foreign_fixup() {
        let mut first = BlobBuilder::new();
        let mut second = BlobBuilder::new();
        second.write_zeros(8);
        let fixup = first.reserve(4);

        assert!(matches!(
            second.patch(fixup, &[1]),
            Err(Error::InvalidOperation(_))
        ));
        assert_eq!(second.as_bytes(), &[0; 8]);
    }
}
