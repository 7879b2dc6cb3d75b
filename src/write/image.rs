//! A serialized image and the fix-ups that can still be applied to it.

use std::{ops::Range, path::Path};

use log::debug;

use crate::{
    file::io::{read_le_at, write_le_at},
    headers::DirectoryEntry,
    Error, Result,
};

use super::{output::Output, ContentId};

const CHECKSUM_SIZE: usize = 4;

/// Bytes of a serialized PE image.
///
/// The image can still be signed ([`PEImage::sign`]) and checksummed
/// ([`PEImage::update_checksum`]) before it is written out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PEImage {
    bytes: Vec<u8>,
    content_id: ContentId,
    checksum_offset: usize,
    certificate_directory_offset: usize,
    strong_name_signature: Option<Range<usize>>,
}

impl PEImage {
    pub(crate) fn new(
        bytes: Vec<u8>,
        content_id: ContentId,
        checksum_offset: usize,
        certificate_directory_offset: usize,
    ) -> PEImage {
        PEImage {
            bytes,
            content_id,
            checksum_offset,
            certificate_directory_offset,
            strong_name_signature: None,
        }
    }

    pub(crate) fn with_strong_name_signature(mut self, range: Option<Range<usize>>) -> Self {
        self.strong_name_signature = range.filter(|range| !range.is_empty());
        self
    }

    /// The image bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the image and returns its bytes
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size of the image in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the image has no bytes
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Content id whose stamp was written to the COFF header
    #[must_use]
    pub fn content_id(&self) -> ContentId {
        self.content_id
    }

    /// Current value of the optional header checksum field
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the image ends before the checksum field.
    pub fn checksum(&self) -> Result<u32> {
        let mut offset = self.checksum_offset;
        read_le_at(&self.bytes, &mut offset)
    }

    /// File range reserved for the strong-name signature, if any
    #[must_use]
    pub fn strong_name_signature_range(&self) -> Option<Range<usize>> {
        self.strong_name_signature.clone()
    }

    /// The parts of the image covered by a strong-name signature: everything except the
    /// checksum field, the certificate directory entry and the signature itself.
    #[must_use]
    pub fn content_to_sign(&self) -> Vec<&[u8]> {
        let mut excluded = vec![
            self.checksum_offset..self.checksum_offset + CHECKSUM_SIZE,
            self.certificate_directory_offset
                ..self.certificate_directory_offset + DirectoryEntry::SIZE,
        ];
        if let Some(signature) = &self.strong_name_signature {
            excluded.push(signature.clone());
        }
        excluded.sort_by_key(|range| range.start);

        let mut parts = Vec::with_capacity(excluded.len() + 1);
        let mut start = 0;
        for range in excluded {
            if range.start > start {
                parts.push(&self.bytes[start..range.start]);
            }
            start = start.max(range.end);
        }
        if start < self.bytes.len() {
            parts.push(&self.bytes[start..]);
        }
        parts
    }

    /// Writes a strong-name signature and recomputes the checksum.
    ///
    /// `provider` receives [`PEImage::content_to_sign`] and returns the signature, which may be
    /// shorter than the reservation.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperation`] if the image has no signature reservation or the
    /// signature does not fit it.
    pub fn sign<F>(&mut self, provider: F) -> Result<()>
    where
        F: FnOnce(&[&[u8]]) -> Vec<u8>,
    {
        let Some(range) = self.strong_name_signature.clone() else {
            return Err(Error::InvalidOperation(
                "the image has no strong-name signature reservation".to_string(),
            ));
        };

        let signature = provider(&self.content_to_sign());
        if signature.len() > range.len() {
            return Err(Error::InvalidOperation(format!(
                "signature of {} bytes exceeds the {} reserved bytes",
                signature.len(),
                range.len()
            )));
        }

        self.bytes[range.start..range.start + signature.len()].copy_from_slice(&signature);
        debug!("wrote {} byte strong-name signature", signature.len());
        self.update_checksum()
    }

    /// Computes the checksum of the image (with the checksum field treated as zero) and
    /// stores it in the optional header.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the image ends before the checksum field.
    pub fn update_checksum(&mut self) -> Result<()> {
        let checksum = self.calculate_checksum();
        let mut offset = self.checksum_offset;
        write_le_at(&mut self.bytes, &mut offset, checksum)
    }

    /// The standard PE image checksum: a 16-bit one's-complement style sum of all words,
    /// skipping the checksum field, plus the file length.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn calculate_checksum(&self) -> u32 {
        let checksum_field = self.checksum_offset..self.checksum_offset + CHECKSUM_SIZE;
        let mut sum: u32 = 0;

        for (index, word) in self.bytes.chunks(2).enumerate() {
            if checksum_field.contains(&(index * 2)) {
                continue;
            }

            let value = match word {
                [low, high] => u16::from_le_bytes([*low, *high]),
                [low] => u16::from(*low),
                _ => 0,
            };

            sum += u32::from(value);
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        sum = (sum & 0xFFFF) + (sum >> 16);
        sum.wrapping_add(self.bytes.len() as u32)
    }

    /// Writes the image to `path` through a memory-mapped file.
    ///
    /// # Errors
    /// Returns [`Error::WriteMmapFailed`] or [`Error::WriteFinalizationFailed`] if the file
    /// cannot be written.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut output = Output::create(path.as_ref(), self.bytes.len() as u64)?;
        output.write_at(0, &self.bytes)?;
        output.finalize()?;
        debug!(
            "wrote {} bytes to {}",
            self.bytes.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}
