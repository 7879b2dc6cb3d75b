//! Builder for the debug directory and its trailing data.

use crate::{
    headers::{DebugDirectoryEntry, DebugDirectoryEntryType},
    utils::to_u32,
    Result,
};

use super::{BlobBuilder, SectionLocation};

/// Append-only list of debug directory entries.
///
/// Entry payloads accumulate in a data blob that is emitted right after the fixed-size table;
/// [`DebugDirectoryBuilder::serialize`] computes each entry's address from its position in that
/// blob.
///
/// # Examples
///
/// ```rust
/// use dotpe::DebugDirectoryBuilder;
///
/// let mut debug = DebugDirectoryBuilder::new();
/// assert_eq!(debug.table_size(), 0);
///
/// debug.add_reproducible_entry();
/// assert_eq!(debug.table_size(), 28);
/// assert_eq!(debug.size(), 28);
/// ```
#[derive(Debug, Default)]
pub struct DebugDirectoryBuilder {
    entries: Vec<DebugDirectoryEntry>,
    data: BlobBuilder,
}

impl DebugDirectoryBuilder {
    /// Creates an empty builder
    #[must_use]
    pub fn new() -> DebugDirectoryBuilder {
        Self::default()
    }

    /// Adds an entry whose payload is written by `serializer` into the data blob.
    ///
    /// # Errors
    /// Propagates errors returned by `serializer`.
    pub fn add_entry<F>(
        &mut self,
        entry_type: DebugDirectoryEntryType,
        major_version: u16,
        minor_version: u16,
        stamp: u32,
        serializer: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut BlobBuilder) -> Result<()>,
    {
        let start = self.data.len();
        serializer(&mut self.data)?;
        let data_size = to_u32(self.data.len() - start)?;

        self.entries.push(DebugDirectoryEntry {
            stamp,
            major_version,
            minor_version,
            entry_type,
            data_size,
            data_relative_virtual_address: 0,
            data_pointer: 0,
        });
        Ok(())
    }

    /// Adds an entry without payload
    pub fn add_entry_no_data(
        &mut self,
        entry_type: DebugDirectoryEntryType,
        major_version: u16,
        minor_version: u16,
        stamp: u32,
    ) {
        self.entries.push(DebugDirectoryEntry {
            stamp,
            major_version,
            minor_version,
            entry_type,
            data_size: 0,
            data_relative_virtual_address: 0,
            data_pointer: 0,
        });
    }

    /// Adds the entry marking a deterministic build
    pub fn add_reproducible_entry(&mut self) {
        self.add_entry_no_data(DebugDirectoryEntryType::Reproducible, 0, 0, 0);
    }

    /// Number of entries added so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry was added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of the fixed-size table
    #[must_use]
    pub fn table_size(&self) -> usize {
        DebugDirectoryEntry::SIZE * self.entries.len()
    }

    /// Size of the table plus all payloads
    #[must_use]
    pub fn size(&self) -> usize {
        self.table_size() + self.data.len()
    }

    /// Writes the table followed by the payloads.
    ///
    /// `section_offset` is the offset of the table within the section at `location`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an address does not fit 32 bits.
    pub fn serialize(
        &self,
        builder: &mut BlobBuilder,
        location: SectionLocation,
        section_offset: u32,
    ) -> Result<()> {
        let mut data_offset = section_offset + to_u32(self.table_size())?;

        for entry in &self.entries {
            builder.write_u32(0);
            builder.write_u32(entry.stamp);
            builder.write_u16(entry.major_version);
            builder.write_u16(entry.minor_version);
            builder.write_i32(i32::from(entry.entry_type));
            builder.write_u32(entry.data_size);

            if entry.data_size > 0 {
                let data_location = location.offset_by(data_offset);
                builder.write_u32(data_location.relative_virtual_address);
                builder.write_u32(data_location.pointer_to_raw_data);
            } else {
                builder.write_u32(0);
                builder.write_u32(0);
            }

            data_offset += entry.data_size;
        }

        builder.write_bytes(self.data.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::file::PEBinaryReader;

    #[test]
    fn empty_builder() {
        let debug = DebugDirectoryBuilder::new();
        assert!(debug.is_empty());
        assert_eq!(debug.table_size(), 0);
        assert_eq!(debug.size(), 0);
    }

    #[test]
    fn reproducible_entry_has_no_payload() {
        let mut debug = DebugDirectoryBuilder::new();
        debug.add_reproducible_entry();
        assert_eq!(debug.table_size(), 28);
        assert_eq!(debug.size(), 28);

        let mut builder = BlobBuilder::new();
        debug
            .serialize(&mut builder, SectionLocation::new(0x2000, 0x200), 0x80)
            .unwrap();
        assert_eq!(builder.len(), 28);

        let bytes = builder.into_bytes();
        let mut reader = PEBinaryReader::new(Cursor::new(bytes.as_slice()), bytes.len()).unwrap();
        let entry = DebugDirectoryEntry::read(&mut reader).unwrap();
        assert_eq!(entry.entry_type, DebugDirectoryEntryType::Reproducible);
        assert_eq!(entry.data_size, 0);
        assert_eq!(entry.data_relative_virtual_address, 0);
        assert_eq!(entry.data_pointer, 0);
    }

    #[test]
    fn payload_addresses() {
        let mut debug = DebugDirectoryBuilder::new();
        debug
            .add_entry(DebugDirectoryEntryType::CodeView, 1, 0x504D, 0xAABB, |data| {
                data.write_bytes(b"RSDS0123");
                Ok(())
            })
            .unwrap();
        debug.add_reproducible_entry();
        debug
            .add_entry(DebugDirectoryEntryType::PdbChecksum, 1, 0, 0, |data| {
                data.write_bytes(b"SHA256\0");
                Ok(())
            })
            .unwrap();
        assert_eq!(debug.table_size(), 84);
        assert_eq!(debug.size(), 84 + 15);

        let mut builder = BlobBuilder::new();
        debug
            .serialize(&mut builder, SectionLocation::new(0x2000, 0x200), 0x10)
            .unwrap();
        let bytes = builder.into_bytes();
        assert_eq!(bytes.len(), 99);
        assert_eq!(&bytes[84..92], b"RSDS0123");

        let mut reader = PEBinaryReader::new(Cursor::new(bytes.as_slice()), bytes.len()).unwrap();
        let code_view = DebugDirectoryEntry::read(&mut reader).unwrap();
        assert!(code_view.is_portable_code_view());
        assert_eq!(code_view.stamp, 0xAABB);
        assert_eq!(code_view.data_relative_virtual_address, 0x2000 + 0x10 + 84);
        assert_eq!(code_view.data_pointer, 0x200 + 0x10 + 84);

        let reproducible = DebugDirectoryEntry::read(&mut reader).unwrap();
        assert_eq!(reproducible.data_pointer, 0);

        let checksum = DebugDirectoryEntry::read(&mut reader).unwrap();
        assert_eq!(checksum.data_size, 7);
        assert_eq!(checksum.data_pointer, 0x200 + 0x10 + 84 + 8);
    }
}
