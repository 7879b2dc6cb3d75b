//! Debug directory entries.

use std::io::{Read, Seek};

use crate::{file::PEBinaryReader, Result};

/// Kind of data a debug directory entry points at.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugDirectoryEntryType {
    /// Unknown value, ignored by all tools
    #[default]
    Unknown,
    /// COFF debug information
    Coff,
    /// CodeView / PDB reference
    CodeView,
    /// Frame pointer omission information
    Fpo,
    /// Visual C++ feature information
    VcFeature,
    /// The image was built deterministically; the entry has no data
    Reproducible,
    /// Embedded portable PDB
    EmbeddedPortablePdb,
    /// Checksum of the associated PDB
    PdbChecksum,
    /// Extended DLL characteristics
    ExDllCharacteristics,
    /// Any other entry type
    Other(i32),
}

impl From<i32> for DebugDirectoryEntryType {
    fn from(value: i32) -> Self {
        match value {
            0 => DebugDirectoryEntryType::Unknown,
            1 => DebugDirectoryEntryType::Coff,
            2 => DebugDirectoryEntryType::CodeView,
            3 => DebugDirectoryEntryType::Fpo,
            12 => DebugDirectoryEntryType::VcFeature,
            16 => DebugDirectoryEntryType::Reproducible,
            17 => DebugDirectoryEntryType::EmbeddedPortablePdb,
            19 => DebugDirectoryEntryType::PdbChecksum,
            20 => DebugDirectoryEntryType::ExDllCharacteristics,
            other => DebugDirectoryEntryType::Other(other),
        }
    }
}

impl From<DebugDirectoryEntryType> for i32 {
    fn from(value: DebugDirectoryEntryType) -> Self {
        match value {
            DebugDirectoryEntryType::Unknown => 0,
            DebugDirectoryEntryType::Coff => 1,
            DebugDirectoryEntryType::CodeView => 2,
            DebugDirectoryEntryType::Fpo => 3,
            DebugDirectoryEntryType::VcFeature => 12,
            DebugDirectoryEntryType::Reproducible => 16,
            DebugDirectoryEntryType::EmbeddedPortablePdb => 17,
            DebugDirectoryEntryType::PdbChecksum => 19,
            DebugDirectoryEntryType::ExDllCharacteristics => 20,
            DebugDirectoryEntryType::Other(value) => value,
        }
    }
}

/// One 28-byte record of the debug directory table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugDirectoryEntry {
    /// Time stamp or content hash of the debug data
    pub stamp: u32,
    /// Format major version
    pub major_version: u16,
    /// Format minor version
    pub minor_version: u16,
    /// Kind of the referenced data
    pub entry_type: DebugDirectoryEntryType,
    /// Size of the referenced data
    pub data_size: u32,
    /// RVA of the data, zero if it is not mapped
    pub data_relative_virtual_address: u32,
    /// File pointer to the data
    pub data_pointer: u32,
}

impl DebugDirectoryEntry {
    /// Size of an encoded entry
    pub const SIZE: usize = 28;

    /// Minor version marking a CodeView entry that references a portable PDB
    pub const PORTABLE_CODE_VIEW_MINOR: u16 = 0x504D;

    /// Reads an entry at the current reader position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the reserved characteristics field is not zero.
    pub fn read<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<DebugDirectoryEntry> {
        let characteristics = reader.read_u32()?;
        if characteristics != 0 {
            return Err(malformed_error!(
                "Debug directory entry characteristics must be zero, found 0x{:X}",
                characteristics
            ));
        }

        Ok(DebugDirectoryEntry {
            stamp: reader.read_u32()?,
            major_version: reader.read_u16()?,
            minor_version: reader.read_u16()?,
            entry_type: DebugDirectoryEntryType::from(reader.read_i32()?),
            data_size: reader.read_u32()?,
            data_relative_virtual_address: reader.read_u32()?,
            data_pointer: reader.read_u32()?,
        })
    }

    /// Returns `true` for a CodeView entry that references a portable PDB.
    #[must_use]
    pub fn is_portable_code_view(&self) -> bool {
        self.entry_type == DebugDirectoryEntryType::CodeView
            && self.minor_version == Self::PORTABLE_CODE_VIEW_MINOR
    }
}
