//! The CLI (COR20) header.
//!
//! # Reference
//! - [ECMA-335 II.25.3.3](https://ecma-international.org/wp-content/uploads/ECMA-335_6th_edition_june_2012.pdf)

use std::io::{Read, Seek};

use bitflags::bitflags;

use super::DirectoryEntry;
use crate::{file::PEBinaryReader, Result};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    /// Runtime flags of the CLI header
    pub struct CorFlags: u32 {
        /// The image contains IL only
        const IL_ONLY = 0x0000_0001;
        /// The image can only be loaded into a 32-bit process
        const REQUIRES_32BIT = 0x0000_0002;
        /// The image is an IL library
        const IL_LIBRARY = 0x0000_0004;
        /// The image has a strong-name signature
        const STRONG_NAME_SIGNED = 0x0000_0008;
        /// The entry point field holds an RVA of native code instead of a token
        const NATIVE_ENTRY_POINT = 0x0000_0010;
        /// The runtime tracks debug data
        const TRACK_DEBUG_DATA = 0x0001_0000;
        /// The image prefers running in a 32-bit process
        const PREFERS_32BIT = 0x0002_0000;
    }
}

/// The CLI header pointing at the metadata and related managed structures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorHeader {
    /// Minimum runtime major version
    pub major_runtime_version: u16,
    /// Minimum runtime minor version
    pub minor_runtime_version: u16,
    /// Location of the metadata root
    pub metadata_directory: DirectoryEntry,
    /// Runtime flags
    pub flags: CorFlags,
    /// `MethodDef`/`File` token of the entry point, or its RVA with [`CorFlags::NATIVE_ENTRY_POINT`]
    pub entry_point_token_or_relative_virtual_address: u32,
    /// Managed resources
    pub resources_directory: DirectoryEntry,
    /// Strong-name signature blob
    pub strong_name_signature_directory: DirectoryEntry,
    /// Always zero
    pub code_manager_table_directory: DirectoryEntry,
    /// VTable fixups
    pub vtable_fixups_directory: DirectoryEntry,
    /// Always zero
    pub export_address_table_jumps_directory: DirectoryEntry,
    /// Always zero for IL images
    pub managed_native_header_directory: DirectoryEntry,
}

impl CorHeader {
    /// Size of an encoded CLI header
    pub const SIZE: usize = 72;

    /// Reads the header at the current reader position. The leading byte count is skipped.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImageTooSmall`] if the image ends inside the header.
    pub fn read<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<CorHeader> {
        // byte count, validated against the directory size by the caller
        reader.read_u32()?;

        Ok(CorHeader {
            major_runtime_version: reader.read_u16()?,
            minor_runtime_version: reader.read_u16()?,
            metadata_directory: read_directory(reader)?,
            flags: CorFlags::from_bits_retain(reader.read_u32()?),
            entry_point_token_or_relative_virtual_address: reader.read_u32()?,
            resources_directory: read_directory(reader)?,
            strong_name_signature_directory: read_directory(reader)?,
            code_manager_table_directory: read_directory(reader)?,
            vtable_fixups_directory: read_directory(reader)?,
            export_address_table_jumps_directory: read_directory(reader)?,
            managed_native_header_directory: read_directory(reader)?,
        })
    }
}

fn read_directory<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<DirectoryEntry> {
    Ok(DirectoryEntry::new(reader.read_u32()?, reader.read_u32()?))
}
