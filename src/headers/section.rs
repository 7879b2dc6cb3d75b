//! Section table entries.

use std::io::{Read, Seek};

use bitflags::bitflags;

use crate::{file::PEBinaryReader, Result};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    /// Section flags
    pub struct SectionCharacteristics: u32 {
        /// Section should not be padded to the next boundary (obsolete)
        const TYPE_NO_PAD = 0x0000_0008;
        /// Section contains executable code
        const CONTAINS_CODE = 0x0000_0020;
        /// Section contains initialized data
        const CONTAINS_INITIALIZED_DATA = 0x0000_0040;
        /// Section contains uninitialized data
        const CONTAINS_UNINITIALIZED_DATA = 0x0000_0080;
        /// Reserved
        const LNK_OTHER = 0x0000_0100;
        /// Section contains comments or other information (object files only)
        const LNK_INFO = 0x0000_0200;
        /// Section will not become part of the image (object files only)
        const LNK_REMOVE = 0x0000_0800;
        /// Section contains COMDAT data (object files only)
        const LNK_COMDAT = 0x0000_1000;
        /// Reset speculative exception handling bits in the TLB entries
        const NO_DEFER_SPEC_EXC = 0x0000_4000;
        /// Section contains data referenced through the global pointer
        const GP_REL = 0x0000_8000;
        /// Section contains extended relocations
        const LNK_NRELOC_OVFL = 0x0100_0000;
        /// Section can be discarded as needed
        const MEM_DISCARDABLE = 0x0200_0000;
        /// Section cannot be cached
        const MEM_NOT_CACHED = 0x0400_0000;
        /// Section is not pageable
        const MEM_NOT_PAGED = 0x0800_0000;
        /// Section can be shared in memory
        const MEM_SHARED = 0x1000_0000;
        /// Section can be executed as code
        const MEM_EXECUTE = 0x2000_0000;
        /// Section can be read
        const MEM_READ = 0x4000_0000;
        /// Section can be written to
        const MEM_WRITE = 0x8000_0000;
    }
}

/// A 40-byte section table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section name with trailing NUL padding removed
    pub name: String,
    /// Size of the section when loaded into memory
    pub virtual_size: u32,
    /// RVA of the first byte of the section when loaded
    pub virtual_address: u32,
    /// Size of the initialized data on disk, a multiple of the file alignment
    pub size_of_raw_data: u32,
    /// File pointer to the first page of the section
    pub pointer_to_raw_data: u32,
    /// File pointer to the relocation entries, zero for images
    pub pointer_to_relocations: u32,
    /// File pointer to the COFF line numbers (deprecated)
    pub pointer_to_line_numbers: u32,
    /// Number of relocation entries
    pub number_of_relocations: u16,
    /// Number of line number entries (deprecated)
    pub number_of_line_numbers: u16,
    /// Section flags
    pub characteristics: SectionCharacteristics,
}

impl SectionHeader {
    /// Size of an encoded section header
    pub const SIZE: usize = 40;
    /// Maximum length of a section name in bytes
    pub const NAME_SIZE: usize = 8;

    /// Reads a section header at the current reader position.
    ///
    /// # Errors
    /// Returns [`crate::Error::ImageTooSmall`] if the image ends inside the header.
    pub fn read<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<SectionHeader> {
        Ok(SectionHeader {
            name: reader.read_null_padded_utf8(Self::NAME_SIZE)?,
            virtual_size: reader.read_u32()?,
            virtual_address: reader.read_u32()?,
            size_of_raw_data: reader.read_u32()?,
            pointer_to_raw_data: reader.read_u32()?,
            pointer_to_relocations: reader.read_u32()?,
            pointer_to_line_numbers: reader.read_u32()?,
            number_of_relocations: reader.read_u16()?,
            number_of_line_numbers: reader.read_u16()?,
            characteristics: SectionCharacteristics::from_bits_retain(reader.read_u32()?),
        })
    }

    /// Section name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns `true` if `rva` falls inside `[virtual_address, virtual_address + virtual_size)`.
    #[must_use]
    pub fn contains_rva(&self, rva: u32) -> bool {
        let start = u64::from(self.virtual_address);
        let end = start + u64::from(self.virtual_size);
        (start..end).contains(&u64::from(rva))
    }
}
