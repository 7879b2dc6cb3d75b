//! The PE optional header.
//!
//! The header comes in two widths. PE32 images carry `BaseOfData` and 32-bit image base and
//! stack/heap fields, PE32+ images drop `BaseOfData` and widen the rest to 64 bits. The shared
//! fields live directly on [`PEHeader`], the width-dependent ones in [`PEHeaderVariant`].
//!
//! # Reference
//! - [PE Format, Optional Header](https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#optional-header-image-only)

use std::io::{Read, Seek};

use bitflags::bitflags;
use goblin::pe::optional_header::{MAGIC_32, MAGIC_64};
use strum::EnumCount;

use super::{DirectoryEntry, DirectoryKind};
use crate::{file::PEBinaryReader, Result};

/// Optional header magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PEMagic {
    /// PE32 (`0x10B`)
    Pe32,
    /// PE32+ (`0x20B`)
    Pe32Plus,
}

impl PEMagic {
    /// Encoded magic value
    #[must_use]
    pub fn value(self) -> u16 {
        match self {
            PEMagic::Pe32 => MAGIC_32,
            PEMagic::Pe32Plus => MAGIC_64,
        }
    }

    /// Size of the optional header for this width, including the sixteen directories.
    #[must_use]
    pub fn header_size(self) -> usize {
        match self {
            PEMagic::Pe32 => PEHeader::SIZE_PE32,
            PEMagic::Pe32Plus => PEHeader::SIZE_PE32_PLUS,
        }
    }
}

/// Subsystem required to run the image.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Unknown subsystem
    Unknown,
    /// Device drivers and native Windows processes
    Native,
    /// Windows graphical user interface
    WindowsGui,
    /// Windows character subsystem
    #[default]
    WindowsCui,
    /// OS/2 character subsystem
    Os2Cui,
    /// Posix character subsystem
    PosixCui,
    /// Native Win9x driver
    NativeWindows,
    /// Windows CE
    WindowsCeGui,
    /// EFI application
    EfiApplication,
    /// EFI driver with boot services
    EfiBootServiceDriver,
    /// EFI driver with run-time services
    EfiRuntimeDriver,
    /// EFI ROM image
    EfiRom,
    /// Xbox
    Xbox,
    /// Windows boot application
    WindowsBootApplication,
    /// Any other subsystem value
    Other(u16),
}

impl From<u16> for Subsystem {
    fn from(value: u16) -> Self {
        match value {
            0 => Subsystem::Unknown,
            1 => Subsystem::Native,
            2 => Subsystem::WindowsGui,
            3 => Subsystem::WindowsCui,
            5 => Subsystem::Os2Cui,
            7 => Subsystem::PosixCui,
            8 => Subsystem::NativeWindows,
            9 => Subsystem::WindowsCeGui,
            10 => Subsystem::EfiApplication,
            11 => Subsystem::EfiBootServiceDriver,
            12 => Subsystem::EfiRuntimeDriver,
            13 => Subsystem::EfiRom,
            14 => Subsystem::Xbox,
            16 => Subsystem::WindowsBootApplication,
            other => Subsystem::Other(other),
        }
    }
}

impl From<Subsystem> for u16 {
    fn from(value: Subsystem) -> Self {
        match value {
            Subsystem::Unknown => 0,
            Subsystem::Native => 1,
            Subsystem::WindowsGui => 2,
            Subsystem::WindowsCui => 3,
            Subsystem::Os2Cui => 5,
            Subsystem::PosixCui => 7,
            Subsystem::NativeWindows => 8,
            Subsystem::WindowsCeGui => 9,
            Subsystem::EfiApplication => 10,
            Subsystem::EfiBootServiceDriver => 11,
            Subsystem::EfiRuntimeDriver => 12,
            Subsystem::EfiRom => 13,
            Subsystem::Xbox => 14,
            Subsystem::WindowsBootApplication => 16,
            Subsystem::Other(value) => value,
        }
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    /// DLL characteristics of the image
    pub struct DllCharacteristics: u16 {
        /// Reserved; process attach notification
        const PROCESS_INIT = 0x0001;
        /// Reserved; process detach notification
        const PROCESS_TERM = 0x0002;
        /// Reserved; thread attach notification
        const THREAD_INIT = 0x0004;
        /// Reserved; thread detach notification
        const THREAD_TERM = 0x0008;
        /// Image can handle a high entropy 64-bit virtual address space
        const HIGH_ENTROPY_VIRTUAL_ADDRESS_SPACE = 0x0020;
        /// DLL can be relocated at load time
        const DYNAMIC_BASE = 0x0040;
        /// Code integrity checks are enforced
        const FORCE_INTEGRITY = 0x0080;
        /// Image is NX compatible
        const NX_COMPATIBLE = 0x0100;
        /// Isolation aware, but do not isolate the image
        const NO_ISOLATION = 0x0200;
        /// Does not use structured exception handling
        const NO_SEH = 0x0400;
        /// Do not bind the image
        const NO_BIND = 0x0800;
        /// Image must execute in an AppContainer
        const APP_CONTAINER = 0x1000;
        /// A WDM driver
        const WDM_DRIVER = 0x2000;
        /// Image supports Control Flow Guard
        const CONTROL_FLOW_GUARD = 0x4000;
        /// Terminal Server aware
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// Width-dependent fields of a PE32 optional header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pe32Fields {
    /// RVA of the beginning of the data section
    pub base_of_data: u32,
    /// Preferred load address
    pub image_base: u32,
    /// Stack reserve size
    pub size_of_stack_reserve: u32,
    /// Stack commit size
    pub size_of_stack_commit: u32,
    /// Heap reserve size
    pub size_of_heap_reserve: u32,
    /// Heap commit size
    pub size_of_heap_commit: u32,
}

/// Width-dependent fields of a PE32+ optional header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pe32PlusFields {
    /// Preferred load address
    pub image_base: u64,
    /// Stack reserve size
    pub size_of_stack_reserve: u64,
    /// Stack commit size
    pub size_of_stack_commit: u64,
    /// Heap reserve size
    pub size_of_heap_reserve: u64,
    /// Heap commit size
    pub size_of_heap_commit: u64,
}

/// Fields whose width depends on the optional header magic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PEHeaderVariant {
    /// 32-bit layout
    Pe32(Pe32Fields),
    /// 64-bit layout
    Pe32Plus(Pe32PlusFields),
}

/// The optional header of an image ("PE header").
///
/// All values are exactly as stored in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PEHeader {
    /// Linker major version
    pub major_linker_version: u8,
    /// Linker minor version
    pub minor_linker_version: u8,
    /// Sum of the raw sizes of all code sections
    pub size_of_code: u32,
    /// Sum of the raw sizes of all initialized data sections
    pub size_of_initialized_data: u32,
    /// Sum of the raw sizes of all uninitialized data sections
    pub size_of_uninitialized_data: u32,
    /// RVA of the entry point, zero if none
    pub address_of_entry_point: u32,
    /// RVA of the beginning of the code section
    pub base_of_code: u32,
    /// Alignment of sections in memory
    pub section_alignment: u32,
    /// Alignment of raw section data in the file
    pub file_alignment: u32,
    /// Required operating system major version
    pub major_operating_system_version: u16,
    /// Required operating system minor version
    pub minor_operating_system_version: u16,
    /// Image major version
    pub major_image_version: u16,
    /// Image minor version
    pub minor_image_version: u16,
    /// Subsystem major version
    pub major_subsystem_version: u16,
    /// Subsystem minor version
    pub minor_subsystem_version: u16,
    /// Reserved, must be zero
    pub win32_version_value: u32,
    /// Size of the image in memory, a multiple of the section alignment
    pub size_of_image: u32,
    /// Combined size of the DOS stub, PE headers and section table, rounded to the file alignment
    pub size_of_headers: u32,
    /// Image checksum
    pub check_sum: u32,
    /// Required subsystem
    pub subsystem: Subsystem,
    /// DLL characteristics
    pub dll_characteristics: DllCharacteristics,
    /// Reserved, must be zero
    pub loader_flags: u32,
    /// Declared number of directory entries
    pub number_of_rva_and_sizes: u32,
    /// Width-dependent fields
    pub variant: PEHeaderVariant,
    directories: [DirectoryEntry; DirectoryKind::COUNT],
}

impl PEHeader {
    /// Size of a PE32 optional header
    pub const SIZE_PE32: usize = 224;
    /// Size of a PE32+ optional header
    pub const SIZE_PE32_PLUS: usize = 240;

    /// Size of the optional header for the given width.
    #[must_use]
    pub fn size(is_32_bit: bool) -> usize {
        if is_32_bit {
            Self::SIZE_PE32
        } else {
            Self::SIZE_PE32_PLUS
        }
    }

    /// Reads the optional header at the current reader position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an unknown magic and
    /// [`crate::Error::ImageTooSmall`] if the image ends inside the header.
    pub fn read<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<PEHeader> {
        let magic = match reader.read_u16()? {
            MAGIC_32 => PEMagic::Pe32,
            MAGIC_64 => PEMagic::Pe32Plus,
            other => return Err(malformed_error!("Unknown PE magic: 0x{:04X}", other)),
        };

        let major_linker_version = reader.read_u8()?;
        let minor_linker_version = reader.read_u8()?;
        let size_of_code = reader.read_u32()?;
        let size_of_initialized_data = reader.read_u32()?;
        let size_of_uninitialized_data = reader.read_u32()?;
        let address_of_entry_point = reader.read_u32()?;
        let base_of_code = reader.read_u32()?;

        let (base_of_data, image_base) = match magic {
            PEMagic::Pe32 => (reader.read_u32()?, u64::from(reader.read_u32()?)),
            PEMagic::Pe32Plus => (0, reader.read_u64()?),
        };

        let section_alignment = reader.read_u32()?;
        let file_alignment = reader.read_u32()?;
        let major_operating_system_version = reader.read_u16()?;
        let minor_operating_system_version = reader.read_u16()?;
        let major_image_version = reader.read_u16()?;
        let minor_image_version = reader.read_u16()?;
        let major_subsystem_version = reader.read_u16()?;
        let minor_subsystem_version = reader.read_u16()?;
        let win32_version_value = reader.read_u32()?;
        let size_of_image = reader.read_u32()?;
        let size_of_headers = reader.read_u32()?;
        let check_sum = reader.read_u32()?;
        let subsystem = Subsystem::from(reader.read_u16()?);
        let dll_characteristics = DllCharacteristics::from_bits_retain(reader.read_u16()?);

        let variant = match magic {
            PEMagic::Pe32 => PEHeaderVariant::Pe32(Pe32Fields {
                base_of_data,
                image_base: image_base as u32,
                size_of_stack_reserve: reader.read_u32()?,
                size_of_stack_commit: reader.read_u32()?,
                size_of_heap_reserve: reader.read_u32()?,
                size_of_heap_commit: reader.read_u32()?,
            }),
            PEMagic::Pe32Plus => PEHeaderVariant::Pe32Plus(Pe32PlusFields {
                image_base,
                size_of_stack_reserve: reader.read_u64()?,
                size_of_stack_commit: reader.read_u64()?,
                size_of_heap_reserve: reader.read_u64()?,
                size_of_heap_commit: reader.read_u64()?,
            }),
        };

        let loader_flags = reader.read_u32()?;
        let number_of_rva_and_sizes = reader.read_u32()?;

        let mut directories = [DirectoryEntry::default(); DirectoryKind::COUNT];
        for directory in &mut directories {
            *directory = DirectoryEntry::new(reader.read_u32()?, reader.read_u32()?);
        }

        Ok(PEHeader {
            major_linker_version,
            minor_linker_version,
            size_of_code,
            size_of_initialized_data,
            size_of_uninitialized_data,
            address_of_entry_point,
            base_of_code,
            section_alignment,
            file_alignment,
            major_operating_system_version,
            minor_operating_system_version,
            major_image_version,
            minor_image_version,
            major_subsystem_version,
            minor_subsystem_version,
            win32_version_value,
            size_of_image,
            size_of_headers,
            check_sum,
            subsystem,
            dll_characteristics,
            loader_flags,
            number_of_rva_and_sizes,
            variant,
            directories,
        })
    }

    /// Optional header magic
    #[must_use]
    pub fn magic(&self) -> PEMagic {
        match self.variant {
            PEHeaderVariant::Pe32(_) => PEMagic::Pe32,
            PEHeaderVariant::Pe32Plus(_) => PEMagic::Pe32Plus,
        }
    }

    /// `BaseOfData`; only PE32 images have one.
    #[must_use]
    pub fn base_of_data(&self) -> Option<u32> {
        match &self.variant {
            PEHeaderVariant::Pe32(fields) => Some(fields.base_of_data),
            PEHeaderVariant::Pe32Plus(_) => None,
        }
    }

    /// Preferred load address
    #[must_use]
    pub fn image_base(&self) -> u64 {
        match &self.variant {
            PEHeaderVariant::Pe32(fields) => u64::from(fields.image_base),
            PEHeaderVariant::Pe32Plus(fields) => fields.image_base,
        }
    }

    /// Stack reserve size
    #[must_use]
    pub fn size_of_stack_reserve(&self) -> u64 {
        match &self.variant {
            PEHeaderVariant::Pe32(fields) => u64::from(fields.size_of_stack_reserve),
            PEHeaderVariant::Pe32Plus(fields) => fields.size_of_stack_reserve,
        }
    }

    /// Stack commit size
    #[must_use]
    pub fn size_of_stack_commit(&self) -> u64 {
        match &self.variant {
            PEHeaderVariant::Pe32(fields) => u64::from(fields.size_of_stack_commit),
            PEHeaderVariant::Pe32Plus(fields) => fields.size_of_stack_commit,
        }
    }

    /// Heap reserve size
    #[must_use]
    pub fn size_of_heap_reserve(&self) -> u64 {
        match &self.variant {
            PEHeaderVariant::Pe32(fields) => u64::from(fields.size_of_heap_reserve),
            PEHeaderVariant::Pe32Plus(fields) => fields.size_of_heap_reserve,
        }
    }

    /// Heap commit size
    #[must_use]
    pub fn size_of_heap_commit(&self) -> u64 {
        match &self.variant {
            PEHeaderVariant::Pe32(fields) => u64::from(fields.size_of_heap_commit),
            PEHeaderVariant::Pe32Plus(fields) => fields.size_of_heap_commit,
        }
    }

    /// All sixteen directory entries in on-disk order.
    #[must_use]
    pub fn directories(&self) -> &[DirectoryEntry; DirectoryKind::COUNT] {
        &self.directories
    }

    /// The directory entry in slot `kind`.
    #[must_use]
    pub fn directory(&self, kind: DirectoryKind) -> DirectoryEntry {
        self.directories[kind.index()]
    }

    /// Export table directory
    #[must_use]
    pub fn export_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::Export)
    }

    /// Import table directory
    #[must_use]
    pub fn import_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::Import)
    }

    /// Resource table directory
    #[must_use]
    pub fn resource_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::Resource)
    }

    /// Certificate table directory
    #[must_use]
    pub fn certificate_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::Certificate)
    }

    /// Base relocation table directory
    #[must_use]
    pub fn base_relocation_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::BaseRelocation)
    }

    /// Debug directory
    #[must_use]
    pub fn debug_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::Debug)
    }

    /// Import address table directory
    #[must_use]
    pub fn import_address_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::ImportAddressTable)
    }

    /// CLI header directory
    #[must_use]
    pub fn cor_header_table_directory(&self) -> DirectoryEntry {
        self.directory(DirectoryKind::CorHeader)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::Error;

    fn pe32_plus_bytes() -> Vec<u8> {
        #[rustfmt::skip]
        let mut bytes = vec![
            0x0B, 0x02,                                     // magic = PE32+
            0x30, 0x00,                                     // linker 48.0
            0x00, 0x04, 0x00, 0x00,                         // size_of_code
            0x00, 0x02, 0x00, 0x00,                         // size_of_initialized_data
            0x00, 0x00, 0x00, 0x00,                         // size_of_uninitialized_data
            0x00, 0x00, 0x00, 0x00,                         // address_of_entry_point
            0x00, 0x20, 0x00, 0x00,                         // base_of_code
            0x00, 0x00, 0x00, 0x80, 0x01, 0x00, 0x00, 0x00, // image_base
            0x00, 0x20, 0x00, 0x00,                         // section_alignment
            0x00, 0x02, 0x00, 0x00,                         // file_alignment
            0x04, 0x00, 0x00, 0x00,                         // os version 4.0
            0x00, 0x00, 0x00, 0x00,                         // image version 0.0
            0x04, 0x00, 0x00, 0x00,                         // subsystem version 4.0
            0x00, 0x00, 0x00, 0x00,                         // win32_version_value
            0x00, 0x60, 0x00, 0x00,                         // size_of_image
            0x00, 0x02, 0x00, 0x00,                         // size_of_headers
            0x00, 0x00, 0x00, 0x00,                         // check_sum
            0x03, 0x00,                                     // subsystem = CUI
            0x60, 0x85,                                     // dll_characteristics
            0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, // stack reserve
            0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // stack commit
            0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, // heap reserve
            0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // heap commit
            0x00, 0x00, 0x00, 0x00,                         // loader_flags
            0x10, 0x00, 0x00, 0x00,                         // number_of_rva_and_sizes
        ];
        let mut directories = [0u8; 128];
        // CLI header directory at slot 14
        directories[14 * 8..14 * 8 + 8].copy_from_slice(&[0x08, 0x20, 0, 0, 0x48, 0, 0, 0]);
        bytes.extend_from_slice(&directories);
        bytes
    }

    #[test]
    fn crafted_pe32_plus() {
        let bytes = pe32_plus_bytes();
        assert_eq!(bytes.len(), PEHeader::SIZE_PE32_PLUS);

        let mut reader = PEBinaryReader::new(Cursor::new(&bytes[..]), bytes.len()).unwrap();
        let header = PEHeader::read(&mut reader).unwrap();

        assert_eq!(header.magic(), PEMagic::Pe32Plus);
        assert_eq!(header.major_linker_version, 48);
        assert_eq!(header.size_of_code, 0x400);
        assert_eq!(header.base_of_code, 0x2000);
        assert_eq!(header.base_of_data(), None);
        assert_eq!(header.image_base(), 0x1_8000_0000);
        assert_eq!(header.section_alignment, 0x2000);
        assert_eq!(header.file_alignment, 0x200);
        assert_eq!(header.size_of_image, 0x6000);
        assert_eq!(header.subsystem, Subsystem::WindowsCui);
        assert_eq!(
            header.dll_characteristics,
            DllCharacteristics::HIGH_ENTROPY_VIRTUAL_ADDRESS_SPACE
                | DllCharacteristics::DYNAMIC_BASE
                | DllCharacteristics::NX_COMPATIBLE
                | DllCharacteristics::NO_SEH
                | DllCharacteristics::TERMINAL_SERVER_AWARE
        );
        assert_eq!(header.size_of_stack_reserve(), 0x40_0000);
        assert_eq!(header.size_of_stack_commit(), 0x4000);
        assert_eq!(header.size_of_heap_reserve(), 0x10_0000);
        assert_eq!(header.size_of_heap_commit(), 0x2000);
        assert_eq!(header.number_of_rva_and_sizes, 16);
        assert_eq!(
            header.cor_header_table_directory(),
            DirectoryEntry::new(0x2008, 0x48)
        );
        assert!(header.debug_table_directory().is_empty());
        assert_eq!(reader.current_offset().unwrap(), PEHeader::SIZE_PE32_PLUS);
    }

    #[test]
    fn pe32_width_fields() {
        #[rustfmt::skip]
        let mut bytes = vec![
            0x0B, 0x01,                 // magic = PE32
            0x0B, 0x00,                 // linker 11.0
            0x00, 0x02, 0x00, 0x00,     // size_of_code
            0x00, 0x04, 0x00, 0x00,     // size_of_initialized_data
            0x00, 0x00, 0x00, 0x00,     // size_of_uninitialized_data
            0x4E, 0x22, 0x00, 0x00,     // address_of_entry_point
            0x00, 0x20, 0x00, 0x00,     // base_of_code
            0x00, 0x40, 0x00, 0x00,     // base_of_data
            0x00, 0x00, 0x40, 0x00,     // image_base
        ];
        bytes.extend_from_slice(&[0u8; 40]);
        #[rustfmt::skip]
        let stack_and_heap = [
            0x00, 0x00, 0x10, 0x00,     // stack reserve
            0x00, 0x10, 0x00, 0x00,     // stack commit
            0x00, 0x00, 0x10, 0x00,     // heap reserve
            0x00, 0x10, 0x00, 0x00,     // heap commit
        ];
        bytes.extend_from_slice(&stack_and_heap);
        bytes.extend_from_slice(&[0u8; 8 + 128]);
        assert_eq!(bytes.len(), PEHeader::SIZE_PE32);

        let mut reader = PEBinaryReader::new(Cursor::new(&bytes[..]), bytes.len()).unwrap();
        let header = PEHeader::read(&mut reader).unwrap();

        assert_eq!(header.magic(), PEMagic::Pe32);
        assert_eq!(header.address_of_entry_point, 0x224E);
        assert_eq!(header.base_of_data(), Some(0x4000));
        assert_eq!(header.image_base(), 0x40_0000);
        assert_eq!(header.size_of_stack_reserve(), 0x10_0000);
        assert_eq!(header.size_of_heap_commit(), 0x1000);
        assert_eq!(header.subsystem, Subsystem::Unknown);
    }

    #[test]
    fn invalid_magic() {
        let mut bytes = pe32_plus_bytes();
        bytes[0] = 0x07;
        bytes[1] = 0x01;

        let mut reader = PEBinaryReader::new(Cursor::new(&bytes[..]), bytes.len()).unwrap();
        assert!(matches!(
            PEHeader::read(&mut reader),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn truncated_directories() {
        let bytes = pe32_plus_bytes();
        let mut reader = PEBinaryReader::new(Cursor::new(&bytes[..]), bytes.len() - 4).unwrap();
        assert!(matches!(
            PEHeader::read(&mut reader),
            Err(Error::ImageTooSmall)
        ));
    }

    #[test]
    fn subsystem_mapping() {
        assert_eq!(Subsystem::from(2), Subsystem::WindowsGui);
        assert_eq!(Subsystem::from(4), Subsystem::Other(4));
        assert_eq!(u16::from(Subsystem::WindowsCui), 3);
        assert_eq!(u16::from(Subsystem::Other(99)), 99);
        assert_eq!(PEMagic::Pe32.header_size(), 224);
        assert_eq!(PEMagic::Pe32Plus.header_size(), 240);
        assert_eq!(PEMagic::Pe32Plus.value(), 0x20B);
    }
}
