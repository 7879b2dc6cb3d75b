//! The COFF file header.
//!
//! # Reference
//! - [PE Format, COFF File Header](https://learn.microsoft.com/en-us/windows/win32/debug/pe-format#coff-file-header-object-and-image)

use std::io::{Read, Seek};

use bitflags::bitflags;
use goblin::pe::header::{
    COFF_MACHINE_ARM, COFF_MACHINE_ARM64, COFF_MACHINE_ARMNT, COFF_MACHINE_IA64,
    COFF_MACHINE_LOONGARCH32, COFF_MACHINE_LOONGARCH64, COFF_MACHINE_RISCV128,
    COFF_MACHINE_RISCV32, COFF_MACHINE_RISCV64, COFF_MACHINE_THUMB, COFF_MACHINE_UNKNOWN,
    COFF_MACHINE_X86, COFF_MACHINE_X86_64,
};

use crate::{file::PEBinaryReader, Result};

/// Target architecture of an image.
///
/// Values without a named variant are preserved in [`Machine::Other`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Machine {
    /// Applicable to any machine type
    #[default]
    Unknown,
    /// Intel 386 and compatible
    I386,
    /// ARM little endian
    Arm,
    /// ARM Thumb
    Thumb,
    /// ARM Thumb-2 little endian
    ArmThumb2,
    /// Intel Itanium
    IA64,
    /// x64
    Amd64,
    /// ARM64 little endian
    Arm64,
    /// LoongArch 32-bit
    LoongArch32,
    /// LoongArch 64-bit
    LoongArch64,
    /// RISC-V 32-bit
    RiscV32,
    /// RISC-V 64-bit
    RiscV64,
    /// RISC-V 128-bit
    RiscV128,
    /// Any other machine value
    Other(u16),
}

impl Machine {
    /// Returns `true` for architectures whose images use the PE32+ optional header.
    #[must_use]
    pub fn is_64_bit(self) -> bool {
        matches!(
            self,
            Machine::Amd64
                | Machine::IA64
                | Machine::Arm64
                | Machine::LoongArch64
                | Machine::RiscV64
        )
    }
}

impl From<u16> for Machine {
    fn from(value: u16) -> Self {
        match value {
            COFF_MACHINE_UNKNOWN => Machine::Unknown,
            COFF_MACHINE_X86 => Machine::I386,
            COFF_MACHINE_ARM => Machine::Arm,
            COFF_MACHINE_THUMB => Machine::Thumb,
            COFF_MACHINE_ARMNT => Machine::ArmThumb2,
            COFF_MACHINE_IA64 => Machine::IA64,
            COFF_MACHINE_X86_64 => Machine::Amd64,
            COFF_MACHINE_ARM64 => Machine::Arm64,
            COFF_MACHINE_LOONGARCH32 => Machine::LoongArch32,
            COFF_MACHINE_LOONGARCH64 => Machine::LoongArch64,
            COFF_MACHINE_RISCV32 => Machine::RiscV32,
            COFF_MACHINE_RISCV64 => Machine::RiscV64,
            COFF_MACHINE_RISCV128 => Machine::RiscV128,
            other => Machine::Other(other),
        }
    }
}

impl From<Machine> for u16 {
    fn from(value: Machine) -> Self {
        match value {
            Machine::Unknown => COFF_MACHINE_UNKNOWN,
            Machine::I386 => COFF_MACHINE_X86,
            Machine::Arm => COFF_MACHINE_ARM,
            Machine::Thumb => COFF_MACHINE_THUMB,
            Machine::ArmThumb2 => COFF_MACHINE_ARMNT,
            Machine::IA64 => COFF_MACHINE_IA64,
            Machine::Amd64 => COFF_MACHINE_X86_64,
            Machine::Arm64 => COFF_MACHINE_ARM64,
            Machine::LoongArch32 => COFF_MACHINE_LOONGARCH32,
            Machine::LoongArch64 => COFF_MACHINE_LOONGARCH64,
            Machine::RiscV32 => COFF_MACHINE_RISCV32,
            Machine::RiscV64 => COFF_MACHINE_RISCV64,
            Machine::RiscV128 => COFF_MACHINE_RISCV128,
            Machine::Other(value) => value,
        }
    }
}

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    /// Attributes of the object or image file
    pub struct Characteristics: u16 {
        /// Relocation information was stripped from the file
        const RELOCS_STRIPPED = 0x0001;
        /// The file is executable
        const EXECUTABLE_IMAGE = 0x0002;
        /// COFF line numbers were stripped from the file
        const LINE_NUMS_STRIPPED = 0x0004;
        /// COFF symbol table entries were stripped from the file
        const LOCAL_SYMS_STRIPPED = 0x0008;
        /// Aggressively trim the working set (obsolete)
        const AGGRESSIVE_WS_TRIM = 0x0010;
        /// The application can handle addresses larger than 2 GB
        const LARGE_ADDRESS_AWARE = 0x0020;
        /// Little endian (obsolete)
        const BYTES_REVERSED_LO = 0x0080;
        /// The computer supports 32-bit words
        const MACHINE_32BIT = 0x0100;
        /// Debugging information was removed and stored separately
        const DEBUG_STRIPPED = 0x0200;
        /// Copy the image from removable media to the swap file before running
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        /// Copy the image from the network to the swap file before running
        const NET_RUN_FROM_SWAP = 0x0800;
        /// The image is a system file
        const SYSTEM = 0x1000;
        /// The image is a dynamic-link library
        const DLL = 0x2000;
        /// Run only on a uniprocessor computer
        const UP_SYSTEM_ONLY = 0x4000;
        /// Big endian (obsolete)
        const BYTES_REVERSED_HI = 0x8000;
    }
}

/// The 20-byte COFF file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoffHeader {
    /// Target machine
    pub machine: Machine,
    /// Number of entries in the section table
    pub number_of_sections: u16,
    /// Low 32 bits of the creation time, or a content hash for deterministic images
    pub time_date_stamp: u32,
    /// File offset of the COFF symbol table, zero if absent
    pub pointer_to_symbol_table: u32,
    /// Number of entries in the symbol table
    pub number_of_symbols: u32,
    /// Size of the optional header; zero for object files
    pub size_of_optional_header: u16,
    /// Image attributes
    pub characteristics: Characteristics,
}

impl CoffHeader {
    /// Size of the encoded header in bytes
    pub const SIZE: usize = 20;

    /// Reads the header at the current reader position.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for a negative section count and
    /// [`crate::Error::ImageTooSmall`] if the image ends inside the header.
    pub fn read<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<CoffHeader> {
        let machine = Machine::from(reader.read_u16()?);

        let number_of_sections = reader.read_i16()?;
        let Ok(number_of_sections) = u16::try_from(number_of_sections) else {
            return Err(malformed_error!(
                "Invalid number of sections: {}",
                number_of_sections
            ));
        };

        Ok(CoffHeader {
            machine,
            number_of_sections,
            time_date_stamp: reader.read_u32()?,
            pointer_to_symbol_table: reader.read_u32()?,
            number_of_symbols: reader.read_u32()?,
            size_of_optional_header: reader.read_u16()?,
            characteristics: Characteristics::from_bits_retain(reader.read_u16()?),
        })
    }
}
