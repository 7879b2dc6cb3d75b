//! Fixed-layout PE/COFF records and the [`PEHeaders`] orchestrator.
//!
//! Every record is an immutable snapshot holding the values exactly as stored on disk. The
//! records are read through [`crate::PEBinaryReader`], so truncated input surfaces as
//! [`crate::Error::ImageTooSmall`] instead of a panic.
//!
//! # Key Components
//!
//! - [`CoffHeader`] - The 20-byte COFF file header
//! - [`PEHeader`] - The PE32/PE32+ optional header with its sixteen [`DirectoryEntry`] slots
//! - [`SectionHeader`] - One 40-byte section table entry
//! - [`CorHeader`] - The CLI header of managed images
//! - [`DebugDirectoryEntry`] - One 28-byte debug directory record
//! - [`PEHeaders`] - Reads all of the above and locates the CLI metadata

mod coff;
mod cor;
mod debug;
mod directory;
mod optional;
mod pe_headers;
mod section;

pub use coff::{Characteristics, CoffHeader, Machine};
pub use cor::{CorFlags, CorHeader};
pub use debug::{DebugDirectoryEntry, DebugDirectoryEntryType};
pub use directory::{DirectoryEntry, DirectoryKind};
pub use optional::{
    DllCharacteristics, PEHeader, PEHeaderVariant, PEMagic, Pe32Fields, Pe32PlusFields, Subsystem,
};
pub use pe_headers::PEHeaders;
pub use section::{SectionCharacteristics, SectionHeader};

/// Size of the DOS stub emitted in front of the PE signature
pub const DOS_STUB_SIZE: usize = 128;

/// Size of the `PE\0\0` signature
pub const PE_SIGNATURE_SIZE: usize = 4;
