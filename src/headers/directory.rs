//! Data directory entries of the optional header.

use std::fmt;

use strum::{EnumCount, EnumIter};

/// An `(RVA, size)` pair locating a well-known structure inside the image.
///
/// An entry with both fields zero means "absent".
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectoryEntry {
    /// Relative virtual address of the structure
    pub relative_virtual_address: u32,
    /// Size of the structure in bytes
    pub size: u32,
}

impl DirectoryEntry {
    /// Size of an encoded entry in bytes
    pub const SIZE: usize = 8;

    /// Creates a new entry.
    #[must_use]
    pub const fn new(relative_virtual_address: u32, size: u32) -> Self {
        DirectoryEntry {
            relative_virtual_address,
            size,
        }
    }

    /// Returns `true` when both the RVA and the size are zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relative_virtual_address == 0 && self.size == 0
    }
}

impl fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[0x{:08X}, 0x{:X}]",
            self.relative_virtual_address, self.size
        )
    }
}

/// The sixteen directory slots of the optional header, in on-disk order.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, EnumIter, EnumCount)]
#[repr(usize)]
pub enum DirectoryKind {
    /// Export table (`.edata`)
    Export,
    /// Import table (`.idata`)
    Import,
    /// Resource table (`.rsrc`)
    Resource,
    /// Exception table (`.pdata`)
    Exception,
    /// Attribute certificate table. The RVA is a file pointer for this slot.
    Certificate,
    /// Base relocation table (`.reloc`)
    BaseRelocation,
    /// Debug directory
    Debug,
    /// Architecture specific data; reserved
    Copyright,
    /// Global pointer register value
    GlobalPointer,
    /// Thread local storage table
    ThreadLocalStorage,
    /// Load configuration table
    LoadConfig,
    /// Bound import table
    BoundImport,
    /// Import address table
    ImportAddressTable,
    /// Delay import descriptor
    DelayImport,
    /// CLI (COR20) header
    CorHeader,
    /// Reserved; must be zero
    Reserved,
}

impl DirectoryKind {
    /// Slot index within the directory array.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn directory_kind_order() {
        assert_eq!(DirectoryKind::COUNT, 16);
        assert_eq!(DirectoryKind::Export.index(), 0);
        assert_eq!(DirectoryKind::Debug.index(), 6);
        assert_eq!(DirectoryKind::ImportAddressTable.index(), 12);
        assert_eq!(DirectoryKind::CorHeader.index(), 14);
        assert_eq!(DirectoryKind::Reserved.index(), 15);

        for (position, kind) in DirectoryKind::iter().enumerate() {
            assert_eq!(kind.index(), position);
        }
    }

    #[test]
    fn empty_entry() {
        assert!(DirectoryEntry::default().is_empty());
        assert!(!DirectoryEntry::new(0, 8).is_empty());
        assert!(!DirectoryEntry::new(0x2000, 0).is_empty());
        assert_eq!(DirectoryEntry::new(0x2008, 0x48).to_string(), "[0x00002008, 0x48]");
    }
}
