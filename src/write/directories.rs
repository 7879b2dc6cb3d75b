use strum::EnumCount;

use crate::headers::{DirectoryEntry, DirectoryKind};

/// Directory entries collected while sections are serialized.
///
/// Section serializers fill in the entries for the structures they emit; the
/// [`crate::PEBuilder`] writes all of them into the optional header afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PEDirectoriesBuilder {
    /// RVA of the entry point, zero if there is none
    pub address_of_entry_point: u32,
    /// Export table
    pub export_table: DirectoryEntry,
    /// Import table
    pub import_table: DirectoryEntry,
    /// Native resource table (`.rsrc`)
    pub resource_table: DirectoryEntry,
    /// Exception table
    pub exception_table: DirectoryEntry,
    /// Attribute certificate table; the RVA field holds a file offset
    pub certificate_table: DirectoryEntry,
    /// Base relocation table (`.reloc`)
    pub base_relocation_table: DirectoryEntry,
    /// Debug directory
    pub debug_table: DirectoryEntry,
    /// Architecture-specific data
    pub copyright_table: DirectoryEntry,
    /// Global pointer register value
    pub global_pointer_table: DirectoryEntry,
    /// Thread local storage table
    pub thread_local_storage_table: DirectoryEntry,
    /// Load configuration table
    pub load_config_table: DirectoryEntry,
    /// Bound import table
    pub bound_import_table: DirectoryEntry,
    /// Import address table
    pub import_address_table: DirectoryEntry,
    /// Delay import descriptor
    pub delay_import_table: DirectoryEntry,
    /// CLI header
    pub cor_header_table: DirectoryEntry,
}

impl PEDirectoriesBuilder {
    /// All 16 entries in optional-header order; the reserved slot is always zero.
    #[must_use]
    pub fn entries(&self) -> [DirectoryEntry; DirectoryKind::COUNT] {
        [
            self.export_table,
            self.import_table,
            self.resource_table,
            self.exception_table,
            self.certificate_table,
            self.base_relocation_table,
            self.debug_table,
            self.copyright_table,
            self.global_pointer_table,
            self.thread_local_storage_table,
            self.load_config_table,
            self.bound_import_table,
            self.import_address_table,
            self.delay_import_table,
            self.cor_header_table,
            DirectoryEntry::default(),
        ]
    }

    /// The entry for `kind`
    #[must_use]
    pub fn get(&self, kind: DirectoryKind) -> DirectoryEntry {
        self.entries()[kind.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_follow_directory_order() {
        let directories = PEDirectoriesBuilder {
            import_table: DirectoryEntry::new(0x2000, 0x53),
            debug_table: DirectoryEntry::new(0x2100, 28),
            cor_header_table: DirectoryEntry::new(0x2008, 72),
            ..Default::default()
        };

        let entries = directories.entries();
        assert_eq!(entries[DirectoryKind::Import.index()], DirectoryEntry::new(0x2000, 0x53));
        assert_eq!(entries[DirectoryKind::Debug.index()].size, 28);
        assert_eq!(directories.get(DirectoryKind::CorHeader).relative_virtual_address, 0x2008);
        assert!(entries[DirectoryKind::Reserved.index()].is_empty());
        assert!(directories.get(DirectoryKind::Export).is_empty());
    }
}
