//! Layout of the `.text` section of a managed image.
//!
//! In file order the section holds:
//!
//! | Part | Present |
//! |------|---------|
//! | Import address table | only with a startup stub |
//! | CLI header (72 bytes) | always |
//! | IL method bodies, 4-byte aligned | always |
//! | Metadata | always |
//! | Managed resources | if any |
//! | Strong-name signature reservation | if size > 0 |
//! | Debug directory table and data | if any |
//! | Import table, name table, startup stub | only with a startup stub |
//! | Mapped field data, 8-byte aligned | if any |
//!
//! Every `offset_to_*` accessor depends only on the sizes of the parts before it, so the same
//! formulas serve the layout pass and the directory-entry pass.

use log::trace;

use crate::{
    headers::{Characteristics, CorFlags, CorHeader, DirectoryEntry, Machine},
    utils::{align_up, to_u32},
    Result,
};

use super::{BlobBuilder, Fixup};

const CORE_ENTRY_POINT_DLL: &[u8] = b"mscoree.dll";
const EXE_ENTRY_POINT: &[u8] = b"_CorExeMain";
const DLL_ENTRY_POINT: &[u8] = b"_CorDllMain";

const MAPPED_FIELD_DATA_ALIGNMENT: usize = 8;
const IMPORT_DESCRIPTOR_SIZE: usize = 40;
const MAJOR_RUNTIME_VERSION: u16 = 2;
const MINOR_RUNTIME_VERSION: u16 = 5;

/// Serialized parts placed into the `.text` section.
#[derive(Debug, Default)]
pub struct TextSectionContent {
    /// IL method bodies
    pub il_stream: BlobBuilder,
    /// Serialized metadata
    pub metadata: BlobBuilder,
    /// Managed resources
    pub managed_resources: Option<BlobBuilder>,
    /// Debug directory table followed by its data
    pub debug_data: Option<BlobBuilder>,
    /// Data of fields with an RVA
    pub mapped_field_data: Option<BlobBuilder>,
}

/// Computes the layout of the `.text` section from the sizes of its parts.
///
/// # Examples
///
/// ```rust
/// use dotpe::{headers::{Characteristics, Machine}, ManagedTextSection};
///
/// let text = ManagedTextSection::new(Characteristics::DLL, Machine::I386, 10, 64, 0, 128, 0, 0);
/// assert!(text.requires_startup_stub());
/// assert_eq!(text.offset_to_il_stream(), 8 + 72);
/// assert_eq!(text.offset_to_metadata(), 8 + 72 + 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagedTextSection {
    image_characteristics: Characteristics,
    machine: Machine,
    il_stream_size: usize,
    metadata_size: usize,
    resource_data_size: usize,
    strong_name_signature_size: usize,
    debug_data_size: usize,
    mapped_field_data_size: usize,
}

impl ManagedTextSection {
    /// Size of the CLI header
    pub const SIZE_OF_COR_HEADER: usize = CorHeader::SIZE;

    /// Creates the layout for parts of the given sizes.
    #[must_use]
    pub fn new(
        image_characteristics: Characteristics,
        machine: Machine,
        il_stream_size: usize,
        metadata_size: usize,
        resource_data_size: usize,
        strong_name_signature_size: usize,
        debug_data_size: usize,
        mapped_field_data_size: usize,
    ) -> ManagedTextSection {
        ManagedTextSection {
            image_characteristics,
            machine,
            il_stream_size,
            metadata_size,
            resource_data_size,
            strong_name_signature_size,
            debug_data_size,
            mapped_field_data_size,
        }
    }

    /// Returns `true` if the image needs an `mscoree.dll` import and a native startup stub.
    ///
    /// Only images for x86 or an unspecified machine are started through the stub.
    #[must_use]
    pub fn requires_startup_stub(&self) -> bool {
        matches!(self.machine, Machine::I386 | Machine::Unknown)
    }

    /// Returns `true` if pointers in the stub and import tables are 32 bits wide
    #[must_use]
    pub fn is_32_bit(&self) -> bool {
        !self.machine.is_64_bit()
    }

    fn is_dll(&self) -> bool {
        self.image_characteristics.contains(Characteristics::DLL)
    }

    /// Size of the import address table, zero without a startup stub
    #[must_use]
    pub fn size_of_import_address_table(&self) -> usize {
        match (self.requires_startup_stub(), self.is_32_bit()) {
            (false, _) => 0,
            (true, true) => 2 * 4,
            (true, false) => 2 * 8,
        }
    }

    /// Size of the import descriptor, lookup table and hint/name entry
    #[must_use]
    pub fn size_of_import_table(&self) -> usize {
        let lookup_table = if self.is_32_bit() { 3 * 4 } else { 2 * 8 };
        IMPORT_DESCRIPTOR_SIZE + lookup_table + 2 + EXE_ENTRY_POINT.len() + 1
    }

    /// Size of the imported DLL name entry
    #[must_use]
    pub fn size_of_name_table(&self) -> usize {
        CORE_ENTRY_POINT_DLL.len() + 1 + 2
    }

    /// Size of the startup stub
    #[must_use]
    pub fn size_of_runtime_startup_stub(&self) -> usize {
        if self.is_32_bit() {
            8
        } else {
            16
        }
    }

    /// Offset of the IL stream
    #[must_use]
    pub fn offset_to_il_stream(&self) -> usize {
        self.size_of_import_address_table() + Self::SIZE_OF_COR_HEADER
    }

    /// Offset of the metadata
    #[must_use]
    pub fn offset_to_metadata(&self) -> usize {
        self.offset_to_il_stream() + align_up(self.il_stream_size, 4)
    }

    /// Offset of the debug directory table
    #[must_use]
    pub fn offset_to_debug_directory(&self) -> usize {
        self.offset_to_metadata()
            + self.metadata_size
            + self.resource_data_size
            + self.strong_name_signature_size
    }

    /// Offset of the import table
    #[must_use]
    pub fn offset_to_import_table(&self) -> usize {
        self.offset_to_debug_directory() + self.debug_data_size
    }

    fn offset_to_mapped_field_data_stream_unaligned(&self) -> usize {
        let mut offset = self.offset_to_import_table();
        if self.requires_startup_stub() {
            offset += self.size_of_import_table() + self.size_of_name_table();
            offset = align_up(offset, if self.is_32_bit() { 4 } else { 8 });
            offset += self.size_of_runtime_startup_stub();
        }
        offset
    }

    /// Offset of the mapped field data
    #[must_use]
    pub fn offset_to_mapped_field_data_stream(&self) -> usize {
        let offset = self.offset_to_mapped_field_data_stream_unaligned();
        if self.mapped_field_data_size == 0 {
            offset
        } else {
            align_up(offset, MAPPED_FIELD_DATA_ALIGNMENT)
        }
    }

    /// Total size of the section content
    #[must_use]
    pub fn size(&self) -> usize {
        self.offset_to_mapped_field_data_stream() + self.mapped_field_data_size
    }

    /// RVA of the startup stub's jump instruction, zero without a stub
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the address does not fit 32 bits.
    pub fn entry_point_address(&self, section_rva: u32) -> Result<u32> {
        if !self.requires_startup_stub() {
            return Ok(0);
        }
        let jump_size = if self.is_32_bit() { 6 } else { 10 };
        Ok(section_rva + to_u32(self.offset_to_mapped_field_data_stream_unaligned() - jump_size)?)
    }

    /// Directory entry of the import address table
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit 32 bits.
    pub fn import_address_table_directory_entry(&self, section_rva: u32) -> Result<DirectoryEntry> {
        if !self.requires_startup_stub() {
            return Ok(DirectoryEntry::default());
        }
        Ok(DirectoryEntry::new(
            section_rva,
            to_u32(self.size_of_import_address_table())?,
        ))
    }

    /// Directory entry of the import table
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit 32 bits.
    pub fn import_table_directory_entry(&self, section_rva: u32) -> Result<DirectoryEntry> {
        if !self.requires_startup_stub() {
            return Ok(DirectoryEntry::default());
        }
        // Includes the DLL name table except its final padding byte.
        Ok(DirectoryEntry::new(
            section_rva + to_u32(self.offset_to_import_table())?,
            to_u32(self.size_of_import_table() + CORE_ENTRY_POINT_DLL.len() + 2)?,
        ))
    }

    /// Directory entry of the CLI header
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if a value does not fit 32 bits.
    pub fn cor_header_directory_entry(&self, section_rva: u32) -> Result<DirectoryEntry> {
        Ok(DirectoryEntry::new(
            section_rva + to_u32(self.size_of_import_address_table())?,
            to_u32(Self::SIZE_OF_COR_HEADER)?,
        ))
    }

    /// Writes the section content and returns the strong-name signature reservation.
    ///
    /// # Errors
    /// Returns [`crate::Error::BuilderInvariant`] if a part's size differs from the size the
    /// layout was computed with.
    pub fn serialize(
        &self,
        builder: &mut BlobBuilder,
        section_rva: u32,
        entry_point_token_or_rva: u32,
        cor_flags: CorFlags,
        image_base: u64,
        content: TextSectionContent,
    ) -> Result<Fixup> {
        trace!(
            "text layout: il=0x{:X} metadata=0x{:X} debug=0x{:X} import=0x{:X} mapped=0x{:X} size=0x{:X}",
            self.offset_to_il_stream(),
            self.offset_to_metadata(),
            self.offset_to_debug_directory(),
            self.offset_to_import_table(),
            self.offset_to_mapped_field_data_stream(),
            self.size()
        );

        let TextSectionContent {
            mut il_stream,
            metadata,
            managed_resources,
            debug_data,
            mapped_field_data,
        } = content;

        self.check_size("metadata", metadata.len(), self.metadata_size)?;
        self.check_size(
            "managed resources",
            managed_resources.as_ref().map_or(0, BlobBuilder::len),
            self.resource_data_size,
        )?;
        self.check_size(
            "debug data",
            debug_data.as_ref().map_or(0, BlobBuilder::len),
            self.debug_data_size,
        )?;

        let import_table_rva = self.import_table_directory_entry(section_rva)?.relative_virtual_address;
        let import_address_table_rva = self
            .import_address_table_directory_entry(section_rva)?
            .relative_virtual_address;

        if self.requires_startup_stub() {
            self.write_import_address_table(builder, import_table_rva);
        }

        self.write_cor_header(builder, section_rva, entry_point_token_or_rva, cor_flags)?;

        il_stream.align(4);
        self.check_size("IL stream", il_stream.len(), align_up(self.il_stream_size, 4))?;
        builder.link_suffix(il_stream);
        builder.link_suffix(metadata);
        if let Some(resources) = managed_resources {
            builder.link_suffix(resources);
        }

        let strong_name_signature = builder.reserve(self.strong_name_signature_size);

        if let Some(debug_data) = debug_data {
            builder.link_suffix(debug_data);
        }

        if self.requires_startup_stub() {
            self.write_import_table(builder, import_table_rva, import_address_table_rva);
            self.write_name_table(builder);
            self.write_runtime_startup_stub(builder, import_address_table_rva, image_base);
        }

        if let Some(mapped_field_data) = mapped_field_data {
            if !mapped_field_data.is_empty() {
                builder.align(MAPPED_FIELD_DATA_ALIGNMENT);
            }
            builder.link_suffix(mapped_field_data);
        }

        Ok(strong_name_signature)
    }

    fn check_size(&self, part: &str, actual: usize, expected: usize) -> Result<()> {
        if actual != expected {
            return Err(crate::Error::BuilderInvariant(format!(
                "{part} is {actual} bytes but the text layout reserved {expected}"
            )));
        }
        Ok(())
    }

    fn hint_name_rva(&self, import_table_rva: u32) -> u32 {
        let lookup_table_rva = import_table_rva + IMPORT_DESCRIPTOR_SIZE as u32;
        lookup_table_rva + if self.is_32_bit() { 12 } else { 16 }
    }

    fn write_import_address_table(&self, builder: &mut BlobBuilder, import_table_rva: u32) {
        let hint_rva = self.hint_name_rva(import_table_rva);
        if self.is_32_bit() {
            builder.write_u32(hint_rva);
            builder.write_u32(0);
        } else {
            builder.write_u64(u64::from(hint_rva));
            builder.write_u64(0);
        }
    }

    fn write_cor_header(
        &self,
        builder: &mut BlobBuilder,
        section_rva: u32,
        entry_point_token_or_rva: u32,
        cor_flags: CorFlags,
    ) -> Result<()> {
        let metadata_rva = section_rva + to_u32(self.offset_to_metadata())?;
        let metadata_size = to_u32(self.metadata_size)?;
        let resources_rva = metadata_rva + metadata_size;
        let resources_size = to_u32(self.resource_data_size)?;
        let signature_rva = resources_rva + resources_size;
        let signature_size = to_u32(self.strong_name_signature_size)?;

        builder.write_u32(to_u32(Self::SIZE_OF_COR_HEADER)?);
        builder.write_u16(MAJOR_RUNTIME_VERSION);
        builder.write_u16(MINOR_RUNTIME_VERSION);
        builder.write_u32(metadata_rva);
        builder.write_u32(metadata_size);
        builder.write_u32(cor_flags.bits());
        builder.write_u32(entry_point_token_or_rva);
        builder.write_u32(if resources_size == 0 { 0 } else { resources_rva });
        builder.write_u32(resources_size);
        builder.write_u32(if signature_size == 0 { 0 } else { signature_rva });
        builder.write_u32(signature_size);
        // code manager table, vtable fixups, export address table jumps, managed native header
        builder.write_zeros(4 * DirectoryEntry::SIZE);
        Ok(())
    }

    fn write_import_table(
        &self,
        builder: &mut BlobBuilder,
        import_table_rva: u32,
        import_address_table_rva: u32,
    ) {
        let lookup_table_rva = import_table_rva + IMPORT_DESCRIPTOR_SIZE as u32;
        let hint_rva = self.hint_name_rva(import_table_rva);
        let name_rva = hint_rva + 2 + EXE_ENTRY_POINT.len() as u32 + 1;

        // import descriptor, followed by an all-zero terminator
        builder.write_u32(lookup_table_rva);
        builder.write_u32(0);
        builder.write_u32(0);
        builder.write_u32(name_rva);
        builder.write_u32(import_address_table_rva);
        builder.write_zeros(20);

        // import lookup table
        if self.is_32_bit() {
            builder.write_u32(hint_rva);
            builder.write_u32(0);
            builder.write_u32(0);
        } else {
            builder.write_u64(u64::from(hint_rva));
            builder.write_u64(0);
        }

        // hint/name entry
        builder.write_u16(0);
        builder.write_bytes(if self.is_dll() {
            DLL_ENTRY_POINT
        } else {
            EXE_ENTRY_POINT
        });
        builder.write_u8(0);
    }

    fn write_name_table(&self, builder: &mut BlobBuilder) {
        builder.write_bytes(CORE_ENTRY_POINT_DLL);
        builder.write_u8(0);
        builder.write_u16(0);
    }

    fn write_runtime_startup_stub(
        &self,
        builder: &mut BlobBuilder,
        import_address_table_rva: u32,
        image_base: u64,
    ) {
        // jmp dword ptr [IAT], padded so that the jump target is naturally aligned
        if self.is_32_bit() {
            builder.align(4);
            builder.write_u16(0);
            builder.write_bytes(&[0xFF, 0x25]);
            builder.write_u32(import_address_table_rva.wrapping_add(image_base as u32));
        } else {
            builder.align(8);
            builder.write_u32(0);
            builder.write_u16(0);
            builder.write_bytes(&[0xFF, 0x25]);
            builder.write_u64(u64::from(import_address_table_rva) + image_base);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(machine: Machine) -> ManagedTextSection {
        ManagedTextSection::new(Characteristics::DLL, machine, 10, 64, 12, 128, 28, 0)
    }

    #[test]
    fn startup_stub_only_for_x86() {
        assert!(layout(Machine::I386).requires_startup_stub());
        assert!(layout(Machine::Unknown).requires_startup_stub());
        assert!(!layout(Machine::Amd64).requires_startup_stub());
        assert!(!layout(Machine::Arm64).requires_startup_stub());
        assert!(!layout(Machine::Arm).requires_startup_stub());
    }

    #[test]
    fn import_sizes() {
        let x86 = layout(Machine::I386);
        assert_eq!(x86.size_of_import_address_table(), 8);
        assert_eq!(x86.size_of_import_table(), 66);
        assert_eq!(x86.size_of_name_table(), 14);
        assert_eq!(x86.size_of_runtime_startup_stub(), 8);

        let x64 = layout(Machine::Amd64);
        assert_eq!(x64.size_of_import_address_table(), 0);
        assert_eq!(x64.size_of_import_table(), 70);
        assert_eq!(x64.size_of_runtime_startup_stub(), 16);
    }

    #[test]
    fn offsets_x86() {
        let text = layout(Machine::I386);
        assert_eq!(text.offset_to_il_stream(), 80);
        assert_eq!(text.offset_to_metadata(), 92);
        assert_eq!(text.offset_to_debug_directory(), 92 + 64 + 12 + 128);
        assert_eq!(text.offset_to_import_table(), 296 + 28);
        // 324 + 66 + 14 = 404, aligned to 4, plus the stub
        assert_eq!(text.offset_to_mapped_field_data_stream(), 412);
        assert_eq!(text.size(), 412);
        assert_eq!(text.entry_point_address(0x2000).unwrap(), 0x2000 + 412 - 6);
    }

    #[test]
    fn offsets_x64() {
        let text = ManagedTextSection::new(Characteristics::DLL, Machine::Amd64, 3, 64, 0, 0, 0, 5);
        assert_eq!(text.offset_to_il_stream(), 72);
        assert_eq!(text.offset_to_metadata(), 76);
        assert_eq!(text.offset_to_import_table(), 140);
        assert_eq!(text.offset_to_mapped_field_data_stream(), 144);
        assert_eq!(text.size(), 149);
        assert_eq!(text.entry_point_address(0x2000).unwrap(), 0);
        assert!(text.import_table_directory_entry(0x2000).unwrap().is_empty());
        assert_eq!(
            text.cor_header_directory_entry(0x2000).unwrap(),
            DirectoryEntry::new(0x2000, 72)
        );
    }

    #[test]
    fn serialized_size_matches_layout() {
        let text = ManagedTextSection::new(Characteristics::DLL, Machine::I386, 5, 16, 0, 32, 0, 3);
        let mut il_stream = BlobBuilder::new();
        il_stream.write_bytes(&[0x2A; 5]);
        let mut mapped_field_data = BlobBuilder::new();
        mapped_field_data.write_bytes(&[1, 2, 3]);

        let mut builder = BlobBuilder::new();
        let signature = text
            .serialize(
                &mut builder,
                0x2000,
                0x0600_0001,
                CorFlags::IL_ONLY,
                0x0040_0000,
                TextSectionContent {
                    il_stream,
                    metadata: BlobBuilder::from_bytes(vec![0xCC; 16]),
                    mapped_field_data: Some(mapped_field_data),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(builder.len(), text.size());
        assert_eq!(signature.range(), 8 + 72 + 8 + 16..8 + 72 + 8 + 16 + 32);

        let bytes = builder.into_bytes();
        // mscoree.dll name table follows the import table
        let name_offset = text.offset_to_import_table() + text.size_of_import_table();
        assert_eq!(&bytes[name_offset..name_offset + 11], b"mscoree.dll");
        // the stub jumps through the import address table at the start of the section
        let stub = text.offset_to_mapped_field_data_stream_unaligned() - 8;
        assert_eq!(&bytes[stub + 2..stub + 4], &[0xFF, 0x25]);
        assert_eq!(
            u32::from_le_bytes(bytes[stub + 4..stub + 8].try_into().unwrap()),
            0x0040_2000
        );
    }

    #[test]
    fn serialize_rejects_size_mismatch() {
        let text = ManagedTextSection::new(Characteristics::DLL, Machine::Amd64, 0, 16, 0, 0, 0, 0);
        let result = text.serialize(
            &mut BlobBuilder::new(),
            0x2000,
            0,
            CorFlags::IL_ONLY,
            0,
            TextSectionContent {
                metadata: BlobBuilder::from_bytes(vec![0; 12]),
                ..Default::default()
            },
        );
        assert!(matches!(result, Err(crate::Error::BuilderInvariant(_))));
    }
}
