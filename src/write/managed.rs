//! Builder for managed (CLI) images.
//!
//! [`ManagedPEBuilder`] drives [`PEBuilder`] with a fixed set of sections:
//!
//! - `.text` - import address table, CLI header, IL, metadata, managed resources, the
//!   strong-name reservation, the debug directory, the `mscoree.dll` import and startup stub,
//!   and mapped field data
//! - `.rsrc` - native Win32 resources, only when a [`ResourceSectionBuilder`] is supplied
//! - `.reloc` - one base relocation for the startup stub, only for 32-bit images
//!
//! # Extension Points
//!
//! Metadata is produced by a [`MetadataSerializer`], which must report its size up front so
//! that the rest of `.text` can be laid out before the metadata bytes exist. [`RawMetadata`]
//! covers the common case of an already serialized blob.

use std::ops::Range;

use log::debug;

use crate::{
    headers::{Characteristics, CorFlags, DirectoryEntry, Machine, SectionCharacteristics},
    utils::to_u32,
    Error, Result,
};

use super::{
    text::TextSectionContent, BlobBuilder, ContentIdProvider, DebugDirectoryBuilder,
    ManagedTextSection, PEBuilder, PEDirectoriesBuilder, PEHeaderBuilder, PEImage, Section,
    SectionLocation, SectionProvider,
};

const TEXT_SECTION_NAME: &str = ".text";
const RESOURCE_SECTION_NAME: &str = ".rsrc";
const RELOCATION_SECTION_NAME: &str = ".reloc";

const IMAGE_REL_BASED_HIGHLOW: u16 = 3;
const RELOCATION_BLOCK_SIZE: u32 = 12;

/// Produces the metadata blob of a managed image.
///
/// The size must be known before serialization because the CLI header and everything after
/// the metadata are laid out first.
pub trait MetadataSerializer {
    /// Size of the serialized metadata; a multiple of 4
    fn size(&self) -> usize;

    /// Writes exactly [`MetadataSerializer::size`] bytes.
    ///
    /// `il_stream_rva` and `mapped_field_data_rva` are the final RVAs of the method bodies and
    /// the mapped field data, for method and field RVA columns.
    ///
    /// # Errors
    /// Implementation specific.
    fn serialize(
        &self,
        builder: &mut BlobBuilder,
        il_stream_rva: u32,
        mapped_field_data_rva: u32,
    ) -> Result<()>;
}

/// Metadata that is already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMetadata {
    data: Vec<u8>,
}

impl RawMetadata {
    /// Wraps serialized metadata
    #[must_use]
    pub fn new(data: Vec<u8>) -> RawMetadata {
        RawMetadata { data }
    }
}

impl MetadataSerializer for RawMetadata {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn serialize(&self, builder: &mut BlobBuilder, _: u32, _: u32) -> Result<()> {
        builder.write_bytes(&self.data);
        Ok(())
    }
}

/// Produces the content of the native resource section (`.rsrc`).
pub trait ResourceSectionBuilder {
    /// Writes the section content placed at `location`.
    ///
    /// # Errors
    /// Implementation specific.
    fn serialize(&self, builder: &mut BlobBuilder, location: SectionLocation) -> Result<()>;
}

impl<F> ResourceSectionBuilder for F
where
    F: Fn(&mut BlobBuilder, SectionLocation) -> Result<()>,
{
    fn serialize(&self, builder: &mut BlobBuilder, location: SectionLocation) -> Result<()> {
        self(builder, location)
    }
}

struct ManagedSections {
    machine: Machine,
    image_characteristics: Characteristics,
    image_base: u64,
    metadata: Box<dyn MetadataSerializer>,
    il_stream: Option<BlobBuilder>,
    mapped_field_data: Option<BlobBuilder>,
    managed_resources: Option<BlobBuilder>,
    native_resources: Option<Box<dyn ResourceSectionBuilder>>,
    debug_directory: Option<DebugDirectoryBuilder>,
    strong_name_signature_size: usize,
    entry_point: u32,
    flags: CorFlags,
    entry_point_address: u32,
    strong_name_signature: Option<Range<usize>>,
}

impl ManagedSections {
    fn requires_relocations(&self) -> bool {
        matches!(self.machine, Machine::I386 | Machine::Unknown)
    }

    fn serialize_text_section(
        &mut self,
        location: SectionLocation,
        directories: &mut PEDirectoriesBuilder,
    ) -> Result<BlobBuilder> {
        let Some(il_stream) = self.il_stream.take() else {
            return Err(Error::BuilderInvariant(
                "the text section was already serialized".to_string(),
            ));
        };

        let text = ManagedTextSection::new(
            self.image_characteristics,
            self.machine,
            il_stream.len(),
            self.metadata.size(),
            self.managed_resources.as_ref().map_or(0, BlobBuilder::len),
            self.strong_name_signature_size,
            self.debug_directory.as_ref().map_or(0, DebugDirectoryBuilder::size),
            self.mapped_field_data.as_ref().map_or(0, BlobBuilder::len),
        );

        let rva = location.relative_virtual_address;
        let il_stream_rva = rva + to_u32(text.offset_to_il_stream())?;
        let mapped_field_data_rva = rva + to_u32(text.offset_to_mapped_field_data_stream())?;

        let mut metadata = BlobBuilder::with_capacity(self.metadata.size());
        self.metadata
            .serialize(&mut metadata, il_stream_rva, mapped_field_data_rva)?;
        if metadata.len() != self.metadata.size() {
            return Err(Error::BuilderInvariant(format!(
                "metadata serializer wrote {} bytes but declared {}",
                metadata.len(),
                self.metadata.size()
            )));
        }

        let (debug_data, debug_table) = match &self.debug_directory {
            Some(debug_directory) => {
                let offset = to_u32(text.offset_to_debug_directory())?;
                let mut data = BlobBuilder::with_capacity(debug_directory.size());
                debug_directory.serialize(&mut data, location, offset)?;
                (
                    Some(data),
                    DirectoryEntry::new(rva + offset, to_u32(debug_directory.table_size())?),
                )
            }
            None => (None, DirectoryEntry::default()),
        };

        self.entry_point_address = text.entry_point_address(rva)?;

        let mut builder = BlobBuilder::with_capacity(text.size());
        let strong_name_signature = text.serialize(
            &mut builder,
            rva,
            self.entry_point,
            self.flags,
            self.image_base,
            TextSectionContent {
                il_stream,
                metadata,
                managed_resources: self.managed_resources.take(),
                debug_data,
                mapped_field_data: self.mapped_field_data.take(),
            },
        )?;

        let signature = strong_name_signature.range();
        let pointer = location.pointer_to_raw_data as usize;
        self.strong_name_signature = Some(pointer + signature.start..pointer + signature.end);

        directories.address_of_entry_point = self.entry_point_address;
        directories.debug_table = debug_table;
        directories.import_address_table = text.import_address_table_directory_entry(rva)?;
        directories.import_table = text.import_table_directory_entry(rva)?;
        directories.cor_header_table = text.cor_header_directory_entry(rva)?;

        Ok(builder)
    }

    fn serialize_resource_section(
        &mut self,
        location: SectionLocation,
        directories: &mut PEDirectoriesBuilder,
    ) -> Result<BlobBuilder> {
        let Some(native_resources) = &self.native_resources else {
            return Err(Error::BuilderInvariant(
                "no native resources to serialize".to_string(),
            ));
        };

        let mut builder = BlobBuilder::new();
        native_resources.serialize(&mut builder, location)?;
        directories.resource_table =
            DirectoryEntry::new(location.relative_virtual_address, to_u32(builder.len())?);
        Ok(builder)
    }

    fn serialize_relocation_section(
        &mut self,
        location: SectionLocation,
        directories: &mut PEDirectoriesBuilder,
    ) -> Result<BlobBuilder> {
        let mut builder = BlobBuilder::new();
        write_relocation_block(&mut builder, self.entry_point_address);
        directories.base_relocation_table =
            DirectoryEntry::new(location.relative_virtual_address, to_u32(builder.len())?);
        Ok(builder)
    }
}

/// One base relocation block fixing up the absolute address in the startup stub.
///
/// Only 32-bit images start through the stub, so the block holds a single `HIGHLOW` entry
/// followed by an `ABSOLUTE` pad.
fn write_relocation_block(builder: &mut BlobBuilder, entry_point_address: u32) {
    let target = entry_point_address + 2;

    builder.write_u32(target & !0xFFF);
    builder.write_u32(RELOCATION_BLOCK_SIZE);
    #[allow(clippy::cast_possible_truncation)]
    builder.write_u16((IMAGE_REL_BASED_HIGHLOW << 12) | (target & 0xFFF) as u16);
    builder.write_u16(0);
}

impl SectionProvider for ManagedSections {
    fn sections(&self) -> Vec<Section> {
        let mut sections = vec![Section::new(
            TEXT_SECTION_NAME,
            SectionCharacteristics::MEM_READ
                | SectionCharacteristics::MEM_EXECUTE
                | SectionCharacteristics::CONTAINS_CODE,
        )];

        if self.native_resources.is_some() {
            sections.push(Section::new(
                RESOURCE_SECTION_NAME,
                SectionCharacteristics::MEM_READ | SectionCharacteristics::CONTAINS_INITIALIZED_DATA,
            ));
        }

        if self.requires_relocations() {
            sections.push(Section::new(
                RELOCATION_SECTION_NAME,
                SectionCharacteristics::MEM_READ
                    | SectionCharacteristics::MEM_DISCARDABLE
                    | SectionCharacteristics::CONTAINS_INITIALIZED_DATA,
            ));
        }

        sections
    }

    fn serialize_section(
        &mut self,
        name: &str,
        location: SectionLocation,
        directories: &mut PEDirectoriesBuilder,
    ) -> Result<BlobBuilder> {
        match name {
            TEXT_SECTION_NAME => self.serialize_text_section(location, directories),
            RESOURCE_SECTION_NAME => self.serialize_resource_section(location, directories),
            RELOCATION_SECTION_NAME => self.serialize_relocation_section(location, directories),
            other => Err(Error::BuilderInvariant(format!("unknown section '{other}'"))),
        }
    }
}

/// Builds a managed image: `.text` with the CLI header, IL and metadata, optionally `.rsrc`,
/// and `.reloc` for images started through the `mscoree.dll` stub.
///
/// # Examples
///
/// ```rust
/// use dotpe::{headers::Machine, prelude::*};
///
/// let mut metadata = b"BSJB".to_vec();
/// metadata.resize(64, 0);
///
/// let image = ManagedPEBuilder::new(
///     PEHeaderBuilder::create_library_header().with_machine(Machine::Amd64),
///     RawMetadata::new(metadata),
///     BlobBuilder::new(),
/// )?
/// .deterministic()
/// .serialize()?;
///
/// let reader = PEReader::from_bytes(image.into_bytes());
/// assert_eq!(&reader.get_metadata()?.as_bytes()[..4], b"BSJB");
/// # Ok::<(), dotpe::Error>(())
/// ```
pub struct ManagedPEBuilder {
    header: PEHeaderBuilder,
    sections: ManagedSections,
    id_provider: ContentIdProvider,
}

impl ManagedPEBuilder {
    /// Strong-name signature reservation used unless configured otherwise
    pub const DEFAULT_STRONG_NAME_SIGNATURE_SIZE: usize = 128;

    /// Creates a builder for the given header, metadata and IL method bodies.
    ///
    /// # Arguments
    ///
    /// * `header` - Machine, alignments and other optional header parameters
    /// * `metadata` - Serializer for the metadata blob; its declared size must be 4-aligned
    /// * `il_stream` - Method bodies, placed at the start of the IL area of `.text`
    ///
    /// # Returns
    ///
    /// A builder with [`CorFlags::IL_ONLY`], a
    /// [default](Self::DEFAULT_STRONG_NAME_SIGNATURE_SIZE) strong-name reservation and a
    /// time-based content id. Resources, debug directory and mapped field data start empty.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if the metadata size is not a multiple of 4.
    pub fn new(
        header: PEHeaderBuilder,
        metadata: impl MetadataSerializer + 'static,
        il_stream: BlobBuilder,
    ) -> Result<ManagedPEBuilder> {
        if metadata.size() % 4 != 0 {
            return Err(invalid_argument!(
                "metadata",
                "metadata size {} is not a multiple of 4",
                metadata.size()
            ));
        }

        Ok(ManagedPEBuilder {
            sections: ManagedSections {
                machine: header.machine(),
                image_characteristics: header.image_characteristics(),
                image_base: header.image_base(),
                metadata: Box::new(metadata),
                il_stream: Some(il_stream),
                mapped_field_data: None,
                managed_resources: None,
                native_resources: None,
                debug_directory: None,
                strong_name_signature_size: Self::DEFAULT_STRONG_NAME_SIGNATURE_SIZE,
                entry_point: 0,
                flags: CorFlags::IL_ONLY,
                entry_point_address: 0,
                strong_name_signature: None,
            },
            header,
            id_provider: ContentIdProvider::TimeBased,
        })
    }

    /// Sets the data of fields with an RVA
    #[must_use]
    pub fn with_mapped_field_data(mut self, data: BlobBuilder) -> Self {
        self.sections.mapped_field_data = Some(data);
        self
    }

    /// Sets the managed resources; padded to a multiple of 4
    #[must_use]
    pub fn with_managed_resources(mut self, mut resources: BlobBuilder) -> Self {
        resources.align(4);
        self.sections.managed_resources = Some(resources);
        self
    }

    /// Adds a native resource section
    #[must_use]
    pub fn with_native_resources(mut self, resources: impl ResourceSectionBuilder + 'static) -> Self {
        self.sections.native_resources = Some(Box::new(resources));
        self
    }

    /// Adds a debug directory
    #[must_use]
    pub fn with_debug_directory(mut self, debug_directory: DebugDirectoryBuilder) -> Self {
        self.sections.debug_directory = Some(debug_directory);
        self
    }

    /// Sets the size reserved for the strong-name signature; zero reserves nothing
    #[must_use]
    pub fn with_strong_name_signature_size(mut self, size: usize) -> Self {
        self.sections.strong_name_signature_size = size;
        self
    }

    /// Sets the entry point method token, or the RVA of a native entry point
    #[must_use]
    pub fn with_entry_point(mut self, token_or_rva: u32) -> Self {
        self.sections.entry_point = token_or_rva;
        self
    }

    /// Sets the CLI header flags
    #[must_use]
    pub fn with_flags(mut self, flags: CorFlags) -> Self {
        self.sections.flags = flags;
        self
    }

    /// Derives the content id from a SHA-1 hash of the image
    #[must_use]
    pub fn deterministic(self) -> Self {
        self.with_content_id_provider(ContentIdProvider::Deterministic)
    }

    /// Sets the content id provider
    #[must_use]
    pub fn with_content_id_provider(mut self, id_provider: ContentIdProvider) -> Self {
        self.id_provider = id_provider;
        self
    }

    /// Serializes the image.
    ///
    /// # Errors
    /// Returns [`Error::BuilderInvariant`] if the metadata serializer does not honor its
    /// declared size, and propagates layout failures.
    pub fn serialize(self) -> Result<PEImage> {
        let mut builder =
            PEBuilder::new(self.header, self.sections).with_content_id_provider(self.id_provider);
        let image = builder.serialize()?;

        let signature = builder.provider().strong_name_signature.clone();
        debug!(
            "managed image: entry point 0x{:X}, signature {:?}",
            builder.provider().entry_point_address,
            signature
        );
        Ok(image.with_strong_name_signature(signature))
    }
}
