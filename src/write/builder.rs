//! Generic image builder.
//!
//! [`PEBuilder`] asks a [`SectionProvider`] for the sections of the image, serializes them one
//! after another at aligned locations, and only then emits the headers, because the header
//! fields (sizes, directories, entry point) depend on the serialized sections.

use std::fmt;

use log::{debug, warn};

use crate::{
    headers::{Machine, PEMagic, SectionCharacteristics, SectionHeader},
    utils::{align_up, to_u32},
    Error, Result,
};

use super::{
    BlobBuilder, ContentIdProvider, PEDirectoriesBuilder, PEHeaderBuilder, PEImage,
    SectionLocation,
};

/// DOS header and stub program; offset 0x3C points at the PE signature right after it.
#[rustfmt::skip]
const DOS_HEADER: [u8; 128] = [
    0x4d, 0x5a, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0xff, 0xff, 0x00, 0x00,
    0xb8, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x00, 0x00, 0x00,
    0x0e, 0x1f, 0xba, 0x0e, 0x00, 0xb4, 0x09, 0xcd, 0x21, 0xb8, 0x01, 0x4c, 0xcd, 0x21, 0x54, 0x68,
    0x69, 0x73, 0x20, 0x70, 0x72, 0x6f, 0x67, 0x72, 0x61, 0x6d, 0x20, 0x63, 0x61, 0x6e, 0x6e, 0x6f,
    0x74, 0x20, 0x62, 0x65, 0x20, 0x72, 0x75, 0x6e, 0x20, 0x69, 0x6e, 0x20, 0x44, 0x4f, 0x53, 0x20,
    0x6d, 0x6f, 0x64, 0x65, 0x2e, 0x0d, 0x0d, 0x0a, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const PE_SIGNATURE: [u8; 4] = *b"PE\0\0";

/// Name and characteristics of a section to be emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    characteristics: SectionCharacteristics,
}

impl Section {
    /// Creates a section descriptor. Names longer than 8 bytes are truncated when written.
    #[must_use]
    pub fn new(name: impl Into<String>, characteristics: SectionCharacteristics) -> Section {
        let name = name.into();
        if name.len() > SectionHeader::NAME_SIZE {
            warn!(
                "section name '{}' is longer than {} bytes and will be truncated",
                name,
                SectionHeader::NAME_SIZE
            );
        }
        Section {
            name,
            characteristics,
        }
    }

    /// Section name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Section characteristics
    #[must_use]
    pub fn characteristics(&self) -> SectionCharacteristics {
        self.characteristics
    }
}

/// Source of the sections of an image.
///
/// [`PEBuilder::serialize`] calls [`SectionProvider::sections`] once, then
/// [`SectionProvider::serialize_section`] once per section in the declared order. Serializers
/// record the directory entries of the structures they emit in `directories`.
pub trait SectionProvider {
    /// Sections of the image, in file order. Must not be empty.
    fn sections(&self) -> Vec<Section>;

    /// Serializes the section `name` placed at `location`.
    ///
    /// # Errors
    /// Implementations fail with [`Error::BuilderInvariant`] for names they did not declare.
    fn serialize_section(
        &mut self,
        name: &str,
        location: SectionLocation,
        directories: &mut PEDirectoriesBuilder,
    ) -> Result<BlobBuilder>;
}

type SectionSerializer =
    Box<dyn FnMut(SectionLocation, &mut PEDirectoriesBuilder) -> Result<BlobBuilder>>;

/// A [`SectionProvider`] built from `(section, serializer)` pairs.
///
/// # Examples
///
/// ```rust
/// use dotpe::{headers::SectionCharacteristics, write::SectionList, BlobBuilder};
///
/// let sections = SectionList::new().with_section(
///     ".data",
///     SectionCharacteristics::CONTAINS_INITIALIZED_DATA | SectionCharacteristics::MEM_READ,
///     |_location, _directories| Ok(BlobBuilder::from_bytes(vec![1, 2, 3])),
/// );
/// assert_eq!(sections.len(), 1);
/// ```
#[derive(Default)]
pub struct SectionList {
    entries: Vec<(Section, SectionSerializer)>,
}

impl fmt::Debug for SectionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(section, _)| section))
            .finish()
    }
}

impl SectionList {
    /// Creates an empty list
    #[must_use]
    pub fn new() -> SectionList {
        Self::default()
    }

    /// Appends a section and its serializer
    pub fn add<F>(&mut self, name: &str, characteristics: SectionCharacteristics, serializer: F)
    where
        F: FnMut(SectionLocation, &mut PEDirectoriesBuilder) -> Result<BlobBuilder> + 'static,
    {
        self.entries
            .push((Section::new(name, characteristics), Box::new(serializer)));
    }

    /// Appends a section and its serializer, builder style
    #[must_use]
    pub fn with_section<F>(
        mut self,
        name: &str,
        characteristics: SectionCharacteristics,
        serializer: F,
    ) -> Self
    where
        F: FnMut(SectionLocation, &mut PEDirectoriesBuilder) -> Result<BlobBuilder> + 'static,
    {
        self.add(name, characteristics, serializer);
        self
    }

    /// Number of sections
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no section was added
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SectionProvider for SectionList {
    fn sections(&self) -> Vec<Section> {
        self.entries
            .iter()
            .map(|(section, _)| section.clone())
            .collect()
    }

    fn serialize_section(
        &mut self,
        name: &str,
        location: SectionLocation,
        directories: &mut PEDirectoriesBuilder,
    ) -> Result<BlobBuilder> {
        let Some((_, serializer)) = self
            .entries
            .iter_mut()
            .find(|(section, _)| section.name == name)
        else {
            return Err(Error::BuilderInvariant(format!(
                "no serializer for section '{name}'"
            )));
        };
        serializer(location, directories)
    }
}

struct SerializedSection {
    section: Section,
    content: BlobBuilder,
    location: SectionLocation,
    virtual_size: u32,
    size_of_raw_data: u32,
}

/// Writes a PE image from a header description and a [`SectionProvider`].
///
/// A builder serializes once; a second [`PEBuilder::serialize`] call fails with
/// [`Error::InvalidOperation`].
pub struct PEBuilder<P> {
    header: PEHeaderBuilder,
    provider: P,
    directories: PEDirectoriesBuilder,
    id_provider: ContentIdProvider,
    serialized: bool,
}

impl<P: SectionProvider> PEBuilder<P> {
    /// Creates a builder with a time-based content id
    pub fn new(header: PEHeaderBuilder, provider: P) -> Self {
        PEBuilder {
            header,
            provider,
            directories: PEDirectoriesBuilder::default(),
            id_provider: ContentIdProvider::TimeBased,
            serialized: false,
        }
    }

    /// Derives the content id from a hash of the image
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

    /// Returns `true` if the same input always produces the same image
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.id_provider.is_deterministic()
    }

    /// Header parameters
    #[must_use]
    pub fn header(&self) -> &PEHeaderBuilder {
        &self.header
    }

    /// The section provider
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Directory entries recorded by the section serializers
    #[must_use]
    pub fn directories(&self) -> &PEDirectoriesBuilder {
        &self.directories
    }

    /// Serializes the image.
    ///
    /// Sections are laid out first, in provider order, starting at the first section-aligned
    /// address past the headers. The DOS stub, COFF header, optional header and section table
    /// are emitted afterwards, and the checksum and time stamp fields are patched last once the
    /// content id is known.
    ///
    /// # Returns
    ///
    /// The serialized [`PEImage`], with a zero checksum. Use [`PEImage::update_checksum`] or
    /// [`PEImage::sign`] to fill it in.
    ///
    /// # Errors
    /// Returns [`Error::BuilderInvariant`] if the provider declares no sections,
    /// [`Error::InvalidOperation`] on a second call, and propagates serializer failures.
    pub fn serialize(&mut self) -> Result<PEImage> {
        if self.serialized {
            return Err(Error::InvalidOperation(
                "the image has already been serialized".to_string(),
            ));
        }
        self.serialized = true;

        let sections = self.serialize_sections()?;
        let file_alignment = self.header.file_alignment() as usize;
        let size_of_headers = align_up(self.header.size_of_pe_headers(sections.len()), file_alignment);

        let mut image = BlobBuilder::with_capacity(
            size_of_headers
                + sections
                    .iter()
                    .map(|section| section.size_of_raw_data as usize)
                    .sum::<usize>(),
        );

        image.write_bytes(&DOS_HEADER);
        image.write_bytes(&PE_SIGNATURE);
        let stamp = self.write_coff_header(&mut image, &sections)?;
        let (checksum, certificate_directory_offset) =
            self.write_pe_header(&mut image, &sections, size_of_headers)?;
        Self::write_section_headers(&mut image, &sections);
        image.pad_to(size_of_headers);

        for section in sections {
            if image.len() != section.location.pointer_to_raw_data as usize {
                return Err(Error::BuilderInvariant(format!(
                    "section '{}' expected at 0x{:X} but the image is 0x{:X} bytes",
                    section.section.name,
                    section.location.pointer_to_raw_data,
                    image.len()
                )));
            }
            image.link_suffix(section.content);
            image.align(file_alignment);
        }

        let checksum_offset = checksum.offset();
        image.patch(checksum, &0u32.to_le_bytes())?;

        let content_id = self.id_provider.provide(image.as_bytes());
        image.patch(stamp, &content_id.stamp.to_le_bytes())?;
        debug!(
            "serialized image of {} bytes, content id {}",
            image.len(),
            content_id
        );

        Ok(PEImage::new(
            image.into_bytes(),
            content_id,
            checksum_offset,
            certificate_directory_offset,
        ))
    }

    fn serialize_sections(&mut self) -> Result<Vec<SerializedSection>> {
        let sections = self.provider.sections();
        if sections.is_empty() {
            return Err(Error::BuilderInvariant(
                "the section provider returned no sections".to_string(),
            ));
        }

        let section_alignment = self.header.section_alignment() as usize;
        let file_alignment = self.header.file_alignment() as usize;
        let size_of_headers = self.header.size_of_pe_headers(sections.len());

        let mut next_rva = align_up(size_of_headers, section_alignment);
        let mut next_pointer = align_up(size_of_headers, file_alignment);
        let mut serialized = Vec::with_capacity(sections.len());

        for section in sections {
            let location = SectionLocation::new(to_u32(next_rva)?, to_u32(next_pointer)?);
            let content =
                self.provider
                    .serialize_section(section.name(), location, &mut self.directories)?;

            let virtual_size = content.len();
            let size_of_raw_data = align_up(virtual_size, file_alignment);
            debug!(
                "section {:<8} rva=0x{:08X} pointer=0x{:08X} raw=0x{:X}",
                section.name(),
                location.relative_virtual_address,
                location.pointer_to_raw_data,
                size_of_raw_data
            );

            next_rva = align_up(next_rva + virtual_size, section_alignment);
            next_pointer += size_of_raw_data;

            serialized.push(SerializedSection {
                section,
                content,
                location,
                virtual_size: to_u32(virtual_size)?,
                size_of_raw_data: to_u32(size_of_raw_data)?,
            });
        }

        Ok(serialized)
    }

    fn write_coff_header(
        &self,
        image: &mut BlobBuilder,
        sections: &[SerializedSection],
    ) -> Result<super::Fixup> {
        let machine = match self.header.machine() {
            Machine::Unknown => Machine::I386,
            machine => machine,
        };
        let number_of_sections = sections
            .iter()
            .filter(|section| section.virtual_size > 0)
            .count();

        image.write_u16(u16::from(machine));
        image.write_u16(u16::try_from(number_of_sections).map_err(|_| {
            Error::BuilderInvariant(format!("{number_of_sections} sections exceed the COFF limit"))
        })?);
        let stamp = image.reserve(4);
        // symbol table pointer and count
        image.write_u32(0);
        image.write_u32(0);
        image.write_u16(if self.header.is_32_bit() {
            PEMagic::Pe32.header_size() as u16
        } else {
            PEMagic::Pe32Plus.header_size() as u16
        });
        image.write_u16(self.header.image_characteristics().bits());
        Ok(stamp)
    }

    fn write_pe_header(
        &self,
        image: &mut BlobBuilder,
        sections: &[SerializedSection],
        size_of_headers: usize,
    ) -> Result<(super::Fixup, usize)> {
        let header = &self.header;
        let is_32_bit = header.is_32_bit();

        let sum_raw_data = |flag: SectionCharacteristics| -> u32 {
            sections
                .iter()
                .filter(|section| section.section.characteristics.contains(flag))
                .map(|section| section.size_of_raw_data)
                .sum()
        };
        let first_rva = |flag: SectionCharacteristics| -> u32 {
            sections
                .iter()
                .find(|section| section.section.characteristics.contains(flag))
                .map_or(0, |section| section.location.relative_virtual_address)
        };

        let magic = if is_32_bit {
            PEMagic::Pe32
        } else {
            PEMagic::Pe32Plus
        };
        let (major_linker, minor_linker) = header.linker_version();

        image.write_u16(magic.value());
        image.write_u8(major_linker);
        image.write_u8(minor_linker);
        image.write_u32(sum_raw_data(SectionCharacteristics::CONTAINS_CODE));
        image.write_u32(sum_raw_data(SectionCharacteristics::CONTAINS_INITIALIZED_DATA));
        image.write_u32(sum_raw_data(SectionCharacteristics::CONTAINS_UNINITIALIZED_DATA));
        image.write_u32(self.directories.address_of_entry_point);
        image.write_u32(first_rva(SectionCharacteristics::CONTAINS_CODE));

        if is_32_bit {
            image.write_u32(first_rva(SectionCharacteristics::CONTAINS_INITIALIZED_DATA));
            image.write_u32(narrow("image_base", header.image_base())?);
        } else {
            image.write_u64(header.image_base());
        }

        let (major_os, minor_os) = header.operating_system_version();
        let (major_image, minor_image) = header.image_version();
        let (major_subsystem, minor_subsystem) = header.subsystem_version();

        image.write_u32(header.section_alignment());
        image.write_u32(header.file_alignment());
        image.write_u16(major_os);
        image.write_u16(minor_os);
        image.write_u16(major_image);
        image.write_u16(minor_image);
        image.write_u16(major_subsystem);
        image.write_u16(minor_subsystem);
        // Win32VersionValue
        image.write_u32(0);

        let size_of_image = sections.last().map_or(0, |last| {
            align_up(
                (last.location.relative_virtual_address + last.virtual_size) as usize,
                header.section_alignment() as usize,
            )
        });
        image.write_u32(to_u32(size_of_image)?);
        image.write_u32(to_u32(size_of_headers)?);

        let checksum = image.reserve(4);
        image.write_u16(u16::from(header.subsystem()));
        image.write_u16(header.dll_characteristics().bits());

        let (stack_reserve, stack_commit) = header.stack();
        let (heap_reserve, heap_commit) = header.heap();
        if is_32_bit {
            image.write_u32(narrow("size_of_stack_reserve", stack_reserve)?);
            image.write_u32(narrow("size_of_stack_commit", stack_commit)?);
            image.write_u32(narrow("size_of_heap_reserve", heap_reserve)?);
            image.write_u32(narrow("size_of_heap_commit", heap_commit)?);
        } else {
            image.write_u64(stack_reserve);
            image.write_u64(stack_commit);
            image.write_u64(heap_reserve);
            image.write_u64(heap_commit);
        }

        // LoaderFlags, NumberOfRvaAndSizes
        image.write_u32(0);
        image.write_u32(16);

        let directories_offset = image.len();
        for entry in self.directories.entries() {
            image.write_u32(entry.relative_virtual_address);
            image.write_u32(entry.size);
        }

        let certificate_directory_offset =
            directories_offset + crate::headers::DirectoryKind::Certificate.index() * 8;
        Ok((checksum, certificate_directory_offset))
    }

    fn write_section_headers(image: &mut BlobBuilder, sections: &[SerializedSection]) {
        for section in sections.iter().filter(|section| section.virtual_size > 0) {
            let mut name = [0u8; SectionHeader::NAME_SIZE];
            let bytes = section.section.name.as_bytes();
            let len = bytes.len().min(SectionHeader::NAME_SIZE);
            name[..len].copy_from_slice(&bytes[..len]);

            image.write_bytes(&name);
            image.write_u32(section.virtual_size);
            image.write_u32(section.location.relative_virtual_address);
            image.write_u32(section.size_of_raw_data);
            image.write_u32(section.location.pointer_to_raw_data);
            // relocations and line numbers are object-file only
            image.write_u32(0);
            image.write_u32(0);
            image.write_u16(0);
            image.write_u16(0);
            image.write_u32(section.section.characteristics.bits());
        }
    }
}

fn narrow(name: &'static str, value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        invalid_argument!(
            name,
            "0x{:X} does not fit the 32-bit field of a PE32 header",
            value
        )
    })
}
