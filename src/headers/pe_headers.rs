//! Orchestrates reading all headers of an image.

use std::io::{Cursor, Read, Seek};

use goblin::pe::header::{DOS_MAGIC, PE_MAGIC, PE_POINTER_OFFSET};
use log::debug;

use super::{
    Characteristics, CoffHeader, CorHeader, DirectoryEntry, PEHeader, SectionHeader, Subsystem,
};
use crate::{file::PEBinaryReader, Result};

/// Name of the section holding CLI metadata in COFF object files
const CORMETA_SECTION: &str = ".cormeta";

/// Second word of an anonymous object header (`00 00 FF FF`)
const ANON_OBJECT_SIG2: u16 = 0xFFFF;

/// All headers of an image plus the location of its CLI metadata.
///
/// Reading walks the image in order: DOS stub (or the COFF-only marker), COFF header,
/// optional header, section table, CLI header, and finally validates the metadata range
/// against the image size. Any inconsistency fails the whole read.
///
/// # Examples
///
/// ```rust,no_run
/// use dotpe::PEHeaders;
///
/// let data = std::fs::read("app.dll")?;
/// let headers = PEHeaders::from_bytes(&data)?;
/// if let Some(start) = headers.metadata_start_offset() {
///     println!("metadata at 0x{:X}, {} bytes", start, headers.metadata_size());
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PEHeaders {
    coff_header: CoffHeader,
    pe_header: Option<PEHeader>,
    cor_header: Option<CorHeader>,
    section_headers: Vec<SectionHeader>,
    metadata_start_offset: Option<usize>,
    metadata_size: usize,
    coff_header_start_offset: usize,
    pe_header_start_offset: Option<usize>,
    cor_header_start_offset: Option<usize>,
    is_loaded_image: bool,
}

impl PEHeaders {
    /// Reads the headers of an image occupying `size` bytes from the current position of
    /// `stream`.
    ///
    /// An image starting with `00 00 FF FF` is read as a COFF-only object. Those bytes also form
    /// a negative section count, so such an input always fails as malformed.
    ///
    /// # Arguments
    ///
    /// * `stream` - Source positioned at the first byte of the image
    /// * `size` - Image length; no header may extend past it
    /// * `is_loaded_image` - Read the image as mapped by the OS loader, so directory offsets
    ///   are RVAs rather than file pointers
    ///
    /// # Returns
    ///
    /// The parsed headers, with the metadata span already validated against `size`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for structural problems and
    /// [`crate::Error::ImageTooSmall`] when a header extends past `size`.
    pub fn read<R: Read + Seek>(
        stream: &mut R,
        size: usize,
        is_loaded_image: bool,
    ) -> Result<PEHeaders> {
        let mut reader = PEBinaryReader::new(stream, size)?;

        let is_coff_only = Self::skip_dos_header(&mut reader)?;

        let coff_header_start_offset = reader.current_offset()?;
        let coff_header = CoffHeader::read(&mut reader)?;

        let (pe_header, pe_header_start_offset) = if is_coff_only {
            (None, None)
        } else {
            let start = reader.current_offset()?;
            (Some(PEHeader::read(&mut reader)?), Some(start))
        };

        let mut section_headers = Vec::with_capacity(usize::from(coff_header.number_of_sections));
        for _ in 0..coff_header.number_of_sections {
            section_headers.push(SectionHeader::read(&mut reader)?);
        }

        let mut headers = PEHeaders {
            coff_header,
            pe_header,
            cor_header: None,
            section_headers,
            metadata_start_offset: None,
            metadata_size: 0,
            coff_header_start_offset,
            pe_header_start_offset,
            cor_header_start_offset: None,
            is_loaded_image,
        };

        if let Some(cor_directory) = headers
            .pe_header
            .as_ref()
            .map(PEHeader::cor_header_table_directory)
        {
            if let Some(offset) = headers.directory_offset(&cor_directory, false)? {
                if (cor_directory.size as usize) < CorHeader::SIZE {
                    return Err(malformed_error!(
                        "CLI header directory is too small: {} bytes",
                        cor_directory.size
                    ));
                }

                reader.seek(offset)?;
                headers.cor_header = Some(CorHeader::read(&mut reader)?);
                headers.cor_header_start_offset = Some(offset);
            }
        }

        let (metadata_start_offset, metadata_size) = headers.calculate_metadata_location(size)?;
        headers.metadata_start_offset = metadata_start_offset;
        headers.metadata_size = metadata_size;

        debug!(
            "parsed {} section headers ({}), metadata at {:?} size 0x{:X}",
            headers.section_headers.len(),
            if is_coff_only { "COFF only" } else { "PE image" },
            headers.metadata_start_offset,
            headers.metadata_size
        );

        Ok(headers)
    }

    /// Reads the headers of a file image held in `data`.
    ///
    /// # Errors
    /// See [`PEHeaders::read`].
    pub fn from_bytes(data: &[u8]) -> Result<PEHeaders> {
        Self::read(&mut Cursor::new(data), data.len(), false)
    }

    /// Positions `reader` at the COFF header and reports whether the image is COFF-only.
    fn skip_dos_header<R: Read + Seek>(reader: &mut PEBinaryReader<R>) -> Result<bool> {
        let dos_signature = reader.read_u16()?;
        if dos_signature != DOS_MAGIC {
            if dos_signature == 0 && reader.read_u16()? == ANON_OBJECT_SIG2 {
                reader.seek(0)?;
                return Ok(true);
            }

            return Err(malformed_error!(
                "Unknown file format, leading signature 0x{:04X}",
                dos_signature
            ));
        }

        reader.seek(PE_POINTER_OFFSET as usize)?;
        let nt_header_offset = reader.read_i32()?;
        let Ok(nt_header_offset) = usize::try_from(nt_header_offset) else {
            return Err(malformed_error!(
                "Invalid NT header offset: {}",
                nt_header_offset
            ));
        };

        reader.seek(nt_header_offset)?;
        let pe_signature = reader.read_u32()?;
        if pe_signature != PE_MAGIC {
            return Err(malformed_error!(
                "Invalid PE signature: 0x{:08X}",
                pe_signature
            ));
        }

        Ok(false)
    }

    fn calculate_metadata_location(&self, image_size: usize) -> Result<(Option<usize>, usize)> {
        let (start, size) = if self.is_coff_only() {
            let Some(section) = self
                .section_headers
                .iter()
                .find(|section| section.name() == CORMETA_SECTION)
            else {
                return Ok((None, 0));
            };

            if self.is_loaded_image {
                (section.virtual_address as usize, section.virtual_size as usize)
            } else {
                (
                    section.pointer_to_raw_data as usize,
                    section.size_of_raw_data as usize,
                )
            }
        } else if let Some(cor_header) = &self.cor_header {
            let Some(start) = self.directory_offset(&cor_header.metadata_directory, false)? else {
                return Err(malformed_error!(
                    "Metadata directory {} is not inside any section",
                    cor_header.metadata_directory
                ));
            };
            (start, cor_header.metadata_directory.size as usize)
        } else {
            return Ok((None, 0));
        };

        let fits = image_size
            .checked_sub(size)
            .is_some_and(|last_start| start <= last_start);
        if start >= image_size || size == 0 || !fits {
            return Err(malformed_error!(
                "Invalid metadata span: start 0x{:X}, size 0x{:X}, image size 0x{:X}",
                start,
                size,
                image_size
            ));
        }

        Ok((Some(start), size))
    }

    /// Translates `directory` into an offset within the image.
    ///
    /// Returns `None` if no section contains the directory RVA. Unless `can_cross_section_boundary`
    /// is set, a directory extending past its section's virtual size is malformed.
    fn directory_offset(
        &self,
        directory: &DirectoryEntry,
        can_cross_section_boundary: bool,
    ) -> Result<Option<usize>> {
        let rva = directory.relative_virtual_address;
        let Some(index) = self.get_containing_section_index(rva) else {
            return Ok(None);
        };

        let section = &self.section_headers[index];
        let relative_offset = rva - section.virtual_address;
        if !can_cross_section_boundary && directory.size > section.virtual_size - relative_offset {
            return Err(malformed_error!(
                "Section {} is too small for directory {}",
                section.name(),
                directory
            ));
        }

        Ok(Some(if self.is_loaded_image {
            rva as usize
        } else {
            section.pointer_to_raw_data as usize + relative_offset as usize
        }))
    }

    /// Translates `directory` into an offset within the image, or `None` if no section
    /// contains its RVA.
    ///
    /// The offset is a file pointer for file images and the RVA itself for loaded images.
    #[must_use]
    pub fn try_get_directory_offset(&self, directory: &DirectoryEntry) -> Option<usize> {
        self.directory_offset(directory, true).ok().flatten()
    }

    /// Index of the section whose virtual range contains `rva`.
    #[must_use]
    pub fn get_containing_section_index(&self, rva: u32) -> Option<usize> {
        self.section_headers
            .iter()
            .position(|section| section.contains_rva(rva))
    }

    /// The COFF header
    #[must_use]
    pub fn coff_header(&self) -> &CoffHeader {
        &self.coff_header
    }

    /// The optional header; `None` for COFF-only images
    #[must_use]
    pub fn pe_header(&self) -> Option<&PEHeader> {
        self.pe_header.as_ref()
    }

    /// The CLI header; `None` for images without CLI metadata
    #[must_use]
    pub fn cor_header(&self) -> Option<&CorHeader> {
        self.cor_header.as_ref()
    }

    /// The section table in file order
    #[must_use]
    pub fn section_headers(&self) -> &[SectionHeader] {
        &self.section_headers
    }

    /// Offset of the CLI metadata within the image
    #[must_use]
    pub fn metadata_start_offset(&self) -> Option<usize> {
        self.metadata_start_offset
    }

    /// Size of the CLI metadata, zero if absent
    #[must_use]
    pub fn metadata_size(&self) -> usize {
        self.metadata_size
    }

    /// Offset of the COFF header
    #[must_use]
    pub fn coff_header_start_offset(&self) -> usize {
        self.coff_header_start_offset
    }

    /// Offset of the optional header
    #[must_use]
    pub fn pe_header_start_offset(&self) -> Option<usize> {
        self.pe_header_start_offset
    }

    /// Offset of the CLI header
    #[must_use]
    pub fn cor_header_start_offset(&self) -> Option<usize> {
        self.cor_header_start_offset
    }

    /// Returns `true` for object files without DOS stub and optional header.
    #[must_use]
    pub fn is_coff_only(&self) -> bool {
        self.pe_header.is_none()
    }

    /// Returns `true` if the image was read in its loaded layout.
    #[must_use]
    pub fn is_loaded_image(&self) -> bool {
        self.is_loaded_image
    }

    /// Returns `true` if the image is a DLL.
    #[must_use]
    pub fn is_dll(&self) -> bool {
        self.coff_header.characteristics.contains(Characteristics::DLL)
    }

    /// Returns `true` if the image is not a DLL.
    #[must_use]
    pub fn is_exe(&self) -> bool {
        !self.is_dll()
    }

    /// Returns `true` if the image targets the Windows character subsystem.
    #[must_use]
    pub fn is_console_application(&self) -> bool {
        self.pe_header
            .as_ref()
            .is_some_and(|header| header.subsystem == Subsystem::WindowsCui)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        headers::{Machine, SectionCharacteristics},
        write::{BlobBuilder, ManagedPEBuilder, PEHeaderBuilder, RawMetadata},
        Error,
    };

    fn section(name: &str, virtual_address: u32, virtual_size: u32, pointer: u32) -> SectionHeader {
        SectionHeader {
            name: name.to_string(),
            virtual_size,
            virtual_address,
            size_of_raw_data: virtual_size.next_multiple_of(0x200),
            pointer_to_raw_data: pointer,
            pointer_to_relocations: 0,
            pointer_to_line_numbers: 0,
            number_of_relocations: 0,
            number_of_line_numbers: 0,
            characteristics: SectionCharacteristics::MEM_READ,
        }
    }

    fn coff_only(sections: Vec<SectionHeader>, is_loaded_image: bool) -> PEHeaders {
        PEHeaders {
            coff_header: CoffHeader {
                machine: Machine::I386,
                number_of_sections: sections.len() as u16,
                time_date_stamp: 0,
                pointer_to_symbol_table: 0,
                number_of_symbols: 0,
                size_of_optional_header: 0,
                characteristics: Characteristics::empty(),
            },
            pe_header: None,
            cor_header: None,
            section_headers: sections,
            metadata_start_offset: None,
            metadata_size: 0,
            coff_header_start_offset: 0,
            pe_header_start_offset: None,
            cor_header_start_offset: None,
            is_loaded_image,
        }
    }

    fn dos_reader(data: &[u8]) -> PEBinaryReader<Cursor<&[u8]>> {
        PEBinaryReader::new(Cursor::new(data), data.len()).unwrap()
    }

    #[test]
    fn skip_dos_header_mz() {
        let mut data = vec![0u8; 0x90];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3C] = 0x80;
        data[0x80..0x84].copy_from_slice(b"PE\0\0");

        let mut reader = dos_reader(&data);
        assert!(!PEHeaders::skip_dos_header(&mut reader).unwrap());
        assert_eq!(reader.current_offset().unwrap(), 0x84);
    }

    #[test]
    fn skip_dos_header_bad_pe_signature() {
        let mut data = vec![0u8; 0x90];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3C] = 0x80;
        data[0x80..0x84].copy_from_slice(b"NE\0\0");

        let mut reader = dos_reader(&data);
        assert!(matches!(
            PEHeaders::skip_dos_header(&mut reader),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn skip_dos_header_nt_offset_outside_image() {
        let mut data = vec![0u8; 0x40];
        data[0] = b'M';
        data[1] = b'Z';
        data[0x3C] = 0xF0;

        let mut reader = dos_reader(&data);
        assert!(matches!(
            PEHeaders::skip_dos_header(&mut reader),
            Err(Error::ImageTooSmall)
        ));

        data[0x3F] = 0x80;
        let mut reader = dos_reader(&data);
        assert!(matches!(
            PEHeaders::skip_dos_header(&mut reader),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn skip_dos_header_coff_only() {
        let data = [0x00, 0x00, 0xFF, 0xFF, 0x01, 0x00, 0x00, 0x00];
        let mut reader = dos_reader(&data);
        assert!(PEHeaders::skip_dos_header(&mut reader).unwrap());
        assert_eq!(reader.current_offset().unwrap(), 0);
    }

    #[test]
    fn skip_dos_header_unknown() {
        for data in [[0x4C, 0x01, 0x00, 0x00], [0x00, 0x00, 0x00, 0x00], [0x5A, 0x4D, 0, 0]] {
            let mut reader = dos_reader(&data);
            assert!(matches!(
                PEHeaders::skip_dos_header(&mut reader),
                Err(Error::Malformed { .. })
            ));
        }
    }

    #[test]
    fn anonymous_object_fails_on_section_count() {
        let mut data = vec![0u8; 64];
        data[2] = 0xFF;
        data[3] = 0xFF;
        assert!(matches!(
            PEHeaders::from_bytes(&data),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn cormeta_location() {
        let headers = coff_only(
            vec![
                section(".text", 0x1000, 0x80, 0x200),
                section(".cormeta", 0x2000, 0x100, 0x400),
            ],
            false,
        );
        assert_eq!(
            headers.calculate_metadata_location(0x800).unwrap(),
            (Some(0x400), 0x200)
        );

        let loaded = coff_only(headers.section_headers.clone(), true);
        assert_eq!(
            loaded.calculate_metadata_location(0x4000).unwrap(),
            (Some(0x2000), 0x100)
        );

        assert!(matches!(
            headers.calculate_metadata_location(0x500),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn cormeta_size_exceeds_image() {
        let headers = coff_only(vec![section(".cormeta", 0x2000, 0x1000, 0x200)], false);
        assert!(matches!(
            headers.calculate_metadata_location(0x400),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn metadata_directory_larger_than_image() {
        let image = ManagedPEBuilder::new(
            PEHeaderBuilder::create_library_header().with_machine(Machine::Amd64),
            RawMetadata::new(b"BSJB".repeat(8)),
            BlobBuilder::from_bytes(vec![0x2A; 6]),
        )
        .unwrap()
        .deterministic()
        .serialize()
        .unwrap();
        let mut data = image.as_bytes().to_vec();

        let headers = PEHeaders::from_bytes(&data).unwrap();
        let text_index = headers
            .section_headers()
            .iter()
            .position(|section| section.name() == ".text")
            .unwrap();
        let section_table = headers.pe_header_start_offset().unwrap()
            + usize::from(headers.coff_header().size_of_optional_header);
        let virtual_size = section_table + text_index * SectionHeader::SIZE + 8;
        data[virtual_size..virtual_size + 4].copy_from_slice(&0x0100_0000u32.to_le_bytes());

        let metadata_size = headers.cor_header_start_offset().unwrap() + 12;
        data[metadata_size..metadata_size + 4].copy_from_slice(&0x0010_0000u32.to_le_bytes());

        assert!(data.len() < 0x0010_0000);
        assert!(matches!(
            PEHeaders::from_bytes(&data),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn cormeta_absent() {
        let headers = coff_only(vec![section(".text", 0x1000, 0x80, 0x200)], false);
        assert_eq!(headers.calculate_metadata_location(0x800).unwrap(), (None, 0));
    }

    #[test]
    fn directory_offsets() {
        let headers = coff_only(
            vec![
                section(".text", 0x2000, 0x300, 0x200),
                section(".rsrc", 0x4000, 0x100, 0x600),
            ],
            false,
        );

        assert_eq!(headers.get_containing_section_index(0x2000), Some(0));
        assert_eq!(headers.get_containing_section_index(0x22FF), Some(0));
        assert_eq!(headers.get_containing_section_index(0x2300), None);
        assert_eq!(headers.get_containing_section_index(0x4010), Some(1));
        assert_eq!(headers.get_containing_section_index(0x1000), None);

        let inside = DirectoryEntry::new(0x2010, 0x20);
        assert_eq!(headers.try_get_directory_offset(&inside), Some(0x210));
        assert_eq!(headers.directory_offset(&inside, false).unwrap(), Some(0x210));

        let crossing = DirectoryEntry::new(0x22F0, 0x20);
        assert_eq!(headers.try_get_directory_offset(&crossing), Some(0x4F0));
        assert!(matches!(
            headers.directory_offset(&crossing, false),
            Err(Error::Malformed { .. })
        ));

        let outside = DirectoryEntry::new(0x3000, 0x10);
        assert_eq!(headers.try_get_directory_offset(&outside), None);

        let loaded = coff_only(headers.section_headers.clone(), true);
        assert_eq!(loaded.try_get_directory_offset(&inside), Some(0x2010));
    }
}
