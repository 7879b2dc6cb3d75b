//! Integration tests that build managed images with the writer and read them back.
//!
//! Every test constructs its image in memory, so the suite needs no sample files. The images
//! are also fed to `goblin` as an independent PE parser to catch layout mistakes that a
//! reader sharing code with the writer would not notice.

use std::io::{Cursor, Seek, SeekFrom, Write};

use dotpe::{prelude::*, write::ContentIdProvider};
use sha1::{Digest, Sha1};

/// Metadata blob with a valid signature and a recognizable body.
fn metadata() -> Vec<u8> {
    let mut metadata = b"BSJB".to_vec();
    metadata.extend((0..252u32).map(|i| (i % 251) as u8));
    metadata
}

fn il_stream() -> BlobBuilder {
    // tiny method header followed by `ret`
    BlobBuilder::from_bytes(vec![0x06, 0x2A, 0x16, 0x2A, 0x2A])
}

fn managed_builder(machine: Machine) -> ManagedPEBuilder {
    let mut debug = DebugDirectoryBuilder::new();
    debug.add_reproducible_entry();
    debug
        .add_entry(DebugDirectoryEntryType::EmbeddedPortablePdb, 0x0100, 0x0100, 0, |builder| {
            builder.write_bytes(b"MPDB");
            builder.write_u32(0);
            Ok(())
        })
        .unwrap();

    ManagedPEBuilder::new(
        PEHeaderBuilder::create_library_header().with_machine(machine),
        RawMetadata::new(metadata()),
        il_stream(),
    )
    .unwrap()
    .with_debug_directory(debug)
    .with_mapped_field_data(BlobBuilder::from_bytes(vec![0xFE; 12]))
    .with_entry_point(0x0600_0001)
    .deterministic()
}

#[test]
fn metadata_round_trip() {
    for machine in [Machine::I386, Machine::Amd64, Machine::Arm64] {
        let image = managed_builder(machine).serialize().unwrap();
        let reader = PEReader::from_bytes(image.as_bytes().to_vec());

        let headers = reader.pe_headers().unwrap();
        let cor = headers.cor_header().unwrap();
        let offset = headers
            .try_get_directory_offset(&cor.metadata_directory)
            .unwrap();
        assert_eq!(headers.metadata_start_offset(), Some(offset));
        assert_eq!(headers.metadata_size(), metadata().len());

        assert!(reader.has_metadata().unwrap());
        assert_eq!(reader.get_metadata().unwrap().as_bytes(), metadata().as_slice());
        assert_eq!(&image.as_bytes()[offset..offset + metadata().len()], metadata().as_slice());

        assert_eq!(headers.pe_header().unwrap().magic() == PEMagic::Pe32Plus, machine.is_64_bit());
    }
}

#[test]
fn il_and_mapped_field_data_placement() {
    let image = managed_builder(Machine::Amd64).serialize().unwrap();
    let reader = PEReader::from_bytes(image.into_bytes());
    let headers = reader.pe_headers().unwrap();
    let text = &headers.section_headers()[0];
    let cor_rva = headers.pe_header().unwrap().cor_header_table_directory().relative_virtual_address;

    // IL directly follows the CLI header
    let il = reader.get_section_data(cor_rva + 72).unwrap();
    assert_eq!(&il.as_bytes()[..5], &[0x06, 0x2A, 0x16, 0x2A, 0x2A]);
    assert_eq!(&il.as_bytes()[5..8], &[0, 0, 0]);

    // mapped field data is the 8-aligned tail of the section
    let section = reader.get_section_data_by_name(".text").unwrap().unwrap();
    let tail = &section.as_bytes()[section.len() - 12..];
    assert_eq!(tail, &[0xFE; 12]);
    assert_eq!((text.virtual_size as usize - 12) % 8, 0);
}

#[test]
fn debug_directory_round_trip() {
    let image = managed_builder(Machine::I386).serialize().unwrap();
    let reader = PEReader::from_bytes(image.into_bytes());

    let entries = reader.read_debug_directory().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].entry_type, DebugDirectoryEntryType::Reproducible);
    assert_eq!(entries[0].data_size, 0);
    assert_eq!(entries[1].entry_type, DebugDirectoryEntryType::EmbeddedPortablePdb);
    assert_eq!(entries[1].major_version, 0x0100);

    let data = reader.read_debug_directory_entry_data(&entries[1]).unwrap();
    assert_eq!(data, b"MPDB\0\0\0\0");
}

#[test]
fn deterministic_output_is_stable() {
    let first = managed_builder(Machine::Amd64).serialize().unwrap();
    let second = managed_builder(Machine::Amd64).serialize().unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
    assert_eq!(first.content_id(), second.content_id());

    let headers = PEHeaders::from_bytes(first.as_bytes()).unwrap();
    assert_eq!(headers.coff_header().time_date_stamp, first.content_id().stamp);
    assert_ne!(first.content_id().stamp & 0x8000_0000, 0);
}

#[test]
fn custom_content_id_provider() {
    let image = managed_builder(Machine::Amd64)
        .with_content_id_provider(ContentIdProvider::Custom(Box::new(|content: &[u8]| {
            ContentId::new(uguid::Guid::ZERO, content.len() as u32)
        })))
        .serialize()
        .unwrap();

    let headers = PEHeaders::from_bytes(image.as_bytes()).unwrap();
    assert_eq!(headers.coff_header().time_date_stamp, image.len() as u32);
}

#[test]
fn sign_and_checksum() {
    let mut image = managed_builder(Machine::I386)
        .with_flags(CorFlags::IL_ONLY | CorFlags::STRONG_NAME_SIGNED)
        .serialize()
        .unwrap();
    let range = image.strong_name_signature_range().unwrap();
    assert_eq!(range.len(), ManagedPEBuilder::DEFAULT_STRONG_NAME_SIGNATURE_SIZE);
    assert!(image.as_bytes()[range.clone()].iter().all(|&b| b == 0));

    let unsigned = image.as_bytes().to_vec();
    image
        .sign(|parts| {
            let mut hasher = Sha1::new();
            for part in parts {
                hasher.update(part);
            }
            hasher.finalize().to_vec()
        })
        .unwrap();

    let signed = image.as_bytes();
    assert_ne!(&signed[range.start..range.start + 20], &[0u8; 20]);
    assert!(signed[range.start + 20..range.end].iter().all(|&b| b == 0));

    let headers = PEHeaders::from_bytes(signed).unwrap();
    assert_eq!(headers.pe_header().unwrap().check_sum, image.checksum().unwrap());
    assert_eq!(image.checksum().unwrap(), image.calculate_checksum());
    assert_ne!(image.checksum().unwrap(), 0);

    // signing touches only the signature and checksum
    let checksum_offset = 0x80 + 4 + 20 + 64;
    for (offset, (a, b)) in unsigned.iter().zip(signed).enumerate() {
        if a != b {
            assert!(
                range.contains(&offset) || (checksum_offset..checksum_offset + 4).contains(&offset),
                "unexpected change at 0x{offset:X}"
            );
        }
    }
}

#[test]
fn checksum_without_signature() {
    let mut image = managed_builder(Machine::Amd64)
        .with_strong_name_signature_size(0)
        .serialize()
        .unwrap();
    assert_eq!(image.checksum().unwrap(), 0);
    assert!(image.sign(|_| vec![1]).is_err());

    image.update_checksum().unwrap();
    let expected = image.calculate_checksum();
    assert_eq!(image.checksum().unwrap(), expected);

    // the checksum field itself does not contribute
    image.update_checksum().unwrap();
    assert_eq!(image.checksum().unwrap(), expected);
}

#[test]
fn write_to_file_and_map() {
    let image = managed_builder(Machine::I386).serialize().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("library.dll");
    image.write_to_file(&path).unwrap();

    assert_eq!(std::fs::read(&path).unwrap(), image.as_bytes());

    let reader = PEReader::from_file(&path).unwrap();
    assert_eq!(reader.get_metadata().unwrap().as_bytes(), metadata().as_slice());
    assert!(reader.pe_headers().unwrap().is_dll());
}

/// Image preceded by unrelated bytes, to exercise stream windows that do not start at 0.
fn embedded_stream(image: &[u8]) -> Cursor<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    cursor.write_all(&[0xAA; 100]).unwrap();
    cursor.write_all(image).unwrap();
    cursor.write_all(&[0xBB; 50]).unwrap();
    cursor.seek(SeekFrom::Start(100)).unwrap();
    cursor
}

#[test]
fn stream_deferred() {
    let image = managed_builder(Machine::I386).serialize().unwrap();
    let reader = PEReader::from_stream(
        embedded_stream(image.as_bytes()),
        PEStreamOptions::empty(),
        Some(image.len()),
    )
    .unwrap();

    assert!(reader.is_entire_image_available());
    assert_eq!(reader.get_metadata().unwrap().as_bytes(), metadata().as_slice());
    assert_eq!(reader.get_entire_image().unwrap().as_bytes(), image.as_bytes());
    assert!(reader.get_section_data_by_name(".reloc").unwrap().is_some());
}

#[test]
fn stream_prefetch_metadata() {
    let image = managed_builder(Machine::I386).serialize().unwrap();
    let reader = PEReader::from_stream(
        embedded_stream(image.as_bytes()),
        PEStreamOptions::PREFETCH_METADATA,
        Some(image.len()),
    )
    .unwrap();

    assert!(!reader.is_entire_image_available());
    assert_eq!(reader.pe_headers().unwrap().section_headers().len(), 2);
    assert_eq!(reader.get_metadata().unwrap().as_bytes(), metadata().as_slice());
    assert!(matches!(reader.get_entire_image(), Err(Error::ImageNotAvailable)));
    assert!(matches!(
        reader.get_section_data_by_name(".text"),
        Err(Error::ImageNotAvailable)
    ));
}

#[test]
fn stream_prefetch_entire_image() {
    let image = managed_builder(Machine::Amd64).serialize().unwrap();
    let reader = PEReader::from_stream(
        Cursor::new(image.as_bytes().to_vec()),
        PEStreamOptions::PREFETCH_ENTIRE_IMAGE | PEStreamOptions::PREFETCH_METADATA,
        None,
    )
    .unwrap();

    assert!(reader.is_entire_image_available());
    assert_eq!(reader.get_entire_image().unwrap().len(), image.len());
    assert_eq!(reader.get_metadata().unwrap().as_bytes(), metadata().as_slice());
}

#[test]
fn stream_size_too_large() {
    let image = managed_builder(Machine::Amd64).serialize().unwrap();
    let result = PEReader::from_stream(
        Cursor::new(image.as_bytes().to_vec()),
        PEStreamOptions::empty(),
        Some(image.len() + 1),
    );
    assert!(matches!(
        result,
        Err(Error::InvalidArgument { name: "size", .. })
    ));
}

#[test]
fn goblin_parses_pe32_plus_image() {
    let image = managed_builder(Machine::Amd64).serialize().unwrap();
    let pe = goblin::pe::PE::parse(image.as_bytes()).unwrap();

    assert!(pe.is_64);
    assert!(pe.is_lib);
    assert_eq!(pe.header.coff_header.machine, goblin::pe::header::COFF_MACHINE_X86_64);
    assert_eq!(pe.sections.len(), 1);
    assert_eq!(pe.sections[0].name().unwrap(), ".text");

    let headers = PEHeaders::from_bytes(image.as_bytes()).unwrap();
    let text = &headers.section_headers()[0];
    assert_eq!(pe.sections[0].virtual_address, text.virtual_address);
    assert_eq!(pe.sections[0].pointer_to_raw_data, text.pointer_to_raw_data);
    assert_eq!(pe.sections[0].size_of_raw_data, text.size_of_raw_data);

    let optional = pe.header.optional_header.unwrap();
    let pe_header = headers.pe_header().unwrap();
    assert_eq!(optional.windows_fields.image_base, pe_header.image_base());
    assert_eq!(optional.windows_fields.size_of_image, pe_header.size_of_image);
    assert_eq!(optional.windows_fields.size_of_headers, pe_header.size_of_headers);

    let clr = optional.data_directories.get_clr_runtime_header().unwrap();
    assert_eq!(clr.virtual_address, text.virtual_address);
    assert_eq!(clr.size, 72);
}

#[test]
fn goblin_parses_pe32_image_imports() {
    let image = ManagedPEBuilder::new(
        PEHeaderBuilder::create_executable_header().with_machine(Machine::I386),
        RawMetadata::new(metadata()),
        il_stream(),
    )
    .unwrap()
    .deterministic()
    .serialize()
    .unwrap();
    let pe = goblin::pe::PE::parse(image.as_bytes()).unwrap();

    assert!(!pe.is_64);
    assert!(!pe.is_lib);
    assert_eq!(pe.libraries, ["mscoree.dll"]);
    assert_eq!(pe.imports.len(), 1);
    assert_eq!(pe.imports[0].name, "_CorExeMain");

    let headers = PEHeaders::from_bytes(image.as_bytes()).unwrap();
    assert_eq!(
        pe.entry as u64,
        u64::from(headers.pe_header().unwrap().address_of_entry_point)
    );
}
