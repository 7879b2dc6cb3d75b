//! The [`PEReader`] façade.
//!
//! A reader owns the bytes of one image and materializes [`PEHeaders`], the metadata block
//! and section blocks on first access. Each is computed at most once per reader and cached;
//! the computations are pure functions of the image bytes, so concurrent first accesses may
//! race harmlessly and the first stored result wins.
//!
//! # Construction Modes
//!
//! - [`PEReader::from_bytes`] / [`PEReader::from_file`] - the whole image is resident (owned
//!   buffer or memory mapping); nothing is parsed until first access
//! - [`PEReader::from_stream`] without prefetch flags - headers and blocks are read from the
//!   stream on demand
//! - [`PEReader::from_stream`] with [`PEStreamOptions::PREFETCH_ENTIRE_IMAGE`] - the image is
//!   copied into memory during construction
//! - [`PEReader::from_stream`] with only [`PEStreamOptions::PREFETCH_METADATA`] - headers and
//!   metadata are read during construction and the stream is released; the rest of the image
//!   is then [not available](crate::Error::ImageNotAvailable)

mod block;

pub use block::PEMemoryBlock;

use std::{
    borrow::Cow,
    io::{Cursor, Read, Seek, SeekFrom},
    path::Path,
    sync::OnceLock,
};

use bitflags::bitflags;
use log::{debug, warn};

use crate::{
    file::{Backend, Memory, PEBinaryReader, Physical, StreamProvider},
    headers::{DebugDirectoryEntry, PEHeaders, SectionHeader},
    Error, Result,
};

bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    /// Options for [`PEReader::from_stream`]
    pub struct PEStreamOptions: u32 {
        /// Accepted for compatibility; the reader always owns the stream
        const LEAVE_OPEN = 0x0000_0001;
        /// Read the headers and the metadata block during construction
        const PREFETCH_METADATA = 0x0000_0002;
        /// Copy the entire image into memory during construction
        const PREFETCH_ENTIRE_IMAGE = 0x0000_0004;
        /// The stream holds an image laid out as mapped by the OS loader
        const IS_LOADED_IMAGE = 0x0000_0008;
    }
}

enum ImageSource {
    /// All bytes are addressable in place
    Resident(Box<dyn Backend>),
    /// Bytes are read from a stream on demand
    Stream(StreamProvider),
    /// Only the prefetched headers and metadata are available
    MetadataOnly,
}

/// Reads headers and data of a PE/COFF image.
///
/// `PEReader` is `Send + Sync`; all read operations take `&self` and may be called from
/// multiple threads. [`PEReader::close`] takes `&mut self` and releases the image, after which
/// every read fails with [`Error::ReaderDisposed`].
///
/// # Examples
///
/// ```rust,no_run
/// use dotpe::PEReader;
///
/// let reader = PEReader::from_bytes(std::fs::read("app.dll")?);
/// let headers = reader.pe_headers()?;
/// println!("{} sections", headers.section_headers().len());
///
/// if reader.has_metadata()? {
///     let metadata = reader.get_metadata()?;
///     assert_eq!(&metadata.as_bytes()[..4], b"BSJB");
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct PEReader {
    source: Option<ImageSource>,
    is_loaded_image: bool,
    headers: OnceLock<PEHeaders>,
    metadata: OnceLock<Vec<u8>>,
    image: OnceLock<Vec<u8>>,
    sections: OnceLock<Vec<OnceLock<Vec<u8>>>>,
}

impl PEReader {
    fn with_source(source: ImageSource, is_loaded_image: bool) -> PEReader {
        PEReader {
            source: Some(source),
            is_loaded_image,
            headers: OnceLock::new(),
            metadata: OnceLock::new(),
            image: OnceLock::new(),
            sections: OnceLock::new(),
        }
    }

    /// Creates a reader over resident image bytes.
    ///
    /// With `is_loaded_image` the bytes are laid out as mapped by the OS loader.
    pub fn new(backend: Box<dyn Backend>, is_loaded_image: bool) -> PEReader {
        Self::with_source(ImageSource::Resident(backend), is_loaded_image)
    }

    /// Creates a reader over an owned file image. No parsing happens until first access.
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> PEReader {
        Self::new(Box::new(Memory::new(data)), false)
    }

    /// Creates a reader over a memory-mapped image file.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] if the file cannot be opened or mapped.
    pub fn from_file(path: impl AsRef<Path>) -> Result<PEReader> {
        let physical = Physical::new(path)?;
        debug!("mapped image file, {} bytes", physical.len());
        Ok(Self::new(Box::new(physical), false))
    }

    /// Creates a reader over an image starting at the current position of `stream`.
    ///
    /// # Arguments
    ///
    /// * `stream` - Source of the image; offsets are relative to its position on entry
    /// * `options` - Prefetch and layout flags, see the [module documentation](self)
    /// * `size` - Image length in bytes; `None` uses everything up to the end of the stream
    ///
    /// # Returns
    ///
    /// A reader that either owns a prefetched copy of the image or keeps `stream` for
    /// on-demand reads.
    ///
    /// # Errors
    /// Returns [`Error::InvalidArgument`] if `size` exceeds the remaining stream length, and
    /// propagates header parsing failures when prefetching.
    pub fn from_stream<S>(mut stream: S, options: PEStreamOptions, size: Option<usize>) -> Result<PEReader>
    where
        S: Read + Seek + Send + 'static,
    {
        if options.bits() & !PEStreamOptions::all().bits() != 0 {
            warn!("ignoring unknown stream options 0x{:X}", options.bits());
        }

        let start = stream.stream_position()?;
        let end = stream.seek(SeekFrom::End(0))?;
        let available = usize::try_from(end.saturating_sub(start)).map_err(|_| {
            invalid_argument!("stream", "stream is too large to be a PE image")
        })?;
        let size = match size {
            Some(size) if size > available => {
                return Err(invalid_argument!(
                    "size",
                    "image size {} exceeds the {} bytes remaining in the stream",
                    size,
                    available
                ));
            }
            Some(size) => size,
            None => available,
        };
        stream.seek(SeekFrom::Start(start))?;

        let is_loaded_image = options.contains(PEStreamOptions::IS_LOADED_IMAGE);

        if options.contains(PEStreamOptions::PREFETCH_ENTIRE_IMAGE) {
            let mut data = vec![0u8; size];
            stream.read_exact(&mut data)?;
            debug!("prefetched entire image, {} bytes", size);

            let reader = Self::new(Box::new(Memory::new(data)), is_loaded_image);
            if options.contains(PEStreamOptions::PREFETCH_METADATA) && reader.has_metadata()? {
                reader.get_metadata()?;
            }
            return Ok(reader);
        }

        if options.contains(PEStreamOptions::PREFETCH_METADATA) {
            let headers = PEHeaders::read(&mut stream, size, is_loaded_image)?;
            let metadata = match headers.metadata_start_offset() {
                Some(offset) => {
                    let mut metadata = vec![0u8; headers.metadata_size()];
                    stream.seek(SeekFrom::Start(start + offset as u64))?;
                    stream.read_exact(&mut metadata)?;
                    metadata
                }
                None => Vec::new(),
            };
            debug!("prefetched headers and {} bytes of metadata", metadata.len());

            let reader = Self::with_source(ImageSource::MetadataOnly, is_loaded_image);
            let _ = reader.headers.set(headers);
            let _ = reader.metadata.set(metadata);
            return Ok(reader);
        }

        debug!("deferred stream reader over {} bytes", size);
        Ok(Self::with_source(
            ImageSource::Stream(StreamProvider::new(Box::new(stream), start, size)),
            is_loaded_image,
        ))
    }

    fn source(&self) -> Result<&ImageSource> {
        self.source.as_ref().ok_or(Error::ReaderDisposed)
    }

    /// The headers of the image, parsed on first access.
    ///
    /// # Errors
    /// Returns [`Error::ReaderDisposed`] after [`PEReader::close`] and propagates parsing
    /// failures.
    pub fn pe_headers(&self) -> Result<&PEHeaders> {
        let source = self.source()?;
        if let Some(headers) = self.headers.get() {
            return Ok(headers);
        }

        let headers = match source {
            ImageSource::Resident(backend) => PEHeaders::read(
                &mut Cursor::new(backend.data()),
                backend.len(),
                self.is_loaded_image,
            )?,
            ImageSource::Stream(provider) => provider.read_headers(self.is_loaded_image)?,
            ImageSource::MetadataOnly => return Err(Error::ImageNotAvailable),
        };

        Ok(self.headers.get_or_init(|| headers))
    }

    /// Returns `true` if the image contains CLI metadata.
    ///
    /// # Errors
    /// See [`PEReader::pe_headers`].
    pub fn has_metadata(&self) -> Result<bool> {
        Ok(self.pe_headers()?.metadata_size() > 0)
    }

    /// The CLI metadata block.
    ///
    /// # Errors
    /// Returns [`Error::InvalidOperation`] if the image has no metadata,
    /// [`Error::ReaderDisposed`] after [`PEReader::close`].
    pub fn get_metadata(&self) -> Result<PEMemoryBlock<'_>> {
        let source = self.source()?;
        let headers = self.pe_headers()?;
        let Some(start) = headers.metadata_start_offset() else {
            return Err(Error::InvalidOperation(
                "the image does not contain CLI metadata".to_string(),
            ));
        };
        let size = headers.metadata_size();

        match source {
            ImageSource::Resident(backend) => {
                Ok(PEMemoryBlock::new(backend.data_slice(start, size)?))
            }
            ImageSource::Stream(provider) => {
                if let Some(metadata) = self.metadata.get() {
                    return Ok(PEMemoryBlock::new(metadata));
                }
                let metadata = provider.read_block(start, size)?;
                Ok(PEMemoryBlock::new(self.metadata.get_or_init(|| metadata)))
            }
            ImageSource::MetadataOnly => self
                .metadata
                .get()
                .map(|metadata| PEMemoryBlock::new(metadata))
                .ok_or(Error::ImageNotAvailable),
        }
    }

    /// Returns `true` if [`PEReader::get_entire_image`] can succeed.
    #[must_use]
    pub fn is_entire_image_available(&self) -> bool {
        matches!(
            self.source,
            Some(ImageSource::Resident(_) | ImageSource::Stream(_))
        )
    }

    /// The entire image.
    ///
    /// # Errors
    /// Returns [`Error::ImageNotAvailable`] when only metadata was prefetched and
    /// [`Error::ReaderDisposed`] after [`PEReader::close`].
    pub fn get_entire_image(&self) -> Result<PEMemoryBlock<'_>> {
        match self.source()? {
            ImageSource::Resident(backend) => Ok(PEMemoryBlock::new(backend.data())),
            ImageSource::Stream(provider) => {
                if let Some(image) = self.image.get() {
                    return Ok(PEMemoryBlock::new(image));
                }
                let image = provider.read_block(0, provider.size())?;
                Ok(PEMemoryBlock::new(self.image.get_or_init(|| image)))
            }
            ImageSource::MetadataOnly => Err(Error::ImageNotAvailable),
        }
    }

    /// Data of the section containing `rva`, from `rva` to the end of the section's data.
    ///
    /// Returns an empty block if no section contains `rva` or if `rva` lies in the
    /// uninitialized tail of its section.
    ///
    /// # Errors
    /// Returns [`Error::ImageNotAvailable`] when only metadata was prefetched and
    /// [`Error::ReaderDisposed`] after [`PEReader::close`].
    pub fn get_section_data(&self, rva: u32) -> Result<PEMemoryBlock<'_>> {
        let headers = self.pe_headers()?;
        let Some(index) = headers.get_containing_section_index(rva) else {
            return Ok(PEMemoryBlock::empty());
        };

        let section = &headers.section_headers()[index];
        let block = self.section_block(index, section)?;
        let relative_offset = (rva - section.virtual_address) as usize;
        if relative_offset > block.len() {
            return Ok(PEMemoryBlock::empty());
        }

        block.get_content(relative_offset, block.len() - relative_offset)
            .map(PEMemoryBlock::new)
    }

    /// Data of the first section named `name`, or `None` if there is no such section.
    ///
    /// # Errors
    /// See [`PEReader::get_section_data`].
    pub fn get_section_data_by_name(&self, name: &str) -> Result<Option<PEMemoryBlock<'_>>> {
        let headers = self.pe_headers()?;
        let Some((index, section)) = headers
            .section_headers()
            .iter()
            .enumerate()
            .find(|(_, section)| section.name() == name)
        else {
            return Ok(None);
        };

        self.section_block(index, section).map(Some)
    }

    fn section_block(&self, index: usize, section: &SectionHeader) -> Result<PEMemoryBlock<'_>> {
        let (start, len) = if self.is_loaded_image {
            (section.virtual_address as usize, section.virtual_size as usize)
        } else {
            (
                section.pointer_to_raw_data as usize,
                section.size_of_raw_data.min(section.virtual_size) as usize,
            )
        };

        match self.source()? {
            ImageSource::Resident(backend) => {
                Ok(PEMemoryBlock::new(backend.data_slice(start, len)?))
            }
            ImageSource::Stream(provider) => {
                let cache = self.sections.get_or_init(|| {
                    let count = self
                        .headers
                        .get()
                        .map_or(0, |headers| headers.section_headers().len());
                    (0..count).map(|_| OnceLock::new()).collect()
                });
                let Some(slot) = cache.get(index) else {
                    return Err(Error::OutOfBounds);
                };
                if let Some(data) = slot.get() {
                    return Ok(PEMemoryBlock::new(data));
                }
                let data = provider.read_block(start, len)?;
                Ok(PEMemoryBlock::new(slot.get_or_init(|| data)))
            }
            ImageSource::MetadataOnly => Err(Error::ImageNotAvailable),
        }
    }

    fn read_range(&self, offset: usize, len: usize) -> Result<Cow<'_, [u8]>> {
        match self.source()? {
            ImageSource::Resident(backend) => Ok(Cow::Borrowed(backend.data_slice(offset, len)?)),
            ImageSource::Stream(provider) => Ok(Cow::Owned(provider.read_block(offset, len)?)),
            ImageSource::MetadataOnly => Err(Error::ImageNotAvailable),
        }
    }

    /// Reads all entries of the debug directory.
    ///
    /// Returns an empty list if the image has no debug directory or it is not inside any
    /// section.
    ///
    /// # Errors
    /// Returns [`Error::Malformed`] if the directory size is not a multiple of the entry size
    /// or an entry has non-zero characteristics.
    pub fn read_debug_directory(&self) -> Result<Vec<DebugDirectoryEntry>> {
        let headers = self.pe_headers()?;
        let Some(pe_header) = headers.pe_header() else {
            return Ok(Vec::new());
        };

        let directory = pe_header.debug_table_directory();
        if directory.size == 0 {
            return Ok(Vec::new());
        }

        let Some(position) = headers.try_get_directory_offset(&directory) else {
            return Ok(Vec::new());
        };

        let size = directory.size as usize;
        if size % DebugDirectoryEntry::SIZE != 0 {
            return Err(malformed_error!(
                "Debug directory size {} is not a multiple of {}",
                size,
                DebugDirectoryEntry::SIZE
            ));
        }

        let table = self.read_range(position, size)?;
        let mut reader = PEBinaryReader::new(Cursor::new(table.as_ref()), size)?;
        (0..size / DebugDirectoryEntry::SIZE)
            .map(|_| DebugDirectoryEntry::read(&mut reader))
            .collect()
    }

    /// The data referenced by a debug directory entry.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the data lies outside the image.
    pub fn read_debug_directory_entry_data(&self, entry: &DebugDirectoryEntry) -> Result<Vec<u8>> {
        let offset = if self.is_loaded_image {
            entry.data_relative_virtual_address
        } else {
            entry.data_pointer
        };
        Ok(self
            .read_range(offset as usize, entry.data_size as usize)?
            .into_owned())
    }

    /// Releases the image and all cached blocks. Every later read fails with
    /// [`Error::ReaderDisposed`].
    pub fn close(&mut self) {
        self.source = None;
        self.headers = OnceLock::new();
        self.metadata = OnceLock::new();
        self.image = OnceLock::new();
        self.sections = OnceLock::new();
    }

    /// Returns `true` once [`PEReader::close`] was called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.source.is_none()
    }
}
