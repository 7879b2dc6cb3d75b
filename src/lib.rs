// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(dead_code)]
#![allow(clippy::too_many_arguments)]
// - 'file/physical.rs' uses mmap to map a file into memory
// - 'write/output.rs' uses mmap to write the output file

//! # dotpe
//!
//! A reader and writer for PE/COFF images, with first-class support for the .NET flavour of the
//! format: the CLI (COR20) header, the metadata blob it points at, strong-name signature
//! reservation and the legacy `mscoree.dll` startup stub.
//!
//! ## Reading
//!
//! [`crate::PEReader`] owns the raw bytes (an in-memory buffer, a memory-mapped file or a
//! seekable stream) and lazily materializes [`crate::PEHeaders`] and the metadata block.
//!
//! ```rust,no_run
//! use dotpe::prelude::*;
//!
//! let reader = PEReader::from_file(std::path::Path::new("tests/samples/app.dll"))?;
//! let headers = reader.pe_headers()?;
//! for section in headers.section_headers() {
//!     println!("{:<8} rva=0x{:08X} size=0x{:X}", section.name(), section.virtual_address, section.virtual_size);
//! }
//!
//! if reader.has_metadata()? {
//!     let metadata = reader.get_metadata()?;
//!     println!("metadata: {} bytes", metadata.len());
//! }
//! # Ok::<(), dotpe::Error>(())
//! ```
//!
//! ## Writing
//!
//! [`crate::ManagedPEBuilder`] lays out the `.text` section (import address table, CLI header,
//! IL, metadata, resources, strong-name placeholder, debug directory, startup stub) and hands
//! the resulting sections to the generic [`crate::PEBuilder`], which emits the DOS stub, COFF
//! and optional headers and patches the deferred fixups.
//!
//! ```rust,no_run
//! use dotpe::prelude::*;
//!
//! let metadata: Vec<u8> = vec![0; 64];
//! let builder = ManagedPEBuilder::new(
//!     PEHeaderBuilder::create_library_header(),
//!     RawMetadata::new(metadata),
//!     BlobBuilder::new(),
//! )?;
//! let image = builder.serialize()?;
//! image.write_to_file("out.dll")?;
//! # Ok::<(), dotpe::Error>(())
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`crate::Result`]. Malformed input never panics; it surfaces
//! as [`crate::Error::Malformed`] (structural problems) or [`crate::Error::ImageTooSmall`]
//! (reads past the end of the image window).

#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types.
pub mod prelude;

/// Low-level byte access: primitive codecs, resident backends and the bounded reader.
pub mod file;

/// Fixed-layout PE/COFF header records and the header orchestrator.
pub mod headers;

/// The [`PEReader`] façade and memory blocks handed out by it.
pub mod reader;

/// Writer side: blob arena, header/section builders and the managed image builder.
pub mod write;

/// Shared helpers.
pub mod utils;

/// `dotpe` Result type
pub type Result<T> = std::result::Result<T, Error>;

/// `dotpe` Error type
pub use error::Error;

pub use file::PEBinaryReader;
pub use headers::{
    CoffHeader, CorHeader, DirectoryEntry, DirectoryKind, PEHeader, PEHeaders, SectionHeader,
};
pub use reader::{PEMemoryBlock, PEReader, PEStreamOptions};
pub use write::{
    BlobBuilder, ContentId, DebugDirectoryBuilder, ManagedPEBuilder, ManagedTextSection,
    PEBuilder, PEDirectoriesBuilder, PEHeaderBuilder, PEImage, SectionLocation,
};
