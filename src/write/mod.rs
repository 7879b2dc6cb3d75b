//! Serialization of PE images.
//!
//! The writer works in two layers:
//!
//! - [`PEBuilder`] is format-generic. It takes its sections from a [`SectionProvider`], lays
//!   them out at section/file alignment, writes the DOS stub, COFF header, optional header and
//!   section table, and stamps the image with a [`ContentId`].
//! - [`ManagedPEBuilder`] is a [`SectionProvider`] for CLI images. It computes the `.text`
//!   layout through [`ManagedTextSection`] and adds `.rsrc` and `.reloc` when needed.
//!
//! All content is accumulated in [`BlobBuilder`]s. Values that are only known after later parts
//! are laid out (checksum, time stamp, strong-name signature) are reserved as [`Fixup`]s and
//! patched in place.
//!
//! # Examples
//!
//! ```rust
//! use dotpe::{headers::SectionCharacteristics, write::SectionList, prelude::*};
//!
//! let sections = SectionList::new().with_section(
//!     ".data",
//!     SectionCharacteristics::MEM_READ | SectionCharacteristics::CONTAINS_INITIALIZED_DATA,
//!     |_, _| Ok(BlobBuilder::from_bytes(vec![0xCC; 16])),
//! );
//!
//! let image = PEBuilder::new(PEHeaderBuilder::new(), sections)
//!     .deterministic()
//!     .serialize()?;
//! let headers = PEHeaders::from_bytes(image.as_bytes())?;
//! assert_eq!(headers.section_headers()[0].name(), ".data");
//! # Ok::<(), dotpe::Error>(())
//! ```

mod blob;
mod builder;
mod content_id;
mod debug;
mod directories;
mod header;
mod image;
mod location;
mod managed;
mod output;
mod text;

pub use blob::{BlobBuilder, Fixup};
pub use builder::{PEBuilder, Section, SectionList, SectionProvider};
pub use content_id::{ContentId, ContentIdProvider};
pub use debug::DebugDirectoryBuilder;
pub use directories::PEDirectoriesBuilder;
pub use header::PEHeaderBuilder;
pub use image::PEImage;
pub use location::SectionLocation;
pub use managed::{ManagedPEBuilder, MetadataSerializer, RawMetadata, ResourceSectionBuilder};
pub use text::{ManagedTextSection, TextSectionContent};
