//! # dotpe Prelude
//!
//! Re-exports the types needed for everyday reading and writing of images.
//!
//! ```rust
//! use dotpe::prelude::*;
//!
//! let reader = PEReader::from_bytes(vec![0; 16]);
//! assert!(reader.pe_headers().is_err());
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotpe operations
pub use crate::Error;

/// The result type used throughout dotpe
pub use crate::Result;

// ================================================================================================
// Reading
// ================================================================================================

/// Reader façade, its stream options and the memory blocks it hands out
pub use crate::{PEMemoryBlock, PEReader, PEStreamOptions};

/// Header records
pub use crate::headers::{
    Characteristics, CoffHeader, CorFlags, CorHeader, DebugDirectoryEntry,
    DebugDirectoryEntryType, DirectoryEntry, DirectoryKind, DllCharacteristics, Machine,
    PEHeader, PEHeaders, PEMagic, SectionCharacteristics, SectionHeader, Subsystem,
};

// ================================================================================================
// Writing
// ================================================================================================

/// Generic image builder and its section seam
pub use crate::write::{
    BlobBuilder, PEBuilder, PEDirectoriesBuilder, PEHeaderBuilder, PEImage, Section,
    SectionList, SectionLocation, SectionProvider,
};

/// Managed image builder and its content seams
pub use crate::write::{
    ContentId, ContentIdProvider, DebugDirectoryBuilder, ManagedPEBuilder, MetadataSerializer,
    RawMetadata, ResourceSectionBuilder,
};
