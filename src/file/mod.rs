//! Byte access for PE/COFF images.
//!
//! # Key Components
//!
//! - [`Backend`] - Trait for image bytes that are fully resident (owned buffer or mapped file)
//! - [`Memory`] / [`Physical`] - The two resident backends
//! - [`PEBinaryReader`] - Bounds-checked little-endian cursor over a window of a seekable stream
//! - [`StreamProvider`] - Shared access to a stream whose bytes are read on demand
//! - [`io`] - Primitive little-endian codecs used by both the reader and the writer

pub mod io;
mod memory;
mod physical;
mod reader;
mod stream;

pub use memory::Memory;
pub use physical::Physical;
pub use reader::PEBinaryReader;
pub use stream::{ReadSeek, StreamProvider};

use crate::Result;

/// Backing storage for an image whose bytes are all addressable at once.
///
/// Implementations must be thread-safe; a [`crate::PEReader`] holding a backend is shared
/// across threads.
pub trait Backend: Send + Sync {
    /// Returns a slice of the data at the given offset and length.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::OutOfBounds`] if the requested range is out of bounds.
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]>;

    /// Returns the entire data buffer.
    fn data(&self) -> &[u8];

    /// Returns the total length of the data buffer.
    fn len(&self) -> usize;

    /// Returns `true` if the backend holds no bytes.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
