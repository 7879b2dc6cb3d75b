//! Memory-mapped image files.
//!
//! [`Physical`] maps an image read-only into the address space so that [`crate::PEReader`]
//! can hand out borrowed [`crate::PEMemoryBlock`]s without copying.

use memmap2::Mmap;
use std::{fs, path::Path};

use super::Backend;
use crate::{Error::OutOfBounds, Result};

/// Image file on disk, accessed through a read-only memory mapping
#[derive(Debug)]
pub struct Physical {
    /// Memory-mapped file data
    data: Mmap,
}

impl Physical {
    /// Maps the file at `path`.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the file cannot be opened or mapped.
    pub fn new(path: impl AsRef<Path>) -> Result<Physical> {
        let file = fs::File::open(path)?;
        Self::from_std_file(&file)
    }

    /// Maps an already opened file.
    ///
    /// # Errors
    /// Returns [`crate::Error::FileError`] if the mapping fails.
    pub fn from_std_file(file: &fs::File) -> Result<Physical> {
        // The image is never written through this mapping.
        let mmap = unsafe { Mmap::map(file) }?;

        Ok(Physical { data: mmap })
    }
}

impl Backend for Physical {
    fn data_slice(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let Some(offset_end) = offset.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if offset_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[offset..offset_end])
    }

    fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error::FileError;

    #[test]
    fn physical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.bin");
        let mut content = vec![0u8; 0x400];
        content[0] = b'M';
        content[1] = b'Z';
        content[0x3FF] = 0xAB;
        std::fs::write(&path, &content).unwrap();

        let physical = Physical::new(&path).unwrap();
        assert_eq!(physical.len(), 0x400);
        assert_eq!(physical.data_slice(0, 2).unwrap(), b"MZ");
        assert_eq!(physical.data_slice(0x3FF, 1).unwrap(), &[0xAB]);
        assert!(physical.data_slice(0x3FF, 2).is_err());
        assert!(physical.data_slice(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_physical_invalid_file_path() {
        let result = Physical::new("/nonexistent/path/to/file.dll");
        match result {
            Err(FileError(io_error)) => {
                assert_eq!(io_error.kind(), std::io::ErrorKind::NotFound);
            }
            _ => panic!("Expected FileError"),
        }
    }
}
