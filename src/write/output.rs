//! Memory-mapped output file.
//!
//! [`Output`] creates the target file at its final size, maps it and exposes bounds-checked
//! writes. A file that is dropped without [`Output::finalize`] is removed again, so an
//! interrupted write never leaves a truncated image behind.

use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::{Error, Result};

/// A memory-mapped output file that is deleted unless finalized.
pub struct Output {
    mmap: MmapMut,
    target_path: PathBuf,
    finalized: bool,
}

impl Output {
    /// Creates `target_path` with `size` bytes and maps it for writing.
    ///
    /// # Errors
    /// Returns [`Error::WriteMmapFailed`] if the file cannot be created, sized or mapped.
    pub fn create<P: AsRef<Path>>(target_path: P, size: u64) -> Result<Self> {
        let target_path = target_path.as_ref().to_path_buf();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&target_path)
            .map_err(|e| Error::WriteMmapFailed {
                message: format!("Failed to create target file: {e}"),
            })?;

        file.set_len(size).map_err(|e| Error::WriteMmapFailed {
            message: format!("Failed to set file size: {e}"),
        })?;

        let mmap = unsafe {
            MmapOptions::new()
                .map_mut(&file)
                .map_err(|e| Error::WriteMmapFailed {
                    message: format!("Failed to create memory mapping: {e}"),
                })?
        };

        Ok(Self {
            mmap,
            target_path,
            finalized: false,
        })
    }

    /// Copies `data` to `offset`.
    ///
    /// # Errors
    /// Returns [`Error::WriteMmapFailed`] if the write would exceed the file size.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let start = usize::try_from(offset).map_err(|_| Error::WriteMmapFailed {
            message: format!("Offset {offset} exceeds the address space"),
        })?;
        let end = start.checked_add(data.len()).unwrap_or(usize::MAX);

        if end > self.mmap.len() {
            return Err(Error::WriteMmapFailed {
                message: format!(
                    "Write would exceed file size: offset={}, len={}, file_size={}",
                    offset,
                    data.len(),
                    self.mmap.len()
                ),
            });
        }

        self.mmap[start..end].copy_from_slice(data);
        Ok(())
    }

    /// Size of the file
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Path of the file
    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Flushes pending writes.
    ///
    /// # Errors
    /// Returns [`Error::WriteMmapFailed`] if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.mmap.flush().map_err(|e| Error::WriteMmapFailed {
            message: format!("Failed to flush memory mapping: {e}"),
        })
    }

    /// Flushes the mapping and keeps the file.
    ///
    /// # Errors
    /// Returns [`Error::WriteFinalizationFailed`] if the flush fails; the file is then removed.
    pub fn finalize(mut self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| Error::WriteFinalizationFailed {
                message: format!("Failed to flush memory mapping: {e}"),
            })?;

        self.finalized = true;
        Ok(())
    }
}

impl Drop for Output {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.flush();
            let _ = std::fs::remove_file(&self.target_path);
        }
    }
}
