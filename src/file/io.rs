//! Little-endian primitive codecs.
//!
//! Every multi-byte field of a PE/COFF image is stored little-endian. The [`PeIO`] trait gives
//! the reader ([`crate::PEBinaryReader`]) and the writer ([`crate::BlobBuilder`]) a single
//! generic entry point for all integer widths, and [`read_le_at`] / [`write_le_at`] provide
//! bounds-checked access to plain byte slices with offset auto-advance.
//!
//! # Examples
//!
//! ```rust
//! use dotpe::file::io::{read_le_at, write_le_at};
//!
//! let mut data = [0u8; 6];
//! let mut offset = 0;
//! write_le_at(&mut data, &mut offset, 0x5A4Du16)?;
//! write_le_at(&mut data, &mut offset, 0x80u32)?;
//! assert_eq!(data, [0x4D, 0x5A, 0x80, 0x00, 0x00, 0x00]);
//!
//! offset = 0;
//! let magic: u16 = read_le_at(&data, &mut offset)?;
//! assert_eq!(magic, 0x5A4D);
//! assert_eq!(offset, 2);
//! # Ok::<(), dotpe::Error>(())
//! ```

use crate::{Error::OutOfBounds, Result};

/// Fixed-width integers that can be decoded from and encoded to little-endian bytes.
pub trait PeIO: Sized + Copy {
    /// Byte array holding the encoded value (e.g. `[u8; 4]` for `u32`).
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decodes a value from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;

    /// Encodes the value as little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_pe_io {
    ($($ty:ty),*) => {
        $(
            impl PeIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_pe_io!(u8, u16, i16, u32, i32, u64);

/// Safely reads a value of type `T` in little-endian byte order at `offset`, advancing the
/// offset by the size of `T`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_le_at<T: PeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(OutOfBounds);
    };

    *offset = end;
    Ok(T::from_le_bytes(read))
}

/// Safely writes `value` in little-endian byte order at `offset`, advancing the offset by the
/// size of `T`.
///
/// # Errors
///
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_le_at<T: PeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let bytes = value.to_le_bytes();
    let bytes = bytes.as_ref();
    let Some(end) = offset.checked_add(bytes.len()) else {
        return Err(OutOfBounds);
    };
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}
