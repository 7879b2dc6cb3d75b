use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! invalid_argument {
    ($name:expr, $fmt:expr $(, $arg:expr)* $(,)?) => {
        crate::Error::InvalidArgument {
            name: $name,
            message: format!($fmt $(, $arg)*),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Image Parsing Errors
/// - [`Error::Malformed`] - Corrupted or invalid PE/COFF structure
/// - [`Error::ImageTooSmall`] - A header read ran past the end of the image window
/// - [`Error::OutOfBounds`] - A slice of resident bytes was requested outside their range
///
/// ## Usage Errors
/// - [`Error::InvalidArgument`] - A construction-time parameter failed validation
/// - [`Error::InvalidOperation`] - The operation is not valid in the current state
/// - [`Error::ReaderDisposed`] - The reader was used after [`crate::PEReader::close`]
/// - [`Error::ImageNotAvailable`] - The entire image is not held resident by the reader
/// - [`Error::BuilderInvariant`] - A section provider broke its contract
///
/// ## I/O Errors
/// - [`Error::FileError`] - Filesystem or stream I/O errors
/// - [`Error::WriteMmapFailed`] / [`Error::WriteFinalizationFailed`] - Output file failures
///
/// # Examples
///
/// ```rust,no_run
/// use dotpe::{Error, PEReader};
/// use std::path::Path;
///
/// match PEReader::from_file(Path::new("assembly.dll")).and_then(|r| r.pe_headers().map(|_| ())) {
///     Ok(()) => println!("headers parsed"),
///     Err(Error::Malformed { message, file, line }) => {
///         eprintln!("Malformed file: {} ({}:{})", message, file, line);
///     }
///     Err(Error::ImageTooSmall) => eprintln!("truncated image"),
///     Err(e) => eprintln!("Other error: {}", e),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The image is damaged and could not be parsed.
    ///
    /// Raised for bad DOS/PE signatures, an unknown optional header magic, a negative section
    /// count, an undersized CLI header directory or a metadata range outside the image. The
    /// error includes the source location where the malformation was detected.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// A read through [`crate::PEBinaryReader`] would have left its window.
    ///
    /// The window check happens before the underlying stream is touched.
    #[error("Image is too small")]
    ImageTooSmall,

    /// An out of bound access was attempted on resident image bytes.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// A construction-time argument failed validation.
    ///
    /// # Fields
    ///
    /// * `name` - Name of the offending parameter
    /// * `message` - Why the value was rejected
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument {
        /// Name of the offending parameter
        name: &'static str,
        /// Why the value was rejected
        message: String,
    },

    /// The requested operation is not valid in the current state.
    ///
    /// For example requesting the metadata block of an image without CLI metadata, or signing
    /// an image that has no strong-name signature reservation.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// The reader was used after it has been closed.
    #[error("The PE reader has been disposed")]
    ReaderDisposed,

    /// The entire image is not available from this reader.
    ///
    /// Happens when a stream was consumed with metadata-only prefetch; the headers and the
    /// metadata block remain accessible, everything else does not.
    #[error("The entire PE image is not available")]
    ImageNotAvailable,

    /// A section provider violated the builder contract.
    #[error("Builder invariant violated: {0}")]
    BuilderInvariant(String),

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// Failed to create or map the output file.
    #[error("Failed to write output file: {message}")]
    WriteMmapFailed {
        /// Description of the mapping failure
        message: String,
    },

    /// Failed to flush or truncate the output file.
    #[error("Failed to finalize output file: {message}")]
    WriteFinalizationFailed {
        /// Description of the finalization failure
        message: String,
    },
}
