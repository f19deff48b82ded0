/// Error types for the mmdb reader
use thiserror::Error;

/// Result type alias for reader operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Main error type for opening and querying a MaxMind DB
///
/// Every failure is reported synchronously by the call that discovers it.
/// Nothing is retried: the database bytes never change, so a retry cannot
/// produce a different outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MmdbError {
    /// A read ran past the end of the buffer
    #[error("read of {length} bytes at offset {offset} exceeds buffer of {size} bytes")]
    OutOfBounds {
        /// Requested start offset
        offset: usize,
        /// Requested length
        length: usize,
        /// Size of the buffer
        size: usize,
    },

    /// The metadata marker does not occur anywhere in the buffer
    #[error("MMDB metadata marker not found")]
    MetadataNotFound,

    /// A required metadata field is missing, mistyped or out of range
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The binary format major version is not one this reader understands
    #[error("Unsupported binary format version {major}.{minor}")]
    UnsupportedVersion {
        /// binary_format_major_version
        major: u16,
        /// binary_format_minor_version
        minor: u16,
    },

    /// Size/type mismatch or otherwise invalid tagged value
    #[error("Malformed value at offset {offset}: {reason}")]
    MalformedValue {
        /// Offset of the control byte, relative to the section being decoded
        offset: usize,
        /// What was wrong
        reason: String,
    },

    /// A pointer targets a location outside the section it lives in
    #[error("Pointer to offset {target} is outside a section of {section_size} bytes")]
    PointerOutOfBounds {
        /// Decoded pointer target
        target: usize,
        /// Size of the section the pointer is relative to
        section_size: usize,
    },

    /// Too many pointers were followed while decoding a single value
    #[error("Pointer chain deeper than {limit} at offset {offset}, possible cycle")]
    PointerCycleSuspected {
        /// Offset of the pointer that exceeded the limit
        offset: usize,
        /// Configured pointer depth limit
        limit: usize,
    },

    /// The search tree is inconsistent
    #[error("Malformed search tree: {0}")]
    MalformedTree(String),

    /// An IPv6 address was looked up in an IPv4-only database
    #[error("Cannot look up IPv6 address {0} in an IPv4-only database")]
    AddressFamilyMismatch(String),

    /// The lookup key is not a valid IP address
    #[error("Invalid IP address: {0}")]
    InvalidAddress(String),

    /// Opening or mapping the database file failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MmdbError {
    fn from(err: std::io::Error) -> Self {
        MmdbError::Io(err.to_string())
    }
}

impl MmdbError {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        MmdbError::MalformedValue {
            offset,
            reason: reason.into(),
        }
    }
}
