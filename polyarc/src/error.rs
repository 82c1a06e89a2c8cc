//! All error types used in this crate

use crate::{filter::FilterCode, parse::zip::Method};

use super::encoding;

/// How bad an error is, from the caller's point of view.
///
/// Anything below [Severity::Fatal] leaves the handle usable: the caller may
/// keep the entry (`Warn`), re-invoke the operation (`Retry`), or skip the
/// entry and move on (`Failed`). A `Fatal` error poisons the handle; only
/// closing it is legal afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Surfaceable problem, the archive is still usable.
    Warn,

    /// The operation may be re-invoked (speculative parses).
    Retry,

    /// The current entry is lost, the stream can continue.
    Failed,

    /// The handle is poisoned.
    Fatal,
}

/// Any archive-related error, from invalid containers to encoding problems.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not a valid archive, or a variant that is unsupported.
    #[error("format: {0}")]
    Format(#[from] FormatError),

    /// Something is not supported by this crate
    #[error("unsupported: {0}")]
    Unsupported(#[from] UnsupportedError),

    /// Invalid UTF-8, Shift-JIS, or any problem encountered while decoding text in general.
    #[error("encoding: {0:?}")]
    Encoding(#[from] encoding::DecodingError),

    /// I/O-related error
    #[error("io: {0}")]
    IO(#[from] std::io::Error),

    /// Decompression-related error
    #[error("{method:?} decompression error: {msg}")]
    Decompression {
        /// The compression method that failed
        method: Method,
        /// Additional information
        msg: String,
    },

    /// No password was supplied, or the supplied one did not check out.
    ///
    /// For traditional zip encryption there is no MAC, so a wrong password is
    /// indistinguishable from corrupt data until the CRC fails.
    #[error("bad password or corrupt data")]
    Password,

    /// An entry was refused by a security policy (path traversal, absolute
    /// path, symlinked intermediate directory).
    #[error("insecure entry path: {0}")]
    InsecurePath(String),

    /// Could not read as a seekable zip because size could not be determined
    #[error("size must be known to open zip file")]
    UnknownSize,
}

impl Error {
    /// Create a new error indicating that the given method is not supported.
    pub fn method_not_supported(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotSupported(method))
    }

    /// Create a new error indicating that the given method is not enabled.
    pub fn method_not_enabled(method: Method) -> Self {
        Self::Unsupported(UnsupportedError::MethodNotEnabled(method))
    }

    /// Classify this error per the read/write state machine contract.
    pub fn severity(&self) -> Severity {
        match self {
            Error::Format(e) => e.severity(),
            Error::Unsupported(_) => Severity::Failed,
            Error::Encoding(_) => Severity::Warn,
            Error::IO(_) => Severity::Fatal,
            Error::Decompression { .. } => Severity::Fatal,
            Error::Password => Severity::Warn,
            Error::InsecurePath(_) => Severity::Failed,
            Error::UnknownSize => Severity::Fatal,
        }
    }
}

/// Some part of an archive format is not supported by this crate.
#[derive(Debug, thiserror::Error)]
pub enum UnsupportedError {
    /// The zip compression method is not supported.
    #[error("compression method not supported: {0:?}")]
    MethodNotSupported(Method),

    /// The zip compression method is supported, but not enabled in this build.
    #[error("compression method supported, but not enabled in this build: {0:?}")]
    MethodNotEnabled(Method),

    /// The stream was recognized but this build cannot decode it.
    #[error("filter recognized but not supported: {0:?}")]
    FilterNotSupported(FilterCode),

    /// The format takes part in bidding but has no engine in this crate.
    #[error("format recognized but not supported: {0:?}")]
    FormatNotSupported(crate::format::FormatCode),

    /// The zip file uses a version of LZMA that is not supported.
    #[error("only LZMA2.0 is supported, found LZMA{minor}.{major}")]
    LzmaVersionUnsupported {
        /// major version read from LZMA properties header, cf. appnote 5.8.8
        major: u8,
        /// minor version read from LZMA properties header, cf. appnote 5.8.8
        minor: u8,
    },

    /// The LZMA properties header is not the expected size.
    #[error("LZMA properties header wrong size: expected {expected} bytes, got {actual} bytes")]
    LzmaPropertiesHeaderWrongSize {
        /// expected size in bytes
        expected: u16,
        /// actual size in bytes, read from a u16, cf. appnote 5.8.8
        actual: u16,
    },

    /// An AES-encrypted entry declares a key strength we don't know about.
    #[error("unknown AES key strength: {0}")]
    AesStrengthUnknown(u8),
}

/// Specific format errors, mostly due to invalid archives but that could also
/// stem from implementation shortcomings.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    /// None of the registered formats produced a positive bid.
    #[error("unrecognized archive format")]
    UnrecognizedFormat,

    /// The end of central directory record was not found.
    ///
    /// This usually indicates that the file being read is not a zip archive.
    #[error("end of central directory record not found")]
    DirectoryEndSignatureNotFound,

    /// The zip64 end of central directory record could not be parsed.
    ///
    /// This is only returned when a zip64 end of central directory *locator* was found,
    /// so the archive should be zip64, but isn't.
    #[error("zip64 end of central directory record not found")]
    Directory64EndRecordInvalid,

    /// Corrupted/partial zip file: the offset we found for the central directory
    /// points outside of the current file.
    #[error("directory offset points outside of file")]
    DirectoryOffsetPointsOutsideFile,

    /// The central record is corrupted somewhat.
    ///
    /// This can happen when the end of central directory record advertises
    /// a certain number of files, but we weren't able to read the same number of central directory
    /// headers.
    #[error("invalid central record: expected to read {expected} files, got {actual}")]
    InvalidCentralRecord {
        /// expected number of files
        expected: u16,
        /// actual number of files
        actual: u16,
    },

    /// An extra field (that we support) was not decoded correctly.
    #[error("could not decode extra field")]
    InvalidExtraField,

    /// The local file header (before the file data) could not be parsed correctly.
    #[error("invalid local file header")]
    InvalidLocalHeader,

    /// The data descriptor (after the file data) could not be parsed correctly.
    #[error("invalid data descriptor")]
    InvalidDataDescriptor,

    /// While hunting for the end of a stored length-at-end entry, more than
    /// three `PK\x07\x08` candidates were rejected. The entry is abandoned;
    /// the handle itself survives, so the caller may re-invoke and move on.
    #[error("too many speculative data descriptors rejected")]
    DescriptorRetriesExhausted,

    /// The uncompressed size didn't match
    #[error("uncompressed size didn't match: expected {expected}, got {actual}")]
    WrongSize {
        /// expected size in bytes (from the local header, data descriptor, etc.)
        expected: u64,
        /// actual size in bytes (from decompressing the entry)
        actual: u64,
    },

    /// The CRC-32 checksum didn't match.
    #[error("checksum didn't match: expected {expected:x?}, got {actual:x?}")]
    WrongChecksum {
        /// expected checksum (from the data descriptor, etc.)
        expected: u32,
        /// actual checksum (from decompressing the entry)
        actual: u32,
    },

    /// The HMAC trailer of an AES-encrypted entry didn't match.
    #[error("authentication code mismatch on encrypted entry")]
    WrongAuthCode,

    /// A tar header block failed its checksum.
    #[error("tar header checksum mismatch: stored {stored}, computed {computed}")]
    TarChecksumMismatch {
        /// value parsed from the checksum field
        stored: i64,
        /// unsigned sum computed over the block
        computed: i64,
    },

    /// A lone zero block where a header was expected.
    ///
    /// End of archive requires two consecutive zero blocks; a single one is a
    /// damaged archive (unless the reader was told to ignore them).
    #[error("lone zero block in tar stream")]
    TarLoneZeroBlock,

    /// A tar numeric field held something that is neither octal nor base-256.
    #[error("invalid tar numeric field")]
    TarInvalidNumber,

    /// A pax extension record was malformed (bad length, missing '=' or newline).
    #[error("malformed pax extension record")]
    PaxInvalidRecord,

    /// A GNU sparse map (old-GNU block, 0.x pax keys or 1.0 body map) was malformed.
    #[error("malformed sparse map")]
    SparseMapInvalid,

    /// The RPM lead/header structure was malformed.
    #[error("malformed rpm envelope")]
    RpmInvalid,

}

impl FormatError {
    pub(crate) fn severity(&self) -> Severity {
        match self {
            FormatError::WrongChecksum { .. } | FormatError::WrongSize { .. } => Severity::Warn,
            FormatError::TarLoneZeroBlock => Severity::Warn,
            FormatError::DescriptorRetriesExhausted => Severity::Retry,
            _ => Severity::Fatal,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::IO(e) => e,
            e => std::io::Error::new(std::io::ErrorKind::Other, e),
        }
    }
}
