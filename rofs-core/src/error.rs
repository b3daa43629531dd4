//! Error types for ROFS operations.

use thiserror::Error;

/// Errors that can occur while mounting volumes, resolving names or
/// driving transfers.
///
/// Every variant carries a stable negative code (see [`RofsError::code`]);
/// the numeric ranges group the kinds by layer: -1xx parameter/validation,
/// -2xx transfer/runtime, -9xx internal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RofsError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("Invalid handle")]
    InvalidHandle,

    #[error("No handle available")]
    NoHandleAvailable,

    #[error("Invalid volume name: {0}")]
    InvalidVolumeName(String),

    #[error("Duplicate volume name: {0}")]
    DuplicateVolumeName(String),

    #[error("Volume lookup failed")]
    VolumeLookup,

    #[error("Not a directory: {0}")]
    NotADirectory(String),

    #[error("Not a file: {0}")]
    NotAFile(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Malformed directory record at sector {0}")]
    MalformedDirectory(u32),

    #[error("Directory overflow: {count} entries, capacity {capacity}")]
    DirectoryOverflow { count: usize, capacity: usize },

    #[error("Operation in progress")]
    Busy,

    #[error("Seek while transfer is busy")]
    SeekWhileBusy,

    #[error("Timed out after {0} polls")]
    Timeout(u32),

    #[error("Primitive I/O failure (code {0})")]
    Primitive(i32),

    #[error("Not initialized")]
    NotInitialized,

    #[error("Read request failed")]
    ReadRequestFailed,

    #[error("Seek failed")]
    SeekFailed,

    #[error("Open failed")]
    OpenFailed,

    #[error("Read failed")]
    ReadFailed,

    #[error("Internal error: {0}")]
    Internal(&'static str),
}

impl RofsError {
    /// Stable numeric code, as reported to error callbacks.
    pub fn code(&self) -> i32 {
        match self {
            Self::InvalidParameter(_) => -100,
            Self::InvalidHandle => -101,
            Self::NoHandleAvailable => -102,
            Self::InvalidVolumeName(_) => -103,
            Self::DuplicateVolumeName(_) => -104,
            Self::VolumeLookup => -105,
            Self::NotADirectory(_) => -106,
            Self::NotAFile(_) => -107,
            Self::FileNotFound(_) => -108,
            Self::MalformedDirectory(_) => -109,
            Self::DirectoryOverflow { .. } => -110,
            Self::Busy => -200,
            Self::SeekWhileBusy => -201,
            Self::Timeout(_) => -202,
            Self::Primitive(_) => -203,
            Self::NotInitialized => -204,
            Self::ReadRequestFailed => -205,
            Self::SeekFailed => -206,
            Self::OpenFailed => -207,
            Self::ReadFailed => -208,
            Self::Internal(_) => -900,
        }
    }
}

/// Result type for ROFS operations.
pub type RofsResult<T> = Result<T, RofsError>;

/// Errors raised while authoring images (never by a mounted filesystem).
#[derive(Error, Debug)]
pub enum PackError {
    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Duplicate path: {0}")]
    DuplicatePath(String),

    #[error("Path component is a file: {0}")]
    NotADirectory(String),

    #[error("Manifest names a missing file: {0}")]
    MissingFile(String),

    #[error("Image too large: {0} sectors")]
    TooLarge(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for image authoring.
pub type PackResult<T> = Result<T, PackError>;
