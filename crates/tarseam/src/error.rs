//! Error types for the tarseam library.
//!
//! All fallible operations return a [`Result<T>`], an alias for
//! `Result<T, SeamError>`. There is no recovery inside the core: any error
//! aborts the current disassembly or assembly, and partially-written outputs
//! must be discarded by the caller.

use std::io;

use thiserror::Error;

use tar_frame::FrameError;

/// Result type alias for operations that may return a [`SeamError`].
pub type Result<T> = std::result::Result<T, SeamError>;

/// Error types for disassembly, assembly, and the metadata codec.
#[derive(Debug, Error)]
pub enum SeamError {
    /// The tar stream failed structural validation.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The tar stream ended mid-header or mid-body.
    #[error("unexpected EOF in archive stream")]
    UnexpectedEof,

    /// The strict packer saw a repeated file path.
    #[error("duplicate path: {0:?}")]
    DuplicatePath(String),

    /// A reassembled payload did not hash to the recorded digest.
    #[error("file integrity checksum failed for {name:?}")]
    ChecksumMismatch {
        /// Name of the offending file record.
        name: String,
    },

    /// Error surfaced from a payload sink.
    #[error("payload sink: {0}")]
    Sink(#[source] io::Error),

    /// Error surfaced from a payload source.
    #[error("payload source: {0}")]
    Source(#[source] io::Error),

    /// Malformed metadata record.
    #[error("malformed metadata record: {0}")]
    Codec(String),

    /// I/O error on the metadata or archive stream itself.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<FrameError> for SeamError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::UnexpectedEof => SeamError::UnexpectedEof,
            FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                SeamError::UnexpectedEof
            }
            FrameError::Io(e) => SeamError::Io(e),
            other => SeamError::MalformedArchive(other.to_string()),
        }
    }
}
