use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EpkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot read key {}: {reason}", path.display())]
    KeyUnreadable { path: PathBuf, reason: String },

    #[error("cannot verify signature of {what} at offset 0x{offset:x}")]
    SignatureInvalid { what: String, offset: usize },

    #[error("cannot decrypt {0}, key unknown")]
    DecryptionKeyUnknown(String),

    #[error("image truncated: 0x{needed:x} bytes needed at offset 0x{offset:x}, only 0x{available:x} available")]
    TruncatedImage { offset: usize, needed: usize, available: usize },

    #[error("format not recognized: {0}")]
    FormatUnrecognized(String),
}

impl From<binrw::Error> for EpkError {
    fn from(err: binrw::Error) -> Self {
        EpkError::FormatUnrecognized(err.to_string())
    }
}
