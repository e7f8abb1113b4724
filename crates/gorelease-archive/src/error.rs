//! Archive errors

use std::io;

/// Errors from reading, rewriting or converting archives
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("prefix dir {0:?} must have a trailing /")]
    InvalidPrefix(String),

    #[error("invalid exclusion pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex_lite::Error,
    },

    #[error("invalid glob: {0}")]
    Glob(#[from] globset::Error),

    #[error("zip error: {0}")]
    Zip(#[from] ::zip::result::ZipError),

    #[error("no file matching {0:?} in archive")]
    NoMatch(String),

    #[error("gzip file is not a single stream: trailing data after the first member")]
    MultiStream,
}
