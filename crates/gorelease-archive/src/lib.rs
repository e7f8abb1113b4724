//! Archive handling for Go release builds
//!
//! Streams toolchain tarballs from one tar writer to another while an
//! ordered chain of per-entry adjustments drops or rewrites headers, and
//! provides the conversions the release pipeline needs around that:
//! tar.gz to zip, single-file extraction, and gzip stream verification.

mod adjust;
mod convert;
mod error;
mod extract;
mod gzip;
mod header;
mod transform;

pub use adjust::{
    is_cross_compile_builder, Adjust, DropPatterns, DropUnwantedSysos, FixPermissions,
    FixupCrossCompile, DEFAULT_DROP_PATTERNS, DEFAULT_HOST_OSARCH,
};
pub use convert::convert_tgz_to_zip;
pub use error::ArchiveError;
pub use extract::extract_file;
pub use gzip::{finish_tgz, tgz_reader, tgz_writer, verify_single_stream};
pub use header::EntryHeader;
pub use transform::{adjust_tar, write_synthetic_file, TransformStats};
