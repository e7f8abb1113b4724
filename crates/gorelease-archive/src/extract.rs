//! Single-file extraction from a tar.gz

use std::io::{self, Read, Write};

use globset::GlobBuilder;

use crate::{tgz_reader, ArchiveError};

/// Copy the first regular entry of a tar.gz whose name matches `glob` into `dest`
///
/// `*` does not cross `/`. Returns the number of bytes copied, or
/// [`ArchiveError::NoMatch`] when the archive ends without a match.
pub fn extract_file<R: Read, W: Write>(tgz: R, dest: &mut W, glob: &str) -> Result<u64, ArchiveError> {
    let matcher = GlobBuilder::new(glob)
        .literal_separator(true)
        .build()?
        .compile_matcher();

    let mut archive = tgz_reader(tgz);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        if matcher.is_match(&name) {
            return Ok(io::copy(&mut entry, dest)?);
        }
    }

    Err(ArchiveError::NoMatch(glob.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{finish_tgz, tgz_writer, write_synthetic_file, EntryHeader};

    fn installer_output() -> Vec<u8> {
        let mut builder = tgz_writer(Vec::new());
        EntryHeader::directory("msi/", 0).append(&mut builder, io::empty()).unwrap();
        write_synthetic_file(&mut builder, "msi/build.log", b"log", 0o644).unwrap();
        write_synthetic_file(&mut builder, "msi/go1.22.windows-amd64.msi", b"MSI-1", 0o644).unwrap();
        write_synthetic_file(&mut builder, "msi/other.msi", b"MSI-2", 0o644).unwrap();
        finish_tgz(builder).unwrap()
    }

    #[test]
    fn test_extracts_first_match() {
        let mut out = Vec::new();
        let n = extract_file(installer_output().as_slice(), &mut out, "msi/*.msi").unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"MSI-1");
    }

    #[test]
    fn test_star_does_not_cross_separator() {
        let mut out = Vec::new();
        let err = extract_file(installer_output().as_slice(), &mut out, "*.msi").unwrap_err();
        assert!(matches!(err, ArchiveError::NoMatch(ref g) if g == "*.msi"));
        assert!(out.is_empty());
    }

    #[test]
    fn test_directories_never_match() {
        let mut out = Vec::new();
        let err = extract_file(installer_output().as_slice(), &mut out, "msi*").unwrap_err();
        assert!(matches!(err, ArchiveError::NoMatch(_)));
    }
}
