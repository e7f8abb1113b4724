//! gzip framing helpers for tar streams

use std::io::{self, BufRead, BufReader, Read, Write};

use flate2::bufread;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};

use crate::ArchiveError;

/// A tar reader over a gzip-compressed stream
pub fn tgz_reader<R: Read>(r: R) -> Archive<GzDecoder<R>> {
    Archive::new(GzDecoder::new(r))
}

/// A tar builder that gzip-compresses its output
pub fn tgz_writer<W: Write>(w: W) -> Builder<GzEncoder<W>> {
    Builder::new(GzEncoder::new(w, Compression::default()))
}

/// Write the tar footer and the gzip trailer, returning the inner writer
pub fn finish_tgz<W: Write>(builder: Builder<GzEncoder<W>>) -> io::Result<W> {
    builder.into_inner()?.finish()
}

/// Check that `r` holds exactly one gzip member and nothing after it
///
/// Some decompressors stop after the first member, so a multi-member file
/// would silently lose everything past it. The whole stream is decoded to
/// also catch corruption inside the member.
pub fn verify_single_stream<R: Read>(r: R) -> Result<(), ArchiveError> {
    let mut buffered = BufReader::new(r);
    {
        let mut member = bufread::GzDecoder::new(&mut buffered);
        io::copy(&mut member, &mut io::sink())?;
    }
    if buffered.fill_buf()?.is_empty() {
        Ok(())
    } else {
        Err(ArchiveError::MultiStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_single_member_passes() {
        verify_single_stream(gzip(b"one member").as_slice()).unwrap();
    }

    #[test]
    fn test_concatenated_members_rejected() {
        let mut data = gzip(b"first");
        data.extend(gzip(b"second"));
        let err = verify_single_stream(data.as_slice()).unwrap_err();
        assert!(matches!(err, ArchiveError::MultiStream));
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut data = gzip(b"payload");
        data.extend_from_slice(b"junk");
        assert!(matches!(
            verify_single_stream(data.as_slice()),
            Err(ArchiveError::MultiStream)
        ));
    }

    #[test]
    fn test_truncated_member_is_io_error() {
        let data = gzip(&[7u8; 4096]);
        let truncated = &data[..data.len() / 2];
        assert!(matches!(verify_single_stream(truncated), Err(ArchiveError::Io(_))));
    }

    #[test]
    fn test_tgz_writer_and_reader_agree() {
        let mut builder = tgz_writer(Vec::new());
        crate::write_synthetic_file(&mut builder, "go/VERSION", b"go1.22.1", 0o644).unwrap();
        let bytes = finish_tgz(builder).unwrap();

        verify_single_stream(bytes.as_slice()).unwrap();
        let mut archive = tgz_reader(bytes.as_slice());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| String::from_utf8_lossy(&e.unwrap().path_bytes()).into_owned())
            .collect();
        assert_eq!(names, vec!["go/VERSION".to_string()]);
    }
}
