//! tar.gz to zip re-encoding

use std::io::{self, Read, Seek, Write};

use chrono::{DateTime, Datelike, Timelike};
use tar::EntryType;
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

use crate::{tgz_reader, ArchiveError, EntryHeader};

const PRECOMPRESSED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif"];

/// Re-encode a gzip-compressed tar stream as a zip archive
///
/// Entry names, modes and modification times carry over. Directories and
/// already-compressed images are stored; everything else is deflated.
/// Returns the finished zip writer.
pub fn convert_tgz_to_zip<R: Read, W: Write + Seek>(tgz: R, out: W) -> Result<W, ArchiveError> {
    let mut archive = tgz_reader(tgz);
    let mut zip = zip::ZipWriter::new(out);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let header = EntryHeader::from_entry(&entry)?;
        let options = file_options(&header);

        match header.entry_type {
            EntryType::Directory => zip.add_directory(header.name.as_str(), options)?,
            EntryType::Symlink => {
                let target = header.link_name.clone().unwrap_or_default();
                zip.add_symlink(header.name.as_str(), target, options)?;
            }
            _ => {
                zip.start_file(header.name.as_str(), options)?;
                io::copy(&mut entry, &mut zip)?;
            }
        }
    }

    Ok(zip.finish()?)
}

fn file_options(header: &EntryHeader) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(compression_for(header))
        .unix_permissions(header.mode)
        .last_modified_time(zip_time(header.mtime))
        .large_file(header.size >= u64::from(u32::MAX))
}

fn compression_for(header: &EntryHeader) -> CompressionMethod {
    if header.is_dir() {
        return CompressionMethod::Stored;
    }
    let extension = header
        .name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension {
        Some(ext) if !ext.contains('/') && PRECOMPRESSED_EXTENSIONS.contains(&ext.as_str()) => {
            CompressionMethod::Stored
        }
        _ => CompressionMethod::Deflated,
    }
}

/// Zip timestamps are local DOS times starting in 1980; out of range clamps to the epoch
fn zip_time(mtime: u64) -> zip::DateTime {
    let Some(time) = i64::try_from(mtime)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
    else {
        return zip::DateTime::default();
    };
    let (Ok(year), Ok(month), Ok(day), Ok(hour), Ok(minute), Ok(second)) = (
        u16::try_from(time.year()),
        u8::try_from(time.month()),
        u8::try_from(time.day()),
        u8::try_from(time.hour()),
        u8::try_from(time.minute()),
        u8::try_from(time.second()),
    ) else {
        return zip::DateTime::default();
    };
    zip::DateTime::from_date_and_time(year, month, day, hour, minute, second).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{finish_tgz, tgz_writer};
    use std::io::Cursor;
    use zip::ZipArchive;

    fn tgz(entries: &[EntryHeader], bodies: &[&[u8]]) -> Vec<u8> {
        let mut builder = tgz_writer(Vec::new());
        for (header, body) in entries.iter().zip(bodies) {
            header.append(&mut builder, *body).unwrap();
        }
        finish_tgz(builder).unwrap()
    }

    fn sample() -> Vec<u8> {
        let mut link = EntryHeader::file("go/bin/gofmt-link", 0, 0o777, 1_700_000_000);
        link.entry_type = EntryType::Symlink;
        link.link_name = Some("gofmt".to_string());

        tgz(
            &[
                EntryHeader::directory("go/", 1_700_000_000),
                EntryHeader::file("go/bin/go.exe", 6, 0o755, 1_700_000_000),
                EntryHeader::file("go/doc/gopher.PNG", 4, 0o644, 1_700_000_000),
                EntryHeader::file("go/README.md", 5, 0o644, 1_700_000_000),
                link,
            ],
            &[b"", b"MZexec", b"\x89PNG", b"hello", b""],
        )
    }

    #[test]
    fn test_convert_preserves_entries_and_content() {
        let zip = convert_tgz_to_zip(sample().as_slice(), Cursor::new(Vec::new())).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(zip.into_inner())).unwrap();

        let names: Vec<_> = archive.file_names().map(str::to_string).collect();
        assert_eq!(names.len(), 5);
        assert!(names.contains(&"go/".to_string()));

        let mut exe = archive.by_name("go/bin/go.exe").unwrap();
        assert_eq!(exe.compression(), CompressionMethod::Deflated);
        assert_eq!(exe.unix_mode().map(|m| m & 0o777), Some(0o755));
        let mut body = Vec::new();
        exe.read_to_end(&mut body).unwrap();
        assert_eq!(body, b"MZexec");
    }

    #[test]
    fn test_images_and_directories_are_stored() {
        let zip = convert_tgz_to_zip(sample().as_slice(), Cursor::new(Vec::new())).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(zip.into_inner())).unwrap();

        assert_eq!(archive.by_name("go/doc/gopher.PNG").unwrap().compression(), CompressionMethod::Stored);
        assert_eq!(archive.by_name("go/").unwrap().compression(), CompressionMethod::Stored);
        assert!(archive.by_name("go/").unwrap().is_dir());
        assert_eq!(archive.by_name("go/README.md").unwrap().compression(), CompressionMethod::Deflated);
    }

    #[test]
    fn test_modification_time_carries_over() {
        let zip = convert_tgz_to_zip(sample().as_slice(), Cursor::new(Vec::new())).unwrap();
        let mut archive = ZipArchive::new(Cursor::new(zip.into_inner())).unwrap();

        // 1_700_000_000 is 2023-11-14 22:13:20 UTC
        let modified = archive.by_name("go/README.md").unwrap().last_modified().unwrap();
        assert_eq!(modified.year(), 2023);
        assert_eq!(modified.month(), 11);
        assert_eq!(modified.day(), 14);
        assert_eq!(modified.hour(), 22);
        assert_eq!(modified.minute(), 13);
    }

    #[test]
    fn test_extension_detection_ignores_directories_with_dots() {
        let header = EntryHeader::file("go/misc/foo.png/README", 1, 0o644, 0);
        assert_eq!(compression_for(&header), CompressionMethod::Deflated);
        let header = EntryHeader::file("go/favicon.jpeg", 1, 0o644, 0);
        assert_eq!(compression_for(&header), CompressionMethod::Stored);
    }

    #[test]
    fn test_pre_epoch_time_clamps() {
        assert_eq!(zip_time(0), zip::DateTime::default());
    }

    #[test]
    fn test_not_gzip_is_an_error() {
        let err = convert_tgz_to_zip(&b"plain text"[..], Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, ArchiveError::Io(_)));
    }
}
