//! Source archive stage

use std::io::{Read, Write};

use gorelease_archive::{
    adjust_tar, finish_tgz, tgz_reader, tgz_writer, write_synthetic_file, Adjust, DropPatterns, FixPermissions,
};

use super::{StageError, GO_DIR};

/// Build the source archive from a revision tarball
///
/// The output starts with a synthetic `go/VERSION` holding `version`, then
/// the repository tree under `go/`. A tracked `VERSION` file is dropped in
/// favour of the synthetic one.
pub fn write_source_archive<R: Read, W: Write>(revision_tgz: R, version: &str, out: W) -> Result<W, StageError> {
    let mut writer = tgz_writer(out);
    write_synthetic_file(&mut writer, &format!("{}/VERSION", GO_DIR), version.as_bytes(), 0o644)?;

    let adjusts: Vec<Box<dyn Adjust>> = vec![
        Box::new(DropPatterns::new(&["VERSION"])?),
        Box::new(DropPatterns::defaults()?),
        Box::new(FixPermissions),
    ];
    let mut reader = tgz_reader(revision_tgz);
    let stats = adjust_tar(&mut reader, &mut writer, &format!("{}/", GO_DIR), &adjusts)?;
    tracing::info!(version, written = stats.written, dropped = stats.dropped, "source archive written");

    Ok(finish_tgz(writer)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tar::{EntryType, Header};

    fn revision(entries: &[(&str, &[u8], u32)]) -> Vec<u8> {
        let mut builder = tgz_writer(Vec::new());
        for (name, data, mode) in entries {
            let mut header = Header::new_gnu();
            header.set_mode(*mode);
            if name.ends_with('/') {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
            } else {
                header.set_size(data.len() as u64);
            }
            builder.append_data(&mut header, name, *data).unwrap();
        }
        finish_tgz(builder).unwrap()
    }

    fn listing(tgz: &[u8]) -> Vec<(String, u32, Vec<u8>)> {
        let mut archive = tgz_reader(tgz);
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let mut entry = entry.unwrap();
                let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
                let mode = entry.header().mode().unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (name, mode, data)
            })
            .collect()
    }

    #[test]
    fn test_synthetic_version_comes_first() {
        let tgz = revision(&[
            ("VERSION", b"devel +abcdef", 0o644),
            ("src/", b"", 0o775),
            ("src/make.bash", b"#!/bin/sh\n", 0o775),
            ("README.md", b"# Go", 0o664),
        ]);

        let out = write_source_archive(tgz.as_slice(), "go1.22.1", Vec::<u8>::new()).unwrap();
        let entries = listing(&out);

        assert_eq!(entries[0].0, "go/VERSION");
        assert_eq!(entries[0].2, b"go1.22.1");
        assert_eq!(entries[0].1, 0o644);
        assert_eq!(entries[1].0, "go/");
        // The tracked VERSION never appears
        assert_eq!(entries.iter().filter(|(name, _, _)| name == "go/VERSION").count(), 1);
    }

    #[test]
    fn test_repository_tree_is_adjusted() {
        let tgz = revision(&[
            (".gitignore", b"bin/\n", 0o644),
            ("src/make.bash", b"#!/bin/sh\n", 0o775),
            ("src/cmd/go/main.go", b"package main", 0o600),
            ("VERSION.cache", b"go1.21", 0o644),
        ]);

        let out = write_source_archive(tgz.as_slice(), "go1.22.1", Vec::<u8>::new()).unwrap();
        let entries = listing(&out);
        let names: Vec<_> = entries.iter().map(|(name, _, _)| name.as_str()).collect();

        assert_eq!(names, vec!["go/VERSION", "go/", "go/src/make.bash", "go/src/cmd/go/main.go"]);
        assert_eq!(entries[2].1, 0o755);
        assert_eq!(entries[3].1, 0o644);
    }
}
