//! Concurrent readers over a committed binary archive

mod fixtures;

use std::io::{self, Cursor, Read};
use std::thread;

use fixtures::{catalog, read_tgz, sha256_hex, Harness, VERSION};
use gorelease::blob::ArchiveBlob;
use gorelease::catalog::TargetCatalog;
use gorelease_archive::{convert_tgz_to_zip, extract_file};
use sha2::{Digest, Sha256};

fn hash_reader(mut reader: impl Read) -> String {
    let mut hasher = Sha256::new();
    io::copy(&mut reader, &mut hasher).unwrap();
    hex::encode(hasher.finalize())
}

#[test]
fn test_parallel_readers_see_identical_bytes() {
    let h = Harness::new();
    let orchestrator = h.orchestrator();
    let source = h.source(&orchestrator);
    let target = catalog().lookup(VERSION, "linux-amd64").unwrap();
    let committed = orchestrator.release_target(&target, &source).unwrap();

    let path = &committed[0];
    let expected = sha256_hex(&std::fs::read(path).unwrap());
    let expected_entries = read_tgz(path).len();
    let blob = ArchiveBlob::open(path).unwrap();

    let (hashes, zip_entries, version) = thread::scope(|scope| {
        let hashers: Vec<_> = (0..4)
            .map(|_| {
                let reader = blob.reader();
                scope.spawn(move || hash_reader(reader))
            })
            .collect();
        let zipper = {
            let reader = blob.reader();
            scope.spawn(move || {
                let out = convert_tgz_to_zip(reader, Cursor::new(Vec::new())).unwrap();
                zip::ZipArchive::new(Cursor::new(out.into_inner())).unwrap().len()
            })
        };
        let extractor = {
            let reader = blob.reader();
            scope.spawn(move || {
                let mut version = Vec::new();
                extract_file(reader, &mut version, "go/VERSION").unwrap();
                version
            })
        };

        let hashes: Vec<String> = hashers.into_iter().map(|h| h.join().unwrap()).collect();
        (hashes, zipper.join().unwrap(), extractor.join().unwrap())
    });

    assert!(hashes.iter().all(|h| *h == expected));
    assert_eq!(zip_entries, expected_entries);
    assert_eq!(version, VERSION.as_bytes());
}
