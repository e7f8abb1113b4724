//! Release manifest (per-file checksums of committed output)
//!
//! Each committed file is described by a [`ReleaseFile`]; a run's records
//! are written together as one JSON document for the upload step.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::Target;

/// Schema identifier for the manifest
pub const MANIFEST_SCHEMA_ID: &str = "gorelease/manifest@1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// tar.gz or zip toolchain archive
    Archive,
    /// msi or pkg
    Installer,
    Source,
}

impl FileKind {
    /// Kind of a committed file, from its name
    pub fn from_filename(name: &str) -> Self {
        if name.ends_with(".src.tar.gz") {
            FileKind::Source
        } else if name.ends_with(".msi") || name.ends_with(".pkg") {
            FileKind::Installer
        } else {
            FileKind::Archive
        }
    }
}

/// One committed release file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub filename: String,
    /// Empty for the source archive
    pub os: String,
    pub arch: String,
    pub version: String,
    pub sha256: String,
    pub size: u64,
    pub kind: FileKind,
}

impl ReleaseFile {
    /// Describe the committed file at `path`
    ///
    /// `target` is `None` for the source archive.
    pub fn describe(path: &Path, version: &str, target: Option<&Target>) -> io::Result<Self> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("no file name: {}", path.display())))?
            .to_string();
        let (sha256, size) = sha256_file(path)?;
        let (os, arch) = match target {
            Some(t) => (t.goos.clone(), t.goarch.clone()),
            None => (String::new(), String::new()),
        };

        Ok(Self {
            kind: FileKind::from_filename(&filename),
            filename,
            os,
            arch,
            version: version.to_string(),
            sha256,
            size,
        })
    }
}

/// Stream a file through SHA-256, returning the hex digest and byte count
pub fn sha256_file(path: &Path) -> io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), size))
}

/// Every file committed by one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseManifest {
    pub schema_id: String,
    pub created_at: String,
    pub version: String,
    /// Sorted by filename
    pub files: Vec<ReleaseFile>,
}

impl ReleaseManifest {
    pub fn new(version: &str, mut files: Vec<ReleaseFile>) -> Self {
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Self {
            schema_id: MANIFEST_SCHEMA_ID.to_string(),
            created_at: Utc::now().to_rfc3339(),
            version: version.to_string(),
            files,
        }
    }

    /// Write with write-then-rename so readers never see a partial file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("no file name: {}", path.display())))?;
        let temp_path = path.with_file_name(format!(".{}.tmp", file_name));

        fs::write(&temp_path, json)?;
        fs::rename(&temp_path, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_kind_from_filename() {
        assert_eq!(FileKind::from_filename("go1.22.1.src.tar.gz"), FileKind::Source);
        assert_eq!(FileKind::from_filename("go1.22.1.windows-amd64.msi"), FileKind::Installer);
        assert_eq!(FileKind::from_filename("go1.22.1.darwin-arm64.pkg"), FileKind::Installer);
        assert_eq!(FileKind::from_filename("go1.22.1.windows-amd64.zip"), FileKind::Archive);
        assert_eq!(FileKind::from_filename("go1.22.1.linux-amd64.tar.gz"), FileKind::Archive);
    }

    #[test]
    fn test_describe_hashes_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("go1.22.1.linux-amd64.tar.gz");
        fs::write(&path, b"hello").unwrap();
        let target = Target::new("linux-amd64", "linux", "amd64", "b");

        let file = ReleaseFile::describe(&path, "go1.22.1", Some(&target)).unwrap();

        assert_eq!(file.filename, "go1.22.1.linux-amd64.tar.gz");
        assert_eq!(file.os, "linux");
        assert_eq!(file.arch, "amd64");
        assert_eq!(file.size, 5);
        assert_eq!(
            file.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(file.kind, FileKind::Archive);
    }

    #[test]
    fn test_manifest_written_sorted() {
        let dir = TempDir::new().unwrap();
        let record = |name: &str| ReleaseFile {
            filename: name.to_string(),
            os: String::new(),
            arch: String::new(),
            version: "go1.22.1".to_string(),
            sha256: String::new(),
            size: 0,
            kind: FileKind::from_filename(name),
        };
        let manifest = ReleaseManifest::new(
            "go1.22.1",
            vec![record("go1.22.1.windows-amd64.zip"), record("go1.22.1.src.tar.gz")],
        );
        let path = dir.path().join("manifest.json");
        manifest.write_to_file(&path).unwrap();

        let parsed: ReleaseManifest = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.schema_id, MANIFEST_SCHEMA_ID);
        assert_eq!(parsed.files[0].filename, "go1.22.1.src.tar.gz");
        assert_eq!(parsed.files[0].kind, FileKind::Source);
        assert!(!dir.path().join(".manifest.json.tmp").exists());
    }
}
