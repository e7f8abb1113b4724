//! Staged output files and the commit step
//!
//! Every output is first written to
//! `<version>.<label>.<kind>.release-staging-<random>` inside the staging
//! directory. Committing renames a whole batch to the names with the
//! `.release-staging-<random>` suffix removed, in the output directory.
//!
//! A batch is checked up front (every staged file present, every final name
//! free and unique) before the first rename. Renames then run in order and
//! are not rolled back: if one fails, the files already moved stay at their
//! final names and are reported in the error.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Separator between a final name and the random staging suffix
pub const STAGING_MARKER: &str = ".release-staging-";

const SUFFIX_LEN: usize = 12;
const CREATE_ATTEMPTS: usize = 8;

/// Staging and commit errors
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to prepare staging directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create staged file in {dir}: {source}")]
    Create {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Staged file {0} is missing")]
    Missing(PathBuf),

    #[error("Refusing to overwrite existing release file {0}")]
    DestinationExists(PathBuf),

    #[error("Two staged files commit to the same name {0}")]
    DuplicateFinalName(String),

    #[error("Failed to rename {from} to {to} ({} file(s) already committed): {source}", .committed.len())]
    Rename {
        from: PathBuf,
        to: PathBuf,
        committed: Vec<PathBuf>,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Final file name for a staged file name
///
/// # Panics
///
/// If `staged` does not end in `.release-staging-<alphanumeric>`. Staged
/// names are only ever produced by [`StagingArea::create`], so a mismatch is
/// a bug, not an operator error.
pub fn final_name(staged: &str) -> &str {
    let idx = staged.rfind(STAGING_MARKER).filter(|&idx| idx > 0);
    let suffix_ok = idx.map_or(false, |idx| {
        let suffix = &staged[idx + STAGING_MARKER.len()..];
        !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric())
    });
    match idx {
        Some(idx) if suffix_ok => &staged[..idx],
        _ => panic!("malformed staged file name {:?}", staged),
    }
}

/// Directory holding one run's staged files
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    version: String,
}

impl StagingArea {
    /// Use `dir` (created if missing) for files of release `version`
    pub fn new(dir: impl Into<PathBuf>, version: impl Into<String>) -> Result<Self, StagingError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| StagingError::Directory {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            version: version.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Create a fresh staged file for `<version>.<label>.<kind>`
    ///
    /// `label` is a target name or `src`; `kind` is the file extension
    /// (`tar.gz`, `zip`, `msi`, ...).
    pub fn create(&self, label: &str, kind: &str) -> Result<StagedFile, StagingError> {
        let base = format!("{}.{}.{}", self.version, label, kind);
        let mut last_err = None;
        for _ in 0..CREATE_ATTEMPTS {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(SUFFIX_LEN)
                .map(char::from)
                .collect();
            let path = self.dir.join(format!("{}{}{}", base, STAGING_MARKER, suffix));
            match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
                Ok(file) => {
                    tracing::debug!(path = %path.display(), "staged file created");
                    return Ok(StagedFile {
                        path,
                        file: Some(file),
                    });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => last_err = Some(e),
                Err(source) => {
                    return Err(StagingError::Create {
                        dir: self.dir.clone(),
                        source,
                    })
                }
            }
        }
        Err(StagingError::Create {
            dir: self.dir.clone(),
            source: last_err.unwrap_or_else(|| io::Error::from(ErrorKind::AlreadyExists)),
        })
    }
}

/// A not-yet-committed output file, written by exactly one stage
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    file: Option<File>,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The staged file name
    pub fn staged_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// The name this file gets when committed
    pub fn final_name(&self) -> &str {
        final_name(self.staged_name())
    }

    /// Write handle; reopens the file if it was closed
    pub fn file(&mut self) -> io::Result<&mut File> {
        match self.file {
            Some(ref mut file) => Ok(file),
            None => {
                let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
                Ok(self.file.insert(file))
            }
        }
    }

    /// Flush to disk and drop the write handle
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.take() {
            file.sync_all()?;
        }
        Ok(())
    }

    /// A fresh read-only handle positioned at the start
    pub fn open_read(&self) -> io::Result<File> {
        File::open(&self.path)
    }
}

/// Rename every file in `batch` into `output_dir` under its final name
///
/// Returns the committed paths in batch order.
pub fn commit(batch: Vec<StagedFile>, output_dir: &Path) -> Result<Vec<PathBuf>, StagingError> {
    let mut planned = Vec::with_capacity(batch.len());
    let mut names = HashSet::new();
    for mut staged in batch {
        staged.close()?;
        if !staged.path.is_file() {
            return Err(StagingError::Missing(staged.path));
        }
        let name = staged.final_name().to_string();
        if !names.insert(name.clone()) {
            return Err(StagingError::DuplicateFinalName(name));
        }
        let dest = output_dir.join(&name);
        if dest.exists() {
            return Err(StagingError::DestinationExists(dest));
        }
        planned.push((staged.path, dest));
    }

    fs::create_dir_all(output_dir).map_err(|source| StagingError::Directory {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let mut committed = Vec::with_capacity(planned.len());
    for (from, to) in planned {
        tracing::info!(from = %from.display(), to = %to.display(), "committing release file");
        if let Err(source) = fs::rename(&from, &to) {
            tracing::error!(
                from = %from.display(),
                error = %source,
                committed = ?committed,
                "rename failed; files already committed are left in place"
            );
            return Err(StagingError::Rename {
                from,
                to,
                committed,
                source,
            });
        }
        committed.push(to);
    }

    Ok(committed)
}
