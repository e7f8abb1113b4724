//! Release orchestration
//!
//! Per target: build the binary archive on the target's builder, then fan
//! out installer, zip and test branches over independent readers of the
//! staged archive, and commit the target's staged files only once every
//! branch has succeeded. Any failure leaves the staged files where they are.
//!
//! [`Orchestrator::release`] builds the source archive once and runs each
//! target on its own coordinating thread.

mod fanout;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use gorelease_agent::{AgentPool, CancelToken};
use gorelease_archive::{convert_tgz_to_zip, verify_single_stream};
use tracing::Span;

use crate::blob::ArchiveBlob;
use crate::catalog::{CatalogError, Target, TargetCatalog};
use crate::config::ReleaseConfig;
use crate::manifest::ReleaseFile;
use crate::session::RemoteSession;
use crate::stages::{build_binary, build_installer, run_tests, write_source_archive, Stage, StageError};
use crate::staging::{commit, StagedFile, StagingArea};

pub use fanout::{run_fanout, Branch};

/// Label used in place of a target name for the source archive
pub const SOURCE_LABEL: &str = "src";

/// A stage failure with the target and stage it happened in
#[derive(Debug, thiserror::Error)]
#[error("{target}: {stage} failed: {source}")]
pub struct ReleaseError {
    pub target: String,
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl ReleaseError {
    pub fn new(target: impl Into<String>, stage: Stage, source: impl Into<StageError>) -> Self {
        Self {
            target: target.into(),
            stage,
            source: source.into(),
        }
    }

    /// Process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        match self.source {
            StageError::Catalog(_) | StageError::MissingRecipe(_) => 1,
            StageError::Agent(_) => 20,
            StageError::Remote { .. } => 40,
            StageError::Archive(_) | StageError::Io(_) | StageError::Staging(_) => 70,
            StageError::Cancelled => 80,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.source.is_cancelled()
    }
}

/// Outcome of one target
#[derive(Debug)]
pub struct TargetResult {
    pub target: String,
    pub outcome: Result<Vec<ReleaseFile>, ReleaseError>,
}

/// Outcome of a whole run
#[derive(Debug)]
pub struct ReleaseReport {
    pub version: String,
    pub source: ReleaseFile,
    /// In the order the targets were given
    pub targets: Vec<TargetResult>,
}

impl ReleaseReport {
    pub fn is_success(&self) -> bool {
        self.targets.iter().all(|t| t.outcome.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReleaseError> {
        self.targets.iter().filter_map(|t| t.outcome.as_ref().err())
    }

    /// Every committed file, source archive first
    pub fn files(&self) -> Vec<ReleaseFile> {
        let mut files = vec![self.source.clone()];
        for result in &self.targets {
            if let Ok(committed) = &result.outcome {
                files.extend(committed.iter().cloned());
            }
        }
        files
    }

    /// 0 when every target committed, otherwise the highest failure code
    pub fn exit_code(&self) -> i32 {
        self.failures().map(ReleaseError::exit_code).max().unwrap_or(0)
    }
}

pub struct Orchestrator {
    pool: Arc<dyn AgentPool>,
    catalog: Arc<dyn TargetCatalog>,
    config: ReleaseConfig,
    cancel: CancelToken,
    staging: StagingArea,
}

impl Orchestrator {
    /// Prepare the staging directory; nothing runs until a release call
    pub fn new(
        pool: Arc<dyn AgentPool>,
        catalog: Arc<dyn TargetCatalog>,
        config: ReleaseConfig,
        cancel: CancelToken,
    ) -> Result<Self, ReleaseError> {
        let staging = StagingArea::new(config.staging_dir(), config.version.clone())
            .map_err(|e| ReleaseError::new(SOURCE_LABEL, Stage::Source, e))?;
        tracing::info!(
            version = %config.version,
            staging_dir = %staging.dir().display(),
            output_dir = %config.output_dir.display(),
            "release prepared"
        );
        Ok(Self {
            pool,
            catalog,
            config,
            cancel,
            staging,
        })
    }

    pub fn config(&self) -> &ReleaseConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn catalog(&self) -> &dyn TargetCatalog {
        &*self.catalog
    }

    /// Build and commit `<version>.src.tar.gz` from a revision tarball
    pub fn build_source(&self, revision: &mut dyn Read) -> Result<PathBuf, ReleaseError> {
        let fail = |e: StageError| ReleaseError::new(SOURCE_LABEL, Stage::Source, e);
        let span = tracing::info_span!("release", target = SOURCE_LABEL);
        let _enter = span.enter();

        self.cancel.check().map_err(|e| fail(e.into()))?;
        let mut staged = self.staging.create(SOURCE_LABEL, "tar.gz").map_err(|e| fail(e.into()))?;
        write_staged(&mut staged, |out| write_source_archive(revision, &self.config.version, out)).map_err(fail)?;
        verify_staged(&staged).map_err(fail)?;

        let committed = commit(vec![staged], &self.config.output_dir)
            .map_err(|e| ReleaseError::new(SOURCE_LABEL, Stage::Commit, e))?;
        committed
            .into_iter()
            .next()
            .ok_or_else(|| ReleaseError::new(SOURCE_LABEL, Stage::Commit, StageError::Io(std::io::ErrorKind::NotFound.into())))
    }

    /// Build, package, test and commit one target
    ///
    /// Returns the committed paths: the tar.gz first, then the zip and the
    /// installer when the target has them.
    pub fn release_target(&self, target: &Target, source: &Path) -> Result<Vec<PathBuf>, ReleaseError> {
        let name = target.name.as_str();
        let fail = |stage: Stage| move |e: StageError| ReleaseError::new(name, stage, e);

        self.cancel.check().map_err(|e| fail(Stage::Build)(e.into()))?;

        // Everything that can be checked before the build is checked here
        let installer = match target.installer_kind() {
            Some(kind) => {
                let recipe = self.config.recipe(kind);
                if !recipe.is_configured() {
                    return Err(fail(Stage::Installer)(StageError::MissingRecipe(kind)));
                }
                Some((kind, recipe))
            }
            None => None,
        };
        let run_tests_here = !target.build_only && !self.config.skip_tests;
        let builder = self.catalog.builder(&target.builder).map_err(|e| fail(Stage::Build)(e.into()))?;
        let long_builder = match target.long_test_builder() {
            Some(long) if run_tests_here => {
                Some(self.catalog.builder(long).map_err(|e| fail(Stage::LongTest)(e.into()))?)
            }
            _ => None,
        };

        // Binary build
        let mut tgz = self.staging.create(name, "tar.gz").map_err(|e| fail(Stage::Build)(e.into()))?;
        {
            let mut session = RemoteSession::open(&*self.pool, &builder, &self.cancel, self.config.watch)
                .map_err(fail(Stage::Build))?;
            let mut source = File::open(source).map_err(|e| fail(Stage::Build)(e.into()))?;
            let opts = self.config.binary_options();
            write_staged(&mut tgz, |out| build_binary(&mut session, target, &mut source, &opts, out))
                .map_err(fail(Stage::Build))?;
            session.close().map_err(fail(Stage::Build))?;
        }
        verify_staged(&tgz).map_err(fail(Stage::Build))?;
        let blob = ArchiveBlob::open(tgz.path()).map_err(|e| fail(Stage::Build)(e.into()))?;
        tracing::info!(size = blob.len(), "binary archive staged");

        // Fan-out
        let mut zip = if target.wants_zip() {
            Some(self.staging.create(name, "zip").map_err(|e| fail(Stage::Zip)(e.into()))?)
        } else {
            None
        };
        let mut installer_file = match installer {
            Some((kind, _)) => Some(
                self.staging
                    .create(name, kind.extension())
                    .map_err(|e| fail(Stage::Installer)(e.into()))?,
            ),
            None => None,
        };

        let pool: &dyn AgentPool = &*self.pool;
        let watch = self.config.watch;
        let version = self.config.version.as_str();
        let bootstrap_dir = self.config.bootstrap_dir.as_str();
        let mut branches = Vec::new();

        if let (Some((kind, recipe)), Some(staged)) = (installer, installer_file.as_mut()) {
            let mut reader = blob.reader();
            let builder = &builder;
            branches.push(Branch::new(Stage::Installer, move |cancel: &CancelToken| {
                let mut session = RemoteSession::open(pool, builder, cancel, watch)?;
                write_staged(staged, |mut out| {
                    build_installer(&mut session, target, kind, recipe, version, &mut reader, &mut out)?;
                    Ok(out)
                })?;
                session.close()
            }));
        }

        if let Some(staged) = zip.as_mut() {
            let reader = blob.reader();
            branches.push(Branch::new(Stage::Zip, move |cancel: &CancelToken| {
                cancel.check()?;
                let file = staged.file()?;
                let mut out = convert_tgz_to_zip(reader, BufWriter::new(file))?;
                out.flush()?;
                cancel.check()?;
                Ok(())
            }));
        }

        if run_tests_here {
            let tests = std::iter::once((Stage::Test, &builder)).chain(long_builder.as_ref().map(|b| (Stage::LongTest, b)));
            for (stage, test_builder) in tests {
                let mut reader = blob.reader();
                branches.push(Branch::new(stage, move |cancel: &CancelToken| {
                    let mut session = RemoteSession::open(pool, test_builder, cancel, watch)?;
                    run_tests(&mut session, target, &mut reader, bootstrap_dir)?;
                    session.close()
                }));
            }
        }

        tracing::info!(branches = branches.len(), "fanning out");
        run_fanout(&self.cancel, branches).map_err(|(stage, e)| fail(stage)(e))?;
        drop(blob);

        // Commit
        let batch: Vec<StagedFile> = std::iter::once(tgz).chain(zip).chain(installer_file).collect();
        let committed = commit(batch, &self.config.output_dir).map_err(|e| fail(Stage::Commit)(e.into()))?;
        tracing::info!(files = committed.len(), "target committed");
        Ok(committed)
    }

    /// Build the source archive, then release every target concurrently
    ///
    /// A source failure stops the run. Target failures are collected in the
    /// report and do not affect other targets. A target named twice is
    /// rejected before anything is built, since both would commit to the same
    /// final names.
    pub fn release(&self, revision: &mut dyn Read, targets: &[Target]) -> Result<ReleaseReport, ReleaseError> {
        let mut seen = HashSet::new();
        if let Some(dup) = targets.iter().find(|t| !seen.insert(t.name.as_str())) {
            return Err(ReleaseError::new(
                dup.name.as_str(),
                Stage::Source,
                CatalogError::DuplicateTarget(dup.name.clone()),
            ));
        }

        let source_path = self.build_source(revision)?;
        let version = self.config.version.as_str();
        let source = ReleaseFile::describe(&source_path, version, None)
            .map_err(|e| ReleaseError::new(SOURCE_LABEL, Stage::Commit, e))?;

        let span = Span::current();
        let results: Vec<TargetResult> = thread::scope(|scope| {
            let handles: Vec<_> = targets
                .iter()
                .map(|target| {
                    let span = &span;
                    let source_path = &source_path;
                    scope.spawn(move || {
                        let target_span = tracing::info_span!(parent: span, "release", target = %target.name);
                        let _enter = target_span.enter();
                        self.release_and_describe(target, source_path)
                    })
                })
                .collect();

            handles
                .into_iter()
                .zip(targets)
                .map(|(handle, target)| {
                    let outcome = match handle.join() {
                        Ok(outcome) => outcome,
                        Err(panic) => std::panic::resume_unwind(panic),
                    };
                    if let Err(ref err) = outcome {
                        tracing::error!(target = %err.target, stage = %err.stage, error = %err.source, "target failed");
                    }
                    TargetResult {
                        target: target.name.clone(),
                        outcome,
                    }
                })
                .collect()
        });

        Ok(ReleaseReport {
            version: version.to_string(),
            source,
            targets: results,
        })
    }

    fn release_and_describe(&self, target: &Target, source: &Path) -> Result<Vec<ReleaseFile>, ReleaseError> {
        let committed = self.release_target(target, source)?;
        committed
            .iter()
            .map(|path| {
                ReleaseFile::describe(path, &self.config.version, Some(target))
                    .map_err(|e| ReleaseError::new(target.name.as_str(), Stage::Commit, e))
            })
            .collect()
    }
}

/// Run `write` against a buffered writer over the staged file, then flush and close it
fn write_staged<F>(staged: &mut StagedFile, write: F) -> Result<(), StageError>
where
    F: FnOnce(BufWriter<&mut File>) -> Result<BufWriter<&mut File>, StageError>,
{
    {
        let file = staged.file()?;
        let mut out = write(BufWriter::new(file))?;
        out.flush()?;
    }
    staged.close()?;
    Ok(())
}

/// A staged `.tar.gz` must be exactly one gzip member
fn verify_staged(staged: &StagedFile) -> Result<(), StageError> {
    verify_single_stream(staged.open_read()?)?;
    Ok(())
}
