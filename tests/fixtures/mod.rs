//! Shared fixtures for release pipeline integration tests
//!
//! - A small Go repository revision tarball
//! - A target catalogue covering windows, darwin, linux and a
//!   cross-compiled build-only target
//! - A [`Harness`] wiring a scripted [`MockPool`] to an orchestrator over
//!   temporary staging and output directories

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gorelease::catalog::TomlCatalog;
use gorelease::config::ReleaseConfig;
use gorelease::mock::MockPool;
use gorelease::Orchestrator;
use gorelease_agent::CancelToken;
use gorelease_archive::{finish_tgz, tgz_reader, tgz_writer};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

pub const VERSION: &str = "go1.22.1";

pub const CATALOG: &str = r#"
[[builder]]
name = "linux-amd64-bullseye"
env = ["GO_BUILDER_NAME=linux-amd64-bullseye"]

[[builder]]
name = "linux-amd64-longtest"

[[builder]]
name = "windows-amd64-2016"

[[builder]]
name = "darwin-arm64-12"
bootstrap_url = "file:///srv/go1.4-darwin-arm64.tar.gz"

[[builder]]
name = "linux-s390x-crosscompile"

[[target]]
name = "linux-amd64"
goos = "linux"
goarch = "amd64"
builder = "linux-amd64-bullseye"
long_test_builder = "linux-amd64-longtest"
race = true

[[target]]
name = "windows-amd64"
goos = "windows"
goarch = "amd64"
builder = "windows-amd64-2016"
long_test_builder = ""

[[target]]
name = "darwin-arm64"
goos = "darwin"
goarch = "arm64"
builder = "darwin-arm64-12"

[[target]]
name = "linux-s390x"
goos = "linux"
goarch = "s390x"
builder = "linux-s390x-crosscompile"
build_only = true
extra_env = ["GOOS=linux", "GOARCH=s390x"]
"#;

pub fn catalog() -> TomlCatalog {
    TomlCatalog::parse(CATALOG).expect("fixture catalog parses")
}

/// Revision tarball as fetched from the repository, entries relative to its root
pub fn revision_tgz() -> Vec<u8> {
    let mut builder = tgz_writer(Vec::new());
    for (name, data, mode) in [
        ("VERSION", &b"devel +abcdef"[..], 0o644),
        (".gitignore", &b"bin/\n"[..], 0o644),
        ("README.md", &b"# The Go Programming Language\n"[..], 0o664),
        ("src/make.bash", &b"#!/usr/bin/env bash\n"[..], 0o775),
        ("src/all.bash", &b"#!/usr/bin/env bash\n"[..], 0o775),
        ("src/runtime/race/race_linux_amd64.syso", &b"syso"[..], 0o644),
        ("src/runtime/race/race_windows_amd64.syso", &b"syso"[..], 0o644),
        ("src/runtime/race/race_darwin_arm64.syso", &b"syso"[..], 0o644),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_mode(mode);
        header.set_size(data.len() as u64);
        header.set_mtime(1_700_000_000);
        builder.append_data(&mut header, name, data).expect("append fixture entry");
    }
    finish_tgz(builder).expect("finish fixture tarball")
}

/// Temporary directories, recipes and a scripted agent pool for one run
pub struct Harness {
    pub dir: TempDir,
    pub pool: MockPool,
    pub config: ReleaseConfig,
}

impl Harness {
    /// Harness with a working Go toolchain mock and both installer recipes configured
    pub fn new() -> Self {
        Self::with_pool(MockPool::go_toolchain())
    }

    pub fn with_pool(pool: MockPool) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let recipes = dir.path().join("recipes");
        fs::create_dir_all(&recipes).expect("recipes dir");
        fs::write(recipes.join("releaselet.go"), b"package main\n").expect("msi recipe");
        fs::write(recipes.join("pkg.bash"), b"#!/bin/bash\n").expect("pkg recipe");

        let mut config = ReleaseConfig::new(VERSION, dir.path().join("out"));
        config.staging_dir = Some(dir.path().join("staging"));
        config.installer.msi.script = Some(recipes.join("releaselet.go"));
        config.installer.pkg.script = Some(recipes.join("pkg.bash"));

        Self { dir, pool, config }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir.clone()
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.config.staging_dir()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(CancelToken::new())
    }

    pub fn orchestrator_with(&self, cancel: CancelToken) -> Orchestrator {
        Orchestrator::new(
            Arc::new(self.pool.clone()),
            Arc::new(catalog()),
            self.config.clone(),
            cancel,
        )
        .expect("orchestrator")
    }

    /// Write the revision tarball's source archive and return its committed path
    pub fn source(&self, orchestrator: &Orchestrator) -> PathBuf {
        let revision = revision_tgz();
        orchestrator
            .build_source(&mut revision.as_slice())
            .expect("source archive")
    }
}

/// Sorted file names directly inside `dir` (empty if it does not exist)
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Every entry of a tar.gz file: name to (mode, content)
pub fn read_tgz(path: &Path) -> BTreeMap<String, (u32, Vec<u8>)> {
    let file = fs::File::open(path).expect("open tgz");
    let mut archive = tgz_reader(file);
    let mut entries = BTreeMap::new();
    for entry in archive.entries().expect("tar entries") {
        let mut entry = entry.expect("tar entry");
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let mode = entry.header().mode().expect("mode");
        let mut data = Vec::new();
        entry.read_to_end(&mut data).expect("entry content");
        entries.insert(name, (mode, data));
    }
    entries
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
