//! In-memory file tree of a mock agent

use std::collections::BTreeMap;
use std::io::{self, Read};

use gorelease_archive::{finish_tgz, tgz_reader, tgz_writer};
use tar::{EntryType, Header};

const MTIME: u64 = 1_700_000_000;

/// A file or directory in a [`MockFs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockNode {
    pub data: Vec<u8>,
    pub mode: u32,
    pub is_dir: bool,
}

/// Work directory contents, keyed by `/`-separated relative path
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    nodes: BTreeMap<String, MockNode>,
}

fn join(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    let name = name.trim_start_matches("./").trim_matches('/');
    match (dir.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => dir.to_string(),
        (false, false) => format!("{}/{}", dir, name),
    }
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a regular file, creating parent directories
    pub fn write(&mut self, path: &str, data: impl Into<Vec<u8>>, mode: u32) {
        let path = join("", path);
        self.add_parents(&path);
        self.nodes.insert(
            path,
            MockNode {
                data: data.into(),
                mode,
                is_dir: false,
            },
        );
    }

    pub fn mkdir(&mut self, path: &str) {
        let path = join("", path);
        if path.is_empty() {
            return;
        }
        self.add_parents(&path);
        self.nodes.entry(path).or_insert_with(|| MockNode {
            data: Vec::new(),
            mode: 0o755,
            is_dir: true,
        });
    }

    fn add_parents(&mut self, path: &str) {
        for (idx, _) in path.match_indices('/') {
            self.nodes.entry(path[..idx].to_string()).or_insert_with(|| MockNode {
                data: Vec::new(),
                mode: 0o755,
                is_dir: true,
            });
        }
    }

    /// Contents of a regular file
    pub fn read(&self, path: &str) -> Option<&[u8]> {
        self.nodes
            .get(&join("", path))
            .filter(|node| !node.is_dir)
            .map(|node| node.data.as_slice())
    }

    pub fn mode(&self, path: &str) -> Option<u32> {
        self.nodes.get(&join("", path)).map(|node| node.mode)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&join("", path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.nodes.get(&join("", path)).map_or(false, |node| node.is_dir)
    }

    /// Every path, directories included, in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Unpack a gzip tar under `dir`
    pub fn unpack_tgz(&mut self, tgz: impl Read, dir: &str) -> io::Result<()> {
        self.mkdir(dir);
        let mut archive = tgz_reader(tgz);
        for entry in archive.entries()? {
            let mut entry = entry?;
            let path = join(dir, &String::from_utf8_lossy(&entry.path_bytes()));
            if path.is_empty() {
                continue;
            }
            let mode = entry.header().mode()?;
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                self.mkdir(&path);
            } else if kind.is_file() {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                self.write(&path, data, mode);
            }
        }
        Ok(())
    }

    /// Pack everything under `dir` as a gzip tar, names relative to `dir`
    pub fn pack_tgz(&self, dir: &str) -> io::Result<Vec<u8>> {
        let dir = join("", dir);
        let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };

        let mut builder = tgz_writer(Vec::new());
        for (path, node) in &self.nodes {
            let Some(rel) = path.strip_prefix(&prefix) else {
                continue;
            };
            let mut header = Header::new_gnu();
            header.set_mode(node.mode);
            header.set_mtime(MTIME);
            if node.is_dir {
                header.set_entry_type(EntryType::Directory);
                header.set_size(0);
                builder.append_data(&mut header, format!("{}/", rel), io::empty())?;
            } else {
                header.set_entry_type(EntryType::Regular);
                header.set_size(node.data.len() as u64);
                builder.append_data(&mut header, rel, node.data.as_slice())?;
            }
        }
        finish_tgz(builder)
    }
}
