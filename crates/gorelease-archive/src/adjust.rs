//! Per-entry adjustments
//!
//! An adjustment receives an owned header and either returns it (possibly
//! rewritten) or returns `None` to drop the entry and its content.

use regex_lite::Regex;

use crate::{ArchiveError, EntryHeader};

/// Paths that never belong in a shipped toolchain archive
pub const DEFAULT_DROP_PATTERNS: &[&str] = &[
    // .gitattributes, .github, etc.
    r"\..*",
    // A VERSION file is written explicitly.
    r"VERSION\.cache",
    // Build cache left behind by the toolchain build.
    r"pkg/obj/.*",
    // The api checker is rebuilt by all.bash before use.
    r"pkg/tool/[^/]+/api.*",
    // Run dynamically by cmd/dist, never needed pre-built.
    r"pkg/tool/[^/]+/metadata.*",
    // Compiled command packages; users rebuilding cmd/* pay that cost themselves.
    r"pkg/[^/]+/cmd/.*",
    // Editor and installer leftovers on Windows builders.
    r".*\.exe~",
];

/// GOOS_GOARCH of the machine a cross-compiling builder runs on
pub const DEFAULT_HOST_OSARCH: &str = "linux_amd64";

/// A step in the adjustment chain
pub trait Adjust: Send + Sync {
    /// Return the header to keep (possibly modified), or `None` to drop the entry
    fn adjust(&self, header: EntryHeader) -> Option<EntryHeader>;
}

impl<F> Adjust for F
where
    F: Fn(EntryHeader) -> Option<EntryHeader> + Send + Sync,
{
    fn adjust(&self, header: EntryHeader) -> Option<EntryHeader> {
        self(header)
    }
}

/// Drops entries whose full name matches any of a set of patterns
#[derive(Debug, Clone)]
pub struct DropPatterns {
    patterns: Vec<Regex>,
}

impl DropPatterns {
    /// Compile `patterns`, each anchored to match the whole entry name
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ArchiveError> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(&format!("^(?:{})$", pattern)).map_err(|source| ArchiveError::Pattern {
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// The standard release exclusion set
    pub fn defaults() -> Result<Self, ArchiveError> {
        Self::new(DEFAULT_DROP_PATTERNS)
    }

    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(name))
    }
}

impl Adjust for DropPatterns {
    fn adjust(&self, header: EntryHeader) -> Option<EntryHeader> {
        if self.matches(&header.name) {
            None
        } else {
            Some(header)
        }
    }
}

/// Keeps only the race detector runtime object for one GOOS_GOARCH
#[derive(Debug, Clone)]
pub struct DropUnwantedSysos {
    syso: Regex,
    osarch: String,
}

impl DropUnwantedSysos {
    pub fn new(goos: &str, goarch: &str) -> Self {
        Self {
            syso: Regex::new(r"^src/runtime/race/race_(.*?)\.syso$").expect("static regex"),
            osarch: format!("{}_{}", goos, goarch),
        }
    }
}

impl Adjust for DropUnwantedSysos {
    fn adjust(&self, header: EntryHeader) -> Option<EntryHeader> {
        match self.syso.captures(&header.name) {
            Some(caps) if &caps[1] != self.osarch => None,
            _ => Some(header),
        }
    }
}

/// Normalizes permissions to 0755 for directories and executables, 0644 otherwise
#[derive(Debug, Clone, Copy, Default)]
pub struct FixPermissions;

impl Adjust for FixPermissions {
    fn adjust(&self, mut header: EntryHeader) -> Option<EntryHeader> {
        header.mode = if header.is_dir() || header.is_executable() {
            0o755
        } else {
            0o644
        };
        Some(header)
    }
}

/// Relocates cross-compiled binaries and drops build-host artifacts
///
/// A cross-compiling builder leaves the target binaries in `bin/GOOS_GOARCH/`
/// and its own host binaries in `bin/`. The target's move up to `bin/`; the
/// host's, and the host package and tool directories, are dropped.
#[derive(Debug, Clone)]
pub struct FixupCrossCompile {
    target_bin: String,
    host_pkg: String,
    host_tool: String,
}

impl FixupCrossCompile {
    pub fn new(goos: &str, goarch: &str, host_osarch: &str) -> Self {
        Self {
            target_bin: format!("bin/{}_{}", goos, goarch),
            host_pkg: format!("pkg/{}", host_osarch),
            host_tool: format!("pkg/tool/{}", host_osarch),
        }
    }

    /// The adjustment for `builder`, or `None` when it builds natively
    pub fn for_builder(builder: &str, goos: &str, goarch: &str, host_osarch: &str) -> Option<Self> {
        if is_cross_compile_builder(builder) {
            Some(Self::new(goos, goarch, host_osarch))
        } else {
            None
        }
    }
}

/// Builder names ending in `-crosscompile` build for another architecture
pub fn is_cross_compile_builder(builder: &str) -> bool {
    builder.ends_with("-crosscompile")
}

impl Adjust for FixupCrossCompile {
    fn adjust(&self, mut header: EntryHeader) -> Option<EntryHeader> {
        if header.name.starts_with("bin/") {
            if !header.name.starts_with(&self.target_bin) {
                return None;
            }
            header.name = header.name.replacen(&self.target_bin, "bin", 1);
        }
        if header.name.starts_with(&self.host_pkg) || header.name.starts_with(&self.host_tool) {
            return None;
        }
        Some(header)
    }
}
