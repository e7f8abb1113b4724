//! Release target catalogue
//!
//! Which OS/architecture combinations get released, which builder builds
//! each one, and how each builder runs the toolchain scripts. The
//! orchestrator only sees the [`TargetCatalog`] trait; [`TomlCatalog`] backs
//! it with a TOML file of `[[builder]]` and `[[target]]` tables.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One OS/architecture combination being released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Unique name, e.g. `linux-amd64` or `windows-386`
    pub name: String,
    pub goos: String,
    pub goarch: String,
    /// Builder that produces the binary archive and runs the primary tests
    pub builder: String,
    /// Optional second builder that runs the tests again (slow/long mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_test_builder: Option<String>,
    /// Skip test runs for this target
    #[serde(default)]
    pub build_only: bool,
    /// Build the race detector runtime into the archive
    #[serde(default)]
    pub race: bool,
    /// Extra `KEY=VALUE` entries for the build and test environment
    #[serde(default)]
    pub extra_env: Vec<String>,
    /// Version prefixes this target applies to; empty means every version
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub versions: Vec<String>,
}

/// Platform installer format produced for a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallerKind {
    Msi,
    Pkg,
}

impl InstallerKind {
    pub fn extension(self) -> &'static str {
        match self {
            InstallerKind::Msi => "msi",
            InstallerKind::Pkg => "pkg",
        }
    }
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl Target {
    /// A target with no long-test builder, tests enabled and no extra env
    pub fn new(name: &str, goos: &str, goarch: &str, builder: &str) -> Self {
        Self {
            name: name.to_string(),
            goos: goos.to_string(),
            goarch: goarch.to_string(),
            builder: builder.to_string(),
            long_test_builder: None,
            build_only: false,
            race: false,
            extra_env: Vec::new(),
            versions: Vec::new(),
        }
    }

    /// `GOOS_GOARCH`, as used in toolchain directory names
    pub fn osarch(&self) -> String {
        format!("{}_{}", self.goos, self.goarch)
    }

    /// The installer this target ships, if any
    pub fn installer_kind(&self) -> Option<InstallerKind> {
        match self.goos.as_str() {
            "windows" => Some(InstallerKind::Msi),
            "darwin" => Some(InstallerKind::Pkg),
            _ => None,
        }
    }

    /// Windows targets also ship a zip archive
    pub fn wants_zip(&self) -> bool {
        self.goos == "windows"
    }

    /// The long-test builder, ignoring an empty name
    pub fn long_test_builder(&self) -> Option<&str> {
        self.long_test_builder.as_deref().filter(|b| !b.is_empty())
    }

    /// Whether this target is released for `version`
    pub fn applies_to(&self, version: &str) -> bool {
        self.versions.is_empty() || self.versions.iter().any(|prefix| version.starts_with(prefix.as_str()))
    }

    /// Default install root for the target OS
    pub fn default_goroot_final(&self) -> &'static str {
        if self.goos == "windows" {
            r"c:\go"
        } else {
            "/usr/local/go"
        }
    }

    /// `extra_env` split into key/value pairs
    pub fn extra_env_pairs(&self) -> Vec<(String, String)> {
        parse_env(&self.extra_env)
    }
}

/// How one builder runs the toolchain scripts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildConfig {
    pub name: String,
    /// Build script relative to the `go` directory
    #[serde(default = "default_make_script")]
    pub make_script: String,
    #[serde(default)]
    pub make_args: Vec<String>,
    /// Full build-and-test script relative to the `go` directory
    #[serde(default = "default_all_script")]
    pub all_script: String,
    #[serde(default)]
    pub all_args: Vec<String>,
    /// Base `KEY=VALUE` environment for every command on this builder
    #[serde(default)]
    pub env: Vec<String>,
    /// Where the agent downloads the bootstrap toolchain from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_url: Option<String>,
    /// Overrides the target's default GOROOT_FINAL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goroot_final: Option<String>,
}

fn default_make_script() -> String {
    "src/make.bash".to_string()
}

fn default_all_script() -> String {
    "src/all.bash".to_string()
}

impl BuildConfig {
    /// A builder with default scripts and no extra environment
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            make_script: default_make_script(),
            make_args: Vec::new(),
            all_script: default_all_script(),
            all_args: Vec::new(),
            env: Vec::new(),
            bootstrap_url: None,
            goroot_final: None,
        }
    }

    pub fn env_pairs(&self) -> Vec<(String, String)> {
        parse_env(&self.env)
    }
}

/// Split `KEY=VALUE` entries; entries without `=` are skipped (validation rejects them up front)
pub fn parse_env(entries: &[String]) -> Vec<(String, String)> {
    entries
        .iter()
        .filter_map(|entry| entry.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Errors from loading or querying the catalogue
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Duplicate target name: '{0}'")]
    DuplicateTarget(String),

    #[error("Duplicate builder name: '{0}'")]
    DuplicateBuilder(String),

    #[error("Target '{target}': unknown builder '{builder}'")]
    UnknownBuilder { target: String, builder: String },

    #[error("Target '{name}': invalid value for '{field}': {reason}")]
    InvalidValue {
        name: String,
        field: String,
        reason: String,
    },

    #[error("No target '{name}' for version {version}")]
    UnknownTarget { version: String, name: String },

    #[error("No builder '{0}'")]
    MissingBuilder(String),
}

/// Lookup table of release targets and builders
pub trait TargetCatalog: Send + Sync {
    /// The target called `name`, if it is released for `version`
    fn lookup(&self, version: &str, name: &str) -> Result<Target, CatalogError>;

    /// Every target released for `version`, in catalogue order
    fn targets(&self, version: &str) -> Vec<Target>;

    /// Build configuration for a builder name
    fn builder(&self, name: &str) -> Result<BuildConfig, CatalogError>;
}

/// Catalogue loaded from a TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlCatalog {
    #[serde(default, rename = "builder")]
    pub builders: Vec<BuildConfig>,

    #[serde(default, rename = "target")]
    pub targets: Vec<Target>,
}

impl TomlCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CatalogError> {
        let catalog: TomlCatalog = toml::from_str(content)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut builders = HashSet::new();
        for builder in &self.builders {
            if !builders.insert(builder.name.as_str()) {
                return Err(CatalogError::DuplicateBuilder(builder.name.clone()));
            }
            check_env(&builder.name, "env", &builder.env)?;
        }

        let mut targets = HashSet::new();
        for target in &self.targets {
            if !targets.insert(target.name.as_str()) {
                return Err(CatalogError::DuplicateTarget(target.name.clone()));
            }
            for (field, value) in [("goos", &target.goos), ("goarch", &target.goarch)] {
                if value.is_empty() || value.contains(['/', '_', '.']) {
                    return Err(CatalogError::InvalidValue {
                        name: target.name.clone(),
                        field: field.to_string(),
                        reason: format!("{:?} is not a valid {}", value, field),
                    });
                }
            }
            if target.name.contains(['/', '.']) {
                return Err(CatalogError::InvalidValue {
                    name: target.name.clone(),
                    field: "name".to_string(),
                    reason: "must not contain '/' or '.'".to_string(),
                });
            }
            for builder in std::iter::once(target.builder.as_str()).chain(target.long_test_builder()) {
                if !builders.contains(builder) {
                    return Err(CatalogError::UnknownBuilder {
                        target: target.name.clone(),
                        builder: builder.to_string(),
                    });
                }
            }
            check_env(&target.name, "extra_env", &target.extra_env)?;
        }

        Ok(())
    }
}

fn check_env(name: &str, field: &str, entries: &[String]) -> Result<(), CatalogError> {
    match entries.iter().find(|e| !matches!(e.split_once('='), Some((k, _)) if !k.is_empty())) {
        Some(bad) => Err(CatalogError::InvalidValue {
            name: name.to_string(),
            field: field.to_string(),
            reason: format!("{:?} is not KEY=VALUE", bad),
        }),
        None => Ok(()),
    }
}

impl TargetCatalog for TomlCatalog {
    fn lookup(&self, version: &str, name: &str) -> Result<Target, CatalogError> {
        self.targets
            .iter()
            .find(|t| t.name == name && t.applies_to(version))
            .cloned()
            .ok_or_else(|| CatalogError::UnknownTarget {
                version: version.to_string(),
                name: name.to_string(),
            })
    }

    fn targets(&self, version: &str) -> Vec<Target> {
        self.targets
            .iter()
            .filter(|t| t.applies_to(version))
            .cloned()
            .collect()
    }

    fn builder(&self, name: &str) -> Result<BuildConfig, CatalogError> {
        self.builders
            .iter()
            .find(|b| b.name == name)
            .cloned()
            .ok_or_else(|| CatalogError::MissingBuilder(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
[[builder]]
name = "linux-amd64-bullseye"
env = ["GO_DISABLE_OUTBOUND_NETWORK=1"]
bootstrap_url = "file:///opt/go1.4.tar.gz"

[[builder]]
name = "linux-s390x-crosscompile"
make_args = ["-v"]

[[builder]]
name = "windows-amd64-2016"
make_script = "src/make.bat"
all_script = "src/all.bat"

[[target]]
name = "linux-amd64"
goos = "linux"
goarch = "amd64"
builder = "linux-amd64-bullseye"
long_test_builder = "linux-amd64-bullseye"
race = true

[[target]]
name = "linux-s390x"
goos = "linux"
goarch = "s390x"
builder = "linux-s390x-crosscompile"
build_only = true
extra_env = ["GOS390X=z13"]

[[target]]
name = "windows-amd64"
goos = "windows"
goarch = "amd64"
builder = "windows-amd64-2016"
versions = ["go1.21", "go1.22"]
"#;

    #[test]
    fn test_parse_catalog() {
        let catalog = TomlCatalog::parse(CATALOG).unwrap();
        assert_eq!(catalog.builders.len(), 3);
        assert_eq!(catalog.targets.len(), 3);

        let linux = catalog.lookup("go1.22.1", "linux-amd64").unwrap();
        assert_eq!(linux.osarch(), "linux_amd64");
        assert_eq!(linux.long_test_builder(), Some("linux-amd64-bullseye"));
        assert!(linux.race);
        assert_eq!(linux.installer_kind(), None);

        let builder = catalog.builder("linux-amd64-bullseye").unwrap();
        assert_eq!(builder.make_script, "src/make.bash");
        assert_eq!(
            builder.env_pairs(),
            vec![("GO_DISABLE_OUTBOUND_NETWORK".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_version_filter() {
        let catalog = TomlCatalog::parse(CATALOG).unwrap();

        assert_eq!(catalog.targets("go1.22.0").len(), 3);
        let old: Vec<_> = catalog.targets("go1.20.5").into_iter().map(|t| t.name).collect();
        assert_eq!(old, vec!["linux-amd64", "linux-s390x"]);
        assert!(matches!(
            catalog.lookup("go1.20.5", "windows-amd64"),
            Err(CatalogError::UnknownTarget { .. })
        ));
    }

    #[test]
    fn test_windows_target_shape() {
        let catalog = TomlCatalog::parse(CATALOG).unwrap();
        let windows = catalog.lookup("go1.21rc2", "windows-amd64").unwrap();

        assert_eq!(windows.installer_kind(), Some(InstallerKind::Msi));
        assert!(windows.wants_zip());
        assert_eq!(windows.long_test_builder(), None);
        assert_eq!(windows.default_goroot_final(), r"c:\go");
    }

    #[test]
    fn test_empty_long_test_builder_is_none() {
        let mut target = TomlCatalog::parse(CATALOG).unwrap().targets[0].clone();
        target.long_test_builder = Some(String::new());
        assert_eq!(target.long_test_builder(), None);
    }

    #[test]
    fn test_unknown_builder_rejected() {
        let content = r#"
[[target]]
name = "linux-arm64"
goos = "linux"
goarch = "arm64"
builder = "linux-arm64-nope"
"#;
        match TomlCatalog::parse(content) {
            Err(CatalogError::UnknownBuilder { target, builder }) => {
                assert_eq!(target, "linux-arm64");
                assert_eq!(builder, "linux-arm64-nope");
            }
            other => panic!("expected UnknownBuilder, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let content = format!(
            "{}\n[[target]]\nname = \"linux-amd64\"\ngoos = \"linux\"\ngoarch = \"amd64\"\nbuilder = \"linux-amd64-bullseye\"\n",
            CATALOG
        );
        assert!(matches!(
            TomlCatalog::parse(&content),
            Err(CatalogError::DuplicateTarget(name)) if name == "linux-amd64"
        ));
    }

    #[test]
    fn test_bad_env_rejected() {
        let content = r#"
[[builder]]
name = "b"
env = ["NOEQUALS"]
"#;
        let err = TomlCatalog::parse(content).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidValue { ref field, .. } if field == "env"));
    }

    #[test]
    fn test_target_name_must_be_filename_safe() {
        let content = r#"
[[builder]]
name = "b"

[[target]]
name = "linux.amd64"
goos = "linux"
goarch = "amd64"
builder = "b"
"#;
        assert!(matches!(
            TomlCatalog::parse(content),
            Err(CatalogError::InvalidValue { ref field, .. }) if field == "name"
        ));
    }

    #[test]
    fn test_parse_env_splits_on_first_equals() {
        let pairs = parse_env(&["GOFLAGS=-ldflags=-s".to_string()]);
        assert_eq!(pairs, vec![("GOFLAGS".to_string(), "-ldflags=-s".to_string())]);
    }
}
